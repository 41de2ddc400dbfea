//! Vertex array: an optional index buffer plus N vertex-buffer slots.
//! Strides are derived once at construction from per-slot vertex-attribute
//! descriptions (SPEC_FULL.md §4.7); binding offsets are always zero.
//! Grounded on the original source's `rhivertex_array.cpp` - the teacher
//! has no standalone equivalent, it binds vertex buffers ad hoc per
//! `set_vertex_buffer` call instead of through an owned object.

use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{Buffer, IndexFormat, RhiError, RhiResult, VertexBinding};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct VertexArrayDescriptor {
    pub bindings: Vec<VertexBinding>,
    pub vertex_buffers: Vec<Arc<dyn Buffer>>,
    pub index_buffer: Option<(Arc<dyn Buffer>, IndexFormat)>,
}

/// One stride per slot, derived from `bindings`; two attributes sharing a
/// slot with conflicting strides is a construction-time error.
#[derive(Debug)]
pub struct VertexArray {
    id: ResourceId,
    pub strides: Vec<u32>,
    pub vertex_buffers: Vec<Arc<dyn Buffer>>,
    pub index_buffer: Option<(Arc<dyn Buffer>, IndexFormat)>,
}

impl VertexArray {
    pub fn new(desc: VertexArrayDescriptor) -> RhiResult<Self> {
        let mut strides = vec![0u32; desc.vertex_buffers.len()];
        for binding in &desc.bindings {
            let slot = binding.binding as usize;
            if slot >= strides.len() {
                continue;
            }
            if strides[slot] != 0 && strides[slot] != binding.stride {
                return Err(RhiError::DeviceBootstrap(format!(
                    "vertex array slot {slot} has conflicting strides ({} vs {})",
                    strides[slot], binding.stride
                )));
            }
            strides[slot] = binding.stride;
        }
        Ok(Self {
            id: next_resource_id(),
            strides,
            vertex_buffers: desc.vertex_buffers,
            index_buffer: desc.index_buffer,
        })
    }
}

impl Resource for VertexArray {
    fn id(&self) -> ResourceId {
        self.id
    }
}
