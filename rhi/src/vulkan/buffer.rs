//! Vulkan buffer: a `VkBuffer` plus its dedicated `VkDeviceMemory`
//! allocation (no suballocator; see `memory.rs` for the heap type
//! reserved for that future work).

use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{Buffer, BufferDescriptor, BufferUsage, RhiError, RhiResult};
use ash::vk;
use std::sync::Arc;

pub struct VulkanBuffer {
    pub device: Arc<ash::Device>,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    pub usage: BufferUsage,
    pub id: ResourceId,
    pub host_visible: bool,
}

impl VulkanBuffer {
    pub fn new(
        device: Arc<ash::Device>,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        size: u64,
        usage: BufferUsage,
        host_visible: bool,
    ) -> Self {
        Self { device, buffer, memory, size, usage, id: next_resource_id(), host_visible }
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer").field("id", &self.id).field("size", &self.size).finish()
    }
}

impl Resource for VulkanBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Buffer for VulkanBuffer {
    fn size(&self) -> u64 {
        self.size
    }
    fn usage(&self) -> BufferUsage {
        self.usage
    }
    fn host_visible(&self) -> bool {
        self.host_visible
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// `size % stride == 0` for `BufferUsage::Structured`, per spec's
/// "size % element-stride == 0 where applicable" invariant.
pub fn validate_buffer_size(desc: &BufferDescriptor) -> RhiResult<()> {
    if let BufferUsage::Structured { stride } = desc.usage {
        if stride != 0 && desc.size % stride != 0 {
            return Err(RhiError::BufferSizeNotAlignedToStride { size: desc.size, stride });
        }
    }
    Ok(())
}

pub fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let base = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    base | match usage {
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferUsage::Structured { .. } => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferUsage::TextureBuffer => vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
        BufferUsage::Indirect => vk::BufferUsageFlags::INDIRECT_BUFFER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferMemoryPreference;

    fn desc(size: u64, usage: BufferUsage) -> BufferDescriptor {
        BufferDescriptor { label: None, size, usage, memory: BufferMemoryPreference::DeviceLocal }
    }

    #[test]
    fn structured_buffer_size_must_be_multiple_of_stride() {
        let err = validate_buffer_size(&desc(18, BufferUsage::Structured { stride: 16 })).unwrap_err();
        assert!(matches!(err, RhiError::BufferSizeNotAlignedToStride { size: 18, stride: 16 }));
    }

    #[test]
    fn structured_buffer_size_aligned_to_stride_is_accepted() {
        assert!(validate_buffer_size(&desc(64, BufferUsage::Structured { stride: 16 })).is_ok());
    }

    #[test]
    fn non_structured_usage_is_never_stride_checked() {
        assert!(validate_buffer_size(&desc(17, BufferUsage::Vertex)).is_ok());
    }
}
