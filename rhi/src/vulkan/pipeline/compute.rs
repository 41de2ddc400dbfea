//! Vulkan compute pipeline state object.

use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{ComputePipeline, ComputePipelineDescriptor, RhiError, RhiResult};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use super::compact_id::CompactIdAllocator;

static COMPACT_IDS: CompactIdAllocator = CompactIdAllocator::new();

pub struct VulkanComputePipeline {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) root_signature: Arc<dyn crate::RootSignature>,
    id: ResourceId,
    compact_id: u16,
}

impl VulkanComputePipeline {
    pub fn create(device: Arc<ash::Device>, desc: &ComputePipelineDescriptor) -> RhiResult<Self> {
        let root_signature = desc
            .root_signature
            .as_any()
            .downcast_ref::<super::super::descriptor::VulkanRootSignature>()
            .ok_or_else(|| RhiError::DeviceBootstrap("root_signature must be VulkanRootSignature".into()))?;

        let code = &desc.shader.source;
        if code.len() % 4 != 0 {
            return Err(RhiError::ShaderCompilation("SPIR-V bytecode must be 4-byte aligned".into()));
        }
        let code_u32: Vec<u32> = code.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
        let shader_create_info = vk::ShaderModuleCreateInfo::default().code(&code_u32);
        let shader_module = unsafe { device.create_shader_module(&shader_create_info, None).map_err(RhiError::from)? };

        let entry_name = CString::new(desc.shader.entry_point.as_str()).map_err(|e| RhiError::ShaderCompilation(e.to_string()))?;
        let stage = vk::PipelineShaderStageCreateInfo::default().stage(vk::ShaderStageFlags::COMPUTE).module(shader_module).name(&entry_name);
        let create_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(root_signature.pipeline_layout);
        let pipelines = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_partial, res)| RhiError::Vulkan(res))?
        };
        let pipeline = pipelines[0];
        unsafe { device.destroy_shader_module(shader_module, None) };

        Ok(Self {
            device,
            pipeline,
            root_signature: Arc::clone(&desc.root_signature),
            id: next_resource_id(),
            compact_id: COMPACT_IDS.alloc(),
        })
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.root_signature.as_any().downcast_ref::<super::super::descriptor::VulkanRootSignature>().expect("root signature is VulkanRootSignature").pipeline_layout
    }
}

impl Drop for VulkanComputePipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
        COMPACT_IDS.free(self.compact_id);
    }
}

impl std::fmt::Debug for VulkanComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanComputePipeline").field("compact_id", &self.compact_id).finish()
    }
}

impl Resource for VulkanComputePipeline {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl ComputePipeline for VulkanComputePipeline {
    fn compact_id(&self) -> u16 {
        self.compact_id
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
