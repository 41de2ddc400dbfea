//! Vulkan graphics pipeline state object. `compact_id` is the 16-bit
//! handle named in SPEC_FULL.md §4.7 (`GraphicsPipelineStateMakeId` in
//! the original), allocated from a per-kind monotonic counter so sort
//! keys built from it stay stable and small across a frame.

use crate::mapping::{
    blend_factor_to_vk, blend_op_to_vk, compare_op_to_vk, cull_mode_to_vk, front_face_to_vk, polygon_mode_to_vk,
    sample_count_to_vk, topology_to_vk, vertex_format_to_vk,
};
use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{GraphicsPipeline, GraphicsPipelineDescriptor, GraphicsProgram, RhiError, RhiResult, ShaderStage, VertexInputRate};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use super::compact_id::CompactIdAllocator;

static COMPACT_IDS: CompactIdAllocator = CompactIdAllocator::new();

pub struct VulkanGraphicsPipeline {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) root_signature: Arc<dyn crate::RootSignature>,
    id: ResourceId,
    compact_id: u16,
}

fn create_shader_module(device: &ash::Device, source: &[u8]) -> RhiResult<vk::ShaderModule> {
    if source.len() % 4 != 0 {
        return Err(RhiError::ShaderCompilation("SPIR-V bytecode must be 4-byte aligned".into()));
    }
    let code_u32: Vec<u32> = source.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
    let create_info = vk::ShaderModuleCreateInfo::default().code(&code_u32);
    unsafe { device.create_shader_module(&create_info, None).map_err(RhiError::from) }
}

struct StageBuild {
    modules: Vec<vk::ShaderModule>,
    entry_names: Vec<CString>,
    stage_flags: Vec<vk::ShaderStageFlags>,
}

fn build_stages(device: &ash::Device, stages: &[(vk::ShaderStageFlags, &ShaderStage)]) -> RhiResult<StageBuild> {
    let mut modules = Vec::new();
    let mut entry_names = Vec::new();
    let mut stage_flags = Vec::new();
    for (flag, stage) in stages {
        modules.push(create_shader_module(device, &stage.source)?);
        entry_names.push(CString::new(stage.entry_point.as_str()).map_err(|e| RhiError::ShaderCompilation(e.to_string()))?);
        stage_flags.push(*flag);
    }
    Ok(StageBuild { modules, entry_names, stage_flags })
}

impl VulkanGraphicsPipeline {
    pub fn create(device: Arc<ash::Device>, desc: &GraphicsPipelineDescriptor) -> RhiResult<Self> {
        let root_signature = desc
            .root_signature
            .as_any()
            .downcast_ref::<super::super::descriptor::VulkanRootSignature>()
            .ok_or_else(|| RhiError::DeviceBootstrap("root_signature must be VulkanRootSignature".into()))?;
        let render_pass = desc
            .render_pass
            .as_any()
            .downcast_ref::<super::super::render_pass::VulkanRenderPass>()
            .ok_or_else(|| RhiError::DeviceBootstrap("render_pass must be VulkanRenderPass".into()))?;

        let mut stage_refs: Vec<(vk::ShaderStageFlags, &ShaderStage)> = Vec::new();
        let mut vertex_input_used = true;
        match &desc.program {
            GraphicsProgram::Primitive { vertex, tess_ctrl, tess_eval, geometry, fragment } => {
                stage_refs.push((vk::ShaderStageFlags::VERTEX, vertex));
                if let Some(s) = tess_ctrl {
                    stage_refs.push((vk::ShaderStageFlags::TESSELLATION_CONTROL, s));
                }
                if let Some(s) = tess_eval {
                    stage_refs.push((vk::ShaderStageFlags::TESSELLATION_EVALUATION, s));
                }
                if let Some(s) = geometry {
                    stage_refs.push((vk::ShaderStageFlags::GEOMETRY, s));
                }
                if let Some(s) = fragment {
                    stage_refs.push((vk::ShaderStageFlags::FRAGMENT, s));
                }
            }
            GraphicsProgram::Mesh { task, mesh, fragment } => {
                vertex_input_used = false;
                if let Some(s) = task {
                    stage_refs.push((vk::ShaderStageFlags::TASK_EXT, s));
                }
                stage_refs.push((vk::ShaderStageFlags::MESH_EXT, mesh));
                if let Some(s) = fragment {
                    stage_refs.push((vk::ShaderStageFlags::FRAGMENT, s));
                }
            }
        }

        let built = build_stages(&device, &stage_refs)?;
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = built
            .stage_flags
            .iter()
            .zip(built.modules.iter())
            .zip(built.entry_names.iter())
            .map(|((flag, module), name)| vk::PipelineShaderStageCreateInfo::default().stage(*flag).module(*module).name(name))
            .collect();

        let (binding_descriptions, attribute_descriptions) = vertex_input_descriptions(&desc.vertex_input);
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let (topology, patch_points) = topology_to_vk(desc.primitive_topology);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(topology).primitive_restart_enable(false);
        let tessellation_state = vk::PipelineTessellationStateCreateInfo::default().patch_control_points(patch_points);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode_to_vk(desc.rasterization.polygon_mode))
            .line_width(1.0)
            .cull_mode(cull_mode_to_vk(desc.rasterization.cull_mode))
            .front_face(front_face_to_vk(desc.rasterization.front_face))
            .depth_bias_enable(
                desc.rasterization.depth_bias.constant != 0.0
                    || desc.rasterization.depth_bias.clamp != 0.0
                    || desc.rasterization.depth_bias.slope != 0.0,
            )
            .depth_bias_constant_factor(desc.rasterization.depth_bias.constant)
            .depth_bias_clamp(desc.rasterization.depth_bias.clamp)
            .depth_bias_slope_factor(desc.rasterization.depth_bias.slope);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(sample_count_to_vk(desc.sample_count));

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_targets
            .iter()
            .map(|t| match &t.blend {
                None => vk::PipelineColorBlendAttachmentState::default().blend_enable(false).color_write_mask(vk::ColorComponentFlags::RGBA),
                Some(b) => vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(true)
                    .src_color_blend_factor(blend_factor_to_vk(b.color.src_factor))
                    .dst_color_blend_factor(blend_factor_to_vk(b.color.dst_factor))
                    .color_blend_op(blend_op_to_vk(b.color.op))
                    .src_alpha_blend_factor(blend_factor_to_vk(b.alpha.src_factor))
                    .dst_alpha_blend_factor(blend_factor_to_vk(b.alpha.dst_factor))
                    .alpha_blend_op(blend_op_to_vk(b.alpha.op))
                    .color_write_mask(vk::ColorComponentFlags::RGBA),
            })
            .collect();
        if color_blend_attachments.len() != render_pass.color_attachment_count {
            return Err(RhiError::BlendAttachmentCountMismatch { blend: color_blend_attachments.len(), render_pass: render_pass.color_attachment_count });
        }

        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().logic_op_enable(false).attachments(&color_blend_attachments);

        let depth_stencil_create_info = match &desc.depth_stencil {
            None => vk::PipelineDepthStencilStateCreateInfo::default().depth_test_enable(false).depth_write_enable(false).stencil_test_enable(false),
            Some(ds) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(ds.depth_test_enable)
                .depth_write_enable(ds.depth_write_enable)
                .depth_compare_op(compare_op_to_vk(ds.depth_compare))
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false),
        };

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blend)
            .layout(root_signature.pipeline_layout)
            .render_pass(render_pass.render_pass)
            .subpass(0)
            .depth_stencil_state(&depth_stencil_create_info)
            .dynamic_state(&dynamic_state);
        if vertex_input_used {
            // Input-assembly and tessellation state only apply to the primitive
            // pipeline; mesh pipelines drop both entirely.
            pipeline_info = pipeline_info.vertex_input_state(&vertex_input_info).input_assembly_state(&input_assembly).tessellation_state(&tessellation_state);
        }

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_partial, res)| RhiError::Vulkan(res))?
        };
        let pipeline = pipelines[0];

        for module in built.modules {
            unsafe { device.destroy_shader_module(module, None) };
        }

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

fn vertex_input_descriptions(desc: &crate::VertexInputDescriptor) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = desc
        .bindings
        .iter()
        .map(|b| {
            vk::VertexInputBindingDescription::default().binding(b.binding).stride(b.stride).input_rate(match b.input_rate {
                VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
            })
        })
        .collect();
    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = desc
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription::default().location(a.location).binding(a.binding).format(vertex_format_to_vk(a.format)).offset(a.offset))
        .collect();
    (binding_descriptions, attribute_descriptions)
}

impl Drop for VulkanGraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
        COMPACT_IDS.free(self.compact_id);
    }
}

impl std::fmt::Debug for VulkanGraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanGraphicsPipeline").field("compact_id", &self.compact_id).finish()
    }
}

impl Resource for VulkanGraphicsPipeline {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl GraphicsPipeline for VulkanGraphicsPipeline {
    fn compact_id(&self) -> u16 {
        self.compact_id
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
