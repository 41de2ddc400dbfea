//! Vulkan render pass. `create_vk_render_pass` emits the two implicit
//! external<->subpass dependencies the teacher's version omitted -
//! confirmed against the original source's `vkSubpassDependencies` array
//! (`rhiframebuffer.cpp`), which pairs `VK_SUBPASS_EXTERNAL` with
//! subpass `0` in both directions so a pass waits for prior writes to
//! finish before its attachments are written, and so work after the pass
//! waits for its writes to finish.

use crate::mapping::{sample_count_to_vk, texture_format_to_vk};
use crate::render_pass::{RenderPassDescriptor, RenderPassObj};
use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{LoadOp, RhiError, RhiResult, StoreOp};
use ash::vk;
use std::sync::Arc;

pub fn create_vk_render_pass(device: &ash::Device, desc: &RenderPassDescriptor) -> RhiResult<vk::RenderPass> {
    if desc.color_formats.len() > 7 {
        return Err(RhiError::TooManyColorAttachments(desc.color_formats.len()));
    }
    let samples = sample_count_to_vk(desc.sample_count);
    let mut attachments = Vec::new();
    let mut color_refs = Vec::new();

    for (i, &format) in desc.color_formats.iter().enumerate() {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(texture_format_to_vk(format))
                .samples(samples)
                .load_op(load_op_to_vk(desc.color_load_ops[i]))
                .store_op(store_op_to_vk(desc.color_store_ops[i]))
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        );
        color_refs.push(vk::AttachmentReference::default().attachment(i as u32).layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
    }

    let mut depth_ref = None;
    if let Some(depth_format) = desc.depth_stencil_format {
        let idx = attachments.len() as u32;
        attachments.push(
            vk::AttachmentDescription::default()
                .format(texture_format_to_vk(depth_format))
                .samples(samples)
                .load_op(load_op_to_vk(desc.depth_load_op))
                .store_op(store_op_to_vk(desc.depth_store_op))
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        depth_ref = Some(vk::AttachmentReference::default().attachment(idx).layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
    }

    let mut subpass = vk::SubpassDescription::default().pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS).color_attachments(&color_refs);
    if let Some(ref d) = depth_ref {
        subpass = subpass.depth_stencil_attachment(d);
    }

    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
            .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ),
    ];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None).map_err(RhiError::from) }
}

fn load_op_to_vk(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
    }
}

fn store_op_to_vk(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub struct VulkanRenderPass {
    pub device: Arc<ash::Device>,
    pub render_pass: vk::RenderPass,
    pub color_attachment_count: usize,
    pub has_depth_stencil: bool,
    id: ResourceId,
}

impl VulkanRenderPass {
    pub fn new(device: Arc<ash::Device>, desc: &RenderPassDescriptor) -> RhiResult<Self> {
        let render_pass = create_vk_render_pass(&device, desc)?;
        Ok(Self {
            device,
            render_pass,
            color_attachment_count: desc.color_formats.len(),
            has_depth_stencil: desc.depth_stencil_format.is_some(),
            id: next_resource_id(),
        })
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

impl std::fmt::Debug for VulkanRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRenderPass").field("color_attachment_count", &self.color_attachment_count).field("has_depth_stencil", &self.has_depth_stencil).finish()
    }
}

impl Resource for VulkanRenderPass {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl RenderPassObj for VulkanRenderPass {
    fn color_attachment_count(&self) -> usize {
        self.color_attachment_count
    }
    fn has_depth_stencil(&self) -> bool {
        self.has_depth_stencil
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
