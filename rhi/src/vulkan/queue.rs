//! Vulkan queue submission. Takes already-recorded `vk::CommandBuffer`
//! handles wrapped in `RecordedCommandBuffer` (downcast via `Any`) rather
//! than a `CommandBuffer` trait object - recording now happens through
//! `dispatcher::dispatch`, not through a live encoder this queue knows
//! about.

use crate::{Fence, Queue, RhiError, RhiResult, Semaphore};
use ash::vk;
use std::sync::Arc;

/// Wraps a fully-recorded primary command buffer for submission. Exists
/// only to give `Queue::submit`'s `&[&dyn Any]` slice something concrete
/// to downcast.
pub struct RecordedCommandBuffer(pub vk::CommandBuffer);

pub struct VulkanQueue {
    pub device: Arc<ash::Device>,
    pub queue: vk::Queue,
}

impl VulkanQueue {
    pub fn new(device: Arc<ash::Device>, queue: vk::Queue) -> Self {
        Self { device, queue }
    }

    pub fn raw(&self) -> vk::Queue {
        self.queue
    }
}

impl std::fmt::Debug for VulkanQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanQueue").finish()
    }
}

impl Queue for VulkanQueue {
    fn submit(
        &self,
        command_buffers: &[&dyn std::any::Any],
        wait_semaphores: &[&dyn Semaphore],
        signal_semaphores: &[&dyn Semaphore],
        signal_fence: Option<&dyn Fence>,
    ) -> RhiResult<()> {
        let vk_buffers: Vec<vk::CommandBuffer> = command_buffers
            .iter()
            .filter_map(|b| b.downcast_ref::<RecordedCommandBuffer>().map(|r| r.0))
            .collect();
        if vk_buffers.is_empty() {
            return Ok(());
        }

        let wait_semas: Vec<vk::Semaphore> = wait_semaphores
            .iter()
            .filter_map(|s| s.as_any().downcast_ref::<super::VulkanSemaphore>().map(|vs| vs.semaphore))
            .collect();
        let signal_semas: Vec<vk::Semaphore> = signal_semaphores
            .iter()
            .filter_map(|s| s.as_any().downcast_ref::<super::VulkanSemaphore>().map(|vs| vs.semaphore))
            .collect();
        let fence = signal_fence
            .and_then(|f| f.as_any().downcast_ref::<super::VulkanFence>().map(|vf| vf.fence))
            .unwrap_or(vk::Fence::null());

        // Wait at color attachment output so a swapchain acquire semaphore
        // only blocks the stage that actually writes the image.
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semas.len()];

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&vk_buffers)
            .wait_semaphores(&wait_semas)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semas);

        unsafe {
            self.device.queue_submit(self.queue, &[submit_info], fence).map_err(RhiError::from)?;
        }
        Ok(())
    }
}
