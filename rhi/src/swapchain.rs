//! Swap chain trait surface. See SPEC_FULL.md §4.5 for the state machine
//! (`Uninitialized -> SurfaceOnly -> Ready -> ImageAcquired -> Ready`)
//! the Vulkan realization in `vulkan::swapchain` implements.

use crate::{Semaphore, Texture, TextureFormat};

pub struct SwapchainFrame<'a> {
    pub image_index: u32,
    pub color: &'a dyn Texture,
    pub depth: Option<&'a dyn Texture>,
}

pub trait Swapchain: Send + Sync {
    /// Blocks until an image is available or the chain goes stale.
    /// `OUT_OF_DATE` triggers a recreate-then-retry when `recreate_on_acquire`
    /// was requested at construction; `SUBOPTIMAL` is reported as success
    /// (the caller presents normally, and the next acquire may recreate).
    fn acquire_next_image(&mut self, signal_semaphore: &dyn Semaphore) -> crate::RhiResult<SwapchainFrame<'_>>;

    /// Submits the present, waiting on `wait_semaphore`, then issues the
    /// explicit post-present `vkQueueWaitIdle` named in SPEC_FULL.md §4.5.
    fn present(&mut self, image_index: u32, wait_semaphore: &dyn Semaphore) -> crate::RhiResult<()>;

    /// Full recreate against the surface's current extent.
    fn resize_buffers(&mut self, width: u32, height: u32) -> crate::RhiResult<()>;

    fn extent(&self) -> (u32, u32);
    fn color_format(&self) -> TextureFormat;
    fn depth_format(&self) -> Option<TextureFormat>;
}
