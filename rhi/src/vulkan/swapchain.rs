//! Vulkan swap chain (feature "window"). Implements the state machine and
//! negotiation rules from SPEC_FULL.md §4.5: format preference
//! `RGBA8_UNORM`+`SRGB_NONLINEAR` -> `BGRA8_UNORM` -> first available,
//! present-mode preference `MAILBOX` -> `FIFO`, extent clamped to the
//! surface's min/max (skipping recreate entirely on a zero clamped
//! extent - a minimized window), and the explicit post-present
//! `vkQueueWaitIdle`.

use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::swapchain::{Swapchain, SwapchainFrame};
use crate::{RhiError, RhiResult, Semaphore, Texture, TextureDimension, TextureFormat};
use ash::khr::surface as khr_surface;
use ash::khr::swapchain as khr_swapchain;
use ash::vk;
use std::sync::Arc;

use super::VulkanSemaphore;

/// Surface plus the queue family confirmed to support presenting on it.
/// Lives on `VulkanDevice` once a window is attached (`SurfaceOnly` state
/// in SPEC_FULL.md §4.5's machine).
pub struct SurfaceState {
    pub surface_loader: khr_surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub present_queue_family: u32,
}

impl Drop for SurfaceState {
    fn drop(&mut self) {
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}

/// Swap chain image wrapper. Does not own the `VkImage` - the swap chain
/// does - only the per-image view created at chain-creation time.
pub struct VulkanSwapchainImage {
    device: Arc<ash::Device>,
    view: vk::ImageView,
    format: TextureFormat,
    extent: (u32, u32),
    id: ResourceId,
}

impl VulkanSwapchainImage {
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for VulkanSwapchainImage {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.view, None) };
    }
}

impl std::fmt::Debug for VulkanSwapchainImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchainImage").field("id", &self.id).field("extent", &self.extent).finish()
    }
}

impl Resource for VulkanSwapchainImage {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Texture for VulkanSwapchainImage {
    fn format(&self) -> TextureFormat {
        self.format
    }
    fn size(&self) -> (u32, u32, u32) {
        (self.extent.0, self.extent.1, 1)
    }
    fn dimension(&self) -> TextureDimension {
        TextureDimension::D2
    }
    fn mip_level_count(&self) -> u32 {
        1
    }
    fn sample_count(&self) -> crate::SampleCount {
        crate::SampleCount::X1
    }
    fn current_layout(&self) -> crate::ImageLayout {
        crate::ImageLayout::Undefined
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let Some(f) = formats.iter().find(|f| f.format == vk::Format::R8G8B8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR) {
        return *f;
    }
    if let Some(f) = formats.iter().find(|f| f.format == vk::Format::B8G8R8A8_UNORM) {
        return *f;
    }
    formats[0]
}

fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_depth_format(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Option<vk::Format> {
    [vk::Format::D32_SFLOAT, vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT].into_iter().find(|&format| {
        let props = unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        props.optimal_tiling_features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub struct VulkanSwapchain {
    device: Arc<ash::Device>,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: khr_surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain_loader: khr_swapchain::Device,
    swapchain: vk::SwapchainKHR,
    present_queue: vk::Queue,
    images: Vec<Arc<VulkanSwapchainImage>>,
    depth_texture: Option<super::texture::VulkanTexture>,
    color_format: TextureFormat,
    depth_format: Option<TextureFormat>,
    extent: (u32, u32),
    recreate_on_acquire: bool,
    acquired_image: Option<u32>,
}

impl VulkanSwapchain {
    /// Owning handle to the current image at `index`, for callers (the
    /// packed command buffer's `Framebuffer`) that need `Arc<dyn Texture>`
    /// rather than the borrowed reference `SwapchainFrame` hands out.
    pub fn image_texture(&self, index: u32) -> Arc<dyn Texture> {
        Arc::clone(&self.images[index as usize]) as Arc<dyn Texture>
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<ash::Device>,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface_loader: khr_surface::Instance,
        surface: vk::SurfaceKHR,
        swapchain_loader: khr_swapchain::Device,
        present_queue: vk::Queue,
        width: u32,
        height: u32,
        recreate_on_acquire: bool,
    ) -> RhiResult<Self> {
        let mut this = Self {
            device,
            instance,
            physical_device,
            surface_loader,
            surface,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            present_queue,
            images: Vec::new(),
            depth_texture: None,
            color_format: TextureFormat::Rgba8Unorm,
            depth_format: None,
            extent: (width, height),
            recreate_on_acquire,
            acquired_image: None,
        };
        this.create_chain(width, height, vk::SwapchainKHR::null())?;
        Ok(this)
    }

    /// Create-chain per SPEC_FULL.md §4.5. `width`/`height` are the
    /// surface's requested extent before clamping; a zero clamped extent
    /// (minimized window) leaves the existing chain untouched.
    fn create_chain(&mut self, width: u32, height: u32, old_swapchain: vk::SwapchainKHR) -> RhiResult<bool> {
        let caps = unsafe {
            self.surface_loader.get_physical_device_surface_capabilities(self.physical_device, self.surface).map_err(RhiError::from)?
        };
        let extent = vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width.max(caps.min_image_extent.width)),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height.max(caps.min_image_extent.height)),
        };
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        let formats = unsafe { self.surface_loader.get_physical_device_surface_formats(self.physical_device, self.surface).map_err(RhiError::from)? };
        let surface_format = choose_surface_format(&formats);
        let present_modes =
            unsafe { self.surface_loader.get_physical_device_surface_present_modes(self.physical_device, self.surface).map_err(RhiError::from)? };
        let present_mode = choose_present_mode(&present_modes);

        let image_count = if caps.max_image_count == 0 { caps.min_image_count + 1 } else { (caps.min_image_count + 1).min(caps.max_image_count) };
        let transform = if caps.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if caps.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None).map_err(RhiError::from)? };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }

        self.images.clear();
        let vk_images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain).map_err(RhiError::from)? };
        let color_format = texture_format_from_vk(surface_format.format);
        for image in vk_images {
            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default().aspect_mask(vk::ImageAspectFlags::COLOR).base_mip_level(0).level_count(1).base_array_layer(0).layer_count(1),
                );
            let view = unsafe { self.device.create_image_view(&view_create_info, None).map_err(RhiError::from)? };
            self.images.push(Arc::new(VulkanSwapchainImage {
                device: Arc::clone(&self.device),
                view,
                format: color_format,
                extent: (extent.width, extent.height),
                id: next_resource_id(),
            }));
        }

        self.depth_texture = None;
        self.depth_format = choose_depth_format(&self.instance, self.physical_device).map(texture_format_from_vk);
        if let Some(depth_format) = self.depth_format {
            let descriptor = crate::TextureDescriptor {
                label: Some("swapchain depth"),
                size: (extent.width, extent.height, 1),
                format: depth_format,
                usage: crate::TextureUsage::RENDER_ATTACHMENT,
                dimension: TextureDimension::D2,
                mip_level_count: 1,
                sample_count: crate::SampleCount::X1,
            };
            self.depth_texture = Some(super::texture::create_texture(Arc::clone(&self.device), &self.instance, self.physical_device, &descriptor)?);
        }

        self.swapchain = swapchain;
        self.color_format = color_format;
        self.extent = (extent.width, extent.height);
        self.acquired_image = None;
        Ok(true)
    }
}

fn texture_format_from_vk(format: vk::Format) -> TextureFormat {
    match format {
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::D32_SFLOAT => TextureFormat::D32Float,
        vk::Format::D32_SFLOAT_S8_UINT => TextureFormat::D32FloatS8Uint,
        vk::Format::D24_UNORM_S8_UINT => TextureFormat::D24UnormS8Uint,
        _ => TextureFormat::Rgba8Unorm,
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        self.images.clear();
        self.depth_texture = None;
        unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
    }
}

impl std::fmt::Debug for VulkanSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchain").field("extent", &self.extent).field("image_count", &self.images.len()).finish()
    }
}

impl Swapchain for VulkanSwapchain {
    fn acquire_next_image(&mut self, signal_semaphore: &dyn Semaphore) -> RhiResult<SwapchainFrame<'_>> {
        let sem = signal_semaphore.as_any().downcast_ref::<VulkanSemaphore>().ok_or_else(|| RhiError::InvalidSwapChainState("semaphore is not a Vulkan semaphore"))?.semaphore;
        let result = unsafe { self.swapchain_loader.acquire_next_image(self.swapchain, u64::MAX, sem, vk::Fence::null()) };
        let index = match result {
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) if self.recreate_on_acquire => {
                let (w, h) = self.extent;
                let old = self.swapchain;
                if !self.create_chain(w, h, old)? {
                    return Err(RhiError::InvalidSwapChainState("surface extent is zero"));
                }
                let (index, _) = unsafe {
                    self.swapchain_loader.acquire_next_image(self.swapchain, u64::MAX, sem, vk::Fence::null()).map_err(RhiError::from)?
                };
                index
            }
            Err(e) => return Err(RhiError::from(e)),
        };
        self.acquired_image = Some(index);
        Ok(SwapchainFrame { image_index: index, color: self.images[index as usize].as_ref(), depth: self.depth_texture.as_ref().map(|t| t as &dyn Texture) })
    }

    fn present(&mut self, image_index: u32, wait_semaphore: &dyn Semaphore) -> RhiResult<()> {
        let sem = wait_semaphore.as_any().downcast_ref::<VulkanSemaphore>().ok_or_else(|| RhiError::InvalidSwapChainState("semaphore is not a Vulkan semaphore"))?.semaphore;
        let wait_semas = [sem];
        let image_indices = [image_index];
        let present_info =
            vk::PresentInfoKHR::default().wait_semaphores(&wait_semas).swapchains(std::slice::from_ref(&self.swapchain)).image_indices(&image_indices);
        let result = unsafe { self.swapchain_loader.queue_present(self.present_queue, &present_info) };
        match result {
            Ok(_suboptimal) => {}
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {}
            Err(e) => return Err(RhiError::from(e)),
        }
        unsafe { self.device.queue_wait_idle(self.present_queue).map_err(RhiError::from)? };
        self.acquired_image = None;
        Ok(())
    }

    fn resize_buffers(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let old = self.swapchain;
        self.create_chain(width, height, old)?;
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn color_format(&self) -> TextureFormat {
        self.color_format
    }

    fn depth_format(&self) -> Option<TextureFormat> {
        self.depth_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn surface_format_prefers_rgba8_unorm_srgb_nonlinear() {
        let formats = [
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn surface_format_falls_back_to_bgra8_unorm() {
        let formats = [fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn surface_format_falls_back_to_first_available() {
        let formats = [fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn present_mode_prefers_mailbox_when_available() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }
}
