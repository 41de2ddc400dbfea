//! Vulkan backend. Bootstraps the instance/device/queues, owns the
//! command pool and the in-flight recording state, and implements both
//! `Device` (resource creation, the non-dispatch half of the API) and
//! `dispatcher::DispatchBackend` (the table-driven packet handlers) on
//! top of the concrete types in the sibling `buffer`/`texture`/
//! `sampler`/`render_pass`/`descriptor`/`pipeline`/`queue`/`query`/
//! `swapchain` modules.
//!
//! Grounded on the teacher's `VulkanDevice`: the instance/physical-device/
//! queue-family/logical-device bootstrap sequence carries over almost
//! unchanged, converted from `Result<_, String>` to `RhiResult`. What
//! changes is everything downstream of bootstrap - the teacher records
//! Vulkan calls immediately as `VulkanCommandEncoder` methods are called;
//! here, recording is pure data assembly (`command_buffer.rs`) and the
//! driver calls happen only when `dispatcher::submit` walks the packets
//! against this module's `DispatchBackend` impl, which is why every
//! recording-side field lives behind a `Mutex` - `DispatchBackend`'s
//! methods all take `&self`.

pub mod buffer;
pub mod descriptor;
pub mod pipeline;
pub mod query;
pub mod queue;
pub mod render_pass;
pub mod sampler;
#[cfg(feature = "window")]
pub mod swapchain;
pub mod texture;

use crate::command_buffer::{ClearValues, CommandBuffer, CopySource, DrawArguments, DrawIndexedArguments, QueryPool as QueryPoolTrait, ScissorRect, Viewport};
use crate::device::{Device, DeviceCreateParams, RenderTargetState};
use crate::dispatcher::{self, DispatchBackend};
use crate::log::{LogSink, Severity};
use crate::mapping::is_depth;
use crate::render_pass::{Framebuffer, RenderPassDescriptor, RenderPassObj, RenderTarget};
use crate::resource::{Resource, ResourceId};
use crate::root_signature::{ResourceGroup, RootSignature, RootSignatureDescriptor};
use crate::sampler::SamplerDescriptor;
use crate::vertex_array::{VertexArray, VertexArrayDescriptor};
use crate::{
    Buffer, BufferDescriptor, BufferMemoryPreference, Capabilities, CapabilityFlags, ComputePipeline,
    ComputePipelineDescriptor, Fence, GraphicsPipeline, GraphicsPipelineDescriptor, ImageLayout, Queue, RhiError,
    RhiResult, SampleCount, Semaphore, Texture, TextureDescriptor, TextureInitialData,
};
#[cfg(feature = "window")]
use ash::khr::surface as khr_surface;
#[cfg(feature = "window")]
use ash::khr::swapchain as khr_swapchain;
use ash::vk;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::{Arc, Mutex};

pub use buffer::VulkanBuffer;
pub use descriptor::{VulkanDescriptorPool, VulkanDescriptorSet, VulkanDescriptorSetLayout, VulkanRootSignature};
pub use pipeline::{VulkanComputePipeline, VulkanGraphicsPipeline};
pub use query::VulkanQueryPool;
pub use queue::{RecordedCommandBuffer, VulkanQueue};
pub use render_pass::VulkanRenderPass;
pub use sampler::VulkanSampler;
pub use texture::VulkanTexture;
#[cfg(feature = "window")]
pub use swapchain::{SurfaceState, VulkanSwapchain, VulkanSwapchainImage};

/// Requests `VK_LAYER_KHRONOS_validation` when `enable_validation` is set
/// and the layer is actually present on the loader; silently degrades to
/// no layers otherwise rather than failing instance creation.
fn validation_layer_names(entry: &ash::Entry, enable_validation: bool, log_sink: &dyn LogSink) -> Vec<CString> {
    if !enable_validation {
        return Vec::new();
    }
    let available = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return Vec::new(),
    };
    let wanted = c"VK_LAYER_KHRONOS_validation";
    let present = available.iter().any(|l| {
        let name = unsafe { CStr::from_ptr(l.layer_name.as_ptr()) };
        name == wanted
    });
    if present {
        vec![wanted.to_owned()]
    } else {
        log_sink.log(Severity::Warning, "validation requested but VK_LAYER_KHRONOS_validation is not available");
        Vec::new()
    }
}

fn instance_extension_supported(entry: &ash::Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .map(|exts| exts.iter().any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == name))
        .unwrap_or(false)
}

fn device_extension_supported(instance: &ash::Instance, physical_device: vk::PhysicalDevice, name: &CStr) -> bool {
    unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map(|exts| exts.iter().any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == name))
        .unwrap_or(false)
}

/// The 10-variant `ImageLayout -> vk::ImageLayout` translation. One-for-one
/// with `mapping.rs`'s other `*_to_vk` tables except it lives here: the
/// Vulkan backend is the only thing that needs it.
pub(crate) fn image_layout_to_vk(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::Preinitialized => vk::ImageLayout::PREINITIALIZED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachmentOptimal => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachmentOptimal => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilReadOnlyOptimal => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrcOptimal => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Per-layout stage/access mask a barrier must wait on to leave (`src`) or
/// must block until reached (`dst`). Deriving both sides of a transition
/// from one per-layout table rather than a pairwise matrix is the
/// generalization the 8->10 variant growth calls for: every `(from, to)`
/// pair is still covered, just composed instead of enumerated, and an
/// over-broad mask is merely conservative, never incorrect.
fn layout_stage_access(layout: ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    use vk::AccessFlags as A;
    use vk::PipelineStageFlags as S;
    match layout {
        ImageLayout::Undefined | ImageLayout::Preinitialized => (S::TOP_OF_PIPE, A::empty()),
        ImageLayout::General => (S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        ImageLayout::ColorAttachmentOptimal => (S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE),
        ImageLayout::DepthStencilAttachmentOptimal => {
            (S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS, A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE)
        }
        ImageLayout::DepthStencilReadOnlyOptimal => (S::EARLY_FRAGMENT_TESTS | S::FRAGMENT_SHADER, A::DEPTH_STENCIL_ATTACHMENT_READ | A::SHADER_READ),
        ImageLayout::ShaderReadOnlyOptimal => (S::FRAGMENT_SHADER | S::COMPUTE_SHADER, A::SHADER_READ),
        ImageLayout::TransferSrcOptimal => (S::TRANSFER, A::TRANSFER_READ),
        ImageLayout::TransferDstOptimal => (S::TRANSFER, A::TRANSFER_WRITE),
        ImageLayout::PresentSrc => (S::BOTTOM_OF_PIPE, A::empty()),
    }
}

/// Issues the `vkCmdPipelineBarrier` for a full-resource layout transition
/// and records the new layout on `texture` once the barrier is submitted
/// into `cmd`. `VulkanTexture::current_layout` is real tracked state so
/// every transition must go through here.
pub(crate) fn transition_image_layout(device: &ash::Device, cmd: vk::CommandBuffer, texture: &VulkanTexture, new_layout: ImageLayout) {
    let old_layout = texture.current_layout();
    if old_layout == new_layout {
        return;
    }
    let depth = is_depth(texture.format());
    let aspect_mask = if depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
    let (src_stage, src_access) = layout_stage_access(old_layout);
    let (dst_stage, dst_access) = layout_stage_access(new_layout);
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(image_layout_to_vk(old_layout))
        .new_layout(image_layout_to_vk(new_layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(texture.image())
        .subresource_range(
            vk::ImageSubresourceRange::default().aspect_mask(aspect_mask).base_mip_level(0).level_count(texture.mip_level_count()).base_array_layer(0).layer_count(1),
        )
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    unsafe { device.cmd_pipeline_barrier(cmd, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], &[], &[barrier]) };
    texture.set_current_layout(new_layout);
}

/// Resolves the `VkImageView` backing a color/depth attachment regardless
/// of whether it came from an owned `VulkanTexture` or a borrowed
/// `VulkanSwapchainImage`, mirroring how `render_pass`/`descriptor` treat
/// both interchangeably as long as they expose a view.
pub(crate) fn texture_to_image_view(texture: &dyn Texture) -> RhiResult<vk::ImageView> {
    if let Some(t) = texture.as_any().downcast_ref::<VulkanTexture>() {
        return Ok(t.view());
    }
    #[cfg(feature = "window")]
    if let Some(s) = texture.as_any().downcast_ref::<VulkanSwapchainImage>() {
        return Ok(s.view());
    }
    Err(RhiError::DeviceBootstrap("texture must be a VulkanTexture (or, with 'window', a swap chain image)".into()))
}

/// Resolves the raw `VkImage` backing a texture. Swap chain images don't
/// own one - the swap chain does - so operations that need the image
/// itself (resolve, mip generation, explicit copies) are VulkanTexture-only.
fn texture_to_image(texture: &dyn Texture) -> RhiResult<vk::Image> {
    texture
        .as_any()
        .downcast_ref::<VulkanTexture>()
        .map(|t| t.image())
        .ok_or_else(|| RhiError::DeviceBootstrap("operation requires an owned VulkanTexture, not a swap chain image".into()))
}

fn downcast_buffer(buffer: &dyn Buffer) -> RhiResult<&VulkanBuffer> {
    buffer.as_any().downcast_ref::<VulkanBuffer>().ok_or_else(|| RhiError::DeviceBootstrap("buffer must be VulkanBuffer".into()))
}

fn downcast_texture(texture: &dyn Texture) -> RhiResult<&VulkanTexture> {
    texture.as_any().downcast_ref::<VulkanTexture>().ok_or_else(|| RhiError::DeviceBootstrap("texture must be VulkanTexture".into()))
}

/// Fence/semaphore wrappers. Field names (`fence`, `semaphore`) are a hard
/// constraint: `vulkan::queue` and `vulkan::swapchain` already reference
/// them by name through `super::VulkanFence`/`super::VulkanSemaphore`.
pub(crate) struct VulkanFence {
    device: Arc<ash::Device>,
    fence: vk::Fence,
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.fence, None) };
    }
}

impl std::fmt::Debug for VulkanFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanFence").finish()
    }
}

impl Fence for VulkanFence {
    fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns).map_err(RhiError::from) }
    }
    fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]).map_err(RhiError::from) }
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub(crate) struct VulkanSemaphore {
    device: Arc<ash::Device>,
    semaphore: vk::Semaphore,
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}

impl std::fmt::Debug for VulkanSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSemaphore").finish()
    }
}

impl Semaphore for VulkanSemaphore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// State for the one command buffer currently being recorded.
/// `DispatchBackend` methods mutate this through a `Mutex` since they all
/// take `&self` - see the module doc comment.
struct Recording {
    cmd: vk::CommandBuffer,
    graphics_layout: Option<vk::PipelineLayout>,
    compute_layout: Option<vk::PipelineLayout>,
    bound_vertex_array: Option<Arc<VertexArray>>,
}

pub struct VulkanDevice {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    queue: VulkanQueue,
    #[allow(dead_code)]
    queue_family_index: u32,
    command_pool: vk::CommandPool,
    transfer_queue: Option<vk::Queue>,
    transfer_command_pool: Option<vk::CommandPool>,
    mesh_shader_device: Option<ash::ext::mesh_shader::Device>,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    log_sink: Arc<dyn LogSink>,
    capabilities: Capabilities,
    recording: Mutex<Option<Recording>>,
    framebuffer_cache: Mutex<HashMap<ResourceId, vk::Framebuffer>>,
    #[cfg(feature = "window")]
    surface_state: Mutex<Option<SurfaceState>>,
}

impl VulkanDevice {
    pub fn new(params: DeviceCreateParams) -> RhiResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| RhiError::DeviceBootstrap(e.to_string()))?;

        let app_name = CString::new(params.app_name.as_str()).map_err(|e| RhiError::DeviceBootstrap(e.to_string()))?;
        let engine_name = c"rhi";
        let app_info = vk::ApplicationInfo::default().application_name(&app_name).engine_name(engine_name).api_version(vk::API_VERSION_1_2);

        let layer_names = validation_layer_names(&entry, params.enable_validation, params.log_sink.as_ref());
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let debug_utils_ext = c"VK_EXT_debug_utils";
        let mut instance_extensions: Vec<*const i8> = Vec::new();
        let has_debug_utils = params.enable_validation && instance_extension_supported(&entry, debug_utils_ext);
        if has_debug_utils {
            instance_extensions.push(debug_utils_ext.as_ptr());
        }

        let instance_create_info = vk::InstanceCreateInfo::default().application_info(&app_info).enabled_layer_names(&layer_ptrs).enabled_extension_names(&instance_extensions);
        let instance = unsafe { entry.create_instance(&instance_create_info, None) }.map_err(|e| RhiError::DeviceBootstrap(e.to_string()))?;

        let physical_devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| RhiError::DeviceBootstrap(e.to_string()))?;
        let physical_device = *physical_devices.first().ok_or_else(|| RhiError::DeviceBootstrap("no Vulkan physical devices available".into()))?;

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family_index = queue_families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
            .ok_or_else(|| RhiError::DeviceBootstrap("no queue family supports graphics and compute".into()))? as u32;
        let transfer_family_index = queue_families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::TRANSFER) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
            .map(|i| i as u32);

        let queue_priority = [1.0f32];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default().queue_family_index(queue_family_index).queue_priorities(&queue_priority)];
        if let Some(transfer_index) = transfer_family_index {
            queue_create_infos.push(vk::DeviceQueueCreateInfo::default().queue_family_index(transfer_index).queue_priorities(&queue_priority));
        }

        let mesh_shader_ext = c"VK_EXT_mesh_shader";
        let has_mesh_shader = device_extension_supported(&instance, physical_device, mesh_shader_ext);
        let mut device_extensions: Vec<*const i8> = Vec::new();
        if has_mesh_shader {
            device_extensions.push(mesh_shader_ext.as_ptr());
        }

        let supported_features = unsafe { instance.get_physical_device_features(physical_device) };
        let mut features = vk::PhysicalDeviceFeatures::default();
        features.sampler_anisotropy = supported_features.sampler_anisotropy;
        features.multi_draw_indirect = supported_features.multi_draw_indirect;
        features.tessellation_shader = supported_features.tessellation_shader;
        features.geometry_shader = supported_features.geometry_shader;

        let mut mesh_shader_features = vk::PhysicalDeviceMeshShaderFeaturesEXT::default().mesh_shader(true).task_shader(true);
        let mut device_create_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos).enabled_extension_names(&device_extensions).enabled_features(&features);
        if has_mesh_shader {
            device_create_info = device_create_info.push_next(&mut mesh_shader_features);
        }

        let device_raw = unsafe { instance.create_device(physical_device, &device_create_info, None) }.map_err(|e| RhiError::DeviceBootstrap(e.to_string()))?;
        let queue = unsafe { device_raw.get_device_queue(queue_family_index, 0) };
        let transfer_queue = transfer_family_index.map(|i| unsafe { device_raw.get_device_queue(i, 0) });

        let pool_create_info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index).flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device_raw.create_command_pool(&pool_create_info, None) }.map_err(|e| RhiError::DeviceBootstrap(e.to_string()))?;
        let transfer_command_pool = match transfer_family_index {
            Some(transfer_index) => {
                let info = vk::CommandPoolCreateInfo::default().queue_family_index(transfer_index).flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
                Some(unsafe { device_raw.create_command_pool(&info, None) }.map_err(|e| RhiError::DeviceBootstrap(e.to_string()))?)
            }
            None => None,
        };

        let device = Arc::new(device_raw);
        let mesh_shader_device = has_mesh_shader.then(|| ash::ext::mesh_shader::Device::new(&instance, &device));
        let debug_utils_device = has_debug_utils.then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        let capabilities = query_capabilities(&instance, physical_device, has_mesh_shader);

        Ok(Self {
            entry,
            instance,
            physical_device,
            queue: VulkanQueue::new(Arc::clone(&device), queue),
            device,
            queue_family_index,
            command_pool,
            transfer_queue,
            transfer_command_pool,
            mesh_shader_device,
            debug_utils_device,
            log_sink: params.log_sink,
            capabilities,
            recording: Mutex::new(None),
            framebuffer_cache: Mutex::new(HashMap::new()),
            #[cfg(feature = "window")]
            surface_state: Mutex::new(None),
        })
    }

    /// Locks the current recording state and runs `f` against it, or
    /// fails if no `begin_command_buffer` is open - every `DispatchBackend`
    /// method that touches the driver goes through here.
    fn with_recording<R>(&self, f: impl FnOnce(&ash::Device, &mut Recording) -> RhiResult<R>) -> RhiResult<R> {
        let mut guard = self.recording.lock().expect("recording mutex poisoned");
        let rec = guard.as_mut().ok_or_else(|| RhiError::DeviceBootstrap("no command buffer is being recorded".into()))?;
        f(&self.device, rec)
    }

    fn framebuffer_for(&self, render_pass: &Arc<dyn RenderPassObj>, framebuffer: &RenderTarget) -> RhiResult<vk::Framebuffer> {
        let mut cache = self.framebuffer_cache.lock().expect("framebuffer cache mutex poisoned");
        if let Some(&fb) = cache.get(&framebuffer.id()) {
            return Ok(fb);
        }
        let rp = render_pass.as_any().downcast_ref::<VulkanRenderPass>().ok_or_else(|| RhiError::DeviceBootstrap("render_pass must be VulkanRenderPass".into()))?;
        let mut views: Vec<vk::ImageView> = Vec::with_capacity(framebuffer.color_attachments.len() + 1);
        for texture in &framebuffer.color_attachments {
            views.push(texture_to_image_view(texture.as_ref())?);
        }
        if let Some(depth) = &framebuffer.depth_attachment {
            views.push(texture_to_image_view(depth.as_ref())?);
        }
        let create_info =
            vk::FramebufferCreateInfo::default().render_pass(rp.render_pass).attachments(&views).width(framebuffer.width.max(1)).height(framebuffer.height.max(1)).layers(1);
        let fb = unsafe { self.device.create_framebuffer(&create_info, None).map_err(RhiError::from)? };
        cache.insert(framebuffer.id(), fb);
        Ok(fb)
    }

    fn end_render_pass_if_open(&self, state: &RenderTargetState) -> RhiResult<()> {
        if matches!(state, RenderTargetState::Inside { .. }) {
            self.with_recording(|device, rec| {
                unsafe { device.cmd_end_render_pass(rec.cmd) };
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Begins the render pass lazily: binding a target doesn't open a
    /// Vulkan render pass until the first draw/clear actually needs one.
    fn begin_render_pass_if_needed(&self, state: &mut RenderTargetState) -> RhiResult<()> {
        if let RenderTargetState::HaveTargetOutside { render_pass, framebuffer } = state {
            let fb = self.framebuffer_for(render_pass, framebuffer)?;
            let attachment_count = framebuffer.color_attachments.len() + framebuffer.depth_attachment.is_some() as usize;
            let clear_values = vec![vk::ClearValue::default(); attachment_count];
            let vk_render_pass = render_pass.as_any().downcast_ref::<VulkanRenderPass>().expect("render_pass is VulkanRenderPass").render_pass;
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(vk_render_pass)
                .framebuffer(fb)
                .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width: framebuffer.width, height: framebuffer.height } })
                .clear_values(&clear_values);
            self.with_recording(|device, rec| {
                unsafe { device.cmd_begin_render_pass(rec.cmd, &begin_info, vk::SubpassContents::INLINE) };
                Ok(())
            })?;
            *state = RenderTargetState::Inside { render_pass: Arc::clone(render_pass), framebuffer: Arc::clone(framebuffer) };
        }
        Ok(())
    }

    fn allocate_one_shot_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default().command_pool(self.command_pool).level(vk::CommandBufferLevel::PRIMARY).command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(RhiError::from)? };
        let cmd = buffers[0];
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info).map_err(RhiError::from)? };
        Ok(cmd)
    }

    /// Ends, submits and waits on `cmd`, then frees it. Used for every
    /// transient upload/copy/blit this device issues outside the packet
    /// dispatcher, and for the packet command buffer itself once recording
    /// finishes, since `Device::dispatch` has no channel to hand a
    /// submittable handle back to the caller.
    fn submit_one_shot_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(cmd).map_err(RhiError::from)? };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default(), None).map_err(RhiError::from)? };
        let buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        let result = unsafe { self.device.queue_submit(self.queue.raw(), &[submit_info], fence).map_err(RhiError::from) };
        if result.is_ok() {
            unsafe { self.device.wait_for_fences(&[fence], true, 10_000_000_000).map_err(RhiError::from)? };
        }
        unsafe {
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(self.command_pool, &buffers);
        }
        result
    }

    fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> RhiResult<u32> {
        let memory_props = unsafe { self.instance.get_physical_device_memory_properties(self.physical_device) };
        (0..memory_props.memory_type_count)
            .find(|&i| (type_bits & (1 << i)) != 0 && memory_props.memory_types[i as usize].property_flags.contains(properties))
            .ok_or(RhiError::NoSuitableMemoryType { type_bits, device_local: properties.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) })
    }

    fn create_raw_buffer(&self, size: u64, usage: vk::BufferUsageFlags, properties: vk::MemoryPropertyFlags) -> RhiResult<(vk::Buffer, vk::DeviceMemory)> {
        let create_info = vk::BufferCreateInfo::default().size(size.max(1)).usage(usage).sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None).map_err(RhiError::from)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = self.find_memory_type(requirements.memory_type_bits, properties)?;
        let allocate_info = vk::MemoryAllocateInfo::default().allocation_size(requirements.size).memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None).map_err(RhiError::from)? };
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0).map_err(RhiError::from)? };
        Ok((buffer, memory))
    }

    /// Staging-buffer upload: allocate a transient host-visible buffer,
    /// memcpy into it, copy it into `dst` with a one-shot command buffer.
    fn upload_via_staging(&self, dst: vk::Buffer, dst_offset: u64, data: &[u8]) -> RhiResult<()> {
        let (staging, staging_memory) =
            self.create_raw_buffer(data.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)?;
        unsafe {
            let ptr = self.device.map_memory(staging_memory, 0, data.len() as u64, vk::MemoryMapFlags::empty()).map_err(RhiError::from)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            self.device.unmap_memory(staging_memory);
        }
        let cmd = self.allocate_one_shot_command_buffer()?;
        let region = vk::BufferCopy::default().src_offset(0).dst_offset(dst_offset).size(data.len() as u64);
        unsafe { self.device.cmd_copy_buffer(cmd, staging, dst, &[region]) };
        let result = self.submit_one_shot_command_buffer(cmd);
        unsafe {
            self.device.destroy_buffer(staging, None);
            self.device.free_memory(staging_memory, None);
        }
        result
    }

    fn upload_texture_initial_data(&self, texture: &VulkanTexture, initial: TextureInitialData<'_>) -> RhiResult<()> {
        let total_size: u64 = initial.mips.iter().map(|m| m.len() as u64).sum();
        if total_size == 0 {
            return Ok(());
        }
        let (staging, staging_memory) =
            self.create_raw_buffer(total_size, vk::BufferUsageFlags::TRANSFER_SRC, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)?;
        let mut offsets = Vec::with_capacity(initial.mips.len());
        unsafe {
            let ptr = self.device.map_memory(staging_memory, 0, total_size, vk::MemoryMapFlags::empty()).map_err(RhiError::from)? as *mut u8;
            let mut cursor = 0u64;
            for mip in initial.mips {
                std::ptr::copy_nonoverlapping(mip.as_ptr(), ptr.add(cursor as usize), mip.len());
                offsets.push(cursor);
                cursor += mip.len() as u64;
            }
            self.device.unmap_memory(staging_memory);
        }

        let (base_width, base_height, _) = texture.size();
        let depth = is_depth(texture.format());
        let aspect_mask = if depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        let cmd = self.allocate_one_shot_command_buffer()?;
        transition_image_layout(&self.device, cmd, texture, ImageLayout::TransferDstOptimal);
        for (level, &offset) in offsets.iter().enumerate() {
            let level_width = (base_width >> level).max(1);
            let level_height = (base_height >> level).max(1);
            let region = vk::BufferImageCopy::default()
                .buffer_offset(offset)
                .image_subresource(vk::ImageSubresourceLayers::default().aspect_mask(aspect_mask).mip_level(level as u32).base_array_layer(0).layer_count(1))
                .image_extent(vk::Extent3D { width: level_width, height: level_height, depth: 1 });
            unsafe { self.device.cmd_copy_buffer_to_image(cmd, staging, texture.image(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]) };
        }
        transition_image_layout(&self.device, cmd, texture, ImageLayout::ShaderReadOnlyOptimal);
        let result = self.submit_one_shot_command_buffer(cmd);
        unsafe {
            self.device.destroy_buffer(staging, None);
            self.device.free_memory(staging_memory, None);
        }
        result
    }
}

fn query_capabilities(instance: &ash::Instance, physical_device: vk::PhysicalDevice, has_mesh_shader: bool) -> Capabilities {
    let props = unsafe { instance.get_physical_device_properties(physical_device) };
    let device_name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy().into_owned();
    let limits = props.limits;

    let sample_counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    let max_sample_count = if sample_counts.contains(vk::SampleCountFlags::TYPE_8) {
        SampleCount::X8
    } else if sample_counts.contains(vk::SampleCountFlags::TYPE_4) {
        SampleCount::X4
    } else if sample_counts.contains(vk::SampleCountFlags::TYPE_2) {
        SampleCount::X2
    } else {
        SampleCount::X1
    };

    let features = unsafe { instance.get_physical_device_features(physical_device) };
    let mut flags = CapabilityFlags::INSTANCED_ARRAYS
        | CapabilityFlags::BASE_VERTEX
        | CapabilityFlags::COMPUTE_SHADER
        | CapabilityFlags::VERTEX_SHADER
        | CapabilityFlags::FRAGMENT_SHADER
        | CapabilityFlags::NATIVE_MULTITHREADING
        | CapabilityFlags::SHADER_BYTECODE
        | CapabilityFlags::ZERO_TO_ONE_CLIP_Z
        | CapabilityFlags::UPPER_LEFT_ORIGIN;
    if features.multi_draw_indirect == vk::TRUE {
        flags |= CapabilityFlags::DRAW_INSTANCED;
    }
    if has_mesh_shader {
        flags |= CapabilityFlags::MESH_SHADER;
    }

    Capabilities {
        device_name,
        preferred_swap_chain_color_format: crate::TextureFormat::Bgra8Unorm,
        preferred_swap_chain_depth_format: crate::TextureFormat::D32Float,
        max_viewports: limits.max_viewports,
        max_simultaneous_render_targets: limits.max_color_attachments.min(8),
        max_texture_dimension: limits.max_image_dimension2_d,
        max_texture_array_layers: limits.max_image_array_layers,
        max_texture_buffer_size: limits.max_texel_buffer_elements as u64,
        max_uniform_buffer_size: limits.max_uniform_buffer_range as u64,
        // Vulkan has no dedicated indirect-buffer size limit; approximate
        // with the storage-buffer range since indirect buffers are bound
        // as storage buffers by every backend that emulates this query.
        max_indirect_buffer_size: limits.max_storage_buffer_range as u64,
        max_sample_count,
        max_anisotropy: limits.max_sampler_anisotropy,
        flags,
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for &framebuffer in self.framebuffer_cache.get_mut().expect("framebuffer cache mutex poisoned").values() {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            #[cfg(feature = "window")]
            {
                *self.surface_state.get_mut().expect("surface state mutex poisoned") = None;
            }
            if let Some(pool) = self.transfer_command_pool {
                self.device.destroy_command_pool(pool, None);
            }
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice").field("device_name", &self.capabilities.device_name).finish_non_exhaustive()
    }
}

impl Device for VulkanDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> RhiResult<Arc<dyn Buffer>> {
        buffer::validate_buffer_size(desc)?;
        let properties = match desc.memory {
            BufferMemoryPreference::HostVisible => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            BufferMemoryPreference::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        let (buffer, memory) = self.create_raw_buffer(desc.size, buffer::buffer_usage_to_vk(desc.usage), properties)?;
        let host_visible = matches!(desc.memory, BufferMemoryPreference::HostVisible);
        Ok(Arc::new(VulkanBuffer::new(Arc::clone(&self.device), buffer, memory, desc.size, desc.usage, host_visible)))
    }

    fn create_texture(&self, desc: &TextureDescriptor, initial: Option<TextureInitialData<'_>>) -> RhiResult<Arc<dyn Texture>> {
        let texture = texture::create_texture(Arc::clone(&self.device), &self.instance, self.physical_device, desc)?;
        if let Some(initial) = initial {
            self.upload_texture_initial_data(&texture, initial)?;
        }
        Ok(Arc::new(texture))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> RhiResult<Arc<dyn crate::Sampler>> {
        Ok(Arc::new(sampler::create_sampler(Arc::clone(&self.device), desc)?))
    }

    fn create_root_signature(&self, desc: &RootSignatureDescriptor) -> RhiResult<Arc<dyn RootSignature>> {
        Ok(Arc::new(VulkanRootSignature::new(Arc::clone(&self.device), desc)?))
    }

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> RhiResult<Arc<dyn RenderPassObj>> {
        Ok(Arc::new(VulkanRenderPass::new(Arc::clone(&self.device), desc)?))
    }

    fn create_framebuffer(&self, render_pass: Arc<dyn RenderPassObj>, color_attachments: Vec<Arc<dyn Texture>>, depth_attachment: Option<Arc<dyn Texture>>) -> RhiResult<Arc<Framebuffer>> {
        Ok(Arc::new(Framebuffer::new(render_pass, color_attachments, depth_attachment)))
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDescriptor) -> RhiResult<Arc<dyn GraphicsPipeline>> {
        Ok(Arc::new(VulkanGraphicsPipeline::create(Arc::clone(&self.device), desc)?))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDescriptor) -> RhiResult<Arc<dyn ComputePipeline>> {
        Ok(Arc::new(VulkanComputePipeline::create(Arc::clone(&self.device), desc)?))
    }

    fn create_vertex_array(&self, desc: VertexArrayDescriptor) -> RhiResult<Arc<VertexArray>> {
        Ok(Arc::new(VertexArray::new(desc)?))
    }

    fn create_query_pool(&self, count: u32) -> RhiResult<Arc<dyn QueryPoolTrait>> {
        Ok(Arc::new(VulkanQueryPool::new(Arc::clone(&self.device), count)?))
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<Arc<dyn Fence>> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None).map_err(RhiError::from)? };
        Ok(Arc::new(VulkanFence { device: Arc::clone(&self.device), fence }))
    }

    fn create_semaphore(&self) -> RhiResult<Arc<dyn Semaphore>> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None).map_err(RhiError::from)? };
        Ok(Arc::new(VulkanSemaphore { device: Arc::clone(&self.device), semaphore }))
    }

    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        let vk_buffer = downcast_buffer(buffer)?;
        if vk_buffer.host_visible {
            unsafe {
                let ptr = self.device.map_memory(vk_buffer.memory, offset, data.len() as u64, vk::MemoryMapFlags::empty()).map_err(RhiError::from)?;
                std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
                self.device.unmap_memory(vk_buffer.memory);
            }
            Ok(())
        } else {
            self.upload_via_staging(vk_buffer.buffer, offset, data)
        }
    }

    fn map(&self, buffer: &dyn Buffer) -> RhiResult<*mut u8> {
        let vk_buffer = downcast_buffer(buffer)?;
        if !vk_buffer.host_visible {
            return Err(RhiError::DeviceBootstrap("map requires a host-visible buffer".into()));
        }
        let ptr = unsafe { self.device.map_memory(vk_buffer.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()).map_err(RhiError::from)? };
        Ok(ptr as *mut u8)
    }

    fn unmap(&self, buffer: &dyn Buffer) {
        if let Ok(vk_buffer) = downcast_buffer(buffer) {
            unsafe { self.device.unmap_memory(vk_buffer.memory) };
        }
    }

    fn queue(&self) -> &dyn Queue {
        &self.queue
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle().map_err(RhiError::from) }
    }

    fn dispatch(&self, command_buffer: &CommandBuffer) -> RhiResult<()> {
        dispatcher::submit(self, command_buffer)
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

impl DispatchBackend for VulkanDevice {
    fn log(&self, severity: Severity, message: &str) {
        self.log_sink.log(severity, message);
    }

    fn set_graphics_root_signature(&self, root_signature: &Arc<dyn RootSignature>) -> RhiResult<()> {
        let layout = root_signature.as_any().downcast_ref::<VulkanRootSignature>().ok_or_else(|| RhiError::DeviceBootstrap("root_signature must be VulkanRootSignature".into()))?.pipeline_layout;
        self.with_recording(|_device, rec| {
            rec.graphics_layout = Some(layout);
            Ok(())
        })
    }

    fn set_graphics_pipeline_state(&self, pipeline: &Arc<dyn GraphicsPipeline>) -> RhiResult<()> {
        let vk_pipeline = pipeline.as_any().downcast_ref::<VulkanGraphicsPipeline>().ok_or_else(|| RhiError::DeviceBootstrap("pipeline must be VulkanGraphicsPipeline".into()))?;
        let raw = vk_pipeline.raw();
        let layout = vk_pipeline.pipeline_layout();
        self.with_recording(|device, rec| {
            unsafe { device.cmd_bind_pipeline(rec.cmd, vk::PipelineBindPoint::GRAPHICS, raw) };
            rec.graphics_layout = Some(layout);
            Ok(())
        })
    }

    fn set_graphics_resource_group(&self, root_parameter_index: u32, group: &Arc<ResourceGroup>) -> RhiResult<()> {
        let set = group.descriptor_set.as_ref().and_then(|s| s.as_any().downcast_ref::<VulkanDescriptorSet>()).ok_or_else(|| RhiError::DeviceBootstrap("resource group has no descriptor set".into()))?.set;
        self.with_recording(|device, rec| {
            let layout = rec.graphics_layout.ok_or_else(|| RhiError::DeviceBootstrap("no graphics root signature bound".into()))?;
            unsafe { device.cmd_bind_descriptor_sets(rec.cmd, vk::PipelineBindPoint::GRAPHICS, layout, root_parameter_index, &[set], &[]) };
            Ok(())
        })
    }

    fn set_graphics_vertex_array(&self, vertex_array: Option<&Arc<VertexArray>>) -> RhiResult<()> {
        match vertex_array {
            None => self.with_recording(|_device, rec| {
                rec.bound_vertex_array = None;
                Ok(())
            }),
            Some(va) => {
                let buffers: Vec<vk::Buffer> = va.vertex_buffers.iter().map(|b| downcast_buffer(b.as_ref()).map(|vb| vb.buffer)).collect::<RhiResult<_>>()?;
                let offsets = vec![0u64; buffers.len()];
                let index_binding = match &va.index_buffer {
                    Some((buffer, format)) => {
                        let vk_buffer = downcast_buffer(buffer.as_ref())?;
                        Some((vk_buffer.buffer, crate::mapping::index_format_to_vk(*format).1))
                    }
                    None => None,
                };
                self.with_recording(|device, rec| {
                    if !buffers.is_empty() {
                        unsafe { device.cmd_bind_vertex_buffers(rec.cmd, 0, &buffers, &offsets) };
                    }
                    if let Some((buffer, index_type)) = index_binding {
                        unsafe { device.cmd_bind_index_buffer(rec.cmd, buffer, 0, index_type) };
                    }
                    rec.bound_vertex_array = Some(Arc::clone(va));
                    Ok(())
                })
            }
        }
    }

    fn set_graphics_viewports(&self, viewports: &[Viewport]) -> RhiResult<()> {
        let vk_viewports: Vec<vk::Viewport> =
            viewports.iter().map(|v| vk::Viewport { x: v.x, y: v.y, width: v.width, height: v.height, min_depth: v.min_depth, max_depth: v.max_depth }).collect();
        self.with_recording(|device, rec| {
            unsafe { device.cmd_set_viewport(rec.cmd, 0, &vk_viewports) };
            Ok(())
        })
    }

    fn set_graphics_scissor_rectangles(&self, rects: &[ScissorRect]) -> RhiResult<()> {
        let vk_rects: Vec<vk::Rect2D> = rects
            .iter()
            .map(|r| vk::Rect2D { offset: vk::Offset2D { x: r.x, y: r.y }, extent: vk::Extent2D { width: r.width, height: r.height } })
            .collect();
        self.with_recording(|device, rec| {
            unsafe { device.cmd_set_scissor(rec.cmd, 0, &vk_rects) };
            Ok(())
        })
    }

    fn set_graphics_render_target(&self, state: &mut RenderTargetState, target: Option<&RenderTarget>) -> RhiResult<()> {
        self.end_render_pass_if_open(state)?;
        *state = match target {
            None => RenderTargetState::NoTarget,
            Some(framebuffer) => RenderTargetState::HaveTargetOutside { render_pass: Arc::clone(&framebuffer.render_pass), framebuffer: Arc::clone(framebuffer) },
        };
        Ok(())
    }

    fn clear_graphics(&self, state: &mut RenderTargetState, values: &ClearValues) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        let (color_count, has_depth, width, height) = match state {
            RenderTargetState::Inside { framebuffer, .. } => (framebuffer.color_attachments.len(), framebuffer.depth_attachment.is_some(), framebuffer.width, framebuffer.height),
            _ => return Ok(()),
        };
        let mut attachments = Vec::new();
        if let Some(color) = values.color {
            for i in 0..color_count {
                attachments.push(vk::ClearAttachment {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    color_attachment: i as u32,
                    clear_value: vk::ClearValue { color: vk::ClearColorValue { float32: color } },
                });
            }
        }
        if let Some((depth, stencil)) = values.depth_stencil {
            if has_depth {
                attachments.push(vk::ClearAttachment {
                    aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
                    color_attachment: 0,
                    clear_value: vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth, stencil: stencil as u32 } },
                });
            }
        }
        if attachments.is_empty() {
            return Ok(());
        }
        let rect = vk::ClearRect { rect: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width, height } }, base_array_layer: 0, layer_count: 1 };
        self.with_recording(|device, rec| {
            unsafe { device.cmd_clear_attachments(rec.cmd, &attachments, &[rect]) };
            Ok(())
        })
    }

    fn draw_graphics(&self, state: &mut RenderTargetState, args: &DrawArguments) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        self.with_recording(|device, rec| {
            unsafe { device.cmd_draw(rec.cmd, args.vertex_count, args.instance_count, args.first_vertex, args.first_instance) };
            Ok(())
        })
    }

    fn draw_graphics_emulated(&self, state: &mut RenderTargetState, draws: &[DrawArguments]) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        self.with_recording(|device, rec| {
            for args in draws {
                unsafe { device.cmd_draw(rec.cmd, args.vertex_count, args.instance_count, args.first_vertex, args.first_instance) };
            }
            Ok(())
        })
    }

    fn draw_indexed_graphics(&self, state: &mut RenderTargetState, args: &DrawIndexedArguments) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        self.with_recording(|device, rec| {
            unsafe { device.cmd_draw_indexed(rec.cmd, args.index_count, args.instance_count, args.first_index, args.vertex_offset, args.first_instance) };
            Ok(())
        })
    }

    fn draw_indexed_graphics_emulated(&self, state: &mut RenderTargetState, draws: &[DrawIndexedArguments]) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        self.with_recording(|device, rec| {
            for args in draws {
                unsafe { device.cmd_draw_indexed(rec.cmd, args.index_count, args.instance_count, args.first_index, args.vertex_offset, args.first_instance) };
            }
            Ok(())
        })
    }

    fn draw_indexed_indirect(&self, state: &mut RenderTargetState, buffer: &Arc<dyn Buffer>, offset: u64, draw_count: u32) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        let vk_buffer = downcast_buffer(buffer.as_ref())?.buffer;
        self.with_recording(|device, rec| {
            unsafe { device.cmd_draw_indexed_indirect(rec.cmd, vk_buffer, offset, draw_count, std::mem::size_of::<vk::DrawIndexedIndirectCommand>() as u32) };
            Ok(())
        })
    }

    fn draw_mesh_tasks(&self, state: &mut RenderTargetState, x: u32, y: u32, z: u32) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        let loader = self.mesh_shader_device.as_ref().ok_or_else(|| RhiError::DeviceBootstrap("mesh shaders are not supported on this device".into()))?;
        self.with_recording(|_device, rec| {
            unsafe { loader.cmd_draw_mesh_tasks(rec.cmd, x, y, z) };
            Ok(())
        })
    }

    fn draw_mesh_tasks_emulated(&self, state: &mut RenderTargetState, tasks: &[(u32, u32, u32)]) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        let loader = self.mesh_shader_device.as_ref().ok_or_else(|| RhiError::DeviceBootstrap("mesh shaders are not supported on this device".into()))?;
        self.with_recording(|_device, rec| {
            for &(x, y, z) in tasks {
                unsafe { loader.cmd_draw_mesh_tasks(rec.cmd, x, y, z) };
            }
            Ok(())
        })
    }

    fn draw_mesh_tasks_indirect(&self, state: &mut RenderTargetState, buffer: &Arc<dyn Buffer>, offset: u64, draw_count: u32) -> RhiResult<()> {
        self.begin_render_pass_if_needed(state)?;
        let loader = self.mesh_shader_device.as_ref().ok_or_else(|| RhiError::DeviceBootstrap("mesh shaders are not supported on this device".into()))?;
        let vk_buffer = downcast_buffer(buffer.as_ref())?.buffer;
        self.with_recording(|_device, rec| {
            unsafe { loader.cmd_draw_mesh_tasks_indirect(rec.cmd, vk_buffer, offset, draw_count, std::mem::size_of::<vk::DrawMeshTasksIndirectCommandEXT>() as u32) };
            Ok(())
        })
    }

    fn set_compute_root_signature(&self, root_signature: &Arc<dyn RootSignature>) -> RhiResult<()> {
        let layout = root_signature.as_any().downcast_ref::<VulkanRootSignature>().ok_or_else(|| RhiError::DeviceBootstrap("root_signature must be VulkanRootSignature".into()))?.pipeline_layout;
        self.with_recording(|_device, rec| {
            rec.compute_layout = Some(layout);
            Ok(())
        })
    }

    fn set_compute_pipeline_state(&self, pipeline: &Arc<dyn ComputePipeline>) -> RhiResult<()> {
        let vk_pipeline = pipeline.as_any().downcast_ref::<VulkanComputePipeline>().ok_or_else(|| RhiError::DeviceBootstrap("pipeline must be VulkanComputePipeline".into()))?;
        let raw = vk_pipeline.raw();
        let layout = vk_pipeline.pipeline_layout();
        self.with_recording(|device, rec| {
            unsafe { device.cmd_bind_pipeline(rec.cmd, vk::PipelineBindPoint::COMPUTE, raw) };
            rec.compute_layout = Some(layout);
            Ok(())
        })
    }

    fn set_compute_resource_group(&self, root_parameter_index: u32, group: &Arc<ResourceGroup>) -> RhiResult<()> {
        let set = group.descriptor_set.as_ref().and_then(|s| s.as_any().downcast_ref::<VulkanDescriptorSet>()).ok_or_else(|| RhiError::DeviceBootstrap("resource group has no descriptor set".into()))?.set;
        self.with_recording(|device, rec| {
            let layout = rec.compute_layout.ok_or_else(|| RhiError::DeviceBootstrap("no compute root signature bound".into()))?;
            unsafe { device.cmd_bind_descriptor_sets(rec.cmd, vk::PipelineBindPoint::COMPUTE, layout, root_parameter_index, &[set], &[]) };
            Ok(())
        })
    }

    fn dispatch_compute(&self, x: u32, y: u32, z: u32) -> RhiResult<()> {
        self.with_recording(|device, rec| {
            unsafe { device.cmd_dispatch(rec.cmd, x, y, z) };
            Ok(())
        })
    }

    fn resolve_multisample_framebuffer(&self, src: &RenderTarget, dst: &RenderTarget) -> RhiResult<()> {
        if src.color_attachments.len() != dst.color_attachments.len() {
            return Err(RhiError::DeviceBootstrap("resolve source and destination attachment counts differ".into()));
        }
        let pairs: Vec<(vk::Image, vk::Image)> = src
            .color_attachments
            .iter()
            .zip(dst.color_attachments.iter())
            .map(|(s, d)| Ok((texture_to_image(s.as_ref())?, texture_to_image(d.as_ref())?)))
            .collect::<RhiResult<_>>()?;
        let (width, height) = (dst.width, dst.height);
        self.with_recording(|device, rec| {
            for (src_image, dst_image) in &pairs {
                let region = vk::ImageResolve::default()
                    .src_subresource(vk::ImageSubresourceLayers::default().aspect_mask(vk::ImageAspectFlags::COLOR).mip_level(0).base_array_layer(0).layer_count(1))
                    .dst_subresource(vk::ImageSubresourceLayers::default().aspect_mask(vk::ImageAspectFlags::COLOR).mip_level(0).base_array_layer(0).layer_count(1))
                    .extent(vk::Extent3D { width, height, depth: 1 });
                unsafe {
                    device.cmd_resolve_image(
                        rec.cmd,
                        *src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        *dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    )
                };
            }
            Ok(())
        })
    }

    fn copy_resource(&self, src: &CopySource, dst: &CopySource) -> RhiResult<()> {
        match (src, dst) {
            (CopySource::Buffer { buffer: src_buf, offset: src_offset, size }, CopySource::Buffer { buffer: dst_buf, offset: dst_offset, .. }) => {
                let src_vk = downcast_buffer(src_buf.as_ref())?.buffer;
                let dst_vk = downcast_buffer(dst_buf.as_ref())?.buffer;
                let region = vk::BufferCopy::default().src_offset(*src_offset).dst_offset(*dst_offset).size(*size);
                self.with_recording(|device, rec| {
                    unsafe { device.cmd_copy_buffer(rec.cmd, src_vk, dst_vk, &[region]) };
                    Ok(())
                })
            }
            (CopySource::Buffer { buffer, offset, .. }, CopySource::Texture { texture, mip_level }) => {
                let vk_buffer = downcast_buffer(buffer.as_ref())?.buffer;
                let vk_texture = downcast_texture(texture.as_ref())?;
                let (width, height, _) = vk_texture.size();
                let depth = is_depth(vk_texture.format());
                let aspect_mask = if depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(*offset)
                    .image_subresource(vk::ImageSubresourceLayers::default().aspect_mask(aspect_mask).mip_level(*mip_level).base_array_layer(0).layer_count(1))
                    .image_extent(vk::Extent3D { width, height, depth: 1 });
                self.with_recording(|device, rec| {
                    unsafe { device.cmd_copy_buffer_to_image(rec.cmd, vk_buffer, vk_texture.image(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]) };
                    Ok(())
                })
            }
            (CopySource::Texture { texture, mip_level }, CopySource::Buffer { buffer, offset, .. }) => {
                let vk_texture = downcast_texture(texture.as_ref())?;
                let vk_buffer = downcast_buffer(buffer.as_ref())?.buffer;
                let (width, height, _) = vk_texture.size();
                let depth = is_depth(vk_texture.format());
                let aspect_mask = if depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(*offset)
                    .image_subresource(vk::ImageSubresourceLayers::default().aspect_mask(aspect_mask).mip_level(*mip_level).base_array_layer(0).layer_count(1))
                    .image_extent(vk::Extent3D { width, height, depth: 1 });
                self.with_recording(|device, rec| {
                    unsafe { device.cmd_copy_image_to_buffer(rec.cmd, vk_texture.image(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk_buffer, &[region]) };
                    Ok(())
                })
            }
            (CopySource::Texture { texture: src_tex, mip_level: src_mip }, CopySource::Texture { texture: dst_tex, mip_level: dst_mip }) => {
                let src_vk = downcast_texture(src_tex.as_ref())?;
                let dst_vk = downcast_texture(dst_tex.as_ref())?;
                let (width, height, _) = src_vk.size();
                let depth = is_depth(src_vk.format());
                let aspect_mask = if depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
                let region = vk::ImageCopy::default()
                    .src_subresource(vk::ImageSubresourceLayers::default().aspect_mask(aspect_mask).mip_level(*src_mip).base_array_layer(0).layer_count(1))
                    .dst_subresource(vk::ImageSubresourceLayers::default().aspect_mask(aspect_mask).mip_level(*dst_mip).base_array_layer(0).layer_count(1))
                    .extent(vk::Extent3D { width, height, depth: 1 });
                self.with_recording(|device, rec| {
                    unsafe {
                        device.cmd_copy_image(rec.cmd, src_vk.image(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL, dst_vk.image(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region])
                    };
                    Ok(())
                })
            }
        }
    }

    fn generate_mipmaps(&self, texture: &Arc<dyn Texture>) -> RhiResult<()> {
        let vk_texture = downcast_texture(texture.as_ref())?;
        let (base_width, base_height, _) = vk_texture.size();
        let mip_levels = vk_texture.mip_level_count();
        if mip_levels <= 1 {
            return Ok(());
        }
        let image = vk_texture.image();
        self.with_recording(|device, rec| {
            let mut mip_width = base_width as i32;
            let mut mip_height = base_height as i32;
            for level in 1..mip_levels {
                let src_barrier = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange::default().aspect_mask(vk::ImageAspectFlags::COLOR).base_mip_level(level - 1).level_count(1).base_array_layer(0).layer_count(1))
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
                unsafe { device.cmd_pipeline_barrier(rec.cmd, vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::TRANSFER, vk::DependencyFlags::empty(), &[], &[], &[src_barrier]) };

                let next_width = (mip_width / 2).max(1);
                let next_height = (mip_height / 2).max(1);
                let blit = vk::ImageBlit::default()
                    .src_offsets([vk::Offset3D::default(), vk::Offset3D { x: mip_width, y: mip_height, z: 1 }])
                    .src_subresource(vk::ImageSubresourceLayers::default().aspect_mask(vk::ImageAspectFlags::COLOR).mip_level(level - 1).base_array_layer(0).layer_count(1))
                    .dst_offsets([vk::Offset3D::default(), vk::Offset3D { x: next_width, y: next_height, z: 1 }])
                    .dst_subresource(vk::ImageSubresourceLayers::default().aspect_mask(vk::ImageAspectFlags::COLOR).mip_level(level).base_array_layer(0).layer_count(1));
                unsafe {
                    device.cmd_blit_image(
                        rec.cmd,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    )
                };

                let to_shader_read = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange::default().aspect_mask(vk::ImageAspectFlags::COLOR).base_mip_level(level - 1).level_count(1).base_array_layer(0).layer_count(1))
                    .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ);
                unsafe { device.cmd_pipeline_barrier(rec.cmd, vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER, vk::DependencyFlags::empty(), &[], &[], &[to_shader_read]) };

                mip_width = next_width;
                mip_height = next_height;
            }

            let last_level_barrier = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange::default().aspect_mask(vk::ImageAspectFlags::COLOR).base_mip_level(mip_levels - 1).level_count(1).base_array_layer(0).layer_count(1))
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            unsafe { device.cmd_pipeline_barrier(rec.cmd, vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::FRAGMENT_SHADER, vk::DependencyFlags::empty(), &[], &[], &[last_level_barrier]) };
            Ok(())
        })?;
        vk_texture.set_current_layout(ImageLayout::ShaderReadOnlyOptimal);
        Ok(())
    }

    fn reset_query_pool(&self, pool: &Arc<dyn QueryPoolTrait>, first: u32, count: u32) -> RhiResult<()> {
        let vk_pool = pool.as_any().downcast_ref::<VulkanQueryPool>().ok_or_else(|| RhiError::DeviceBootstrap("query pool must be VulkanQueryPool".into()))?.pool;
        self.with_recording(|device, rec| {
            unsafe { device.cmd_reset_query_pool(rec.cmd, vk_pool, first, count) };
            Ok(())
        })
    }

    fn begin_query(&self, pool: &Arc<dyn QueryPoolTrait>, index: u32) -> RhiResult<()> {
        let vk_pool = pool.as_any().downcast_ref::<VulkanQueryPool>().ok_or_else(|| RhiError::DeviceBootstrap("query pool must be VulkanQueryPool".into()))?.pool;
        self.with_recording(|device, rec| {
            unsafe { device.cmd_begin_query(rec.cmd, vk_pool, index, vk::QueryControlFlags::empty()) };
            Ok(())
        })
    }

    fn end_query(&self, pool: &Arc<dyn QueryPoolTrait>, index: u32) -> RhiResult<()> {
        let vk_pool = pool.as_any().downcast_ref::<VulkanQueryPool>().ok_or_else(|| RhiError::DeviceBootstrap("query pool must be VulkanQueryPool".into()))?.pool;
        self.with_recording(|device, rec| {
            unsafe { device.cmd_end_query(rec.cmd, vk_pool, index) };
            Ok(())
        })
    }

    fn get_query_pool_results(&self, pool: &dyn QueryPoolTrait, first: u32, count: u32, wait: bool) -> RhiResult<Vec<u64>> {
        let vk_pool = pool.as_any().downcast_ref::<VulkanQueryPool>().ok_or_else(|| RhiError::DeviceBootstrap("query pool must be VulkanQueryPool".into()))?;
        let mut results = vec![0u64; count as usize];
        let mut flags = vk::QueryResultFlags::TYPE_64;
        if wait {
            flags |= vk::QueryResultFlags::WAIT;
        }
        unsafe { self.device.get_query_pool_results(vk_pool.pool, first, &mut results, flags).map_err(RhiError::from)? };
        Ok(results)
    }

    fn write_timestamp_query(&self, pool: &Arc<dyn QueryPoolTrait>, index: u32) -> RhiResult<()> {
        let vk_pool = pool.as_any().downcast_ref::<VulkanQueryPool>().ok_or_else(|| RhiError::DeviceBootstrap("query pool must be VulkanQueryPool".into()))?.pool;
        self.with_recording(|device, rec| {
            unsafe { device.cmd_write_timestamp(rec.cmd, vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk_pool, index) };
            Ok(())
        })
    }

    fn debug_marker_begin(&self, label: &str) -> RhiResult<()> {
        let Some(loader) = self.debug_utils_device.as_ref() else { return Ok(()) };
        let name = CString::new(label).unwrap_or_default();
        let label_info = vk::DebugUtilsLabelEXT::default().label_name(&name);
        self.with_recording(|_device, rec| {
            unsafe { loader.cmd_begin_debug_utils_label(rec.cmd, &label_info) };
            Ok(())
        })
    }

    fn debug_marker_end(&self) -> RhiResult<()> {
        let Some(loader) = self.debug_utils_device.as_ref() else { return Ok(()) };
        self.with_recording(|_device, rec| {
            unsafe { loader.cmd_end_debug_utils_label(rec.cmd) };
            Ok(())
        })
    }

    fn begin_command_buffer(&self) -> RhiResult<()> {
        let cmd = self.allocate_one_shot_command_buffer()?;
        let mut guard = self.recording.lock().expect("recording mutex poisoned");
        *guard = Some(Recording { cmd, graphics_layout: None, compute_layout: None, bound_vertex_array: None });
        Ok(())
    }

    fn end_command_buffer(&self, state: &mut RenderTargetState) -> RhiResult<()> {
        self.end_render_pass_if_open(state)?;
        *state = RenderTargetState::NoTarget;
        let cmd = self.recording.lock().expect("recording mutex poisoned").take().ok_or_else(|| RhiError::DeviceBootstrap("no command buffer is being recorded".into()))?.cmd;
        self.submit_one_shot_command_buffer(cmd)
    }
}

#[cfg(feature = "window")]
impl crate::PresentationSurfaceFactory for VulkanDevice {
    /// Creates the `VkSurfaceKHR` for `native` and picks the queue family
    /// that can present to it, per SPEC_FULL.md §4.5's `SurfaceOnly` state.
    /// A later `create_swapchain` call builds the chain against it.
    fn create_surface(&self, native: crate::NativeWindowHandle<'_>) -> RhiResult<()> {
        let surface = unsafe { ash_window::create_surface(&self.entry, &self.instance, native.display, native.handle, None) }.map_err(RhiError::from)?;
        let surface_loader = khr_surface::Instance::new(&self.entry, &self.instance);

        let queue_families = unsafe { self.instance.get_physical_device_queue_family_properties(self.physical_device) };
        let present_queue_family = (0..queue_families.len() as u32)
            .find(|&i| unsafe { surface_loader.get_physical_device_surface_support(self.physical_device, i, surface) }.unwrap_or(false))
            .ok_or(RhiError::SurfaceNotSupported);
        let present_queue_family = match present_queue_family {
            Ok(family) => family,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let mut guard = self.surface_state.lock().expect("surface state mutex poisoned");
        *guard = Some(SurfaceState { surface_loader, surface, present_queue_family });
        Ok(())
    }
}

#[cfg(feature = "window")]
impl VulkanDevice {
    /// Builds the swap chain against the surface a prior `create_surface`
    /// call attached. `recreate_on_acquire` lets the caller opt into
    /// transparent recreate-then-retry on `OUT_OF_DATE` inside
    /// `Swapchain::acquire_next_image`, per SPEC_FULL.md §4.5.
    pub fn create_swapchain(&self, width: u32, height: u32, recreate_on_acquire: bool) -> RhiResult<VulkanSwapchain> {
        let guard = self.surface_state.lock().expect("surface state mutex poisoned");
        let state = guard.as_ref().ok_or(RhiError::InvalidSwapChainState("create_surface must be called before create_swapchain"))?;
        let present_queue = unsafe { self.device.get_device_queue(state.present_queue_family, 0) };
        let swapchain_loader = khr_swapchain::Device::new(&self.instance, &self.device);
        let surface_loader = khr_surface::Instance::new(&self.entry, &self.instance);
        VulkanSwapchain::new(
            Arc::clone(&self.device),
            self.instance.clone(),
            self.physical_device,
            surface_loader,
            state.surface,
            swapchain_loader,
            present_queue,
            width,
            height,
            recreate_on_acquire,
        )
    }
}
