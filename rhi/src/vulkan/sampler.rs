//! Vulkan sampler.

use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{AddressMode, FilterMode, RhiError, RhiResult, Sampler, SamplerDescriptor};
use ash::vk;
use std::sync::Arc;

fn filter_to_vk(f: FilterMode) -> vk::Filter {
    match f {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

fn mipmap_mode_to_vk(f: FilterMode) -> vk::SamplerMipmapMode {
    match f {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

fn address_mode_to_vk(a: AddressMode) -> vk::SamplerAddressMode {
    match a {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn create_sampler(device: Arc<ash::Device>, desc: &SamplerDescriptor) -> RhiResult<VulkanSampler> {
    let anisotropy = desc.anisotropy_clamp.map(|c| c.clamp(1.0, 16.0));
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(filter_to_vk(desc.mag_filter))
        .min_filter(filter_to_vk(desc.min_filter))
        .mipmap_mode(mipmap_mode_to_vk(desc.mip_filter))
        .address_mode_u(address_mode_to_vk(desc.address_mode_u))
        .address_mode_v(address_mode_to_vk(desc.address_mode_v))
        .address_mode_w(address_mode_to_vk(desc.address_mode_w))
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .unnormalized_coordinates(false);
    let sampler = unsafe { device.create_sampler(&create_info, None).map_err(RhiError::from)? };
    Ok(VulkanSampler { device, sampler, id: next_resource_id() })
}

pub struct VulkanSampler {
    pub device: Arc<ash::Device>,
    pub sampler: vk::Sampler,
    id: ResourceId,
}

impl VulkanSampler {
    pub fn raw(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

impl std::fmt::Debug for VulkanSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSampler").finish()
    }
}

impl Resource for VulkanSampler {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Sampler for VulkanSampler {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
