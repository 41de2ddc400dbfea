//! Vulkan realization of root signatures, descriptor set layouts, pools
//! and sets. `root_resource_kind_to_vk_descriptor_type` is the
//! range-type -> descriptor-type mapping table named in SPEC_FULL.md
//! §4.3; `VulkanRootSignature::create_resource_group` enforces the
//! layout-match invariant that `ResourceGroup` documents.

use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::root_signature::{
    DescriptorPool, DescriptorRange, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorType,
    RangeType, ResourceBinding, ResourceGroup, RootParameter, RootResourceKind, RootSignature, RootSignatureDescriptor,
};
use crate::{RhiError, RhiResult, Sampler, ShaderStages};
use ash::vk;
use std::sync::Arc;

pub fn root_resource_kind_to_vk_descriptor_type(kind: RootResourceKind, range_type: RangeType) -> RhiResult<DescriptorType> {
    match (kind, range_type) {
        (RootResourceKind::UniformBuffer, RangeType::Ubv) | (RootResourceKind::UniformBuffer, RangeType::Uav) => Ok(DescriptorType::UniformBuffer),
        (RootResourceKind::VertexBuffer, RangeType::Srv)
        | (RootResourceKind::VertexBuffer, RangeType::Uav)
        | (RootResourceKind::IndexBuffer, RangeType::Srv)
        | (RootResourceKind::IndexBuffer, RangeType::Uav)
        | (RootResourceKind::StructuredBuffer, RangeType::Srv)
        | (RootResourceKind::StructuredBuffer, RangeType::Uav)
        | (RootResourceKind::IndirectBuffer, RangeType::Srv)
        | (RootResourceKind::IndirectBuffer, RangeType::Uav) => Ok(DescriptorType::StorageBuffer),
        (RootResourceKind::TextureBuffer, RangeType::Srv) => Ok(DescriptorType::UniformTexelBuffer),
        (RootResourceKind::TextureBuffer, RangeType::Uav) => Ok(DescriptorType::StorageTexelBuffer),
        (RootResourceKind::Texture, RangeType::Srv) => Ok(DescriptorType::CombinedImageSampler),
        (RootResourceKind::Texture, RangeType::Uav) => Ok(DescriptorType::StorageImage),
        _ => Err(RhiError::DeviceBootstrap(format!("{kind:?}/{range_type:?} is not a valid descriptor range combination"))),
    }
}

pub fn descriptor_type_to_vk(t: DescriptorType) -> vk::DescriptorType {
    match t {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

pub fn shader_stages_to_vk(s: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if s.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if s.contains(ShaderStages::TESS_CTRL) {
        flags |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if s.contains(ShaderStages::TESS_EVAL) {
        flags |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if s.contains(ShaderStages::GEOMETRY) {
        flags |= vk::ShaderStageFlags::GEOMETRY;
    }
    if s.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if s.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    if s.contains(ShaderStages::TASK) {
        flags |= vk::ShaderStageFlags::TASK_EXT;
    }
    if s.contains(ShaderStages::MESH) {
        flags |= vk::ShaderStageFlags::MESH_EXT;
    }
    flags
}

pub struct VulkanDescriptorSetLayout {
    pub device: Arc<ash::Device>,
    pub layout: vk::DescriptorSetLayout,
    pub bindings_vec: Vec<DescriptorSetLayoutBinding>,
    id: ResourceId,
}

impl Drop for VulkanDescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_set_layout(self.layout, None) };
    }
}

impl std::fmt::Debug for VulkanDescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorSetLayout").finish()
    }
}

impl DescriptorSetLayout for VulkanDescriptorSetLayout {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding] {
        &self.bindings_vec
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub fn create_descriptor_set_layout(device: Arc<ash::Device>, bindings: &[DescriptorSetLayoutBinding]) -> RhiResult<VulkanDescriptorSetLayout> {
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(descriptor_type_to_vk(b.descriptor_type))
                .descriptor_count(b.count)
                .stage_flags(shader_stages_to_vk(b.stages))
        })
        .collect();
    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
    let layout = unsafe { device.create_descriptor_set_layout(&create_info, None).map_err(RhiError::from)? };
    Ok(VulkanDescriptorSetLayout { device, layout, bindings_vec: bindings.to_vec(), id: next_resource_id() })
}

const DESCRIPTOR_TYPES: [DescriptorType; 6] = [
    DescriptorType::UniformBuffer,
    DescriptorType::StorageBuffer,
    DescriptorType::UniformTexelBuffer,
    DescriptorType::StorageTexelBuffer,
    DescriptorType::CombinedImageSampler,
    DescriptorType::StorageImage,
];

pub struct VulkanDescriptorPool {
    pub device: Arc<ash::Device>,
    pub pool: vk::DescriptorPool,
}

pub fn create_descriptor_pool(device: Arc<ash::Device>, max_sets: u32) -> RhiResult<VulkanDescriptorPool> {
    let per_type = max_sets.max(1) * 4;
    let pool_sizes: Vec<vk::DescriptorPoolSize> =
        DESCRIPTOR_TYPES.iter().map(|&ty| vk::DescriptorPoolSize::default().ty(descriptor_type_to_vk(ty)).descriptor_count(per_type)).collect();
    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes)
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
    let pool = unsafe { device.create_descriptor_pool(&create_info, None).map_err(RhiError::from)? };
    Ok(VulkanDescriptorPool { device, pool })
}

impl Drop for VulkanDescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}

impl std::fmt::Debug for VulkanDescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorPool").finish()
    }
}

impl DescriptorPool for VulkanDescriptorPool {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> RhiResult<Box<dyn DescriptorSet>> {
        let vk_layout = layout
            .as_any()
            .downcast_ref::<VulkanDescriptorSetLayout>()
            .ok_or_else(|| RhiError::DeviceBootstrap("descriptor set layout must be VulkanDescriptorSetLayout".into()))?;
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.pool).set_layouts(std::slice::from_ref(&vk_layout.layout));
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info).map_err(RhiError::from)? };
        Ok(Box::new(VulkanDescriptorSet { device: Arc::clone(&self.device), set: sets[0], bindings: vk_layout.bindings_vec.clone() }))
    }
}

pub struct VulkanDescriptorSet {
    pub device: Arc<ash::Device>,
    pub set: vk::DescriptorSet,
    bindings: Vec<DescriptorSetLayoutBinding>,
}

impl std::fmt::Debug for VulkanDescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorSet").finish()
    }
}

impl VulkanDescriptorSet {
    fn descriptor_type_for_binding(&self, binding: u32) -> RhiResult<DescriptorType> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| b.descriptor_type)
            .ok_or_else(|| RhiError::DeviceBootstrap(format!("binding {binding} not present in descriptor set layout")))
    }
}

impl DescriptorSet for VulkanDescriptorSet {
    fn write(&mut self, binding: u32, array_element: u32, value: &ResourceBinding) -> RhiResult<()> {
        let descriptor_type = self.descriptor_type_for_binding(binding)?;
        let vk_ty = descriptor_type_to_vk(descriptor_type);
        match value {
            ResourceBinding::Buffer { buffer, offset, size } => {
                let vk_buf = buffer
                    .as_any()
                    .downcast_ref::<super::buffer::VulkanBuffer>()
                    .ok_or_else(|| RhiError::DeviceBootstrap("buffer must be VulkanBuffer".into()))?;
                let range = if *size > 0 { *size } else { buffer.size() - offset };
                let buffer_info = vk::DescriptorBufferInfo::default().buffer(vk_buf.buffer).offset(*offset).range(range);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(binding)
                    .dst_array_element(array_element)
                    .descriptor_type(vk_ty)
                    .buffer_info(std::slice::from_ref(&buffer_info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            ResourceBinding::Texture { texture, sampler } => {
                let image_view = super::texture_to_image_view(texture.as_ref())?;
                let mut image_info = vk::DescriptorImageInfo::default().image_view(image_view).image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                if let Some(sampler) = sampler {
                    let vk_sampler = sampler
                        .as_any()
                        .downcast_ref::<super::sampler::VulkanSampler>()
                        .ok_or_else(|| RhiError::DeviceBootstrap("sampler must be VulkanSampler".into()))?;
                    image_info = image_info.sampler(vk_sampler.raw());
                }
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(binding)
                    .dst_array_element(array_element)
                    .descriptor_type(vk_ty)
                    .image_info(std::slice::from_ref(&image_info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            ResourceBinding::Sampler(sampler) => {
                let vk_sampler = sampler
                    .as_any()
                    .downcast_ref::<super::sampler::VulkanSampler>()
                    .ok_or_else(|| RhiError::DeviceBootstrap("sampler must be VulkanSampler".into()))?;
                let image_info = vk::DescriptorImageInfo::default().sampler(vk_sampler.raw());
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(binding)
                    .dst_array_element(array_element)
                    .descriptor_type(vk_ty)
                    .image_info(std::slice::from_ref(&image_info));
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct VulkanRootSignature {
    pub device: Arc<ash::Device>,
    pub pipeline_layout: vk::PipelineLayout,
    pub layouts: Vec<Arc<dyn DescriptorSetLayout>>,
    pub pool: Arc<VulkanDescriptorPool>,
    static_samplers: Vec<super::sampler::VulkanSampler>,
    max_sets: u32,
    id: ResourceId,
}

impl VulkanRootSignature {
    pub fn new(device: Arc<ash::Device>, desc: &RootSignatureDescriptor) -> RhiResult<Self> {
        let mut set_layouts = Vec::new();
        let mut static_samplers: Vec<super::sampler::VulkanSampler> = Vec::new();

        for param in &desc.parameters {
            match param {
                RootParameter::DescriptorTable(ranges) => {
                    let bindings: Vec<DescriptorSetLayoutBinding> = ranges
                        .iter()
                        .map(|r| {
                            Ok(DescriptorSetLayoutBinding {
                                binding: r.binding,
                                descriptor_type: root_resource_kind_to_vk_descriptor_type(r.resource_kind, r.range_type)?,
                                count: r.count,
                                stages: r.stages,
                            })
                        })
                        .collect::<RhiResult<Vec<_>>>()?;
                    let layout = create_descriptor_set_layout(Arc::clone(&device), &bindings)?;
                    set_layouts.push(Arc::new(layout) as Arc<dyn DescriptorSetLayout>);
                }
                RootParameter::StaticSampler(sampler_desc) => {
                    let sampler = super::sampler::create_sampler(Arc::clone(&device), &sampler_desc.sampler)?;
                    static_samplers.push(sampler);
                }
            }
        }

        let vk_layouts: Vec<vk::DescriptorSetLayout> = set_layouts
            .iter()
            .map(|l| l.as_any().downcast_ref::<VulkanDescriptorSetLayout>().expect("layout is VulkanDescriptorSetLayout").layout)
            .collect();
        let layout_create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&vk_layouts);
        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_create_info, None).map_err(RhiError::from)? };
        let pool = create_descriptor_pool(Arc::clone(&device), desc.max_sets)?;

        Ok(Self {
            device,
            pipeline_layout,
            layouts: set_layouts,
            pool: Arc::new(pool),
            static_samplers,
            max_sets: desc.max_sets,
            id: next_resource_id(),
        })
    }
}

impl Drop for VulkanRootSignature {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline_layout(self.pipeline_layout, None) };
    }
}

impl std::fmt::Debug for VulkanRootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRootSignature").field("parameters", &self.layouts.len()).finish()
    }
}

impl Resource for VulkanRootSignature {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl RootSignature for VulkanRootSignature {
    fn layouts(&self) -> &[Arc<dyn DescriptorSetLayout>] {
        &self.layouts
    }

    fn max_sets(&self) -> u32 {
        self.max_sets
    }

    fn create_resource_group(self: Arc<Self>, root_parameter_index: u32, bindings: &[(u32, ResourceBinding)]) -> RhiResult<ResourceGroup> {
        let layout = self
            .layouts
            .get(root_parameter_index as usize)
            .ok_or(RhiError::ResourceGroupIndexOutOfRange { index: root_parameter_index, len: self.layouts.len() as u32 })?;
        let mut set = self.pool.allocate_set(layout.as_ref())?;
        let mut bound: Vec<Arc<dyn std::any::Any + Send + Sync>> = Vec::new();
        for (binding, value) in bindings {
            set.write(*binding, 0, value)?;
            match value {
                ResourceBinding::Buffer { buffer, .. } => bound.push(Arc::clone(buffer) as Arc<dyn std::any::Any + Send + Sync>),
                ResourceBinding::Texture { texture, sampler } => {
                    bound.push(Arc::clone(texture) as Arc<dyn std::any::Any + Send + Sync>);
                    if let Some(sampler) = sampler {
                        bound.push(Arc::clone(sampler) as Arc<dyn std::any::Any + Send + Sync>);
                    }
                }
                ResourceBinding::Sampler(sampler) => bound.push(Arc::clone(sampler) as Arc<dyn std::any::Any + Send + Sync>),
            }
        }
        Ok(ResourceGroup::new(self, root_parameter_index, Some(set), bound))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_buffer_range_maps_to_uniform_buffer_descriptor() {
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::UniformBuffer, RangeType::Ubv).unwrap(), DescriptorType::UniformBuffer);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::UniformBuffer, RangeType::Uav).unwrap(), DescriptorType::UniformBuffer);
    }

    #[test]
    fn structured_buffer_range_maps_by_access_mode() {
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::StructuredBuffer, RangeType::Srv).unwrap(), DescriptorType::StorageBuffer);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::StructuredBuffer, RangeType::Uav).unwrap(), DescriptorType::StorageBuffer);
    }

    #[test]
    fn vertex_index_and_indirect_buffer_ranges_map_to_storage_buffer() {
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::VertexBuffer, RangeType::Srv).unwrap(), DescriptorType::StorageBuffer);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::VertexBuffer, RangeType::Uav).unwrap(), DescriptorType::StorageBuffer);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::IndexBuffer, RangeType::Srv).unwrap(), DescriptorType::StorageBuffer);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::IndexBuffer, RangeType::Uav).unwrap(), DescriptorType::StorageBuffer);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::IndirectBuffer, RangeType::Srv).unwrap(), DescriptorType::StorageBuffer);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::IndirectBuffer, RangeType::Uav).unwrap(), DescriptorType::StorageBuffer);
    }

    #[test]
    fn texture_range_distinguishes_srv_from_uav() {
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::Texture, RangeType::Srv).unwrap(), DescriptorType::CombinedImageSampler);
        assert_eq!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::Texture, RangeType::Uav).unwrap(), DescriptorType::StorageImage);
    }

    #[test]
    fn invalid_kind_range_combination_is_rejected() {
        assert!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::VertexBuffer, RangeType::Ubv).is_err());
        assert!(root_resource_kind_to_vk_descriptor_type(RootResourceKind::Texture, RangeType::Ubv).is_err());
    }

    #[test]
    fn shader_stages_combine_into_vk_flags() {
        let flags = shader_stages_to_vk(ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert!(flags.contains(vk::ShaderStageFlags::VERTEX));
        assert!(flags.contains(vk::ShaderStageFlags::FRAGMENT));
        assert!(!flags.contains(vk::ShaderStageFlags::COMPUTE));
    }

    #[test]
    fn empty_shader_stages_yield_empty_flags() {
        assert_eq!(shader_stages_to_vk(ShaderStages::empty()), vk::ShaderStageFlags::empty());
    }
}
