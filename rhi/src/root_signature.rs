//! Root signature / resource group / descriptor pool construction. See
//! SPEC_FULL.md §4.3 for the range-type -> descriptor-type mapping and
//! the pool-sizing rule this module's Vulkan realization implements.

use crate::resource::{Resource, ResourceId};
use crate::sampler::SamplerDescriptor;
use crate::{Buffer, RhiResult, Sampler, ShaderStages, Texture};
use std::fmt::Debug;
use std::sync::Arc;

/// Default ceiling on descriptor sets allocatable from one root
/// signature's pool, per SPEC_FULL.md §4.3.
pub const DEFAULT_MAX_SETS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    UniformTexelBuffer,
    StorageTexelBuffer,
    CombinedImageSampler,
    StorageImage,
}

/// What kind of resource a descriptor range binds, independent of how
/// it's accessed (SRV/UAV/UBV/sampler) - the two together select the
/// concrete `DescriptorType` via the mapping table in `vulkan::root_signature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootResourceKind {
    VertexBuffer,
    IndexBuffer,
    UniformBuffer,
    StructuredBuffer,
    TextureBuffer,
    IndirectBuffer,
    Texture,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeType {
    Srv,
    Uav,
    Ubv,
    Sampler,
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorRange {
    pub resource_kind: RootResourceKind,
    pub range_type: RangeType,
    pub binding: u32,
    pub count: u32,
    pub stages: ShaderStages,
}

#[derive(Debug, Clone)]
pub struct StaticSamplerDescriptor {
    pub binding: u32,
    pub stages: ShaderStages,
    pub sampler: SamplerDescriptor,
}

#[derive(Debug, Clone)]
pub enum RootParameter {
    DescriptorTable(Vec<DescriptorRange>),
    StaticSampler(StaticSamplerDescriptor),
}

#[derive(Debug, Clone)]
pub struct RootSignatureDescriptor {
    pub label: Option<&'static str>,
    pub parameters: Vec<RootParameter>,
    pub max_sets: u32,
}

impl Default for RootSignatureDescriptor {
    fn default() -> Self {
        Self { label: None, parameters: Vec::new(), max_sets: DEFAULT_MAX_SETS }
    }
}

pub trait DescriptorSetLayout: Debug + Send + Sync {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding];
    fn as_any(&self) -> &dyn std::any::Any;
}

#[derive(Debug, Clone)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
}

pub trait DescriptorPool: Debug + Send + Sync {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> RhiResult<Box<dyn DescriptorSet>>;
}

/// One binding written into a `ResourceGroup`'s descriptor set. Holds
/// strong references so the bound resource cannot be destroyed while any
/// resource group (and transitively, any unsubmitted command buffer
/// referencing that group) still points at it.
pub enum ResourceBinding {
    Buffer { buffer: Arc<dyn Buffer>, offset: u64, size: u64 },
    Texture { texture: Arc<dyn Texture>, sampler: Option<Arc<dyn Sampler>> },
    Sampler(Arc<dyn Sampler>),
}

pub trait DescriptorSet: Debug + Send + Sync {
    fn write(&mut self, binding: u32, array_element: u32, value: &ResourceBinding) -> RhiResult<()>;
    fn as_any(&self) -> &dyn std::any::Any;
}

pub trait RootSignature: Resource + Debug + Send + Sync {
    fn layouts(&self) -> &[Arc<dyn DescriptorSetLayout>];
    fn max_sets(&self) -> u32;
    fn create_resource_group(
        self: Arc<Self>,
        root_parameter_index: u32,
        bindings: &[(u32, ResourceBinding)],
    ) -> RhiResult<ResourceGroup>;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// One allocated descriptor set plus strong refs to everything bound into
/// it. Invariant (checked at construction in every backend):
/// `descriptor_set_layout_id == root_signature.layouts()[root_parameter_index].id`.
pub struct ResourceGroup {
    id: ResourceId,
    pub root_signature: Arc<dyn RootSignature>,
    pub root_parameter_index: u32,
    pub descriptor_set: Option<Box<dyn DescriptorSet>>,
    bound: Vec<Arc<dyn std::any::Any + Send + Sync>>,
}

impl ResourceGroup {
    pub fn new(
        root_signature: Arc<dyn RootSignature>,
        root_parameter_index: u32,
        descriptor_set: Option<Box<dyn DescriptorSet>>,
        bound: Vec<Arc<dyn std::any::Any + Send + Sync>>,
    ) -> Self {
        Self {
            id: crate::resource::next_resource_id(),
            root_signature,
            root_parameter_index,
            descriptor_set,
            bound,
        }
    }
}

impl Resource for ResourceGroup {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Debug for ResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGroup")
            .field("root_parameter_index", &self.root_parameter_index)
            .field("bound_resources", &self.bound.len())
            .finish()
    }
}
