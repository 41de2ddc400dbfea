//! Rendering hardware interface core: a command-buffer dispatcher and
//! resource state machine sitting on top of Vulkan. See `SPEC_FULL.md`
//! at the workspace root for the full component contract.

pub mod capabilities;
pub mod command_buffer;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod mapping;
pub mod render_pass;
pub mod resource;
pub mod root_signature;
pub mod sampler;
#[cfg(feature = "window")]
pub mod swapchain;
pub mod vertex_array;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use capabilities::{Capabilities, CapabilityFlags};
pub use command_buffer::{CommandBuffer, CommandDispatchFunctionIndex, CommandPacket, CommandPayload};
pub use device::{Device, DeviceCreateParams, RenderTargetState};
pub use error::{RhiError, RhiResult};
pub use log::{DefaultLogSink, LogSink, Severity};
pub use render_pass::{Framebuffer, RenderPassDescriptor as RenderPassLayoutDescriptor, RenderPassObj, RenderTarget};
pub use resource::{Resource, ResourceId};
pub use root_signature::{
    DescriptorPool, DescriptorRange, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBinding,
    DescriptorType, ResourceGroup, RootParameter, RootSignature, RootSignatureDescriptor, StaticSamplerDescriptor,
};
pub use sampler::{AddressMode, FilterMode, Sampler, SamplerDescriptor};
#[cfg(feature = "window")]
pub use swapchain::{Swapchain, SwapchainFrame};
pub use vertex_array::{VertexArray, VertexArrayDescriptor};

#[cfg(feature = "vulkan")]
pub use vulkan::VulkanDevice;

use std::fmt::Debug;
use std::sync::Arc;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderStages: u32 {
        const VERTEX   = 1 << 0;
        const TESS_CTRL = 1 << 1;
        const TESS_EVAL = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE  = 1 << 5;
        const TASK     = 1 << 6;
        const MESH     = 1 << 7;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TextureUsage: u32 {
        const COPY_SRC         = 1 << 0;
        const COPY_DST         = 1 << 1;
        const TEXTURE_BINDING  = 1 << 2;
        const STORAGE_BINDING  = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
        const GENERATE_MIPMAPS = 1 << 5;
        const DATA_CONTAINS_MIPMAPS = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Structured { stride: u64 },
    TextureBuffer,
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMemoryPreference {
    /// host-visible + host-coherent; used for upload/staging and for any
    /// buffer the caller will `write_buffer` into after creation.
    HostVisible,
    /// device-local; used for resident GPU-only data populated via a
    /// staging-buffer upload.
    DeviceLocal,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<&'static str>,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: BufferMemoryPreference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R8Unorm,
    R16Float,
    R32Float,
    Rgba16Float,
    Rgba32Float,
    D32Float,
    D32FloatS8Uint,
    D24UnormS8Uint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D1,
    D1Array,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleCount {
    X1,
    X2,
    X4,
    X8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    Preinitialized,
    General,
    ColorAttachmentOptimal,
    DepthStencilAttachmentOptimal,
    DepthStencilReadOnlyOptimal,
    ShaderReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    PresentSrc,
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<&'static str>,
    pub size: (u32, u32, u32),
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub dimension: TextureDimension,
    pub mip_level_count: u32,
    pub sample_count: SampleCount,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: (1, 1, 1),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING,
            dimension: TextureDimension::D2,
            mip_level_count: 1,
            sample_count: SampleCount::X1,
        }
    }
}

/// Initial CPU-side data for a texture upload, one slice per mip level.
/// Passed to `Device::create_texture_with_data`; absent for render
/// targets and other GPU-only textures.
pub struct TextureInitialData<'a> {
    pub mips: &'a [&'a [u8]],
}

pub trait Buffer: Resource + Debug {
    fn size(&self) -> u64;
    fn usage(&self) -> BufferUsage;
    fn host_visible(&self) -> bool;
    fn as_any(&self) -> &dyn std::any::Any;
}

pub trait Texture: Resource + Debug {
    fn format(&self) -> TextureFormat;
    fn size(&self) -> (u32, u32, u32);
    fn dimension(&self) -> TextureDimension;
    fn mip_level_count(&self) -> u32;
    fn sample_count(&self) -> SampleCount;
    /// Current declared layout. Real tracked state, updated by every
    /// successful layout-transition call recorded against this texture.
    fn current_layout(&self) -> ImageLayout;
    fn as_any(&self) -> &dyn std::any::Any;
}

pub trait Fence: Debug {
    fn wait(&self, timeout_ns: u64) -> RhiResult<()>;
    fn reset(&self) -> RhiResult<()>;
    fn as_any(&self) -> &dyn std::any::Any;
}

pub trait Semaphore: Debug {
    fn as_any(&self) -> &dyn std::any::Any;
}

pub trait Queue: Debug {
    fn submit(
        &self,
        command_buffers: &[&dyn std::any::Any],
        wait_semaphores: &[&dyn Semaphore],
        signal_semaphores: &[&dyn Semaphore],
        signal_fence: Option<&dyn Fence>,
    ) -> RhiResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    PatchList(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Uint32x2,
    Sint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Debug, Clone, Default)]
pub struct VertexInputDescriptor {
    pub attributes: Vec<VertexAttribute>,
    pub bindings: Vec<VertexBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
    pub depth_bias: DepthBias,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            polygon_mode: PolygonMode::Fill,
            depth_bias: DepthBias { constant: 0.0, clamp: 0.0, slope: 0.0 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcColor,
    OneMinusSrcColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub op: BlendOp,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

#[derive(Debug, Clone, Copy)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare: CompareOp,
}

#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub source: Vec<u8>, // opaque bytecode, SPIR-V by convention but never inspected
    pub entry_point: String,
}

/// At most 5 modules: {vertex,tess_ctrl,tess_eval,geom,frag} or
/// {task,mesh,frag}. Mixing the two families is a construction error.
#[derive(Debug, Clone)]
pub enum GraphicsProgram {
    Primitive {
        vertex: ShaderStage,
        tess_ctrl: Option<ShaderStage>,
        tess_eval: Option<ShaderStage>,
        geometry: Option<ShaderStage>,
        fragment: Option<ShaderStage>,
    },
    Mesh {
        task: Option<ShaderStage>,
        mesh: ShaderStage,
        fragment: Option<ShaderStage>,
    },
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<&'static str>,
    pub root_signature: Arc<dyn RootSignature>,
    pub program: GraphicsProgram,
    pub render_pass: Arc<dyn crate::render_pass::RenderPassObj>,
    pub vertex_input: VertexInputDescriptor,
    pub primitive_topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
    pub sample_count: SampleCount,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<&'static str>,
    pub root_signature: Arc<dyn RootSignature>,
    pub shader: ShaderStage,
}

pub trait GraphicsPipeline: Resource + Debug {
    /// Compact 16-bit id from the per-kind monotonic allocator.
    fn compact_id(&self) -> u16;
    fn as_any(&self) -> &dyn std::any::Any;
}

pub trait ComputePipeline: Resource + Debug {
    fn compact_id(&self) -> u16;
    fn as_any(&self) -> &dyn std::any::Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Native window handle passed to `PresentationSurfaceFactory::create_surface`.
/// Opaque beyond what `raw-window-handle` already abstracts.
#[cfg(feature = "window")]
pub struct NativeWindowHandle<'a> {
    pub handle: &'a dyn raw_window_handle::HasWindowHandle,
    pub display: &'a dyn raw_window_handle::HasDisplayHandle,
}

pub trait PresentationSurfaceFactory: Send + Sync {
    #[cfg(feature = "window")]
    fn create_surface(&self, native: NativeWindowHandle<'_>) -> RhiResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStageKind {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
    Task,
    Mesh,
}

/// Boundary for GLSL/WGSL -> SPIR-V compilation. The core crate never
/// inspects shader source or bytecode; a concrete `ShaderCompiler` is an
/// application/demo-level concern (see `demos/`, which uses `naga`).
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, stage: ShaderStageKind, source: &str) -> RhiResult<Vec<u8>>;
}

pub fn create_device(params: DeviceCreateParams) -> RhiResult<Arc<dyn Device>> {
    #[cfg(feature = "vulkan")]
    {
        Ok(Arc::new(vulkan::VulkanDevice::new(params)?))
    }
    #[cfg(not(feature = "vulkan"))]
    {
        let _ = params;
        Err(RhiError::DeviceBootstrap("no backend feature enabled".into()))
    }
}
