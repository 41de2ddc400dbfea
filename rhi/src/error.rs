//! Structured error type for the RHI core. Creation-time failures return
//! `RhiResult`; contract violations inside an already-recorded command
//! stream are asserted in debug and logged in release (see `log.rs`).

use crate::ImageLayout;

#[derive(thiserror::Error, Debug)]
pub enum RhiError {
    #[error("vulkan call failed: {0:?}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("no suitable memory type (bits={type_bits:#x}, device_local={device_local})")]
    NoSuitableMemoryType { type_bits: u32, device_local: bool },

    #[error("resource group index {index} out of range for root signature with {len} parameters")]
    ResourceGroupIndexOutOfRange { index: u32, len: u32 },

    #[error("descriptor set layout mismatch: resource group was allocated against a different root parameter")]
    DescriptorSetLayoutMismatch,

    #[error("unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition { from: ImageLayout, to: ImageLayout },

    #[error("buffer size {size} is not a multiple of stride {stride}")]
    BufferSizeNotAlignedToStride { size: u64, stride: u64 },

    #[error("swap chain is not in a state that supports this operation: {0}")]
    InvalidSwapChainState(&'static str),

    #[error("surface does not support presentation on the selected queue family")]
    SurfaceNotSupported,

    #[error("device bootstrap failed: {0}")]
    DeviceBootstrap(String),

    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("blend attachment count {blend} does not match render pass color attachment count {render_pass}")]
    BlendAttachmentCountMismatch { blend: usize, render_pass: usize },

    #[error("color attachment count {0} exceeds the maximum of 7")]
    TooManyColorAttachments(usize),
}

pub type RhiResult<T> = Result<T, RhiError>;
