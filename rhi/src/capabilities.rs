//! Capabilities published once, post-init, immutable thereafter. See
//! SPEC_FULL.md §6.

use crate::TextureFormat;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityFlags: u32 {
        const INSTANCED_ARRAYS      = 1 << 0;
        const DRAW_INSTANCED        = 1 << 1;
        const BASE_VERTEX           = 1 << 2;
        const MESH_SHADER           = 1 << 3;
        const COMPUTE_SHADER        = 1 << 4;
        const VERTEX_SHADER         = 1 << 5;
        const FRAGMENT_SHADER       = 1 << 6;
        const NATIVE_MULTITHREADING = 1 << 7;
        const SHADER_BYTECODE       = 1 << 8;
        const ZERO_TO_ONE_CLIP_Z    = 1 << 9;
        const UPPER_LEFT_ORIGIN     = 1 << 10;
    }
}

#[derive(Debug, Clone)]
pub struct Capabilities {
    pub device_name: String,
    pub preferred_swap_chain_color_format: TextureFormat,
    pub preferred_swap_chain_depth_format: TextureFormat,
    pub max_viewports: u32,
    /// `<= 8` per the render pass attachment invariant.
    pub max_simultaneous_render_targets: u32,
    pub max_texture_dimension: u32,
    pub max_texture_array_layers: u32,
    pub max_texture_buffer_size: u64,
    pub max_uniform_buffer_size: u64,
    pub max_indirect_buffer_size: u64,
    pub max_sample_count: crate::SampleCount,
    pub max_anisotropy: f32,
    pub flags: CapabilityFlags,
}
