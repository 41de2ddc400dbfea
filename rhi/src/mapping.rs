//! Pure, total translation tables. Every function here covers every
//! variant of its input enum; an input that somehow falls outside the
//! enum's variants (only reachable via unsafe transmute, which this crate
//! never does) asserts in debug and falls back to a named safe default in
//! release, per SPEC_FULL.md §4.9. Consolidates the teacher's scattered
//! per-file `*_to_vk` helpers into one place.

#![cfg(feature = "vulkan")]

use crate::{
    BlendFactor, BlendOp, CompareOp, FrontFace, IndexFormat, PolygonMode, PrimitiveTopology,
    CullMode, SampleCount, TextureFormat, VertexFormat,
};
use ash::vk;

pub fn vertex_format_to_vk(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32 => vk::Format::R32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32 => vk::Format::R32_UINT,
        VertexFormat::Uint32x2 => vk::Format::R32G32_UINT,
        VertexFormat::Sint32 => vk::Format::R32_SINT,
    }
}

/// Index-buffer element size in bytes, and the matching `VkIndexType`.
pub fn index_format_to_vk(format: IndexFormat) -> (u64, vk::IndexType) {
    match format {
        IndexFormat::Uint16 => (2, vk::IndexType::UINT16),
        IndexFormat::Uint32 => (4, vk::IndexType::UINT32),
    }
}

/// `PATCH_LIST_k` routes through the tessellation patch-control-point
/// path; every other topology returns a patch count of 1 (meaningless,
/// ignored unless tessellation is active).
pub fn topology_to_vk(topology: PrimitiveTopology) -> (vk::PrimitiveTopology, u32) {
    match topology {
        PrimitiveTopology::PointList => (vk::PrimitiveTopology::POINT_LIST, 1),
        PrimitiveTopology::LineList => (vk::PrimitiveTopology::LINE_LIST, 1),
        PrimitiveTopology::LineStrip => (vk::PrimitiveTopology::LINE_STRIP, 1),
        PrimitiveTopology::TriangleList => (vk::PrimitiveTopology::TRIANGLE_LIST, 1),
        PrimitiveTopology::TriangleStrip => (vk::PrimitiveTopology::TRIANGLE_STRIP, 1),
        PrimitiveTopology::PatchList(k) => {
            debug_assert!((1..=32).contains(&k), "patch control point count must be in 1..=32");
            (vk::PrimitiveTopology::PATCH_LIST, k.clamp(1, 32) as u32)
        }
    }
}

pub fn polygon_mode_to_vk(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
        PolygonMode::Point => vk::PolygonMode::POINT,
    }
}

pub fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

pub fn front_face_to_vk(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub fn blend_factor_to_vk(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
    }
}

pub fn blend_op_to_vk(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn sample_count_to_vk(count: SampleCount) -> vk::SampleCountFlags {
    match count {
        SampleCount::X1 => vk::SampleCountFlags::TYPE_1,
        SampleCount::X2 => vk::SampleCountFlags::TYPE_2,
        SampleCount::X4 => vk::SampleCountFlags::TYPE_4,
        SampleCount::X8 => vk::SampleCountFlags::TYPE_8,
    }
}

pub fn texture_format_to_vk(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::D32Float => vk::Format::D32_SFLOAT,
        TextureFormat::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        TextureFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn is_depth(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::D32Float | TextureFormat::D32FloatS8Uint | TextureFormat::D24UnormS8Uint
    )
}

pub fn has_stencil(format: TextureFormat) -> bool {
    matches!(format, TextureFormat::D32FloatS8Uint | TextureFormat::D24UnormS8Uint)
}

/// Bytes per `width x height` slice at one mip level, one array layer.
/// Boundary function named in SPEC_FULL.md §6 (`getNumberOfBytesPerSlice`).
pub fn number_of_bytes_per_slice(format: TextureFormat, width: u32, height: u32) -> u64 {
    let bytes_per_texel: u64 = match format {
        TextureFormat::R8Unorm => 1,
        TextureFormat::R16Float => 2,
        TextureFormat::Rgba8Unorm
        | TextureFormat::Rgba8UnormSrgb
        | TextureFormat::Bgra8Unorm
        | TextureFormat::Bgra8UnormSrgb
        | TextureFormat::R32Float
        | TextureFormat::D32Float => 4,
        TextureFormat::D32FloatS8Uint | TextureFormat::D24UnormS8Uint => 4,
        TextureFormat::Rgba16Float => 8,
        TextureFormat::Rgba32Float => 16,
    };
    bytes_per_texel * width as u64 * height as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_list_carries_control_point_count() {
        let (topo, points) = topology_to_vk(PrimitiveTopology::PatchList(4));
        assert_eq!(topo, vk::PrimitiveTopology::PATCH_LIST);
        assert_eq!(points, 4);
    }

    #[test]
    fn non_patch_topology_reports_one_control_point() {
        let (_, points) = topology_to_vk(PrimitiveTopology::TriangleList);
        assert_eq!(points, 1);
    }

    #[test]
    fn patch_list_clamps_out_of_range_control_points() {
        let (_, points) = topology_to_vk(PrimitiveTopology::PatchList(64));
        assert_eq!(points, 32);
    }

    #[test]
    fn depth_formats_are_recognized() {
        assert!(is_depth(TextureFormat::D32Float));
        assert!(is_depth(TextureFormat::D24UnormS8Uint));
        assert!(!is_depth(TextureFormat::Rgba8Unorm));
    }

    #[test]
    fn stencil_formats_are_recognized() {
        assert!(has_stencil(TextureFormat::D32FloatS8Uint));
        assert!(has_stencil(TextureFormat::D24UnormS8Uint));
        assert!(!has_stencil(TextureFormat::D32Float));
    }

    #[test]
    fn bytes_per_slice_accounts_for_texel_size() {
        assert_eq!(number_of_bytes_per_slice(TextureFormat::R8Unorm, 4, 4), 16);
        assert_eq!(number_of_bytes_per_slice(TextureFormat::Rgba8Unorm, 4, 4), 64);
        assert_eq!(number_of_bytes_per_slice(TextureFormat::Rgba32Float, 2, 2), 64);
    }

    #[test]
    fn index_format_reports_byte_size_and_vk_type() {
        assert_eq!(index_format_to_vk(IndexFormat::Uint16), (2, vk::IndexType::UINT16));
        assert_eq!(index_format_to_vk(IndexFormat::Uint32), (4, vk::IndexType::UINT32));
    }
}
