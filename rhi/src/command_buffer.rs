//! Packed command buffer: a linear sequence of packets recorded without
//! touching the driver. Recording is pure data assembly; the actual
//! `vkCmd*` calls happen later, at dispatch time, via `dispatcher.rs`.
//! This is the architectural departure from the teacher's
//! `VulkanCommandEncoder`, which issues live Vulkan calls as it records -
//! SPEC_FULL.md §3/§4.2/§4.8 require deferred recording so a command
//! buffer can be built once and replayed, and so the dispatcher can be a
//! single table-driven walk instead of being baked into the recording API.
//!
//! Each packet pairs a `dispatch_index` (the literal table index the
//! dispatcher uses, mirroring the original's `{next_offset, dispatch_index,
//! payload, aux_memory}` packet header) with a `CommandPayload` enum
//! variant carrying the header pointers/ids (as strong `Arc` references,
//! so a recorded-but-unsubmitted command buffer keeps every resource it
//! touches alive) and any embedded POD auxiliary data (viewport arrays,
//! emulated multi-draw arguments, clear values).

use crate::resource::{Resource, ResourceId};
use crate::root_signature::ResourceGroup;
use crate::{Buffer, ComputePipeline, GraphicsPipeline, RenderTarget, RootSignature, Texture, VertexArray};
use std::sync::Arc;

/// Sentinel `next_offset` value terminating packet traversal, per
/// SPEC_FULL.md §3 ("sentinel ~0").
pub const SENTINEL_NEXT_OFFSET: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandDispatchFunctionIndex {
    DispatchCommandBuffer = 0,
    SetGraphicsRootSignature,
    SetGraphicsPipelineState,
    SetGraphicsResourceGroup,
    SetGraphicsVertexArray,
    SetGraphicsViewports,
    SetGraphicsScissorRectangles,
    SetGraphicsRenderTarget,
    ClearGraphics,
    DrawGraphics,
    DrawGraphicsEmulated,
    DrawIndexedGraphics,
    DrawIndexedGraphicsEmulated,
    DrawIndexedIndirect,
    DrawMeshTasks,
    DrawMeshTasksEmulated,
    DrawMeshTasksIndirect,
    SetComputeRootSignature,
    SetComputePipelineState,
    SetComputeResourceGroup,
    DispatchCompute,
    ResolveMultisampleFramebuffer,
    CopyResource,
    GenerateMipmaps,
    ResetQueryPool,
    BeginQuery,
    EndQuery,
    WriteTimestampQuery,
    DebugMarkerBegin,
    DebugMarkerEnd,
}

pub const DISPATCH_TABLE_LEN: usize = CommandDispatchFunctionIndex::DebugMarkerEnd as usize + 1;

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawArguments {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawIndexedArguments {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// `Some(depth, stencil)` only overwrites the depth/stencil clear slot
/// when present; absent leaves the previous value untouched, per
/// SPEC_FULL.md §4.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth_stencil: Option<(f32, u8)>,
}

pub enum CopySource {
    Buffer { buffer: Arc<dyn Buffer>, offset: u64, size: u64 },
    Texture { texture: Arc<dyn Texture>, mip_level: u32 },
}

pub trait QueryPool: Resource + std::fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn std::any::Any;
}

pub enum CommandPayload {
    DispatchCommandBuffer(Arc<CommandBuffer>),
    SetGraphicsRootSignature(Arc<dyn RootSignature>),
    SetGraphicsPipelineState(Arc<dyn GraphicsPipeline>),
    SetGraphicsResourceGroup { root_parameter_index: u32, group: Arc<ResourceGroup> },
    SetGraphicsVertexArray(Option<Arc<VertexArray>>),
    SetGraphicsViewports(Vec<Viewport>),
    SetGraphicsScissorRectangles(Vec<ScissorRect>),
    SetGraphicsRenderTarget(Option<RenderTarget>),
    ClearGraphics(ClearValues),
    DrawGraphics(DrawArguments),
    DrawGraphicsEmulated(Vec<DrawArguments>),
    DrawIndexedGraphics(DrawIndexedArguments),
    DrawIndexedGraphicsEmulated(Vec<DrawIndexedArguments>),
    DrawIndexedIndirect { buffer: Arc<dyn Buffer>, offset: u64, draw_count: u32 },
    DrawMeshTasks { group_count_x: u32, group_count_y: u32, group_count_z: u32 },
    DrawMeshTasksEmulated(Vec<(u32, u32, u32)>),
    DrawMeshTasksIndirect { buffer: Arc<dyn Buffer>, offset: u64, draw_count: u32 },
    SetComputeRootSignature(Arc<dyn RootSignature>),
    SetComputePipelineState(Arc<dyn ComputePipeline>),
    SetComputeResourceGroup { root_parameter_index: u32, group: Arc<ResourceGroup> },
    DispatchCompute { x: u32, y: u32, z: u32 },
    ResolveMultisampleFramebuffer { src: RenderTarget, dst: RenderTarget },
    CopyResource { src: CopySource, dst: CopySource },
    GenerateMipmaps(Arc<dyn Texture>),
    ResetQueryPool { pool: Arc<dyn QueryPool>, first: u32, count: u32 },
    BeginQuery { pool: Arc<dyn QueryPool>, index: u32 },
    EndQuery { pool: Arc<dyn QueryPool>, index: u32 },
    WriteTimestampQuery { pool: Arc<dyn QueryPool>, index: u32 },
    DebugMarkerBegin(String),
    DebugMarkerEnd,
}

pub struct CommandPacket {
    pub next_offset: u32,
    pub dispatch_index: CommandDispatchFunctionIndex,
    pub payload: CommandPayload,
}

/// Linear buffer of packets, appended monotonically. Traversal follows
/// `next_offset` (here, simply "next array index") and terminates on
/// `SENTINEL_NEXT_OFFSET`.
#[derive(Default)]
pub struct CommandBuffer {
    packets: Vec<CommandPacket>,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer").field("packets", &self.packets.len()).finish()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self { packets: Vec::new() }
    }

    pub fn push(&mut self, dispatch_index: CommandDispatchFunctionIndex, payload: CommandPayload) {
        self.packets.push(CommandPacket { next_offset: SENTINEL_NEXT_OFFSET, dispatch_index, payload });
        let len = self.packets.len();
        if len >= 2 {
            self.packets[len - 2].next_offset = (len - 1) as u32;
        }
    }

    pub fn packets(&self) -> &[CommandPacket] {
        &self.packets
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Recording-side convenience wrapper; every method just appends a
/// packet. Mirrors the recording-state contract named in SPEC_FULL.md
/// §4.1 one-for-one, but performs no validation and touches no driver -
/// recording is assumed correct by the time it reaches the dispatcher
/// (SPEC_FULL.md §7).
pub struct CommandRecorder<'a> {
    buffer: &'a mut CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(buffer: &'a mut CommandBuffer) -> Self {
        Self { buffer }
    }

    pub fn set_graphics_root_signature(&mut self, root_signature: Arc<dyn RootSignature>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetGraphicsRootSignature,
            CommandPayload::SetGraphicsRootSignature(root_signature),
        );
    }

    pub fn set_graphics_pipeline_state(&mut self, pipeline: Arc<dyn GraphicsPipeline>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetGraphicsPipelineState,
            CommandPayload::SetGraphicsPipelineState(pipeline),
        );
    }

    pub fn set_graphics_resource_group(&mut self, root_parameter_index: u32, group: Arc<ResourceGroup>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetGraphicsResourceGroup,
            CommandPayload::SetGraphicsResourceGroup { root_parameter_index, group },
        );
    }

    pub fn set_graphics_vertex_array(&mut self, vertex_array: Option<Arc<VertexArray>>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetGraphicsVertexArray,
            CommandPayload::SetGraphicsVertexArray(vertex_array),
        );
    }

    /// Viewports are Y-inverted here at record time for the Y-up
    /// convention (`y' = y + height`, `height' = -height`), matching
    /// SPEC_FULL.md §4.1; the dispatcher submits them as-is.
    pub fn set_graphics_viewports(&mut self, mut viewports: Vec<Viewport>) {
        for vp in &mut viewports {
            vp.y += vp.height;
            vp.height = -vp.height;
        }
        self.buffer.push(CommandDispatchFunctionIndex::SetGraphicsViewports, CommandPayload::SetGraphicsViewports(viewports));
    }

    pub fn set_graphics_scissor_rectangles(&mut self, rects: Vec<ScissorRect>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetGraphicsScissorRectangles,
            CommandPayload::SetGraphicsScissorRectangles(rects),
        );
    }

    pub fn set_graphics_render_target(&mut self, target: Option<RenderTarget>) {
        self.buffer.push(CommandDispatchFunctionIndex::SetGraphicsRenderTarget, CommandPayload::SetGraphicsRenderTarget(target));
    }

    pub fn clear_graphics(&mut self, values: ClearValues) {
        self.buffer.push(CommandDispatchFunctionIndex::ClearGraphics, CommandPayload::ClearGraphics(values));
    }

    pub fn draw_graphics(&mut self, args: DrawArguments) {
        self.buffer.push(CommandDispatchFunctionIndex::DrawGraphics, CommandPayload::DrawGraphics(args));
    }

    pub fn draw_graphics_emulated(&mut self, draws: Vec<DrawArguments>) {
        self.buffer.push(CommandDispatchFunctionIndex::DrawGraphicsEmulated, CommandPayload::DrawGraphicsEmulated(draws));
    }

    pub fn draw_indexed_graphics(&mut self, args: DrawIndexedArguments) {
        self.buffer.push(CommandDispatchFunctionIndex::DrawIndexedGraphics, CommandPayload::DrawIndexedGraphics(args));
    }

    pub fn draw_indexed_graphics_emulated(&mut self, draws: Vec<DrawIndexedArguments>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::DrawIndexedGraphicsEmulated,
            CommandPayload::DrawIndexedGraphicsEmulated(draws),
        );
    }

    pub fn draw_indexed_indirect(&mut self, buffer: Arc<dyn Buffer>, offset: u64, draw_count: u32) {
        self.buffer.push(
            CommandDispatchFunctionIndex::DrawIndexedIndirect,
            CommandPayload::DrawIndexedIndirect { buffer, offset, draw_count },
        );
    }

    pub fn draw_mesh_tasks(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.buffer.push(
            CommandDispatchFunctionIndex::DrawMeshTasks,
            CommandPayload::DrawMeshTasks { group_count_x, group_count_y, group_count_z },
        );
    }

    pub fn draw_mesh_tasks_emulated(&mut self, tasks: Vec<(u32, u32, u32)>) {
        self.buffer.push(CommandDispatchFunctionIndex::DrawMeshTasksEmulated, CommandPayload::DrawMeshTasksEmulated(tasks));
    }

    pub fn draw_mesh_tasks_indirect(&mut self, buffer: Arc<dyn Buffer>, offset: u64, draw_count: u32) {
        self.buffer.push(
            CommandDispatchFunctionIndex::DrawMeshTasksIndirect,
            CommandPayload::DrawMeshTasksIndirect { buffer, offset, draw_count },
        );
    }

    pub fn set_compute_root_signature(&mut self, root_signature: Arc<dyn RootSignature>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetComputeRootSignature,
            CommandPayload::SetComputeRootSignature(root_signature),
        );
    }

    pub fn set_compute_pipeline_state(&mut self, pipeline: Arc<dyn ComputePipeline>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetComputePipelineState,
            CommandPayload::SetComputePipelineState(pipeline),
        );
    }

    pub fn set_compute_resource_group(&mut self, root_parameter_index: u32, group: Arc<ResourceGroup>) {
        self.buffer.push(
            CommandDispatchFunctionIndex::SetComputeResourceGroup,
            CommandPayload::SetComputeResourceGroup { root_parameter_index, group },
        );
    }

    /// See SPEC_FULL.md §9 Open Questions: the original's body is empty
    /// but the contract is unambiguous, so this records a direct dispatch.
    pub fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.buffer.push(CommandDispatchFunctionIndex::DispatchCompute, CommandPayload::DispatchCompute { x, y, z });
    }

    pub fn resolve_multisample_framebuffer(&mut self, src: RenderTarget, dst: RenderTarget) {
        self.buffer.push(
            CommandDispatchFunctionIndex::ResolveMultisampleFramebuffer,
            CommandPayload::ResolveMultisampleFramebuffer { src, dst },
        );
    }

    pub fn copy_resource(&mut self, src: CopySource, dst: CopySource) {
        self.buffer.push(CommandDispatchFunctionIndex::CopyResource, CommandPayload::CopyResource { src, dst });
    }

    pub fn generate_mipmaps(&mut self, texture: Arc<dyn Texture>) {
        self.buffer.push(CommandDispatchFunctionIndex::GenerateMipmaps, CommandPayload::GenerateMipmaps(texture));
    }

    pub fn reset_query_pool(&mut self, pool: Arc<dyn QueryPool>, first: u32, count: u32) {
        self.buffer.push(CommandDispatchFunctionIndex::ResetQueryPool, CommandPayload::ResetQueryPool { pool, first, count });
    }

    pub fn begin_query(&mut self, pool: Arc<dyn QueryPool>, index: u32) {
        self.buffer.push(CommandDispatchFunctionIndex::BeginQuery, CommandPayload::BeginQuery { pool, index });
    }

    pub fn end_query(&mut self, pool: Arc<dyn QueryPool>, index: u32) {
        self.buffer.push(CommandDispatchFunctionIndex::EndQuery, CommandPayload::EndQuery { pool, index });
    }

    pub fn write_timestamp_query(&mut self, pool: Arc<dyn QueryPool>, index: u32) {
        self.buffer.push(CommandDispatchFunctionIndex::WriteTimestampQuery, CommandPayload::WriteTimestampQuery { pool, index });
    }

    #[cfg(debug_assertions)]
    pub fn debug_marker_begin(&mut self, label: impl Into<String>) {
        self.buffer.push(CommandDispatchFunctionIndex::DebugMarkerBegin, CommandPayload::DebugMarkerBegin(label.into()));
    }

    #[cfg(debug_assertions)]
    pub fn debug_marker_end(&mut self) {
        self.buffer.push(CommandDispatchFunctionIndex::DebugMarkerEnd, CommandPayload::DebugMarkerEnd);
    }

    /// Records a nested command buffer dispatch - recursion is permitted
    /// by the dispatcher (SPEC_FULL.md §4.2).
    pub fn dispatch_command_buffer(&mut self, nested: Arc<CommandBuffer>) {
        self.buffer.push(CommandDispatchFunctionIndex::DispatchCommandBuffer, CommandPayload::DispatchCommandBuffer(nested));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_chain_via_next_offset_and_terminate_with_sentinel() {
        let mut buffer = CommandBuffer::new();
        {
            let mut rec = CommandRecorder::new(&mut buffer);
            rec.dispatch_compute(1, 1, 1);
            rec.dispatch_compute(2, 2, 2);
            rec.dispatch_compute(3, 3, 3);
        }
        let packets = buffer.packets();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].next_offset, 1);
        assert_eq!(packets[1].next_offset, 2);
        assert_eq!(packets[2].next_offset, SENTINEL_NEXT_OFFSET);
    }

    #[test]
    fn empty_buffer_has_no_packets() {
        let buffer = CommandBuffer::new();
        assert!(buffer.is_empty());
    }
}
