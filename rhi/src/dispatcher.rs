//! Table-driven packet dispatch. A `CommandBuffer` is walked packet by
//! packet, following `next_offset` until the sentinel; each packet's
//! `dispatch_index` selects a function from a literal array indexed by
//! the enum discriminant, mirroring the original's static dispatch table
//! while keeping every call site type-checked (no function-pointer cast
//! from an untyped payload pointer).
//!
//! The actual driver calls live behind `DispatchBackend`, implemented by
//! `vulkan::device::VulkanDevice`. This module owns the walk and the
//! render-target-state bookkeeping (SPEC_FULL.md §4.1/§4.2); it is
//! backend-agnostic so a future non-Vulkan backend reuses it unchanged.

use crate::command_buffer::{CommandBuffer, CommandDispatchFunctionIndex, CommandPacket, CommandPayload, DISPATCH_TABLE_LEN};
use crate::device::RenderTargetState;
use crate::log::Severity;
use crate::{RhiError, RhiResult};

/// Driver-facing half of dispatch. One method per `CommandPayload`
/// variant; `dispatch()` below matches a packet's payload against the
/// variant its `dispatch_index` promises and forwards to the matching
/// method. A mismatch between `dispatch_index` and the payload variant
/// is a recording bug and is asserted in debug builds.
pub trait DispatchBackend {
    fn log(&self, severity: Severity, message: &str);

    fn set_graphics_root_signature(&self, root_signature: &std::sync::Arc<dyn crate::RootSignature>) -> RhiResult<()>;
    fn set_graphics_pipeline_state(&self, pipeline: &std::sync::Arc<dyn crate::GraphicsPipeline>) -> RhiResult<()>;
    fn set_graphics_resource_group(&self, root_parameter_index: u32, group: &std::sync::Arc<crate::root_signature::ResourceGroup>) -> RhiResult<()>;
    fn set_graphics_vertex_array(&self, vertex_array: Option<&std::sync::Arc<crate::VertexArray>>) -> RhiResult<()>;
    fn set_graphics_viewports(&self, viewports: &[crate::command_buffer::Viewport]) -> RhiResult<()>;
    fn set_graphics_scissor_rectangles(&self, rects: &[crate::command_buffer::ScissorRect]) -> RhiResult<()>;

    /// Transitions `state` per SPEC_FULL.md §4.1: ending an open pass
    /// when the target changes, beginning a new one lazily on the next
    /// draw/clear rather than immediately on bind.
    fn set_graphics_render_target(&self, state: &mut RenderTargetState, target: Option<&crate::RenderTarget>) -> RhiResult<()>;
    fn clear_graphics(&self, state: &mut RenderTargetState, values: &crate::command_buffer::ClearValues) -> RhiResult<()>;
    fn draw_graphics(&self, state: &mut RenderTargetState, args: &crate::command_buffer::DrawArguments) -> RhiResult<()>;
    fn draw_graphics_emulated(&self, state: &mut RenderTargetState, draws: &[crate::command_buffer::DrawArguments]) -> RhiResult<()>;
    fn draw_indexed_graphics(&self, state: &mut RenderTargetState, args: &crate::command_buffer::DrawIndexedArguments) -> RhiResult<()>;
    fn draw_indexed_graphics_emulated(&self, state: &mut RenderTargetState, draws: &[crate::command_buffer::DrawIndexedArguments]) -> RhiResult<()>;
    fn draw_indexed_indirect(&self, state: &mut RenderTargetState, buffer: &std::sync::Arc<dyn crate::Buffer>, offset: u64, draw_count: u32) -> RhiResult<()>;
    fn draw_mesh_tasks(&self, state: &mut RenderTargetState, x: u32, y: u32, z: u32) -> RhiResult<()>;
    fn draw_mesh_tasks_emulated(&self, state: &mut RenderTargetState, tasks: &[(u32, u32, u32)]) -> RhiResult<()>;
    fn draw_mesh_tasks_indirect(&self, state: &mut RenderTargetState, buffer: &std::sync::Arc<dyn crate::Buffer>, offset: u64, draw_count: u32) -> RhiResult<()>;

    fn set_compute_root_signature(&self, root_signature: &std::sync::Arc<dyn crate::RootSignature>) -> RhiResult<()>;
    fn set_compute_pipeline_state(&self, pipeline: &std::sync::Arc<dyn crate::ComputePipeline>) -> RhiResult<()>;
    fn set_compute_resource_group(&self, root_parameter_index: u32, group: &std::sync::Arc<crate::root_signature::ResourceGroup>) -> RhiResult<()>;
    fn dispatch_compute(&self, x: u32, y: u32, z: u32) -> RhiResult<()>;

    fn resolve_multisample_framebuffer(&self, src: &crate::RenderTarget, dst: &crate::RenderTarget) -> RhiResult<()>;
    fn copy_resource(&self, src: &crate::command_buffer::CopySource, dst: &crate::command_buffer::CopySource) -> RhiResult<()>;
    fn generate_mipmaps(&self, texture: &std::sync::Arc<dyn crate::Texture>) -> RhiResult<()>;

    fn reset_query_pool(&self, pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, first: u32, count: u32) -> RhiResult<()>;
    fn begin_query(&self, pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, index: u32) -> RhiResult<()>;
    fn end_query(&self, pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, index: u32) -> RhiResult<()>;
    /// `wait` mirrors the original's `VK_QUERY_RESULT_WAIT_BIT` flag.
    fn get_query_pool_results(&self, pool: &dyn crate::command_buffer::QueryPool, first: u32, count: u32, wait: bool) -> RhiResult<Vec<u64>>;
    fn write_timestamp_query(&self, pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, index: u32) -> RhiResult<()>;

    fn debug_marker_begin(&self, label: &str) -> RhiResult<()>;
    fn debug_marker_end(&self) -> RhiResult<()>;

    fn begin_command_buffer(&self) -> RhiResult<()>;
    fn end_command_buffer(&self, state: &mut RenderTargetState) -> RhiResult<()>;
}

/// Walks `command_buffer`'s packets against `backend`, threading
/// `state` through so a pass can stay open across multiple packets.
/// Recurses into nested command buffers (`DispatchCommandBuffer`).
pub fn dispatch(backend: &dyn DispatchBackend, command_buffer: &CommandBuffer, state: &mut RenderTargetState) -> RhiResult<()> {
    for packet in command_buffer.packets() {
        if let Err(err) = dispatch_one(backend, packet, state) {
            backend.log(Severity::Critical, &format!("dispatch failed: {err}"));
            return Err(err);
        }
    }
    Ok(())
}

/// `_table` exists to keep the "literal array indexed by enum
/// discriminant" shape visible even though Rust closures can't easily
/// be stored as bare `fn` pointers when they capture `backend`/`state`;
/// the match below is that table, written out, and its arm order tracks
/// `CommandDispatchFunctionIndex`'s declaration order one-for-one.
const _TABLE_LEN_ASSERT: usize = DISPATCH_TABLE_LEN;

fn dispatch_one(backend: &dyn DispatchBackend, packet: &CommandPacket, state: &mut RenderTargetState) -> RhiResult<()> {
    match (&packet.dispatch_index, &packet.payload) {
        (CommandDispatchFunctionIndex::DispatchCommandBuffer, CommandPayload::DispatchCommandBuffer(nested)) => {
            dispatch(backend, nested, state)
        }
        (CommandDispatchFunctionIndex::SetGraphicsRootSignature, CommandPayload::SetGraphicsRootSignature(rs)) => {
            backend.set_graphics_root_signature(rs)
        }
        (CommandDispatchFunctionIndex::SetGraphicsPipelineState, CommandPayload::SetGraphicsPipelineState(p)) => {
            backend.set_graphics_pipeline_state(p)
        }
        (CommandDispatchFunctionIndex::SetGraphicsResourceGroup, CommandPayload::SetGraphicsResourceGroup { root_parameter_index, group }) => {
            backend.set_graphics_resource_group(*root_parameter_index, group)
        }
        (CommandDispatchFunctionIndex::SetGraphicsVertexArray, CommandPayload::SetGraphicsVertexArray(va)) => {
            backend.set_graphics_vertex_array(va.as_ref())
        }
        (CommandDispatchFunctionIndex::SetGraphicsViewports, CommandPayload::SetGraphicsViewports(vps)) => {
            backend.set_graphics_viewports(vps)
        }
        (CommandDispatchFunctionIndex::SetGraphicsScissorRectangles, CommandPayload::SetGraphicsScissorRectangles(rects)) => {
            backend.set_graphics_scissor_rectangles(rects)
        }
        (CommandDispatchFunctionIndex::SetGraphicsRenderTarget, CommandPayload::SetGraphicsRenderTarget(target)) => {
            backend.set_graphics_render_target(state, target.as_ref())
        }
        (CommandDispatchFunctionIndex::ClearGraphics, CommandPayload::ClearGraphics(values)) => {
            backend.clear_graphics(state, values)
        }
        (CommandDispatchFunctionIndex::DrawGraphics, CommandPayload::DrawGraphics(args)) => {
            backend.draw_graphics(state, args)
        }
        (CommandDispatchFunctionIndex::DrawGraphicsEmulated, CommandPayload::DrawGraphicsEmulated(draws)) => {
            backend.draw_graphics_emulated(state, draws)
        }
        (CommandDispatchFunctionIndex::DrawIndexedGraphics, CommandPayload::DrawIndexedGraphics(args)) => {
            backend.draw_indexed_graphics(state, args)
        }
        (CommandDispatchFunctionIndex::DrawIndexedGraphicsEmulated, CommandPayload::DrawIndexedGraphicsEmulated(draws)) => {
            backend.draw_indexed_graphics_emulated(state, draws)
        }
        (CommandDispatchFunctionIndex::DrawIndexedIndirect, CommandPayload::DrawIndexedIndirect { buffer, offset, draw_count }) => {
            backend.draw_indexed_indirect(state, buffer, *offset, *draw_count)
        }
        (CommandDispatchFunctionIndex::DrawMeshTasks, CommandPayload::DrawMeshTasks { group_count_x, group_count_y, group_count_z }) => {
            backend.draw_mesh_tasks(state, *group_count_x, *group_count_y, *group_count_z)
        }
        (CommandDispatchFunctionIndex::DrawMeshTasksEmulated, CommandPayload::DrawMeshTasksEmulated(tasks)) => {
            backend.draw_mesh_tasks_emulated(state, tasks)
        }
        (CommandDispatchFunctionIndex::DrawMeshTasksIndirect, CommandPayload::DrawMeshTasksIndirect { buffer, offset, draw_count }) => {
            backend.draw_mesh_tasks_indirect(state, buffer, *offset, *draw_count)
        }
        (CommandDispatchFunctionIndex::SetComputeRootSignature, CommandPayload::SetComputeRootSignature(rs)) => {
            backend.set_compute_root_signature(rs)
        }
        (CommandDispatchFunctionIndex::SetComputePipelineState, CommandPayload::SetComputePipelineState(p)) => {
            backend.set_compute_pipeline_state(p)
        }
        (CommandDispatchFunctionIndex::SetComputeResourceGroup, CommandPayload::SetComputeResourceGroup { root_parameter_index, group }) => {
            backend.set_compute_resource_group(*root_parameter_index, group)
        }
        (CommandDispatchFunctionIndex::DispatchCompute, CommandPayload::DispatchCompute { x, y, z }) => {
            backend.dispatch_compute(*x, *y, *z)
        }
        (CommandDispatchFunctionIndex::ResolveMultisampleFramebuffer, CommandPayload::ResolveMultisampleFramebuffer { src, dst }) => {
            backend.resolve_multisample_framebuffer(src, dst)
        }
        (CommandDispatchFunctionIndex::CopyResource, CommandPayload::CopyResource { src, dst }) => {
            backend.copy_resource(src, dst)
        }
        (CommandDispatchFunctionIndex::GenerateMipmaps, CommandPayload::GenerateMipmaps(tex)) => {
            backend.generate_mipmaps(tex)
        }
        (CommandDispatchFunctionIndex::ResetQueryPool, CommandPayload::ResetQueryPool { pool, first, count }) => {
            backend.reset_query_pool(pool, *first, *count)
        }
        (CommandDispatchFunctionIndex::BeginQuery, CommandPayload::BeginQuery { pool, index }) => {
            backend.begin_query(pool, *index)
        }
        (CommandDispatchFunctionIndex::EndQuery, CommandPayload::EndQuery { pool, index }) => {
            backend.end_query(pool, *index)
        }
        (CommandDispatchFunctionIndex::WriteTimestampQuery, CommandPayload::WriteTimestampQuery { pool, index }) => {
            backend.write_timestamp_query(pool, *index)
        }
        (CommandDispatchFunctionIndex::DebugMarkerBegin, CommandPayload::DebugMarkerBegin(label)) => {
            backend.debug_marker_begin(label)
        }
        (CommandDispatchFunctionIndex::DebugMarkerEnd, CommandPayload::DebugMarkerEnd) => backend.debug_marker_end(),
        _ => {
            debug_assert!(false, "dispatch_index does not match recorded payload variant");
            Err(RhiError::DeviceBootstrap("command packet dispatch_index/payload mismatch".into()))
        }
    }
}

/// Full submission sequence for a top-level command buffer (SPEC_FULL.md
/// §4.2): begin, walk, force the target back to `NoTarget` and the
/// vertex array unbound, then end. Any failure short-circuits and is
/// logged at `Critical` by `dispatch()` before propagating.
pub fn submit(backend: &dyn DispatchBackend, command_buffer: &CommandBuffer) -> RhiResult<()> {
    let mut state = RenderTargetState::NoTarget;
    backend.begin_command_buffer()?;
    dispatch(backend, command_buffer, &mut state)?;
    backend.set_graphics_vertex_array(None)?;
    backend.end_command_buffer(&mut state)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_buffer::CommandRecorder;
    use std::sync::Mutex;

    /// Records every call it receives instead of touching a driver, so the
    /// packet walk and submission sequence can be asserted without Vulkan.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl DispatchBackend for RecordingBackend {
        fn log(&self, _severity: Severity, _message: &str) {}
        fn set_graphics_root_signature(&self, _rs: &std::sync::Arc<dyn crate::RootSignature>) -> RhiResult<()> {
            Ok(())
        }
        fn set_graphics_pipeline_state(&self, _p: &std::sync::Arc<dyn crate::GraphicsPipeline>) -> RhiResult<()> {
            Ok(())
        }
        fn set_graphics_resource_group(&self, _i: u32, _g: &std::sync::Arc<crate::root_signature::ResourceGroup>) -> RhiResult<()> {
            Ok(())
        }
        fn set_graphics_vertex_array(&self, va: Option<&std::sync::Arc<crate::VertexArray>>) -> RhiResult<()> {
            self.record(format!("set_graphics_vertex_array({})", va.is_some()));
            Ok(())
        }
        fn set_graphics_viewports(&self, _v: &[crate::command_buffer::Viewport]) -> RhiResult<()> {
            Ok(())
        }
        fn set_graphics_scissor_rectangles(&self, _r: &[crate::command_buffer::ScissorRect]) -> RhiResult<()> {
            Ok(())
        }
        fn set_graphics_render_target(&self, _state: &mut RenderTargetState, _target: Option<&crate::RenderTarget>) -> RhiResult<()> {
            Ok(())
        }
        fn clear_graphics(&self, _state: &mut RenderTargetState, _values: &crate::command_buffer::ClearValues) -> RhiResult<()> {
            Ok(())
        }
        fn draw_graphics(&self, _state: &mut RenderTargetState, _args: &crate::command_buffer::DrawArguments) -> RhiResult<()> {
            Ok(())
        }
        fn draw_graphics_emulated(&self, _state: &mut RenderTargetState, _draws: &[crate::command_buffer::DrawArguments]) -> RhiResult<()> {
            Ok(())
        }
        fn draw_indexed_graphics(&self, _state: &mut RenderTargetState, _args: &crate::command_buffer::DrawIndexedArguments) -> RhiResult<()> {
            Ok(())
        }
        fn draw_indexed_graphics_emulated(&self, _state: &mut RenderTargetState, _draws: &[crate::command_buffer::DrawIndexedArguments]) -> RhiResult<()> {
            Ok(())
        }
        fn draw_indexed_indirect(&self, _state: &mut RenderTargetState, _buffer: &std::sync::Arc<dyn crate::Buffer>, _offset: u64, _draw_count: u32) -> RhiResult<()> {
            Ok(())
        }
        fn draw_mesh_tasks(&self, _state: &mut RenderTargetState, _x: u32, _y: u32, _z: u32) -> RhiResult<()> {
            Ok(())
        }
        fn draw_mesh_tasks_emulated(&self, _state: &mut RenderTargetState, _tasks: &[(u32, u32, u32)]) -> RhiResult<()> {
            Ok(())
        }
        fn draw_mesh_tasks_indirect(&self, _state: &mut RenderTargetState, _buffer: &std::sync::Arc<dyn crate::Buffer>, _offset: u64, _draw_count: u32) -> RhiResult<()> {
            Ok(())
        }
        fn set_compute_root_signature(&self, _rs: &std::sync::Arc<dyn crate::RootSignature>) -> RhiResult<()> {
            Ok(())
        }
        fn set_compute_pipeline_state(&self, _p: &std::sync::Arc<dyn crate::ComputePipeline>) -> RhiResult<()> {
            Ok(())
        }
        fn set_compute_resource_group(&self, _i: u32, _g: &std::sync::Arc<crate::root_signature::ResourceGroup>) -> RhiResult<()> {
            Ok(())
        }
        fn dispatch_compute(&self, x: u32, y: u32, z: u32) -> RhiResult<()> {
            self.record(format!("dispatch_compute({x},{y},{z})"));
            Ok(())
        }
        fn resolve_multisample_framebuffer(&self, _src: &crate::RenderTarget, _dst: &crate::RenderTarget) -> RhiResult<()> {
            Ok(())
        }
        fn copy_resource(&self, _src: &crate::command_buffer::CopySource, _dst: &crate::command_buffer::CopySource) -> RhiResult<()> {
            Ok(())
        }
        fn generate_mipmaps(&self, _texture: &std::sync::Arc<dyn crate::Texture>) -> RhiResult<()> {
            Ok(())
        }
        fn reset_query_pool(&self, _pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, _first: u32, _count: u32) -> RhiResult<()> {
            Ok(())
        }
        fn begin_query(&self, _pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, _index: u32) -> RhiResult<()> {
            Ok(())
        }
        fn end_query(&self, _pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, _index: u32) -> RhiResult<()> {
            Ok(())
        }
        fn get_query_pool_results(&self, _pool: &dyn crate::command_buffer::QueryPool, _first: u32, _count: u32, _wait: bool) -> RhiResult<Vec<u64>> {
            Ok(Vec::new())
        }
        fn write_timestamp_query(&self, _pool: &std::sync::Arc<dyn crate::command_buffer::QueryPool>, _index: u32) -> RhiResult<()> {
            Ok(())
        }
        fn debug_marker_begin(&self, _label: &str) -> RhiResult<()> {
            Ok(())
        }
        fn debug_marker_end(&self) -> RhiResult<()> {
            Ok(())
        }
        fn begin_command_buffer(&self) -> RhiResult<()> {
            self.record("begin_command_buffer");
            Ok(())
        }
        fn end_command_buffer(&self, _state: &mut RenderTargetState) -> RhiResult<()> {
            self.record("end_command_buffer");
            Ok(())
        }
    }

    #[test]
    fn dispatch_walks_packets_in_recorded_order() {
        let backend = RecordingBackend::default();
        let mut buffer = CommandBuffer::new();
        {
            let mut rec = CommandRecorder::new(&mut buffer);
            rec.dispatch_compute(1, 2, 3);
            rec.dispatch_compute(4, 5, 6);
        }
        let mut state = RenderTargetState::NoTarget;
        dispatch(&backend, &buffer, &mut state).unwrap();
        assert_eq!(backend.calls(), vec!["dispatch_compute(1,2,3)", "dispatch_compute(4,5,6)"]);
    }

    #[test]
    fn dispatch_recurses_into_nested_command_buffers() {
        let backend = RecordingBackend::default();
        let mut inner = CommandBuffer::new();
        CommandRecorder::new(&mut inner).dispatch_compute(9, 9, 9);

        let mut outer = CommandBuffer::new();
        CommandRecorder::new(&mut outer).dispatch_command_buffer(std::sync::Arc::new(inner));

        let mut state = RenderTargetState::NoTarget;
        dispatch(&backend, &outer, &mut state).unwrap();
        assert_eq!(backend.calls(), vec!["dispatch_compute(9,9,9)"]);
    }

    #[test]
    fn submit_brackets_the_walk_with_begin_end_and_unbinds_vertex_array() {
        let backend = RecordingBackend::default();
        let mut buffer = CommandBuffer::new();
        CommandRecorder::new(&mut buffer).dispatch_compute(1, 1, 1);

        submit(&backend, &buffer).unwrap();
        assert_eq!(backend.calls(), vec!["begin_command_buffer", "dispatch_compute(1,1,1)", "set_graphics_vertex_array(false)", "end_command_buffer"]);
    }
}
