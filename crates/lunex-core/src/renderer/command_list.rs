// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The command list: a validated state machine in front of a backend command sink.
//!
//! Every recording call checks the list state first. Calls made outside the
//! Recording state (or that need a render pass, a bound pipeline, ... that is
//! missing) are logged and dropped, so they never reach the backend and never
//! advance statistics.

use crate::math::{div_ceil, LinearRgba};
use crate::renderer::api::{
    ClearValue, Command, CommandBuffer, IndexType, PrimitiveTopology, RenderPassLayout,
    ResourceBarrier, ResourceState, ScissorRect, TextureFilter, TextureRegion, Viewport,
};
use crate::renderer::buffer::{Buffer, IndexBuffer};
use crate::renderer::device::DeviceShared;
use crate::renderer::framebuffer::Framebuffer;
use crate::renderer::handle::{ResourceHandle, ResourceKind};
use crate::renderer::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::renderer::resource::{Resource, ResourceBase};
use crate::renderer::texture::{Sampler, Texture};
use crate::renderer::traits::CommandSink;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a [`CommandList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListState {
    /// Fresh or reset; nothing recorded.
    Initial,
    /// Between `begin` and `end`.
    Recording,
    /// Finished and ready for submission.
    Executable,
}

#[derive(Debug, Clone)]
struct BoundGraphics {
    handle: ResourceHandle,
    topology: PrimitiveTopology,
    render_pass: Option<RenderPassLayout>,
}

#[derive(Debug, Clone, Copy)]
struct BoundCompute {
    handle: ResourceHandle,
    work_group_size: [u32; 3],
}

/// A recording container for one batch of GPU operations.
///
/// `begin` moves the list from Initial to Recording; `end` makes it Executable; `reset`
/// returns it to Initial. Between `begin_render_pass` and `end_render_pass` the list is
/// additionally inside a render pass, which `end` closes if still open.
pub struct CommandList {
    base: ResourceBase,
    shared: Arc<DeviceShared>,
    sink: Box<dyn CommandSink>,
    state: CommandListState,
    pass: Option<RenderPassLayout>,
    graphics: Option<BoundGraphics>,
    compute: Option<BoundCompute>,
    framebuffer: Option<ResourceHandle>,
    index_type: Option<IndexType>,
    debug_depth: u32,
    command_count: usize,
    finished: Option<Arc<CommandBuffer>>,
}

impl CommandList {
    pub(crate) fn new(shared: &Arc<DeviceShared>, label: &str) -> Self {
        Self {
            base: shared.register_plain(ResourceKind::CommandList, label),
            shared: shared.clone(),
            sink: shared.backend.create_command_sink(label),
            state: CommandListState::Initial,
            pass: None,
            graphics: None,
            compute: None,
            framebuffer: None,
            index_type: None,
            debug_depth: 0,
            command_count: 0,
            finished: None,
        }
    }

    // --- Queries ---

    /// Current lifecycle state.
    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// `true` between `begin` and `end`.
    pub fn is_recording(&self) -> bool {
        self.state == CommandListState::Recording
    }

    /// `true` inside a render pass.
    pub fn in_render_pass(&self) -> bool {
        self.pass.is_some()
    }

    /// Commands accepted since the last `begin`.
    pub fn command_count(&self) -> usize {
        self.command_count
    }

    /// The bound graphics pipeline.
    pub fn bound_pipeline(&self) -> Option<ResourceHandle> {
        self.graphics.as_ref().map(|g| g.handle)
    }

    /// The bound compute pipeline.
    pub fn bound_compute_pipeline(&self) -> Option<ResourceHandle> {
        self.compute.map(|c| c.handle)
    }

    /// The framebuffer of the current (or last) render pass.
    pub fn bound_framebuffer(&self) -> Option<ResourceHandle> {
        self.framebuffer
    }

    pub(crate) fn executable_buffer(&self) -> Option<Arc<CommandBuffer>> {
        match self.state {
            CommandListState::Executable => self.finished.clone(),
            _ => None,
        }
    }

    // --- Lifecycle ---

    fn clear_bindings(&mut self) {
        self.pass = None;
        self.graphics = None;
        self.compute = None;
        self.framebuffer = None;
        self.index_type = None;
        self.debug_depth = 0;
        self.command_count = 0;
        self.finished = None;
    }

    /// Starts recording. An Executable list is implicitly reset first.
    pub fn begin(&mut self) {
        match self.state {
            CommandListState::Recording => {
                log::warn!("CommandList: '{}' is already recording", self.debug_name());
                return;
            }
            CommandListState::Executable => self.reset(),
            CommandListState::Initial => {}
        }
        self.clear_bindings();
        self.sink.begin();
        self.state = CommandListState::Recording;
    }

    /// Finishes recording, closing an open render pass or debug events.
    pub fn end(&mut self) {
        if !self.check_recording("end") {
            return;
        }
        if self.pass.is_some() {
            log::debug!("CommandList: '{}' closing an open render pass at end", self.debug_name());
            self.end_render_pass();
        }
        while self.debug_depth > 0 {
            log::warn!("CommandList: '{}' closing an unbalanced debug event at end", self.debug_name());
            self.end_debug_event();
        }
        self.finished = Some(Arc::new(self.sink.finish()));
        self.state = CommandListState::Executable;
    }

    /// Discards everything and returns to Initial.
    pub fn reset(&mut self) {
        self.sink.reset();
        self.clear_bindings();
        self.state = CommandListState::Initial;
    }

    // --- Validation helpers ---

    fn check_recording(&self, op: &str) -> bool {
        if self.state == CommandListState::Recording {
            true
        } else {
            log::warn!(
                "CommandList: '{}' ignored {op} in state {:?}",
                self.debug_name(),
                self.state
            );
            false
        }
    }

    fn check_outside_pass(&self, op: &str) -> bool {
        if !self.check_recording(op) {
            return false;
        }
        if self.pass.is_some() {
            log::warn!("CommandList: '{}' ignored {op} inside a render pass", self.debug_name());
            return false;
        }
        true
    }

    fn check_alive(&self, op: &str, handle: ResourceHandle) -> bool {
        if self.shared.handles.is_alive(handle) {
            true
        } else {
            log::warn!(
                "CommandList: '{}' ignored {op} on stale handle {handle:?}",
                self.debug_name()
            );
            false
        }
    }

    fn check_range(&self, op: &str, buffer: &Buffer, offset: u64, size: u64) -> bool {
        if offset.checked_add(size).is_some_and(|end| end <= buffer.size()) {
            true
        } else {
            log::warn!(
                "CommandList: '{}' ignored {op}: {offset}+{size} is outside '{}' ({} bytes)",
                self.debug_name(),
                buffer.debug_name(),
                buffer.size()
            );
            false
        }
    }

    fn draw_topology(&self, op: &str) -> Option<PrimitiveTopology> {
        if !self.check_recording(op) {
            return None;
        }
        if self.pass.is_none() {
            log::warn!("CommandList: '{}' ignored {op} outside a render pass", self.debug_name());
            return None;
        }
        match &self.graphics {
            Some(g) => Some(g.topology),
            None => {
                log::warn!("CommandList: '{}' ignored {op} without a bound pipeline", self.debug_name());
                None
            }
        }
    }

    fn push(&mut self, command: Command) {
        self.command_count += 1;
        self.sink.record(command);
    }

    // --- Pipelines ---

    /// Binds a graphics pipeline, capturing its shader's loose uniforms.
    pub fn set_pipeline(&mut self, pipeline: &GraphicsPipeline) {
        if !self.check_recording("set_pipeline") || !self.check_alive("set_pipeline", pipeline.handle()) {
            return;
        }
        let expected = pipeline.desc().render_pass.clone();
        if let (Some(expected), Some(active)) = (&expected, &self.pass) {
            if !expected.is_compatible_with(active) {
                log::warn!(
                    "CommandList: '{}' ignored pipeline '{}' built for {expected:?}, pass is {active:?}",
                    self.debug_name(),
                    pipeline.debug_name()
                );
                return;
            }
        }
        let uniforms = pipeline
            .shader()
            .map(|s| s.uniform_snapshot())
            .unwrap_or_default();
        self.push(Command::BindGraphicsPipeline {
            pipeline: pipeline.handle(),
            uniforms,
        });
        self.shared.recorded.record_pipeline_bind();
        self.graphics = Some(BoundGraphics {
            handle: pipeline.handle(),
            topology: pipeline.topology(),
            render_pass: expected,
        });
    }

    /// Binds a compute pipeline.
    pub fn set_compute_pipeline(&mut self, pipeline: &ComputePipeline) {
        if !self.check_outside_pass("set_compute_pipeline")
            || !self.check_alive("set_compute_pipeline", pipeline.handle())
        {
            return;
        }
        self.push(Command::BindComputePipeline {
            pipeline: pipeline.handle(),
        });
        self.shared.recorded.record_pipeline_bind();
        self.compute = Some(BoundCompute {
            handle: pipeline.handle(),
            work_group_size: pipeline.work_group_size(),
        });
    }

    // --- Geometry & bindings ---

    /// Binds `buffer` as vertex slot `slot`.
    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: &Buffer, offset: u64) {
        if !self.check_recording("set_vertex_buffer") || !self.check_alive("set_vertex_buffer", buffer.handle()) {
            return;
        }
        self.push(Command::SetVertexBuffer {
            slot,
            buffer: buffer.handle(),
            offset,
        });
    }

    /// Binds an index buffer; the index width comes from the buffer.
    pub fn set_index_buffer(&mut self, buffer: &IndexBuffer, offset: u64) {
        if !self.check_recording("set_index_buffer") || !self.check_alive("set_index_buffer", buffer.handle()) {
            return;
        }
        self.push(Command::SetIndexBuffer {
            buffer: buffer.handle(),
            offset,
            index_type: buffer.index_type(),
        });
        self.index_type = Some(buffer.index_type());
    }

    /// Binds a whole uniform buffer at `binding`.
    pub fn set_uniform_buffer(&mut self, binding: u32, buffer: &Buffer) {
        self.bind_uniform(binding, buffer, 0, None);
    }

    /// Binds `size` bytes of a uniform buffer at `offset` to `binding`.
    pub fn set_uniform_buffer_range(&mut self, binding: u32, buffer: &Buffer, offset: u64, size: u64) {
        if self.check_range("set_uniform_buffer_range", buffer, offset, size) {
            self.bind_uniform(binding, buffer, offset, Some(size));
        }
    }

    fn bind_uniform(&mut self, binding: u32, buffer: &Buffer, offset: u64, size: Option<u64>) {
        if !self.check_recording("set_uniform_buffer") || !self.check_alive("set_uniform_buffer", buffer.handle()) {
            return;
        }
        if binding >= self.shared.capabilities.max_uniform_buffer_bindings {
            log::warn!("CommandList: '{}' uniform binding {binding} exceeds the device limit", self.debug_name());
            return;
        }
        self.push(Command::SetUniformBuffer {
            binding,
            buffer: buffer.handle(),
            offset,
            size,
        });
    }

    /// Binds a storage buffer at `binding`.
    pub fn set_storage_buffer(&mut self, binding: u32, buffer: &Buffer) {
        if !self.check_recording("set_storage_buffer") || !self.check_alive("set_storage_buffer", buffer.handle()) {
            return;
        }
        if binding >= self.shared.capabilities.max_storage_buffer_bindings {
            log::warn!("CommandList: '{}' storage binding {binding} exceeds the device limit", self.debug_name());
            return;
        }
        self.push(Command::SetStorageBuffer {
            binding,
            buffer: buffer.handle(),
            offset: 0,
            size: None,
        });
    }

    /// Binds `texture` for filtered sampling through `sampler` at `slot`.
    pub fn set_texture(&mut self, slot: u32, texture: &Texture, sampler: &Sampler) {
        if !self.check_recording("set_texture") || !self.check_alive("set_texture", texture.handle()) {
            return;
        }
        if slot >= self.shared.capabilities.max_texture_slots {
            log::warn!("CommandList: '{}' texture slot {slot} exceeds the device limit", self.debug_name());
            return;
        }
        self.push(Command::SetTexture {
            slot,
            texture: texture.handle(),
            sampler: *sampler.state(),
        });
        self.shared.recorded.record_texture_bind();
    }

    /// Binds mip `mip_level` of `texture` as a storage image at `slot`.
    pub fn set_storage_texture(&mut self, slot: u32, texture: &Texture, mip_level: u32) {
        if !self.check_recording("set_storage_texture") || !self.check_alive("set_storage_texture", texture.handle()) {
            return;
        }
        if !texture.is_storage() {
            log::warn!(
                "CommandList: '{}' ignored set_storage_texture: '{}' was not created as storage",
                self.debug_name(),
                texture.debug_name()
            );
            return;
        }
        if mip_level >= texture.mip_levels() {
            log::warn!("CommandList: '{}' storage mip {mip_level} out of range", self.debug_name());
            return;
        }
        self.push(Command::SetStorageTexture {
            slot,
            texture: texture.handle(),
            mip_level,
        });
        self.shared.recorded.record_texture_bind();
    }

    /// Sets the viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.check_recording("set_viewport") {
            self.push(Command::SetViewport(viewport));
        }
    }

    /// Sets the scissor rectangle (honored when the rasterizer enables it).
    pub fn set_scissor(&mut self, scissor: ScissorRect) {
        if self.check_recording("set_scissor") {
            self.push(Command::SetScissor(scissor));
        }
    }

    // --- Render passes ---

    /// Starts rendering into `framebuffer`.
    ///
    /// Color slot `i` is cleared when `clear_values[i]` is a color value; the depth
    /// attachment is cleared by the first depth/stencil value. Other attachments load.
    pub fn begin_render_pass(&mut self, framebuffer: &Framebuffer, clear_values: &[ClearValue]) {
        if !self.check_recording("begin_render_pass") {
            return;
        }
        if self.pass.is_some() {
            log::warn!("CommandList: '{}' ignored a nested begin_render_pass", self.debug_name());
            return;
        }
        let begin = framebuffer.pass_begin(clear_values);
        let layout = begin.layout();
        let incompatible = self
            .graphics
            .as_ref()
            .and_then(|g| g.render_pass.as_ref())
            .is_some_and(|p| !p.is_compatible_with(&layout));
        if incompatible {
            log::debug!("CommandList: '{}' unbinding a pipeline incompatible with the new pass", self.debug_name());
            self.graphics = None;
        }
        self.push(Command::BeginRenderPass(begin));
        self.pass = Some(layout);
        self.framebuffer = Some(framebuffer.handle());
    }

    /// Ends the current render pass.
    pub fn end_render_pass(&mut self) {
        if !self.check_recording("end_render_pass") {
            return;
        }
        if self.pass.take().is_none() {
            log::warn!("CommandList: '{}' ignored end_render_pass outside a render pass", self.debug_name());
            return;
        }
        self.push(Command::EndRenderPass);
    }

    // --- Draws ---

    /// Draws `vertex_count` vertices, `instance_count` times.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        let Some(topology) = self.draw_topology("draw") else {
            return;
        };
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        self.shared.recorded.record_draw(topology, vertex_count, instance_count);
    }

    /// Draws `index_count` indices from the bound index buffer.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        let Some(topology) = self.draw_topology("draw_indexed") else {
            return;
        };
        if self.index_type.is_none() {
            log::warn!("CommandList: '{}' ignored draw_indexed without an index buffer", self.debug_name());
            return;
        }
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
        self.shared.recorded.record_draw(topology, index_count, instance_count);
    }

    fn check_indirect(&self, op: &str, buffer: &Buffer, offset: u64, draw_count: u32, stride: u32, arg_size: u64) -> bool {
        let caps = &self.shared.capabilities;
        if !caps.supports_indirect_draw {
            log::warn!("CommandList: '{}' ignored {op}: indirect draws are not supported", self.debug_name());
            return false;
        }
        if draw_count > 1 && !caps.supports_multi_draw_indirect {
            log::warn!("CommandList: '{}' ignored {op}: multi-draw indirect is not supported", self.debug_name());
            return false;
        }
        let stride = if stride == 0 { arg_size } else { stride as u64 };
        let span = stride * draw_count.saturating_sub(1) as u64 + arg_size;
        self.check_alive(op, buffer.handle()) && self.check_range(op, buffer, offset, span)
    }

    /// Issues `draw_count` draws whose arguments live in `buffer` at `offset`.
    ///
    /// A `stride` of 0 means tightly packed arguments.
    pub fn draw_indirect(&mut self, buffer: &Buffer, offset: u64, draw_count: u32, stride: u32) {
        let Some(topology) = self.draw_topology("draw_indirect") else {
            return;
        };
        let arg_size = std::mem::size_of::<crate::renderer::api::DrawIndirectArgs>() as u64;
        if !self.check_indirect("draw_indirect", buffer, offset, draw_count, stride, arg_size) {
            return;
        }
        self.push(Command::DrawIndirect {
            buffer: buffer.handle(),
            offset,
            draw_count,
            stride,
        });
        for _ in 0..draw_count {
            self.shared.recorded.record_draw(topology, 0, 1);
        }
    }

    /// Indexed variant of [`CommandList::draw_indirect`].
    pub fn draw_indexed_indirect(&mut self, buffer: &Buffer, offset: u64, draw_count: u32, stride: u32) {
        let Some(topology) = self.draw_topology("draw_indexed_indirect") else {
            return;
        };
        if self.index_type.is_none() {
            log::warn!("CommandList: '{}' ignored draw_indexed_indirect without an index buffer", self.debug_name());
            return;
        }
        let arg_size = std::mem::size_of::<crate::renderer::api::DrawIndexedIndirectArgs>() as u64;
        if !self.check_indirect("draw_indexed_indirect", buffer, offset, draw_count, stride, arg_size) {
            return;
        }
        self.push(Command::DrawIndexedIndirect {
            buffer: buffer.handle(),
            offset,
            draw_count,
            stride,
        });
        for _ in 0..draw_count {
            self.shared.recorded.record_draw(topology, 0, 1);
        }
    }

    /// Indexed indirect draws whose count is read from `count_buffer` at execution,
    /// capped at `max_draw_count`.
    ///
    /// The draw count is only known on the device, so recorded statistics do not
    /// include these draws; executed statistics do.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_indexed_indirect_count(
        &mut self,
        buffer: &Buffer,
        offset: u64,
        count_buffer: &Buffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        if self.draw_topology("draw_indexed_indirect_count").is_none() {
            return;
        }
        if !self.shared.capabilities.supports_indirect_count {
            log::warn!("CommandList: '{}' ignored draw_indexed_indirect_count: not supported", self.debug_name());
            return;
        }
        if self.index_type.is_none() {
            log::warn!("CommandList: '{}' ignored draw_indexed_indirect_count without an index buffer", self.debug_name());
            return;
        }
        let arg_size = std::mem::size_of::<crate::renderer::api::DrawIndexedIndirectArgs>() as u64;
        if !self.check_indirect("draw_indexed_indirect_count", buffer, offset, max_draw_count, stride, arg_size)
            || !self.check_alive("draw_indexed_indirect_count", count_buffer.handle())
            || !self.check_range("draw_indexed_indirect_count", count_buffer, count_offset, 4)
        {
            return;
        }
        self.push(Command::DrawIndexedIndirectCount {
            buffer: buffer.handle(),
            offset,
            count_buffer: count_buffer.handle(),
            count_offset,
            max_draw_count,
            stride,
        });
    }

    // --- Compute ---

    fn check_dispatch(&self, op: &str) -> bool {
        if !self.check_outside_pass(op) {
            return false;
        }
        if self.compute.is_none() {
            log::warn!("CommandList: '{}' ignored {op} without a bound compute pipeline", self.debug_name());
            return false;
        }
        true
    }

    /// Dispatches `x * y * z` work groups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        if !self.check_dispatch("dispatch") {
            return;
        }
        let limit = self.shared.capabilities.max_compute_work_group_count;
        if x > limit[0] || y > limit[1] || z > limit[2] {
            log::warn!("CommandList: '{}' dispatch ({x}, {y}, {z}) exceeds {limit:?}", self.debug_name());
            return;
        }
        if x == 0 || y == 0 || z == 0 {
            log::debug!("CommandList: '{}' skipping an empty dispatch", self.debug_name());
            return;
        }
        self.push(Command::Dispatch { x, y, z });
        self.shared.recorded.record_dispatch();
    }

    /// Dispatches enough groups to cover `total` work items per axis, using the bound
    /// pipeline's work-group size.
    pub fn dispatch_auto(&mut self, total_x: u32, total_y: u32, total_z: u32) {
        if !self.check_dispatch("dispatch_auto") {
            return;
        }
        let size = self.compute.map(|c| c.work_group_size).unwrap_or([1, 1, 1]);
        self.dispatch(
            div_ceil(total_x, size[0]),
            div_ceil(total_y, size[1]),
            div_ceil(total_z, size[2]),
        );
    }

    /// Dispatches with group counts read from `buffer` at `offset`.
    pub fn dispatch_indirect(&mut self, buffer: &Buffer, offset: u64) {
        if !self.check_dispatch("dispatch_indirect") || !self.check_alive("dispatch_indirect", buffer.handle()) {
            return;
        }
        let size = std::mem::size_of::<crate::renderer::api::DispatchIndirectArgs>() as u64;
        if !self.check_range("dispatch_indirect", buffer, offset, size) {
            return;
        }
        self.push(Command::DispatchIndirect {
            buffer: buffer.handle(),
            offset,
        });
        self.shared.recorded.record_dispatch();
    }

    // --- Barriers ---

    /// Declares one logical state transition.
    pub fn resource_barrier(&mut self, resource: &dyn Resource, before: ResourceState, after: ResourceState) {
        self.resource_barriers(&[(resource, before, after)]);
    }

    /// Declares several transitions at once.
    ///
    /// The deferred backend validates them against the states it tracks; the immediate
    /// backend ignores them. The resources' logical state tags are updated either way.
    pub fn resource_barriers(&mut self, transitions: &[(&dyn Resource, ResourceState, ResourceState)]) {
        if !self.check_outside_pass("resource_barriers") || transitions.is_empty() {
            return;
        }
        let barriers: Vec<ResourceBarrier> = transitions
            .iter()
            .map(|(resource, before, after)| {
                resource.set_state(*after);
                ResourceBarrier {
                    resource: resource.handle(),
                    before: *before,
                    after: *after,
                }
            })
            .collect();
        self.shared.recorded.record_barriers(barriers.len() as u64);
        self.push(Command::ResourceBarriers(barriers));
    }

    /// Makes all prior writes visible to all later reads.
    pub fn memory_barrier(&mut self) {
        if self.check_recording("memory_barrier") {
            self.push(Command::MemoryBarrier);
        }
    }

    // --- Copies ---

    /// Copies `size` bytes between buffers.
    pub fn copy_buffer(&mut self, src: &Buffer, src_offset: u64, dst: &Buffer, dst_offset: u64, size: u64) {
        if !self.check_outside_pass("copy_buffer")
            || !self.check_alive("copy_buffer", src.handle())
            || !self.check_alive("copy_buffer", dst.handle())
            || !self.check_range("copy_buffer", src, src_offset, size)
            || !self.check_range("copy_buffer", dst, dst_offset, size)
        {
            return;
        }
        self.push(Command::CopyBuffer {
            src: src.handle(),
            src_offset,
            dst: dst.handle(),
            dst_offset,
            size,
        });
        self.shared.recorded.record_upload(size);
    }

    fn check_region(&self, op: &str, texture: &Texture, region: &TextureRegion) -> bool {
        let mip = texture.desc().extent().mip(region.mip_level);
        let fits = |origin: u32, extent: u32, limit: u32| origin.checked_add(extent).is_some_and(|end| end <= limit);
        let ok = region.mip_level < texture.mip_levels()
            && region.array_layer < texture.array_layers()
            && fits(region.origin.x, region.extent.width, mip.width)
            && fits(region.origin.y, region.extent.height, mip.height)
            && fits(region.origin.z, region.extent.depth, mip.depth);
        if !ok {
            log::warn!(
                "CommandList: '{}' ignored {op}: {region:?} is outside '{}'",
                self.debug_name(),
                texture.debug_name()
            );
        }
        ok
    }

    /// Copies tightly packed texels from `src` into a texture region.
    pub fn copy_buffer_to_texture(&mut self, src: &Buffer, src_offset: u64, dst: &Texture, region: TextureRegion) {
        let bytes = dst.format().region_size(region.extent.width, region.extent.height, region.extent.depth);
        if !self.check_outside_pass("copy_buffer_to_texture")
            || !self.check_alive("copy_buffer_to_texture", dst.handle())
            || !self.check_region("copy_buffer_to_texture", dst, &region)
            || !self.check_range("copy_buffer_to_texture", src, src_offset, bytes)
        {
            return;
        }
        self.push(Command::CopyBufferToTexture {
            src: src.handle(),
            src_offset,
            dst: dst.handle(),
            region,
        });
    }

    /// Copies a texture region into `dst` as tightly packed texels.
    pub fn copy_texture_to_buffer(&mut self, src: &Texture, region: TextureRegion, dst: &Buffer, dst_offset: u64) {
        let bytes = src.format().region_size(region.extent.width, region.extent.height, region.extent.depth);
        if !self.check_outside_pass("copy_texture_to_buffer")
            || !self.check_alive("copy_texture_to_buffer", src.handle())
            || !self.check_region("copy_texture_to_buffer", src, &region)
            || !self.check_range("copy_texture_to_buffer", dst, dst_offset, bytes)
        {
            return;
        }
        self.push(Command::CopyTextureToBuffer {
            src: src.handle(),
            region,
            dst: dst.handle(),
            dst_offset,
        });
        self.shared.recorded.record_upload(bytes);
    }

    /// Copies between same-format texture regions of equal extent.
    pub fn copy_texture(&mut self, src: &Texture, src_region: TextureRegion, dst: &Texture, dst_region: TextureRegion) {
        if !self.check_outside_pass("copy_texture")
            || !self.check_alive("copy_texture", src.handle())
            || !self.check_alive("copy_texture", dst.handle())
            || !self.check_region("copy_texture", src, &src_region)
            || !self.check_region("copy_texture", dst, &dst_region)
        {
            return;
        }
        if src.format() != dst.format() || src_region.extent != dst_region.extent {
            log::warn!(
                "CommandList: '{}' ignored copy_texture between mismatched regions or formats",
                self.debug_name()
            );
            return;
        }
        self.push(Command::CopyTexture {
            src: src.handle(),
            src_region,
            dst: dst.handle(),
            dst_region,
        });
    }

    /// Scaled, filtered copy between texture regions. Also resolves multisampled sources.
    pub fn blit_texture(
        &mut self,
        src: &Texture,
        src_region: TextureRegion,
        dst: &Texture,
        dst_region: TextureRegion,
        filter: TextureFilter,
    ) {
        if !self.check_outside_pass("blit_texture")
            || !self.check_alive("blit_texture", src.handle())
            || !self.check_alive("blit_texture", dst.handle())
            || !self.check_region("blit_texture", src, &src_region)
            || !self.check_region("blit_texture", dst, &dst_region)
        {
            return;
        }
        self.push(Command::BlitTexture {
            src: src.handle(),
            src_region,
            dst: dst.handle(),
            dst_region,
            filter,
        });
    }

    // --- Clears ---

    /// Clears one mip/layer of `texture`, optionally only inside `rect`.
    pub fn clear_texture(
        &mut self,
        texture: &Texture,
        mip_level: u32,
        array_layer: u32,
        rect: Option<ScissorRect>,
        value: ClearValue,
    ) {
        if !self.check_recording("clear_texture") || !self.check_alive("clear_texture", texture.handle()) {
            return;
        }
        if mip_level >= texture.mip_levels() || array_layer >= texture.array_layers() {
            log::warn!("CommandList: '{}' ignored clear_texture on a missing mip/layer", self.debug_name());
            return;
        }
        self.push(Command::ClearTexture {
            texture: texture.handle(),
            mip_level,
            array_layer,
            rect,
            value,
        });
    }

    /// Clears a color render target.
    pub fn clear_render_target(&mut self, texture: &Texture, color: LinearRgba) {
        if texture.format().is_depth() {
            log::warn!("CommandList: '{}' clear_render_target on a depth texture", self.debug_name());
            return;
        }
        self.clear_texture(texture, 0, 0, None, ClearValue::Color(color));
    }

    /// Clears a depth/stencil target.
    pub fn clear_depth_stencil(&mut self, texture: &Texture, depth: f32, stencil: u8) {
        if !texture.format().is_depth() {
            log::warn!("CommandList: '{}' clear_depth_stencil on a color texture", self.debug_name());
            return;
        }
        self.clear_texture(texture, 0, 0, None, ClearValue::DepthStencil { depth, stencil });
    }

    /// Fills `size` bytes of `buffer` at `offset` with the 32-bit pattern `value`.
    pub fn clear_buffer(&mut self, buffer: &Buffer, offset: u64, size: u64, value: u32) {
        if !self.check_outside_pass("clear_buffer")
            || !self.check_alive("clear_buffer", buffer.handle())
            || !self.check_range("clear_buffer", buffer, offset, size)
        {
            return;
        }
        if offset % 4 != 0 || size % 4 != 0 {
            log::warn!("CommandList: '{}' clear_buffer needs 4-byte aligned offset and size", self.debug_name());
            return;
        }
        self.push(Command::ClearBuffer {
            buffer: buffer.handle(),
            offset,
            size,
            value,
        });
    }

    // --- Debug ---

    /// Opens a named debug region.
    pub fn begin_debug_event(&mut self, name: &str) {
        if self.check_recording("begin_debug_event") {
            self.debug_depth += 1;
            self.push(Command::BeginDebugEvent(name.to_owned()));
        }
    }

    /// Closes the innermost debug region.
    pub fn end_debug_event(&mut self) {
        if !self.check_recording("end_debug_event") {
            return;
        }
        if self.debug_depth == 0 {
            log::warn!("CommandList: '{}' end_debug_event without a matching begin", self.debug_name());
            return;
        }
        self.debug_depth -= 1;
        self.push(Command::EndDebugEvent);
    }

    /// Inserts a single named marker.
    pub fn insert_debug_marker(&mut self, name: &str) {
        if self.check_recording("insert_debug_marker") {
            self.push(Command::InsertDebugMarker(name.to_owned()));
        }
    }
}

impl Resource for CommandList {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

impl fmt::Debug for CommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("name", &self.debug_name())
            .field("state", &self.state)
            .field("in_render_pass", &self.pass.is_some())
            .field("command_count", &self.command_count)
            .finish()
    }
}
