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

//! Executes recorded commands against the software GPU.
//!
//! The immediate backend feeds an [`Executor`] one command at a time while a list
//! records; the deferred backend's queue thread replays whole command buffers. The
//! executor keeps the bound state between commands the way a GPU front end would.

use super::error::SoftGpuError;
use super::interp::{self, ImageBinding, Layout, Outcome, Resources, Stage, Value};
use super::memory::{BufferMemory, Image};
use super::raster::{self, DrawState, FragmentInput, FragmentOutput, FragmentStage, Targets, Vertex};
use super::shader::LOOSE_BLOCK_PREFIX;
use super::tracker::BarrierTracker;
use super::{SharedImage, SoftGpu};
use lunex_core::math::LinearRgba;
use lunex_core::renderer::traits::{
    ComputeKernel, ComputePipelineState, GraphicsPipelineState, KernelInvocation,
};
use lunex_core::renderer::{
    ClearValue, Command, CommandBuffer, DataType, DispatchIndirectArgs, DrawIndexedIndirectArgs,
    DrawIndirectArgs, IndexType, LoadOp, RenderPassBegin, ResourceBarrier, ResourceHandle,
    SamplerState, ScissorRect, TextureFilter, TextureRegion, UniformValue, UniformValues,
    VertexElement, VertexInput, VertexLayout, Viewport,
};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct BufferBinding {
    buffer: ResourceHandle,
    offset: u64,
    size: Option<u64>,
}

impl BufferBinding {
    fn bytes(&self, memory: &BufferMemory) -> Result<Vec<u8>, SoftGpuError> {
        match self.size {
            Some(size) => Ok(memory.read(self.offset, size)?.to_vec()),
            None => Ok(memory.tail(self.offset).to_vec()),
        }
    }
}

#[derive(Debug, Clone)]
struct BoundGraphics {
    pipeline: ResourceHandle,
    state: Arc<GraphicsPipelineState>,
    uniforms: Arc<UniformValues>,
}

/// Everything bound between commands.
#[derive(Debug, Default)]
struct BoundState {
    pass: Option<RenderPassBegin>,
    graphics: Option<BoundGraphics>,
    compute: Option<(ResourceHandle, Arc<ComputePipelineState>)>,
    vertex_buffers: BTreeMap<u32, (ResourceHandle, u64)>,
    index_buffer: Option<(ResourceHandle, u64, IndexType)>,
    uniform_buffers: BTreeMap<u32, BufferBinding>,
    storage_buffers: BTreeMap<u32, BufferBinding>,
    textures: BTreeMap<u32, (ResourceHandle, SamplerState)>,
    storage_textures: BTreeMap<u32, (ResourceHandle, u32)>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    debug_depth: u32,
}

/// Replays commands on a [`SoftGpu`].
#[derive(Debug)]
pub struct Executor {
    gpu: Arc<SoftGpu>,
    tracker: Option<BarrierTracker>,
    bound: BoundState,
    label: String,
}

impl Executor {
    /// Creates an executor. With a tracker, barriers are validated and hazards counted.
    pub fn new(gpu: Arc<SoftGpu>, tracker: Option<BarrierTracker>) -> Self {
        Self {
            gpu,
            tracker,
            bound: BoundState::default(),
            label: String::new(),
        }
    }

    /// The software GPU commands execute against.
    pub fn gpu(&self) -> &Arc<SoftGpu> {
        &self.gpu
    }

    /// Starts a new command stream: bound state does not leak between lists.
    pub fn begin(&mut self, label: &str) {
        self.bound = BoundState::default();
        self.label.clear();
        self.label.push_str(label);
    }

    /// Replays a whole command buffer.
    pub fn run(&mut self, buffer: &CommandBuffer) {
        self.begin(&buffer.label);
        for command in &buffer.commands {
            self.execute(command);
        }
        if self.bound.pass.is_some() {
            log::warn!("SoftGpu: '{}' ended with an open render pass", self.label);
        }
        self.bound = BoundState::default();
    }

    /// Forgets tracked state of a destroyed resource.
    pub fn forget(&mut self, resource: ResourceHandle) {
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.forget(resource);
        }
    }

    /// Executes one command. Failures are logged and the command is skipped.
    pub fn execute(&mut self, command: &Command) {
        if let Err(e) = self.apply(command) {
            log::error!(
                "SoftGpu: '{}' skipped {}: {e}",
                self.label,
                command.name()
            );
        }
    }

    fn apply(&mut self, command: &Command) -> Result<(), SoftGpuError> {
        match command {
            Command::BeginRenderPass(begin) => self.begin_render_pass(begin)?,
            Command::EndRenderPass => {
                self.bound.pass = None;
                self.bound.viewport = None;
                self.bound.scissor = None;
            }
            Command::BindGraphicsPipeline { pipeline, uniforms } => {
                let state = self
                    .gpu
                    .graphics_pipeline(*pipeline)
                    .ok_or(SoftGpuError::UnknownHandle {
                        kind: "graphics pipeline",
                        handle: *pipeline,
                    })?;
                self.bound.graphics = Some(BoundGraphics {
                    pipeline: *pipeline,
                    state,
                    uniforms: uniforms.clone(),
                });
                self.gpu.executed().record_pipeline_bind();
            }
            Command::BindComputePipeline { pipeline } => {
                let state = self
                    .gpu
                    .compute_pipeline(*pipeline)
                    .ok_or(SoftGpuError::UnknownHandle {
                        kind: "compute pipeline",
                        handle: *pipeline,
                    })?;
                self.bound.compute = Some((*pipeline, state));
                self.gpu.executed().record_pipeline_bind();
            }
            Command::SetVertexBuffer { slot, buffer, offset } => {
                self.bound.vertex_buffers.insert(*slot, (*buffer, *offset));
            }
            Command::SetIndexBuffer {
                buffer,
                offset,
                index_type,
            } => self.bound.index_buffer = Some((*buffer, *offset, *index_type)),
            Command::SetUniformBuffer {
                binding,
                buffer,
                offset,
                size,
            } => {
                self.bound.uniform_buffers.insert(
                    *binding,
                    BufferBinding {
                        buffer: *buffer,
                        offset: *offset,
                        size: *size,
                    },
                );
            }
            Command::SetStorageBuffer {
                binding,
                buffer,
                offset,
                size,
            } => {
                self.bound.storage_buffers.insert(
                    *binding,
                    BufferBinding {
                        buffer: *buffer,
                        offset: *offset,
                        size: *size,
                    },
                );
            }
            Command::SetTexture { slot, texture, sampler } => {
                self.bound.textures.insert(*slot, (*texture, *sampler));
                self.gpu.executed().record_texture_bind();
            }
            Command::SetStorageTexture {
                slot,
                texture,
                mip_level,
            } => {
                self.bound.storage_textures.insert(*slot, (*texture, *mip_level));
                self.gpu.executed().record_texture_bind();
            }
            Command::SetViewport(viewport) => self.bound.viewport = Some(*viewport),
            Command::SetScissor(rect) => self.bound.scissor = Some(*rect),
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                let indices: Vec<u32> = (*first_vertex..first_vertex.saturating_add(*vertex_count)).collect();
                let params = DrawParams {
                    instance_count: *instance_count,
                    first_instance: *first_instance,
                    base_vertex: 0,
                };
                self.draw(&indices, params)?;
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => {
                let indices = self.fetch_indices(*first_index, *index_count, *vertex_offset)?;
                let params = DrawParams {
                    instance_count: *instance_count,
                    first_instance: *first_instance,
                    base_vertex: *vertex_offset,
                };
                self.draw(&indices, params)?;
            }
            Command::DrawIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            } => {
                for args in self.indirect_args::<DrawIndirectArgs>(*buffer, *offset, *draw_count, *stride)? {
                    let end = args.first_vertex.saturating_add(args.vertex_count);
                    let indices: Vec<u32> = (args.first_vertex..end).collect();
                    let params = DrawParams {
                        instance_count: args.instance_count,
                        first_instance: args.first_instance,
                        base_vertex: 0,
                    };
                    self.draw(&indices, params)?;
                }
            }
            Command::DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            } => self.draw_indexed_indirect(*buffer, *offset, *draw_count, *stride)?,
            Command::DrawIndexedIndirectCount {
                buffer,
                offset,
                count_buffer,
                count_offset,
                max_draw_count,
                stride,
            } => {
                let count: u32 = self.gpu.buffer(*count_buffer)?.read().read_pod(*count_offset)?;
                let count = count.min(*max_draw_count);
                log::trace!("SoftGpu: '{}' indirect count resolved to {count}", self.label);
                self.draw_indexed_indirect(*buffer, *offset, count, *stride)?;
            }
            Command::Dispatch { x, y, z } => self.dispatch([*x, *y, *z])?,
            Command::DispatchIndirect { buffer, offset } => {
                let args: DispatchIndirectArgs = self.gpu.buffer(*buffer)?.read().read_pod(*offset)?;
                self.dispatch([args.x, args.y, args.z])?;
            }
            Command::ResourceBarriers(barriers) => self.barriers(barriers),
            Command::MemoryBarrier => {}
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let bytes = self.gpu.buffer(*src)?.read().read(*src_offset, *size)?.to_vec();
                self.gpu.buffer(*dst)?.write().write(*dst_offset, &bytes)?;
                self.gpu.executed().record_upload(*size);
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                region,
            } => {
                let image = self.gpu.image(*dst)?;
                let mut image = image.write();
                let e = region.extent;
                let size = image.format().region_size(e.width, e.height, e.depth);
                let buffer = self.gpu.buffer(*src)?;
                let memory = buffer.read();
                image.write_region(region, memory.read(*src_offset, size)?)?;
            }
            Command::CopyTextureToBuffer {
                src,
                region,
                dst,
                dst_offset,
            } => {
                let bytes = self.gpu.image(*src)?.read().read_region(region)?;
                self.gpu.buffer(*dst)?.write().write(*dst_offset, &bytes)?;
                self.gpu.executed().record_upload(bytes.len() as u64);
            }
            Command::CopyTexture {
                src,
                src_region,
                dst,
                dst_region,
            } => self.copy_texture(*src, src_region, *dst, dst_region)?,
            Command::BlitTexture {
                src,
                src_region,
                dst,
                dst_region,
                filter,
            } => self.blit(*src, src_region, *dst, dst_region, *filter)?,
            Command::ClearTexture {
                texture,
                mip_level,
                array_layer,
                rect,
                value,
            } => {
                self.gpu
                    .image(*texture)?
                    .write()
                    .clear(*mip_level, *array_layer, *rect, *value);
            }
            Command::ClearBuffer {
                buffer,
                offset,
                size,
                value,
            } => self.gpu.buffer(*buffer)?.write().fill_u32(*offset, *size, *value)?,
            Command::BeginDebugEvent(name) => {
                self.bound.debug_depth += 1;
                log::trace!("SoftGpu: '{}' > {name}", self.label);
            }
            Command::EndDebugEvent => {
                self.bound.debug_depth = self.bound.debug_depth.saturating_sub(1);
            }
            Command::InsertDebugMarker(name) => log::trace!("SoftGpu: '{}' marker {name}", self.label),
        }
        Ok(())
    }

    // --- Render passes ---

    fn begin_render_pass(&mut self, begin: &RenderPassBegin) -> Result<(), SoftGpuError> {
        for color in &begin.color {
            if let LoadOp::Clear(value) = color.load {
                self.gpu
                    .image(color.texture)?
                    .write()
                    .clear(0, 0, None, ClearValue::Color(value));
            }
        }
        if let Some(depth) = &begin.depth {
            let image = self.gpu.image(depth.texture)?;
            let mut image = image.write();
            match (depth.depth_load, depth.stencil_load) {
                (LoadOp::Clear(depth), LoadOp::Clear(stencil)) => {
                    image.clear(0, 0, None, ClearValue::DepthStencil { depth, stencil })
                }
                (LoadOp::Clear(depth), LoadOp::Load) => rewrite_depth_stencil(&mut image, |_, s| (depth, s)),
                (LoadOp::Load, LoadOp::Clear(stencil)) => rewrite_depth_stencil(&mut image, |d, _| (d, stencil)),
                (LoadOp::Load, LoadOp::Load) => {}
            }
        }
        self.bound.pass = Some(begin.clone());
        self.bound.viewport = None;
        self.bound.scissor = None;
        Ok(())
    }

    // --- Draws ---

    fn fetch_indices(&self, first: u32, count: u32, vertex_offset: i32) -> Result<Vec<u32>, SoftGpuError> {
        let Some((handle, offset, index_type)) = self.bound.index_buffer else {
            log::warn!("SoftGpu: '{}' indexed draw without an index buffer", self.label);
            return Ok(Vec::new());
        };
        let size = index_type.size() as u64;
        let buffer = self.gpu.buffer(handle)?;
        let memory = buffer.read();
        let bytes = memory.read(offset + first as u64 * size, count as u64 * size)?;
        let indices = match index_type {
            IndexType::UInt16 => bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as i64)
                .collect::<Vec<_>>(),
            IndexType::UInt32 => bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                .collect(),
        };
        Ok(indices
            .into_iter()
            .map(|i| (i + vertex_offset as i64).max(0) as u32)
            .collect())
    }

    fn indirect_args<T: bytemuck::Pod>(
        &self,
        buffer: ResourceHandle,
        offset: u64,
        count: u32,
        stride: u32,
    ) -> Result<Vec<T>, SoftGpuError> {
        let stride = if stride == 0 {
            std::mem::size_of::<T>() as u64
        } else {
            stride as u64
        };
        let buffer = self.gpu.buffer(buffer)?;
        let memory = buffer.read();
        (0..count as u64)
            .map(|i| memory.read_pod::<T>(offset + i * stride))
            .collect()
    }

    fn draw_indexed_indirect(
        &self,
        buffer: ResourceHandle,
        offset: u64,
        count: u32,
        stride: u32,
    ) -> Result<(), SoftGpuError> {
        for args in self.indirect_args::<DrawIndexedIndirectArgs>(buffer, offset, count, stride)? {
            let indices = self.fetch_indices(args.first_index, args.index_count, args.vertex_offset)?;
            let params = DrawParams {
                instance_count: args.instance_count,
                first_instance: args.first_instance,
                base_vertex: args.vertex_offset,
            };
            self.draw(&indices, params)?;
        }
        Ok(())
    }

    fn draw(&self, indices: &[u32], params: DrawParams) -> Result<(), SoftGpuError> {
        let (Some(pass), Some(graphics)) = (self.bound.pass.as_ref(), self.bound.graphics.as_ref()) else {
            log::warn!("SoftGpu: '{}' draw without a render pass or pipeline", self.label);
            return Ok(());
        };
        let state = &graphics.state;
        if let Some(expected) = &state.render_pass {
            let active = pass.layout();
            if !expected.is_compatible_with(&active) {
                log::warn!(
                    "SoftGpu: '{}' skipped a draw: pipeline '{}' expects {expected:?}, pass is {active:?}",
                    self.label,
                    state.label
                );
                return Ok(());
            }
        }
        let program = self
            .gpu
            .pipeline_program(graphics.pipeline, state.shader)
            .ok_or(SoftGpuError::UnknownHandle {
                kind: "shader",
                handle: state.shader,
            })?;
        let Some(vertex) = program
            .module(naga::ShaderStage::Vertex)
            .and_then(|m| Stage::new(m, naga::ShaderStage::Vertex))
        else {
            log::warn!("SoftGpu: pipeline '{}' has no vertex entry point", state.label);
            return Ok(());
        };
        let fragment = program
            .module(naga::ShaderStage::Fragment)
            .and_then(|m| Stage::new(m, naga::ShaderStage::Fragment));

        // Attachments are locked for writing; a texture that is also an attachment
        // of the pass is not sampled.
        let mut color_handles: Vec<ResourceHandle> = Vec::new();
        let mut slots = Vec::with_capacity(pass.color.len());
        for color in &pass.color {
            let index = match color_handles.iter().position(|h| *h == color.texture) {
                Some(index) => index,
                None => {
                    color_handles.push(color.texture);
                    color_handles.len() - 1
                }
            };
            slots.push(index);
        }
        let color_images = color_handles
            .iter()
            .map(|&h| self.gpu.image(h))
            .collect::<Result<Vec<SharedImage>, _>>()?;
        let depth_handle = pass.depth.as_ref().map(|d| d.texture);
        let depth_image = depth_handle.map(|h| self.gpu.image(h)).transpose()?;
        let mut modules = vec![vertex.module()];
        modules.extend(fragment.map(|f| f.module()));
        let sampled = self.sampled_images(&modules, &graphics.uniforms, |texture| {
            color_handles.contains(&texture) || depth_handle == Some(texture)
        })?;

        let mut color_guards: Vec<_> = color_images.iter().map(|image| image.write()).collect();
        let mut depth_guard = depth_image.as_ref().map(|image| image.write());
        let sampled_guards: BTreeMap<ResourceHandle, RwLockReadGuard<'_, Image>> =
            sampled.iter().map(|(h, image)| (*h, image.read())).collect();

        let mut vertex_resources = Resources::new(vertex.module());
        let vertex_writes = self.bind_memory(vertex.module(), &graphics.uniforms, &mut vertex_resources)?;
        self.bind_sampled(vertex.module(), &graphics.uniforms, &sampled_guards, &mut vertex_resources);
        let mut fragment_resources = fragment.map(|f| Resources::new(f.module()));
        let mut fragment_writes = Vec::new();
        if let (Some(stage), Some(resources)) = (fragment, fragment_resources.as_mut()) {
            fragment_writes = self.bind_memory(stage.module(), &graphics.uniforms, resources)?;
            self.bind_sampled(stage.module(), &graphics.uniforms, &sampled_guards, resources);
        }

        let outputs = vertex.outputs();
        let mut varyings: Vec<(u32, bool)> = outputs
            .iter()
            .filter_map(|(binding, ty)| match **binding {
                naga::Binding::Location { location, interpolation, .. } => Some((
                    location,
                    interpolation == Some(naga::Interpolation::Flat) || !interp::is_float(vertex.module(), *ty),
                )),
                naga::Binding::BuiltIn(_) => None,
            })
            .collect();
        varyings.sort_by_key(|(location, _)| *location);
        let locations: Vec<u32> = varyings.iter().map(|(l, _)| *l).collect();
        let flat: Vec<bool> = varyings.iter().map(|(_, f)| *f).collect();

        let mut targets = Targets {
            color: color_guards.iter_mut().map(|guard| &mut **guard).collect(),
            slots,
            depth: depth_guard.as_deref_mut(),
        };
        let draw_state = DrawState {
            rasterizer: &state.rasterizer,
            depth_stencil: &state.depth_stencil,
            blend: &state.blend,
            viewport: self
                .bound
                .viewport
                .unwrap_or_else(|| Viewport::new(0.0, 0.0, pass.width as f32, pass.height as f32)),
            scissor: self.bound.scissor,
            flat: &flat,
        };
        let mut shader = ProgramFragments {
            stage: fragment,
            resources: fragment_resources.as_mut(),
            locations: &locations,
        };
        let mut fragments = 0;
        for instance in 0..params.instance_count {
            let instance_index = params.first_instance.saturating_add(instance);
            let vertices = self.shade_vertices(
                graphics,
                vertex,
                &mut vertex_resources,
                indices,
                instance_index,
                params,
                &locations,
            )?;
            fragments += raster::draw(&mut targets, &draw_state, state.topology, &vertices, &mut shader)?;
        }

        // Each stage saw the buffers as they were before the draw; vertex writes land first.
        self.write_back(&vertex_resources, &vertex_writes)?;
        if let Some(resources) = &fragment_resources {
            self.write_back(resources, &fragment_writes)?;
        }
        self.gpu
            .executed()
            .record_draw(state.topology, indices.len() as u32, params.instance_count);
        log::trace!(
            "SoftGpu: '{}' drew {} vertices x{}, {fragments} fragments",
            self.label,
            indices.len(),
            params.instance_count
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn shade_vertices(
        &self,
        graphics: &BoundGraphics,
        stage: Stage<'_>,
        resources: &mut Resources<'_>,
        indices: &[u32],
        instance_index: u32,
        params: DrawParams,
        locations: &[u32],
    ) -> Result<Vec<Vertex>, SoftGpuError> {
        let module = stage.module();
        let layout = &graphics.state.layout;
        let stride = layout.stride() as u64;
        let needs_attributes = stage
            .arguments()
            .iter()
            .any(|a| matches!(a.binding, Some(naga::Binding::Location { .. })));
        let vertex_buffer = match self.bound.vertex_buffers.get(&0) {
            Some(&(handle, offset)) => Some((self.gpu.buffer(handle)?, offset)),
            None if needs_attributes => {
                log::warn!("SoftGpu: '{}' draw without a vertex buffer in slot 0", self.label);
                return Ok(Vec::new());
            }
            None => None,
        };
        let memory = vertex_buffer.as_ref().map(|(buffer, _)| buffer.read());
        let bytes = memory.as_ref().map_or(&[][..], |m| m.bytes());
        let base_offset = vertex_buffer.as_ref().map_or(0, |(_, offset)| *offset);

        let mut vertices = Vec::with_capacity(indices.len());
        for &index in indices {
            let base = base_offset + index as u64 * stride;
            let mut args = Vec::with_capacity(stage.arguments().len());
            for arg in stage.arguments() {
                let value = match arg.binding {
                    Some(naga::Binding::Location { location, .. }) => {
                        match attribute_for(&graphics.state.reflection.vertex_inputs, layout, location) {
                            Some(element) => interp::input_value(module, arg.ty, fetch(bytes, base, element)?, false),
                            None => interp::zero_value(module, arg.ty),
                        }
                    }
                    Some(naga::Binding::BuiltIn(builtin)) => {
                        let n = match builtin {
                            naga::BuiltIn::VertexIndex => index,
                            naga::BuiltIn::InstanceIndex => instance_index,
                            naga::BuiltIn::BaseVertex => params.base_vertex as u32,
                            naga::BuiltIn::BaseInstance => params.first_instance,
                            _ => 0,
                        };
                        index_value(module, arg.ty, n)
                    }
                    None => interp::zero_value(module, arg.ty),
                };
                args.push(value);
            }
            let mut vertex = Vertex {
                clip: [0.0, 0.0, 0.0, 1.0],
                varyings: vec![[0.0; 4]; locations.len()],
            };
            if let Outcome::Returned(Some(value)) = stage.run(resources, args)? {
                for (binding, value) in stage.split_outputs(value) {
                    match *binding {
                        naga::Binding::BuiltIn(naga::BuiltIn::Position { .. }) => vertex.clip = interp::pack_value(&value),
                        naga::Binding::Location { location, .. } => {
                            if let Some(k) = locations.iter().position(|&l| l == location) {
                                vertex.varyings[k] = interp::pack_value(&value);
                            }
                        }
                        _ => {}
                    }
                }
            }
            vertices.push(vertex);
        }
        Ok(vertices)
    }

    /// Backs the uniform and storage globals of `module` with copies of the bound
    /// buffers. Returns the writable storage globals and where they came from.
    fn bind_memory(
        &self,
        module: &naga::Module,
        uniforms: &UniformValues,
        resources: &mut Resources<'_>,
    ) -> Result<Vec<(naga::Handle<naga::GlobalVariable>, BufferBinding)>, SoftGpuError> {
        let mut writable = Vec::new();
        for (handle, var) in module.global_variables.iter() {
            let binding = var.binding.as_ref().map(|b| b.binding);
            match var.space {
                naga::AddressSpace::Uniform => {
                    let loose = module.types[var.ty]
                        .name
                        .as_deref()
                        .is_some_and(|name| name.starts_with(LOOSE_BLOCK_PREFIX));
                    let bound = binding.and_then(|b| self.bound.uniform_buffers.get(&b)).filter(|_| !loose);
                    let mut bytes = match bound {
                        Some(range) => range.bytes(&self.gpu.buffer(range.buffer)?.read())?,
                        None => Vec::new(),
                    };
                    let span = interp::type_size(module, var.ty) as usize;
                    if bytes.len() < span {
                        bytes.resize(span, 0);
                    }
                    if bound.is_none() {
                        fill_from_uniforms(module, var.ty, uniforms, &mut bytes)?;
                    }
                    resources.bind_memory(handle, bytes);
                }
                naga::AddressSpace::Storage { access } => {
                    let Some(range) = binding.and_then(|b| self.bound.storage_buffers.get(&b)) else {
                        continue;
                    };
                    resources.bind_memory(handle, range.bytes(&self.gpu.buffer(range.buffer)?.read())?);
                    if access.contains(naga::StorageAccess::STORE) {
                        writable.push((handle, *range));
                    }
                }
                _ => {}
            }
        }
        Ok(writable)
    }

    /// Distinct textures the image globals of `modules` sample, minus `excluded` ones.
    fn sampled_images(
        &self,
        modules: &[&naga::Module],
        uniforms: &UniformValues,
        excluded: impl Fn(ResourceHandle) -> bool,
    ) -> Result<BTreeMap<ResourceHandle, SharedImage>, SoftGpuError> {
        let mut images = BTreeMap::new();
        for module in modules {
            for (_, slot) in sampled_slots(module, uniforms) {
                let Some(&(texture, _)) = self.bound.textures.get(&slot) else {
                    continue;
                };
                if excluded(texture) {
                    log::debug!(
                        "SoftGpu: '{}' does not sample {texture:?}, it is an attachment of the pass",
                        self.label
                    );
                    continue;
                }
                if !images.contains_key(&texture) {
                    images.insert(texture, self.gpu.image(texture)?);
                }
            }
        }
        Ok(images)
    }

    fn bind_sampled<'i>(
        &self,
        module: &naga::Module,
        uniforms: &UniformValues,
        guards: &'i BTreeMap<ResourceHandle, RwLockReadGuard<'_, Image>>,
        resources: &mut Resources<'i>,
    ) {
        for (global, slot) in sampled_slots(module, uniforms) {
            let Some(&(texture, sampler)) = self.bound.textures.get(&slot) else {
                continue;
            };
            if let Some(guard) = guards.get(&texture) {
                resources.bind_image(global, ImageBinding::Sampled { image: &**guard, sampler });
            }
        }
    }

    fn write_back(
        &self,
        resources: &Resources<'_>,
        writes: &[(naga::Handle<naga::GlobalVariable>, BufferBinding)],
    ) -> Result<(), SoftGpuError> {
        for (global, range) in writes {
            if let Some(bytes) = resources.memory(*global) {
                self.gpu.buffer(range.buffer)?.write().write(range.offset, bytes)?;
            }
        }
        Ok(())
    }

    // --- Compute ---

    fn dispatch(&self, groups: [u32; 3]) -> Result<(), SoftGpuError> {
        let Some((pipeline, state)) = self.bound.compute.as_ref() else {
            log::warn!("SoftGpu: '{}' dispatch without a compute pipeline", self.label);
            return Ok(());
        };
        self.gpu.executed().record_dispatch();
        if groups.contains(&0) {
            return Ok(());
        }
        match &state.kernel {
            Some(kernel) => self.dispatch_kernel(state, &**kernel, groups),
            None => self.dispatch_program(*pipeline, state, groups),
        }
    }

    fn dispatch_kernel(
        &self,
        state: &ComputePipelineState,
        kernel: &dyn ComputeKernel,
        groups: [u32; 3],
    ) -> Result<(), SoftGpuError> {
        let mut storage = BTreeMap::new();
        for (&binding, range) in &self.bound.storage_buffers {
            let buffer = self.gpu.buffer(range.buffer)?;
            storage.insert(binding, range.bytes(&buffer.read())?);
        }
        let mut uniforms = BTreeMap::new();
        for (&binding, range) in &self.bound.uniform_buffers {
            let buffer = self.gpu.buffer(range.buffer)?;
            uniforms.insert(binding, range.bytes(&buffer.read())?);
        }
        let mut invocation = KernelInvocation::new(groups, state.work_group_size, storage, uniforms);
        kernel.execute(&mut invocation);
        for (binding, bytes) in invocation.into_storage() {
            if let Some(range) = self.bound.storage_buffers.get(&binding) {
                self.gpu.buffer(range.buffer)?.write().write(range.offset, &bytes)?;
            }
        }
        Ok(())
    }

    /// Runs the compute entry point once per invocation, one work group after another.
    fn dispatch_program(
        &self,
        pipeline: ResourceHandle,
        state: &ComputePipelineState,
        groups: [u32; 3],
    ) -> Result<(), SoftGpuError> {
        let program = self
            .gpu
            .pipeline_program(pipeline, state.shader)
            .ok_or(SoftGpuError::UnknownHandle {
                kind: "shader",
                handle: state.shader,
            })?;
        let Some(stage) = program
            .module(naga::ShaderStage::Compute)
            .and_then(|m| Stage::new(m, naga::ShaderStage::Compute))
        else {
            log::warn!("SoftGpu: pipeline '{}' has no compute entry point", state.label);
            return Ok(());
        };
        let module = stage.module();
        let uniforms = UniformValues::new();

        // Storage textures are written through one global each; sampled ones are shared.
        let mut storage_globals = Vec::new();
        for (global, var) in module.global_variables.iter() {
            let naga::TypeInner::Image { class, .. } = &module.types[var.ty].inner else {
                continue;
            };
            if !matches!(class, naga::ImageClass::Storage { .. }) {
                continue;
            }
            let Some(binding) = var.binding.as_ref() else {
                continue;
            };
            if let Some(&(texture, mip)) = self.bound.storage_textures.get(&binding.binding) {
                storage_globals.push((global, texture, mip));
            }
        }
        let mut storage_images = BTreeMap::new();
        for &(_, texture, _) in &storage_globals {
            if !storage_images.contains_key(&texture) {
                storage_images.insert(texture, self.gpu.image(texture)?);
            }
        }
        let sampled = self.sampled_images(&[module], &uniforms, |texture| storage_images.contains_key(&texture))?;
        let mut storage_guards: BTreeMap<ResourceHandle, RwLockWriteGuard<'_, Image>> =
            storage_images.iter().map(|(h, image)| (*h, image.write())).collect();
        let sampled_guards: BTreeMap<ResourceHandle, RwLockReadGuard<'_, Image>> =
            sampled.iter().map(|(h, image)| (*h, image.read())).collect();

        let mut resources = Resources::new(module);
        let writes = self.bind_memory(module, &uniforms, &mut resources)?;
        self.bind_sampled(module, &uniforms, &sampled_guards, &mut resources);
        for (texture, guard) in storage_guards.iter_mut() {
            if let Some(&(global, _, mip)) = storage_globals.iter().find(|(_, t, _)| t == texture) {
                resources.bind_image(global, ImageBinding::Storage { image: &mut **guard, mip });
            }
        }

        let size = stage.workgroup_size().map(|n| n.max(1));
        let uvec = |v: [u32; 3]| Value::Vector(v.iter().map(|&n| Value::U32(n)).collect());
        for gz in 0..groups[2] {
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    resources.reset_workgroup();
                    let group = [gx, gy, gz];
                    for lz in 0..size[2] {
                        for ly in 0..size[1] {
                            for lx in 0..size[0] {
                                let local = [lx, ly, lz];
                                let global = [0, 1, 2].map(|i| group[i] * size[i] + local[i]);
                                let args = stage
                                    .arguments()
                                    .iter()
                                    .map(|arg| match arg.binding {
                                        Some(naga::Binding::BuiltIn(builtin)) => match builtin {
                                            naga::BuiltIn::GlobalInvocationId => uvec(global),
                                            naga::BuiltIn::LocalInvocationId => uvec(local),
                                            naga::BuiltIn::LocalInvocationIndex => {
                                                Value::U32(lx + ly * size[0] + lz * size[0] * size[1])
                                            }
                                            naga::BuiltIn::WorkGroupId => uvec(group),
                                            naga::BuiltIn::NumWorkGroups => uvec(groups),
                                            naga::BuiltIn::WorkGroupSize => uvec(size),
                                            _ => interp::zero_value(module, arg.ty),
                                        },
                                        _ => interp::zero_value(module, arg.ty),
                                    })
                                    .collect();
                                stage.run(&mut resources, args)?;
                            }
                        }
                    }
                }
            }
        }
        self.write_back(&resources, &writes)?;
        log::trace!(
            "SoftGpu: '{}' ran '{}' over {groups:?} groups of {size:?}",
            self.label,
            state.label
        );
        Ok(())
    }

    // --- Barriers ---

    fn barriers(&mut self, barriers: &[ResourceBarrier]) {
        self.gpu.executed().record_barriers(barriers.len() as u64);
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        for barrier in barriers {
            let tracked = tracker.state_of(barrier.resource);
            if !tracker.transition(barrier) {
                self.gpu.executed().record_hazard();
                log::warn!(
                    "SoftGpu: '{}' hazard on {:?}: barrier expects {:?} but the resource is in {:?}",
                    self.label,
                    barrier.resource,
                    barrier.before,
                    tracked
                );
            }
        }
    }

    // --- Copies ---

    fn copy_texture(
        &self,
        src: ResourceHandle,
        src_region: &TextureRegion,
        dst: ResourceHandle,
        dst_region: &TextureRegion,
    ) -> Result<(), SoftGpuError> {
        let source = self.gpu.image(src)?;
        let target = self.gpu.image(dst)?;
        if Arc::ptr_eq(&source, &target) {
            let mut image = target.write();
            let bytes = image.read_region(src_region)?;
            return image.write_region(dst_region, &bytes);
        }
        let source = source.read();
        let mut target = target.write();
        if source.format() == target.format() && src_region.extent == dst_region.extent {
            let bytes = source.read_region(src_region)?;
            target.write_region(dst_region, &bytes)?;
        } else {
            blit_images(&source, src_region, &mut target, dst_region, false);
        }
        Ok(())
    }

    fn blit(
        &self,
        src: ResourceHandle,
        src_region: &TextureRegion,
        dst: ResourceHandle,
        dst_region: &TextureRegion,
        filter: TextureFilter,
    ) -> Result<(), SoftGpuError> {
        let linear = matches!(
            filter,
            TextureFilter::Linear | TextureFilter::LinearMipmapNearest | TextureFilter::LinearMipmapLinear
        );
        let source = self.gpu.image(src)?;
        let target = self.gpu.image(dst)?;
        if Arc::ptr_eq(&source, &target) {
            let snapshot = source.read().clone();
            blit_images(&snapshot, src_region, &mut target.write(), dst_region, linear);
        } else {
            blit_images(&source.read(), src_region, &mut target.write(), dst_region, linear);
        }
        Ok(())
    }
}

/// Feeds covered pixels through the fragment entry point.
struct ProgramFragments<'s, 'i> {
    stage: Option<Stage<'s>>,
    resources: Option<&'s mut Resources<'i>>,
    /// Output location of each varying slot.
    locations: &'s [u32],
}

impl FragmentStage for ProgramFragments<'_, '_> {
    fn shade(&mut self, input: &FragmentInput<'_>) -> Result<Option<FragmentOutput>, SoftGpuError> {
        let (Some(stage), Some(resources)) = (self.stage, self.resources.as_deref_mut()) else {
            return Ok(Some(FragmentOutput::default()));
        };
        let module = stage.module();
        let args = stage
            .arguments()
            .iter()
            .map(|arg| match arg.binding {
                Some(naga::Binding::Location { location, .. }) => {
                    match self.locations.iter().position(|&l| l == location) {
                        Some(k) => interp::input_value(module, arg.ty, input.varyings[k], false),
                        None => interp::zero_value(module, arg.ty),
                    }
                }
                Some(naga::Binding::BuiltIn(builtin)) => match builtin {
                    naga::BuiltIn::Position { .. } => interp::input_value(module, arg.ty, input.frag_coord, false),
                    naga::BuiltIn::FrontFacing => Value::Bool(input.front),
                    naga::BuiltIn::PointCoord => interp::input_value(module, arg.ty, [0.5, 0.5, 0.0, 1.0], false),
                    naga::BuiltIn::SampleMask => index_value(module, arg.ty, !0),
                    _ => interp::zero_value(module, arg.ty),
                },
                None => interp::zero_value(module, arg.ty),
            })
            .collect();
        let value = match stage.run(resources, args)? {
            Outcome::Discarded => return Ok(None),
            Outcome::Returned(None) => return Ok(Some(FragmentOutput::default())),
            Outcome::Returned(Some(value)) => value,
        };
        let mut output = FragmentOutput::default();
        for (binding, value) in stage.split_outputs(value) {
            match *binding {
                naga::Binding::Location { location, .. } => output.colors.push((location, interp::pack_value(&value))),
                naga::Binding::BuiltIn(naga::BuiltIn::FragDepth) => output.depth = Some(value.as_f32()?),
                _ => {}
            }
        }
        Ok(Some(output))
    }
}

/// Parameters of one draw besides its vertex indices.
#[derive(Debug, Clone, Copy, Default)]
struct DrawParams {
    instance_count: u32,
    first_instance: u32,
    base_vertex: i32,
}

/// Image globals read through a sampler, with the texture slot each reads from.
///
/// An integer uniform named after the global overrides its binding.
fn sampled_slots(module: &naga::Module, uniforms: &UniformValues) -> Vec<(naga::Handle<naga::GlobalVariable>, u32)> {
    module
        .global_variables
        .iter()
        .filter_map(|(handle, var)| {
            let naga::TypeInner::Image { class, .. } = &module.types[var.ty].inner else {
                return None;
            };
            if matches!(class, naga::ImageClass::Storage { .. }) {
                return None;
            }
            let from_uniform = var.name.as_ref().and_then(|name| match uniforms.get(name) {
                Some(UniformValue::Int(slot)) => u32::try_from(*slot).ok(),
                _ => None,
            });
            from_uniform
                .or_else(|| var.binding.as_ref().map(|b| b.binding))
                .map(|slot| (handle, slot))
        })
        .collect()
}

/// Writes the members of a uniform block that have a value in `uniforms`.
fn fill_from_uniforms(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    uniforms: &UniformValues,
    bytes: &mut [u8],
) -> Result<(), SoftGpuError> {
    let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner else {
        return Ok(());
    };
    for member in members {
        let Some(value) = member.name.as_ref().and_then(|name| uniforms.get(name)) else {
            continue;
        };
        let value = interp::uniform_value(module, member.ty, value);
        interp::store_memory(module, bytes, member.offset as u64, Layout::Type(member.ty), &value)?;
    }
    Ok(())
}

/// The layout element feeding input `location`, matched by reflected name first.
fn attribute_for<'l>(inputs: &[VertexInput], layout: &'l VertexLayout, location: u32) -> Option<&'l VertexElement> {
    let name = inputs.iter().find(|input| input.location == location).map(|input| input.name.as_str());
    name.and_then(|name| layout.elements().iter().find(|e| e.name == name))
        .or_else(|| layout.at_location(location))
}

/// An index-like builtin as the integer type the shader declared it with.
fn index_value(module: &naga::Module, ty: naga::Handle<naga::Type>, n: u32) -> Value {
    match module.types[ty].inner {
        naga::TypeInner::Scalar(naga::Scalar { kind: naga::ScalarKind::Sint, .. }) => Value::I32(n as i32),
        naga::TypeInner::Scalar(naga::Scalar { kind: naga::ScalarKind::Float, .. }) => Value::F32(n as f32),
        _ => Value::U32(n),
    }
}

fn rewrite_depth_stencil(image: &mut Image, f: impl Fn(f32, u8) -> (f32, u8)) {
    let e = image.mip_extent(0);
    for y in 0..e.height {
        for x in 0..e.width {
            let (depth, stencil) = f(image.depth_at(x, y), image.stencil_at(x, y));
            image.set_depth_stencil(x, y, depth, stencil);
        }
    }
}

/// Reads one vertex attribute as four floats; missing components read as `(0, 0, 0, 1)`.
fn fetch(bytes: &[u8], base: u64, element: &VertexElement) -> Result<[f32; 4], SoftGpuError> {
    let start = base + element.offset as u64;
    let size = element.data_type.size() as u64;
    let raw = bytes
        .get(start as usize..(start + size) as usize)
        .ok_or(SoftGpuError::OutOfRange {
            offset: start,
            size,
            len: bytes.len() as u64,
        })?;
    let mut out = [0.0, 0.0, 0.0, 1.0];
    let n = (element.data_type.component_count() as usize).min(4);
    let word = |i: usize| [raw[i * 4], raw[i * 4 + 1], raw[i * 4 + 2], raw[i * 4 + 3]];
    match element.data_type {
        DataType::None => {}
        DataType::Bool => out[0] = if raw[0] != 0 { 1.0 } else { 0.0 },
        DataType::Int | DataType::Int2 | DataType::Int3 | DataType::Int4 => {
            for (i, o) in out.iter_mut().enumerate().take(n) {
                let v = i32::from_le_bytes(word(i)) as f32;
                *o = if element.normalized { v / i32::MAX as f32 } else { v };
            }
        }
        DataType::UInt | DataType::UInt2 | DataType::UInt3 | DataType::UInt4 => {
            for (i, o) in out.iter_mut().enumerate().take(n) {
                let v = u32::from_le_bytes(word(i)) as f32;
                *o = if element.normalized { v / u32::MAX as f32 } else { v };
            }
        }
        _ => {
            for (i, o) in out.iter_mut().enumerate().take(n) {
                *o = f32::from_le_bytes(word(i));
            }
        }
    }
    Ok(out)
}

fn blit_images(src: &Image, src_region: &TextureRegion, dst: &mut Image, dst_region: &TextureRegion, linear: bool) {
    let s = src_region.extent;
    let d = dst_region.extent;
    if [s.width, s.height, s.depth, d.width, d.height, d.depth].contains(&0) {
        return;
    }
    let load = |x: u32, y: u32, z: u32| {
        src.load(
            src_region.mip_level,
            src_region.array_layer,
            src_region.origin.x + x,
            src_region.origin.y + y,
            src_region.origin.z + z,
        )
    };
    for z in 0..d.depth {
        let sz = (((z as f32 + 0.5) * s.depth as f32 / d.depth as f32) as u32).min(s.depth - 1);
        for y in 0..d.height {
            let v = (y as f32 + 0.5) * s.height as f32 / d.height as f32;
            for x in 0..d.width {
                let u = (x as f32 + 0.5) * s.width as f32 / d.width as f32;
                let color = if linear {
                    let fx = (u - 0.5).clamp(0.0, (s.width - 1) as f32);
                    let fy = (v - 0.5).clamp(0.0, (s.height - 1) as f32);
                    let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
                    let (x1, y1) = ((x0 + 1).min(s.width - 1), (y0 + 1).min(s.height - 1));
                    let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);
                    let top = LinearRgba::lerp(load(x0, y0, sz), load(x1, y0, sz), tx);
                    let bottom = LinearRgba::lerp(load(x0, y1, sz), load(x1, y1, sz), tx);
                    LinearRgba::lerp(top, bottom, ty)
                } else {
                    load(
                        (u as u32).min(s.width - 1),
                        (v as u32).min(s.height - 1),
                        sz,
                    )
                };
                dst.store(
                    dst_region.mip_level,
                    dst_region.array_layer,
                    dst_region.origin.x + x,
                    dst_region.origin.y + y,
                    dst_region.origin.z + z,
                    color,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunex_core::renderer::traits::ShaderStageSource;
    use lunex_core::renderer::{
        BlendState, BufferDesc, BufferType, BufferUsage, ColorAttachmentBinding, DepthAttachmentBinding,
        DepthStencilState, PrimitiveTopology, RasterizerState, ResourceState, ShaderStage, StoreOp,
        TextureDesc, TextureFormat, VertexLayout,
    };

    const FLAT_VS: &str = "#version 450\nlayout(location = 0) in vec3 a_Position;\nvoid main() { gl_Position = vec4(a_Position, 1.0); }\n";
    const FLAT_FS: &str = "#version 450\nuniform vec4 u_Color;\nlayout(location = 0) out vec4 o_Color;\nvoid main() { o_Color = u_Color; }\n";
    const COMPUTE: &str = "#version 450\nlayout(local_size_x = 4) in;\nlayout(std430, binding = 0) buffer Data { uint values[]; };\nvoid main() { values[gl_GlobalInvocationID.x] *= 2u; }\n";

    const SHADER: ResourceHandle = ResourceHandle::from_raw(1, 1);
    const PIPELINE: ResourceHandle = ResourceHandle::from_raw(2, 1);
    const TARGET: ResourceHandle = ResourceHandle::from_raw(3, 1);
    const DEPTH: ResourceHandle = ResourceHandle::from_raw(4, 1);
    const VERTICES: ResourceHandle = ResourceHandle::from_raw(5, 1);
    const INDICES: ResourceHandle = ResourceHandle::from_raw(6, 1);

    fn gpu_with_flat_pipeline(topology: PrimitiveTopology) -> Arc<SoftGpu> {
        gpu_with_pipeline(topology, FLAT_VS, FLAT_FS)
    }

    fn gpu_with_pipeline(topology: PrimitiveTopology, vs: &str, fs: &str) -> Arc<SoftGpu> {
        let gpu = Arc::new(SoftGpu::new());
        let stages = [
            ShaderStageSource { stage: ShaderStage::VERTEX, source: vs.into() },
            ShaderStageSource { stage: ShaderStage::FRAGMENT, source: fs.into() },
        ];
        let reflection = gpu.compile_shader(SHADER, "flat", &stages).unwrap();
        let state = GraphicsPipelineState {
            label: "flat".into(),
            shader: SHADER,
            reflection,
            layout: VertexLayout::new().push("a_Position", DataType::Float3, false),
            topology,
            rasterizer: RasterizerState::no_cull(),
            depth_stencil: DepthStencilState::default(),
            blend: BlendState::opaque(),
            render_pass: None,
        };
        gpu.create_graphics_pipeline(PIPELINE, Arc::new(state)).unwrap();
        gpu.create_image(TARGET, &TextureDesc::render_target(8, 8, TextureFormat::RGBA8))
            .unwrap();
        gpu.create_image(DEPTH, &TextureDesc::render_target(8, 8, TextureFormat::Depth24Stencil8))
            .unwrap();
        let triangle: [f32; 9] = [-1.0, -1.0, 0.0, 3.0, -1.0, 0.0, -1.0, 3.0, 0.0];
        let bytes = bytemuck::cast_slice(&triangle);
        let desc = BufferDesc::new(BufferType::Vertex, BufferUsage::Static, bytes.len() as u64);
        gpu.create_buffer(VERTICES, &desc, Some(bytes)).unwrap();
        gpu
    }

    fn pass(clear: LinearRgba) -> Command {
        Command::BeginRenderPass(RenderPassBegin {
            framebuffer: ResourceHandle::from_raw(9, 1),
            width: 8,
            height: 8,
            sample_count: 1,
            color: vec![ColorAttachmentBinding {
                texture: TARGET,
                format: TextureFormat::RGBA8,
                load: LoadOp::Clear(clear),
                store: StoreOp::Store,
            }],
            depth: Some(DepthAttachmentBinding {
                texture: DEPTH,
                format: TextureFormat::Depth24Stencil8,
                depth_load: LoadOp::Clear(1.0),
                stencil_load: LoadOp::Clear(0),
                store: StoreOp::Store,
            }),
        })
    }

    fn bind_red() -> Command {
        let mut uniforms = UniformValues::new();
        uniforms.insert("u_Color".into(), UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]));
        Command::BindGraphicsPipeline {
            pipeline: PIPELINE,
            uniforms: Arc::new(uniforms),
        }
    }

    fn pixel(gpu: &SoftGpu, x: u32, y: u32) -> LinearRgba {
        gpu.image(TARGET).unwrap().read().load(0, 0, x, y, 0)
    }

    fn buffer(label: &str, commands: Vec<Command>) -> CommandBuffer {
        CommandBuffer {
            label: label.into(),
            commands,
            executed_inline: false,
        }
    }

    #[test]
    fn fullscreen_triangle_takes_the_uniform_color() {
        let gpu = gpu_with_flat_pipeline(PrimitiveTopology::TriangleList);
        let mut executor = Executor::new(gpu.clone(), None);
        executor.run(&buffer(
            "frame",
            vec![
                pass(LinearRgba::BLUE),
                bind_red(),
                Command::SetVertexBuffer { slot: 0, buffer: VERTICES, offset: 0 },
                Command::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 },
                Command::EndRenderPass,
            ],
        ));
        assert_eq!(pixel(&gpu, 4, 4), LinearRgba::RED);
        let stats = gpu.executed().snapshot();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.triangles_drawn, 1);
        assert_eq!(stats.pipeline_state_changes, 1);
    }

    #[test]
    fn draw_outside_a_pass_does_nothing() {
        let gpu = gpu_with_flat_pipeline(PrimitiveTopology::TriangleList);
        let mut executor = Executor::new(gpu.clone(), None);
        executor.run(&buffer(
            "stray",
            vec![
                bind_red(),
                Command::SetVertexBuffer { slot: 0, buffer: VERTICES, offset: 0 },
                Command::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 },
            ],
        ));
        assert_eq!(pixel(&gpu, 4, 4), LinearRgba::TRANSPARENT);
        assert_eq!(gpu.executed().snapshot().draw_calls, 0);
    }

    #[test]
    fn indexed_draw_reads_u16_indices() {
        let gpu = gpu_with_flat_pipeline(PrimitiveTopology::TriangleList);
        let indices: [u16; 4] = [2, 1, 0, 0];
        let bytes = bytemuck::cast_slice(&indices);
        let desc = BufferDesc::new(BufferType::Index, BufferUsage::Static, bytes.len() as u64);
        gpu.create_buffer(INDICES, &desc, Some(bytes)).unwrap();
        let mut executor = Executor::new(gpu.clone(), None);
        executor.run(&buffer(
            "indexed",
            vec![
                pass(LinearRgba::BLACK),
                bind_red(),
                Command::SetVertexBuffer { slot: 0, buffer: VERTICES, offset: 0 },
                Command::SetIndexBuffer { buffer: INDICES, offset: 0, index_type: IndexType::UInt16 },
                Command::DrawIndexed {
                    index_count: 3,
                    instance_count: 1,
                    first_index: 0,
                    vertex_offset: 0,
                    first_instance: 0,
                },
                Command::EndRenderPass,
            ],
        ));
        assert_eq!(pixel(&gpu, 1, 6), LinearRgba::RED);
    }

    #[test]
    fn depth_only_clear_keeps_stencil() {
        let gpu = gpu_with_flat_pipeline(PrimitiveTopology::TriangleList);
        gpu.image(DEPTH).unwrap().write().set_depth_stencil(2, 2, 0.25, 7);
        let mut executor = Executor::new(gpu.clone(), None);
        let begin = RenderPassBegin {
            framebuffer: ResourceHandle::from_raw(9, 1),
            width: 8,
            height: 8,
            sample_count: 1,
            color: Vec::new(),
            depth: Some(DepthAttachmentBinding {
                texture: DEPTH,
                format: TextureFormat::Depth24Stencil8,
                depth_load: LoadOp::Clear(1.0),
                stencil_load: LoadOp::Load,
                store: StoreOp::Store,
            }),
        };
        executor.run(&buffer("depth", vec![Command::BeginRenderPass(begin), Command::EndRenderPass]));
        let image = gpu.image(DEPTH).unwrap();
        let image = image.read();
        assert!((image.depth_at(2, 2) - 1.0).abs() < 1e-6);
        assert_eq!(image.stencil_at(2, 2), 7);
    }

    #[test]
    fn kernel_dispatch_writes_storage_back() {
        let gpu = Arc::new(SoftGpu::new());
        let stages = [ShaderStageSource { stage: ShaderStage::COMPUTE, source: COMPUTE.into() }];
        gpu.compile_shader(SHADER, "double", &stages).unwrap();
        let kernel = |inv: &mut KernelInvocation| {
            let count = inv.invocation_count() as usize;
            if let Some(data) = inv.storage_mut(0) {
                for chunk in data.chunks_exact_mut(4).take(count) {
                    let v = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) * 2;
                    chunk.copy_from_slice(&v.to_le_bytes());
                }
            }
        };
        let state = ComputePipelineState {
            label: "double".into(),
            shader: SHADER,
            work_group_size: [4, 1, 1],
            kernel: Some(Arc::new(kernel)),
        };
        gpu.create_compute_pipeline(PIPELINE, Arc::new(state)).unwrap();
        let values: [u32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let bytes = bytemuck::cast_slice(&values);
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, bytes.len() as u64);
        gpu.create_buffer(VERTICES, &desc, Some(bytes)).unwrap();

        let mut executor = Executor::new(gpu.clone(), None);
        executor.run(&buffer(
            "compute",
            vec![
                Command::BindComputePipeline { pipeline: PIPELINE },
                Command::SetStorageBuffer { binding: 0, buffer: VERTICES, offset: 0, size: None },
                Command::Dispatch { x: 1, y: 1, z: 1 },
            ],
        ));
        let out = gpu.read_buffer(VERTICES, 0, 32).unwrap();
        let out: &[u32] = bytemuck::cast_slice(&out);
        assert_eq!(out, &[2, 4, 6, 8, 5, 6, 7, 8]);
        assert_eq!(gpu.executed().snapshot().dispatches, 1);
    }

    #[test]
    fn hazards_need_a_tracker() {
        let barriers = vec![
            ResourceBarrier { resource: TARGET, before: ResourceState::Undefined, after: ResourceState::RenderTarget },
            ResourceBarrier { resource: TARGET, before: ResourceState::CopySource, after: ResourceState::ShaderResource },
        ];
        let gpu = Arc::new(SoftGpu::new());
        let mut untracked = Executor::new(gpu.clone(), None);
        untracked.execute(&Command::ResourceBarriers(barriers.clone()));
        assert_eq!(gpu.executed().snapshot().hazards, 0);

        let mut tracked = Executor::new(gpu.clone(), Some(BarrierTracker::new()));
        tracked.execute(&Command::ResourceBarriers(barriers));
        let stats = gpu.executed().snapshot();
        assert_eq!(stats.barriers, 4);
        assert_eq!(stats.hazards, 1);
    }

    #[test]
    fn copies_and_clears_move_bytes() {
        let gpu = Arc::new(SoftGpu::new());
        let desc = BufferDesc::new(BufferType::Staging, BufferUsage::Staging, 16);
        gpu.create_buffer(VERTICES, &desc, None).unwrap();
        gpu.create_buffer(INDICES, &desc, None).unwrap();
        let mut executor = Executor::new(gpu.clone(), None);
        executor.execute(&Command::ClearBuffer { buffer: VERTICES, offset: 0, size: 8, value: 0x0101_0101 });
        executor.execute(&Command::CopyBuffer { src: VERTICES, src_offset: 4, dst: INDICES, dst_offset: 8, size: 4 });
        assert_eq!(gpu.read_buffer(INDICES, 8, 4).unwrap(), vec![1, 1, 1, 1]);
        assert_eq!(gpu.read_buffer(INDICES, 0, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn nearest_blit_upscales() {
        let gpu = Arc::new(SoftGpu::new());
        gpu.create_image(TARGET, &TextureDesc::texture_2d(2, 2, TextureFormat::RGBA8)).unwrap();
        gpu.create_image(DEPTH, &TextureDesc::texture_2d(4, 4, TextureFormat::RGBA8)).unwrap();
        gpu.image(TARGET).unwrap().write().store(0, 0, 1, 1, 0, LinearRgba::GREEN);
        let mut executor = Executor::new(gpu.clone(), None);
        executor.execute(&Command::BlitTexture {
            src: TARGET,
            src_region: TextureRegion::rect(0, 0, 2, 2),
            dst: DEPTH,
            dst_region: TextureRegion::rect(0, 0, 4, 4),
            filter: TextureFilter::Nearest,
        });
        let image = gpu.image(DEPTH).unwrap();
        let image = image.read();
        assert_eq!(image.load(0, 0, 3, 3, 0), LinearRgba::GREEN);
        assert_eq!(image.load(0, 0, 2, 2, 0), LinearRgba::GREEN);
        assert_eq!(image.load(0, 0, 1, 1, 0), LinearRgba::TRANSPARENT);
    }

    #[test]
    fn varyings_carry_vertex_outputs_to_fragments() {
        let vs = "#version 450\nlayout(location = 0) in vec3 a_Position;\nout vec4 v_Color;\nvoid main() { v_Color = vec4(0.0, 1.0, 0.0, 1.0); gl_Position = vec4(a_Position, 1.0); }\n";
        let fs = "#version 450\nin vec4 v_Color;\nout vec4 o_Color;\nvoid main() { o_Color = v_Color; }\n";
        let gpu = gpu_with_pipeline(PrimitiveTopology::TriangleList, vs, fs);
        let mut executor = Executor::new(gpu.clone(), None);
        executor.run(&buffer(
            "varyings",
            vec![
                pass(LinearRgba::BLUE),
                Command::BindGraphicsPipeline { pipeline: PIPELINE, uniforms: Arc::new(UniformValues::new()) },
                Command::SetVertexBuffer { slot: 0, buffer: VERTICES, offset: 0 },
                Command::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 },
                Command::EndRenderPass,
            ],
        ));
        assert_eq!(pixel(&gpu, 4, 4), LinearRgba::GREEN);
        assert_eq!(pixel(&gpu, 0, 0), LinearRgba::GREEN);
    }

    #[test]
    fn discarding_fragments_keep_the_clear_color() {
        let fs = "#version 450\nout vec4 o_Color;\nvoid main() { if (gl_FragCoord.x < 4.0) { discard; } o_Color = vec4(1.0, 0.0, 0.0, 1.0); }\n";
        let gpu = gpu_with_pipeline(PrimitiveTopology::TriangleList, FLAT_VS, fs);
        let mut executor = Executor::new(gpu.clone(), None);
        executor.run(&buffer(
            "discard",
            vec![
                pass(LinearRgba::BLUE),
                Command::BindGraphicsPipeline { pipeline: PIPELINE, uniforms: Arc::new(UniformValues::new()) },
                Command::SetVertexBuffer { slot: 0, buffer: VERTICES, offset: 0 },
                Command::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 },
                Command::EndRenderPass,
            ],
        ));
        assert_eq!(pixel(&gpu, 1, 4), LinearRgba::BLUE);
        assert_eq!(pixel(&gpu, 6, 4), LinearRgba::RED);
    }

    #[test]
    fn dispatch_without_a_kernel_runs_the_shader() {
        let gpu = Arc::new(SoftGpu::new());
        let stages = [ShaderStageSource { stage: ShaderStage::COMPUTE, source: COMPUTE.into() }];
        gpu.compile_shader(SHADER, "double", &stages).unwrap();
        let state = ComputePipelineState {
            label: "double".into(),
            shader: SHADER,
            work_group_size: [4, 1, 1],
            kernel: None,
        };
        gpu.create_compute_pipeline(PIPELINE, Arc::new(state)).unwrap();
        let values: [u32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let bytes = bytemuck::cast_slice(&values);
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, bytes.len() as u64);
        gpu.create_buffer(VERTICES, &desc, Some(bytes)).unwrap();

        let mut executor = Executor::new(gpu.clone(), None);
        executor.run(&buffer(
            "compute",
            vec![
                Command::BindComputePipeline { pipeline: PIPELINE },
                Command::SetStorageBuffer { binding: 0, buffer: VERTICES, offset: 0, size: None },
                Command::Dispatch { x: 2, y: 1, z: 1 },
            ],
        ));
        let out = gpu.read_buffer(VERTICES, 0, 32).unwrap();
        let out: &[u32] = bytemuck::cast_slice(&out);
        assert_eq!(out, &[2, 4, 6, 8, 10, 12, 14, 16]);
    }
}
