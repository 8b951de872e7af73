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

//! The device: capability table, statistics and the factory for every GPU resource.

use crate::renderer::api::{
    AllocationStatistics, BackendInfo, BufferDesc, BufferType, BufferUsage, DeviceCapabilities,
    IndexType, RenderStatistics, SamplerState, ShaderStage, StatsCounters, SubmissionModel,
    TextureDesc, TextureType, VertexLayout,
};
use crate::renderer::buffer::{Buffer, IndexBuffer, StorageBuffer, UniformBuffer, VertexBuffer};
use crate::renderer::command_list::CommandList;
use crate::renderer::command_pool::{CommandPool, CommandPoolConfig, ParallelCommandRecorder};
use crate::renderer::error::{RenderError, ResourceError};
use crate::renderer::framebuffer::{Framebuffer, FramebufferDesc};
use crate::renderer::handle::{HandleTable, ResourceHandle, ResourceKind};
use crate::renderer::pipeline::{
    ComputePipeline, ComputePipelineDesc, GraphicsPipeline, GraphicsPipelineDesc,
};
use crate::renderer::resource::{ResourceBase, ResourceOwner};
use crate::renderer::shader::Shader;
use crate::renderer::sync::{CommandQueue, Fence};
use crate::renderer::texture::{Sampler, Texture2D, Texture2DArray, Texture3D, TextureCube};
use crate::renderer::traits::{RenderBackend, ShaderStageSource};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// State shared by the device and every resource it created.
///
/// Resources keep this alive, so the backend outlives the last resource even if the
/// [`Device`] itself is dropped first.
pub(crate) struct DeviceShared {
    pub(crate) backend: Arc<dyn RenderBackend>,
    pub(crate) handles: HandleTable,
    pub(crate) recorded: StatsCounters,
    pub(crate) capabilities: DeviceCapabilities,
    pub(crate) info: BackendInfo,
    pub(crate) model: SubmissionModel,
    pub(crate) bound_framebuffer: Mutex<Option<ResourceHandle>>,
    frame_index: AtomicU64,
    in_frame: AtomicBool,
}

impl DeviceShared {
    /// Issues a handle, runs the backend constructor, and rolls the handle back on failure.
    pub(crate) fn register<F>(
        self: &Arc<Self>,
        kind: ResourceKind,
        bytes: u64,
        label: &str,
        create: F,
    ) -> Result<ResourceOwner, ResourceError>
    where
        F: FnOnce(ResourceHandle) -> Result<(), ResourceError>,
    {
        let handle = self.handles.insert(kind, bytes, label);
        match create(handle) {
            Ok(()) => {
                log::debug!("Device: created {kind:?} '{label}' {handle:?} ({bytes} bytes)");
                Ok(ResourceOwner::new(self.clone(), handle, kind))
            }
            Err(e) => {
                self.handles.release(handle);
                log::error!("Device: failed to create {kind:?} '{label}': {e}");
                Err(e)
            }
        }
    }

    /// Registers a resource that has no backend object (samplers, framebuffers, ...).
    pub(crate) fn register_plain(self: &Arc<Self>, kind: ResourceKind, label: &str) -> ResourceBase {
        let handle = self.handles.insert(kind, 0, label);
        ResourceBase::new(ResourceOwner::new(self.clone(), handle, kind), label)
    }

    /// Destroys the backend object behind `handle` and returns its bytes to the table.
    pub(crate) fn release(&self, handle: ResourceHandle, kind: ResourceKind) {
        match kind {
            ResourceKind::Buffer => self.backend.destroy_buffer(handle),
            ResourceKind::Texture => self.backend.destroy_texture(handle),
            ResourceKind::Shader => self.backend.destroy_shader(handle),
            ResourceKind::Pipeline => self.backend.destroy_pipeline(handle),
            ResourceKind::Framebuffer => {
                let mut bound = self.bound_framebuffer.lock();
                if *bound == Some(handle) {
                    *bound = None;
                }
            }
            ResourceKind::Sampler | ResourceKind::CommandList | ResourceKind::Fence => {}
        }
        match self.handles.release(handle) {
            Some(released) => log::debug!(
                "Device: released {:?} '{}' ({} bytes)",
                released.kind,
                released.label,
                released.bytes
            ),
            None => log::warn!("Device: release of stale handle {handle:?} ignored"),
        }
    }

    pub(crate) fn create_command_list(self: &Arc<Self>, label: &str) -> CommandList {
        CommandList::new(self, label)
    }

    pub(crate) fn create_fence(self: &Arc<Self>, signaled: bool) -> Fence {
        Fence::new(self.register_plain(ResourceKind::Fence, "Fence"), signaled)
    }

    /// Records a one-shot list, submits it and waits for it to finish.
    pub(crate) fn execute_immediate<F>(self: &Arc<Self>, label: &str, record: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut CommandList),
    {
        let mut list = self.create_command_list(label);
        list.begin();
        record(&mut list);
        list.end();
        let fence = self.create_fence(false);
        let buffer = list
            .executable_buffer()
            .ok_or_else(|| {
                RenderError::ResourceError(ResourceError::BackendError(format!(
                    "'{label}' did not finish recording"
                )))
            })?;
        let signal = fence.arm(None);
        self.backend.submit(vec![buffer], Some(signal))?;
        fence.wait(None);
        Ok(())
    }
}

impl fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceShared")
            .field("backend", &self.info.kind)
            .field("model", &self.model)
            .field("live_resources", &self.handles.live_count())
            .finish()
    }
}

/// The factory for every GPU resource and the owner of per-frame statistics.
///
/// A device is created by a [`Context`](crate::renderer::Context) and passed by
/// reference to every subsystem that needs GPU access. It holds the backend as a
/// dispatch table tagged with its [`SubmissionModel`]. Clones share the same backend.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
    queue: CommandQueue,
}

impl Device {
    /// Wraps a backend. Capabilities are queried once, here.
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        let capabilities = backend.capabilities();
        let info = backend.info();
        let model = backend.submission_model();
        log::info!(
            "Device: {} backend on '{}' ({} {}), submission model {:?}",
            info.kind,
            info.renderer,
            info.api_name,
            info.api_version,
            model
        );
        log::debug!("Device: capabilities {capabilities:?}");
        let shared = Arc::new(DeviceShared {
            backend,
            handles: HandleTable::new(),
            recorded: StatsCounters::new(),
            capabilities,
            info,
            model,
            bound_framebuffer: Mutex::new(None),
            frame_index: AtomicU64::new(0),
            in_frame: AtomicBool::new(false),
        });
        let queue = CommandQueue::new(shared.clone());
        Self { shared, queue }
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    // --- Queries ---

    /// The capability table.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.shared.capabilities
    }

    /// Backend identification.
    pub fn info(&self) -> &BackendInfo {
        &self.shared.info
    }

    /// How command lists reach the device.
    pub fn submission_model(&self) -> SubmissionModel {
        self.shared.model
    }

    /// Work recorded during the current frame.
    pub fn statistics(&self) -> RenderStatistics {
        self.shared.recorded.snapshot()
    }

    /// Work the backend actually executed during the current frame.
    pub fn executed_statistics(&self) -> RenderStatistics {
        self.shared.backend.executed_statistics().snapshot()
    }

    /// Live allocation totals.
    pub fn allocation_statistics(&self) -> AllocationStatistics {
        self.shared.handles.statistics()
    }

    /// Number of frames begun so far.
    pub fn frame_index(&self) -> u64 {
        self.shared.frame_index.load(Ordering::Relaxed)
    }

    /// `true` if `handle` refers to a live resource of this device.
    pub fn is_alive(&self, handle: ResourceHandle) -> bool {
        self.shared.handles.is_alive(handle)
    }

    /// The framebuffer currently bound as global state, if any.
    pub fn bound_framebuffer(&self) -> Option<ResourceHandle> {
        *self.shared.bound_framebuffer.lock()
    }

    // --- Frame ---

    /// Starts a frame: resets both statistics sets.
    pub fn begin_frame(&self) {
        if self.shared.in_frame.swap(true, Ordering::AcqRel) {
            log::warn!("Device: begin_frame called twice without end_frame");
        }
        self.shared.frame_index.fetch_add(1, Ordering::Relaxed);
        self.shared.recorded.reset();
        self.shared.backend.executed_statistics().reset();
    }

    /// Ends a frame.
    pub fn end_frame(&self) {
        if !self.shared.in_frame.swap(false, Ordering::AcqRel) {
            log::warn!("Device: end_frame called without begin_frame");
        }
        log::trace!(
            "Device: frame {} recorded {:?}",
            self.frame_index(),
            self.statistics()
        );
    }

    /// Blocks until every submitted batch has executed.
    pub fn wait_idle(&self) {
        self.shared.backend.wait_idle();
    }

    /// The device's submission queue.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Returns a handle to the device's submission queue.
    pub fn create_command_queue(&self) -> CommandQueue {
        self.queue.clone()
    }

    /// Records a one-shot command list, submits it and waits for it.
    pub fn execute_immediate<F>(&self, label: &str, record: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut CommandList),
    {
        self.shared.execute_immediate(label, record)
    }

    // --- Buffers ---

    /// Creates a buffer, optionally filled with `data`.
    pub fn create_buffer(&self, desc: BufferDesc, data: Option<&[u8]>) -> Result<Buffer, ResourceError> {
        Buffer::create(&self.shared, desc, data)
    }

    /// Creates a vertex buffer from raw vertex bytes.
    pub fn create_vertex_buffer(
        &self,
        data: &[u8],
        layout: VertexLayout,
        usage: BufferUsage,
    ) -> Result<VertexBuffer, ResourceError> {
        let desc = BufferDesc::new(BufferType::Vertex, usage, data.len() as u64)
            .with_stride(layout.stride())
            .with_label("VertexBuffer");
        let buffer = Buffer::create(&self.shared, desc, Some(data))?;
        Ok(VertexBuffer::new(buffer, layout))
    }

    /// Creates a 32-bit index buffer.
    pub fn create_index_buffer(&self, indices: &[u32], usage: BufferUsage) -> Result<IndexBuffer, ResourceError> {
        self.create_index_buffer_raw(bytemuck::cast_slice(indices), IndexType::UInt32, usage)
    }

    /// Creates a 16-bit index buffer.
    pub fn create_index_buffer_u16(&self, indices: &[u16], usage: BufferUsage) -> Result<IndexBuffer, ResourceError> {
        self.create_index_buffer_raw(bytemuck::cast_slice(indices), IndexType::UInt16, usage)
    }

    fn create_index_buffer_raw(
        &self,
        data: &[u8],
        index_type: IndexType,
        usage: BufferUsage,
    ) -> Result<IndexBuffer, ResourceError> {
        let desc = BufferDesc::new(BufferType::Index, usage, data.len() as u64)
            .with_stride(index_type.size())
            .with_label("IndexBuffer");
        let buffer = Buffer::create(&self.shared, desc, Some(data))?;
        Ok(IndexBuffer::new(buffer, index_type))
    }

    /// Creates a dynamic uniform buffer of `size` bytes bound to `binding`.
    pub fn create_uniform_buffer(&self, size: u64, binding: u32) -> Result<UniformBuffer, ResourceError> {
        if size > self.shared.capabilities.max_uniform_buffer_size {
            let err = ResourceError::InvalidDescriptor(format!(
                "uniform buffer of {size} bytes exceeds the {} byte limit",
                self.shared.capabilities.max_uniform_buffer_size
            ));
            log::error!("Device: {err}");
            return Err(err);
        }
        let desc = BufferDesc::new(BufferType::Uniform, BufferUsage::Dynamic, size).with_label("UniformBuffer");
        let buffer = Buffer::create(&self.shared, desc, None)?;
        Ok(UniformBuffer::new(buffer, binding))
    }

    /// Creates a storage buffer of `element_count` elements of `element_stride` bytes.
    pub fn create_storage_buffer(
        &self,
        element_count: u32,
        element_stride: u32,
        data: Option<&[u8]>,
        usage: BufferUsage,
    ) -> Result<StorageBuffer, ResourceError> {
        let size = element_count as u64 * element_stride as u64;
        let desc = BufferDesc::new(BufferType::Storage, usage, size)
            .with_stride(element_stride)
            .with_label("StorageBuffer");
        let buffer = Buffer::create(&self.shared, desc, data)?;
        Ok(StorageBuffer::new(buffer, element_count))
    }

    // --- Textures ---

    /// Creates a 2D texture.
    pub fn create_texture_2d(&self, desc: TextureDesc) -> Result<Texture2D, ResourceError> {
        Texture2D::create(&self.shared, TextureDesc { ty: TextureType::Texture2D, ..desc })
    }

    /// Creates a cube map.
    pub fn create_texture_cube(&self, desc: TextureDesc) -> Result<TextureCube, ResourceError> {
        TextureCube::create(&self.shared, desc)
    }

    /// Creates a 2D array texture.
    pub fn create_texture_2d_array(&self, desc: TextureDesc) -> Result<Texture2DArray, ResourceError> {
        Texture2DArray::create(&self.shared, desc)
    }

    /// Creates a volume texture.
    pub fn create_texture_3d(&self, desc: TextureDesc) -> Result<Texture3D, ResourceError> {
        Texture3D::create(&self.shared, desc)
    }

    /// Creates a sampler.
    pub fn create_sampler(&self, state: SamplerState) -> Result<Sampler, ResourceError> {
        Sampler::create(&self.shared, state)
    }

    // --- Shaders & pipelines ---

    /// Compiles a shader from one source with `#type <stage>` section markers.
    pub fn create_shader(&self, label: &str, source: &str) -> Result<Shader, ResourceError> {
        Shader::from_source(&self.shared, label, source)
    }

    /// Same as [`Device::create_shader`]; named after the single-source form it takes.
    pub fn create_shader_from_source(&self, label: &str, source: &str) -> Result<Shader, ResourceError> {
        self.create_shader(label, source)
    }

    /// Compiles a shader from explicit per-stage sources.
    pub fn create_shader_from_stages(
        &self,
        label: &str,
        stages: &[(ShaderStage, &str)],
    ) -> Result<Shader, ResourceError> {
        let stages = stages
            .iter()
            .map(|(stage, source)| ShaderStageSource {
                stage: *stage,
                source: (*source).to_owned(),
            })
            .collect();
        Shader::create(&self.shared, label, stages, None)
    }

    /// Reads and compiles an annotated shader file. The path is kept for `reload`.
    pub fn create_shader_from_file(&self, path: impl AsRef<Path>) -> Result<Shader, ResourceError> {
        Shader::from_file(&self.shared, path.as_ref())
    }

    /// Creates a graphics pipeline.
    pub fn create_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<GraphicsPipeline, ResourceError> {
        GraphicsPipeline::create(&self.shared, desc)
    }

    /// Creates a compute pipeline.
    pub fn create_compute_pipeline(&self, desc: ComputePipelineDesc) -> Result<ComputePipeline, ResourceError> {
        ComputePipeline::create(&self.shared, desc)
    }

    // --- Framebuffers, commands, sync ---

    /// Creates a framebuffer, allocating textures for attachments without one.
    pub fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Framebuffer, ResourceError> {
        Framebuffer::create(&self.shared, desc)
    }

    /// Creates a command list in the Initial state.
    pub fn create_command_list(&self, label: &str) -> CommandList {
        self.shared.create_command_list(label)
    }

    /// Creates a fence.
    pub fn create_fence(&self, signaled: bool) -> Fence {
        self.shared.create_fence(signaled)
    }

    /// Creates a command pool.
    pub fn create_command_pool(&self, config: CommandPoolConfig) -> CommandPool {
        CommandPool::new(self, config)
    }

    /// Creates a parallel recorder with `worker_count` workers (or one per spare core).
    pub fn create_parallel_recorder(&self, worker_count: Option<usize>) -> ParallelCommandRecorder {
        ParallelCommandRecorder::new(self, worker_count)
    }

    /// Drains outstanding work and stops backend threads. Called by the context.
    pub(crate) fn shutdown(&self) {
        self.shared.backend.wait_idle();
        self.shared.backend.shutdown();
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("shared", &self.shared).finish()
    }
}
