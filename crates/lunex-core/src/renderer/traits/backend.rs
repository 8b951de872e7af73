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

//! Defines the dispatch table every backend implements.

use crate::renderer::api::{
    BackendInfo, BackendKind, BlendState, BufferDesc, Command, CommandBuffer, DepthStencilState,
    DeviceCapabilities, PrimitiveTopology, RasterizerState, RenderPassLayout, ShaderReflection,
    ShaderStage, StatsCounters, SubmissionModel, TextureDesc, TextureRegion, VertexLayout,
};
use crate::renderer::error::{PipelineError, RenderError, ResourceError, ShaderError};
use crate::renderer::handle::ResourceHandle;
use crate::renderer::sync::FenceSignal;
use crate::renderer::traits::ComputeKernel;
use crate::renderer::ContextDesc;
use std::fmt;
use std::sync::Arc;

/// The source of one shader stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageSource {
    /// The stage.
    pub stage: ShaderStage,
    /// GLSL source text.
    pub source: String,
}

/// The immutable state a backend keeps for a graphics pipeline.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineState {
    /// Debug label.
    pub label: String,
    /// The shader program handle.
    pub shader: ResourceHandle,
    /// The shader's reflection at pipeline creation.
    pub reflection: ShaderReflection,
    /// Vertex layout of slot 0.
    pub layout: VertexLayout,
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
    /// Rasterizer state.
    pub rasterizer: RasterizerState,
    /// Depth/stencil state.
    pub depth_stencil: DepthStencilState,
    /// Blend state.
    pub blend: BlendState,
    /// Attachment formats the pipeline targets, when known up front.
    pub render_pass: Option<RenderPassLayout>,
}

/// The immutable state a backend keeps for a compute pipeline.
#[derive(Clone)]
pub struct ComputePipelineState {
    /// Debug label.
    pub label: String,
    /// The shader program handle.
    pub shader: ResourceHandle,
    /// Local work-group size from reflection.
    pub work_group_size: [u32; 3],
    /// CPU kernel run per dispatch, if any.
    pub kernel: Option<Arc<dyn ComputeKernel>>,
}

impl fmt::Debug for ComputePipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputePipelineState")
            .field("label", &self.label)
            .field("shader", &self.shader)
            .field("work_group_size", &self.work_group_size)
            .field("has_kernel", &self.kernel.is_some())
            .finish()
    }
}

/// A per-command-list recording target provided by the backend.
///
/// The core [`CommandList`](crate::renderer::CommandList) has already validated the
/// state machine before calling into the sink, so sinks never see misuse.
pub trait CommandSink: Send + fmt::Debug {
    /// Starts a recording session.
    fn begin(&mut self);

    /// Accepts one validated command.
    fn record(&mut self, command: Command);

    /// Ends the session and returns what must be handed to [`RenderBackend::submit`].
    fn finish(&mut self) -> CommandBuffer;

    /// Discards anything recorded.
    fn reset(&mut self);
}

/// The per-backend dispatch table behind a [`Device`](crate::renderer::Device).
///
/// Resources are identified by handles issued by the device's handle table; a backend
/// only stores backing memory and derived objects keyed by those handles. Every method
/// takes `&self` and must be callable from any thread, even if the backend then refuses
/// work from the wrong thread.
pub trait RenderBackend: Send + Sync + fmt::Debug {
    /// Identification of the backend.
    fn info(&self) -> BackendInfo;

    /// How command lists reach the device.
    fn submission_model(&self) -> SubmissionModel;

    /// Limits and features, queried once by the device.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Counters advanced when work actually executes.
    fn executed_statistics(&self) -> &StatsCounters;

    // --- Buffers ---

    /// Allocates backing memory for a buffer, optionally filled with `initial_data`.
    fn create_buffer(
        &self,
        handle: ResourceHandle,
        desc: &BufferDesc,
        initial_data: Option<&[u8]>,
    ) -> Result<(), ResourceError>;

    /// Writes `data` at `offset`. `staged` requests an ordered copy through the queue.
    fn write_buffer(
        &self,
        handle: ResourceHandle,
        offset: u64,
        data: &[u8],
        staged: bool,
    ) -> Result<(), ResourceError>;

    /// Reads `size` bytes at `offset`, waiting for pending writes first.
    fn read_buffer(
        &self,
        handle: ResourceHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, ResourceError>;

    /// Frees a buffer's backing memory.
    fn destroy_buffer(&self, handle: ResourceHandle);

    // --- Textures ---

    /// Allocates an image with every mip and layer of `desc`.
    fn create_texture(&self, handle: ResourceHandle, desc: &TextureDesc)
        -> Result<(), ResourceError>;

    /// Uploads tightly packed texels into `region`.
    fn write_texture(
        &self,
        handle: ResourceHandle,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), ResourceError>;

    /// Reads `region` back as tightly packed texels.
    fn read_texture(
        &self,
        handle: ResourceHandle,
        region: &TextureRegion,
    ) -> Result<Vec<u8>, ResourceError>;

    /// Regenerates mips 1.. from mip 0.
    fn generate_mipmaps(&self, handle: ResourceHandle) -> Result<(), ResourceError>;

    /// Frees an image.
    fn destroy_texture(&self, handle: ResourceHandle);

    // --- Shaders & pipelines ---

    /// Compiles and links `stages`, storing the program under `handle`.
    ///
    /// On failure any program previously stored under `handle` must stay untouched.
    fn compile_shader(
        &self,
        handle: ResourceHandle,
        label: &str,
        stages: &[ShaderStageSource],
    ) -> Result<ShaderReflection, ShaderError>;

    /// Frees a compiled program.
    fn destroy_shader(&self, handle: ResourceHandle);

    /// Builds a graphics pipeline object.
    fn create_graphics_pipeline(
        &self,
        handle: ResourceHandle,
        state: Arc<GraphicsPipelineState>,
    ) -> Result<(), PipelineError>;

    /// Builds a compute pipeline object.
    fn create_compute_pipeline(
        &self,
        handle: ResourceHandle,
        state: Arc<ComputePipelineState>,
    ) -> Result<(), PipelineError>;

    /// Frees a pipeline object.
    fn destroy_pipeline(&self, handle: ResourceHandle);

    // --- Submission ---

    /// Creates a recording target for one command list.
    fn create_command_sink(&self, label: &str) -> Box<dyn CommandSink>;

    /// Submits finished command buffers as one batch, signaling `signal` once all of
    /// them have executed.
    fn submit(
        &self,
        buffers: Vec<Arc<CommandBuffer>>,
        signal: Option<FenceSignal>,
    ) -> Result<(), RenderError>;

    /// Blocks until every submitted batch has executed.
    fn wait_idle(&self);

    /// Drains outstanding work and stops any backend threads.
    fn shutdown(&self);
}

/// Brings up backends for a [`Context`](crate::renderer::Context).
pub trait BackendFactory {
    /// Creates the backend described by `desc`.
    fn create_backend(&self, desc: &ContextDesc) -> Result<Arc<dyn RenderBackend>, RenderError>;

    /// `true` if `kind` can be created on this platform.
    fn is_backend_supported(&self, kind: BackendKind) -> bool;
}
