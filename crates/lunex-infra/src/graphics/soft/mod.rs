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

//! The software GPU shared by both backends.
//!
//! [`SoftGpu`] owns device memory and every derived object (compiled programs,
//! pipeline objects), keyed by the handles the core device issues. The backends only
//! decide *when* work reaches it: inline on the render thread, or from a queue thread.

pub mod error;
pub mod executor;
pub mod interp;
pub mod memory;
pub mod raster;
pub mod sampler;
pub mod shader;
pub mod tracker;

use self::error::SoftGpuError;
use self::memory::{BufferMemory, Image};
use self::shader::CompiledProgram;
use lunex_core::renderer::traits::{ComputePipelineState, GraphicsPipelineState, ShaderStageSource};
use lunex_core::renderer::{
    BufferDesc, DeviceCapabilities, PipelineError, ResourceError, ResourceHandle, ShaderError,
    ShaderReflection, ShaderStage, StatsCounters, TextureDesc, TextureRegion,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared buffer memory.
pub type SharedBuffer = Arc<RwLock<BufferMemory>>;
/// Shared image memory.
pub type SharedImage = Arc<RwLock<Image>>;

/// Device memory, programs and pipeline objects of the software GPU.
#[derive(Debug)]
pub struct SoftGpu {
    capabilities: DeviceCapabilities,
    buffers: RwLock<HashMap<ResourceHandle, SharedBuffer>>,
    images: RwLock<HashMap<ResourceHandle, SharedImage>>,
    programs: RwLock<HashMap<ResourceHandle, Arc<CompiledProgram>>>,
    graphics_pipelines: RwLock<HashMap<ResourceHandle, Arc<GraphicsPipelineState>>>,
    compute_pipelines: RwLock<HashMap<ResourceHandle, Arc<ComputePipelineState>>>,
    /// Program each pipeline was created from; outlives a destroyed shader.
    pipeline_programs: RwLock<HashMap<ResourceHandle, Arc<CompiledProgram>>>,
    executed: StatsCounters,
}

impl Default for SoftGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftGpu {
    /// Creates an empty device.
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities::default(),
            buffers: RwLock::new(HashMap::new()),
            images: RwLock::new(HashMap::new()),
            programs: RwLock::new(HashMap::new()),
            graphics_pipelines: RwLock::new(HashMap::new()),
            compute_pipelines: RwLock::new(HashMap::new()),
            pipeline_programs: RwLock::new(HashMap::new()),
            executed: StatsCounters::new(),
        }
    }

    /// Limits and features of the software GPU.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Counters advanced as work executes.
    pub fn executed(&self) -> &StatsCounters {
        &self.executed
    }

    // --- Buffers ---

    /// Allocates buffer memory, optionally initialized.
    pub fn create_buffer(
        &self,
        handle: ResourceHandle,
        desc: &BufferDesc,
        initial: Option<&[u8]>,
    ) -> Result<(), ResourceError> {
        if let Some(data) = initial {
            if data.len() as u64 > desc.size {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "{} bytes of initial data for the {}-byte buffer '{}'",
                    data.len(),
                    desc.size,
                    desc.label
                )));
            }
            self.executed.record_upload(data.len() as u64);
        }
        if desc.size > self.capabilities.max_buffer_size {
            return Err(ResourceError::InvalidDescriptor(format!(
                "buffer '{}' asks for {} bytes, the device allows {}",
                desc.label, desc.size, self.capabilities.max_buffer_size
            )));
        }
        let memory = BufferMemory::new(desc.size, initial).map_err(|e| {
            log::error!("SoftGpu: buffer '{}' could not be allocated: {e}", desc.label);
            ResourceError::from(e)
        })?;
        self.buffers
            .write()
            .insert(handle, Arc::new(RwLock::new(memory)));
        log::trace!("SoftGpu: allocated buffer '{}' ({} bytes) as {handle:?}", desc.label, desc.size);
        Ok(())
    }

    /// Looks up the memory of a buffer.
    pub fn buffer(&self, handle: ResourceHandle) -> Result<SharedBuffer, SoftGpuError> {
        self.buffers
            .read()
            .get(&handle)
            .cloned()
            .ok_or(SoftGpuError::UnknownHandle { kind: "buffer", handle })
    }

    /// Writes `data` at `offset` and counts the upload.
    pub fn write_buffer(&self, handle: ResourceHandle, offset: u64, data: &[u8]) -> Result<(), SoftGpuError> {
        self.buffer(handle)?.write().write(offset, data)?;
        self.executed.record_upload(data.len() as u64);
        Ok(())
    }

    /// Copies `size` bytes out of a buffer.
    pub fn read_buffer(&self, handle: ResourceHandle, offset: u64, size: u64) -> Result<Vec<u8>, SoftGpuError> {
        let buffer = self.buffer(handle)?;
        let memory = buffer.read();
        Ok(memory.read(offset, size)?.to_vec())
    }

    /// Fails the way a write of `size` bytes at `offset` would, without writing.
    pub fn validate_buffer_range(&self, handle: ResourceHandle, offset: u64, size: u64) -> Result<(), SoftGpuError> {
        self.buffer(handle)?.read().read(offset, size).map(|_| ())
    }

    /// Frees a buffer. Unknown handles are ignored.
    pub fn destroy_buffer(&self, handle: ResourceHandle) {
        self.buffers.write().remove(&handle);
    }

    // --- Images ---

    /// Allocates an image for every mip and layer of `desc`.
    pub fn create_image(&self, handle: ResourceHandle, desc: &TextureDesc) -> Result<(), ResourceError> {
        let image = Image::new(desc).map_err(|e| {
            log::error!("SoftGpu: cannot allocate '{}': {e}", desc.label);
            ResourceError::from(e)
        })?;
        log::trace!(
            "SoftGpu: allocated {:?} image '{}' ({} bytes) as {handle:?}",
            desc.format,
            desc.label,
            image.byte_size()
        );
        self.images.write().insert(handle, Arc::new(RwLock::new(image)));
        Ok(())
    }

    /// Looks up the memory of an image.
    pub fn image(&self, handle: ResourceHandle) -> Result<SharedImage, SoftGpuError> {
        self.images
            .read()
            .get(&handle)
            .cloned()
            .ok_or(SoftGpuError::UnknownHandle { kind: "image", handle })
    }

    /// Uploads texels into a region.
    pub fn write_image(&self, handle: ResourceHandle, region: &TextureRegion, data: &[u8]) -> Result<(), SoftGpuError> {
        self.image(handle)?.write().write_region(region, data)
    }

    /// Fails the way an upload of `len` bytes into `region` would, without writing.
    pub fn validate_image_write(&self, handle: ResourceHandle, region: &TextureRegion, len: usize) -> Result<(), SoftGpuError> {
        self.image(handle)?.read().check_upload(region, len).map(|_| ())
    }

    /// Reads a region back as packed texels.
    pub fn read_image(&self, handle: ResourceHandle, region: &TextureRegion) -> Result<Vec<u8>, SoftGpuError> {
        self.image(handle)?.read().read_region(region)
    }

    /// Rebuilds the mip chain of an image.
    pub fn generate_mipmaps(&self, handle: ResourceHandle) -> Result<(), SoftGpuError> {
        self.image(handle)?.write().generate_mipmaps();
        Ok(())
    }

    /// Frees an image. Unknown handles are ignored.
    pub fn destroy_image(&self, handle: ResourceHandle) {
        self.images.write().remove(&handle);
    }

    // --- Programs ---

    /// Compiles `stages` and stores the program under `handle`.
    ///
    /// A failed compile leaves the previously stored program in place.
    pub fn compile_shader(
        &self,
        handle: ResourceHandle,
        label: &str,
        stages: &[ShaderStageSource],
    ) -> Result<ShaderReflection, ShaderError> {
        let program = shader::compile_program(label, stages).map_err(|e| {
            log::error!("SoftGpu: shader '{label}' failed to compile: {e}");
            e
        })?;
        let reflection = program.reflection.clone();
        let replaced = self.programs.write().insert(handle, Arc::new(program)).is_some();
        log::debug!(
            "SoftGpu: {} shader '{label}' ({} stage(s))",
            if replaced { "recompiled" } else { "compiled" },
            stages.len()
        );
        Ok(reflection)
    }

    /// The compiled program stored under `handle`.
    pub fn program(&self, handle: ResourceHandle) -> Option<Arc<CompiledProgram>> {
        self.programs.read().get(&handle).cloned()
    }

    /// Frees a program.
    pub fn destroy_shader(&self, handle: ResourceHandle) {
        self.programs.write().remove(&handle);
    }

    // --- Pipelines ---

    /// Validates and stores a graphics pipeline object.
    pub fn create_graphics_pipeline(
        &self,
        handle: ResourceHandle,
        state: Arc<GraphicsPipelineState>,
    ) -> Result<(), PipelineError> {
        let program = self.program(state.shader).ok_or_else(|| PipelineError::InvalidShader {
            pipeline_label: state.label.clone(),
        })?;
        if !program.stages.contains(ShaderStage::VERTEX) {
            return Err(PipelineError::MissingVertexStage {
                pipeline_label: state.label.clone(),
            });
        }
        if let Some(pass) = &state.render_pass {
            if pass.color_formats.len() as u32 > self.capabilities.max_color_attachments {
                return Err(PipelineError::IncompatibleRenderTarget(format!(
                    "'{}' targets {} color attachments",
                    state.label,
                    pass.color_formats.len()
                )));
            }
            if let Some(bad) = pass
                .color_formats
                .iter()
                .find(|f| f.is_depth() || f.is_compressed())
            {
                return Err(PipelineError::IncompatibleRenderTarget(format!(
                    "'{}' cannot render into {bad:?}",
                    state.label
                )));
            }
            if pass.depth_format.is_some_and(|f| !f.is_depth()) {
                return Err(PipelineError::IncompatibleRenderTarget(format!(
                    "'{}' uses a color format as depth attachment",
                    state.label
                )));
            }
        }
        self.graphics_pipelines.write().insert(handle, state);
        self.pipeline_programs.write().insert(handle, program);
        Ok(())
    }

    /// Validates and stores a compute pipeline object.
    pub fn create_compute_pipeline(
        &self,
        handle: ResourceHandle,
        state: Arc<ComputePipelineState>,
    ) -> Result<(), PipelineError> {
        let program = self.program(state.shader).ok_or_else(|| PipelineError::InvalidShader {
            pipeline_label: state.label.clone(),
        })?;
        if !program.is_compute() {
            return Err(PipelineError::MissingComputeStage {
                pipeline_label: state.label.clone(),
            });
        }
        self.compute_pipelines.write().insert(handle, state);
        self.pipeline_programs.write().insert(handle, program);
        Ok(())
    }

    /// The graphics pipeline stored under `handle`.
    pub fn graphics_pipeline(&self, handle: ResourceHandle) -> Option<Arc<GraphicsPipelineState>> {
        self.graphics_pipelines.read().get(&handle).cloned()
    }

    /// The compute pipeline stored under `handle`.
    pub fn compute_pipeline(&self, handle: ResourceHandle) -> Option<Arc<ComputePipelineState>> {
        self.compute_pipelines.read().get(&handle).cloned()
    }

    /// The program a pipeline runs: the live program of `shader` when it still
    /// exists (so recompiles take effect), else the one the pipeline was built from.
    pub fn pipeline_program(&self, pipeline: ResourceHandle, shader: ResourceHandle) -> Option<Arc<CompiledProgram>> {
        self.program(shader)
            .or_else(|| self.pipeline_programs.read().get(&pipeline).cloned())
    }

    /// Frees a pipeline of either kind.
    pub fn destroy_pipeline(&self, handle: ResourceHandle) {
        self.graphics_pipelines.write().remove(&handle);
        self.compute_pipelines.write().remove(&handle);
        self.pipeline_programs.write().remove(&handle);
    }

    /// Number of live buffers and images, for shutdown diagnostics.
    pub fn live_allocations(&self) -> (usize, usize) {
        (self.buffers.read().len(), self.images.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunex_core::renderer::{BufferType, BufferUsage, TextureFormat};

    const VS: &str = "#version 450\nlayout(location = 0) in vec3 a_Position;\nvoid main() { gl_Position = vec4(a_Position, 1.0); }\n";
    const BROKEN: &str = "#version 450\nvoid main() { gl_Position = vec4(1.0) }\n";

    fn handle(i: u32) -> ResourceHandle {
        ResourceHandle::from_raw(i, 1)
    }

    #[test]
    fn buffer_writes_are_counted() {
        let gpu = SoftGpu::new();
        let desc = BufferDesc::new(BufferType::Uniform, BufferUsage::Dynamic, 16);
        gpu.create_buffer(handle(0), &desc, Some(&[1, 2, 3, 4])).unwrap();
        gpu.write_buffer(handle(0), 4, &[9; 4]).unwrap();
        assert_eq!(gpu.read_buffer(handle(0), 0, 8).unwrap(), vec![1, 2, 3, 4, 9, 9, 9, 9]);
        let stats = gpu.executed().snapshot();
        assert_eq!(stats.buffer_uploads, 2);
        assert_eq!(stats.buffer_bytes_uploaded, 8);
        gpu.destroy_buffer(handle(0));
        assert!(gpu.read_buffer(handle(0), 0, 1).is_err());
    }

    #[test]
    fn oversized_initial_data_is_rejected() {
        let gpu = SoftGpu::new();
        let desc = BufferDesc::new(BufferType::Vertex, BufferUsage::Static, 2);
        assert!(matches!(
            gpu.create_buffer(handle(1), &desc, Some(&[0; 4])),
            Err(ResourceError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn compressed_images_are_unsupported() {
        let gpu = SoftGpu::new();
        let desc = TextureDesc::texture_2d(4, 4, TextureFormat::BC7);
        assert!(matches!(gpu.create_image(handle(2), &desc), Err(ResourceError::Unsupported(_))));
    }

    #[test]
    fn failed_recompile_keeps_the_program() {
        let gpu = SoftGpu::new();
        let good = [ShaderStageSource { stage: ShaderStage::VERTEX, source: VS.into() }];
        let bad = [ShaderStageSource { stage: ShaderStage::VERTEX, source: BROKEN.into() }];
        gpu.compile_shader(handle(3), "flat", &good).unwrap();
        assert!(gpu.compile_shader(handle(3), "flat", &bad).is_err());
        let program = gpu.program(handle(3)).unwrap();
        assert_eq!(program.reflection.vertex_inputs.len(), 1);
    }

    #[test]
    fn compute_pipeline_needs_a_compute_program() {
        let gpu = SoftGpu::new();
        let good = [ShaderStageSource { stage: ShaderStage::VERTEX, source: VS.into() }];
        gpu.compile_shader(handle(4), "flat", &good).unwrap();
        let state = Arc::new(ComputePipelineState {
            label: "cs".into(),
            shader: handle(4),
            work_group_size: [1, 1, 1],
            kernel: None,
        });
        assert!(matches!(
            gpu.create_compute_pipeline(handle(5), state.clone()),
            Err(PipelineError::MissingComputeStage { .. })
        ));
        let missing = Arc::new(ComputePipelineState { shader: handle(9), ..(*state).clone() });
        assert!(matches!(
            gpu.create_compute_pipeline(handle(5), missing),
            Err(PipelineError::InvalidShader { .. })
        ));
    }

    #[test]
    fn pipelines_keep_their_program_after_the_shader_is_freed() {
        let gpu = SoftGpu::new();
        let cs = "#version 450\nlayout(local_size_x = 1) in;\nvoid main() {}\n";
        let stages = [ShaderStageSource { stage: ShaderStage::COMPUTE, source: cs.into() }];
        gpu.compile_shader(handle(6), "noop", &stages).unwrap();
        let state = Arc::new(ComputePipelineState {
            label: "noop".into(),
            shader: handle(6),
            work_group_size: [1, 1, 1],
            kernel: None,
        });
        gpu.create_compute_pipeline(handle(7), state).unwrap();
        gpu.destroy_shader(handle(6));
        assert!(gpu.program(handle(6)).is_none());
        let program = gpu.pipeline_program(handle(7), handle(6)).unwrap();
        assert!(program.module(naga::ShaderStage::Compute).is_some());
        gpu.destroy_pipeline(handle(7));
        assert!(gpu.pipeline_program(handle(7), handle(6)).is_none());
    }
}
