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

//! The Vulkan-style backend: command lists are recorded anywhere and executed in
//! order by a dedicated queue thread.

mod queue;

pub use self::queue::QueueMessage;

use self::queue::Queue;
use crate::graphics::soft::SoftGpu;
use lunex_core::renderer::traits::{
    CommandSink, ComputePipelineState, GraphicsPipelineState, RenderBackend, ShaderStageSource,
};
use lunex_core::renderer::{
    BackendInfo, BackendKind, BufferDesc, Command, CommandBuffer, DeviceCapabilities, FenceSignal,
    PipelineError, RenderError, ResourceError, ResourceHandle, ShaderError, ShaderReflection,
    StatsCounters, SubmissionModel, TextureDesc, TextureRegion,
};
use std::sync::Arc;

/// Records into plain buffers and executes them on the `lunex-queue` thread.
///
/// Submissions, staged uploads and destroys travel through one ordered queue. Reads
/// drain the queue first so they observe every earlier submission.
#[derive(Debug)]
pub struct DeferredBackend {
    gpu: Arc<SoftGpu>,
    queue: Queue,
    validation: bool,
}

impl DeferredBackend {
    /// Starts the queue thread. With `validation`, barriers are checked and hazards counted.
    pub fn new(validation: bool) -> Result<Self, RenderError> {
        let gpu = Arc::new(SoftGpu::new());
        let queue = Queue::spawn(gpu.clone(), validation)?;
        log::info!("DeferredBackend: queue thread running (validation: {validation})");
        Ok(Self { gpu, queue, validation })
    }

    /// The software GPU the queue thread drives.
    pub fn gpu(&self) -> &Arc<SoftGpu> {
        &self.gpu
    }

    /// Whether barrier validation is enabled.
    pub fn validation(&self) -> bool {
        self.validation
    }

    fn drain(&self, op: &str) -> Result<(), ResourceError> {
        self.queue.flush().map_err(|e| {
            log::error!("DeferredBackend: cannot drain the queue before {op}: {e}");
            ResourceError::from(e)
        })
    }
}

impl RenderBackend for DeferredBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Deferred,
            api_name: "Lunex Deferred".to_owned(),
            api_version: env!("CARGO_PKG_VERSION").to_owned(),
            renderer: "Lunex software rasterizer".to_owned(),
            vendor: "Lunex".to_owned(),
        }
    }

    fn submission_model(&self) -> SubmissionModel {
        SubmissionModel::Deferred
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.gpu.capabilities().clone()
    }

    fn executed_statistics(&self) -> &StatsCounters {
        self.gpu.executed()
    }

    fn create_buffer(
        &self,
        handle: ResourceHandle,
        desc: &BufferDesc,
        initial_data: Option<&[u8]>,
    ) -> Result<(), ResourceError> {
        self.gpu.create_buffer(handle, desc, initial_data)
    }

    fn write_buffer(
        &self,
        handle: ResourceHandle,
        offset: u64,
        data: &[u8],
        staged: bool,
    ) -> Result<(), ResourceError> {
        if !staged {
            return Ok(self.gpu.write_buffer(handle, offset, data)?);
        }
        self.gpu.validate_buffer_range(handle, offset, data.len() as u64)?;
        self.queue.send(QueueMessage::WriteBuffer {
            handle,
            offset,
            data: data.to_vec(),
        })?;
        Ok(())
    }

    fn read_buffer(&self, handle: ResourceHandle, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError> {
        self.drain("a buffer read")?;
        Ok(self.gpu.read_buffer(handle, offset, size)?)
    }

    fn destroy_buffer(&self, handle: ResourceHandle) {
        if self.queue.send(QueueMessage::DestroyBuffer(handle)).is_err() {
            self.gpu.destroy_buffer(handle);
        }
    }

    fn create_texture(&self, handle: ResourceHandle, desc: &TextureDesc) -> Result<(), ResourceError> {
        self.gpu.create_image(handle, desc)
    }

    fn write_texture(
        &self,
        handle: ResourceHandle,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        self.gpu.validate_image_write(handle, region, data.len())?;
        self.queue.send(QueueMessage::WriteTexture {
            handle,
            region: *region,
            data: data.to_vec(),
        })?;
        Ok(())
    }

    fn read_texture(&self, handle: ResourceHandle, region: &TextureRegion) -> Result<Vec<u8>, ResourceError> {
        self.drain("a texture read")?;
        Ok(self.gpu.read_image(handle, region)?)
    }

    fn generate_mipmaps(&self, handle: ResourceHandle) -> Result<(), ResourceError> {
        self.drain("mip generation")?;
        Ok(self.gpu.generate_mipmaps(handle)?)
    }

    fn destroy_texture(&self, handle: ResourceHandle) {
        if self.queue.send(QueueMessage::DestroyTexture(handle)).is_err() {
            self.gpu.destroy_image(handle);
        }
    }

    fn compile_shader(
        &self,
        handle: ResourceHandle,
        label: &str,
        stages: &[ShaderStageSource],
    ) -> Result<ShaderReflection, ShaderError> {
        self.gpu.compile_shader(handle, label, stages)
    }

    fn destroy_shader(&self, handle: ResourceHandle) {
        if self.queue.send(QueueMessage::DestroyShader(handle)).is_err() {
            self.gpu.destroy_shader(handle);
        }
    }

    fn create_graphics_pipeline(
        &self,
        handle: ResourceHandle,
        state: Arc<GraphicsPipelineState>,
    ) -> Result<(), PipelineError> {
        self.gpu.create_graphics_pipeline(handle, state)
    }

    fn create_compute_pipeline(
        &self,
        handle: ResourceHandle,
        state: Arc<ComputePipelineState>,
    ) -> Result<(), PipelineError> {
        self.gpu.create_compute_pipeline(handle, state)
    }

    fn destroy_pipeline(&self, handle: ResourceHandle) {
        if self.queue.send(QueueMessage::DestroyPipeline(handle)).is_err() {
            self.gpu.destroy_pipeline(handle);
        }
    }

    fn create_command_sink(&self, label: &str) -> Box<dyn CommandSink> {
        Box::new(DeferredSink {
            label: label.to_owned(),
            commands: Vec::new(),
        })
    }

    fn submit(&self, buffers: Vec<Arc<CommandBuffer>>, signal: Option<FenceSignal>) -> Result<(), RenderError> {
        self.queue.send(QueueMessage::Execute { buffers, signal }).map_err(|e| {
            log::error!("DeferredBackend: submission dropped: {e}");
            RenderError::DeviceLost
        })
    }

    fn wait_idle(&self) {
        if let Err(e) = self.queue.flush() {
            log::warn!("DeferredBackend: wait_idle on a stopped queue: {e}");
        }
    }

    fn shutdown(&self) {
        if !self.queue.is_running() {
            return;
        }
        self.queue.shutdown();
        let (buffers, images) = self.gpu.live_allocations();
        log::info!("DeferredBackend: shut down with {buffers} buffer(s) and {images} image(s) still allocated");
    }
}

impl Drop for DeferredBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Appends commands to a buffer for later execution on the queue thread.
#[derive(Debug)]
pub struct DeferredSink {
    label: String,
    commands: Vec<Command>,
}

impl CommandSink for DeferredSink {
    fn begin(&mut self) {
        self.commands.clear();
    }

    fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    fn finish(&mut self) -> CommandBuffer {
        CommandBuffer {
            label: self.label.clone(),
            commands: std::mem::take(&mut self.commands),
            executed_inline: false,
        }
    }

    fn reset(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunex_core::renderer::{BufferType, BufferUsage, ShaderStage};

    fn storage(backend: &DeferredBackend, size: u64) -> ResourceHandle {
        let handle = ResourceHandle::from_raw(0, 1);
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, size);
        backend.create_buffer(handle, &desc, None).unwrap();
        handle
    }

    #[test]
    fn sink_defers_until_submit() {
        let backend = DeferredBackend::new(false).unwrap();
        let handle = storage(&backend, 4);
        let mut sink = backend.create_command_sink("later");
        sink.begin();
        sink.record(Command::ClearBuffer { buffer: handle, offset: 0, size: 4, value: 0x0909_0909 });
        let buffer = sink.finish();
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.executed_inline);
        assert_eq!(backend.read_buffer(handle, 0, 4).unwrap(), vec![0; 4]);

        backend.submit(vec![Arc::new(buffer)], None).unwrap();
        assert_eq!(backend.read_buffer(handle, 0, 4).unwrap(), vec![9; 4]);
    }

    #[test]
    fn staged_writes_are_ordered_with_submissions() {
        let backend = DeferredBackend::new(false).unwrap();
        let handle = storage(&backend, 4);
        let mut sink = backend.create_command_sink("clear");
        sink.begin();
        sink.record(Command::ClearBuffer { buffer: handle, offset: 0, size: 4, value: 0 });
        let clear = Arc::new(sink.finish());

        backend.write_buffer(handle, 0, &[1, 2, 3, 4], true).unwrap();
        backend.submit(vec![clear.clone()], None).unwrap();
        assert_eq!(backend.read_buffer(handle, 0, 4).unwrap(), vec![0; 4]);

        backend.submit(vec![clear], None).unwrap();
        backend.write_buffer(handle, 0, &[1, 2, 3, 4], true).unwrap();
        assert_eq!(backend.read_buffer(handle, 0, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn staged_writes_are_validated_up_front() {
        let backend = DeferredBackend::new(false).unwrap();
        let handle = storage(&backend, 4);
        assert_eq!(
            backend.write_buffer(handle, 2, &[0; 4], true),
            Err(ResourceError::OutOfBounds)
        );
        assert_eq!(
            backend.write_buffer(ResourceHandle::from_raw(5, 1), 0, &[0], true),
            Err(ResourceError::NotFound)
        );
    }

    #[test]
    fn destroy_waits_for_earlier_work() {
        let backend = DeferredBackend::new(false).unwrap();
        let handle = storage(&backend, 4);
        backend.destroy_buffer(handle);
        backend.wait_idle();
        assert_eq!(backend.gpu().live_allocations(), (0, 0));
    }

    #[test]
    fn shader_and_pipeline_outlive_submitted_work() {
        const SEVEN: &str = "#version 450\nlayout(local_size_x = 1) in;\nlayout(std430, binding = 0) buffer Data { uint values[]; };\nvoid main() { values[gl_GlobalInvocationID.x] = 7u; }\n";
        let backend = DeferredBackend::new(false).unwrap();
        let buffer = storage(&backend, 16);
        let shader = ResourceHandle::from_raw(1, 1);
        let pipeline = ResourceHandle::from_raw(2, 1);
        let stages = [ShaderStageSource { stage: ShaderStage::COMPUTE, source: SEVEN.into() }];
        backend.compile_shader(shader, "seven", &stages).unwrap();
        let state = ComputePipelineState {
            label: "seven".into(),
            shader,
            work_group_size: [1, 1, 1],
            kernel: None,
        };
        backend.create_compute_pipeline(pipeline, Arc::new(state)).unwrap();

        let mut sink = backend.create_command_sink("seven");
        sink.begin();
        sink.record(Command::BindComputePipeline { pipeline });
        sink.record(Command::SetStorageBuffer { binding: 0, buffer, offset: 0, size: None });
        sink.record(Command::Dispatch { x: 4, y: 1, z: 1 });
        backend.submit(vec![Arc::new(sink.finish())], None).unwrap();
        backend.destroy_shader(shader);
        backend.destroy_pipeline(pipeline);
        backend.wait_idle();

        let values: Vec<u32> = bytemuck::pod_collect_to_vec(&backend.read_buffer(buffer, 0, 16).unwrap());
        assert_eq!(values, vec![7; 4]);
        assert!(backend.gpu().program(shader).is_none());
        assert!(backend.gpu().compute_pipeline(pipeline).is_none());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let backend = DeferredBackend::new(true).unwrap();
        assert!(backend.validation());
        backend.shutdown();
        backend.shutdown();
        assert_eq!(backend.submit(Vec::new(), None), Err(RenderError::DeviceLost));
    }
}
