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

//! The GL-style backend: commands execute on the render thread as they are recorded.

use crate::graphics::soft::executor::Executor;
use crate::graphics::soft::SoftGpu;
use lunex_core::renderer::traits::{
    CommandSink, ComputePipelineState, GraphicsPipelineState, RenderBackend, ShaderStageSource,
};
use lunex_core::renderer::{
    BackendInfo, BackendKind, BufferDesc, Command, CommandBuffer, DeviceCapabilities, FenceSignal,
    PipelineError, RenderError, ResourceError, ResourceHandle, ShaderError, ShaderReflection,
    StatsCounters, SubmissionModel, TextureDesc, TextureRegion,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Executes every recorded command inline against the software GPU.
///
/// Like a GL context, the backend is bound to the thread that created it: commands
/// arriving from any other thread are logged and dropped.
#[derive(Debug)]
pub struct ImmediateBackend {
    gpu: Arc<SoftGpu>,
    owner: ThreadId,
    /// Replays command buffers that reach `submit` without having run inline.
    replay: Mutex<Executor>,
}

impl Default for ImmediateBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ImmediateBackend {
    /// Creates the backend, owned by the calling thread.
    pub fn new() -> Self {
        let gpu = Arc::new(SoftGpu::new());
        log::info!(
            "ImmediateBackend: created on thread {:?}",
            thread::current().name().unwrap_or("<unnamed>")
        );
        Self {
            replay: Mutex::new(Executor::new(gpu.clone(), None)),
            gpu,
            owner: thread::current().id(),
        }
    }

    /// The software GPU the backend drives.
    pub fn gpu(&self) -> &Arc<SoftGpu> {
        &self.gpu
    }

    fn on_owner_thread(&self, op: &str) -> bool {
        let ok = thread::current().id() == self.owner;
        if !ok {
            log::error!("ImmediateBackend: {op} called off the render thread, skipped");
        }
        ok
    }
}

impl RenderBackend for ImmediateBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Immediate,
            api_name: "Lunex Immediate".to_owned(),
            api_version: env!("CARGO_PKG_VERSION").to_owned(),
            renderer: "Lunex software rasterizer".to_owned(),
            vendor: "Lunex".to_owned(),
        }
    }

    fn submission_model(&self) -> SubmissionModel {
        SubmissionModel::Immediate
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
        _staged: bool,
    ) -> Result<(), ResourceError> {
        Ok(self.gpu.write_buffer(handle, offset, data)?)
    }

    fn read_buffer(&self, handle: ResourceHandle, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError> {
        Ok(self.gpu.read_buffer(handle, offset, size)?)
    }

    fn destroy_buffer(&self, handle: ResourceHandle) {
        self.gpu.destroy_buffer(handle);
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
        Ok(self.gpu.write_image(handle, region, data)?)
    }

    fn read_texture(&self, handle: ResourceHandle, region: &TextureRegion) -> Result<Vec<u8>, ResourceError> {
        Ok(self.gpu.read_image(handle, region)?)
    }

    fn generate_mipmaps(&self, handle: ResourceHandle) -> Result<(), ResourceError> {
        Ok(self.gpu.generate_mipmaps(handle)?)
    }

    fn destroy_texture(&self, handle: ResourceHandle) {
        self.gpu.destroy_image(handle);
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
        self.gpu.destroy_shader(handle);
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
        self.gpu.destroy_pipeline(handle);
    }

    fn create_command_sink(&self, label: &str) -> Box<dyn CommandSink> {
        Box::new(ImmediateSink {
            executor: Executor::new(self.gpu.clone(), None),
            owner: self.owner,
            label: label.to_owned(),
        })
    }

    fn submit(&self, buffers: Vec<Arc<CommandBuffer>>, signal: Option<FenceSignal>) -> Result<(), RenderError> {
        let pending: Vec<_> = buffers.iter().filter(|b| !b.executed_inline).collect();
        if !pending.is_empty() && self.on_owner_thread("submit") {
            let mut replay = self.replay.lock();
            for buffer in pending {
                replay.run(buffer);
            }
        }
        // Everything already ran: the fence can signal right away.
        if let Some(signal) = signal {
            signal.signal();
        }
        Ok(())
    }

    fn wait_idle(&self) {}

    fn shutdown(&self) {
        let (buffers, images) = self.gpu.live_allocations();
        log::info!("ImmediateBackend: shut down with {buffers} buffer(s) and {images} image(s) still allocated");
    }
}

/// Records by executing: each command runs the moment it is recorded.
#[derive(Debug)]
pub struct ImmediateSink {
    executor: Executor,
    owner: ThreadId,
    label: String,
}

impl CommandSink for ImmediateSink {
    fn begin(&mut self) {
        self.executor.begin(&self.label);
    }

    fn record(&mut self, command: Command) {
        if thread::current().id() != self.owner {
            log::error!(
                "ImmediateBackend: '{}' recorded {} off the render thread, skipped",
                self.label,
                command.name()
            );
            return;
        }
        self.executor.execute(&command);
    }

    fn finish(&mut self) -> CommandBuffer {
        CommandBuffer {
            label: self.label.clone(),
            commands: Vec::new(),
            executed_inline: true,
        }
    }

    fn reset(&mut self) {
        self.executor.begin(&self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunex_core::renderer::{BufferType, BufferUsage};

    #[test]
    fn sink_executes_while_recording() {
        let backend = ImmediateBackend::new();
        let handle = ResourceHandle::from_raw(0, 1);
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, 8);
        backend.create_buffer(handle, &desc, None).unwrap();
        let mut sink = backend.create_command_sink("inline");
        sink.begin();
        sink.record(Command::ClearBuffer { buffer: handle, offset: 0, size: 8, value: 0x0202_0202 });
        // Visible before finish or submit.
        assert_eq!(backend.read_buffer(handle, 0, 2).unwrap(), vec![2, 2]);
        let buffer = sink.finish();
        assert!(buffer.executed_inline);
        assert!(buffer.is_empty());
    }

    #[test]
    fn foreign_threads_are_refused() {
        let backend = Arc::new(ImmediateBackend::new());
        let handle = ResourceHandle::from_raw(0, 1);
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, 4);
        backend.create_buffer(handle, &desc, None).unwrap();
        let mut sink = backend.create_command_sink("elsewhere");
        thread::spawn(move || {
            sink.begin();
            sink.record(Command::ClearBuffer { buffer: handle, offset: 0, size: 4, value: u32::MAX });
        })
        .join()
        .unwrap();
        assert_eq!(backend.read_buffer(handle, 0, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn submit_signals_at_once() {
        let backend = ImmediateBackend::new();
        assert_eq!(backend.submission_model(), SubmissionModel::Immediate);
        assert!(backend.submit(Vec::new(), None).is_ok());
    }
}
