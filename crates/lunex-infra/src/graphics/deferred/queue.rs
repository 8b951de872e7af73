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

//! The queue thread of the deferred backend.
//!
//! Every message is handled in send order, so a staged upload queued before a
//! submission is visible to it, and a destroy queued after a submission waits for it.

use crate::graphics::soft::error::SoftGpuError;
use crate::graphics::soft::executor::Executor;
use crate::graphics::soft::tracker::BarrierTracker;
use crate::graphics::soft::SoftGpu;
use lunex_core::renderer::{CommandBuffer, FenceSignal, RenderError, ResourceHandle, TextureRegion};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Work handed to the queue thread.
#[derive(Debug)]
pub enum QueueMessage {
    /// Execute a batch, then signal.
    Execute {
        /// Command buffers in submission order.
        buffers: Vec<Arc<CommandBuffer>>,
        /// Signaled after the last buffer.
        signal: Option<FenceSignal>,
    },
    /// A staged buffer upload.
    WriteBuffer {
        /// Destination.
        handle: ResourceHandle,
        /// Byte offset.
        offset: u64,
        /// Bytes to write.
        data: Vec<u8>,
    },
    /// A staged texture upload.
    WriteTexture {
        /// Destination.
        handle: ResourceHandle,
        /// Destination region.
        region: TextureRegion,
        /// Packed texels.
        data: Vec<u8>,
    },
    /// Frees a buffer once earlier work is done.
    DestroyBuffer(ResourceHandle),
    /// Frees an image once earlier work is done.
    DestroyTexture(ResourceHandle),
    /// Frees a compiled program once earlier work is done.
    DestroyShader(ResourceHandle),
    /// Frees a pipeline object once earlier work is done.
    DestroyPipeline(ResourceHandle),
    /// Replies once every earlier message has been handled.
    Flush(flume::Sender<()>),
    /// Stops the thread.
    Shutdown,
}

/// The sending side of the queue plus its thread.
#[derive(Debug)]
pub struct Queue {
    sender: flume::Sender<QueueMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Queue {
    /// Spawns the queue thread. With `validate`, barriers are checked for hazards.
    pub fn spawn(gpu: Arc<SoftGpu>, validate: bool) -> Result<Self, RenderError> {
        let (sender, receiver) = flume::unbounded();
        let tracker = validate.then(BarrierTracker::new);
        let thread = thread::Builder::new()
            .name("lunex-queue".to_owned())
            .spawn(move || run(Executor::new(gpu, tracker), receiver))
            .map_err(|e| RenderError::InitializationFailed(format!("cannot spawn the queue thread: {e}")))?;
        Ok(Self {
            sender,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Enqueues a message.
    pub fn send(&self, message: QueueMessage) -> Result<(), SoftGpuError> {
        self.sender.send(message).map_err(|_| SoftGpuError::QueueClosed)
    }

    /// Blocks until everything sent so far has been handled.
    pub fn flush(&self) -> Result<(), SoftGpuError> {
        let (reply, done) = flume::bounded(1);
        self.send(QueueMessage::Flush(reply))?;
        done.recv().map_err(|_| SoftGpuError::QueueClosed)
    }

    /// `true` until [`Queue::shutdown`] has joined the thread.
    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Drains the queue and joins the thread. Later calls do nothing.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if self.send(QueueMessage::Shutdown).is_err() {
            log::warn!("DeferredBackend: queue thread already stopped");
        }
        if thread.join().is_err() {
            log::error!("DeferredBackend: queue thread panicked");
        }
    }
}

fn run(mut executor: Executor, receiver: flume::Receiver<QueueMessage>) {
    log::debug!("DeferredBackend: queue thread started");
    let gpu = executor.gpu().clone();
    for message in receiver.iter() {
        match message {
            QueueMessage::Execute { buffers, signal } => {
                for buffer in &buffers {
                    log::trace!(
                        "DeferredBackend: executing '{}' ({} commands)",
                        buffer.label,
                        buffer.len()
                    );
                    executor.run(buffer);
                }
                if let Some(signal) = signal {
                    signal.signal();
                }
            }
            QueueMessage::WriteBuffer { handle, offset, data } => {
                if let Err(e) = gpu.write_buffer(handle, offset, &data) {
                    log::error!("DeferredBackend: staged write to {handle:?} failed: {e}");
                }
            }
            QueueMessage::WriteTexture { handle, region, data } => {
                if let Err(e) = gpu.write_image(handle, &region, &data) {
                    log::error!("DeferredBackend: staged upload to {handle:?} failed: {e}");
                }
            }
            QueueMessage::DestroyBuffer(handle) => {
                executor.forget(handle);
                gpu.destroy_buffer(handle);
            }
            QueueMessage::DestroyTexture(handle) => {
                executor.forget(handle);
                gpu.destroy_image(handle);
            }
            QueueMessage::DestroyShader(handle) => gpu.destroy_shader(handle),
            QueueMessage::DestroyPipeline(handle) => gpu.destroy_pipeline(handle),
            QueueMessage::Flush(reply) => {
                if reply.send(()).is_err() {
                    log::trace!("DeferredBackend: flush waiter left before the reply");
                }
            }
            QueueMessage::Shutdown => break,
        }
    }
    log::debug!("DeferredBackend: queue thread stopped");
}
