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

//! GPU-to-CPU synchronization: fences and the submission queue.

use crate::renderer::command_list::CommandList;
use crate::renderer::device::DeviceShared;
use crate::renderer::error::RenderError;
use crate::renderer::resource::{Resource, ResourceBase};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    value: u64,
}

#[derive(Debug, Default)]
struct FenceInner {
    state: Mutex<FenceState>,
    cond: Condvar,
}

/// A one-shot completion token handed to a backend along with a submission.
///
/// The backend calls [`FenceSignal::signal`] once every command buffer of the batch
/// has executed.
pub struct FenceSignal {
    inner: Arc<FenceInner>,
    value: u64,
}

impl FenceSignal {
    /// The value the fence will hold once signaled.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Marks the fence signaled and wakes every waiter.
    pub fn signal(self) {
        let mut state = self.inner.state.lock();
        state.value = state.value.max(self.value);
        state.signaled = true;
        self.inner.cond.notify_all();
    }
}

impl fmt::Debug for FenceSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceSignal").field("value", &self.value).finish()
    }
}

/// A GPU-to-CPU synchronization primitive.
///
/// A fence becomes signaled when the batch it was submitted with has fully executed.
/// It also carries a monotonically increasing value so one fence can track a
/// timeline of submissions.
#[derive(Debug)]
pub struct Fence {
    base: ResourceBase,
    inner: Arc<FenceInner>,
}

impl Fence {
    pub(crate) fn new(base: ResourceBase, signaled: bool) -> Self {
        let inner = Arc::new(FenceInner::default());
        inner.state.lock().signaled = signaled;
        Self { base, inner }
    }

    /// Blocks until the fence is signaled or `timeout` elapses.
    ///
    /// `None` waits forever. Returns `true` if the fence is signaled.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        while !state.signaled {
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                        return state.signaled;
                    }
                }
                None => self.inner.cond.wait(&mut state),
            }
        }
        true
    }

    /// Returns the fence to the unsignaled state. The value is kept.
    pub fn reset(&self) {
        self.inner.state.lock().signaled = false;
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// The last signaled value.
    pub fn value(&self) -> u64 {
        self.inner.state.lock().value
    }

    /// Unsignals the fence and returns a token that signals `value`
    /// (or the next value when `None`).
    pub(crate) fn arm(&self, value: Option<u64>) -> FenceSignal {
        let mut state = self.inner.state.lock();
        state.signaled = false;
        FenceSignal {
            inner: self.inner.clone(),
            value: value.unwrap_or(state.value + 1),
        }
    }
}

impl Resource for Fence {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

/// The device's submission queue.
///
/// Cloning is cheap; every clone submits to the same backend queue, and the backend
/// serializes batches in submission order.
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<DeviceShared>,
    submissions: Arc<AtomicU64>,
}

impl CommandQueue {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> Self {
        Self {
            shared,
            submissions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Submits every executable list in `lists` as one batch.
    ///
    /// Lists that are not executable are skipped with a warning. `fence`, if given, is
    /// signaled once the whole batch has executed (immediately on the immediate
    /// backend). Returns the number of lists actually submitted.
    pub fn submit(&self, lists: &[&CommandList], fence: Option<&Fence>) -> Result<usize, RenderError> {
        let mut buffers = Vec::with_capacity(lists.len());
        for list in lists {
            match list.executable_buffer() {
                Some(buffer) => buffers.push(buffer),
                None => log::warn!(
                    "CommandQueue: skipping '{}' because it is in state {:?}, not Executable",
                    list.debug_name(),
                    list.state()
                ),
            }
        }
        let count = buffers.len();
        let signal = fence.map(|f| f.arm(None));
        self.shared.backend.submit(buffers, signal)?;
        self.submissions.fetch_add(1, Ordering::Relaxed);
        log::trace!("CommandQueue: submitted a batch of {count} command list(s)");
        Ok(count)
    }

    /// Submits a single list.
    pub fn submit_one(&self, list: &CommandList, fence: Option<&Fence>) -> Result<usize, RenderError> {
        self.submit(&[list], fence)
    }

    /// Signals `fence` with `value` once everything submitted so far has executed.
    pub fn signal(&self, fence: &Fence, value: u64) -> Result<(), RenderError> {
        self.shared.backend.submit(Vec::new(), Some(fence.arm(Some(value))))
    }

    /// Blocks until every submitted batch has executed.
    pub fn wait_idle(&self) {
        self.shared.backend.wait_idle();
    }

    /// Number of batches submitted through this queue.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("submissions", &self.submission_count())
            .finish()
    }
}
