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

//! Command-list recycling and fork-join parallel recording.

use crate::renderer::command_list::{CommandList, CommandListState};
use crate::renderer::device::{Device, DeviceShared};
use crate::renderer::error::RenderError;
use crate::renderer::resource::Resource;
use crate::renderer::sync::{CommandQueue, Fence};
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// A command list handed out by a [`CommandPool`].
pub type PooledCommandList = Arc<Mutex<CommandList>>;

/// Sizing of a [`CommandPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPoolConfig {
    /// Lists created up front.
    pub initial_pool_size: usize,
    /// Upper bound on lists kept for reuse after a reset.
    pub max_pool_size: usize,
    /// Whether lists may be allocated from any thread.
    pub thread_safe: bool,
}

impl Default for CommandPoolConfig {
    fn default() -> Self {
        Self {
            initial_pool_size: 4,
            max_pool_size: 64,
            thread_safe: true,
        }
    }
}

#[derive(Default)]
struct PoolLists {
    available: Vec<PooledCommandList>,
    in_use: Vec<PooledCommandList>,
    pending: Vec<PooledCommandList>,
}

/// Recycles command lists between frames.
///
/// `allocate` always returns a list in the Initial state with nothing bound. `reset`
/// returns every in-use list to the free list, keeping at most `max_pool_size` of them.
pub struct CommandPool {
    shared: Arc<DeviceShared>,
    queue: CommandQueue,
    config: CommandPoolConfig,
    lists: Mutex<PoolLists>,
    total_allocated: AtomicUsize,
    owner: ThreadId,
}

impl CommandPool {
    /// Creates a pool with `config.initial_pool_size` lists ready to hand out.
    pub fn new(device: &Device, config: CommandPoolConfig) -> Self {
        let pool = Self {
            shared: device.shared().clone(),
            queue: device.queue().clone(),
            config,
            lists: Mutex::new(PoolLists::default()),
            total_allocated: AtomicUsize::new(0),
            owner: thread::current().id(),
        };
        let initial = config.initial_pool_size.min(config.max_pool_size);
        {
            let mut lists = pool.lists.lock();
            for _ in 0..initial {
                lists.available.push(pool.create_list());
            }
        }
        log::debug!("CommandPool: created with {initial} list(s), max {}", config.max_pool_size);
        pool
    }

    fn create_list(&self) -> PooledCommandList {
        let index = self.total_allocated.fetch_add(1, Ordering::Relaxed);
        Arc::new(Mutex::new(CommandList::new(&self.shared, &format!("PooledCommandList{index}"))))
    }

    fn lock(&self) -> MutexGuard<'_, PoolLists> {
        if !self.config.thread_safe && thread::current().id() != self.owner {
            log::warn!("CommandPool: used from a foreign thread while configured thread-unsafe");
        }
        self.lists.lock()
    }

    /// The pool configuration.
    pub fn config(&self) -> &CommandPoolConfig {
        &self.config
    }

    /// Hands out a list in the Initial state.
    pub fn allocate(&self) -> PooledCommandList {
        let mut lists = self.lock();
        let list = match lists.available.pop() {
            Some(list) => list,
            None => {
                let list = self.create_list();
                log::trace!(
                    "CommandPool: grew to {} list(s)",
                    self.total_allocated.load(Ordering::Relaxed)
                );
                list
            }
        };
        list.lock().reset();
        lists.in_use.push(list.clone());
        list
    }

    /// Returns `list` to the pool before the next reset.
    pub fn free(&self, list: &PooledCommandList) {
        let mut lists = self.lock();
        let Some(index) = lists.in_use.iter().position(|l| Arc::ptr_eq(l, list)) else {
            log::warn!("CommandPool: free of a list this pool did not hand out");
            return;
        };
        let list = lists.in_use.swap_remove(index);
        list.lock().reset();
        if lists.available.len() < self.config.max_pool_size {
            lists.available.push(list);
        }
    }

    /// Moves every in-use list back to the free list, trimming beyond `max_pool_size`.
    pub fn reset(&self) {
        let mut lists = self.lock();
        let in_use = std::mem::take(&mut lists.in_use);
        let mut trimmed = 0usize;
        for list in in_use {
            if lists.available.len() < self.config.max_pool_size {
                list.lock().reset();
                lists.available.push(list);
            } else {
                trimmed += 1;
            }
        }
        lists.pending.clear();
        if trimmed > 0 {
            log::debug!("CommandPool: trimmed {trimmed} list(s) above the pool limit");
        }
    }

    /// Queues `list` for the next [`CommandPool::flush_pending`].
    pub fn submit_pending(&self, list: &PooledCommandList) {
        self.lock().pending.push(list.clone());
    }

    /// Submits every queued list as one batch. Returns the number submitted.
    pub fn flush_pending(&self, fence: Option<&Fence>) -> Result<usize, RenderError> {
        let pending = std::mem::take(&mut self.lock().pending);
        if pending.is_empty() {
            return Ok(0);
        }
        submit_batch(&self.queue, &pending, fence)
    }

    /// Lists ready to be handed out.
    pub fn available_count(&self) -> usize {
        self.lists.lock().available.len()
    }

    /// Lists handed out since the last reset.
    pub fn in_use_count(&self) -> usize {
        self.lists.lock().in_use.len()
    }

    /// Lists ever constructed by this pool.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPool")
            .field("config", &self.config)
            .field("available", &self.available_count())
            .field("in_use", &self.in_use_count())
            .field("total_allocated", &self.total_allocated())
            .finish()
    }
}

fn submit_batch(
    queue: &CommandQueue,
    lists: &[PooledCommandList],
    fence: Option<&Fence>,
) -> Result<usize, RenderError> {
    let guards: Vec<_> = lists.iter().map(|l| l.lock()).collect();
    let refs: Vec<&CommandList> = guards.iter().map(|g| &**g).collect();
    queue.submit(&refs, fence)
}

/// Worker count used when none is given: one less than the available cores, at least 1.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// Records one command list per worker, then submits them all as one batch.
///
/// On a deferred device the workers run on a dedicated `rayon` pool. On an immediate
/// device they run one after another on the calling thread, since immediate execution
/// is bound to the thread that owns the context.
pub struct ParallelCommandRecorder {
    pool: CommandPool,
    worker_count: usize,
    threads: Option<rayon::ThreadPool>,
    last_batch_size: AtomicUsize,
}

impl ParallelCommandRecorder {
    /// Creates a recorder with `worker_count` workers, or [`default_worker_count`].
    pub fn new(device: &Device, worker_count: Option<usize>) -> Self {
        let worker_count = worker_count.unwrap_or_else(default_worker_count).max(1);
        let threads = if device.submission_model().supports_parallel_recording() {
            rayon::ThreadPoolBuilder::new()
                .num_threads(worker_count)
                .thread_name(|index| format!("lunex-record-{index}"))
                .build()
                .map_err(|e| {
                    log::warn!("ParallelCommandRecorder: no worker pool ({e}), recording serially");
                })
                .ok()
        } else {
            None
        };
        let config = CommandPoolConfig {
            initial_pool_size: worker_count,
            max_pool_size: worker_count.max(CommandPoolConfig::default().max_pool_size),
            thread_safe: true,
        };
        log::debug!(
            "ParallelCommandRecorder: {worker_count} worker(s), {}",
            if threads.is_some() { "threaded" } else { "serial" }
        );
        Self {
            pool: CommandPool::new(device, config),
            worker_count,
            threads,
            last_batch_size: AtomicUsize::new(0),
        }
    }

    /// Number of workers, and therefore lists per batch.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Lists submitted by the last [`ParallelCommandRecorder::record_parallel`].
    pub fn last_batch_size(&self) -> usize {
        self.last_batch_size.load(Ordering::Relaxed)
    }

    /// Runs `record(worker_index, list)` once per worker and submits the lists together.
    ///
    /// Each worker owns its list for the whole call, so commands of different workers
    /// never interleave. Lists are begun before and ended after `record`. If any list
    /// fails to reach the Executable state nothing is submitted.
    pub fn record_parallel<F>(&self, record: F, fence: Option<&Fence>) -> Result<usize, RenderError>
    where
        F: Fn(usize, &mut CommandList) + Send + Sync,
    {
        let lists: Vec<PooledCommandList> =
            (0..self.worker_count).map(|_| self.pool.allocate()).collect();

        let run = |(index, list): (usize, &PooledCommandList)| {
            let mut list = list.lock();
            list.begin();
            record(index, &mut list);
            if list.is_recording() {
                list.end();
            }
        };
        match &self.threads {
            Some(threads) => threads.install(|| lists.par_iter().enumerate().for_each(run)),
            None => lists.iter().enumerate().for_each(run),
        }

        let incomplete = lists
            .iter()
            .map(|l| l.lock())
            .filter(|l| l.state() != CommandListState::Executable)
            .map(|l| l.debug_name())
            .collect::<Vec<_>>();
        let result = if incomplete.is_empty() {
            submit_batch(&self.pool.queue, &lists, fence)
        } else {
            log::warn!("ParallelCommandRecorder: {incomplete:?} not executable; batch dropped");
            Ok(0)
        };
        self.pool.reset();
        let submitted = result?;
        self.last_batch_size.store(submitted, Ordering::Relaxed);
        Ok(submitted)
    }
}

impl fmt::Debug for ParallelCommandRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelCommandRecorder")
            .field("worker_count", &self.worker_count)
            .field("threaded", &self.threads.is_some())
            .field("last_batch_size", &self.last_batch_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = CommandPoolConfig::default();
        assert_eq!(config.initial_pool_size, 4);
        assert_eq!(config.max_pool_size, 64);
        assert!(config.thread_safe);
    }

    #[test]
    fn pool_config_fills_missing_fields() {
        let config: CommandPoolConfig = serde_json::from_str(r#"{ "max_pool_size": 8 }"#).unwrap();
        assert_eq!(config.max_pool_size, 8);
        assert_eq!(config.initial_pool_size, 4);
    }

    #[test]
    fn at_least_one_worker() {
        assert!(default_worker_count() >= 1);
    }
}
