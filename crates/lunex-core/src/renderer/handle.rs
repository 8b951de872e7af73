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

//! Generational resource handles and the table that owns allocation accounting.
//!
//! Every GPU resource is registered here when it is created and released when its
//! owning wrapper is dropped. The table is the single source of truth for live byte
//! counts, so no resource constructor or destructor updates counters by hand.

use crate::renderer::api::AllocationStatistics;
use parking_lot::Mutex;
use std::fmt;

/// A generational reference to a resource slot.
///
/// Handles are plain values. Once the slot is released (or reused after a destructive
/// resize) the generation moves on and every copy of the old handle stops resolving.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle {
    index: u32,
    generation: u32,
}

impl ResourceHandle {
    /// A handle that never resolves.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    /// Builds a handle from raw parts.
    pub const fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation.
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// `false` for [`ResourceHandle::INVALID`]. Says nothing about liveness.
    pub const fn is_valid(&self) -> bool {
        self.generation != 0
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}v{})", self.index, self.generation)
        } else {
            write!(f, "Handle(invalid)")
        }
    }
}

/// The kind of resource stored in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    Shader,
    Pipeline,
    Framebuffer,
    CommandList,
    Fence,
}

#[derive(Debug)]
struct Entry {
    kind: ResourceKind,
    bytes: u64,
    label: String,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
struct TableInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    stats: AllocationStatistics,
}

impl TableInner {
    fn account(&mut self, kind: ResourceKind, bytes: u64, add: bool) {
        let stats = &mut self.stats;
        let apply = |value: &mut u64, delta: u64| {
            if add {
                *value += delta;
            } else {
                *value = value.saturating_sub(delta);
            }
        };
        match kind {
            ResourceKind::Buffer => {
                apply(&mut stats.buffer_count, 1);
                apply(&mut stats.buffer_bytes, bytes);
            }
            ResourceKind::Texture => {
                apply(&mut stats.texture_count, 1);
                apply(&mut stats.texture_bytes, bytes);
            }
            _ => apply(&mut stats.other_count, 1),
        }
        apply(&mut stats.total_bytes, bytes);
        if add {
            stats.total_allocations += 1;
            stats.peak_bytes = stats.peak_bytes.max(stats.total_bytes);
        } else {
            stats.total_releases += 1;
        }
    }
}

/// Information about a slot that was just released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedResource {
    /// The kind stored in the slot.
    pub kind: ResourceKind,
    /// The bytes it accounted for.
    pub bytes: u64,
    /// Its debug label.
    pub label: String,
}

/// A thread-safe generational slot table with per-kind byte accounting.
#[derive(Debug, Default)]
pub struct HandleTable {
    inner: Mutex<TableInner>,
}

impl HandleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource and returns its handle.
    pub fn insert(&self, kind: ResourceKind, bytes: u64, label: &str) -> ResourceHandle {
        let mut inner = self.inner.lock();
        let entry = Entry {
            kind,
            bytes,
            label: label.to_owned(),
        };
        let handle = match inner.free.pop() {
            Some(index) => {
                let slot = &mut inner.slots[index as usize];
                slot.entry = Some(entry);
                ResourceHandle::from_raw(index, slot.generation)
            }
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    generation: 1,
                    entry: Some(entry),
                });
                ResourceHandle::from_raw(index, 1)
            }
        };
        inner.account(kind, bytes, true);
        handle
    }

    /// Releases a live handle. Returns `None` for stale or invalid handles.
    pub fn release(&self, handle: ResourceHandle) -> Option<ReleasedResource> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        inner.free.push(handle.index);
        inner.account(entry.kind, entry.bytes, false);
        Some(ReleasedResource {
            kind: entry.kind,
            bytes: entry.bytes,
            label: entry.label,
        })
    }

    /// `true` if `handle` still refers to a live resource.
    pub fn is_alive(&self, handle: ResourceHandle) -> bool {
        self.kind_of(handle).is_some()
    }

    /// The kind of a live handle.
    pub fn kind_of(&self, handle: ResourceHandle) -> Option<ResourceKind> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref().map(|e| e.kind)
    }

    /// The bytes accounted to a live handle.
    pub fn bytes_of(&self, handle: ResourceHandle) -> Option<u64> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref().map(|e| e.bytes)
    }

    /// Number of live resources.
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|s| s.entry.is_some())
            .count()
    }

    /// Labels of live resources, for leak reports at shutdown.
    pub fn live_labels(&self) -> Vec<(ResourceKind, String)> {
        self.inner
            .lock()
            .slots
            .iter()
            .filter_map(|s| s.entry.as_ref().map(|e| (e.kind, e.label.clone())))
            .collect()
    }

    /// A snapshot of the allocation counters.
    pub fn statistics(&self) -> AllocationStatistics {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handles_go_stale() {
        let table = HandleTable::new();
        let a = table.insert(ResourceKind::Buffer, 64, "a");
        assert!(table.is_alive(a));
        let released = table.release(a).unwrap();
        assert_eq!(released.bytes, 64);
        assert!(!table.is_alive(a));
        assert!(table.release(a).is_none());

        // The slot is reused with a new generation.
        let b = table.insert(ResourceKind::Buffer, 32, "b");
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(!table.is_alive(a));
        assert!(table.is_alive(b));
    }

    #[test]
    fn accounting_tracks_live_and_peak_bytes() {
        let table = HandleTable::new();
        let buf = table.insert(ResourceKind::Buffer, 100, "buf");
        let tex = table.insert(ResourceKind::Texture, 400, "tex");
        let _shader = table.insert(ResourceKind::Shader, 0, "shader");
        let stats = table.statistics();
        assert_eq!(stats.buffer_bytes, 100);
        assert_eq!(stats.texture_bytes, 400);
        assert_eq!(stats.other_count, 1);
        assert_eq!(stats.total_bytes, 500);

        table.release(tex);
        table.release(buf);
        let stats = table.statistics();
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.peak_bytes, 500);
        assert_eq!(stats.total_releases, 2);
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn invalid_handle_never_resolves() {
        let table = HandleTable::new();
        assert!(!ResourceHandle::INVALID.is_valid());
        assert!(!table.is_alive(ResourceHandle::INVALID));
        assert!(table.release(ResourceHandle::INVALID).is_none());
    }
}
