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

//! The capability set shared by every GPU resource, and the owning guard that
//! releases a resource through the device's handle table.

use crate::renderer::api::ResourceState;
use crate::renderer::device::DeviceShared;
use crate::renderer::handle::{ResourceHandle, ResourceKind};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A process-unique, monotonically increasing resource identifier.
///
/// Unlike a [`ResourceHandle`], an id survives destructive operations such as a texture
/// resize: it names the logical resource, not its current backing allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Releases a handle (and its backend object) when dropped.
pub(crate) struct ResourceOwner {
    shared: Arc<DeviceShared>,
    handle: ResourceHandle,
    kind: ResourceKind,
}

impl ResourceOwner {
    pub(crate) fn new(shared: Arc<DeviceShared>, handle: ResourceHandle, kind: ResourceKind) -> Self {
        Self {
            shared,
            handle,
            kind,
        }
    }

    pub(crate) fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }
}

impl Drop for ResourceOwner {
    fn drop(&mut self) {
        self.shared.release(self.handle, self.kind);
    }
}

impl fmt::Debug for ResourceOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceOwner")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Identity, debug name, logical state and ownership of one resource.
#[derive(Debug)]
pub struct ResourceBase {
    id: ResourceId,
    kind: ResourceKind,
    name: RwLock<String>,
    state: RwLock<ResourceState>,
    owner: RwLock<ResourceOwner>,
}

impl ResourceBase {
    pub(crate) fn new(owner: ResourceOwner, name: &str) -> Self {
        Self {
            id: ResourceId::next(),
            kind: owner.kind,
            name: RwLock::new(name.to_owned()),
            state: RwLock::new(ResourceState::Undefined),
            owner: RwLock::new(owner),
        }
    }

    pub(crate) fn shared(&self) -> Arc<DeviceShared> {
        self.owner.read().shared().clone()
    }

    /// Swaps in a new backing allocation; the previous one is released immediately.
    pub(crate) fn replace_owner(&self, owner: ResourceOwner) {
        let old = std::mem::replace(&mut *self.owner.write(), owner);
        drop(old);
        *self.state.write() = ResourceState::Undefined;
    }
}

/// The capability set every GPU resource exposes.
///
/// Implementors only provide [`Resource::base`]; everything else has a default.
pub trait Resource {
    /// The shared resource bookkeeping.
    fn base(&self) -> &ResourceBase;

    /// The monotonic resource id.
    fn id(&self) -> ResourceId {
        self.base().id
    }

    /// What kind of resource this is.
    fn kind(&self) -> ResourceKind {
        self.base().kind
    }

    /// The current generational handle of the backing allocation.
    fn handle(&self) -> ResourceHandle {
        self.base().owner.read().handle()
    }

    /// The debug name.
    fn debug_name(&self) -> String {
        self.base().name.read().clone()
    }

    /// Renames the resource for debugging tools.
    fn set_debug_name(&self, name: &str) {
        *self.base().name.write() = name.to_owned();
    }

    /// The logical state last declared by a barrier.
    fn state(&self) -> ResourceState {
        *self.base().state.read()
    }

    /// Overrides the logical state tag.
    fn set_state(&self, state: ResourceState) {
        *self.base().state.write() = state;
    }

    /// `true` while the backing allocation is alive in the device's handle table.
    fn is_valid(&self) -> bool {
        let base = self.base();
        let owner = base.owner.read();
        owner.shared().handles.is_alive(owner.handle())
    }
}
