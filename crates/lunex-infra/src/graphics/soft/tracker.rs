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

//! Logical resource-state tracking for barrier validation.

use lunex_core::renderer::{ResourceBarrier, ResourceHandle, ResourceState};
use std::collections::HashMap;

/// Remembers the last declared state of every resource that went through a barrier.
///
/// A barrier whose `before` state disagrees with the tracked state is a hazard: the
/// recorded transition assumed a layout the resource was never moved into. Resources
/// seen for the first time, and barriers from [`ResourceState::Undefined`] (which
/// discard contents), always match.
#[derive(Debug, Default)]
pub struct BarrierTracker {
    states: HashMap<ResourceHandle, ResourceState>,
}

impl BarrierTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one barrier. Returns `false` if it is a hazard.
    pub fn transition(&mut self, barrier: &ResourceBarrier) -> bool {
        let previous = self.states.insert(barrier.resource, barrier.after);
        match previous {
            Some(tracked) => barrier.before == ResourceState::Undefined || tracked == barrier.before,
            None => true,
        }
    }

    /// The last state declared for `resource`.
    pub fn state_of(&self, resource: ResourceHandle) -> Option<ResourceState> {
        self.states.get(&resource).copied()
    }

    /// Drops a destroyed resource.
    pub fn forget(&mut self, resource: ResourceHandle) {
        self.states.remove(&resource);
    }

    /// Number of tracked resources.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barrier(before: ResourceState, after: ResourceState) -> ResourceBarrier {
        ResourceBarrier {
            resource: ResourceHandle::from_raw(7, 1),
            before,
            after,
        }
    }

    #[test]
    fn matching_chain_has_no_hazard() {
        let mut tracker = BarrierTracker::new();
        assert!(tracker.transition(&barrier(ResourceState::Undefined, ResourceState::RenderTarget)));
        assert!(tracker.transition(&barrier(ResourceState::RenderTarget, ResourceState::ShaderResource)));
        assert_eq!(
            tracker.state_of(ResourceHandle::from_raw(7, 1)),
            Some(ResourceState::ShaderResource)
        );
    }

    #[test]
    fn stale_before_state_is_a_hazard() {
        let mut tracker = BarrierTracker::new();
        tracker.transition(&barrier(ResourceState::Common, ResourceState::CopyDest));
        assert!(!tracker.transition(&barrier(ResourceState::RenderTarget, ResourceState::ShaderResource)));
        // Undefined discards and is always legal.
        assert!(tracker.transition(&barrier(ResourceState::Undefined, ResourceState::CopyDest)));
    }

    #[test]
    fn forgotten_resources_start_fresh() {
        let mut tracker = BarrierTracker::new();
        tracker.transition(&barrier(ResourceState::Common, ResourceState::CopyDest));
        tracker.forget(ResourceHandle::from_raw(7, 1));
        assert!(tracker.is_empty());
        assert!(tracker.transition(&barrier(ResourceState::Present, ResourceState::Common)));
    }
}
