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

//! Frame and allocation statistics reported by the device.

use super::types::PrimitiveTopology;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-frame counters of GPU work.
///
/// The device keeps two of these: one advanced when commands are *recorded* and one
/// advanced when the backend actually *executes* them. They agree on the immediate
/// backend and can diverge on the deferred one until the queue catches up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderStatistics {
    /// Number of draw calls (each indirect sub-draw counts once).
    pub draw_calls: u64,
    /// Triangles submitted, instances included.
    pub triangles_drawn: u64,
    /// Vertices fetched, instances included.
    pub vertices_processed: u64,
    /// Compute dispatches.
    pub dispatches: u64,
    /// Texture binds.
    pub texture_binds: u64,
    /// Shader program binds.
    pub shader_binds: u64,
    /// Pipeline state changes.
    pub pipeline_state_changes: u64,
    /// Buffer uploads (set-data calls and copies into buffers).
    pub buffer_uploads: u64,
    /// Bytes uploaded into buffers.
    pub buffer_bytes_uploaded: u64,
    /// Resource barrier transitions.
    pub barriers: u64,
    /// Hazards detected by barrier validation.
    pub hazards: u64,
}

/// Lock-free counters backing a [`RenderStatistics`] snapshot.
#[derive(Debug, Default)]
pub struct StatsCounters {
    draw_calls: AtomicU64,
    triangles_drawn: AtomicU64,
    vertices_processed: AtomicU64,
    dispatches: AtomicU64,
    texture_binds: AtomicU64,
    shader_binds: AtomicU64,
    pipeline_state_changes: AtomicU64,
    buffer_uploads: AtomicU64,
    buffer_bytes_uploaded: AtomicU64,
    barriers: AtomicU64,
    hazards: AtomicU64,
}

impl StatsCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one draw of `vertex_count` vertices times `instance_count` instances.
    pub fn record_draw(&self, topology: PrimitiveTopology, vertex_count: u32, instance_count: u32) {
        let instances = instance_count.max(1) as u64;
        self.draw_calls.fetch_add(1, Ordering::Relaxed);
        self.vertices_processed
            .fetch_add(vertex_count as u64 * instances, Ordering::Relaxed);
        self.triangles_drawn.fetch_add(
            topology.triangle_count(vertex_count) as u64 * instances,
            Ordering::Relaxed,
        );
    }

    /// Records one compute dispatch.
    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a texture bind.
    pub fn record_texture_bind(&self) {
        self.texture_binds.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a pipeline bind, which also binds its shader.
    pub fn record_pipeline_bind(&self) {
        self.pipeline_state_changes.fetch_add(1, Ordering::Relaxed);
        self.shader_binds.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a buffer upload of `bytes` bytes.
    pub fn record_upload(&self, bytes: u64) {
        self.buffer_uploads.fetch_add(1, Ordering::Relaxed);
        self.buffer_bytes_uploaded
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records `count` barrier transitions.
    pub fn record_barriers(&self, count: u64) {
        self.barriers.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a hazard found by barrier validation.
    pub fn record_hazard(&self) {
        self.hazards.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot for reporting.
    pub fn snapshot(&self) -> RenderStatistics {
        RenderStatistics {
            draw_calls: self.draw_calls.load(Ordering::Relaxed),
            triangles_drawn: self.triangles_drawn.load(Ordering::Relaxed),
            vertices_processed: self.vertices_processed.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            texture_binds: self.texture_binds.load(Ordering::Relaxed),
            shader_binds: self.shader_binds.load(Ordering::Relaxed),
            pipeline_state_changes: self.pipeline_state_changes.load(Ordering::Relaxed),
            buffer_uploads: self.buffer_uploads.load(Ordering::Relaxed),
            buffer_bytes_uploaded: self.buffer_bytes_uploaded.load(Ordering::Relaxed),
            barriers: self.barriers.load(Ordering::Relaxed),
            hazards: self.hazards.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.draw_calls,
            &self.triangles_drawn,
            &self.vertices_processed,
            &self.dispatches,
            &self.texture_binds,
            &self.shader_binds,
            &self.pipeline_state_changes,
            &self.buffer_uploads,
            &self.buffer_bytes_uploaded,
            &self.barriers,
            &self.hazards,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Live allocation totals, maintained by the device's handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocationStatistics {
    /// Live buffers.
    pub buffer_count: u64,
    /// Bytes held by live buffers.
    pub buffer_bytes: u64,
    /// Live textures.
    pub texture_count: u64,
    /// Bytes held by live textures.
    pub texture_bytes: u64,
    /// Every other live resource (shaders, pipelines, samplers, ...).
    pub other_count: u64,
    /// Bytes held by every live resource.
    pub total_bytes: u64,
    /// Highest `total_bytes` seen.
    pub peak_bytes: u64,
    /// Handles ever issued.
    pub total_allocations: u64,
    /// Handles ever released.
    pub total_releases: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_accounting_includes_instances() {
        let stats = StatsCounters::new();
        stats.record_draw(PrimitiveTopology::TriangleList, 6, 3);
        stats.record_draw(PrimitiveTopology::LineList, 4, 0);
        let snap = stats.snapshot();
        assert_eq!(snap.draw_calls, 2);
        assert_eq!(snap.triangles_drawn, 6);
        assert_eq!(snap.vertices_processed, 18 + 4);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = StatsCounters::new();
        stats.record_upload(128);
        stats.record_pipeline_bind();
        stats.record_hazard();
        stats.reset();
        assert_eq!(stats.snapshot(), RenderStatistics::default());
    }
}
