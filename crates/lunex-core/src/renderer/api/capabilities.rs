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

//! Backend identification and the device capability table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which backend family to bring up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// GL-style backend: calls execute synchronously on the render thread.
    Immediate,
    /// Vulkan-style backend: calls are recorded and executed by a queue.
    #[default]
    Deferred,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Immediate => write!(f, "Immediate"),
            BackendKind::Deferred => write!(f, "Deferred"),
        }
    }
}

/// How command lists reach the device.
///
/// Code that must behave differently per backend (e.g. skipping barrier bookkeeping)
/// queries this instead of inspecting concrete backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionModel {
    /// Recording executes each call right away; submission only signals fences.
    Immediate,
    /// Recording appends opaque commands; submission hands them to a queue.
    Deferred,
}

impl SubmissionModel {
    /// `true` if barriers have observable effects.
    pub const fn requires_explicit_barriers(self) -> bool {
        matches!(self, SubmissionModel::Deferred)
    }

    /// `true` if command lists may be recorded from worker threads.
    pub const fn supports_parallel_recording(self) -> bool {
        matches!(self, SubmissionModel::Deferred)
    }
}

/// Identification of the active backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    /// Backend family.
    pub kind: BackendKind,
    /// Graphics API name.
    pub api_name: String,
    /// API version string.
    pub api_version: String,
    /// Renderer (device) name.
    pub renderer: String,
    /// Vendor name.
    pub vendor: String,
}

/// Limits and feature switches, discovered once at device construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct DeviceCapabilities {
    pub max_texture_size: u32,
    pub max_texture_3d_size: u32,
    pub max_cube_map_size: u32,
    pub max_array_layers: u32,
    pub max_color_attachments: u32,
    pub max_samples: u32,
    pub max_anisotropy: f32,
    pub max_vertex_attributes: u32,
    pub max_uniform_buffer_bindings: u32,
    pub max_uniform_buffer_size: u64,
    pub max_storage_buffer_bindings: u32,
    pub max_storage_buffer_size: u64,
    /// Largest buffer of any type, in bytes.
    pub max_buffer_size: u64,
    pub max_texture_slots: u32,
    pub max_compute_work_group_count: [u32; 3],
    pub max_compute_work_group_size: [u32; 3],
    pub max_compute_work_group_invocations: u32,
    pub supports_compute: bool,
    pub supports_geometry_shaders: bool,
    pub supports_tessellation: bool,
    pub supports_indirect_draw: bool,
    pub supports_multi_draw_indirect: bool,
    pub supports_indirect_count: bool,
    pub supports_compressed_textures: bool,
    pub supports_anisotropic_filtering: bool,
    pub supports_ray_tracing: bool,
    pub supports_mesh_shaders: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            max_texture_3d_size: 256,
            max_cube_map_size: 4096,
            max_array_layers: 256,
            max_color_attachments: 8,
            max_samples: 1,
            max_anisotropy: 16.0,
            max_vertex_attributes: 16,
            max_uniform_buffer_bindings: 16,
            max_uniform_buffer_size: 64 * 1024,
            max_storage_buffer_bindings: 8,
            max_storage_buffer_size: 128 * 1024 * 1024,
            max_buffer_size: 1 << 30,
            max_texture_slots: 16,
            max_compute_work_group_count: [65535, 65535, 65535],
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_work_group_invocations: 1024,
            supports_compute: true,
            supports_geometry_shaders: false,
            supports_tessellation: false,
            supports_indirect_draw: true,
            supports_multi_draw_indirect: true,
            supports_indirect_count: true,
            supports_compressed_textures: false,
            supports_anisotropic_filtering: true,
            supports_ray_tracing: false,
            supports_mesh_shaders: false,
        }
    }
}
