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

//! Engine-level RHI settings, loadable from any `serde` format.

use crate::renderer::api::BackendKind;
use crate::renderer::command_pool::CommandPoolConfig;
use crate::renderer::context::ContextDesc;
use serde::{Deserialize, Serialize};

/// Top-level RHI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiSettings {
    /// Backend used when the application does not ask for one.
    pub default_backend: BackendKind,
    /// Turns on backend validation (barrier hazard tracking).
    pub enable_validation: bool,
    /// Forwards debug groups and markers to the log.
    pub enable_debug_markers: bool,
    /// Frames the CPU may record ahead.
    pub frames_in_flight: u32,
    /// Limits of command pools created from these settings.
    pub command_pool: CommandPoolConfig,
    /// Frames an unused pooled render target survives before it is freed.
    pub render_target_retention_frames: u32,
}

impl Default for RhiSettings {
    fn default() -> Self {
        Self {
            default_backend: BackendKind::default(),
            enable_validation: cfg!(debug_assertions),
            enable_debug_markers: cfg!(debug_assertions),
            frames_in_flight: 2,
            command_pool: CommandPoolConfig::default(),
            render_target_retention_frames: 3,
        }
    }
}

impl RhiSettings {
    /// A [`ContextDesc`] for `app_name` built from these settings.
    pub fn context_desc(&self, app_name: &str) -> ContextDesc {
        ContextDesc {
            backend: self.default_backend,
            app_name: app_name.to_owned(),
            enable_validation: self.enable_validation,
            enable_debug_markers: self.enable_debug_markers,
            frames_in_flight: self.frames_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip_through_json() {
        let settings = RhiSettings {
            default_backend: BackendKind::Immediate,
            render_target_retention_frames: 8,
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: RhiSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn context_desc_follows_settings() {
        let settings = RhiSettings {
            default_backend: BackendKind::Immediate,
            enable_validation: true,
            ..Default::default()
        };
        let desc = settings.context_desc("Sandbox");
        assert_eq!(desc.backend, BackendKind::Immediate);
        assert!(desc.enable_validation);
        assert_eq!(desc.app_name, "Sandbox");
    }
}
