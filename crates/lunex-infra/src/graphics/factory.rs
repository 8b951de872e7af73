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

//! Backend selection for [`Context::initialize`].

use crate::graphics::deferred::DeferredBackend;
use crate::graphics::immediate::ImmediateBackend;
use lunex_core::renderer::traits::{BackendFactory, RenderBackend};
use lunex_core::renderer::{BackendKind, Context, ContextDesc, RenderError};
use std::sync::Arc;

/// Creates the software-backed implementations of both submission models.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftBackendFactory;

impl SoftBackendFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self
    }
}

impl BackendFactory for SoftBackendFactory {
    fn create_backend(&self, desc: &ContextDesc) -> Result<Arc<dyn RenderBackend>, RenderError> {
        let backend: Arc<dyn RenderBackend> = match desc.backend {
            BackendKind::Immediate => Arc::new(ImmediateBackend::new()),
            BackendKind::Deferred => Arc::new(DeferredBackend::new(desc.enable_validation)?),
        };
        let info = backend.info();
        log::info!(
            "SoftBackendFactory: '{}' runs on {} {} ({})",
            desc.app_name,
            info.api_name,
            info.api_version,
            info.renderer
        );
        Ok(backend)
    }

    fn is_backend_supported(&self, kind: BackendKind) -> bool {
        matches!(kind, BackendKind::Immediate | BackendKind::Deferred)
    }
}

/// Brings up a [`Context`] on the software backends.
///
/// The immediate backend is bound to the calling thread.
pub fn create_context(desc: ContextDesc) -> Result<Context, RenderError> {
    Context::initialize(desc, &SoftBackendFactory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunex_core::renderer::SubmissionModel;

    #[test]
    fn both_backends_are_supported() {
        let factory = SoftBackendFactory::new();
        assert!(factory.is_backend_supported(BackendKind::Immediate));
        assert!(factory.is_backend_supported(BackendKind::Deferred));
    }

    #[test]
    fn factory_honours_the_requested_kind() {
        let factory = SoftBackendFactory::new();
        for (kind, model) in [
            (BackendKind::Immediate, SubmissionModel::Immediate),
            (BackendKind::Deferred, SubmissionModel::Deferred),
        ] {
            let desc = ContextDesc { backend: kind, ..ContextDesc::default() };
            let backend = factory.create_backend(&desc).unwrap();
            assert_eq!(backend.info().kind, kind);
            assert_eq!(backend.submission_model(), model);
            backend.shutdown();
        }
    }
}
