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

//! Defines the hierarchy of error types for the render hardware interface.
//!
//! Nothing in the RHI panics across its public boundary: creation paths return these
//! errors (after logging them), sequencing misuse is logged and skipped, and
//! backend-fatal startup failures surface as [`RenderError::InitializationFailed`].

use crate::renderer::api::ShaderStage;
use std::fmt;

/// An error related to the loading, compilation or validation of a shader program.
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderError {
    /// The shader source could not be read from disk.
    LoadError {
        /// File that could not be read.
        path: String,
        /// I/O error text.
        source_error: String,
    },
    /// A stage failed to parse or compile.
    CompilationError {
        /// The debug label of the shader.
        label: String,
        /// The stage that failed.
        stage: ShaderStage,
        /// Front-end diagnostics.
        details: String,
    },
    /// A stage compiled but failed semantic validation.
    ValidationError {
        /// The debug label of the shader.
        label: String,
        /// The stage that failed.
        stage: ShaderStage,
        /// Validator diagnostics.
        details: String,
    },
    /// The source did not contain a stage the program requires.
    MissingStage {
        /// The debug label of the shader.
        label: String,
        /// The stage that was expected.
        stage: ShaderStage,
    },
    /// A `#type` marker named a stage the front end does not know.
    UnknownStageMarker(String),
    /// A named shader was not found in a library.
    NotFound(String),
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::LoadError { path, source_error } => {
                write!(f, "cannot read shader '{path}': {source_error}")
            }
            ShaderError::CompilationError {
                label,
                stage,
                details,
            } => {
                write!(
                    f,
                    "shader '{label}' failed to compile its {stage:?} stage: {details}"
                )
            }
            ShaderError::ValidationError {
                label,
                stage,
                details,
            } => {
                write!(
                    f,
                    "shader '{label}' failed validation of its {stage:?} stage: {details}"
                )
            }
            ShaderError::MissingStage { label, stage } => {
                write!(f, "shader '{label}' has no {stage:?} stage")
            }
            ShaderError::UnknownStageMarker(marker) => {
                write!(f, "unknown stage marker '#type {marker}'")
            }
            ShaderError::NotFound(name) => write!(f, "no shader named '{name}'"),
        }
    }
}

impl std::error::Error for ShaderError {}

/// Raised while building a graphics or compute pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The pipeline referenced a shader that is no longer alive.
    InvalidShader {
        /// Pipeline label.
        pipeline_label: String,
    },
    /// A graphics pipeline was given a shader without a vertex stage.
    MissingVertexStage {
        /// Pipeline label.
        pipeline_label: String,
    },
    /// A compute pipeline was given a shader without a compute stage.
    MissingComputeStage {
        /// Pipeline label.
        pipeline_label: String,
    },
    /// The vertex layout does not provide an attribute the shader consumes.
    VertexLayoutMismatch(String),
    /// A color or depth format is not renderable.
    IncompatibleRenderTarget(String),
    /// The device lacks a feature the pipeline needs.
    FeatureNotSupported(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidShader { pipeline_label } => {
                write!(f, "pipeline '{pipeline_label}' references a dead shader")
            }
            PipelineError::MissingVertexStage { pipeline_label } => {
                write!(f, "pipeline '{pipeline_label}' has no vertex stage")
            }
            PipelineError::MissingComputeStage { pipeline_label } => {
                write!(f, "pipeline '{pipeline_label}' has no compute stage")
            }
            PipelineError::VertexLayoutMismatch(msg) => {
                write!(f, "vertex layout does not match the shader: {msg}")
            }
            PipelineError::IncompatibleRenderTarget(msg) => {
                write!(f, "format cannot be rendered to: {msg}")
            }
            PipelineError::FeatureNotSupported(msg) => {
                write!(f, "device lacks {msg}")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Raised when a buffer, texture, sampler, shader or pipeline cannot be created or accessed.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Shader failure.
    Shader(ShaderError),
    /// Pipeline failure.
    Pipeline(PipelineError),
    /// No live resource behind the handle.
    NotFound,
    /// The handle used to reference a resource is stale or was never issued.
    InvalidHandle,
    /// The descriptor describes a resource that cannot exist (zero size, bad mip count...).
    InvalidDescriptor(String),
    /// The device cannot create this kind of resource.
    Unsupported(String),
    /// A byte range or texel region exceeds the resource.
    OutOfBounds,
    /// Backend-internal failure.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "shader: {err}"),
            ResourceError::Pipeline(err) => write!(f, "pipeline: {err}"),
            ResourceError::NotFound => write!(f, "resource not found"),
            ResourceError::InvalidHandle => write!(f, "stale or foreign resource handle"),
            ResourceError::InvalidDescriptor(msg) => {
                write!(f, "invalid descriptor: {msg}")
            }
            ResourceError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            ResourceError::OutOfBounds => write!(f, "access out of bounds"),
            ResourceError::BackendError(msg) => {
                write!(f, "backend: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            ResourceError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        ResourceError::Pipeline(err)
    }
}

/// A high-level error from the context, device or queue.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// The backend could not be brought up.
    InitializationFailed(String),
    /// The requested backend is not compiled in or not supported on this platform.
    BackendUnavailable(String),
    /// The swapchain could not hand out an image.
    SurfaceAcquisitionFailed(String),
    /// A resource operation failed.
    ResourceError(ResourceError),
    /// The device was lost (queue thread gone) and needs reinitialization.
    DeviceLost,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InitializationFailed(msg) => {
                write!(f, "backend initialization failed: {msg}")
            }
            RenderError::BackendUnavailable(msg) => write!(f, "Backend unavailable: {msg}"),
            RenderError::SurfaceAcquisitionFailed(msg) => {
                write!(f, "no swapchain image available: {msg}")
            }
            RenderError::ResourceError(err) => {
                write!(f, "resource error: {err}")
            }
            RenderError::DeviceLost => f.write_str("device lost; create a new context"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::ResourceError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::ResourceError(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn shader_errors_name_the_shader() {
        let err = ShaderError::LoadError {
            path: "shaders/flat.glsl".to_owned(),
            source_error: "No such file or directory".to_owned(),
        };
        assert_eq!(err.to_string(), "cannot read shader 'shaders/flat.glsl': No such file or directory");

        let err = ShaderError::MissingStage {
            label: "Flat".to_owned(),
            stage: ShaderStage::FRAGMENT,
        };
        assert!(err.to_string().starts_with("shader 'Flat' has no"));
    }

    #[test]
    fn resource_error_wraps_pipeline_error() {
        let res_err: ResourceError = PipelineError::MissingVertexStage {
            pipeline_label: "Sky".to_owned(),
        }
        .into();
        assert_eq!(res_err.to_string(), "pipeline: pipeline 'Sky' has no vertex stage");
        assert!(res_err.source().is_some());
    }

    #[test]
    fn render_error_chains_sources() {
        let res_err: ResourceError = ShaderError::NotFound("Sky".to_owned()).into();
        let render_err: RenderError = res_err.into();
        assert_eq!(render_err.to_string(), "resource error: shader: no shader named 'Sky'");
        assert!(render_err.source().is_some());
        assert!(render_err.source().unwrap().source().is_some());
    }
}
