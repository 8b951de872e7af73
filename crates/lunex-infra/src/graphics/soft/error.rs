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

use lunex_core::renderer::{ResourceError, ResourceHandle, TextureFormat};

/// Failures inside the software GPU.
///
/// These never cross the RHI boundary as-is; they are folded into
/// [`ResourceError`] variants.
#[derive(Debug, thiserror::Error)]
pub enum SoftGpuError {
    /// No object of this kind is stored under the handle.
    #[error("no {kind} is stored under {handle:?}")]
    UnknownHandle {
        /// Object kind ("buffer", "image", ...).
        kind: &'static str,
        /// The handle that failed to resolve.
        handle: ResourceHandle,
    },
    /// A byte range falls outside a buffer.
    #[error("range {offset}+{size} exceeds the {len}-byte buffer")]
    OutOfRange {
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        size: u64,
        /// Buffer length.
        len: u64,
    },
    /// A texture region falls outside its image.
    #[error("region {0} is outside the image")]
    BadRegion(String),
    /// The supplied data does not match the region size.
    #[error("expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Bytes the region holds.
        expected: u64,
        /// Bytes supplied.
        actual: u64,
    },
    /// The format cannot be stored or rasterized.
    #[error("{0:?} is not supported by the software GPU")]
    UnsupportedFormat(TextureFormat),
    /// The host could not allocate backing memory.
    #[error("cannot allocate {0} bytes of device memory")]
    OutOfMemory(u64),
    /// A shader invocation hit something the interpreter cannot execute.
    #[error("shader fault: {0}")]
    ShaderFault(String),
    /// The deferred queue thread has stopped.
    #[error("the queue thread has stopped")]
    QueueClosed,
}

impl From<SoftGpuError> for ResourceError {
    fn from(err: SoftGpuError) -> Self {
        match err {
            SoftGpuError::UnknownHandle { .. } => ResourceError::NotFound,
            SoftGpuError::OutOfRange { .. } | SoftGpuError::BadRegion(_) => ResourceError::OutOfBounds,
            SoftGpuError::UnsupportedFormat(format) => {
                ResourceError::Unsupported(format!("{format:?} textures"))
            }
            SoftGpuError::OutOfMemory(size) => {
                ResourceError::InvalidDescriptor(format!("{size} bytes exceed the host memory"))
            }
            other => ResourceError::BackendError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_onto_resource_errors() {
        let err = SoftGpuError::UnknownHandle {
            kind: "buffer",
            handle: ResourceHandle::INVALID,
        };
        assert_eq!(ResourceError::from(err), ResourceError::NotFound);
        let err = SoftGpuError::OutOfRange { offset: 4, size: 8, len: 8 };
        assert_eq!(ResourceError::from(err), ResourceError::OutOfBounds);
        assert!(matches!(
            ResourceError::from(SoftGpuError::QueueClosed),
            ResourceError::BackendError(_)
        ));
        assert!(matches!(
            ResourceError::from(SoftGpuError::OutOfMemory(1 << 62)),
            ResourceError::InvalidDescriptor(_)
        ));
    }
}
