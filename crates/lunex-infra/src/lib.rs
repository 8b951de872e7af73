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

//! # Lunex Infra
//!
//! Concrete backends for the traits defined in `lunex-core`.
//!
//! Everything runs on a CPU-side software GPU: a tile-less rasterizer, a texel
//! sampler, a GLSL front end built on `naga`, and native compute kernels. The
//! [`ImmediateBackend`](graphics::ImmediateBackend) and
//! [`DeferredBackend`](graphics::DeferredBackend) expose it with GL-style and
//! Vulkan-style submission respectively.

#![warn(missing_docs)]

pub mod graphics;

pub use graphics::{create_context, DeferredBackend, ImmediateBackend, SoftBackendFactory};
