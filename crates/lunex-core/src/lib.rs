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

//! # Lunex Core
//!
//! Backend-agnostic half of the Lunex render hardware interface (RHI).
//!
//! This crate owns every contract the rest of the engine programs against:
//! resource descriptors, the command vocabulary, the command-list state machine,
//! pooling and caching helpers, and the [`Device`](renderer::Device) /
//! [`Context`](renderer::Context) façade. Concrete execution lives behind the
//! [`RenderBackend`](renderer::traits::RenderBackend) trait, implemented in
//! `lunex-infra`.

#![warn(missing_docs)]

pub mod math;
pub mod renderer;

pub use renderer::{Context, ContextDesc, Device, RhiSettings};
