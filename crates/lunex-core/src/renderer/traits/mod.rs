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

//! Defines the contracts that decouple the RHI from any concrete backend.
//!
//! - [`RenderBackend`]: the dispatch table a device forwards to.
//! - [`CommandSink`]: where validated commands go while a list records.
//! - [`BackendFactory`]: brings a backend up for a context.
//! - [`ComputeKernel`]: CPU code attached to compute pipelines.

mod backend;
mod kernel;

pub use self::backend::*;
pub use self::kernel::*;
