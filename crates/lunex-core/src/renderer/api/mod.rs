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

//! Plain-data types of the render hardware interface.
//!
//! Everything in here is a value: descriptors, enums, state blocks, statistics and
//! the command vocabulary. None of it talks to a backend.

pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod pipeline;
pub mod reflection;
pub mod stats;
pub mod texel;
pub mod texture;
pub mod types;
pub mod uniform;

pub use self::buffer::*;
pub use self::capabilities::*;
pub use self::command::*;
pub use self::pipeline::*;
pub use self::reflection::*;
pub use self::stats::*;
pub use self::texel::*;
pub use self::texture::*;
pub use self::types::*;
pub use self::uniform::*;
