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

//! CPU-side values for loose shader uniforms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value assigned to a loose (non-block) uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
    IntArray(Vec<i32>),
}

impl UniformValue {
    /// Interprets the value as a color, padding missing channels with `1.0`.
    pub fn as_vec4(&self) -> Option<[f32; 4]> {
        match *self {
            UniformValue::Float(v) => Some([v, v, v, 1.0]),
            UniformValue::Vec3([x, y, z]) => Some([x, y, z, 1.0]),
            UniformValue::Vec4(v) => Some(v),
            _ => None,
        }
    }
}

/// A snapshot of every loose uniform of a program, keyed by name.
pub type UniformValues = BTreeMap<String, UniformValue>;
