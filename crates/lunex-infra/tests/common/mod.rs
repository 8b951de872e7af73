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

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use lunex_core::math::LinearRgba;
use lunex_core::renderer::{
    BackendKind, BufferUsage, Context, ContextDesc, DataType, Device, GraphicsPipeline,
    GraphicsPipelineDesc, Shader, VertexBuffer, VertexLayout,
};
use lunex_infra::create_context;
use std::sync::Arc;

/// Every backend the software factory can bring up.
pub const BACKENDS: [BackendKind; 2] = [BackendKind::Immediate, BackendKind::Deferred];

/// Passes positions through and writes `u_Color`.
pub const FLAT_SHADER: &str = "\
#type vertex
#version 450
layout(location = 0) in vec3 a_Position;
void main() { gl_Position = vec4(a_Position, 1.0); }
#type fragment
#version 450
uniform vec4 u_Color;
layout(location = 0) out vec4 o_Color;
void main() { o_Color = u_Color; }
";

/// A 64-wide compute shader over one storage buffer.
pub const FILL_SHADER: &str = "\
#type compute
#version 450
layout(local_size_x = 64) in;
layout(std430, binding = 0) buffer Data { uint values[]; };
void main() { values[gl_GlobalInvocationID.x] = 1u; }
";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Brings up a context with validation on, bound to the calling thread.
pub fn context(kind: BackendKind) -> Context {
    init_logging();
    let desc = ContextDesc {
        backend: kind,
        app_name: format!("{kind} test"),
        enable_validation: true,
        ..ContextDesc::default()
    };
    create_context(desc).expect("the software backends always initialize")
}

pub fn position_layout() -> VertexLayout {
    VertexLayout::new().push("a_Position", DataType::Float3, false)
}

/// One triangle covering the whole viewport.
pub fn fullscreen_triangle(device: &Device) -> VertexBuffer {
    let positions: [f32; 9] = [-1.0, -1.0, 0.0, 3.0, -1.0, 0.0, -1.0, 3.0, 0.0];
    device
        .create_vertex_buffer(bytemuck::cast_slice(&positions), position_layout(), BufferUsage::Static)
        .unwrap()
}

pub fn flat_shader(device: &Device, color: LinearRgba) -> Arc<Shader> {
    let shader = device.create_shader("flat", FLAT_SHADER).unwrap();
    shader.set_vec4("u_Color", [color.r, color.g, color.b, color.a]);
    Arc::new(shader)
}

pub fn flat_pipeline_desc(shader: Arc<Shader>) -> GraphicsPipelineDesc {
    GraphicsPipelineDesc::new()
        .with_shader(shader)
        .with_layout(position_layout())
        .with_label("flat")
}

pub fn flat_pipeline(device: &Device, color: LinearRgba) -> GraphicsPipeline {
    device.create_pipeline(&flat_pipeline_desc(flat_shader(device, color))).unwrap()
}
