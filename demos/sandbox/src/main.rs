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

// Lunex sandbox
// Renders an indexed triangle on both backends and logs what each one executed.
//
// Usage: sandbox [settings.json]

use std::mem;

use anyhow::{Context as _, Result};
use lunex_core::math::LinearRgba;
use lunex_core::renderer::{
    BackendKind, BufferUsage, ClearValue, DataType, Device, FramebufferDesc, GraphicsPipelineDesc,
    RasterizerState, TextureFormat, VertexLayout,
};
use lunex_core::RhiSettings;
use lunex_infra::create_context;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 3],
}

impl Vertex {
    fn layout() -> VertexLayout {
        VertexLayout::new()
            .push("a_Position", DataType::Float3, false)
            .push("a_Color", DataType::Float3, false)
    }
}

const VERTICES: &[Vertex] = &[
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

const INDICES: &[u16] = &[0, 1, 2];

const SHADER: &str = "\
#type vertex
#version 450
layout(location = 0) in vec3 a_Position;
layout(location = 1) in vec3 a_Color;
layout(location = 0) out vec3 v_Color;
void main() {
    v_Color = a_Color;
    gl_Position = vec4(a_Position, 1.0);
}
#type fragment
#version 450
layout(location = 0) in vec3 v_Color;
layout(location = 0) out vec4 o_Color;
void main() { o_Color = vec4(v_Color, 1.0); }
";

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FRAMES: u32 = 3;

fn load_settings() -> Result<RhiSettings> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))
        }
        None => Ok(RhiSettings::default()),
    }
}

fn render(device: &Device) -> Result<LinearRgba> {
    let framebuffer = device.create_framebuffer(
        &FramebufferDesc::new(WIDTH, HEIGHT)
            .add_color_attachment(TextureFormat::RGBA8)
            .with_depth(TextureFormat::Depth24Stencil8)
            .with_label("sandbox"),
    )?;
    let shader = std::sync::Arc::new(device.create_shader("vertex_color", SHADER)?);
    let pipeline = device.create_pipeline(
        &GraphicsPipelineDesc::new()
            .with_shader(shader)
            .with_layout(Vertex::layout())
            .with_rasterizer(RasterizerState::no_cull())
            .with_render_pass(framebuffer.layout())
            .with_label("vertex_color"),
    )?;
    let vertices = device.create_vertex_buffer(bytemuck::cast_slice(VERTICES), Vertex::layout(), BufferUsage::Static)?;
    let indices = device.create_index_buffer_u16(INDICES, BufferUsage::Static)?;
    log::debug!("Sandbox: vertex stride is {} bytes", mem::size_of::<Vertex>());

    let fence = device.create_fence(false);
    for frame in 0..FRAMES {
        device.begin_frame();
        let mut cmd = device.create_command_list("sandbox frame");
        cmd.begin();
        cmd.begin_debug_event("triangle");
        cmd.begin_render_pass(
            &framebuffer,
            &[
                ClearValue::Color(LinearRgba::new(0.1, 0.1, 0.1, 1.0)),
                ClearValue::DepthStencil { depth: 1.0, stencil: 0 },
            ],
        );
        cmd.set_pipeline(&pipeline);
        cmd.set_vertex_buffer(0, &vertices, 0);
        cmd.set_index_buffer(&indices, 0);
        cmd.draw_indexed(indices.index_count(), 1, 0, 0, 0);
        cmd.end_render_pass();
        cmd.end_debug_event();
        cmd.end();
        device.queue().submit_one(&cmd, Some(&fence))?;
        if !fence.wait(Some(std::time::Duration::from_secs(5))) {
            anyhow::bail!("frame {frame} did not finish");
        }
        device.end_frame();
    }
    Ok(framebuffer.read_pixel(0, WIDTH / 2, HEIGHT / 2)?)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let settings = load_settings()?;

    for backend in [BackendKind::Immediate, BackendKind::Deferred] {
        let desc = lunex_core::ContextDesc {
            backend,
            ..settings.context_desc("Lunex Sandbox")
        };
        let context = create_context(desc)?;
        let device = context.device();
        let centre = render(device)?;
        log::info!("Sandbox: {backend} centre pixel is {centre:?}");
        log::info!("Sandbox: {backend} recorded {:?}", device.statistics());
        log::info!("Sandbox: {backend} executed {:?}", device.executed_statistics());
        log::info!("Sandbox: {backend} allocations {:?}", device.allocation_statistics());
        context.shutdown();
    }
    Ok(())
}
