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

//! End-to-end rendering on both backends.

mod common;

use approx::assert_relative_eq;
use common::{
    context, flat_pipeline, flat_pipeline_desc, flat_shader, fullscreen_triangle, position_layout, BACKENDS,
};
use lunex_core::math::LinearRgba;
use lunex_core::renderer::{
    ClearValue, CommandListState, FramebufferDesc, GraphicsPipelineDesc, PipelineCache, PrimitiveTopology,
    Resource, SwapchainDesc, TextureDesc, TextureFilter, TextureFormat,
};
use std::sync::Arc;

const TRIANGLE: LinearRgba = LinearRgba::new(0.0, 1.0, 0.0, 1.0);
const CLEAR: LinearRgba = LinearRgba::new(0.0, 0.0, 0.0, 1.0);

#[test]
fn test_fullscreen_triangle_covers_the_centre() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let framebuffer = device
            .create_framebuffer(
                &FramebufferDesc::new(256, 256)
                    .add_color_attachment(TextureFormat::RGBA8)
                    .with_depth(TextureFormat::Depth24Stencil8)
                    .with_label("scene"),
            )
            .unwrap();
        let pipeline = flat_pipeline(device, TRIANGLE);
        let vertices = fullscreen_triangle(device);

        let mut cmd = device.create_command_list("scene");
        cmd.begin();
        cmd.begin_render_pass(
            &framebuffer,
            &[ClearValue::Color(CLEAR), ClearValue::DepthStencil { depth: 1.0, stencil: 0 }],
        );
        cmd.set_pipeline(&pipeline);
        cmd.set_vertex_buffer(0, &vertices, 0);
        cmd.draw(3, 1, 0, 0);
        cmd.end_render_pass();
        cmd.end();
        assert_eq!(cmd.state(), CommandListState::Executable);
        device.queue().submit_one(&cmd, None).unwrap();
        device.wait_idle();

        let centre = framebuffer.read_pixel(0, 128, 128).unwrap();
        assert_relative_eq!(centre.r, TRIANGLE.r);
        assert_relative_eq!(centre.g, TRIANGLE.g, epsilon = 1e-6);
        assert_relative_eq!(centre.b, TRIANGLE.b);
        assert_ne!(centre, CLEAR, "{kind}: the centre still holds the clear colour");

        let depth = framebuffer.read_depth(128, 128).unwrap();
        assert!(depth < 1.0, "{kind}: the triangle did not write depth");

        let executed = device.executed_statistics();
        assert_eq!(executed.draw_calls, 1, "{kind}");
        assert_eq!(executed.triangles_drawn, 1, "{kind}");
        assert_eq!(device.statistics().draw_calls, 1, "{kind}");
    }
}

#[test]
fn test_fragment_shader_output_reaches_the_target() {
    const GREEN_SHADER: &str = "\
#type vertex
#version 450
layout(location = 0) in vec3 a_Position;
void main() { gl_Position = vec4(a_Position, 1.0); }
#type fragment
#version 450
layout(location = 0) out vec4 o_Color;
void main() { o_Color = vec4(0.0, 1.0, 0.0, 1.0); }
";
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let framebuffer = device
            .create_framebuffer(&FramebufferDesc::new(16, 16).add_color_attachment(TextureFormat::RGBA8))
            .unwrap();
        let shader = Arc::new(device.create_shader("green", GREEN_SHADER).unwrap());
        let pipeline = device
            .create_pipeline(&GraphicsPipelineDesc::new().with_shader(shader).with_layout(position_layout()))
            .unwrap();
        let vertices = fullscreen_triangle(device);

        let mut cmd = device.create_command_list("green");
        cmd.begin();
        cmd.begin_render_pass(&framebuffer, &[ClearValue::Color(CLEAR)]);
        cmd.set_pipeline(&pipeline);
        cmd.set_vertex_buffer(0, &vertices, 0);
        cmd.draw(3, 1, 0, 0);
        cmd.end_render_pass();
        cmd.end();
        device.queue().submit_one(&cmd, None).unwrap();
        device.wait_idle();

        assert_eq!(framebuffer.read_pixel(0, 8, 8).unwrap(), TRIANGLE, "{kind}");
        assert_eq!(framebuffer.read_pixel(0, 0, 15).unwrap(), TRIANGLE, "{kind}");
    }
}

#[test]
fn test_draws_finish_after_their_shader_and_pipeline_are_dropped() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let framebuffer = device
            .create_framebuffer(&FramebufferDesc::new(8, 8).add_color_attachment(TextureFormat::RGBA8))
            .unwrap();
        let shader = flat_shader(device, TRIANGLE);
        let pipeline = device.create_pipeline(&flat_pipeline_desc(shader.clone())).unwrap();
        let (shader_handle, pipeline_handle) = (shader.handle(), pipeline.handle());
        let vertices = fullscreen_triangle(device);

        let mut cmd = device.create_command_list("orphaned");
        cmd.begin();
        cmd.begin_render_pass(&framebuffer, &[ClearValue::Color(CLEAR)]);
        cmd.set_pipeline(&pipeline);
        cmd.set_vertex_buffer(0, &vertices, 0);
        cmd.draw(3, 1, 0, 0);
        cmd.end();
        device.queue().submit_one(&cmd, None).unwrap();
        drop(pipeline);
        drop(shader);
        device.wait_idle();

        assert_eq!(framebuffer.read_pixel(0, 4, 4).unwrap(), TRIANGLE, "{kind}");
        assert!(!device.is_alive(shader_handle), "{kind}");
        assert!(!device.is_alive(pipeline_handle), "{kind}");
    }
}

#[test]
fn test_draw_before_begin_has_no_effect() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let pipeline = flat_pipeline(device, TRIANGLE);

        let mut cmd = device.create_command_list("early");
        cmd.set_pipeline(&pipeline);
        cmd.draw(3, 1, 0, 0);
        cmd.draw_indexed(3, 1, 0, 0, 0);
        cmd.dispatch(1, 1, 1);

        assert_eq!(cmd.state(), CommandListState::Initial);
        assert_eq!(cmd.command_count(), 0);
        assert_eq!(cmd.bound_pipeline(), None);
        let recorded = device.statistics();
        assert_eq!(recorded.draw_calls, 0, "{kind}");
        assert_eq!(recorded.dispatches, 0, "{kind}");
        assert_eq!(device.executed_statistics().draw_calls, 0, "{kind}");
    }
}

#[test]
fn test_draw_without_a_pass_is_skipped() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let pipeline = flat_pipeline(device, TRIANGLE);
        let vertices = fullscreen_triangle(device);

        device
            .execute_immediate("stray", |cmd| {
                cmd.set_pipeline(&pipeline);
                cmd.set_vertex_buffer(0, &vertices, 0);
                cmd.draw(3, 1, 0, 0);
            })
            .unwrap();
        assert_eq!(device.statistics().draw_calls, 0, "{kind}");
        assert_eq!(device.executed_statistics().draw_calls, 0, "{kind}");
    }
}

#[test]
fn test_framebuffer_resize_replaces_owned_attachments() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let framebuffer = device
            .create_framebuffer(
                &FramebufferDesc::new(32, 32)
                    .add_color_attachment(TextureFormat::RGBA8)
                    .with_depth(TextureFormat::Depth32F),
            )
            .unwrap();
        let old_color = framebuffer.color_attachment(0).unwrap().handle();
        let old_depth = framebuffer.depth_attachment().unwrap().handle();

        framebuffer.resize(64, 16).unwrap();

        assert_eq!((framebuffer.width(), framebuffer.height()), (64, 16));
        let color = framebuffer.color_attachment(0).unwrap();
        assert_eq!((color.width(), color.height()), (64, 16));
        assert!(!device.is_alive(old_color), "{kind}: the old color image is still alive");
        assert!(!device.is_alive(old_depth), "{kind}: the old depth image is still alive");
        assert!(device.is_alive(color.handle()));

        framebuffer.clear(LinearRgba::RED).unwrap();
        assert_eq!(framebuffer.read_pixel(0, 63, 15).unwrap(), LinearRgba::RED);
    }
}

#[test]
fn test_resize_refuses_a_borrowed_attachment_of_another_size() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let borrowed = Arc::new(
            device
                .create_texture_2d(TextureDesc::render_target(16, 16, TextureFormat::RGBA8))
                .unwrap(),
        );
        let framebuffer = device
            .create_framebuffer(
                &FramebufferDesc::new(16, 16)
                    .add_color_texture(borrowed.clone())
                    .with_depth(TextureFormat::Depth24Stencil8),
            )
            .unwrap();
        let depth = framebuffer.depth_attachment().unwrap().handle();
        assert!(!framebuffer.is_attachment_owned(0));

        assert!(framebuffer.resize(32, 32).is_err(), "{kind}");
        assert_eq!((framebuffer.width(), framebuffer.height()), (16, 16));
        assert_eq!(framebuffer.depth_attachment().unwrap().handle(), depth);
        assert!(device.is_alive(depth), "{kind}: a failed resize freed the depth image");

        borrowed.resize(32, 32).unwrap();
        framebuffer.resize(32, 32).unwrap();
        assert_eq!(framebuffer.depth_attachment().unwrap().width(), 32, "{kind}");
    }
}

#[test]
fn test_pipeline_cache_hits_on_equal_descriptors() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let shader = flat_shader(device, TRIANGLE);
        let cache = PipelineCache::new();

        let desc = flat_pipeline_desc(shader.clone());
        let first = cache.get_or_create(device, &desc).unwrap();
        let second = cache.get_or_create(device, &desc.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "{kind}: equal descriptors built two pipelines");
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        let strip = flat_pipeline_desc(shader).with_topology(PrimitiveTopology::TriangleStrip);
        let third = cache.get_or_create(device, &strip).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 2);
    }
}

#[test]
fn test_offscreen_swapchain_presents_a_blitted_frame() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let framebuffer = device
            .create_framebuffer(&FramebufferDesc::new(16, 16).add_color_attachment(TextureFormat::RGBA8))
            .unwrap();
        framebuffer.clear(LinearRgba::RED).unwrap();
        let swapchain = ctx.create_swapchain(SwapchainDesc::new(32, 32)).unwrap();

        assert!(swapchain.acquire_next_image().is_some());
        framebuffer.blit_to_screen(&swapchain, TextureFilter::Nearest).unwrap();
        swapchain.present().unwrap();

        assert_eq!(swapchain.frames_presented(), 1);
        assert_eq!(swapchain.read_presented_pixel(31, 31).unwrap(), LinearRgba::RED, "{kind}");

        // A minimized window reports a zero size; the swapchain keeps its images.
        swapchain.resize(0, 0).unwrap();
        assert_eq!(swapchain.size(), (32, 32));
    }
}
