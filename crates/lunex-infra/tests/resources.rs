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

//! Resource lifetime, mapping and creation rules on both backends.

mod common;

use common::{context, flat_pipeline_desc, FLAT_SHADER, BACKENDS};
use lunex_core::renderer::{
    BufferAccess, BufferDesc, BufferType, BufferUsage, ResourceError, Resource, Sampler,
    SamplerCache, SamplerState, TextureDesc, TextureFilter, TextureFormat, TextureRegion,
};
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Buffers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_static_buffer_returns_its_initial_data() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let data: Vec<u8> = (0..64).collect();
        let desc = BufferDesc::new(BufferType::Vertex, BufferUsage::Static, data.len() as u64);
        let buffer = device.create_buffer(desc, Some(&data)).unwrap();
        assert_eq!(buffer.get_all_data().unwrap(), data, "{kind}");
        assert_eq!(buffer.get_data(60, 4).unwrap(), vec![60, 61, 62, 63]);
    }
}

#[test]
fn test_staged_updates_are_visible_to_reads() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let desc = BufferDesc::new(BufferType::Uniform, BufferUsage::Static, 16);
        let buffer = device.create_buffer(desc, None).unwrap();
        buffer.set_data(&[9, 8, 7, 6], 4).unwrap();
        assert_eq!(buffer.get_data(0, 8).unwrap(), vec![0, 0, 0, 0, 9, 8, 7, 6], "{kind}");
        assert_eq!(buffer.set_data(&[0; 8], 12), Err(ResourceError::OutOfBounds));
    }
}

#[test]
fn test_double_map_is_refused() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, 8);
        let buffer = device.create_buffer(desc, Some(&[1; 8])).unwrap();

        let first = buffer.map(BufferAccess::READ_WRITE);
        assert!(first.valid);
        let second = buffer.map_range(0, 4, BufferAccess::READ);
        assert!(!second.valid, "{kind}: a second mapping was handed out");
        assert_eq!(buffer.mapped_range(), Some(first));

        buffer.write_mapped(2, &[5, 5]).unwrap();
        assert_eq!(buffer.read_mapped(0, 4).unwrap(), vec![1, 1, 5, 5]);
        assert!(buffer.unmap());
        assert!(!buffer.unmap());
        assert_eq!(buffer.get_data(0, 4).unwrap(), vec![1, 1, 5, 5], "{kind}");
    }
}

#[test]
fn test_destroying_a_buffer_releases_its_bytes() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let before = device.allocation_statistics();
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, 1024);
        let buffer = device.create_buffer(desc, None).unwrap();
        let handle = buffer.handle();
        assert!(device.allocation_statistics().total_bytes >= before.total_bytes + 1024);

        drop(buffer);
        device.wait_idle();
        assert!(!device.is_alive(handle), "{kind}");
        assert_eq!(device.allocation_statistics().total_bytes, before.total_bytes);
    }
}

#[test]
fn test_oversized_buffers_are_refused() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let before = device.allocation_statistics();
        let desc = BufferDesc::new(BufferType::Uniform, BufferUsage::Dynamic, 1 << 62);
        assert!(device.create_buffer(desc, None).is_err(), "{kind}");
        assert_eq!(device.allocation_statistics().total_bytes, before.total_bytes);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Textures and samplers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_texture_resize_invalidates_the_old_image() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let texture = device
            .create_texture_2d(TextureDesc::texture_2d(16, 16, TextureFormat::RGBA8).with_label("resizable"))
            .unwrap();
        let old = texture.handle();

        texture.resize(32, 8).unwrap();

        assert_eq!((texture.width(), texture.height()), (32, 8));
        assert!(!device.is_alive(old), "{kind}: the pre-resize image is still alive");
        assert!(device.is_alive(texture.handle()));
        let texels = texture.get_data(&TextureRegion::rect(0, 0, 32, 8)).unwrap();
        assert_eq!(texels.len(), 32 * 8 * 4);
    }
}

#[test]
fn test_cube_and_array_textures_resize_every_layer() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let cube = device.create_texture_cube(TextureDesc::cube(8, TextureFormat::RGBA8)).unwrap();
        let old_cube = cube.handle();
        cube.resize(16).unwrap();
        assert_eq!(cube.size(), 16);
        assert_eq!(cube.array_layers(), 6);
        assert!(!device.is_alive(old_cube), "{kind}: the old cube map is still alive");
        assert_eq!(cube.get_data(&TextureRegion { array_layer: 5, ..TextureRegion::rect(0, 0, 16, 16) }).unwrap().len(), 16 * 16 * 4);

        let array = device
            .create_texture_2d_array(TextureDesc::array_2d(4, 4, 3, TextureFormat::RGBA8))
            .unwrap();
        array.resize(8, 2).unwrap();
        assert_eq!((array.width(), array.height(), array.layer_count()), (8, 2, 3), "{kind}");
        let layer = TextureRegion { array_layer: 2, ..TextureRegion::rect(0, 0, 8, 2) };
        assert_eq!(array.get_data(&layer).unwrap().len(), 8 * 2 * 4);
    }
}

#[test]
fn test_texture_upload_round_trips_a_region() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let texture = device
            .create_texture_2d(TextureDesc::texture_2d(4, 4, TextureFormat::RGBA8))
            .unwrap();
        let region = TextureRegion::rect(1, 1, 2, 2);
        let texels: Vec<u8> = (0..16).collect();
        texture.set_data(&region, &texels).unwrap();
        assert_eq!(texture.get_data(&region).unwrap(), texels, "{kind}");
        assert!(texture.set_data(&region, &texels[..8]).is_err());
    }
}

#[test]
fn test_sampler_presets_do_not_depend_on_creation_order() {
    let ctx = context(BACKENDS[0]);
    let device = ctx.device();
    for point_first in [false, true] {
        let (linear, point) = if point_first {
            let point = Sampler::create_point(device).unwrap();
            (Sampler::create_linear(device).unwrap(), point)
        } else {
            let linear = Sampler::create_linear(device).unwrap();
            (linear, Sampler::create_point(device).unwrap())
        };
        assert_eq!(linear.state().min_filter, TextureFilter::Linear);
        assert_eq!(linear.state().mag_filter, TextureFilter::Linear);
        assert_eq!(point.state().min_filter, TextureFilter::Nearest);
        assert_eq!(point.state().mag_filter, TextureFilter::Nearest);
    }
    let shadow = Sampler::create_shadow(device).unwrap();
    assert!(shadow.state().compare.is_some());
}

#[test]
fn test_sampler_cache_shares_equal_states() {
    let ctx = context(BACKENDS[1]);
    let device = ctx.device();
    let cache = SamplerCache::new();
    let a = cache.get_or_create(device, SamplerState::linear()).unwrap();
    let b = cache.get_or_create(device, SamplerState::linear()).unwrap();
    let c = cache.get_or_create(device, SamplerState::point()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(cache.len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Shaders
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_failed_reload_keeps_the_previous_program() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let shader = Arc::new(device.create_shader("flat", FLAT_SHADER).unwrap());
        let before = shader.reflection();
        assert_eq!(before.vertex_inputs.len(), 1);

        let broken = "#type vertex\n#version 450\nvoid main() { gl_Position = ; }\n";
        assert!(shader.reload_from_source(broken).is_err(), "{kind}");
        assert!(Arc::ptr_eq(&before, &shader.reflection()), "{kind}: reflection changed");
        assert!(shader.is_valid());

        // The untouched program still links into a pipeline.
        assert!(device.create_pipeline(&flat_pipeline_desc(shader.clone())).is_ok());
    }
}

#[test]
fn test_unknown_stage_marker_fails_creation() {
    let ctx = context(BACKENDS[0]);
    let device = ctx.device();
    let source = "#type mesh\nvoid main() {}\n";
    assert!(device.create_shader("mesh", source).is_err());
}
