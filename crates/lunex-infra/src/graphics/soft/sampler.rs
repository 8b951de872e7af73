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

//! Filtered texture lookups.

use super::memory::Image;
use lunex_core::math::LinearRgba;
use lunex_core::renderer::{SamplerState, TextureWrap};

/// Where a wrapped coordinate lands: a texel index or the border.
enum Wrapped {
    Texel(u32),
    Border,
}

fn wrap(mode: TextureWrap, i: i64, size: u32) -> Wrapped {
    let n = size as i64;
    match mode {
        TextureWrap::Repeat => Wrapped::Texel(i.rem_euclid(n) as u32),
        TextureWrap::MirroredRepeat => {
            let period = i.rem_euclid(2 * n);
            Wrapped::Texel(if period < n { period } else { 2 * n - 1 - period } as u32)
        }
        TextureWrap::ClampToEdge => Wrapped::Texel(i.clamp(0, n - 1) as u32),
        TextureWrap::ClampToBorder => {
            if (0..n).contains(&i) {
                Wrapped::Texel(i as u32)
            } else {
                Wrapped::Border
            }
        }
    }
}

fn fetch(image: &Image, state: &SamplerState, mip: u32, layer: u32, x: i64, y: i64, z: u32) -> LinearRgba {
    let e = image.mip_extent(mip);
    match (wrap(state.wrap_u, x, e.width), wrap(state.wrap_v, y, e.height)) {
        (Wrapped::Texel(x), Wrapped::Texel(y)) => image.load(mip, layer, x, y, z),
        _ => state.border_color,
    }
}

/// Samples `image` at normalized (u, v) on `layer`.
///
/// Magnification and minification both use `mag_filter`'s linearity; the mip level
/// is the sampler's `min_lod + lod_bias`, clamped to the chain, since the rasterizer
/// does not compute screen-space derivatives.
pub fn sample(image: &Image, state: &SamplerState, layer: u32, u: f32, v: f32) -> LinearRgba {
    sample_level(image, state, layer, [u, v, 0.0], None)
}

/// Samples `image` at normalized `uvw` on `layer`, at an explicit level of detail
/// when `lod` is given. `w` picks the nearest slice of a volume texture.
pub fn sample_level(image: &Image, state: &SamplerState, layer: u32, uvw: [f32; 3], lod: Option<f32>) -> LinearRgba {
    let max_mip = image.desc().mip_levels.saturating_sub(1) as f32;
    let mip = if state.min_filter.uses_mipmaps() {
        let level = lod.unwrap_or(state.min_lod) + state.lod_bias;
        level.max(state.min_lod).min(state.max_lod).min(max_mip).max(0.0).round() as u32
    } else {
        0
    };
    let [u, v, w] = uvw;
    let e = image.mip_extent(mip);
    let z = ((w * e.depth as f32).floor().max(0.0) as u32).min(e.depth.saturating_sub(1));
    let x = u * e.width as f32 - 0.5;
    let y = v * e.height as f32 - 0.5;
    if !state.mag_filter.is_linear() {
        return fetch(image, state, mip, layer, (x + 0.5).floor() as i64, (y + 0.5).floor() as i64, z);
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let c00 = fetch(image, state, mip, layer, x0, y0, z);
    let c10 = fetch(image, state, mip, layer, x0 + 1, y0, z);
    let c01 = fetch(image, state, mip, layer, x0, y0 + 1, z);
    let c11 = fetch(image, state, mip, layer, x0 + 1, y0 + 1, z);
    let top = LinearRgba::lerp(c00, c10, fx);
    let bottom = LinearRgba::lerp(c01, c11, fx);
    LinearRgba::lerp(top, bottom, fy)
}

/// Picks the face of a cube map a direction points at and the (u, v) on it.
pub fn cube_face(dir: [f32; 3]) -> (u32, f32, f32) {
    let [x, y, z] = dir;
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
    let (face, sc, tc, ma) = if ax >= ay && ax >= az {
        if x >= 0.0 {
            (0, -z, -y, ax)
        } else {
            (1, z, -y, ax)
        }
    } else if ay >= az {
        if y >= 0.0 {
            (2, x, z, ay)
        } else {
            (3, x, -z, ay)
        }
    } else if z >= 0.0 {
        (4, x, -y, az)
    } else {
        (5, -x, -y, az)
    };
    if ma == 0.0 {
        return (0, 0.5, 0.5);
    }
    (face, (sc / ma + 1.0) * 0.5, (tc / ma + 1.0) * 0.5)
}

/// Depth comparison lookup: 1.0 where `reference` passes the sampler's compare
/// function against the stored depth, 0.0 otherwise.
pub fn sample_compare(image: &Image, state: &SamplerState, u: f32, v: f32, reference: f32) -> f32 {
    let Some(compare) = state.compare else {
        return sample(image, state, 0, u, v).r;
    };
    let e = image.mip_extent(0);
    let x = (u * e.width as f32).floor() as i64;
    let y = (v * e.height as f32).floor() as i64;
    match (wrap(state.wrap_u, x, e.width), wrap(state.wrap_v, y, e.height)) {
        (Wrapped::Texel(x), Wrapped::Texel(y)) => {
            if compare.test(reference, image.depth_at(x, y)) {
                1.0
            } else {
                0.0
            }
        }
        _ => state.border_color.r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lunex_core::renderer::{TextureDesc, TextureFormat};

    fn checker() -> Image {
        let mut image = Image::new(&TextureDesc::texture_2d(2, 1, TextureFormat::RGBA32F)).unwrap();
        image.store(0, 0, 0, 0, 0, LinearRgba::BLACK);
        image.store(0, 0, 1, 0, 0, LinearRgba::WHITE);
        image
    }

    #[test]
    fn point_sampling_picks_the_covering_texel() {
        let image = checker();
        let state = SamplerState::point();
        assert_eq!(sample(&image, &state, 0, 0.25, 0.5), LinearRgba::BLACK);
        assert_eq!(sample(&image, &state, 0, 0.75, 0.5), LinearRgba::WHITE);
    }

    #[test]
    fn linear_sampling_blends_between_texel_centers() {
        let image = checker();
        let state = SamplerState::linear().with_wrap(TextureWrap::ClampToEdge);
        assert_relative_eq!(sample(&image, &state, 0, 0.5, 0.5).r, 0.5);
    }

    #[test]
    fn border_color_outside_the_image() {
        let image = checker();
        let state = SamplerState::shadow();
        assert_eq!(sample(&image, &state, 0, -0.5, 0.5), LinearRgba::WHITE);
    }

    #[test]
    fn explicit_lod_picks_the_mip() {
        let mut image = Image::new(&TextureDesc::texture_2d(2, 2, TextureFormat::RGBA32F).with_mips(2)).unwrap();
        image.clear(1, 0, None, lunex_core::renderer::ClearValue::Color(LinearRgba::RED));
        let state = SamplerState::default();
        assert_eq!(sample_level(&image, &state, 0, [0.5, 0.5, 0.0], Some(1.0)), LinearRgba::RED);
        assert_eq!(sample_level(&image, &state, 0, [0.5, 0.5, 0.0], Some(0.0)), LinearRgba::TRANSPARENT);
    }

    #[test]
    fn cube_directions_map_to_faces() {
        assert_eq!(cube_face([1.0, 0.0, 0.0]), (0, 0.5, 0.5));
        assert_eq!(cube_face([0.0, -2.0, 0.0]).0, 3);
        assert_eq!(cube_face([0.0, 0.0, -1.0]).0, 5);
    }

    #[test]
    fn repeat_and_mirror() {
        assert!(matches!(wrap(TextureWrap::Repeat, -1, 4), Wrapped::Texel(3)));
        assert!(matches!(wrap(TextureWrap::MirroredRepeat, 4, 4), Wrapped::Texel(3)));
        assert!(matches!(wrap(TextureWrap::ClampToEdge, 9, 4), Wrapped::Texel(3)));
    }
}
