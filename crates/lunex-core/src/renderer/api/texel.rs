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

//! Conversion between texel bytes and colors or depth values.
//!
//! Used for single-pixel readbacks and by backends that store images in their
//! native byte layout. Block-compressed formats are not handled here.

use super::types::TextureFormat;
use crate::math::LinearRgba;
use half::f16;

const DEPTH24_MAX: f32 = 0x00FF_FFFF as f32;

fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

fn put_f32s(out: &mut [u8], values: &[f32]) {
    for (chunk, v) in out.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
}

fn put_f16s(out: &mut [u8], values: &[f32]) {
    for (chunk, v) in out.chunks_exact_mut(2).zip(values) {
        chunk.copy_from_slice(&f16::from_f32(*v).to_le_bytes());
    }
}

fn get_f32(bytes: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
}

fn get_f16(bytes: &[u8], i: usize) -> f32 {
    f16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]).to_f32()
}

fn get_i32(bytes: &[u8], i: usize) -> i32 {
    i32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
}

/// Writes `color` into `out` (at least `format.bytes_per_pixel()` bytes).
///
/// For depth formats the red channel is taken as the depth value.
pub fn encode_color(format: TextureFormat, color: LinearRgba, out: &mut [u8]) {
    let c = color.to_array();
    match format {
        TextureFormat::R8 => out[0] = unorm8(c[0]),
        TextureFormat::RG8 => {
            out[0] = unorm8(c[0]);
            out[1] = unorm8(c[1]);
        }
        TextureFormat::RGB8 => (0..3).for_each(|i| out[i] = unorm8(c[i])),
        TextureFormat::RGBA8 => (0..4).for_each(|i| out[i] = unorm8(c[i])),
        TextureFormat::SRGB8 | TextureFormat::SRGBA8 => {
            let s = color.to_srgb().to_array();
            let n = format.channel_count() as usize;
            (0..n).for_each(|i| out[i] = unorm8(s[i]));
        }
        TextureFormat::R16F => put_f16s(out, &c[..1]),
        TextureFormat::RG16F => put_f16s(out, &c[..2]),
        TextureFormat::RGB16F => put_f16s(out, &c[..3]),
        TextureFormat::RGBA16F => put_f16s(out, &c),
        TextureFormat::R32F => put_f32s(out, &c[..1]),
        TextureFormat::RG32F => put_f32s(out, &c[..2]),
        TextureFormat::RGB32F => put_f32s(out, &c[..3]),
        TextureFormat::RGBA32F => put_f32s(out, &c),
        TextureFormat::R32I | TextureFormat::RG32I | TextureFormat::RGBA32I => {
            let n = format.channel_count() as usize;
            for i in 0..n {
                out[i * 4..i * 4 + 4].copy_from_slice(&(c[i].round() as i32).to_le_bytes());
            }
        }
        TextureFormat::R32UI => {
            out[..4].copy_from_slice(&(c[0].max(0.0).round() as u32).to_le_bytes());
        }
        f if f.is_depth() => encode_depth(f, c[0], 0, out),
        _ => {}
    }
}

/// Reads one texel of `format` as a color. Missing channels read as 0, alpha as 1.
///
/// Depth formats return the depth value in every color channel.
pub fn decode_color(format: TextureFormat, bytes: &[u8]) -> LinearRgba {
    let mut c = [0.0, 0.0, 0.0, 1.0];
    let n = format.channel_count() as usize;
    match format {
        TextureFormat::R8 | TextureFormat::RG8 | TextureFormat::RGB8 | TextureFormat::RGBA8 => {
            (0..n).for_each(|i| c[i] = bytes[i] as f32 / 255.0);
        }
        TextureFormat::SRGB8 | TextureFormat::SRGBA8 => {
            (0..n).for_each(|i| c[i] = bytes[i] as f32 / 255.0);
            return LinearRgba::from_array(c).from_srgb();
        }
        TextureFormat::R16F | TextureFormat::RG16F | TextureFormat::RGB16F | TextureFormat::RGBA16F => {
            (0..n).for_each(|i| c[i] = get_f16(bytes, i));
        }
        TextureFormat::R32F | TextureFormat::RG32F | TextureFormat::RGB32F | TextureFormat::RGBA32F => {
            (0..n).for_each(|i| c[i] = get_f32(bytes, i));
        }
        TextureFormat::R32I | TextureFormat::RG32I | TextureFormat::RGBA32I => {
            (0..n).for_each(|i| c[i] = get_i32(bytes, i) as f32);
        }
        TextureFormat::R32UI => {
            c[0] = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32;
        }
        f if f.is_depth() => {
            let d = decode_depth(f, bytes);
            c = [d, d, d, 1.0];
        }
        _ => {}
    }
    LinearRgba::from_array(c)
}

/// Writes a depth (and stencil, where the format has one) value.
pub fn encode_depth(format: TextureFormat, depth: f32, stencil: u8, out: &mut [u8]) {
    let depth = depth.clamp(0.0, 1.0);
    match format {
        TextureFormat::Depth16 => {
            out[..2].copy_from_slice(&((depth * 65535.0 + 0.5) as u16).to_le_bytes());
        }
        TextureFormat::Depth24 => {
            let d = (depth * DEPTH24_MAX + 0.5) as u32;
            out[..4].copy_from_slice(&d.to_le_bytes());
        }
        TextureFormat::Depth24Stencil8 => {
            let d = (depth * DEPTH24_MAX + 0.5) as u32 | (stencil as u32) << 24;
            out[..4].copy_from_slice(&d.to_le_bytes());
        }
        TextureFormat::Depth32F => out[..4].copy_from_slice(&depth.to_le_bytes()),
        TextureFormat::Depth32FStencil8 => {
            out[..4].copy_from_slice(&depth.to_le_bytes());
            out[4] = stencil;
            out[5..8].fill(0);
        }
        _ => {}
    }
}

/// Reads the depth aspect of one texel. Non-depth formats read as `1.0`.
pub fn decode_depth(format: TextureFormat, bytes: &[u8]) -> f32 {
    match format {
        TextureFormat::Depth16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 65535.0,
        TextureFormat::Depth24 | TextureFormat::Depth24Stencil8 => {
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (raw & 0x00FF_FFFF) as f32 / DEPTH24_MAX
        }
        TextureFormat::Depth32F | TextureFormat::Depth32FStencil8 => get_f32(bytes, 0),
        _ => 1.0,
    }
}

/// Reads the stencil aspect of one texel, `0` for formats without stencil.
pub fn decode_stencil(format: TextureFormat, bytes: &[u8]) -> u8 {
    match format {
        TextureFormat::Depth24Stencil8 => bytes[3],
        TextureFormat::Depth32FStencil8 => bytes[4],
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rgba8_quantizes_to_nearest() {
        let mut px = [0u8; 4];
        encode_color(TextureFormat::RGBA8, LinearRgba::new(1.0, 0.5, 0.0, 1.0), &mut px);
        assert_eq!(px, [255, 128, 0, 255]);
        let back = decode_color(TextureFormat::RGBA8, &px);
        assert_relative_eq!(back.g, 128.0 / 255.0);
    }

    #[test]
    fn half_float_keeps_hdr_values() {
        let mut px = [0u8; 8];
        encode_color(TextureFormat::RGBA16F, LinearRgba::new(4.0, 0.25, 0.0, 1.0), &mut px);
        let back = decode_color(TextureFormat::RGBA16F, &px);
        assert_relative_eq!(back.r, 4.0);
        assert_relative_eq!(back.g, 0.25);
    }

    #[test]
    fn packed_depth_stencil() {
        let mut px = [0u8; 4];
        encode_depth(TextureFormat::Depth24Stencil8, 1.0, 7, &mut px);
        assert_relative_eq!(decode_depth(TextureFormat::Depth24Stencil8, &px), 1.0);
        assert_eq!(decode_stencil(TextureFormat::Depth24Stencil8, &px), 7);
    }

    #[test]
    fn missing_channels_default() {
        let c = decode_color(TextureFormat::R8, &[255]);
        assert_eq!(c, LinearRgba::new(1.0, 0.0, 0.0, 1.0));
    }
}
