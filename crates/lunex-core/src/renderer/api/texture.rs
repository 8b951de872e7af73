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

//! Descriptors for textures and sampler state.

use super::types::{CompareFunc, TextureFormat, TextureType};
use crate::math::{Extent3D, LinearRgba};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Addressing mode for texture coordinates outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureWrap {
    /// Tile the texture.
    #[default]
    Repeat,
    /// Tile, mirroring every other repetition.
    MirroredRepeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Return the border color.
    ClampToBorder,
}

/// Minification/magnification filter, including mipmap selection for minification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    /// Nearest texel.
    Nearest,
    /// Bilinear.
    #[default]
    Linear,
    /// Nearest texel, nearest mip.
    NearestMipmapNearest,
    /// Bilinear, nearest mip.
    LinearMipmapNearest,
    /// Nearest texel, blend between mips.
    NearestMipmapLinear,
    /// Trilinear.
    LinearMipmapLinear,
}

impl TextureFilter {
    /// `true` if texels are interpolated within a mip level.
    pub const fn is_linear(self) -> bool {
        matches!(
            self,
            TextureFilter::Linear
                | TextureFilter::LinearMipmapNearest
                | TextureFilter::LinearMipmapLinear
        )
    }

    /// `true` if the filter reads more than the base mip.
    pub const fn uses_mipmaps(self) -> bool {
        !matches!(self, TextureFilter::Nearest | TextureFilter::Linear)
    }
}

/// The six faces of a cube map, in layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

impl CubeFace {
    /// All faces in layer order.
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// The array layer that stores this face.
    pub const fn layer(self) -> u32 {
        self as u32
    }
}

/// A descriptor used to create any texture variant.
///
/// Depth and storage usage are not requested explicitly: a depth format implies a
/// depth attachment, and `is_storage` implies unordered access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDesc {
    /// Debug label.
    pub label: String,
    /// Texture dimensionality.
    pub ty: TextureType,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels (3D textures only, `1` otherwise).
    pub depth: u32,
    /// Array layers (`6` for cube maps).
    pub array_layers: u32,
    /// Mip levels, `0` to allocate the full chain.
    pub mip_levels: u32,
    /// MSAA sample count.
    pub sample_count: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// The texture may be used as a color/depth attachment.
    pub is_render_target: bool,
    /// The texture may be bound as a storage image.
    pub is_storage: bool,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            label: String::new(),
            ty: TextureType::Texture2D,
            width: 1,
            height: 1,
            depth: 1,
            array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            format: TextureFormat::RGBA8,
            is_render_target: false,
            is_storage: false,
        }
    }
}

impl TextureDesc {
    /// A single-mip 2D texture.
    pub fn texture_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            ..Default::default()
        }
    }

    /// A 2D texture usable as a render target.
    pub fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            is_render_target: true,
            ..Self::texture_2d(width, height, format)
        }
    }

    /// A cube map with square faces.
    pub fn cube(size: u32, format: TextureFormat) -> Self {
        Self {
            ty: TextureType::TextureCube,
            array_layers: 6,
            ..Self::texture_2d(size, size, format)
        }
    }

    /// A 2D array texture.
    pub fn array_2d(width: u32, height: u32, layers: u32, format: TextureFormat) -> Self {
        Self {
            ty: TextureType::Texture2DArray,
            array_layers: layers,
            ..Self::texture_2d(width, height, format)
        }
    }

    /// A volume texture.
    pub fn texture_3d(width: u32, height: u32, depth: u32, format: TextureFormat) -> Self {
        Self {
            ty: TextureType::Texture3D,
            depth,
            ..Self::texture_2d(width, height, format)
        }
    }

    /// Sets the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the mip count, `0` for a full chain.
    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Sets the MSAA sample count.
    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Marks the texture as a storage image.
    pub fn with_storage(mut self) -> Self {
        self.is_storage = true;
        self
    }

    /// The base-level extent.
    pub fn extent(&self) -> Extent3D {
        Extent3D::new(self.width, self.height, self.depth)
    }

    /// The mip count after resolving `0` to a full chain.
    pub fn resolved_mip_levels(&self) -> u32 {
        if self.mip_levels == 0 {
            calculate_mip_levels(self.width, self.height, self.depth)
        } else {
            self.mip_levels
        }
    }

    /// Total bytes across every mip and layer.
    pub fn total_bytes(&self) -> u64 {
        let base = self.extent();
        (0..self.resolved_mip_levels())
            .map(|level| {
                let e = base.mip(level);
                self.format.region_size(e.width, e.height, e.depth)
            })
            .sum::<u64>()
            * self.array_layers as u64
    }
}

/// Number of mips in a full chain for the given base extent.
///
/// # Examples
///
/// ```
/// use lunex_core::renderer::api::calculate_mip_levels;
/// assert_eq!(calculate_mip_levels(256, 256, 1), 9);
/// assert_eq!(calculate_mip_levels(1, 1, 1), 1);
/// ```
pub fn calculate_mip_levels(width: u32, height: u32, depth: u32) -> u32 {
    let largest = width.max(height).max(depth).max(1);
    32 - largest.leading_zeros()
}

/// Immutable sampling state.
///
/// Two samplers with equal state are interchangeable, which is what lets a
/// `SamplerCache` hand out shared instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerState {
    /// Minification filter.
    pub min_filter: TextureFilter,
    /// Magnification filter (only `Nearest`/`Linear` are meaningful).
    pub mag_filter: TextureFilter,
    /// U addressing.
    pub wrap_u: TextureWrap,
    /// V addressing.
    pub wrap_v: TextureWrap,
    /// W addressing.
    pub wrap_w: TextureWrap,
    /// Anisotropy clamp, `1.0` disables it.
    pub max_anisotropy: f32,
    /// Depth comparison for shadow samplers.
    pub compare: Option<CompareFunc>,
    /// Border color for `ClampToBorder`.
    pub border_color: LinearRgba,
    /// Lowest mip used.
    pub min_lod: f32,
    /// Highest mip used.
    pub max_lod: f32,
    /// Bias added to the computed LOD.
    pub lod_bias: f32,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            min_filter: TextureFilter::LinearMipmapLinear,
            mag_filter: TextureFilter::Linear,
            wrap_u: TextureWrap::Repeat,
            wrap_v: TextureWrap::Repeat,
            wrap_w: TextureWrap::Repeat,
            max_anisotropy: 1.0,
            compare: None,
            border_color: LinearRgba::TRANSPARENT,
            min_lod: 0.0,
            max_lod: 1000.0,
            lod_bias: 0.0,
        }
    }
}

impl SamplerState {
    /// Bilinear filtering, repeat addressing.
    pub fn linear() -> Self {
        Self {
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Linear,
            ..Default::default()
        }
    }

    /// Nearest filtering, repeat addressing.
    pub fn point() -> Self {
        Self {
            min_filter: TextureFilter::Nearest,
            mag_filter: TextureFilter::Nearest,
            ..Default::default()
        }
    }

    /// Trilinear filtering with anisotropy clamped to `max_anisotropy`.
    pub fn anisotropic(max_anisotropy: f32) -> Self {
        Self {
            max_anisotropy: max_anisotropy.max(1.0),
            ..Default::default()
        }
    }

    /// Depth-compare sampler for shadow maps: white border, `LessEqual`.
    pub fn shadow() -> Self {
        Self {
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Linear,
            wrap_u: TextureWrap::ClampToBorder,
            wrap_v: TextureWrap::ClampToBorder,
            wrap_w: TextureWrap::ClampToBorder,
            compare: Some(CompareFunc::LessEqual),
            border_color: LinearRgba::WHITE,
            ..Default::default()
        }
    }

    /// Trilinear filtering, clamp-to-edge addressing.
    pub fn clamp() -> Self {
        Self {
            wrap_u: TextureWrap::ClampToEdge,
            wrap_v: TextureWrap::ClampToEdge,
            wrap_w: TextureWrap::ClampToEdge,
            ..Default::default()
        }
    }

    /// Sets all three wrap modes.
    pub fn with_wrap(mut self, wrap: TextureWrap) -> Self {
        self.wrap_u = wrap;
        self.wrap_v = wrap;
        self.wrap_w = wrap;
        self
    }
}

// Float fields compare by bit pattern so the state can key a hash map.
impl Eq for SamplerState {}

impl Hash for SamplerState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.min_filter.hash(state);
        self.mag_filter.hash(state);
        self.wrap_u.hash(state);
        self.wrap_v.hash(state);
        self.wrap_w.hash(state);
        self.max_anisotropy.to_bits().hash(state);
        self.compare.hash(state);
        for c in self.border_color.to_array() {
            c.to_bits().hash(state);
        }
        self.min_lod.to_bits().hash(state);
        self.max_lod.to_bits().hash(state);
        self.lod_bias.to_bits().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_defaults() {
        let s = SamplerState::default();
        assert_eq!(s.min_filter, TextureFilter::LinearMipmapLinear);
        assert_eq!(s.mag_filter, TextureFilter::Linear);
        assert_eq!(s.wrap_u, TextureWrap::Repeat);
        assert_eq!(s.max_anisotropy, 1.0);
        assert_eq!(s.max_lod, 1000.0);
        assert!(s.compare.is_none());
    }

    #[test]
    fn shadow_preset() {
        let s = SamplerState::shadow();
        assert_eq!(s.wrap_v, TextureWrap::ClampToBorder);
        assert_eq!(s.border_color, LinearRgba::WHITE);
        assert_eq!(s.compare, Some(CompareFunc::LessEqual));
    }

    #[test]
    fn full_mip_chain_size() {
        let desc = TextureDesc::texture_2d(4, 4, TextureFormat::RGBA8).with_mips(0);
        assert_eq!(desc.resolved_mip_levels(), 3);
        assert_eq!(desc.total_bytes(), (16 + 4 + 1) * 4);
        assert_eq!(TextureDesc::cube(2, TextureFormat::R8).total_bytes(), 4 * 6);
    }

    #[test]
    fn mip_count_uses_largest_axis() {
        assert_eq!(calculate_mip_levels(1024, 16, 1), 11);
        assert_eq!(calculate_mip_levels(3, 5, 1), 3);
        assert_eq!(calculate_mip_levels(0, 0, 0), 1);
    }
}
