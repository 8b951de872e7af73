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

//! Fixed-function state blocks captured by pipelines.

use super::types::{CompareFunc, TextureFormat};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Source/destination weighting used by blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// How weighted source and destination are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags::bitflags! {
    /// Which color channels a draw writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ColorWriteMask: u8 {
        /// Red channel.
        const R = 1 << 0;
        /// Green channel.
        const G = 1 << 1;
        /// Blue channel.
        const B = 1 << 2;
        /// Alpha channel.
        const A = 1 << 3;
        /// Every channel.
        const ALL = Self::R.bits() | Self::G.bits() | Self::B.bits() | Self::A.bits();
    }
}

/// Color blending state applied to every color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlendState {
    /// Whether blending is enabled at all.
    pub enabled: bool,
    /// Source color factor.
    pub src_color: BlendFactor,
    /// Destination color factor.
    pub dst_color: BlendFactor,
    /// Color operation.
    pub color_op: BlendOp,
    /// Source alpha factor.
    pub src_alpha: BlendFactor,
    /// Destination alpha factor.
    pub dst_alpha: BlendFactor,
    /// Alpha operation.
    pub alpha_op: BlendOp,
    /// Channel write mask.
    pub write_mask: ColorWriteMask,
}

impl Default for BlendState {
    fn default() -> Self {
        Self::opaque()
    }
}

impl BlendState {
    /// Blending disabled, every channel written.
    pub fn opaque() -> Self {
        Self {
            enabled: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }

    /// Classic `src * a + dst * (1 - a)`.
    pub fn alpha_blend() -> Self {
        Self {
            enabled: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
            ..Self::opaque()
        }
    }

    /// `src * a + dst`.
    pub fn additive() -> Self {
        Self {
            enabled: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::One,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::One,
            ..Self::opaque()
        }
    }
}

/// Stencil update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

/// Stencil state for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StencilFaceState {
    /// Comparison against the reference value.
    pub compare: CompareFunc,
    /// Operation when the stencil test fails.
    pub fail_op: StencilOp,
    /// Operation when stencil passes but depth fails.
    pub depth_fail_op: StencilOp,
    /// Operation when both pass.
    pub pass_op: StencilOp,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            compare: CompareFunc::Always,
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
        }
    }
}

/// Depth and stencil testing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthStencilState {
    /// Enable the depth test.
    pub depth_test: bool,
    /// Enable depth writes.
    pub depth_write: bool,
    /// Depth comparison.
    pub depth_compare: CompareFunc,
    /// Enable the stencil test.
    pub stencil_test: bool,
    /// Front-face stencil state.
    pub front: StencilFaceState,
    /// Back-face stencil state.
    pub back: StencilFaceState,
    /// Stencil read mask.
    pub read_mask: u8,
    /// Stencil write mask.
    pub write_mask: u8,
    /// Stencil reference value.
    pub reference: u8,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunc::Less,
            stencil_test: false,
            front: StencilFaceState::default(),
            back: StencilFaceState::default(),
            read_mask: 0xFF,
            write_mask: 0xFF,
            reference: 0,
        }
    }
}

impl DepthStencilState {
    /// Depth test enabled, writes disabled.
    pub fn read_only() -> Self {
        Self {
            depth_write: false,
            depth_compare: CompareFunc::LessEqual,
            ..Default::default()
        }
    }

    /// No depth test, no writes.
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: CompareFunc::Always,
            ..Default::default()
        }
    }
}

/// Which triangle faces are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

/// Winding that identifies a front face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

/// Polygon rasterization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterizerState {
    /// Face culling.
    pub cull_mode: CullMode,
    /// Front-face winding.
    pub front_face: FrontFace,
    /// Solid or wireframe.
    pub fill_mode: FillMode,
    /// Constant depth bias.
    pub depth_bias: f32,
    /// Slope-scaled depth bias.
    pub slope_scaled_depth_bias: f32,
    /// Clamp depth instead of clipping.
    pub depth_clamp: bool,
    /// Honor the scissor rectangle.
    pub scissor_test: bool,
    /// Line width for line topologies and wireframe.
    pub line_width: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            fill_mode: FillMode::Solid,
            depth_bias: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clamp: false,
            scissor_test: false,
            line_width: 1.0,
        }
    }
}

impl RasterizerState {
    /// Default state without culling.
    pub fn no_cull() -> Self {
        Self {
            cull_mode: CullMode::None,
            ..Default::default()
        }
    }

    /// Wireframe, no culling.
    pub fn wireframe() -> Self {
        Self {
            cull_mode: CullMode::None,
            fill_mode: FillMode::Wireframe,
            ..Default::default()
        }
    }
}

impl Eq for RasterizerState {}

impl Hash for RasterizerState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cull_mode.hash(state);
        self.front_face.hash(state);
        self.fill_mode.hash(state);
        self.depth_bias.to_bits().hash(state);
        self.slope_scaled_depth_bias.to_bits().hash(state);
        self.depth_clamp.hash(state);
        self.scissor_test.hash(state);
        self.line_width.to_bits().hash(state);
    }
}

/// The attachment formats a pipeline renders into.
///
/// The deferred backend checks it against the active render pass at draw time, the
/// same way an explicit API requires a compatible render pass object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RenderPassLayout {
    /// Color attachment formats in slot order.
    pub color_formats: Vec<TextureFormat>,
    /// Depth attachment format, if any.
    pub depth_format: Option<TextureFormat>,
    /// MSAA sample count.
    pub sample_count: u32,
}

impl RenderPassLayout {
    /// `true` if a pass with layout `other` can run a pipeline built for `self`.
    pub fn is_compatible_with(&self, other: &RenderPassLayout) -> bool {
        self.color_formats == other.color_formats
            && (self.depth_format.is_none() || self.depth_format == other.depth_format)
            && self.sample_count.max(1) == other.sample_count.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut h = DefaultHasher::new();
        value.hash(&mut h);
        h.finish()
    }

    #[test]
    fn presets_differ_where_documented() {
        assert!(!BlendState::opaque().enabled);
        assert_eq!(BlendState::additive().dst_color, BlendFactor::One);
        assert!(!DepthStencilState::read_only().depth_write);
        assert!(!DepthStencilState::disabled().depth_test);
        assert_eq!(RasterizerState::default().cull_mode, CullMode::Back);
        assert_eq!(
            RasterizerState::default().front_face,
            FrontFace::CounterClockwise
        );
        assert_eq!(RasterizerState::wireframe().fill_mode, FillMode::Wireframe);
    }

    #[test]
    fn rasterizer_hash_tracks_float_fields() {
        let a = RasterizerState::default();
        let mut b = a;
        assert_eq!(hash_of(&a), hash_of(&b));
        b.depth_bias = 0.5;
        assert_ne!(a, b);
        assert_ne!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn depthless_pipeline_is_compatible_with_depth_pass() {
        let pipeline = RenderPassLayout {
            color_formats: vec![TextureFormat::RGBA8],
            depth_format: None,
            sample_count: 1,
        };
        let pass = RenderPassLayout {
            depth_format: Some(TextureFormat::Depth32F),
            ..pipeline.clone()
        };
        assert!(pipeline.is_compatible_with(&pass));
        assert!(!pass.is_compatible_with(&RenderPassLayout::default()));
    }
}
