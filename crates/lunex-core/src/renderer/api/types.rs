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

//! Fundamental enums and small value types shared by every RHI resource.

use crate::math::{Extent3D, LinearRgba, Origin3D};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// The pipeline stages a shader program (or a binding) participates in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ShaderStage: u32 {
        /// Vertex stage.
        const VERTEX = 1 << 0;
        /// Fragment (pixel) stage.
        const FRAGMENT = 1 << 1;
        /// Geometry stage.
        const GEOMETRY = 1 << 2;
        /// Tessellation control (hull) stage.
        const TESS_CONTROL = 1 << 3;
        /// Tessellation evaluation (domain) stage.
        const TESS_EVAL = 1 << 4;
        /// Compute stage.
        const COMPUTE = 1 << 5;
        /// Every graphics stage.
        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::FRAGMENT.bits()
            | Self::GEOMETRY.bits()
            | Self::TESS_CONTROL.bits()
            | Self::TESS_EVAL.bits();
    }
}

impl ShaderStage {
    /// Parses the stage name used by `#type` markers in annotated sources.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker.trim().to_ascii_lowercase().as_str() {
            "vertex" | "vert" | "vs" => Some(Self::VERTEX),
            "fragment" | "frag" | "pixel" | "fs" | "ps" => Some(Self::FRAGMENT),
            "geometry" | "geom" | "gs" => Some(Self::GEOMETRY),
            "tess_control" | "tesscontrol" | "hull" => Some(Self::TESS_CONTROL),
            "tess_eval" | "tesseval" | "domain" => Some(Self::TESS_EVAL),
            "compute" | "comp" | "cs" => Some(Self::COMPUTE),
            _ => None,
        }
    }
}

/// The data type of a vertex attribute or uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// No data / unknown.
    None,
    /// 32-bit float.
    Float,
    /// Two 32-bit floats.
    Float2,
    /// Three 32-bit floats.
    Float3,
    /// Four 32-bit floats.
    Float4,
    /// 32-bit signed integer.
    Int,
    /// Two 32-bit signed integers.
    Int2,
    /// Three 32-bit signed integers.
    Int3,
    /// Four 32-bit signed integers.
    Int4,
    /// 32-bit unsigned integer.
    UInt,
    /// Two 32-bit unsigned integers.
    UInt2,
    /// Three 32-bit unsigned integers.
    UInt3,
    /// Four 32-bit unsigned integers.
    UInt4,
    /// 3x3 float matrix, tightly packed.
    Mat3,
    /// 4x4 float matrix.
    Mat4,
    /// Boolean, one byte in vertex streams.
    Bool,
}

impl DataType {
    /// Size in bytes of one value of this type.
    pub const fn size(self) -> u32 {
        match self {
            DataType::None => 0,
            DataType::Float | DataType::Int | DataType::UInt => 4,
            DataType::Float2 | DataType::Int2 | DataType::UInt2 => 8,
            DataType::Float3 | DataType::Int3 | DataType::UInt3 => 12,
            DataType::Float4 | DataType::Int4 | DataType::UInt4 => 16,
            DataType::Mat3 => 36,
            DataType::Mat4 => 64,
            DataType::Bool => 1,
        }
    }

    /// Number of scalar components.
    pub const fn component_count(self) -> u32 {
        match self {
            DataType::None => 0,
            DataType::Float | DataType::Int | DataType::UInt | DataType::Bool => 1,
            DataType::Float2 | DataType::Int2 | DataType::UInt2 => 2,
            DataType::Float3 | DataType::Int3 | DataType::UInt3 => 3,
            DataType::Float4 | DataType::Int4 | DataType::UInt4 => 4,
            DataType::Mat3 => 9,
            DataType::Mat4 => 16,
        }
    }

    /// `true` for the float vector and matrix types.
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Float
                | DataType::Float2
                | DataType::Float3
                | DataType::Float4
                | DataType::Mat3
                | DataType::Mat4
        )
    }
}

/// Pixel formats understood by the RHI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum TextureFormat {
    R8,
    RG8,
    RGB8,
    RGBA8,
    SRGB8,
    SRGBA8,
    R16F,
    RG16F,
    RGB16F,
    RGBA16F,
    R32F,
    RG32F,
    RGB32F,
    RGBA32F,
    R32I,
    R32UI,
    RG32I,
    RGBA32I,
    Depth16,
    Depth24,
    Depth32F,
    Depth24Stencil8,
    Depth32FStencil8,
    BC1,
    BC3,
    BC4,
    BC5,
    BC6H,
    BC7,
}

impl TextureFormat {
    /// `true` for formats with a depth aspect.
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth16
                | TextureFormat::Depth24
                | TextureFormat::Depth32F
                | TextureFormat::Depth24Stencil8
                | TextureFormat::Depth32FStencil8
        )
    }

    /// `true` for formats with a stencil aspect.
    pub const fn has_stencil(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth24Stencil8 | TextureFormat::Depth32FStencil8
        )
    }

    /// `true` for block-compressed formats.
    pub const fn is_compressed(self) -> bool {
        matches!(
            self,
            TextureFormat::BC1
                | TextureFormat::BC3
                | TextureFormat::BC4
                | TextureFormat::BC5
                | TextureFormat::BC6H
                | TextureFormat::BC7
        )
    }

    /// `true` for formats that store sRGB-encoded color.
    pub const fn is_srgb(self) -> bool {
        matches!(self, TextureFormat::SRGB8 | TextureFormat::SRGBA8)
    }

    /// `true` for formats read back as raw integers.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            TextureFormat::R32I | TextureFormat::R32UI | TextureFormat::RG32I | TextureFormat::RGBA32I
        )
    }

    /// Number of color channels (0 for depth formats).
    pub const fn channel_count(self) -> u32 {
        match self {
            TextureFormat::R8
            | TextureFormat::R16F
            | TextureFormat::R32F
            | TextureFormat::R32I
            | TextureFormat::R32UI
            | TextureFormat::BC4 => 1,
            TextureFormat::RG8
            | TextureFormat::RG16F
            | TextureFormat::RG32F
            | TextureFormat::RG32I
            | TextureFormat::BC5 => 2,
            TextureFormat::RGB8
            | TextureFormat::SRGB8
            | TextureFormat::RGB16F
            | TextureFormat::RGB32F
            | TextureFormat::BC1
            | TextureFormat::BC6H => 3,
            TextureFormat::RGBA8
            | TextureFormat::SRGBA8
            | TextureFormat::RGBA16F
            | TextureFormat::RGBA32F
            | TextureFormat::RGBA32I
            | TextureFormat::BC3
            | TextureFormat::BC7 => 4,
            TextureFormat::Depth16
            | TextureFormat::Depth24
            | TextureFormat::Depth32F
            | TextureFormat::Depth24Stencil8
            | TextureFormat::Depth32FStencil8 => 0,
        }
    }

    /// Bytes per texel for uncompressed formats, `0` for block-compressed ones.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::RG8 | TextureFormat::R16F | TextureFormat::Depth16 => 2,
            TextureFormat::RGB8 | TextureFormat::SRGB8 => 3,
            TextureFormat::RGBA8
            | TextureFormat::SRGBA8
            | TextureFormat::RG16F
            | TextureFormat::R32F
            | TextureFormat::R32I
            | TextureFormat::R32UI
            | TextureFormat::Depth24
            | TextureFormat::Depth32F
            | TextureFormat::Depth24Stencil8 => 4,
            TextureFormat::RGB16F => 6,
            TextureFormat::RGBA16F
            | TextureFormat::RG32F
            | TextureFormat::RG32I
            | TextureFormat::Depth32FStencil8 => 8,
            TextureFormat::RGB32F => 12,
            TextureFormat::RGBA32F | TextureFormat::RGBA32I => 16,
            TextureFormat::BC1
            | TextureFormat::BC3
            | TextureFormat::BC4
            | TextureFormat::BC5
            | TextureFormat::BC6H
            | TextureFormat::BC7 => 0,
        }
    }

    /// Bytes per 4x4 block for compressed formats, `0` otherwise.
    pub const fn block_bytes(self) -> u32 {
        match self {
            TextureFormat::BC1 | TextureFormat::BC4 => 8,
            TextureFormat::BC3 | TextureFormat::BC5 | TextureFormat::BC6H | TextureFormat::BC7 => {
                16
            }
            _ => 0,
        }
    }

    /// Texel footprint of one block: 4 for compressed formats, 1 otherwise.
    pub const fn block_size(self) -> u32 {
        if self.is_compressed() {
            4
        } else {
            1
        }
    }

    /// Bytes occupied by a `width` x `height` x `depth` region in this format.
    pub fn region_size(self, width: u32, height: u32, depth: u32) -> u64 {
        if self.is_compressed() {
            let bw = width.div_ceil(4) as u64;
            let bh = height.div_ceil(4) as u64;
            bw.saturating_mul(bh)
                .saturating_mul(depth as u64)
                .saturating_mul(self.block_bytes() as u64)
        } else {
            (width as u64 * height as u64)
                .saturating_mul(depth as u64)
                .saturating_mul(self.bytes_per_pixel() as u64)
        }
    }
}

/// The dimensionality of a texture resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureType {
    /// A single 2D image with mips.
    Texture2D,
    /// Six square 2D faces.
    TextureCube,
    /// An array of 2D layers.
    Texture2DArray,
    /// A volume.
    Texture3D,
}

/// The logical usage state of a resource, as declared by barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceState {
    /// Contents are undefined; any transition from here discards data.
    #[default]
    Undefined,
    /// Generic state usable by any access on the immediate backend.
    Common,
    /// Read as a vertex stream.
    VertexBuffer,
    /// Read as an index stream.
    IndexBuffer,
    /// Read as a uniform/constant buffer.
    ConstantBuffer,
    /// Read through a sampler.
    ShaderResource,
    /// Read/written as a storage buffer or image.
    UnorderedAccess,
    /// Written as a color attachment.
    RenderTarget,
    /// Written as a depth attachment.
    DepthWrite,
    /// Read-only depth attachment.
    DepthRead,
    /// Source of a copy or blit.
    CopySource,
    /// Destination of a copy or blit.
    CopyDest,
    /// Ready to be presented.
    Present,
}

/// How vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    /// Each vertex is a point.
    PointList,
    /// Each pair of vertices is a line.
    LineList,
    /// Consecutive vertices form a polyline.
    LineStrip,
    /// Each triple of vertices is a triangle.
    #[default]
    TriangleList,
    /// Each vertex after the second forms a triangle with the previous two.
    TriangleStrip,
    /// Each vertex after the second forms a triangle with the first and previous.
    TriangleFan,
}

impl PrimitiveTopology {
    /// Number of triangles produced by `vertex_count` vertices.
    pub const fn triangle_count(self, vertex_count: u32) -> u32 {
        match self {
            PrimitiveTopology::TriangleList => vertex_count / 3,
            PrimitiveTopology::TriangleStrip | PrimitiveTopology::TriangleFan => {
                vertex_count.saturating_sub(2)
            }
            _ => 0,
        }
    }
}

/// The integer width of index buffer entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexType {
    /// 16-bit indices.
    UInt16,
    /// 32-bit indices.
    #[default]
    UInt32,
}

impl IndexType {
    /// Size in bytes of one index.
    pub const fn size(self) -> u32 {
        match self {
            IndexType::UInt16 => 2,
            IndexType::UInt32 => 4,
        }
    }
}

/// Comparison function for depth, stencil and shadow samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompareFunc {
    /// Never passes.
    Never,
    /// Passes if the incoming value is less than the stored one.
    #[default]
    Less,
    /// Passes if equal.
    Equal,
    /// Passes if less or equal.
    LessEqual,
    /// Passes if greater.
    Greater,
    /// Passes if not equal.
    NotEqual,
    /// Passes if greater or equal.
    GreaterEqual,
    /// Always passes.
    Always,
}

impl CompareFunc {
    /// Evaluates `incoming <op> stored`.
    #[inline]
    pub fn test(self, incoming: f32, stored: f32) -> bool {
        match self {
            CompareFunc::Never => false,
            CompareFunc::Less => incoming < stored,
            CompareFunc::Equal => incoming == stored,
            CompareFunc::LessEqual => incoming <= stored,
            CompareFunc::Greater => incoming > stored,
            CompareFunc::NotEqual => incoming != stored,
            CompareFunc::GreaterEqual => incoming >= stored,
            CompareFunc::Always => true,
        }
    }
}

/// The region of the render target that NDC coordinates map onto.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Left edge in pixels.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
    /// Depth range minimum.
    pub min_depth: f32,
    /// Depth range maximum.
    pub max_depth: f32,
}

impl Viewport {
    /// A viewport covering `width` x `height` with the full depth range.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// A pixel rectangle that clips rasterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScissorRect {
    /// Left edge in pixels.
    pub x: i32,
    /// Top edge in pixels.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ScissorRect {
    /// Creates a new scissor rectangle.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A clear value for a color or depth/stencil attachment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ClearValue {
    /// Clear a color attachment.
    Color(LinearRgba),
    /// Clear a depth/stencil attachment.
    DepthStencil {
        /// Depth value, usually `1.0`.
        depth: f32,
        /// Stencil value.
        stencil: u8,
    },
}

impl ClearValue {
    /// Opaque black color clear.
    pub const BLACK: Self = ClearValue::Color(LinearRgba::BLACK);
    /// Far-plane depth clear.
    pub const DEPTH_ONE: Self = ClearValue::DepthStencil {
        depth: 1.0,
        stencil: 0,
    };
}

/// A sub-region of one mip level of one array layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureRegion {
    /// Mip level.
    pub mip_level: u32,
    /// Array layer (or cube face).
    pub array_layer: u32,
    /// Texel offset.
    pub origin: Origin3D,
    /// Texel extent.
    pub extent: Extent3D,
}

impl TextureRegion {
    /// A 2D region on mip 0, layer 0.
    pub const fn rect(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            mip_level: 0,
            array_layer: 0,
            origin: Origin3D::new(x, y, 0),
            extent: Extent3D::new(width, height, 1),
        }
    }

    /// The whole of mip `level` of a texture whose base extent is `base`.
    pub fn whole_mip(base: Extent3D, level: u32, layer: u32) -> Self {
        Self {
            mip_level: level,
            array_layer: layer,
            origin: Origin3D::ZERO,
            extent: base.mip(level),
        }
    }

    /// Returns the same region on another layer.
    pub const fn on_layer(mut self, layer: u32) -> Self {
        self.array_layer = layer;
        self
    }

    /// Returns the same region on another mip.
    pub const fn on_mip(mut self, level: u32) -> Self {
        self.mip_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_sizes_match_gpu_layouts() {
        assert_eq!(DataType::Float3.size(), 12);
        assert_eq!(DataType::Mat3.size(), 36);
        assert_eq!(DataType::Mat4.size(), 64);
        assert_eq!(DataType::Bool.size(), 1);
        assert_eq!(DataType::UInt4.component_count(), 4);
    }

    #[test]
    fn format_queries() {
        assert!(TextureFormat::Depth24Stencil8.is_depth());
        assert!(TextureFormat::Depth24Stencil8.has_stencil());
        assert!(!TextureFormat::Depth32F.has_stencil());
        assert!(TextureFormat::BC7.is_compressed());
        assert!(TextureFormat::SRGBA8.is_srgb());
        assert_eq!(TextureFormat::RGBA16F.bytes_per_pixel(), 8);
        assert_eq!(TextureFormat::BC1.region_size(8, 8, 1), 4 * 8);
        assert_eq!(TextureFormat::RGBA8.region_size(4, 4, 1), 64);
    }

    #[test]
    fn topology_triangle_counts() {
        assert_eq!(PrimitiveTopology::TriangleList.triangle_count(7), 2);
        assert_eq!(PrimitiveTopology::TriangleStrip.triangle_count(5), 3);
        assert_eq!(PrimitiveTopology::LineList.triangle_count(6), 0);
        assert_eq!(PrimitiveTopology::TriangleFan.triangle_count(1), 0);
    }

    #[test]
    fn stage_markers() {
        assert_eq!(ShaderStage::from_marker("vertex"), Some(ShaderStage::VERTEX));
        assert_eq!(ShaderStage::from_marker(" Pixel "), Some(ShaderStage::FRAGMENT));
        assert_eq!(ShaderStage::from_marker("comp"), Some(ShaderStage::COMPUTE));
        assert_eq!(ShaderStage::from_marker("mesh"), None);
        assert!(ShaderStage::ALL_GRAPHICS.contains(ShaderStage::GEOMETRY));
        assert!(!ShaderStage::ALL_GRAPHICS.contains(ShaderStage::COMPUTE));
    }

    #[test]
    fn compare_functions() {
        assert!(CompareFunc::Less.test(0.5, 1.0));
        assert!(!CompareFunc::Less.test(1.0, 1.0));
        assert!(CompareFunc::LessEqual.test(1.0, 1.0));
        assert!(!CompareFunc::Never.test(0.0, 1.0));
    }
}
