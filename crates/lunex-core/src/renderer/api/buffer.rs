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

//! Descriptors for buffer resources and vertex layouts.

use super::types::DataType;
use serde::{Deserialize, Serialize};

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BufferType {
    /// Vertex stream.
    #[default]
    Vertex,
    /// Index stream.
    Index,
    /// Uniform (constant) buffer.
    Uniform,
    /// Shader storage buffer (SSBO).
    Storage,
    /// Source of indirect draw/dispatch arguments.
    Indirect,
    /// Host-visible staging memory.
    Staging,
}

/// How often a buffer's contents are expected to change.
///
/// The usage drives the upload path: static and staging buffers go through a staged
/// copy on backends with separate device memory, dynamic and stream buffers are written
/// in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BufferUsage {
    /// Written once, read many times.
    #[default]
    Static,
    /// Rewritten occasionally.
    Dynamic,
    /// Rewritten every frame.
    Stream,
    /// CPU-side transfer memory.
    Staging,
}

impl BufferUsage {
    /// `true` when writes should go through a staged copy rather than a direct write.
    pub const fn prefers_staging(self) -> bool {
        matches!(self, BufferUsage::Static | BufferUsage::Staging)
    }
}

bitflags::bitflags! {
    /// CPU access requested for a buffer mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BufferAccess: u32 {
        /// The CPU reads the mapped range.
        const READ = 1 << 0;
        /// The CPU writes the mapped range.
        const WRITE = 1 << 1;
        /// The mapping stays valid across frames until unmapped.
        const PERSISTENT = 1 << 2;
        /// CPU writes become visible to the device without an explicit flush.
        const COHERENT = 1 << 3;
        /// Read and write.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// A descriptor used to create a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferDesc {
    /// Debug label.
    pub label: String,
    /// Binding type.
    pub ty: BufferType,
    /// Update frequency.
    pub usage: BufferUsage,
    /// Size in bytes. Immutable after creation.
    pub size: u64,
    /// Element stride in bytes (vertex size, index size, struct size). `0` if unknown.
    pub stride: u32,
}

impl BufferDesc {
    /// A descriptor with the given type, usage and size.
    pub fn new(ty: BufferType, usage: BufferUsage, size: u64) -> Self {
        Self {
            label: String::new(),
            ty,
            usage,
            size,
            stride: 0,
        }
    }

    /// Sets the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the element stride.
    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }
}

/// One attribute of a vertex layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexElement {
    /// Semantic name (`a_Position`, `a_Color`, ...).
    pub name: String,
    /// Attribute type.
    pub data_type: DataType,
    /// Byte offset inside one vertex.
    pub offset: u32,
    /// Whether integer data is normalized to `[0, 1]`.
    pub normalized: bool,
    /// Shader input location.
    pub location: u32,
}

/// An ordered list of vertex attributes with computed offsets and stride.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VertexLayout {
    elements: Vec<VertexElement>,
    stride: u32,
}

impl VertexLayout {
    /// Creates an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attribute; its offset and location follow the previous one.
    pub fn push(mut self, name: impl Into<String>, data_type: DataType, normalized: bool) -> Self {
        let location = self.elements.len() as u32;
        self.elements.push(VertexElement {
            name: name.into(),
            data_type,
            offset: self.stride,
            normalized,
            location,
        });
        self.stride += data_type.size();
        self
    }

    /// The attributes in location order.
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// Size in bytes of one vertex.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// `true` if the layout has no attributes.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Finds an attribute whose name contains `needle`, ignoring case.
    pub fn find_semantic(&self, needle: &str) -> Option<&VertexElement> {
        let needle = needle.to_ascii_lowercase();
        self.elements
            .iter()
            .find(|e| e.name.to_ascii_lowercase().contains(&needle))
    }

    /// Finds the attribute bound to `location`.
    pub fn at_location(&self, location: u32) -> Option<&VertexElement> {
        self.elements.iter().find(|e| e.location == location)
    }
}

/// Ready-made vertex layouts for common vertex formats.
pub struct InputLayout;

impl InputLayout {
    /// `vec3 a_Position`.
    pub fn position_only() -> VertexLayout {
        VertexLayout::new().push("a_Position", DataType::Float3, false)
    }

    /// `vec3 a_Position, vec4 a_Color`.
    pub fn position_color() -> VertexLayout {
        VertexLayout::new()
            .push("a_Position", DataType::Float3, false)
            .push("a_Color", DataType::Float4, false)
    }

    /// `vec3 a_Position, vec2 a_TexCoord`.
    pub fn position_uv() -> VertexLayout {
        VertexLayout::new()
            .push("a_Position", DataType::Float3, false)
            .push("a_TexCoord", DataType::Float2, false)
    }

    /// `vec3 a_Position, vec3 a_Normal, vec2 a_TexCoord`.
    pub fn position_normal_uv() -> VertexLayout {
        VertexLayout::new()
            .push("a_Position", DataType::Float3, false)
            .push("a_Normal", DataType::Float3, false)
            .push("a_TexCoord", DataType::Float2, false)
    }

    /// `vec3 a_Position, vec3 a_Normal, vec2 a_TexCoord, vec4 a_Tangent`.
    pub fn position_normal_uv_tangent() -> VertexLayout {
        Self::position_normal_uv().push("a_Tangent", DataType::Float4, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets_and_stride_accumulate() {
        let layout = InputLayout::position_normal_uv();
        let offsets: Vec<u32> = layout.elements().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(layout.stride(), 32);
        assert_eq!(layout.at_location(2).unwrap().name, "a_TexCoord");
    }

    #[test]
    fn semantic_lookup_is_case_insensitive() {
        let layout = InputLayout::position_color();
        assert_eq!(layout.find_semantic("COLOR").unwrap().location, 1);
        assert!(layout.find_semantic("uv").is_none());
    }

    #[test]
    fn staging_preference_follows_usage() {
        assert!(BufferUsage::Static.prefers_staging());
        assert!(BufferUsage::Staging.prefers_staging());
        assert!(!BufferUsage::Dynamic.prefers_staging());
        assert!(!BufferUsage::Stream.prefers_staging());
    }
}
