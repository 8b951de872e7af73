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

//! Reflection data gathered from a compiled shader program.

use super::types::{DataType, TextureType};
use serde::{Deserialize, Serialize};

/// A vertex shader input attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexInput {
    /// Attribute name, or `location<N>` if the front end dropped it.
    pub name: String,
    /// Input location.
    pub location: u32,
    /// Attribute type.
    pub data_type: DataType,
}

/// A uniform value, either loose or a member of a uniform block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniformInfo {
    /// Member name.
    pub name: String,
    /// Value type.
    pub data_type: DataType,
    /// Byte offset inside the owning block (0 for loose uniforms).
    pub offset: u32,
    /// Byte size of one element.
    pub size: u32,
    /// Array length, `1` for non-arrays.
    pub array_size: u32,
    /// Owning block name, if any.
    pub block: Option<String>,
    /// Binding of the owning block, if any.
    pub binding: Option<u32>,
}

/// A uniform (constant) buffer block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniformBlockInfo {
    /// Block name.
    pub name: String,
    /// Binding slot.
    pub binding: u32,
    /// Size in bytes.
    pub size: u32,
    /// Members with their offsets.
    pub members: Vec<UniformInfo>,
}

/// A shader storage block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageBlockInfo {
    /// Block name.
    pub name: String,
    /// Binding slot.
    pub binding: u32,
    /// Size of the fixed part in bytes (runtime arrays excluded).
    pub size: u32,
    /// The shader never writes the block.
    pub read_only: bool,
}

/// A sampled texture, sampler or storage image binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerInfo {
    /// Binding name.
    pub name: String,
    /// Binding slot.
    pub binding: u32,
    /// Texture dimensionality, `None` for standalone samplers.
    pub texture_type: Option<TextureType>,
    /// Bound as a storage image rather than a sampled texture.
    pub is_storage_image: bool,
    /// Depth-comparison sampler.
    pub is_comparison: bool,
}

/// Everything the RHI knows about a linked program.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShaderReflection {
    /// Vertex stage inputs, sorted by location.
    pub vertex_inputs: Vec<VertexInput>,
    /// Every uniform, block members included.
    pub uniforms: Vec<UniformInfo>,
    /// Uniform blocks, sorted by binding.
    pub uniform_blocks: Vec<UniformBlockInfo>,
    /// Storage blocks, sorted by binding.
    pub storage_blocks: Vec<StorageBlockInfo>,
    /// Texture, sampler and image bindings, sorted by binding.
    pub samplers: Vec<SamplerInfo>,
    /// Compute local size; `[0, 0, 0]` for graphics programs.
    pub compute_work_group_size: [u32; 3],
    /// Number of fragment color outputs.
    pub color_output_count: u32,
}

impl ShaderReflection {
    /// Finds a uniform by name; `Block.member` also matches block members.
    pub fn find_uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| {
            u.name == name
                || u.block
                    .as_deref()
                    .is_some_and(|block| name.strip_prefix(block).and_then(|r| r.strip_prefix('.')) == Some(u.name.as_str()))
        })
    }

    /// Returns `true` if the program declares `name`.
    pub fn has_uniform(&self, name: &str) -> bool {
        self.find_uniform(name).is_some()
    }

    /// Finds a uniform block by name.
    pub fn find_uniform_block(&self, name: &str) -> Option<&UniformBlockInfo> {
        self.uniform_blocks.iter().find(|b| b.name == name)
    }

    /// Finds a storage block by name.
    pub fn find_storage_block(&self, name: &str) -> Option<&StorageBlockInfo> {
        self.storage_blocks.iter().find(|b| b.name == name)
    }

    /// Finds a texture/sampler/image binding by name.
    pub fn find_sampler(&self, name: &str) -> Option<&SamplerInfo> {
        self.samplers.iter().find(|s| s.name == name)
    }

    /// `true` if this is a compute program.
    pub fn is_compute(&self) -> bool {
        self.compute_work_group_size.iter().all(|&n| n > 0)
    }

    /// Merges another stage's reflection into this one.
    pub fn merge(&mut self, other: ShaderReflection) {
        let other_is_compute = other.is_compute();
        if self.vertex_inputs.is_empty() {
            self.vertex_inputs = other.vertex_inputs;
        }
        for u in other.uniforms {
            if !self.uniforms.iter().any(|x| x.name == u.name && x.block == u.block) {
                self.uniforms.push(u);
            }
        }
        for b in other.uniform_blocks {
            if !self.uniform_blocks.iter().any(|x| x.binding == b.binding) {
                self.uniform_blocks.push(b);
            }
        }
        for b in other.storage_blocks {
            if !self.storage_blocks.iter().any(|x| x.binding == b.binding) {
                self.storage_blocks.push(b);
            }
        }
        for s in other.samplers {
            if !self.samplers.iter().any(|x| x.binding == s.binding && x.name == s.name) {
                self.samplers.push(s);
            }
        }
        if other_is_compute {
            self.compute_work_group_size = other.compute_work_group_size;
        }
        self.color_output_count = self.color_output_count.max(other.color_output_count);
        self.uniform_blocks.sort_by_key(|b| b.binding);
        self.storage_blocks.sort_by_key(|b| b.binding);
        self.samplers.sort_by_key(|s| s.binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material_block() -> ShaderReflection {
        let member = UniformInfo {
            name: "u_Color".into(),
            data_type: DataType::Float4,
            offset: 0,
            size: 16,
            array_size: 1,
            block: Some("Material".into()),
            binding: Some(0),
        };
        ShaderReflection {
            uniforms: vec![member.clone()],
            uniform_blocks: vec![UniformBlockInfo {
                name: "Material".into(),
                binding: 0,
                size: 16,
                members: vec![member],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn uniform_lookup_by_plain_and_qualified_name() {
        let r = material_block();
        assert!(r.has_uniform("u_Color"));
        assert!(r.has_uniform("Material.u_Color"));
        assert!(!r.has_uniform("Other.u_Color"));
        assert_eq!(r.find_uniform_block("Material").unwrap().size, 16);
    }

    #[test]
    fn merge_deduplicates_shared_blocks() {
        let mut vs = material_block();
        let fs = ShaderReflection {
            color_output_count: 1,
            ..material_block()
        };
        vs.merge(fs);
        assert_eq!(vs.uniform_blocks.len(), 1);
        assert_eq!(vs.uniforms.len(), 1);
        assert_eq!(vs.color_output_count, 1);
        assert!(!vs.is_compute());
    }

    #[test]
    fn merge_takes_the_compute_local_size() {
        let mut program = ShaderReflection::default();
        let compute = ShaderReflection {
            compute_work_group_size: [64, 1, 1],
            ..material_block()
        };
        program.merge(compute);
        assert!(program.is_compute(), "merged program should report a compute stage");
        assert_eq!(program.compute_work_group_size, [64, 1, 1]);
        assert_eq!(program.uniform_blocks.len(), 1);
    }
}
