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

//! GLSL front end of the software GPU.
//!
//! Every stage is parsed and validated with naga, then reflected into a
//! [`ShaderReflection`]. Sources written against desktop GL conventions are first
//! brought into the Vulkan dialect naga expects: a missing `#version` is added,
//! loose uniforms are wrapped in single-member blocks and opaque or interface
//! declarations without a `layout` get a binding or location assigned in order.

use lunex_core::renderer::traits::ShaderStageSource;
use lunex_core::renderer::{
    DataType, SamplerInfo, ShaderError, ShaderReflection, ShaderStage, StorageBlockInfo,
    TextureType, UniformBlockInfo, UniformInfo, VertexInput,
};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) const LOOSE_BLOCK_PREFIX: &str = "LunexLoose";
const LOOSE_BINDING_BASE: u32 = 1000;
const DEFAULT_VERSION: &str = "#version 450 core";
const PRECISION_WORDS: [&str; 3] = ["lowp", "mediump", "highp"];

/// A linked program as the software GPU keeps it.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    /// Stages present in the program.
    pub stages: ShaderStage,
    /// Merged reflection of every stage.
    pub reflection: ShaderReflection,
    /// Validated IR of each stage, run by the interpreter.
    pub modules: Vec<(naga::ShaderStage, Arc<naga::Module>)>,
}

impl CompiledProgram {
    /// `true` if the program has a compute stage.
    pub fn is_compute(&self) -> bool {
        self.stages.contains(ShaderStage::COMPUTE)
    }

    /// The module holding the entry point of `stage`.
    pub fn module(&self, stage: naga::ShaderStage) -> Option<&Arc<naga::Module>> {
        self.modules.iter().find(|(s, _)| *s == stage).map(|(_, module)| module)
    }
}

/// Compiles and reflects every stage of a program.
pub fn compile_program(label: &str, stages: &[ShaderStageSource]) -> Result<CompiledProgram, ShaderError> {
    let mut reflection = ShaderReflection::default();
    let mut mask = ShaderStage::empty();
    let mut modules = Vec::with_capacity(stages.len());
    for stage in stages {
        let naga_stage = naga_stage(label, stage.stage)?;
        let module = compile_stage(label, stage.stage, naga_stage, &stage.source)?;
        reflection.merge(reflect(&module, naga_stage));
        mask |= stage.stage;
        modules.push((naga_stage, Arc::new(module)));
    }
    if !mask.intersects(ShaderStage::VERTEX | ShaderStage::COMPUTE) {
        return Err(ShaderError::MissingStage {
            label: label.to_owned(),
            stage: ShaderStage::VERTEX,
        });
    }
    reflection.vertex_inputs.sort_by_key(|input| input.location);
    log::trace!("SoftGpu: reflected '{label}': {reflection:?}");
    Ok(CompiledProgram {
        stages: mask,
        reflection,
        modules,
    })
}

fn naga_stage(label: &str, stage: ShaderStage) -> Result<naga::ShaderStage, ShaderError> {
    if stage == ShaderStage::VERTEX {
        Ok(naga::ShaderStage::Vertex)
    } else if stage == ShaderStage::FRAGMENT {
        Ok(naga::ShaderStage::Fragment)
    } else if stage == ShaderStage::COMPUTE {
        Ok(naga::ShaderStage::Compute)
    } else {
        Err(ShaderError::CompilationError {
            label: label.to_owned(),
            stage,
            details: format!("the software GPU has no {stage:?} stage"),
        })
    }
}

fn compile_stage(
    label: &str,
    stage: ShaderStage,
    naga_stage: naga::ShaderStage,
    source: &str,
) -> Result<naga::Module, ShaderError> {
    let prepared = prepare_source(naga_stage, source);
    let options = naga::front::glsl::Options::from(naga_stage);
    let module = naga::front::glsl::Frontend::default()
        .parse(&options, &prepared)
        .map_err(|e| ShaderError::CompilationError {
            label: label.to_owned(),
            stage,
            details: e.to_string(),
        })?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| ShaderError::ValidationError {
            label: label.to_owned(),
            stage,
            details: e.to_string(),
        })?;
    Ok(module)
}

// --- Source preparation ---

fn explicit_bindings(source: &str) -> BTreeSet<u32> {
    let mut used = BTreeSet::new();
    for (at, keyword) in source.match_indices("binding") {
        let rest = source[at + keyword.len()..].trim_start();
        if let Some(rest) = rest.strip_prefix('=') {
            let digits: String = rest
                .trim_start()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(n) = digits.parse() {
                used.insert(n);
            }
        }
    }
    used
}

fn claim(used: &mut BTreeSet<u32>, start: u32) -> u32 {
    let mut n = start;
    while !used.insert(n) {
        n += 1;
    }
    n
}

fn is_opaque(ty: &str) -> bool {
    let opaque = |t: &str| t.starts_with("sampler") || t.starts_with("image") || t.starts_with("texture");
    opaque(ty) || ty.strip_prefix(['i', 'u']).is_some_and(opaque)
}

fn location_span(ty: &str) -> u32 {
    match ty {
        "mat4" | "dmat4" => 4,
        "mat3" | "dmat3" => 3,
        "mat2" | "dmat2" => 2,
        _ => 1,
    }
}

fn normalize_version(rest: &str) -> String {
    let number: u32 = rest
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    if number >= 440 && !rest.contains("es") {
        format!("#version{rest}")
    } else {
        DEFAULT_VERSION.to_owned()
    }
}

#[derive(Default)]
struct Rewriter {
    bindings: BTreeSet<u32>,
    next_input: u32,
    next_output: u32,
    assign_locations: bool,
}

impl Rewriter {
    /// Rewrites one global-scope statement, or returns `None` to keep it verbatim.
    fn rewrite(&mut self, code: &str) -> Option<String> {
        if code.starts_with("layout") || code.starts_with('#') {
            return None;
        }
        if code.starts_with("precision ") {
            return Some(String::new());
        }
        if let Some(decl) = code.strip_prefix("uniform ") {
            return self.rewrite_uniform(code, decl);
        }
        if self.assign_locations {
            let words: Vec<&str> = code.split_whitespace().collect();
            let direction = words
                .iter()
                .take(2)
                .position(|w| *w == "in" || *w == "out")
                .map(|i| words[i]);
            if let Some(direction) = direction {
                let ty = words
                    .iter()
                    .skip_while(|w| **w != direction)
                    .nth(1)
                    .copied()
                    .unwrap_or("");
                let counter = if direction == "in" {
                    &mut self.next_input
                } else {
                    &mut self.next_output
                };
                let location = *counter;
                *counter += location_span(ty);
                return Some(format!("layout(location = {location}) {code}"));
            }
        }
        None
    }

    fn rewrite_uniform(&mut self, code: &str, decl: &str) -> Option<String> {
        if code.contains('{') || !code.contains(';') {
            let binding = claim(&mut self.bindings, 0);
            return Some(format!("layout(std140, binding = {binding}) {code}"));
        }
        let decl = decl.split(';').next().unwrap_or("");
        let decl = decl.split('=').next().unwrap_or("");
        let words: Vec<&str> = decl
            .split_whitespace()
            .filter(|w| !PRECISION_WORDS.contains(w))
            .collect();
        let (ty, names) = match words.split_first() {
            Some((ty, rest)) if !rest.is_empty() => (*ty, rest.join(" ")),
            _ => return None,
        };
        if is_opaque(ty) {
            let binding = claim(&mut self.bindings, 0);
            return Some(format!("layout(binding = {binding}) uniform {ty} {names};"));
        }
        let binding = claim(&mut self.bindings, LOOSE_BINDING_BASE);
        Some(format!(
            "layout(std140, binding = {binding}) uniform {LOOSE_BLOCK_PREFIX}{binding} {{ {ty} {names}; }};"
        ))
    }
}

/// Brings a GL-flavored source into the dialect the naga front end accepts.
fn prepare_source(stage: naga::ShaderStage, source: &str) -> String {
    let mut rewriter = Rewriter {
        bindings: explicit_bindings(source),
        assign_locations: stage != naga::ShaderStage::Compute,
        ..Default::default()
    };
    let mut out = String::with_capacity(source.len() + 256);
    let mut depth = 0i64;
    let mut saw_version = false;

    for line in source.lines() {
        let trimmed = line.trim();
        let code = trimmed.split("//").next().unwrap_or("").trim_end();
        if let Some(rest) = trimmed.strip_prefix("#version") {
            saw_version = true;
            out.push_str(&normalize_version(rest));
        } else {
            match (depth == 0).then(|| rewriter.rewrite(code)).flatten() {
                Some(rewritten) => out.push_str(&rewritten),
                None => out.push_str(line),
            }
        }
        out.push('\n');
        depth += code.matches('{').count() as i64 - code.matches('}').count() as i64;
    }
    if !saw_version {
        out.insert_str(0, &format!("{DEFAULT_VERSION}\n"));
    }
    out
}

// --- Reflection ---

fn scalar_type(kind: naga::ScalarKind, components: u32) -> DataType {
    use naga::ScalarKind;
    match (kind, components) {
        (ScalarKind::Float | ScalarKind::AbstractFloat, 1) => DataType::Float,
        (ScalarKind::Float | ScalarKind::AbstractFloat, 2) => DataType::Float2,
        (ScalarKind::Float | ScalarKind::AbstractFloat, 3) => DataType::Float3,
        (ScalarKind::Float | ScalarKind::AbstractFloat, 4) => DataType::Float4,
        (ScalarKind::Sint | ScalarKind::AbstractInt, 1) => DataType::Int,
        (ScalarKind::Sint | ScalarKind::AbstractInt, 2) => DataType::Int2,
        (ScalarKind::Sint | ScalarKind::AbstractInt, 3) => DataType::Int3,
        (ScalarKind::Sint | ScalarKind::AbstractInt, 4) => DataType::Int4,
        (ScalarKind::Uint, 1) => DataType::UInt,
        (ScalarKind::Uint, 2) => DataType::UInt2,
        (ScalarKind::Uint, 3) => DataType::UInt3,
        (ScalarKind::Uint, 4) => DataType::UInt4,
        (ScalarKind::Bool, _) => DataType::Bool,
        _ => DataType::None,
    }
}

fn data_type(inner: &naga::TypeInner) -> DataType {
    match *inner {
        naga::TypeInner::Scalar(scalar) => scalar_type(scalar.kind, 1),
        naga::TypeInner::Vector { size, scalar } => scalar_type(scalar.kind, size as u32),
        naga::TypeInner::Matrix { columns, rows, .. } => match (columns as u32, rows as u32) {
            (3, 3) => DataType::Mat3,
            (4, 4) => DataType::Mat4,
            _ => DataType::None,
        },
        _ => DataType::None,
    }
}

/// Splits arrays into (element type, element size, length).
fn element_of(module: &naga::Module, ty: naga::Handle<naga::Type>) -> (DataType, u32, u32) {
    let inner = &module.types[ty].inner;
    match inner {
        naga::TypeInner::Array { base, size, .. } => {
            let length = match size {
                naga::ArraySize::Constant(n) => n.get(),
                _ => 1,
            };
            let element = &module.types[*base].inner;
            (data_type(element), element.size(module.to_ctx()), length)
        }
        _ => (data_type(inner), inner.size(module.to_ctx()), 1),
    }
}

fn texture_type(dim: naga::ImageDimension, arrayed: bool) -> TextureType {
    match dim {
        naga::ImageDimension::Cube => TextureType::TextureCube,
        naga::ImageDimension::D3 => TextureType::Texture3D,
        _ if arrayed => TextureType::Texture2DArray,
        _ => TextureType::Texture2D,
    }
}

fn reflect(module: &naga::Module, stage: naga::ShaderStage) -> ShaderReflection {
    let mut out = ShaderReflection::default();

    if let Some(entry) = module.entry_points.iter().find(|ep| ep.stage == stage) {
        match stage {
            naga::ShaderStage::Vertex => {
                for arg in &entry.function.arguments {
                    if let Some(naga::Binding::Location { location, .. }) = arg.binding {
                        out.vertex_inputs.push(VertexInput {
                            name: arg
                                .name
                                .clone()
                                .unwrap_or_else(|| format!("location{location}")),
                            location,
                            data_type: data_type(&module.types[arg.ty].inner),
                        });
                    }
                }
            }
            naga::ShaderStage::Fragment => {
                if let Some(result) = &entry.function.result {
                    out.color_output_count = match (&result.binding, &module.types[result.ty].inner) {
                        (Some(naga::Binding::Location { .. }), _) => 1,
                        (None, naga::TypeInner::Struct { members, .. }) => members
                            .iter()
                            .filter(|m| matches!(m.binding, Some(naga::Binding::Location { .. })))
                            .count() as u32,
                        _ => 0,
                    };
                }
            }
            naga::ShaderStage::Compute => out.compute_work_group_size = entry.workgroup_size,
            _ => {}
        }
    }

    for (_, var) in module.global_variables.iter() {
        let binding = var.binding.as_ref().map(|b| b.binding).unwrap_or(0);
        let ty = &module.types[var.ty];
        let block_name = ty
            .name
            .clone()
            .or_else(|| var.name.clone())
            .unwrap_or_else(|| format!("Block{binding}"));
        match (var.space, &ty.inner) {
            (naga::AddressSpace::Uniform, naga::TypeInner::Struct { members, span }) => {
                let loose = block_name.starts_with(LOOSE_BLOCK_PREFIX);
                let infos: Vec<UniformInfo> = members
                    .iter()
                    .map(|member| {
                        let (data_type, size, array_size) = element_of(module, member.ty);
                        UniformInfo {
                            name: member.name.clone().unwrap_or_default(),
                            data_type,
                            offset: if loose { 0 } else { member.offset },
                            size,
                            array_size,
                            block: (!loose).then(|| block_name.clone()),
                            binding: (!loose).then_some(binding),
                        }
                    })
                    .collect();
                if !loose {
                    out.uniform_blocks.push(UniformBlockInfo {
                        name: block_name,
                        binding,
                        size: *span,
                        members: infos.clone(),
                    });
                }
                out.uniforms.extend(infos);
            }
            (naga::AddressSpace::Uniform, _) => {
                let (data_type, size, array_size) = element_of(module, var.ty);
                out.uniforms.push(UniformInfo {
                    name: var.name.clone().unwrap_or_default(),
                    data_type,
                    offset: 0,
                    size,
                    array_size,
                    block: None,
                    binding: None,
                });
            }
            (naga::AddressSpace::Storage { access }, inner) => {
                out.storage_blocks.push(StorageBlockInfo {
                    name: block_name,
                    binding,
                    size: inner.size(module.to_ctx()),
                    read_only: !access.contains(naga::StorageAccess::STORE),
                });
            }
            (naga::AddressSpace::Handle, naga::TypeInner::Image { dim, arrayed, class }) => {
                out.samplers.push(SamplerInfo {
                    name: var.name.clone().unwrap_or_default(),
                    binding,
                    texture_type: Some(texture_type(*dim, *arrayed)),
                    is_storage_image: matches!(class, naga::ImageClass::Storage { .. }),
                    is_comparison: matches!(class, naga::ImageClass::Depth { .. }),
                });
            }
            (naga::AddressSpace::Handle, naga::TypeInner::Sampler { comparison }) => {
                out.samplers.push(SamplerInfo {
                    name: var.name.clone().unwrap_or_default(),
                    binding,
                    texture_type: None,
                    is_storage_image: false,
                    is_comparison: *comparison,
                });
            }
            _ => {}
        }
    }

    out.uniform_blocks.sort_by_key(|b| b.binding);
    out.storage_blocks.sort_by_key(|b| b.binding);
    out.samplers.sort_by_key(|s| s.binding);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(stage: ShaderStage, source: &str) -> ShaderStageSource {
        ShaderStageSource {
            stage,
            source: source.to_owned(),
        }
    }

    const FLAT_VS: &str = r#"
#version 330 core
layout(location = 0) in vec3 a_Position;
uniform mat4 u_ViewProjection;
void main() {
    gl_Position = u_ViewProjection * vec4(a_Position, 1.0);
}
"#;

    const FLAT_FS: &str = r#"
#version 330 core
out vec4 o_Color;
uniform vec4 u_Color;
void main() {
    o_Color = u_Color;
}
"#;

    #[test]
    fn loose_uniforms_are_wrapped_and_reflected_as_loose() {
        let program = compile_program(
            "Flat",
            &[stage(ShaderStage::VERTEX, FLAT_VS), stage(ShaderStage::FRAGMENT, FLAT_FS)],
        )
        .expect("flat shader compiles");
        let r = &program.reflection;
        assert_eq!(r.vertex_inputs.len(), 1);
        assert_eq!(r.vertex_inputs[0].name, "a_Position");
        assert_eq!(r.vertex_inputs[0].data_type, DataType::Float3);
        let color = r.find_uniform("u_Color").expect("u_Color reflected");
        assert_eq!(color.block, None);
        assert_eq!(color.data_type, DataType::Float4);
        assert_eq!(r.find_uniform("u_ViewProjection").unwrap().data_type, DataType::Mat4);
        assert!(r.uniform_blocks.is_empty());
        assert_eq!(r.color_output_count, 1);
        assert!(!program.is_compute());
        assert!(program.module(naga::ShaderStage::Fragment).is_some());
        assert!(program.module(naga::ShaderStage::Compute).is_none());
    }

    #[test]
    fn uniform_blocks_keep_member_offsets() {
        let vs = r#"
#version 450 core
layout(location = 0) in vec3 a_Position;
layout(std140, binding = 2) uniform Camera {
    mat4 u_View;
    vec4 u_Tint;
};
void main() {
    gl_Position = u_View * vec4(a_Position, 1.0) + u_Tint;
}
"#;
        let program = compile_program("Camera", &[stage(ShaderStage::VERTEX, vs)]).unwrap();
        let block = program.reflection.find_uniform_block("Camera").unwrap();
        assert_eq!(block.binding, 2);
        assert_eq!(block.size, 80);
        assert_eq!(block.members[1].name, "u_Tint");
        assert_eq!(block.members[1].offset, 64);
        assert!(program.reflection.has_uniform("Camera.u_Tint"));
    }

    #[test]
    fn compute_programs_report_their_local_size() {
        let cs = r#"
#version 450
layout(local_size_x = 64) in;
layout(std430, binding = 0) buffer Values { float data[]; };
void main() {
    data[gl_GlobalInvocationID.x] *= 2.0;
}
"#;
        let program = compile_program("Double", &[stage(ShaderStage::COMPUTE, cs)]).unwrap();
        assert!(program.is_compute());
        assert_eq!(program.reflection.compute_work_group_size, [64, 1, 1]);
        let values = &program.reflection.storage_blocks[0];
        assert_eq!(values.binding, 0);
        assert!(!values.read_only);
    }

    #[test]
    fn syntax_errors_name_the_failing_stage() {
        let broken = "#version 450\nout vec4 o_Color;\nvoid main() { o_Color = ; }\n";
        let err = compile_program(
            "Broken",
            &[stage(ShaderStage::VERTEX, FLAT_VS), stage(ShaderStage::FRAGMENT, broken)],
        )
        .unwrap_err();
        match err {
            ShaderError::CompilationError { label, stage, .. } => {
                assert_eq!(label, "Broken");
                assert_eq!(stage, ShaderStage::FRAGMENT);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unsupported_stages_are_rejected() {
        let err = compile_program("Geo", &[stage(ShaderStage::GEOMETRY, "void main() {}")]).unwrap_err();
        assert!(matches!(err, ShaderError::CompilationError { stage: ShaderStage::GEOMETRY, .. }));
    }

    #[test]
    fn preparation_assigns_locations_and_bindings() {
        let out = prepare_source(
            naga::ShaderStage::Vertex,
            "in vec3 a_Position;\nin mat4 a_Model;\nin vec2 a_UV;\nuniform sampler2D u_Texture;\nprecision highp float;\n",
        );
        assert!(out.starts_with(DEFAULT_VERSION));
        assert!(out.contains("layout(location = 0) in vec3 a_Position;"));
        assert!(out.contains("layout(location = 1) in mat4 a_Model;"));
        assert!(out.contains("layout(location = 5) in vec2 a_UV;"));
        assert!(out.contains("layout(binding = 0) uniform sampler2D u_Texture;"));
        assert!(!out.contains("precision"));
    }

    #[test]
    fn explicit_bindings_are_not_reused() {
        let mut used = explicit_bindings("layout(binding = 0) uniform A { float a; };\nlayout(binding=1) uniform sampler2D t;");
        assert_eq!(claim(&mut used, 0), 2);
        assert_eq!(claim(&mut used, LOOSE_BINDING_BASE), LOOSE_BINDING_BASE);
    }
}
