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

//! Shader programs, annotated-source parsing and the named shader library.

use crate::renderer::api::{ShaderReflection, ShaderStage, UniformValue, UniformValues};
use crate::renderer::device::DeviceShared;
use crate::renderer::error::{ResourceError, ShaderError};
use crate::renderer::handle::ResourceKind;
use crate::renderer::resource::{Resource, ResourceBase};
use crate::renderer::traits::ShaderStageSource;
use crate::renderer::Device;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TYPE_MARKER: &str = "#type";

/// Splits a single annotated source into per-stage sources.
///
/// Each section starts with a `#type <stage>` line and runs to the next marker.
/// Text before the first marker is ignored.
pub fn parse_stage_sections(label: &str, source: &str) -> Result<Vec<ShaderStageSource>, ShaderError> {
    let mut stages: Vec<ShaderStageSource> = Vec::new();
    let mut current: Option<(ShaderStage, String)> = None;

    for line in source.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(TYPE_MARKER) {
            if let Some((stage, body)) = current.take() {
                stages.push(ShaderStageSource { stage, source: body });
            }
            let marker = rest.trim();
            let stage = ShaderStage::from_marker(marker)
                .ok_or_else(|| ShaderError::UnknownStageMarker(marker.to_owned()))?;
            if stages.iter().any(|s| s.stage == stage) {
                log::warn!("Shader: '{label}' declares the {stage:?} stage twice; the last one wins");
                stages.retain(|s| s.stage != stage);
            }
            current = Some((stage, String::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some((stage, body)) = current {
        stages.push(ShaderStageSource { stage, source: body });
    }

    if stages.is_empty() {
        return Err(ShaderError::MissingStage {
            label: label.to_owned(),
            stage: ShaderStage::VERTEX,
        });
    }
    Ok(stages)
}

fn read_source(path: &Path) -> Result<String, ShaderError> {
    std::fs::read_to_string(path).map_err(|e| ShaderError::LoadError {
        path: path.display().to_string(),
        source_error: e.to_string(),
    })
}

/// A compiled, linked shader program.
///
/// Reflection is gathered after every successful link. A failed [`Shader::reload`]
/// leaves both the compiled program and its reflection untouched.
#[derive(Debug)]
pub struct Shader {
    base: ResourceBase,
    shared: Arc<DeviceShared>,
    path: Option<PathBuf>,
    stages: RwLock<Vec<ShaderStageSource>>,
    reflection: RwLock<Arc<ShaderReflection>>,
    uniforms: RwLock<UniformValues>,
}

impl Shader {
    pub(crate) fn create(
        shared: &Arc<DeviceShared>,
        label: &str,
        stages: Vec<ShaderStageSource>,
        path: Option<PathBuf>,
    ) -> Result<Self, ResourceError> {
        if stages.is_empty() {
            let err = ShaderError::MissingStage {
                label: label.to_owned(),
                stage: ShaderStage::VERTEX,
            };
            log::error!("Shader: {err}");
            return Err(err.into());
        }
        let mut reflection = None;
        let owner = shared.register(ResourceKind::Shader, 0, label, |handle| {
            let r = shared.backend.compile_shader(handle, label, &stages)?;
            reflection = Some(r);
            Ok(())
        })?;
        let reflection = reflection.unwrap_or_default();
        log::info!(
            "Shader: compiled '{label}' ({} stage(s), {} vertex input(s), {} uniform block(s))",
            stages.len(),
            reflection.vertex_inputs.len(),
            reflection.uniform_blocks.len()
        );
        Ok(Self {
            base: ResourceBase::new(owner, label),
            shared: shared.clone(),
            path,
            stages: RwLock::new(stages),
            reflection: RwLock::new(Arc::new(reflection)),
            uniforms: RwLock::new(UniformValues::new()),
        })
    }

    pub(crate) fn from_source(shared: &Arc<DeviceShared>, label: &str, source: &str) -> Result<Self, ResourceError> {
        let stages = parse_stage_sections(label, source).inspect_err(|e| log::error!("Shader: {e}"))?;
        Self::create(shared, label, stages, None)
    }

    pub(crate) fn from_file(shared: &Arc<DeviceShared>, path: &Path) -> Result<Self, ResourceError> {
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Shader".to_owned());
        let source = read_source(path).inspect_err(|e| log::error!("Shader: {e}"))?;
        let stages = parse_stage_sections(&label, &source).inspect_err(|e| log::error!("Shader: {e}"))?;
        Self::create(shared, &label, stages, Some(path.to_path_buf()))
    }

    /// The file the shader was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The stages present in the program.
    pub fn stages(&self) -> ShaderStage {
        self.stages
            .read()
            .iter()
            .fold(ShaderStage::empty(), |acc, s| acc | s.stage)
    }

    /// `true` if the program has `stage`.
    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stages().contains(stage)
    }

    /// Reflection of the currently linked program.
    pub fn reflection(&self) -> Arc<ShaderReflection> {
        self.reflection.read().clone()
    }

    /// Recompiles in place from [`Shader::path`].
    ///
    /// On failure the previous program stays bound and the error is returned.
    pub fn reload(&self) -> Result<(), ShaderError> {
        let Some(path) = self.path.as_deref() else {
            log::warn!("Shader: '{}' was not loaded from a file, nothing to reload", self.debug_name());
            return Err(ShaderError::LoadError {
                path: String::new(),
                source_error: "shader has no source file".to_owned(),
            });
        };
        let source = read_source(path).inspect_err(|e| log::error!("Shader: reload failed: {e}"))?;
        self.reload_from_source(&source)
    }

    /// Recompiles in place from an annotated source.
    pub fn reload_from_source(&self, source: &str) -> Result<(), ShaderError> {
        let label = self.debug_name();
        let stages = parse_stage_sections(&label, source)?;
        self.reload_stages(stages)
    }

    /// Recompiles in place from explicit stage sources.
    pub fn reload_stages(&self, stages: Vec<ShaderStageSource>) -> Result<(), ShaderError> {
        let label = self.debug_name();
        match self.shared.backend.compile_shader(self.handle(), &label, &stages) {
            Ok(reflection) => {
                *self.reflection.write() = Arc::new(reflection);
                *self.stages.write() = stages;
                log::info!("Shader: reloaded '{label}'");
                Ok(())
            }
            Err(e) => {
                log::error!("Shader: reload of '{label}' failed, keeping the previous program: {e}");
                Err(e)
            }
        }
    }

    fn set_uniform(&self, name: &str, value: UniformValue) {
        self.uniforms.write().insert(name.to_owned(), value);
    }

    /// Sets a loose `int` uniform.
    pub fn set_int(&self, name: &str, value: i32) {
        self.set_uniform(name, UniformValue::Int(value));
    }

    /// Sets a loose `int[]` uniform (sampler arrays, typically).
    pub fn set_int_array(&self, name: &str, values: &[i32]) {
        self.set_uniform(name, UniformValue::IntArray(values.to_vec()));
    }

    /// Sets a loose `float` uniform.
    pub fn set_float(&self, name: &str, value: f32) {
        self.set_uniform(name, UniformValue::Float(value));
    }

    /// Sets a loose `vec2` uniform.
    pub fn set_vec2(&self, name: &str, value: [f32; 2]) {
        self.set_uniform(name, UniformValue::Vec2(value));
    }

    /// Sets a loose `vec3` uniform.
    pub fn set_vec3(&self, name: &str, value: [f32; 3]) {
        self.set_uniform(name, UniformValue::Vec3(value));
    }

    /// Sets a loose `vec4` uniform.
    pub fn set_vec4(&self, name: &str, value: [f32; 4]) {
        self.set_uniform(name, UniformValue::Vec4(value));
    }

    /// Sets a loose `mat3` uniform (column-major).
    pub fn set_mat3(&self, name: &str, value: [f32; 9]) {
        self.set_uniform(name, UniformValue::Mat3(value));
    }

    /// Sets a loose `mat4` uniform (column-major).
    pub fn set_mat4(&self, name: &str, value: [f32; 16]) {
        self.set_uniform(name, UniformValue::Mat4(value));
    }

    /// The current value of a loose uniform.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.read().get(name).cloned()
    }

    /// A snapshot of every loose uniform, captured when a pipeline is bound.
    pub fn uniform_snapshot(&self) -> Arc<UniformValues> {
        Arc::new(self.uniforms.read().clone())
    }
}

impl Resource for Shader {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

/// Shaders keyed by name, with bulk hot-reload.
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    shaders: HashMap<String, Arc<Shader>>,
}

impl ShaderLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `shader` under its debug name.
    pub fn add(&mut self, shader: Arc<Shader>) {
        let name = shader.debug_name();
        self.add_named(&name, shader);
    }

    /// Adds `shader` under `name`, replacing any previous entry.
    pub fn add_named(&mut self, name: &str, shader: Arc<Shader>) {
        if self.shaders.insert(name.to_owned(), shader).is_some() {
            log::warn!("ShaderLibrary: replaced existing shader '{name}'");
        }
    }

    /// Loads a shader file and adds it under its file stem.
    pub fn load(&mut self, device: &Device, path: impl AsRef<Path>) -> Result<Arc<Shader>, ResourceError> {
        let shader = Arc::new(device.create_shader_from_file(path)?);
        self.add(shader.clone());
        Ok(shader)
    }

    /// Loads a shader file and adds it under `name`.
    pub fn load_named(
        &mut self,
        device: &Device,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<Arc<Shader>, ResourceError> {
        let shader = Arc::new(device.create_shader_from_file(path)?);
        shader.set_debug_name(name);
        self.add_named(name, shader.clone());
        Ok(shader)
    }

    /// Looks a shader up by name.
    pub fn get(&self, name: &str) -> Result<Arc<Shader>, ShaderError> {
        self.shaders
            .get(name)
            .cloned()
            .ok_or_else(|| ShaderError::NotFound(name.to_owned()))
    }

    /// `true` if `name` is registered.
    pub fn exists(&self, name: &str) -> bool {
        self.shaders.contains_key(name)
    }

    /// Removes and returns a shader.
    pub fn remove(&mut self, name: &str) -> Option<Arc<Shader>> {
        self.shaders.remove(name)
    }

    /// Number of shaders.
    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    /// `true` if the library is empty.
    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    /// Reloads every file-backed shader, returning the ones that failed.
    pub fn reload_all(&self) -> Vec<(String, ShaderError)> {
        let failures: Vec<_> = self
            .shaders
            .iter()
            .filter(|(_, shader)| shader.path().is_some())
            .filter_map(|(name, shader)| shader.reload().err().map(|e| (name.clone(), e)))
            .collect();
        log::info!(
            "ShaderLibrary: reloaded {} shader(s), {} failure(s)",
            self.shaders.len() - failures.len(),
            failures.len()
        );
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANNOTATED: &str = "// header comment\n#type vertex\nvoid main() {}\n#type fragment\nvoid main() {}\n";

    #[test]
    fn splits_annotated_source() {
        let stages = parse_stage_sections("t", ANNOTATED).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].stage, ShaderStage::VERTEX);
        assert_eq!(stages[1].stage, ShaderStage::FRAGMENT);
        assert_eq!(stages[0].source, "void main() {}\n");
    }

    #[test]
    fn pixel_is_an_alias_for_fragment() {
        let stages = parse_stage_sections("t", "#type pixel\nvoid main() {}\n").unwrap();
        assert_eq!(stages[0].stage, ShaderStage::FRAGMENT);
    }

    #[test]
    fn unknown_marker_is_an_error() {
        let err = parse_stage_sections("t", "#type banana\n").unwrap_err();
        assert_eq!(err, ShaderError::UnknownStageMarker("banana".into()));
    }

    #[test]
    fn source_without_markers_is_missing_stages() {
        assert!(matches!(
            parse_stage_sections("t", "void main() {}"),
            Err(ShaderError::MissingStage { .. })
        ));
    }
}
