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

//! Graphics and compute pipelines, and the graphics pipeline cache.

use crate::math::div_ceil;
use crate::renderer::api::{
    BlendState, DepthStencilState, PrimitiveTopology, RasterizerState, RenderPassLayout,
    ShaderReflection, ShaderStage, VertexLayout,
};
use crate::renderer::command_list::CommandList;
use crate::renderer::device::DeviceShared;
use crate::renderer::error::{PipelineError, ResourceError};
use crate::renderer::handle::ResourceKind;
use crate::renderer::resource::{Resource, ResourceBase};
use crate::renderer::shader::Shader;
use crate::renderer::traits::{ComputeKernel, ComputePipelineState, GraphicsPipelineState};
use crate::renderer::Device;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn fail(err: PipelineError) -> ResourceError {
    log::error!("Pipeline: {err}");
    err.into()
}

/// Everything that defines a graphics pipeline.
///
/// Two descriptors are equal when every field matches and they reference the same
/// shader object, which makes the descriptor usable as a [`PipelineCache`] key.
#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    /// Debug label.
    pub label: String,
    /// The shader program.
    pub shader: Option<Arc<Shader>>,
    /// Layout of vertex slot 0.
    pub layout: VertexLayout,
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
    /// Rasterizer state.
    pub rasterizer: RasterizerState,
    /// Depth/stencil state.
    pub depth_stencil: DepthStencilState,
    /// Blend state.
    pub blend: BlendState,
    /// Attachment formats, when the pipeline targets a known pass layout.
    pub render_pass: Option<RenderPassLayout>,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            label: "GraphicsPipeline".to_owned(),
            shader: None,
            layout: VertexLayout::new(),
            topology: PrimitiveTopology::TriangleList,
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            blend: BlendState::default(),
            render_pass: None,
        }
    }
}

impl GraphicsPipelineDesc {
    /// Starts a descriptor with default fixed-function state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shader.
    pub fn with_shader(mut self, shader: Arc<Shader>) -> Self {
        self.shader = Some(shader);
        self
    }

    /// Sets the vertex layout.
    pub fn with_layout(mut self, layout: VertexLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the primitive topology.
    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Sets the rasterizer state.
    pub fn with_rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Sets the depth/stencil state.
    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilState) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    /// Sets the blend state.
    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    /// Declares the attachment formats the pipeline renders into.
    pub fn with_render_pass(mut self, render_pass: RenderPassLayout) -> Self {
        self.render_pass = Some(render_pass);
        self
    }

    /// Sets the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    fn shader_key(&self) -> Option<u64> {
        self.shader.as_ref().map(|s| s.id().0)
    }
}

impl PartialEq for GraphicsPipelineDesc {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.shader_key() == other.shader_key()
            && self.layout == other.layout
            && self.topology == other.topology
            && self.rasterizer == other.rasterizer
            && self.depth_stencil == other.depth_stencil
            && self.blend == other.blend
            && self.render_pass == other.render_pass
    }
}

impl Eq for GraphicsPipelineDesc {}

impl Hash for GraphicsPipelineDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label.hash(state);
        self.shader_key().hash(state);
        self.layout.hash(state);
        self.topology.hash(state);
        self.rasterizer.hash(state);
        self.depth_stencil.hash(state);
        self.blend.hash(state);
        self.render_pass.hash(state);
    }
}

impl fmt::Debug for GraphicsPipelineDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipelineDesc")
            .field("label", &self.label)
            .field("shader", &self.shader.as_ref().map(|s| s.debug_name()))
            .field("layout", &self.layout)
            .field("topology", &self.topology)
            .field("rasterizer", &self.rasterizer)
            .field("depth_stencil", &self.depth_stencil)
            .field("blend", &self.blend)
            .finish()
    }
}

/// Checks that every vertex input the program reads is fed by the layout.
fn check_vertex_inputs(label: &str, reflection: &ShaderReflection, layout: &VertexLayout) -> Result<(), PipelineError> {
    for input in &reflection.vertex_inputs {
        match layout.at_location(input.location) {
            None => {
                return Err(PipelineError::VertexLayoutMismatch(format!(
                    "pipeline '{label}': shader input '{}' at location {} has no matching layout element",
                    input.name, input.location
                )))
            }
            Some(element) if element.data_type.component_count() != input.data_type.component_count() => {
                log::warn!(
                    "Pipeline: '{label}' feeds {:?} into shader input '{}' declared as {:?}",
                    element.data_type,
                    input.name,
                    input.data_type
                );
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// An immutable composition of shader, vertex layout and fixed-function state.
///
/// Binding it switches a whole pipeline object on the deferred backend and re-applies
/// every fixed-function state on the immediate one; no state leaks between pipelines.
#[derive(Debug)]
pub struct GraphicsPipeline {
    base: ResourceBase,
    desc: GraphicsPipelineDesc,
    state: Arc<GraphicsPipelineState>,
}

impl GraphicsPipeline {
    pub(crate) fn create(shared: &Arc<DeviceShared>, desc: &GraphicsPipelineDesc) -> Result<Self, ResourceError> {
        let label = desc.label.clone();
        let Some(shader) = desc.shader.as_ref().filter(|s| s.is_valid()) else {
            return Err(fail(PipelineError::InvalidShader { pipeline_label: label }));
        };
        if !shader.has_stage(ShaderStage::VERTEX) {
            return Err(fail(PipelineError::MissingVertexStage { pipeline_label: label }));
        }
        let reflection = shader.reflection();
        check_vertex_inputs(&label, &reflection, &desc.layout).map_err(fail)?;
        if let Some(pass) = &desc.render_pass {
            if pass.color_formats.len() as u32 > shared.capabilities.max_color_attachments {
                return Err(fail(PipelineError::IncompatibleRenderTarget(format!(
                    "pipeline '{label}' targets {} color attachments",
                    pass.color_formats.len()
                ))));
            }
        }

        let state = Arc::new(GraphicsPipelineState {
            label: label.clone(),
            shader: shader.handle(),
            reflection: (*reflection).clone(),
            layout: desc.layout.clone(),
            topology: desc.topology,
            rasterizer: desc.rasterizer,
            depth_stencil: desc.depth_stencil,
            blend: desc.blend,
            render_pass: desc.render_pass.clone(),
        });
        let owner = shared.register(ResourceKind::Pipeline, 0, &label, |handle| {
            shared
                .backend
                .create_graphics_pipeline(handle, state.clone())
                .map_err(ResourceError::from)
        })?;
        Ok(Self {
            base: ResourceBase::new(owner, &label),
            desc: desc.clone(),
            state,
        })
    }

    /// The creation descriptor.
    pub fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    /// The shader program.
    pub fn shader(&self) -> Option<&Arc<Shader>> {
        self.desc.shader.as_ref()
    }

    /// Vertex layout of slot 0.
    pub fn layout(&self) -> &VertexLayout {
        &self.desc.layout
    }

    /// Primitive topology.
    pub fn topology(&self) -> PrimitiveTopology {
        self.desc.topology
    }

    /// Reflection captured at creation.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.state.reflection
    }

    /// Binds the pipeline on `cmd`.
    pub fn bind(&self, cmd: &mut CommandList) {
        cmd.set_pipeline(self);
    }
}

impl Resource for GraphicsPipeline {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

/// Everything that defines a compute pipeline.
#[derive(Clone, Default)]
pub struct ComputePipelineDesc {
    /// Debug label.
    pub label: String,
    /// The compute shader.
    pub shader: Option<Arc<Shader>>,
    /// CPU kernel executed per dispatch on the software substrate.
    pub kernel: Option<Arc<dyn ComputeKernel>>,
}

impl ComputePipelineDesc {
    /// A descriptor for `shader`.
    pub fn new(shader: Arc<Shader>) -> Self {
        Self {
            label: shader.debug_name(),
            shader: Some(shader),
            kernel: None,
        }
    }

    /// Sets the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Attaches a CPU kernel.
    pub fn with_kernel(mut self, kernel: impl ComputeKernel + 'static) -> Self {
        self.kernel = Some(Arc::new(kernel));
        self
    }
}

impl fmt::Debug for ComputePipelineDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputePipelineDesc")
            .field("label", &self.label)
            .field("shader", &self.shader.as_ref().map(|s| s.debug_name()))
            .field("has_kernel", &self.kernel.is_some())
            .finish()
    }
}

/// A compute shader wrapped as a bindable pipeline.
#[derive(Debug)]
pub struct ComputePipeline {
    base: ResourceBase,
    shader: Arc<Shader>,
    work_group_size: [u32; 3],
}

impl ComputePipeline {
    pub(crate) fn create(shared: &Arc<DeviceShared>, desc: ComputePipelineDesc) -> Result<Self, ResourceError> {
        let label = if desc.label.is_empty() {
            "ComputePipeline".to_owned()
        } else {
            desc.label.clone()
        };
        if !shared.capabilities.supports_compute {
            return Err(fail(PipelineError::FeatureNotSupported("compute shaders".to_owned())));
        }
        let Some(shader) = desc.shader.filter(|s| s.is_valid()) else {
            return Err(fail(PipelineError::InvalidShader { pipeline_label: label }));
        };
        if !shader.has_stage(ShaderStage::COMPUTE) {
            return Err(fail(PipelineError::MissingComputeStage { pipeline_label: label }));
        }
        let reported = shader.reflection().compute_work_group_size;
        let work_group_size = reported.map(|n| n.max(1));
        let limit = shared.capabilities.max_compute_work_group_invocations;
        if work_group_size.iter().product::<u32>() > limit {
            return Err(fail(PipelineError::FeatureNotSupported(format!(
                "work group {work_group_size:?} exceeds {limit} invocations"
            ))));
        }

        let state = Arc::new(ComputePipelineState {
            label: label.clone(),
            shader: shader.handle(),
            work_group_size,
            kernel: desc.kernel,
        });
        let owner = shared.register(ResourceKind::Pipeline, 0, &label, |handle| {
            shared
                .backend
                .create_compute_pipeline(handle, state)
                .map_err(ResourceError::from)
        })?;
        Ok(Self {
            base: ResourceBase::new(owner, &label),
            shader,
            work_group_size,
        })
    }

    /// The compute shader.
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    /// Local size per axis.
    pub fn work_group_size(&self) -> [u32; 3] {
        self.work_group_size
    }

    /// Number of groups needed to cover `total` work items per axis.
    pub fn group_count(&self, total: [u32; 3]) -> [u32; 3] {
        [
            div_ceil(total[0], self.work_group_size[0]),
            div_ceil(total[1], self.work_group_size[1]),
            div_ceil(total[2], self.work_group_size[2]),
        ]
    }

    /// Binds the pipeline on `cmd`.
    pub fn bind(&self, cmd: &mut CommandList) {
        cmd.set_compute_pipeline(self);
    }

    /// Dispatches `x * y * z` groups on `cmd`.
    pub fn dispatch(&self, cmd: &mut CommandList, x: u32, y: u32, z: u32) {
        cmd.dispatch(x, y, z);
    }

    /// Dispatches enough groups to cover `total` work items per axis.
    pub fn dispatch_auto(&self, cmd: &mut CommandList, total_x: u32, total_y: u32, total_z: u32) {
        let [x, y, z] = self.group_count([total_x, total_y, total_z]);
        cmd.dispatch(x, y, z);
    }
}

impl Resource for ComputePipeline {
    fn base(&self) -> &ResourceBase {
        &self.base
    }
}

/// Deduplicates graphics pipelines by descriptor.
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: Mutex<HashMap<GraphicsPipelineDesc, Arc<GraphicsPipeline>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PipelineCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pipeline for `desc`, creating it on a miss.
    pub fn get_or_create(
        &self,
        device: &Device,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Arc<GraphicsPipeline>, ResourceError> {
        let mut pipelines = self.pipelines.lock();
        if let Some(pipeline) = pipelines.get(desc) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(pipeline.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let pipeline = Arc::new(device.create_pipeline(desc)?);
        pipelines.insert(desc.clone(), pipeline.clone());
        log::debug!("PipelineCache: created '{}' ({} cached)", desc.label, pipelines.len());
        Ok(pipeline)
    }

    /// Cache hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of cached pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    /// `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().is_empty()
    }

    /// Drops every cached pipeline and zeroes the counters.
    pub fn clear(&self) {
        self.pipelines.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::{DataType, InputLayout, VertexInput};
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(desc: &GraphicsPipelineDesc) -> u64 {
        let mut h = DefaultHasher::new();
        desc.hash(&mut h);
        h.finish()
    }

    #[test]
    fn equal_descriptors_hash_equal() {
        let a = GraphicsPipelineDesc::new().with_layout(InputLayout::position_color());
        let b = GraphicsPipelineDesc::new().with_layout(InputLayout::position_color());
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        let c = b.with_rasterizer(RasterizerState::no_cull());
        assert_ne!(a, c);
    }

    #[test]
    fn missing_vertex_input_is_a_layout_mismatch() {
        let reflection = ShaderReflection {
            vertex_inputs: vec![VertexInput {
                name: "a_Normal".into(),
                location: 2,
                data_type: DataType::Float3,
            }],
            ..Default::default()
        };
        let err = check_vertex_inputs("p", &reflection, &InputLayout::position_color()).unwrap_err();
        assert!(matches!(err, PipelineError::VertexLayoutMismatch(_)));
        assert!(check_vertex_inputs("p", &reflection, &InputLayout::position_normal_uv()).is_ok());
    }
}
