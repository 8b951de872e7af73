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

//! The command vocabulary shared by every backend.
//!
//! A [`CommandList`](crate::renderer::CommandList) validates each call against its state
//! machine, then hands the resulting [`Command`] to the backend's
//! [`CommandSink`](crate::renderer::traits::CommandSink). The immediate backend executes
//! it on the spot; the deferred backend appends it to a [`CommandBuffer`] for its queue.
//! Commands reference resources by handle and never own them.

use super::pipeline::RenderPassLayout;
use super::texture::{SamplerState, TextureFilter};
use super::types::{
    ClearValue, IndexType, ResourceState, ScissorRect, TextureFormat, TextureRegion, Viewport,
};
use super::uniform::UniformValues;
use crate::math::LinearRgba;
use crate::renderer::handle::ResourceHandle;
use std::sync::Arc;

/// Defines the action to take at the beginning of a render pass for an attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp<V> {
    /// Keep the existing contents of the attachment.
    Load,
    /// Clear the attachment to the given value.
    Clear(V),
}

/// Defines the action to take at the end of a render pass for an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Write the results back to the attachment.
    #[default]
    Store,
    /// The contents may be discarded.
    Discard,
}

/// A color attachment of an active render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachmentBinding {
    /// The attachment texture.
    pub texture: ResourceHandle,
    /// Its format.
    pub format: TextureFormat,
    /// Load behavior.
    pub load: LoadOp<LinearRgba>,
    /// Store behavior.
    pub store: StoreOp,
}

/// The depth/stencil attachment of an active render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthAttachmentBinding {
    /// The attachment texture.
    pub texture: ResourceHandle,
    /// Its format.
    pub format: TextureFormat,
    /// Depth load behavior.
    pub depth_load: LoadOp<f32>,
    /// Stencil load behavior.
    pub stencil_load: LoadOp<u8>,
    /// Store behavior.
    pub store: StoreOp,
}

/// Everything a backend needs to start a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBegin {
    /// The framebuffer this pass renders into.
    pub framebuffer: ResourceHandle,
    /// Attachment width.
    pub width: u32,
    /// Attachment height.
    pub height: u32,
    /// MSAA sample count of the attachments.
    pub sample_count: u32,
    /// Color attachments in slot order.
    pub color: Vec<ColorAttachmentBinding>,
    /// Depth attachment.
    pub depth: Option<DepthAttachmentBinding>,
}

impl RenderPassBegin {
    /// The render-pass layout this pass presents to pipelines.
    pub fn layout(&self) -> RenderPassLayout {
        RenderPassLayout {
            color_formats: self.color.iter().map(|c| c.format).collect(),
            depth_format: self.depth.as_ref().map(|d| d.format),
            sample_count: self.sample_count,
        }
    }
}

/// A logical state transition of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBarrier {
    /// The resource transitioning.
    pub resource: ResourceHandle,
    /// The state it is expected to be in.
    pub before: ResourceState,
    /// The state it moves to.
    pub after: ResourceState,
}

/// Arguments of one non-indexed indirect draw, as laid out in GPU memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndirectArgs {
    /// Vertices per instance.
    pub vertex_count: u32,
    /// Instances.
    pub instance_count: u32,
    /// First vertex.
    pub first_vertex: u32,
    /// First instance.
    pub first_instance: u32,
}

/// Arguments of one indexed indirect draw, as laid out in GPU memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Indices per instance.
    pub index_count: u32,
    /// Instances.
    pub instance_count: u32,
    /// First index.
    pub first_index: u32,
    /// Value added to each index.
    pub vertex_offset: i32,
    /// First instance.
    pub first_instance: u32,
}

/// Arguments of an indirect dispatch, as laid out in GPU memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DispatchIndirectArgs {
    /// Groups along X.
    pub x: u32,
    /// Groups along Y.
    pub y: u32,
    /// Groups along Z.
    pub z: u32,
}

/// One recorded GPU operation.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Command {
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    BindGraphicsPipeline {
        pipeline: ResourceHandle,
        /// Loose uniform values of the pipeline's shader at record time.
        uniforms: Arc<UniformValues>,
    },
    BindComputePipeline {
        pipeline: ResourceHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: ResourceHandle,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: ResourceHandle,
        offset: u64,
        index_type: IndexType,
    },
    SetUniformBuffer {
        binding: u32,
        buffer: ResourceHandle,
        offset: u64,
        size: Option<u64>,
    },
    SetStorageBuffer {
        binding: u32,
        buffer: ResourceHandle,
        offset: u64,
        size: Option<u64>,
    },
    SetTexture {
        slot: u32,
        texture: ResourceHandle,
        sampler: SamplerState,
    },
    SetStorageTexture {
        slot: u32,
        texture: ResourceHandle,
        mip_level: u32,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: ResourceHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: ResourceHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirectCount {
        buffer: ResourceHandle,
        offset: u64,
        count_buffer: ResourceHandle,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: ResourceHandle,
        offset: u64,
    },
    ResourceBarriers(Vec<ResourceBarrier>),
    MemoryBarrier,
    CopyBuffer {
        src: ResourceHandle,
        src_offset: u64,
        dst: ResourceHandle,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: ResourceHandle,
        src_offset: u64,
        dst: ResourceHandle,
        region: TextureRegion,
    },
    CopyTextureToBuffer {
        src: ResourceHandle,
        region: TextureRegion,
        dst: ResourceHandle,
        dst_offset: u64,
    },
    CopyTexture {
        src: ResourceHandle,
        src_region: TextureRegion,
        dst: ResourceHandle,
        dst_region: TextureRegion,
    },
    BlitTexture {
        src: ResourceHandle,
        src_region: TextureRegion,
        dst: ResourceHandle,
        dst_region: TextureRegion,
        filter: TextureFilter,
    },
    ClearTexture {
        texture: ResourceHandle,
        mip_level: u32,
        array_layer: u32,
        rect: Option<ScissorRect>,
        value: ClearValue,
    },
    ClearBuffer {
        buffer: ResourceHandle,
        offset: u64,
        size: u64,
        value: u32,
    },
    BeginDebugEvent(String),
    EndDebugEvent,
    InsertDebugMarker(String),
}

impl Command {
    /// A short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::BeginRenderPass(_) => "BeginRenderPass",
            Command::EndRenderPass => "EndRenderPass",
            Command::BindGraphicsPipeline { .. } => "BindGraphicsPipeline",
            Command::BindComputePipeline { .. } => "BindComputePipeline",
            Command::SetVertexBuffer { .. } => "SetVertexBuffer",
            Command::SetIndexBuffer { .. } => "SetIndexBuffer",
            Command::SetUniformBuffer { .. } => "SetUniformBuffer",
            Command::SetStorageBuffer { .. } => "SetStorageBuffer",
            Command::SetTexture { .. } => "SetTexture",
            Command::SetStorageTexture { .. } => "SetStorageTexture",
            Command::SetViewport(_) => "SetViewport",
            Command::SetScissor(_) => "SetScissor",
            Command::Draw { .. } => "Draw",
            Command::DrawIndexed { .. } => "DrawIndexed",
            Command::DrawIndirect { .. } => "DrawIndirect",
            Command::DrawIndexedIndirect { .. } => "DrawIndexedIndirect",
            Command::DrawIndexedIndirectCount { .. } => "DrawIndexedIndirectCount",
            Command::Dispatch { .. } => "Dispatch",
            Command::DispatchIndirect { .. } => "DispatchIndirect",
            Command::ResourceBarriers(_) => "ResourceBarriers",
            Command::MemoryBarrier => "MemoryBarrier",
            Command::CopyBuffer { .. } => "CopyBuffer",
            Command::CopyBufferToTexture { .. } => "CopyBufferToTexture",
            Command::CopyTextureToBuffer { .. } => "CopyTextureToBuffer",
            Command::CopyTexture { .. } => "CopyTexture",
            Command::BlitTexture { .. } => "BlitTexture",
            Command::ClearTexture { .. } => "ClearTexture",
            Command::ClearBuffer { .. } => "ClearBuffer",
            Command::BeginDebugEvent(_) => "BeginDebugEvent",
            Command::EndDebugEvent => "EndDebugEvent",
            Command::InsertDebugMarker(_) => "InsertDebugMarker",
        }
    }

    /// `true` for commands that produce GPU work (as opposed to state or markers).
    pub fn is_work(&self) -> bool {
        matches!(
            self,
            Command::Draw { .. }
                | Command::DrawIndexed { .. }
                | Command::DrawIndirect { .. }
                | Command::DrawIndexedIndirect { .. }
                | Command::DrawIndexedIndirectCount { .. }
                | Command::Dispatch { .. }
                | Command::DispatchIndirect { .. }
                | Command::CopyBuffer { .. }
                | Command::CopyBufferToTexture { .. }
                | Command::CopyTextureToBuffer { .. }
                | Command::CopyTexture { .. }
                | Command::BlitTexture { .. }
                | Command::ClearTexture { .. }
                | Command::ClearBuffer { .. }
        )
    }
}

/// The finished product of one recording session.
///
/// Deferred backends fill it with commands; immediate backends return it empty with
/// `executed_inline` set, since the work already happened during recording.
#[derive(Debug, Clone, Default)]
pub struct CommandBuffer {
    /// Debug label of the recording command list.
    pub label: String,
    /// Commands in record order.
    pub commands: Vec<Command>,
    /// The work already ran while recording.
    pub executed_inline: bool,
}

impl CommandBuffer {
    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_args_have_gpu_layout() {
        assert_eq!(std::mem::size_of::<DrawIndirectArgs>(), 16);
        assert_eq!(std::mem::size_of::<DrawIndexedIndirectArgs>(), 20);
        assert_eq!(std::mem::size_of::<DispatchIndirectArgs>(), 12);
    }

    #[test]
    fn work_classification() {
        assert!(Command::Dispatch { x: 1, y: 1, z: 1 }.is_work());
        assert!(!Command::MemoryBarrier.is_work());
        assert!(!Command::InsertDebugMarker("x".into()).is_work());
        assert_eq!(Command::EndRenderPass.name(), "EndRenderPass");
    }

    #[test]
    fn pass_layout_reflects_attachments() {
        let begin = RenderPassBegin {
            framebuffer: ResourceHandle::INVALID,
            width: 4,
            height: 4,
            sample_count: 1,
            color: vec![ColorAttachmentBinding {
                texture: ResourceHandle::INVALID,
                format: TextureFormat::RGBA8,
                load: LoadOp::Clear(LinearRgba::BLACK),
                store: StoreOp::Store,
            }],
            depth: None,
        };
        let layout = begin.layout();
        assert_eq!(layout.color_formats, vec![TextureFormat::RGBA8]);
        assert_eq!(layout.depth_format, None);
    }
}
