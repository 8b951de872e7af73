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

//! The backend-agnostic render hardware interface.
//!
//! Plain data lives in [`api`]; the contracts a backend implements live in [`traits`].
//! Everything else is the resource layer applications program against: the
//! [`Device`] factory, resource wrappers, the [`CommandList`] state machine, pools,
//! caches and the [`Context`] that bootstraps a backend.

pub mod api;
pub mod buffer;
pub mod command_list;
pub mod command_pool;
pub mod context;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod handle;
pub mod pipeline;
pub mod resource;
pub mod settings;
pub mod shader;
pub mod sync;
pub mod texture;
pub mod traits;

pub use self::api::*;
pub use self::buffer::{Buffer, IndexBuffer, MappedRange, StorageBuffer, UniformBuffer, VertexBuffer};
pub use self::command_list::{CommandList, CommandListState};
pub use self::command_pool::{
    default_worker_count, CommandPool, CommandPoolConfig, ParallelCommandRecorder, PooledCommandList,
};
pub use self::context::{Context, ContextDesc, PresentMode, Swapchain, SwapchainDesc};
pub use self::device::Device;
pub use self::error::{PipelineError, RenderError, ResourceError, ShaderError};
pub use self::framebuffer::{
    ColorAttachmentDesc, DepthAttachmentDesc, Framebuffer, FramebufferDesc, RenderTargetPool,
};
pub use self::handle::{ResourceHandle, ResourceKind};
pub use self::pipeline::{
    ComputePipeline, ComputePipelineDesc, GraphicsPipeline, GraphicsPipelineDesc, PipelineCache,
};
pub use self::resource::{Resource, ResourceId};
pub use self::settings::RhiSettings;
pub use self::shader::{parse_stage_sections, Shader, ShaderLibrary};
pub use self::sync::{CommandQueue, Fence, FenceSignal};
pub use self::texture::{
    Sampler, SamplerCache, Texture, Texture2D, Texture2DArray, Texture3D, TextureCube,
};
