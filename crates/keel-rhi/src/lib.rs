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

//! # Keel RHI
//!
//! The render hardware interface over a D3D12-class native device: fences
//! and sync points, queues with pending-barrier resolution, command
//! contexts, descriptor heaps, the scratch allocator, resources and views,
//! shaders with an on-disk cache and hot reload, pipelines, state objects
//! and presentation.

#![warn(missing_docs)]

pub mod context;
pub mod descriptors;
pub mod device;
pub mod dred;
pub mod error;
pub mod fence;
pub mod pipeline;
pub mod queue;
pub mod release;
pub mod resource;
pub mod scratch;
pub mod shader;
pub mod swapchain;

pub use context::{CommandContext, DepthAttachment, LoadOp, RenderPassInfo, RenderTarget, StoreOp};
pub use device::Device;
pub use error::{RhiError, ShaderError};
pub use fence::{Fence, SyncPoint};
pub use pipeline::{
    CommandSignature, HitGroupDesc, PipelineState, PipelineStateBuilder, RootSignature, ShaderBindingTable,
    StateObject, StateObjectBuilder,
};
pub use queue::CommandQueue;
pub use resource::{Buffer, GpuResource, Resource, Sampler, Texture, View};
pub use shader::{Shader, ShaderDesc, ShaderManager};
pub use swapchain::SwapChain;
