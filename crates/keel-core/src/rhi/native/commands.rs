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

//! The command stream recorded into native command lists.

use super::handles::*;
use crate::rhi::{Format, ResourceStates, SubresourceFootprint};

/// A resource barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Barrier {
    /// A state transition of one subresource (or all of them).
    Transition {
        /// The transitioned resource.
        resource: NativeResource,
        /// Subresource index, or `ALL_SUBRESOURCES`.
        subresource: u32,
        /// State before the barrier.
        before: ResourceStates,
        /// State after the barrier.
        after: ResourceStates,
    },
    /// Orders unordered-access writes; `None` covers every resource.
    Uav {
        /// The resource, if any.
        resource: Option<NativeResource>,
    },
    /// Switches which placed resource occupies aliased memory.
    Aliasing {
        /// Resource leaving the memory.
        before: Option<NativeResource>,
        /// Resource entering the memory.
        after: Option<NativeResource>,
    },
}

impl Barrier {
    /// The resource a barrier refers to, if it names a single one.
    pub fn resource(&self) -> Option<NativeResource> {
        match *self {
            Barrier::Transition { resource, .. } => Some(resource),
            Barrier::Uav { resource } => resource,
            Barrier::Aliasing { after, .. } => after,
        }
    }
}

/// A viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// A viewport covering `width` x `height` with the full depth range.
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// A scissor rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    /// A rectangle covering `width` x `height` from the origin.
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// A 3D region of a texture, in texels. `right`, `bottom` and `back` are
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TextureRegion {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

/// Primitive topology of draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// A vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VertexBufferView {
    pub address: u64,
    pub size: u32,
    pub stride: u32,
}

/// An index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct IndexBufferView {
    pub address: u64,
    pub size: u32,
    pub format: Format,
}

/// One side of a texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureCopyLocation {
    /// A texture subresource.
    Subresource {
        /// The texture.
        resource: NativeResource,
        /// Subresource index.
        index: u32,
    },
    /// A texture-shaped region of a buffer.
    Footprint {
        /// The buffer.
        resource: NativeResource,
        /// Layout of the region.
        footprint: SubresourceFootprint,
    },
}

impl TextureCopyLocation {
    /// The resource on this side of the copy.
    pub fn resource(&self) -> NativeResource {
        match *self {
            TextureCopyLocation::Subresource { resource, .. }
            | TextureCopyLocation::Footprint { resource, .. } => resource,
        }
    }
}

/// A range of GPU memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub struct GpuAddressRange {
    pub start: u64,
    pub size: u64,
}

/// A range of GPU memory holding equally sized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub struct GpuAddressRangeAndStride {
    pub start: u64,
    pub size: u64,
    pub stride: u64,
}

/// Arguments of a ray dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub struct DispatchRaysDesc {
    pub ray_generation: GpuAddressRange,
    pub miss: GpuAddressRangeAndStride,
    pub hit_group: GpuAddressRangeAndStride,
    pub callable: GpuAddressRangeAndStride,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Which pipeline a root binding targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    /// Draws and mesh dispatches.
    Graphics,
    /// Compute and ray dispatches.
    Compute,
}

/// One command recorded into a native command list.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum NativeCommand {
    Barriers(Vec<Barrier>),
    CopyBufferRegion {
        dst: NativeResource,
        dst_offset: u64,
        src: NativeResource,
        src_offset: u64,
        size: u64,
    },
    CopyResource {
        dst: NativeResource,
        src: NativeResource,
    },
    CopyTextureRegion {
        dst: TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        dst_z: u32,
        src: TextureCopyLocation,
        src_region: Option<TextureRegion>,
    },
    ResolveSubresource {
        dst: NativeResource,
        dst_subresource: u32,
        src: NativeResource,
        src_subresource: u32,
        format: Format,
    },
    SetDescriptorHeaps {
        resources: NativeDescriptorHeap,
        samplers: NativeDescriptorHeap,
    },
    SetPipelineState(NativePipelineState),
    SetStateObject(NativeStateObject),
    SetRootSignature {
        bind_point: BindPoint,
        root_signature: NativeRootSignature,
    },
    SetRootDescriptorTable {
        bind_point: BindPoint,
        root_index: u32,
        base: GpuDescriptor,
    },
    SetRoot32BitConstants {
        bind_point: BindPoint,
        root_index: u32,
        values: Vec<u32>,
        dest_offset: u32,
    },
    SetRootConstantBufferView {
        bind_point: BindPoint,
        root_index: u32,
        address: u64,
    },
    SetRootShaderResourceView {
        bind_point: BindPoint,
        root_index: u32,
        address: u64,
    },
    SetRootUnorderedAccessView {
        bind_point: BindPoint,
        root_index: u32,
        address: u64,
    },
    SetRenderTargets {
        render_targets: Vec<CpuDescriptor>,
        depth_stencil: Option<CpuDescriptor>,
    },
    ClearRenderTargetView {
        view: CpuDescriptor,
        color: [f32; 4],
    },
    ClearDepthStencilView {
        view: CpuDescriptor,
        depth: Option<f32>,
        stencil: Option<u8>,
    },
    ClearUnorderedAccessViewFloat {
        gpu_view: GpuDescriptor,
        cpu_view: CpuDescriptor,
        resource: NativeResource,
        values: [f32; 4],
    },
    SetViewports(Vec<Viewport>),
    SetScissorRects(Vec<ScissorRect>),
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffers {
        start_slot: u32,
        views: Vec<VertexBufferView>,
    },
    SetIndexBuffer(IndexBufferView),
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
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchMesh {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchRays(DispatchRaysDesc),
    ExecuteIndirect {
        signature: NativeCommandSignature,
        max_count: u32,
        arguments: NativeResource,
        arguments_offset: u64,
        count: Option<(NativeResource, u64)>,
    },
    BeginEvent(String),
    EndEvent,
    SetMarker(String),
}

impl NativeCommand {
    /// Short name of the command, as it appears in breadcrumbs.
    pub fn name(&self) -> &'static str {
        match self {
            NativeCommand::Barriers(_) => "ResourceBarrier",
            NativeCommand::CopyBufferRegion { .. } => "CopyBufferRegion",
            NativeCommand::CopyResource { .. } => "CopyResource",
            NativeCommand::CopyTextureRegion { .. } => "CopyTextureRegion",
            NativeCommand::ResolveSubresource { .. } => "ResolveSubresource",
            NativeCommand::SetDescriptorHeaps { .. } => "SetDescriptorHeaps",
            NativeCommand::SetPipelineState(_) => "SetPipelineState",
            NativeCommand::SetStateObject(_) => "SetPipelineState1",
            NativeCommand::SetRootSignature { .. } => "SetRootSignature",
            NativeCommand::SetRootDescriptorTable { .. } => "SetRootDescriptorTable",
            NativeCommand::SetRoot32BitConstants { .. } => "SetRoot32BitConstants",
            NativeCommand::SetRootConstantBufferView { .. } => "SetRootConstantBufferView",
            NativeCommand::SetRootShaderResourceView { .. } => "SetRootShaderResourceView",
            NativeCommand::SetRootUnorderedAccessView { .. } => "SetRootUnorderedAccessView",
            NativeCommand::SetRenderTargets { .. } => "OMSetRenderTargets",
            NativeCommand::ClearRenderTargetView { .. } => "ClearRenderTargetView",
            NativeCommand::ClearDepthStencilView { .. } => "ClearDepthStencilView",
            NativeCommand::ClearUnorderedAccessViewFloat { .. } => "ClearUnorderedAccessView",
            NativeCommand::SetViewports(_) => "RSSetViewports",
            NativeCommand::SetScissorRects(_) => "RSSetScissorRects",
            NativeCommand::SetPrimitiveTopology(_) => "IASetPrimitiveTopology",
            NativeCommand::SetVertexBuffers { .. } => "IASetVertexBuffers",
            NativeCommand::SetIndexBuffer(_) => "IASetIndexBuffer",
            NativeCommand::Draw { .. } => "DrawInstanced",
            NativeCommand::DrawIndexed { .. } => "DrawIndexedInstanced",
            NativeCommand::Dispatch { .. } => "Dispatch",
            NativeCommand::DispatchMesh { .. } => "DispatchMesh",
            NativeCommand::DispatchRays(_) => "DispatchRays",
            NativeCommand::ExecuteIndirect { .. } => "ExecuteIndirect",
            NativeCommand::BeginEvent(_) => "BeginEvent",
            NativeCommand::EndEvent => "EndEvent",
            NativeCommand::SetMarker(_) => "SetMarker",
        }
    }

    /// Returns `true` for commands that show up as GPU work in breadcrumbs.
    pub fn is_breadcrumb(&self) -> bool {
        !matches!(
            self,
            NativeCommand::SetDescriptorHeaps { .. }
                | NativeCommand::SetRootSignature { .. }
                | NativeCommand::SetRootDescriptorTable { .. }
                | NativeCommand::SetRoot32BitConstants { .. }
                | NativeCommand::SetRootConstantBufferView { .. }
                | NativeCommand::SetRootShaderResourceView { .. }
                | NativeCommand::SetRootUnorderedAccessView { .. }
                | NativeCommand::SetViewports(_)
                | NativeCommand::SetScissorRects(_)
                | NativeCommand::SetPrimitiveTopology(_)
                | NativeCommand::SetVertexBuffers { .. }
                | NativeCommand::SetIndexBuffer(_)
        )
    }
}
