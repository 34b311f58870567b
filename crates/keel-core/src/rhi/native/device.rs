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

//! The native device and backend traits.

use super::commands::NativeCommand;
use super::dred::DredReport;
use super::handles::*;
use super::pipeline::*;
use crate::error::ApiError;
use crate::rhi::{ClearValue, Format, HeapType, QueueType, ResourceDesc, ResourceStates, ShaderModel};
use raw_window_handle::RawWindowHandle;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Adapters & capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// The colour space an output scans out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// sRGB, gamma 2.2.
    Srgb,
    /// BT.2020 primaries with the ST.2084 (PQ) transfer function.
    Hdr10,
    /// Linear scRGB.
    ScRgb,
}

/// A display output of an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    /// Name of the output.
    pub name: String,
    /// Current colour space.
    pub color_space: ColorSpace,
    /// Peak luminance in nits.
    pub max_luminance: f32,
}

impl OutputInfo {
    /// Returns `true` if the output currently scans out HDR.
    pub fn supports_hdr(&self) -> bool {
        self.color_space != ColorSpace::Srgb
    }
}

/// An adapter reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    /// Adapter description.
    pub name: String,
    /// PCI vendor id.
    pub vendor_id: u32,
    /// PCI device id.
    pub device_id: u32,
    /// Dedicated video memory, in bytes.
    pub dedicated_video_memory: u64,
    /// Shared system memory, in bytes.
    pub shared_system_memory: u64,
    /// Software (WARP) adapter.
    pub is_software: bool,
    /// Attached outputs.
    pub outputs: Vec<OutputInfo>,
}

/// Raytracing support level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum RaytracingTier {
    NotSupported,
    Tier1_0,
    Tier1_1,
}

/// Mesh shader support level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum MeshShaderTier {
    NotSupported,
    Tier1,
}

/// Feature levels and optional tiers of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Highest supported shader model.
    pub shader_model: ShaderModel,
    /// Resource binding tier (1 to 3).
    pub resource_binding_tier: u32,
    /// Wave intrinsics.
    pub wave_ops: bool,
    /// Raytracing tier.
    pub raytracing: RaytracingTier,
    /// Mesh shader tier.
    pub mesh_shaders: MeshShaderTier,
    /// Variable rate shading tier (0 when unsupported).
    pub variable_rate_shading_tier: u32,
    /// Sampler feedback tier (0 when unsupported).
    pub sampler_feedback_tier: u32,
    /// Render pass tier (0 to 2).
    pub render_pass_tier: u32,
    /// Size of one shader record identifier.
    pub shader_identifier_size: u32,
}

/// Severity of a validation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
    Corruption,
}

/// Debug features requested at device creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DebugSettings {
    /// Native validation layer.
    pub debug_layer: bool,
    /// GPU-based validation.
    pub gpu_validation: bool,
    /// Auto-breadcrumbs and page-fault reporting.
    pub dred: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

/// A range of mips and array slices a view exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ViewRange {
    pub first_mip: u32,
    pub mip_count: u32,
    pub first_slice: u32,
    pub slice_count: u32,
}

impl ViewRange {
    /// Every mip and slice of a resource with `mips` mips and `slices` slices.
    pub const fn whole(mips: u32, slices: u32) -> Self {
        Self {
            first_mip: 0,
            mip_count: mips,
            first_slice: 0,
            slice_count: slices,
        }
    }

    /// One mip of one slice.
    pub const fn single(mip: u32, slice: u32) -> Self {
        Self {
            first_mip: mip,
            mip_count: 1,
            first_slice: slice,
            slice_count: 1,
        }
    }
}

/// How a view interprets its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ViewDimension {
    Buffer {
        first_element: u64,
        element_count: u32,
        stride: u32,
        raw: bool,
    },
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture2DMs,
    Texture2DMsArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
    AccelerationStructure {
        address: u64,
    },
    ConstantBuffer {
        address: u64,
        size: u32,
    },
}

/// The kind of a resource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ViewKind {
    Srv,
    Uav,
    Rtv,
    Dsv,
    Cbv,
}

/// Describes a view written into a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    /// Kind of view.
    pub kind: ViewKind,
    /// Viewed resource; `None` for null descriptors and acceleration structures.
    pub resource: Option<NativeResource>,
    /// View format.
    pub format: Format,
    /// Interpretation of the resource.
    pub dimension: ViewDimension,
    /// Exposed mips and slices.
    pub range: ViewRange,
    /// Read-only depth view.
    pub read_only_depth: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Swapchains
// ─────────────────────────────────────────────────────────────────────────────

/// Describes a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainDesc {
    /// Backbuffer width.
    pub width: u32,
    /// Backbuffer height.
    pub height: u32,
    /// Backbuffer format.
    pub format: Format,
    /// Number of backbuffers.
    pub buffer_count: u32,
    /// Tearing support.
    pub allow_tearing: bool,
    /// Frame-latency waitable object.
    pub waitable: bool,
    /// Maximum queued frames when waitable.
    pub max_frame_latency: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point of a native API: adapter enumeration and device creation.
pub trait NativeBackend: Send + Sync {
    /// Human readable backend name.
    fn name(&self) -> &str;

    /// Lists the adapters of the system.
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, ApiError>;

    /// Creates a device on an adapter returned by [`Self::enumerate_adapters`].
    fn create_device(
        &self,
        adapter_index: usize,
        debug: &DebugSettings,
    ) -> Result<Arc<dyn NativeDevice>, ApiError>;
}

/// A native graphics device.
///
/// Object creation returns a handle owned by the caller, released with
/// [`Self::release`]. Command recording is a stream of [`NativeCommand`]s
/// appended to an open command list.
pub trait NativeDevice: Send + Sync {
    /// Feature levels and tiers.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Breaks into the debugger on messages of `severity`.
    fn set_break_on_severity(&self, severity: MessageSeverity, enable: bool);

    /// Sets the debug name of an object.
    fn set_name(&self, object: NativeObject, name: &str);

    /// Releases an object.
    fn release(&self, object: NativeObject);

    // --- Synchronization ---

    /// Creates a fence holding `initial_value`.
    fn create_fence(&self, initial_value: u64) -> Result<NativeFence, ApiError>;

    /// The last value the GPU signaled.
    fn fence_completed_value(&self, fence: NativeFence) -> u64;

    /// Blocks until the fence reaches `value`.
    fn wait_for_fence(&self, fence: NativeFence, value: u64) -> Result<(), ApiError>;

    /// Enqueues a fence signal on a queue.
    fn signal_queue(&self, queue: QueueType, fence: NativeFence, value: u64) -> Result<(), ApiError>;

    /// Enqueues a GPU-side wait on a queue.
    fn wait_queue(&self, queue: QueueType, fence: NativeFence, value: u64) -> Result<(), ApiError>;

    /// Submits closed command lists to a queue.
    fn execute_command_lists(
        &self,
        queue: QueueType,
        lists: &[NativeCommandList],
    ) -> Result<(), ApiError>;

    /// Registers a callback fired when the device is removed.
    fn on_device_removed(&self, callback: Box<dyn Fn() + Send + Sync>);

    /// The removal reason, if the device was removed.
    fn device_removed_reason(&self) -> Option<ApiError>;

    /// Breadcrumbs and page-fault data, if DRED was enabled.
    fn dred_report(&self) -> Option<DredReport>;

    // --- Command lists ---

    /// Creates a command allocator for a queue type.
    fn create_command_allocator(&self, queue: QueueType) -> Result<NativeCommandAllocator, ApiError>;

    /// Recycles the memory of an allocator whose lists completed.
    fn reset_command_allocator(&self, allocator: NativeCommandAllocator) -> Result<(), ApiError>;

    /// Creates an open command list.
    fn create_command_list(
        &self,
        queue: QueueType,
        allocator: NativeCommandAllocator,
    ) -> Result<NativeCommandList, ApiError>;

    /// Reopens a closed command list on an allocator.
    fn reset_command_list(
        &self,
        list: NativeCommandList,
        allocator: NativeCommandAllocator,
    ) -> Result<(), ApiError>;

    /// Appends a command to an open list.
    fn record(&self, list: NativeCommandList, command: NativeCommand);

    /// Closes a list for submission.
    fn close_command_list(&self, list: NativeCommandList) -> Result<(), ApiError>;

    // --- Resources ---

    /// Creates a committed resource.
    fn create_resource(
        &self,
        desc: &ResourceDesc,
        heap: HeapType,
        initial_state: ResourceStates,
        clear_value: Option<&ClearValue>,
    ) -> Result<NativeResource, ApiError>;

    /// GPU virtual address of a buffer.
    fn gpu_virtual_address(&self, resource: NativeResource) -> u64;

    /// Writes into the persistent mapping of an upload buffer.
    fn write_mapped(&self, resource: NativeResource, offset: u64, data: &[u8]) -> Result<(), ApiError>;

    /// Reads from the persistent mapping of a readback (or upload) buffer.
    fn read_mapped(&self, resource: NativeResource, offset: u64, out: &mut [u8]) -> Result<(), ApiError>;

    // --- Descriptors ---

    /// Creates a descriptor heap.
    fn create_descriptor_heap(
        &self,
        ty: DescriptorHeapType,
        count: u32,
        shader_visible: bool,
    ) -> Result<NativeDescriptorHeap, ApiError>;

    /// First CPU handle of a heap, and first GPU handle if shader visible.
    fn descriptor_heap_start(&self, heap: NativeDescriptorHeap) -> (CpuDescriptor, Option<GpuDescriptor>);

    /// Distance between two descriptors of a heap type.
    fn descriptor_increment(&self, ty: DescriptorHeapType) -> u32;

    /// Writes a view into a descriptor slot.
    fn create_view(&self, desc: &ViewDesc, dest: CpuDescriptor);

    /// Writes a sampler into a descriptor slot.
    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor);

    /// Copies `count` consecutive descriptors.
    fn copy_descriptors(&self, count: u32, dest: CpuDescriptor, src: CpuDescriptor, ty: DescriptorHeapType);

    // --- Pipelines ---

    /// Creates a root signature.
    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<NativeRootSignature, ApiError>;

    /// Creates a pipeline state from a subobject stream.
    fn create_pipeline_state(&self, stream: &PipelineStateStream) -> Result<NativePipelineState, ApiError>;

    /// Creates a state object from a subobject stream.
    fn create_state_object(&self, stream: &StateObjectStream) -> Result<NativeStateObject, ApiError>;

    /// The shader identifier of an export of a state object.
    fn shader_identifier(&self, state_object: NativeStateObject, export: &str) -> Option<Vec<u8>>;

    /// Creates an indirect command signature.
    fn create_command_signature(
        &self,
        desc: &CommandSignatureDesc,
        root_signature: Option<NativeRootSignature>,
    ) -> Result<NativeCommandSignature, ApiError>;

    // --- Swapchains ---

    /// Creates a swapchain presenting to a window on the graphics queue.
    fn create_swap_chain(
        &self,
        window: RawWindowHandle,
        desc: &SwapChainDesc,
    ) -> Result<NativeSwapChain, ApiError>;

    /// A backbuffer of a swapchain.
    fn swap_chain_buffer(&self, swap_chain: NativeSwapChain, index: u32) -> Result<NativeResource, ApiError>;

    /// Index of the backbuffer to render into.
    fn swap_chain_current_index(&self, swap_chain: NativeSwapChain) -> u32;

    /// The output the swapchain is displayed on.
    fn swap_chain_output(&self, swap_chain: NativeSwapChain) -> Option<OutputInfo>;

    /// Resizes the backbuffers. Every buffer must have been released.
    fn resize_swap_chain(
        &self,
        swap_chain: NativeSwapChain,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<(), ApiError>;

    /// Sets the colour space the backbuffers are interpreted in.
    fn set_swap_chain_color_space(
        &self,
        swap_chain: NativeSwapChain,
        color_space: ColorSpace,
    ) -> Result<(), ApiError>;

    /// Presents the current backbuffer.
    fn present(&self, swap_chain: NativeSwapChain, sync_interval: u32, allow_tearing: bool) -> Result<(), ApiError>;

    /// Blocks on the frame-latency waitable object.
    fn wait_frame_latency(&self, swap_chain: NativeSwapChain) -> Result<(), ApiError>;
}
