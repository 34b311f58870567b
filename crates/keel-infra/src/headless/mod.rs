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

//! A headless reference implementation of the native boundary.
//!
//! The device keeps every resource in host memory and executes recorded
//! command streams on a simulated GPU timeline: copies and clears move real
//! bytes, barriers are checked against tracked per-subresource states and
//! fences complete when the queue that signals them is processed. Shader
//! work (draws, dispatches) is only logged.

mod device;
mod memory;
mod timeline;

pub use device::{DescriptorContent, HeadlessDevice};

use keel_core::rhi::{
    AdapterInfo, ColorSpace, DebugSettings, DeviceCapabilities, MeshShaderTier, NativeBackend,
    NativeCommand, NativeCommandList, NativeDevice, NativeFence, NativeSwapChain, OutputInfo,
    QueueType, RaytracingTier, ShaderModel,
};
use keel_core::ApiError;
use std::sync::{Arc, Mutex};

/// When queued GPU work executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Work executes as soon as it is submitted.
    #[default]
    Immediate,
    /// Work executes when [`HeadlessDevice::process_queue`] or
    /// [`HeadlessDevice::process_all`] is called, or when the CPU waits.
    Manual,
}

/// Configuration of a headless device.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Adapters reported by the backend.
    pub adapters: Vec<AdapterInfo>,
    /// Capabilities of created devices.
    pub capabilities: DeviceCapabilities,
    /// When GPU work executes.
    pub completion: CompletionMode,
    /// Number of executed command lists kept for breadcrumbs.
    pub breadcrumb_history: usize,
}

impl HeadlessConfig {
    /// A single HDR-capable adapter with every optional feature.
    pub fn full_featured() -> Self {
        Self {
            adapters: vec![
                AdapterInfo {
                    name: "Keel Headless Adapter".into(),
                    vendor_id: 0x1414,
                    device_id: 0x8C,
                    dedicated_video_memory: 8 << 30,
                    shared_system_memory: 16 << 30,
                    is_software: false,
                    outputs: vec![OutputInfo {
                        name: "\\\\.\\DISPLAY1".into(),
                        color_space: ColorSpace::Hdr10,
                        max_luminance: 1000.0,
                    }],
                },
                AdapterInfo {
                    name: "Keel Software Rasterizer".into(),
                    vendor_id: 0x1414,
                    device_id: 0x8D,
                    dedicated_video_memory: 0,
                    shared_system_memory: 4 << 30,
                    is_software: true,
                    outputs: Vec::new(),
                },
            ],
            capabilities: DeviceCapabilities {
                shader_model: ShaderModel::SM_6_8,
                resource_binding_tier: 3,
                wave_ops: true,
                raytracing: RaytracingTier::Tier1_1,
                mesh_shaders: MeshShaderTier::Tier1,
                variable_rate_shading_tier: 2,
                sampler_feedback_tier: 1,
                render_pass_tier: 1,
                shader_identifier_size: 32,
            },
            completion: CompletionMode::Immediate,
            breadcrumb_history: 8,
        }
    }

    /// Sets the completion mode.
    pub fn with_completion(mut self, completion: CompletionMode) -> Self {
        self.completion = completion;
        self
    }

    /// Replaces the capabilities.
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replaces the output list of every hardware adapter.
    pub fn with_outputs(mut self, outputs: Vec<OutputInfo>) -> Self {
        for adapter in self.adapters.iter_mut().filter(|a| !a.is_software) {
            adapter.outputs = outputs.clone();
        }
        self
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self::full_featured()
    }
}

/// An operation the simulated GPU executed, in timeline order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedOp {
    /// Queue the operation executed on.
    pub queue: QueueType,
    /// What happened.
    pub kind: ExecutedKind,
}

/// The kinds of [`ExecutedOp`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutedKind {
    /// A command list started executing.
    BeginList(NativeCommandList),
    /// A recorded command executed.
    Command(NativeCommand),
    /// A fence was signaled.
    Signal {
        /// The fence.
        fence: NativeFence,
        /// The signaled value.
        value: u64,
    },
    /// A queue-side wait was satisfied.
    Wait {
        /// The fence.
        fence: NativeFence,
        /// The awaited value.
        value: u64,
    },
    /// A swapchain presented.
    Present(NativeSwapChain),
}

/// A backend handing out [`HeadlessDevice`]s.
#[derive(Default)]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    devices: Mutex<Vec<Arc<HeadlessDevice>>>,
}

impl HeadlessBackend {
    /// Creates a backend with the given configuration.
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            devices: Mutex::new(Vec::new()),
        }
    }

    /// The most recently created device.
    pub fn last_device(&self) -> Option<Arc<HeadlessDevice>> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

impl NativeBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "Headless"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, ApiError> {
        Ok(self.config.adapters.clone())
    }

    fn create_device(
        &self,
        adapter_index: usize,
        debug: &DebugSettings,
    ) -> Result<Arc<dyn NativeDevice>, ApiError> {
        let adapter = self.config.adapters.get(adapter_index).ok_or_else(|| {
            ApiError::new(
                ApiError::E_INVALIDARG,
                format!("adapter index {adapter_index} out of range"),
            )
        })?;
        log::debug!(
            "Creating headless device on '{}' (debug layer: {}, DRED: {})",
            adapter.name,
            debug.debug_layer,
            debug.dred
        );
        let device = HeadlessDevice::new(self.config.clone());
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(device.clone());
        Ok(device)
    }
}
