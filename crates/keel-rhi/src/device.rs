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

//! The device: adapter selection, queues, heaps and frame pacing.

use crate::context::CommandContext;
use crate::descriptors::{CpuDescriptorHeap, GlobalDescriptorHeap};
use crate::dred;
use crate::error::RhiError;
use crate::fence::{Fence, SyncPoint};
use crate::queue::CommandQueue;
use crate::release::DeferredReleaseQueue;
use crate::resource::Sampler;
use crate::scratch::ScratchAllocationManager;
use crate::shader::ShaderManager;
use keel_core::config::DeviceSettings;
use keel_core::rhi::{
    AdapterInfo, DebugSettings, DescriptorHeapType, DeviceCapabilities, MeshShaderTier, MessageSeverity,
    NativeBackend, NativeDevice, QueueType, RaytracingTier, SamplerDesc, ShaderCompiler, ShaderModel,
};
use keel_core::SubsystemRegistry;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lowest shader model the RHI runs on.
pub const MIN_SHADER_MODEL: ShaderModel = ShaderModel::SM_6_6;

/// Resource binding tier the bindless heaps need.
pub const REQUIRED_RESOURCE_BINDING_TIER: u32 = 3;

/// The GPU device and everything it owns.
///
/// Created once per adapter with [`Device::new`]. The device hands out
/// command contexts, owns the global descriptor heaps and the scratch
/// pool, and paces frames with [`Device::tick_frame`]. Subsystems shared
/// by the renderer (the shader manager first of all) live in its
/// [`SubsystemRegistry`].
pub struct Device {
    backend_name: String,
    adapter: AdapterInfo,
    capabilities: DeviceCapabilities,
    settings: DeviceSettings,
    native: Arc<dyn NativeDevice>,
    frame_fence: Arc<Fence>,
    release: Arc<DeferredReleaseQueue>,
    cpu_heaps: [Arc<CpuDescriptorHeap>; 4],
    resource_heap: Arc<GlobalDescriptorHeap>,
    sampler_heap: Arc<GlobalDescriptorHeap>,
    scratch: Arc<ScratchAllocationManager>,
    queues: [CommandQueue; 3],
    subsystems: RwLock<SubsystemRegistry>,
    frame_index: AtomicU64,
    frames_in_flight: Mutex<VecDeque<SyncPoint>>,
}

impl Device {
    /// Selects an adapter of `backend`, creates the native device and every
    /// queue and heap.
    ///
    /// The adapter with the most dedicated video memory wins; software
    /// adapters are only used when nothing else is available. Adapters
    /// below shader model 6.6, resource binding tier 3 or without wave
    /// intrinsics are rejected.
    pub fn new(backend: &dyn NativeBackend, settings: DeviceSettings) -> Result<Arc<Self>, RhiError> {
        settings.validate()?;
        log::info!("Initializing the {} backend", backend.name());

        let adapters = backend.enumerate_adapters()?;
        for (index, adapter) in adapters.iter().enumerate() {
            log_adapter(index, adapter);
        }
        let index = select_adapter(&adapters).ok_or(RhiError::NoAdapter)?;
        let adapter = adapters[index].clone();
        log::info!("Selected adapter #{index}: \"{}\"", adapter.name);

        let debug = DebugSettings {
            debug_layer: settings.validation.enable_debug_layer,
            gpu_validation: settings.validation.gpu_validation,
            dred: settings.enable_dred,
        };
        let native = backend.create_device(index, &debug)?;

        let capabilities = native.capabilities();
        check_capabilities(&adapter, &capabilities)?;
        log_optional_features(&capabilities);

        if settings.validation.enable_debug_layer {
            native.set_break_on_severity(MessageSeverity::Corruption, true);
            native.set_break_on_severity(MessageSeverity::Error, settings.validation.break_on_error);
            native.set_break_on_severity(MessageSeverity::Warning, settings.validation.break_on_warning);
        }
        if settings.enable_dred {
            install_removed_handler(&native);
        }

        let frame_fence = Fence::new(native.clone(), "Frame Fence")?;
        let release = Arc::new(DeferredReleaseQueue::new(native.clone(), frame_fence.clone()));
        let cpu_heap =
            |ty| Arc::new(CpuDescriptorHeap::new(native.clone(), ty, settings.cpu_descriptor_heap_size));
        let cpu_heaps = [
            cpu_heap(DescriptorHeapType::CbvSrvUav),
            cpu_heap(DescriptorHeapType::Sampler),
            cpu_heap(DescriptorHeapType::Rtv),
            cpu_heap(DescriptorHeapType::Dsv),
        ];
        let resource_heap = Arc::new(GlobalDescriptorHeap::new(
            native.clone(),
            DescriptorHeapType::CbvSrvUav,
            settings.persistent_descriptor_count,
            settings.dynamic_descriptor_page_size,
            settings.dynamic_descriptor_page_count,
            frame_fence.clone(),
        )?);
        let sampler_heap = Arc::new(GlobalDescriptorHeap::new(
            native.clone(),
            DescriptorHeapType::Sampler,
            settings.sampler_descriptor_count,
            0,
            0,
            frame_fence.clone(),
        )?);
        let scratch = Arc::new(ScratchAllocationManager::new(
            native.clone(),
            release.clone(),
            settings.scratch_page_size,
        ));
        let queue = |ty| {
            CommandQueue::new(
                ty,
                native.clone(),
                scratch.clone(),
                resource_heap.clone(),
                sampler_heap.clone(),
                settings.barrier_batch_size,
            )
        };
        let queues = [
            queue(QueueType::Graphics)?,
            queue(QueueType::Compute)?,
            queue(QueueType::Copy)?,
        ];

        Ok(Arc::new(Self {
            backend_name: backend.name().to_string(),
            adapter,
            capabilities,
            settings,
            native,
            frame_fence,
            release,
            cpu_heaps,
            resource_heap,
            sampler_heap,
            scratch,
            queues,
            subsystems: RwLock::new(SubsystemRegistry::new()),
            frame_index: AtomicU64::new(0),
            frames_in_flight: Mutex::new(VecDeque::new()),
        }))
    }

    // --- Queues & contexts ---

    /// One of the three queues.
    pub fn queue(&self, ty: QueueType) -> &CommandQueue {
        match ty {
            QueueType::Graphics => &self.queues[0],
            QueueType::Compute => &self.queues[1],
            QueueType::Copy => &self.queues[2],
        }
    }

    /// Creates a context recording for the `ty` queue.
    pub fn allocate_context(self: &Arc<Self>, ty: QueueType) -> Result<CommandContext, RhiError> {
        self.queue(ty).allocate_context(self.clone())
    }

    /// Blocks until every queue is idle.
    pub fn wait_for_idle(&self) -> Result<(), RhiError> {
        for queue in &self.queues {
            queue.wait_for_idle()?;
        }
        self.frame_fence.wait_for_last_signal()
    }

    // --- Frames ---

    /// Ends the current frame.
    ///
    /// The graphics queue waits for the other queues, then signals the
    /// frame fence. When more than `frames_in_flight` frames are queued the
    /// CPU blocks on the oldest one. Deferred releases whose frame completed
    /// are processed and pending shader file events are consumed.
    pub fn tick_frame(&self) -> Result<SyncPoint, RhiError> {
        let graphics = self.queue(QueueType::Graphics);
        graphics.insert_wait_for_queue(self.queue(QueueType::Compute))?;
        graphics.insert_wait_for_queue(self.queue(QueueType::Copy))?;
        let value = self.frame_fence.signal(QueueType::Graphics)?;
        let sync = SyncPoint::new(self.frame_fence.clone(), value);
        self.frame_index.fetch_add(1, Ordering::Relaxed);

        let oldest = {
            let mut frames = self.frames_in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            frames.push_back(sync.clone());
            if frames.len() > self.settings.frames_in_flight as usize {
                frames.pop_front()
            } else {
                None
            }
        };
        if let Some(oldest) = oldest {
            oldest.cpu_wait()?;
        }

        let released = self.release.process();
        if released > 0 {
            log::trace!("Released {released} deferred objects");
        }
        if let Some(manager) = self.subsystems().get::<ShaderManager>() {
            manager.tick();
        }
        Ok(sync)
    }

    /// Number of frames ended so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Relaxed)
    }

    // --- Subsystems ---

    /// The subsystem registry.
    pub fn subsystems(&self) -> RwLockReadGuard<'_, SubsystemRegistry> {
        self.subsystems.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The subsystem registry, for registration.
    pub fn subsystems_mut(&self) -> RwLockWriteGuard<'_, SubsystemRegistry> {
        self.subsystems.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the shader manager from the shader settings and registers
    /// it. A previously installed manager is replaced.
    pub fn install_shader_manager(&self, compiler: Arc<dyn ShaderCompiler>) -> Result<Arc<ShaderManager>, RhiError> {
        let manager = ShaderManager::new(compiler, &self.settings.shader)?;
        Ok(self.subsystems_mut().register(manager))
    }

    /// The installed shader manager.
    pub fn shader_manager(&self) -> Result<Arc<ShaderManager>, RhiError> {
        self.subsystems()
            .get::<ShaderManager>()
            .ok_or(RhiError::MissingSubsystem("shader manager"))
    }

    // --- Samplers ---

    /// Creates a sampler in the shader-visible sampler heap.
    pub fn create_sampler(&self, desc: SamplerDesc) -> Result<Sampler, RhiError> {
        Sampler::new(
            self.native.as_ref(),
            desc,
            self.cpu_heap(DescriptorHeapType::Sampler),
            &self.sampler_heap,
        )
    }

    // --- Accessors ---

    /// The native device.
    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.native
    }

    /// Name of the backend the device was created on.
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// The selected adapter.
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Feature levels and tiers.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// The settings the device was created with.
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// The fence signaled at the end of every frame.
    pub fn frame_fence(&self) -> &Arc<Fence> {
        &self.frame_fence
    }

    /// The deferred release queue.
    pub fn release_queue(&self) -> &Arc<DeferredReleaseQueue> {
        &self.release
    }

    /// The CPU descriptor pool of a heap type.
    pub fn cpu_heap(&self, ty: DescriptorHeapType) -> &Arc<CpuDescriptorHeap> {
        match ty {
            DescriptorHeapType::CbvSrvUav => &self.cpu_heaps[0],
            DescriptorHeapType::Sampler => &self.cpu_heaps[1],
            DescriptorHeapType::Rtv => &self.cpu_heaps[2],
            DescriptorHeapType::Dsv => &self.cpu_heaps[3],
        }
    }

    /// The shader-visible CBV/SRV/UAV heap.
    pub fn resource_heap(&self) -> &Arc<GlobalDescriptorHeap> {
        &self.resource_heap
    }

    /// The shader-visible sampler heap.
    pub fn sampler_heap(&self) -> &Arc<GlobalDescriptorHeap> {
        &self.sampler_heap
    }

    /// The scratch page pool.
    pub fn scratch(&self) -> &Arc<ScratchAllocationManager> {
        &self.scratch
    }

    fn shutdown(&self) {
        log::info!("Shutting down the device on \"{}\"", self.adapter.name);
        if let Err(err) = self.wait_for_idle() {
            log::error!("Failed to idle the GPU during shutdown: {err}");
        }
        // Subsystems may own GPU objects; their releases join the drain below.
        let subsystems = std::mem::replace(&mut *self.subsystems_mut(), SubsystemRegistry::new());
        drop(subsystems);
        // Drops of released keep-alive values may queue more releases.
        let mut flushed = true;
        loop {
            let signaled = self
                .frame_fence
                .signal(QueueType::Graphics)
                .and_then(|value| self.frame_fence.cpu_wait(value));
            if let Err(err) = signaled {
                log::error!("Failed to flush the frame fence during shutdown: {err}");
                flushed = false;
                break;
            }
            if self.release.process() == 0 {
                break;
            }
        }
        if flushed && !std::thread::panicking() {
            keel_core::rhi_check!(
                self.release.is_empty(),
                "{} deferred releases are still queued at shutdown",
                self.release.len()
            );
        }
        self.release.release_all();
        for queue in &self.queues {
            queue.shutdown();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend_name)
            .field("adapter", &self.adapter.name)
            .field("frame", &self.frame_index())
            .finish()
    }
}

fn log_adapter(index: usize, adapter: &AdapterInfo) {
    log::info!(
        "Adapter #{index}: \"{}\" ({:04x}:{:04x}), {} MB dedicated, {} MB shared{}",
        adapter.name,
        adapter.vendor_id,
        adapter.device_id,
        adapter.dedicated_video_memory >> 20,
        adapter.shared_system_memory >> 20,
        if adapter.is_software { ", software" } else { "" }
    );
    for output in &adapter.outputs {
        log::info!(
            "    Output \"{}\": {:?}, {} nits{}",
            output.name,
            output.color_space,
            output.max_luminance,
            if output.supports_hdr() { ", HDR" } else { "" }
        );
    }
}

/// Index of the adapter with the most dedicated memory, hardware first.
fn select_adapter(adapters: &[AdapterInfo]) -> Option<usize> {
    adapters
        .iter()
        .enumerate()
        .max_by_key(|(index, adapter)| {
            (
                !adapter.is_software,
                adapter.dedicated_video_memory,
                std::cmp::Reverse(*index),
            )
        })
        .map(|(index, _)| index)
}

fn check_capabilities(adapter: &AdapterInfo, caps: &DeviceCapabilities) -> Result<(), RhiError> {
    let unsupported = |reason: String| RhiError::UnsupportedDevice {
        adapter: adapter.name.clone(),
        reason,
    };
    if caps.shader_model < MIN_SHADER_MODEL {
        return Err(unsupported(format!(
            "shader model {} is below the required {MIN_SHADER_MODEL}",
            caps.shader_model
        )));
    }
    if caps.resource_binding_tier < REQUIRED_RESOURCE_BINDING_TIER {
        return Err(unsupported(format!(
            "resource binding tier {} is below the required {REQUIRED_RESOURCE_BINDING_TIER}",
            caps.resource_binding_tier
        )));
    }
    if !caps.wave_ops {
        return Err(unsupported("wave intrinsics are not supported".into()));
    }
    Ok(())
}

fn log_optional_features(caps: &DeviceCapabilities) {
    log::info!("Shader model {}", caps.shader_model);
    match caps.raytracing {
        RaytracingTier::NotSupported => log::info!("Raytracing: not supported"),
        tier => log::info!("Raytracing: {tier:?}"),
    }
    match caps.mesh_shaders {
        MeshShaderTier::NotSupported => log::info!("Mesh shaders: not supported"),
        tier => log::info!("Mesh shaders: {tier:?}"),
    }
    log::info!(
        "Variable rate shading tier {}, sampler feedback tier {}, render pass tier {}",
        caps.variable_rate_shading_tier,
        caps.sampler_feedback_tier,
        caps.render_pass_tier
    );
}

/// Logs the DRED report when the device is removed.
fn install_removed_handler(native: &Arc<dyn NativeDevice>) {
    let weak = Arc::downgrade(native);
    native.on_device_removed(Box::new(move || {
        let Some(native) = weak.upgrade() else {
            return;
        };
        let reason = native.device_removed_reason();
        match native.dred_report() {
            Some(report) => log::error!("{}", dred::format_report(reason.as_ref(), &report)),
            None => log::error!(
                "Device removed: {}",
                reason.map_or_else(|| "unknown reason".to_string(), |r| r.to_string())
            ),
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, vram: u64, software: bool) -> AdapterInfo {
        AdapterInfo {
            name: name.into(),
            vendor_id: 0x10DE,
            device_id: 1,
            dedicated_video_memory: vram,
            shared_system_memory: 0,
            is_software: software,
            outputs: Vec::new(),
        }
    }

    #[test]
    fn hardware_adapters_win_over_software() {
        let adapters = [
            adapter("WARP", 16 << 30, true),
            adapter("Integrated", 512 << 20, false),
            adapter("Discrete", 8 << 30, false),
        ];
        assert_eq!(select_adapter(&adapters), Some(2));
        assert_eq!(select_adapter(&adapters[..1]), Some(0));
        assert_eq!(select_adapter(&[]), None);
    }

    #[test]
    fn ties_keep_the_first_adapter() {
        let adapters = [adapter("A", 1 << 30, false), adapter("B", 1 << 30, false)];
        assert_eq!(select_adapter(&adapters), Some(0));
    }
}
