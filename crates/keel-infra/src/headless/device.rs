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

use super::memory::{self, SubresourceLayout};
use super::{CompletionMode, ExecutedKind, ExecutedOp, HeadlessConfig};
use keel_core::rhi::*;
use keel_core::ApiError;
use raw_window_handle::RawWindowHandle;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// First GPU virtual address handed out to buffers.
const VA_BASE: u64 = 0x0000_0010_0000_0000;
/// Buffers are placed on 64 KiB boundaries.
const VA_ALIGNMENT: u64 = 64 * 1024;
/// Bit distinguishing GPU descriptor handles from CPU ones.
const GPU_DESCRIPTOR_BIT: u64 = 1 << 62;
/// Freed allocations remembered for page-fault reports.
const FREED_HISTORY: usize = 64;

/// The content of a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorContent {
    /// A resource view.
    View(ViewDesc),
    /// A sampler.
    Sampler(SamplerDesc),
}

pub(crate) struct ResourceEntry {
    pub desc: ResourceDesc,
    pub heap: HeapType,
    pub memory: Vec<u8>,
    pub layouts: Vec<SubresourceLayout>,
    pub states: ResourceState,
    pub gpu_va: u64,
}

pub(crate) struct ListEntry {
    pub queue: QueueType,
    pub allocator: NativeCommandAllocator,
    pub commands: Vec<NativeCommand>,
    pub open: bool,
}

pub(crate) struct AllocatorEntry {
    pub queue: QueueType,
    pub in_flight: usize,
}

pub(crate) struct HeapEntry {
    pub ty: DescriptorHeapType,
    pub count: u32,
    pub cpu_base: u64,
    pub gpu_base: Option<u64>,
}

pub(crate) struct SwapChainEntry {
    pub desc: SwapChainDesc,
    pub buffers: Vec<NativeResource>,
    pub current: u32,
    pub color_space: ColorSpace,
    pub presents: u64,
}

pub(crate) struct SubmittedList {
    pub list: NativeCommandList,
    pub allocator: NativeCommandAllocator,
    pub commands: Vec<NativeCommand>,
}

pub(crate) enum Submission {
    Execute(Vec<SubmittedList>),
    Signal { fence: NativeFence, value: u64 },
    Wait { fence: NativeFence, value: u64 },
    Present { swap_chain: NativeSwapChain, buffer: NativeResource },
}

/// Everything the device owns, behind one lock.
#[derive(Default)]
pub(crate) struct State {
    pub names: HashMap<u64, String>,
    pub resources: HashMap<NativeResource, ResourceEntry>,
    pub fences: HashMap<NativeFence, u64>,
    pub allocators: HashMap<NativeCommandAllocator, AllocatorEntry>,
    pub lists: HashMap<NativeCommandList, ListEntry>,
    pub heaps: HashMap<NativeDescriptorHeap, HeapEntry>,
    pub descriptors: HashMap<u64, DescriptorContent>,
    pub root_signatures: HashMap<NativeRootSignature, RootSignatureDesc>,
    pub pipelines: HashMap<NativePipelineState, PipelineStateStream>,
    pub state_objects: HashMap<NativeStateObject, StateObjectStream>,
    pub command_signatures: HashMap<NativeCommandSignature, CommandSignatureDesc>,
    pub swap_chains: HashMap<NativeSwapChain, SwapChainEntry>,
    pub swap_buffer_refs: HashMap<NativeResource, u32>,
    pub queues: [VecDeque<Submission>; 3],
    pub executed: Vec<ExecutedOp>,
    pub validation_errors: Vec<String>,
    pub breadcrumbs: VecDeque<BreadcrumbNode>,
    pub breadcrumb_history: usize,
    pub freed: VecDeque<(String, u64, u64)>,
    pub released: usize,
    pub removed: Option<ApiError>,
    pub dred: Option<DredReport>,
    pub break_on: HashSet<MessageSeverity>,
    pub next_va: u64,
    pub rejected_submissions: [u32; 3],
}

impl State {
    pub(crate) fn fence_value(&self, fence: NativeFence) -> u64 {
        if self.removed.is_some() {
            return u64::MAX;
        }
        self.fences.get(&fence).copied().unwrap_or(0)
    }

    pub(crate) fn name_of(&self, raw: u64) -> String {
        self.names
            .get(&raw)
            .cloned()
            .unwrap_or_else(|| format!("<unnamed {raw:#x}>"))
    }

    pub(crate) fn validation_error(&mut self, message: String) {
        log::warn!("[headless validation] {message}");
        self.validation_errors.push(message);
    }
}

/// A native device executing on the CPU. See the module documentation.
pub struct HeadlessDevice {
    config: HeadlessConfig,
    manual: AtomicBool,
    next_id: AtomicU64,
    state: Mutex<State>,
    removed_callbacks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl HeadlessDevice {
    /// Creates a device directly, without going through a backend.
    pub fn new(config: HeadlessConfig) -> Arc<Self> {
        let state = State {
            breadcrumb_history: config.breadcrumb_history.max(1),
            next_va: VA_BASE,
            ..State::default()
        };
        Arc::new(Self {
            manual: AtomicBool::new(config.completion == CompletionMode::Manual),
            config,
            next_id: AtomicU64::new(1),
            state: Mutex::new(state),
            removed_callbacks: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn after_enqueue(&self, state: &mut State) {
        if !self.manual.load(Ordering::Acquire) {
            state.process_all();
        }
    }

    fn check_removed(state: &State) -> Result<(), ApiError> {
        match &state.removed {
            Some(reason) => Err(ApiError::new(reason.hresult, "the device has been removed")),
            None => Ok(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timeline control
    // ─────────────────────────────────────────────────────────────────────

    /// Switches between immediate and manual execution.
    pub fn set_completion_mode(&self, mode: CompletionMode) {
        self.manual.store(mode == CompletionMode::Manual, Ordering::Release);
        if mode == CompletionMode::Immediate {
            self.lock().process_all();
        }
    }

    /// Executes the ready submissions of one queue. Returns how many ran.
    pub fn process_queue(&self, queue: QueueType) -> usize {
        self.lock().process_queue(queue)
    }

    /// Executes every ready submission on every queue.
    pub fn process_all(&self) -> usize {
        self.lock().process_all()
    }

    /// Number of submissions waiting on a queue.
    pub fn pending_submissions(&self, queue: QueueType) -> usize {
        self.lock().queues[queue.index()].len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────

    /// Every operation executed so far, in timeline order.
    pub fn executed(&self) -> Vec<ExecutedOp> {
        self.lock().executed.clone()
    }

    /// Forgets the executed operation log.
    pub fn clear_executed(&self) {
        self.lock().executed.clear();
    }

    /// Every executed barrier with the queue it ran on.
    pub fn executed_barriers(&self) -> Vec<(QueueType, Barrier)> {
        self.lock()
            .executed
            .iter()
            .filter_map(|op| match &op.kind {
                ExecutedKind::Command(NativeCommand::Barriers(barriers)) => Some(
                    barriers
                        .iter()
                        .map(|b| (op.queue, *b))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Usage errors detected while executing.
    pub fn validation_errors(&self) -> Vec<String> {
        self.lock().validation_errors.clone()
    }

    /// The tracked state of a subresource.
    pub fn resource_state(&self, resource: NativeResource, subresource: u32) -> Option<ResourceStates> {
        self.lock()
            .resources
            .get(&resource)
            .map(|r| r.states.get(subresource))
    }

    /// A copy of the memory of a resource.
    pub fn resource_contents(&self, resource: NativeResource) -> Option<Vec<u8>> {
        self.lock().resources.get(&resource).map(|r| r.memory.clone())
    }

    /// The description a resource was created with.
    pub fn resource_desc(&self, resource: NativeResource) -> Option<ResourceDesc> {
        self.lock().resources.get(&resource).map(|r| r.desc)
    }

    /// The debug name of an object.
    pub fn object_name(&self, object: NativeObject) -> Option<String> {
        self.lock().names.get(&raw_of(object)).cloned()
    }

    /// Returns `true` if the object has not been released.
    pub fn is_alive(&self, object: NativeObject) -> bool {
        let state = self.lock();
        match object {
            NativeObject::Resource(r) => state.resources.contains_key(&r),
            NativeObject::Fence(f) => state.fences.contains_key(&f),
            NativeObject::CommandList(l) => state.lists.contains_key(&l),
            NativeObject::CommandAllocator(a) => state.allocators.contains_key(&a),
            NativeObject::DescriptorHeap(h) => state.heaps.contains_key(&h),
            NativeObject::PipelineState(p) => state.pipelines.contains_key(&p),
            NativeObject::StateObject(s) => state.state_objects.contains_key(&s),
            NativeObject::RootSignature(r) => state.root_signatures.contains_key(&r),
            NativeObject::CommandSignature(c) => state.command_signatures.contains_key(&c),
            NativeObject::SwapChain(s) => state.swap_chains.contains_key(&s),
        }
    }

    /// Number of live resources, swapchain buffers included.
    pub fn live_resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// Number of live pipeline states.
    pub fn live_pipeline_count(&self) -> usize {
        self.lock().pipelines.len()
    }

    /// Number of [`NativeDevice::release`] calls so far.
    pub fn released_count(&self) -> usize {
        self.lock().released
    }

    /// The content of a CPU descriptor slot.
    pub fn descriptor(&self, handle: CpuDescriptor) -> Option<DescriptorContent> {
        self.lock().descriptors.get(&handle.0).copied()
    }

    /// The content of a shader-visible descriptor slot.
    pub fn descriptor_gpu(&self, handle: GpuDescriptor) -> Option<DescriptorContent> {
        self.lock()
            .descriptors
            .get(&(handle.0 & !GPU_DESCRIPTOR_BIT))
            .copied()
    }

    /// Reads `len` bytes of buffer memory at a GPU virtual address.
    pub fn read_gpu_address(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let state = self.lock();
        state.resources.values().find_map(|r| {
            let size = r.memory.len() as u64;
            if r.gpu_va != 0 && address >= r.gpu_va && address + len as u64 <= r.gpu_va + size {
                let at = (address - r.gpu_va) as usize;
                Some(r.memory[at..at + len].to_vec())
            } else {
                None
            }
        })
    }

    /// The last pipeline stream a pipeline state was created from.
    pub fn pipeline_stream(&self, pipeline: NativePipelineState) -> Option<PipelineStateStream> {
        self.lock().pipelines.get(&pipeline).cloned()
    }

    /// Number of presents of a swapchain.
    pub fn present_count(&self, swap_chain: NativeSwapChain) -> u64 {
        self.lock()
            .swap_chains
            .get(&swap_chain)
            .map_or(0, |s| s.presents)
    }

    /// The colour space of a swapchain.
    pub fn swap_chain_color_space(&self, swap_chain: NativeSwapChain) -> Option<ColorSpace> {
        self.lock().swap_chains.get(&swap_chain).map(|s| s.color_space)
    }

    /// The description of a swapchain.
    pub fn swap_chain_desc(&self, swap_chain: NativeSwapChain) -> Option<SwapChainDesc> {
        self.lock().swap_chains.get(&swap_chain).map(|s| s.desc)
    }

    /// Returns `true` if the debugger would break on `severity`.
    pub fn breaks_on(&self, severity: MessageSeverity) -> bool {
        self.lock().break_on.contains(&severity)
    }

    /// Makes the next `count` submissions to `queue` fail with `E_FAIL`
    /// without reaching the timeline. The device stays usable.
    pub fn fail_next_submissions(&self, queue: QueueType, count: u32) {
        self.lock().rejected_submissions[queue.index()] = count;
    }

    /// Simulates a device removal: fences jump to `u64::MAX`, a DRED report
    /// is assembled from the recent command lists and every registered
    /// callback fires.
    pub fn remove_device(&self, hresult: i32, fault_address: Option<u64>) {
        {
            let mut state = self.lock();
            if state.removed.is_some() {
                return;
            }

            let mut breadcrumbs: Vec<BreadcrumbNode> = state.breadcrumbs.iter().cloned().collect();
            if let Some(last) = breadcrumbs.last_mut() {
                last.last_completed_op = last.last_completed_op.saturating_sub(1);
            }

            let page_fault = fault_address.map(|va| {
                let kind = |desc: &ResourceDesc| match desc {
                    ResourceDesc::Buffer(_) => "Buffer".to_string(),
                    ResourceDesc::Texture(_) => "Texture".to_string(),
                };
                let existing = state
                    .resources
                    .iter()
                    .filter(|(_, r)| r.gpu_va != 0 && va >= r.gpu_va && va < r.gpu_va + r.memory.len() as u64)
                    .map(|(handle, r)| DredAllocation {
                        name: state.name_of(handle.raw()),
                        kind: kind(&r.desc),
                    })
                    .collect();
                let recent_freed = state
                    .freed
                    .iter()
                    .filter(|(_, base, size)| va >= *base && va < base + size)
                    .map(|(name, _, _)| DredAllocation {
                        name: name.clone(),
                        kind: "Resource".into(),
                    })
                    .collect();
                PageFault {
                    virtual_address: va,
                    existing_allocations: existing,
                    recent_freed_allocations: recent_freed,
                }
            });

            state.dred = Some(DredReport {
                breadcrumbs,
                page_fault,
            });
            state.removed = Some(ApiError::new(hresult, "device removed"));
            state.queues.iter_mut().for_each(VecDeque::clear);
        }

        let callbacks = self
            .removed_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback();
        }
    }

    fn create_resource_locked(
        &self,
        state: &mut State,
        desc: &ResourceDesc,
        heap: HeapType,
        initial_state: ResourceStates,
    ) -> NativeResource {
        let (layouts, size) = memory::resource_size(desc);
        let gpu_va = match desc {
            ResourceDesc::Buffer(_) => {
                let va = state.next_va;
                state.next_va += align_up(size.max(1), VA_ALIGNMENT);
                va
            }
            ResourceDesc::Texture(_) => 0,
        };
        let handle = NativeResource::from_raw(self.next_id());
        state.resources.insert(
            handle,
            ResourceEntry {
                desc: *desc,
                heap,
                memory: vec![0; size as usize],
                layouts,
                states: ResourceState::new(desc.subresource_count(), initial_state),
                gpu_va,
            },
        );
        handle
    }

    fn create_swap_chain_buffers(&self, state: &mut State, desc: &SwapChainDesc) -> Vec<NativeResource> {
        (0..desc.buffer_count)
            .map(|i| {
                let texture = TextureDesc::new_2d(desc.width, desc.height, desc.format, TextureFlags::RENDER_TARGET);
                let handle = self.create_resource_locked(
                    state,
                    &ResourceDesc::Texture(texture),
                    HeapType::Default,
                    ResourceStates::COMMON,
                );
                state.names.insert(handle.raw(), format!("Backbuffer {i}"));
                state.swap_buffer_refs.insert(handle, 0);
                handle
            })
            .collect()
    }
}

fn raw_of(object: NativeObject) -> u64 {
    match object {
        NativeObject::Resource(h) => h.raw(),
        NativeObject::Fence(h) => h.raw(),
        NativeObject::CommandList(h) => h.raw(),
        NativeObject::CommandAllocator(h) => h.raw(),
        NativeObject::DescriptorHeap(h) => h.raw(),
        NativeObject::PipelineState(h) => h.raw(),
        NativeObject::StateObject(h) => h.raw(),
        NativeObject::RootSignature(h) => h.raw(),
        NativeObject::CommandSignature(h) => h.raw(),
        NativeObject::SwapChain(h) => h.raw(),
    }
}

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError::new(ApiError::E_INVALIDARG, message)
}

impl NativeDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.config.capabilities
    }

    fn set_break_on_severity(&self, severity: MessageSeverity, enable: bool) {
        let mut state = self.lock();
        if enable {
            state.break_on.insert(severity);
        } else {
            state.break_on.remove(&severity);
        }
    }

    fn set_name(&self, object: NativeObject, name: &str) {
        self.lock().names.insert(raw_of(object), name.to_string());
    }

    fn release(&self, object: NativeObject) {
        let mut state = self.lock();
        state.released += 1;
        let raw = raw_of(object);
        match object {
            NativeObject::Resource(r) => {
                if let Some(refs) = state.swap_buffer_refs.get_mut(&r) {
                    *refs = refs.saturating_sub(1);
                    return;
                }
                if let Some(entry) = state.resources.remove(&r) {
                    let name = state.name_of(raw);
                    state.freed.push_back((name, entry.gpu_va, entry.memory.len() as u64));
                    if state.freed.len() > FREED_HISTORY {
                        state.freed.pop_front();
                    }
                }
            }
            NativeObject::Fence(f) => {
                state.fences.remove(&f);
            }
            NativeObject::CommandList(l) => {
                state.lists.remove(&l);
            }
            NativeObject::CommandAllocator(a) => {
                if state.allocators.get(&a).is_some_and(|e| e.in_flight > 0) {
                    let message = format!(
                        "command allocator {} released while its lists are executing",
                        state.name_of(raw)
                    );
                    state.validation_error(message);
                }
                state.allocators.remove(&a);
            }
            NativeObject::DescriptorHeap(h) => {
                if let Some(heap) = state.heaps.remove(&h) {
                    let increment = descriptor_increment(heap.ty) as u64;
                    for i in 0..heap.count as u64 {
                        state.descriptors.remove(&(heap.cpu_base + i * increment));
                    }
                }
            }
            NativeObject::PipelineState(p) => {
                state.pipelines.remove(&p);
            }
            NativeObject::StateObject(s) => {
                state.state_objects.remove(&s);
            }
            NativeObject::RootSignature(r) => {
                state.root_signatures.remove(&r);
            }
            NativeObject::CommandSignature(c) => {
                state.command_signatures.remove(&c);
            }
            NativeObject::SwapChain(s) => {
                if let Some(entry) = state.swap_chains.remove(&s) {
                    for buffer in entry.buffers {
                        state.swap_buffer_refs.remove(&buffer);
                        state.resources.remove(&buffer);
                    }
                }
            }
        }
        state.names.remove(&raw);
    }

    // --- Synchronization ---

    fn create_fence(&self, initial_value: u64) -> Result<NativeFence, ApiError> {
        let fence = NativeFence::from_raw(self.next_id());
        self.lock().fences.insert(fence, initial_value);
        Ok(fence)
    }

    fn fence_completed_value(&self, fence: NativeFence) -> u64 {
        self.lock().fence_value(fence)
    }

    fn wait_for_fence(&self, fence: NativeFence, value: u64) -> Result<(), ApiError> {
        let mut state = self.lock();
        if state.fence_value(fence) >= value {
            return Ok(());
        }
        state.process_all();
        if state.fence_value(fence) >= value {
            Ok(())
        } else {
            Err(ApiError::new(
                ApiError::E_FAIL,
                format!(
                    "waiting for fence {} to reach {} would never return (completed: {})",
                    state.name_of(fence.raw()),
                    value,
                    state.fence_value(fence)
                ),
            ))
        }
    }

    fn signal_queue(&self, queue: QueueType, fence: NativeFence, value: u64) -> Result<(), ApiError> {
        let mut state = self.lock();
        Self::check_removed(&state)?;
        if !state.fences.contains_key(&fence) {
            return Err(invalid("signal of an unknown fence"));
        }
        state.queues[queue.index()].push_back(Submission::Signal { fence, value });
        self.after_enqueue(&mut state);
        Ok(())
    }

    fn wait_queue(&self, queue: QueueType, fence: NativeFence, value: u64) -> Result<(), ApiError> {
        let mut state = self.lock();
        Self::check_removed(&state)?;
        if !state.fences.contains_key(&fence) {
            return Err(invalid("wait on an unknown fence"));
        }
        state.queues[queue.index()].push_back(Submission::Wait { fence, value });
        self.after_enqueue(&mut state);
        Ok(())
    }

    fn execute_command_lists(&self, queue: QueueType, lists: &[NativeCommandList]) -> Result<(), ApiError> {
        let mut state = self.lock();
        Self::check_removed(&state)?;
        let rejected = &mut state.rejected_submissions[queue.index()];
        if *rejected > 0 {
            *rejected -= 1;
            return Err(ApiError::new(ApiError::E_FAIL, "ExecuteCommandLists rejected the submission"));
        }

        let mut submitted = Vec::with_capacity(lists.len());
        for list in lists {
            let entry = state
                .lists
                .get(list)
                .ok_or_else(|| invalid("execution of an unknown command list"))?;
            if entry.open {
                return Err(invalid(format!(
                    "command list {} executed before being closed",
                    state.name_of(list.raw())
                )));
            }
            if entry.queue != queue {
                return Err(invalid(format!(
                    "{:?} command list executed on the {}",
                    entry.queue,
                    queue.name()
                )));
            }
            submitted.push(SubmittedList {
                list: *list,
                allocator: entry.allocator,
                commands: entry.commands.clone(),
            });
        }
        for list in &submitted {
            if let Some(allocator) = state.allocators.get_mut(&list.allocator) {
                allocator.in_flight += 1;
            }
        }

        state.queues[queue.index()].push_back(Submission::Execute(submitted));
        self.after_enqueue(&mut state);
        Ok(())
    }

    fn on_device_removed(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.removed_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    fn device_removed_reason(&self) -> Option<ApiError> {
        self.lock().removed.clone()
    }

    fn dred_report(&self) -> Option<DredReport> {
        self.lock().dred.clone()
    }

    // --- Command lists ---

    fn create_command_allocator(&self, queue: QueueType) -> Result<NativeCommandAllocator, ApiError> {
        let allocator = NativeCommandAllocator::from_raw(self.next_id());
        self.lock()
            .allocators
            .insert(allocator, AllocatorEntry { queue, in_flight: 0 });
        Ok(allocator)
    }

    fn reset_command_allocator(&self, allocator: NativeCommandAllocator) -> Result<(), ApiError> {
        let mut state = self.lock();
        let in_flight = state
            .allocators
            .get(&allocator)
            .map(|a| a.in_flight)
            .ok_or_else(|| invalid("reset of an unknown command allocator"))?;
        let recording = state
            .lists
            .values()
            .any(|l| l.open && l.allocator == allocator);
        if in_flight > 0 || recording {
            let message = format!(
                "command allocator {} reset while {}",
                state.name_of(allocator.raw()),
                if recording { "a list is recording into it" } else { "its lists are executing" }
            );
            state.validation_error(message.clone());
            return Err(ApiError::new(ApiError::E_FAIL, message));
        }
        Ok(())
    }

    fn create_command_list(
        &self,
        queue: QueueType,
        allocator: NativeCommandAllocator,
    ) -> Result<NativeCommandList, ApiError> {
        let mut state = self.lock();
        match state.allocators.get(&allocator) {
            Some(a) if a.queue == queue => {}
            Some(_) => return Err(invalid("command allocator created for another queue type")),
            None => return Err(invalid("unknown command allocator")),
        }
        let list = NativeCommandList::from_raw(self.next_id());
        state.lists.insert(
            list,
            ListEntry {
                queue,
                allocator,
                commands: Vec::new(),
                open: true,
            },
        );
        Ok(list)
    }

    fn reset_command_list(&self, list: NativeCommandList, allocator: NativeCommandAllocator) -> Result<(), ApiError> {
        let mut state = self.lock();
        let entry = state
            .lists
            .get_mut(&list)
            .ok_or_else(|| invalid("reset of an unknown command list"))?;
        if entry.open {
            return Err(invalid("reset of a command list that is still open"));
        }
        entry.open = true;
        entry.allocator = allocator;
        entry.commands.clear();
        Ok(())
    }

    fn record(&self, list: NativeCommandList, command: NativeCommand) {
        let mut state = self.lock();
        match state.lists.get_mut(&list) {
            Some(entry) if entry.open => entry.commands.push(command),
            Some(_) => {
                let message = format!(
                    "{} recorded into closed command list {}",
                    command.name(),
                    state.name_of(list.raw())
                );
                state.validation_error(message);
            }
            None => state.validation_error(format!("{} recorded into an unknown command list", command.name())),
        }
    }

    fn close_command_list(&self, list: NativeCommandList) -> Result<(), ApiError> {
        let mut state = self.lock();
        let entry = state
            .lists
            .get_mut(&list)
            .ok_or_else(|| invalid("close of an unknown command list"))?;
        if !entry.open {
            return Err(invalid("close of a command list that is already closed"));
        }
        entry.open = false;
        Ok(())
    }

    // --- Resources ---

    fn create_resource(
        &self,
        desc: &ResourceDesc,
        heap: HeapType,
        initial_state: ResourceStates,
        _clear_value: Option<&ClearValue>,
    ) -> Result<NativeResource, ApiError> {
        let mut state = self.lock();
        Self::check_removed(&state)?;
        match desc {
            ResourceDesc::Buffer(b) => {
                if b.size == 0 {
                    return Err(invalid("buffers must have a non-zero size"));
                }
                let required = match heap {
                    HeapType::Default => None,
                    HeapType::Upload => Some(ResourceStates::GENERIC_READ),
                    HeapType::Readback => Some(ResourceStates::COPY_DEST),
                };
                if let Some(required) = required {
                    if initial_state != required {
                        return Err(invalid(format!(
                            "{heap:?} heap resources must start in {required:?}, not {initial_state:?}"
                        )));
                    }
                }
            }
            ResourceDesc::Texture(t) => {
                t.validate().map_err(invalid)?;
                if heap != HeapType::Default {
                    return Err(invalid("textures can only live in the default heap"));
                }
            }
        }
        Ok(self.create_resource_locked(&mut state, desc, heap, initial_state))
    }

    fn gpu_virtual_address(&self, resource: NativeResource) -> u64 {
        self.lock().resources.get(&resource).map_or(0, |r| r.gpu_va)
    }

    fn write_mapped(&self, resource: NativeResource, offset: u64, data: &[u8]) -> Result<(), ApiError> {
        let mut state = self.lock();
        let entry = state
            .resources
            .get_mut(&resource)
            .ok_or_else(|| invalid("write to an unknown resource"))?;
        if entry.heap == HeapType::Default {
            return Err(invalid("resource is not CPU visible"));
        }
        let start = offset as usize;
        let dst = entry
            .memory
            .get_mut(start..start + data.len())
            .ok_or_else(|| invalid("mapped write out of bounds"))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_mapped(&self, resource: NativeResource, offset: u64, out: &mut [u8]) -> Result<(), ApiError> {
        let state = self.lock();
        let entry = state
            .resources
            .get(&resource)
            .ok_or_else(|| invalid("read from an unknown resource"))?;
        if entry.heap == HeapType::Default {
            return Err(invalid("resource is not CPU visible"));
        }
        let start = offset as usize;
        let src = entry
            .memory
            .get(start..start + out.len())
            .ok_or_else(|| invalid("mapped read out of bounds"))?;
        out.copy_from_slice(src);
        Ok(())
    }

    // --- Descriptors ---

    fn create_descriptor_heap(
        &self,
        ty: DescriptorHeapType,
        count: u32,
        shader_visible: bool,
    ) -> Result<NativeDescriptorHeap, ApiError> {
        if count == 0 {
            return Err(invalid("descriptor heaps need at least one descriptor"));
        }
        if shader_visible && matches!(ty, DescriptorHeapType::Rtv | DescriptorHeapType::Dsv) {
            return Err(invalid("RTV and DSV heaps cannot be shader visible"));
        }
        let id = self.next_id();
        let heap = NativeDescriptorHeap::from_raw(id);
        let cpu_base = (id << 32) | 0x1000;
        self.lock().heaps.insert(
            heap,
            HeapEntry {
                ty,
                count,
                cpu_base,
                gpu_base: shader_visible.then_some(cpu_base | GPU_DESCRIPTOR_BIT),
            },
        );
        Ok(heap)
    }

    fn descriptor_heap_start(&self, heap: NativeDescriptorHeap) -> (CpuDescriptor, Option<GpuDescriptor>) {
        self.lock().heaps.get(&heap).map_or((CpuDescriptor(0), None), |h| {
            (CpuDescriptor(h.cpu_base), h.gpu_base.map(GpuDescriptor))
        })
    }

    fn descriptor_increment(&self, ty: DescriptorHeapType) -> u32 {
        descriptor_increment(ty)
    }

    fn create_view(&self, desc: &ViewDesc, dest: CpuDescriptor) {
        let mut state = self.lock();
        if let Some(resource) = desc.resource {
            if !state.resources.contains_key(&resource) {
                state.validation_error(format!("{:?} view of a released resource", desc.kind));
            }
        }
        state.descriptors.insert(dest.0, DescriptorContent::View(*desc));
    }

    fn create_sampler(&self, desc: &SamplerDesc, dest: CpuDescriptor) {
        self.lock()
            .descriptors
            .insert(dest.0, DescriptorContent::Sampler(*desc));
    }

    fn copy_descriptors(&self, count: u32, dest: CpuDescriptor, src: CpuDescriptor, ty: DescriptorHeapType) {
        let increment = descriptor_increment(ty);
        let mut state = self.lock();
        for i in 0..count {
            let from = src.offset(i, increment).0;
            let to = dest.offset(i, increment).0 & !GPU_DESCRIPTOR_BIT;
            match state.descriptors.get(&from).copied() {
                Some(content) => {
                    state.descriptors.insert(to, content);
                }
                None => {
                    state.descriptors.remove(&to);
                }
            }
        }
    }

    // --- Pipelines ---

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<NativeRootSignature, ApiError> {
        for (index, parameter) in desc.parameters.iter().enumerate() {
            if let RootParameter::Table(ranges) = parameter {
                if ranges.is_empty() {
                    return Err(invalid(format!("root parameter {index} is an empty table")));
                }
                let samplers = ranges.iter().filter(|r| r.ty == DescriptorRangeType::Sampler).count();
                if samplers != 0 && samplers != ranges.len() {
                    return Err(invalid(format!(
                        "root parameter {index} mixes sampler and resource ranges"
                    )));
                }
            }
        }
        let handle = NativeRootSignature::from_raw(self.next_id());
        self.lock().root_signatures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_pipeline_state(&self, stream: &PipelineStateStream) -> Result<NativePipelineState, ApiError> {
        let mut state = self.lock();
        let root = stream.subobjects.iter().find_map(|s| match s {
            PipelineSubobject::RootSignature(r) => Some(*r),
            _ => None,
        });
        match root {
            Some(r) if state.root_signatures.contains_key(&r) => {}
            Some(_) => return Err(invalid("pipeline references a released root signature")),
            None => return Err(invalid("pipeline stream has no root signature")),
        }
        let stages: Vec<ShaderStage> = stream
            .subobjects
            .iter()
            .filter_map(|s| match s {
                PipelineSubobject::Shader { stage, bytecode } if !bytecode.is_empty() => Some(*stage),
                _ => None,
            })
            .collect();
        if stages.is_empty() {
            return Err(invalid("pipeline stream has no shader"));
        }
        if stages.contains(&ShaderStage::Compute) && stages.len() > 1 {
            return Err(invalid("compute pipelines take exactly one shader"));
        }
        if stages.contains(&ShaderStage::Library) {
            return Err(invalid("libraries belong in state objects"));
        }
        let render_targets = stream.subobjects.iter().find_map(|s| match s {
            PipelineSubobject::RenderTargetFormats(f) => Some(f.len()),
            _ => None,
        });
        if render_targets.unwrap_or(0) > 8 {
            return Err(invalid("at most 8 render targets"));
        }
        let handle = NativePipelineState::from_raw(self.next_id());
        state.pipelines.insert(handle, stream.clone());
        Ok(handle)
    }

    fn create_state_object(&self, stream: &StateObjectStream) -> Result<NativeStateObject, ApiError> {
        let exports: HashSet<&str> = stream.export_names().into_iter().collect();
        for (index, sub) in stream.subobjects.iter().enumerate() {
            match sub {
                StateSubobject::SubobjectToExportsAssociation { subobject, exports: names } => {
                    if *subobject >= stream.subobjects.len() || *subobject == index {
                        return Err(invalid(format!(
                            "association {index} points at invalid subobject {subobject}"
                        )));
                    }
                    if let Some(missing) = names.iter().find(|n| !exports.contains(n.as_str())) {
                        return Err(invalid(format!("association names unknown export '{missing}'")));
                    }
                }
                StateSubobject::HitGroup {
                    name,
                    any_hit,
                    closest_hit,
                    intersection,
                    ..
                } => {
                    for import in [any_hit, closest_hit, intersection].into_iter().flatten() {
                        if !exports.contains(import.as_str()) {
                            return Err(invalid(format!(
                                "hit group '{name}' imports unknown export '{import}'"
                            )));
                        }
                    }
                }
                _ => {}
            }
        }
        let handle = NativeStateObject::from_raw(self.next_id());
        self.lock().state_objects.insert(handle, stream.clone());
        Ok(handle)
    }

    fn shader_identifier(&self, state_object: NativeStateObject, export: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        let stream = state.state_objects.get(&state_object)?;
        if !stream.export_names().contains(&export) {
            return None;
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(&state_object.raw().to_le_bytes());
        hasher.update(export.as_bytes());
        let size = self.config.capabilities.shader_identifier_size as usize;
        let mut identifier = vec![0u8; size];
        hasher.finalize_xof().fill(&mut identifier);
        Some(identifier)
    }

    fn create_command_signature(
        &self,
        desc: &CommandSignatureDesc,
        root_signature: Option<NativeRootSignature>,
    ) -> Result<NativeCommandSignature, ApiError> {
        let size: u32 = desc.arguments.iter().map(IndirectArgument::size).sum();
        if desc.byte_stride < size {
            return Err(invalid(format!(
                "command signature stride {} is smaller than its arguments ({size} bytes)",
                desc.byte_stride
            )));
        }
        if desc.arguments.iter().any(IndirectArgument::changes_root) && root_signature.is_none() {
            return Err(invalid("command signatures that change root arguments need a root signature"));
        }
        let handle = NativeCommandSignature::from_raw(self.next_id());
        self.lock().command_signatures.insert(handle, desc.clone());
        Ok(handle)
    }

    // --- Swapchains ---

    fn create_swap_chain(&self, _window: RawWindowHandle, desc: &SwapChainDesc) -> Result<NativeSwapChain, ApiError> {
        if desc.buffer_count < 2 {
            return Err(invalid("swapchains need at least two buffers"));
        }
        let mut state = self.lock();
        let buffers = self.create_swap_chain_buffers(&mut state, desc);
        let handle = NativeSwapChain::from_raw(self.next_id());
        state.swap_chains.insert(
            handle,
            SwapChainEntry {
                desc: *desc,
                buffers,
                current: 0,
                color_space: ColorSpace::Srgb,
                presents: 0,
            },
        );
        Ok(handle)
    }

    fn swap_chain_buffer(&self, swap_chain: NativeSwapChain, index: u32) -> Result<NativeResource, ApiError> {
        let mut state = self.lock();
        let buffer = state
            .swap_chains
            .get(&swap_chain)
            .and_then(|s| s.buffers.get(index as usize).copied())
            .ok_or_else(|| invalid("unknown swapchain buffer"))?;
        if let Some(refs) = state.swap_buffer_refs.get_mut(&buffer) {
            *refs += 1;
        }
        Ok(buffer)
    }

    fn swap_chain_current_index(&self, swap_chain: NativeSwapChain) -> u32 {
        self.lock().swap_chains.get(&swap_chain).map_or(0, |s| s.current)
    }

    fn swap_chain_output(&self, _swap_chain: NativeSwapChain) -> Option<OutputInfo> {
        self.config
            .adapters
            .iter()
            .flat_map(|a| a.outputs.iter())
            .next()
            .cloned()
    }

    fn resize_swap_chain(&self, swap_chain: NativeSwapChain, width: u32, height: u32, format: Format) -> Result<(), ApiError> {
        let mut state = self.lock();
        let entry = state
            .swap_chains
            .get(&swap_chain)
            .ok_or_else(|| invalid("resize of an unknown swapchain"))?;
        let old_buffers = entry.buffers.clone();
        let mut desc = entry.desc;
        if old_buffers
            .iter()
            .any(|b| state.swap_buffer_refs.get(b).copied().unwrap_or(0) > 0)
        {
            return Err(invalid("swapchain resized while its buffers are still referenced"));
        }
        for buffer in &old_buffers {
            state.swap_buffer_refs.remove(buffer);
            state.resources.remove(buffer);
            state.names.remove(&buffer.raw());
        }
        desc.width = width;
        desc.height = height;
        desc.format = format;
        let buffers = self.create_swap_chain_buffers(&mut state, &desc);
        if let Some(entry) = state.swap_chains.get_mut(&swap_chain) {
            entry.desc = desc;
            entry.buffers = buffers;
            entry.current = 0;
        }
        Ok(())
    }

    fn set_swap_chain_color_space(&self, swap_chain: NativeSwapChain, color_space: ColorSpace) -> Result<(), ApiError> {
        let hdr_output = self.swap_chain_output(swap_chain).is_some_and(|o| o.supports_hdr());
        if color_space != ColorSpace::Srgb && !hdr_output {
            return Err(ApiError::new(ApiError::UNSUPPORTED, "the output does not support HDR"));
        }
        let mut state = self.lock();
        let entry = state
            .swap_chains
            .get_mut(&swap_chain)
            .ok_or_else(|| invalid("unknown swapchain"))?;
        entry.color_space = color_space;
        Ok(())
    }

    fn present(&self, swap_chain: NativeSwapChain, sync_interval: u32, allow_tearing: bool) -> Result<(), ApiError> {
        if allow_tearing && sync_interval != 0 {
            return Err(invalid("tearing presents require a sync interval of 0"));
        }
        let mut state = self.lock();
        Self::check_removed(&state)?;
        let entry = state
            .swap_chains
            .get_mut(&swap_chain)
            .ok_or_else(|| invalid("present of an unknown swapchain"))?;
        if allow_tearing && !entry.desc.allow_tearing {
            return Err(invalid("swapchain was not created with tearing support"));
        }
        let buffer = entry.buffers[entry.current as usize];
        entry.current = (entry.current + 1) % entry.desc.buffer_count;
        entry.presents += 1;
        state.queues[QueueType::Graphics.index()].push_back(Submission::Present { swap_chain, buffer });
        self.after_enqueue(&mut state);
        Ok(())
    }

    fn wait_frame_latency(&self, swap_chain: NativeSwapChain) -> Result<(), ApiError> {
        let state = self.lock();
        let entry = state
            .swap_chains
            .get(&swap_chain)
            .ok_or_else(|| invalid("unknown swapchain"))?;
        if !entry.desc.waitable {
            return Err(invalid("swapchain was not created with a waitable object"));
        }
        Ok(())
    }
}

pub(crate) fn descriptor_increment(ty: DescriptorHeapType) -> u32 {
    match ty {
        DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler | DescriptorHeapType::Rtv => 32,
        DescriptorHeapType::Dsv => 8,
    }
}
