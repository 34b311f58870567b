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

//! Command recording.
//!
//! A [`CommandContext`] records into one native command list of one queue.
//! Besides the list it carries the per-list bookkeeping that submission
//! needs:
//!
//! * local resource states, one entry per subresource, starting unknown;
//! * pending barriers: first uses whose before-state was unknown, resolved
//!   against the global state when the context is executed;
//! * a batch of transitions flushed before work that depends on them;
//! * the scratch allocator, dynamic descriptor pages and staged tables.
//!
//! The recording state lives in a pooled `ContextStorage`; the context
//! pairs it with the device. Storages return to their queue on execution.

mod barriers;
mod draw;
mod render_pass;
mod transfer;

pub use render_pass::{DepthAttachment, LoadOp, RenderPassInfo, RenderTarget, StoreOp};

use crate::descriptors::{DescriptorStaging, DynamicGpuDescriptorAllocator, GlobalDescriptorHeap};
use crate::device::Device;
use crate::error::RhiError;
use crate::fence::SyncPoint;
use crate::pipeline::{PipelineState, RootSignature, StateObject};
use crate::resource::Resource;
use crate::scratch::{ScratchAllocationManager, ScratchAllocator};
use keel_core::rhi::{
    BindPoint, Barrier, NativeCommand, NativeCommandAllocator, NativeCommandList, QueueType, ResourceState,
    ResourceStates, ALL_SUBRESOURCES,
};
use keel_core::rhi_fatal;
use render_pass::ActiveRenderPass;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A first use of a resource whose before-state is resolved at submission.
#[derive(Debug, Clone)]
pub(crate) struct PendingBarrier {
    pub(crate) resource: Arc<Resource>,
    pub(crate) subresource: u32,
    pub(crate) after: ResourceStates,
}

/// States a context has put a resource in; `None` for untouched
/// subresources.
#[derive(Debug)]
pub(crate) struct LocalState {
    pub(crate) resource: Arc<Resource>,
    pub(crate) states: Vec<Option<ResourceStates>>,
}

impl LocalState {
    fn new(resource: Arc<Resource>) -> Self {
        let count = resource.subresource_count() as usize;
        Self {
            resource,
            states: vec![None; count.max(1)],
        }
    }

    fn set(&mut self, state: ResourceStates, subresource: u32) {
        if subresource == ALL_SUBRESOURCES {
            self.states.iter_mut().for_each(|s| *s = Some(state));
        } else if let Some(slot) = self.states.get_mut(subresource as usize) {
            *slot = Some(state);
        }
    }

    fn get(&self, subresource: u32) -> Option<ResourceStates> {
        self.states.get(subresource as usize).copied().flatten()
    }

    /// The shared state of every subresource, if they all agree.
    fn uniform(&self) -> Option<ResourceStates> {
        let first = self.states.first().copied().flatten()?;
        self.states.iter().all(|s| *s == Some(first)).then_some(first)
    }

    /// Writes the states this context ends in over `global`.
    pub(crate) fn apply_to(&self, global: &mut ResourceState) {
        if let Some(state) = self.uniform() {
            global.set(state, ALL_SUBRESOURCES);
            return;
        }
        for (subresource, state) in self.states.iter().enumerate() {
            if let Some(state) = state {
                global.set(*state, subresource as u32);
            }
        }
    }

    fn is_untouched(&self) -> bool {
        self.states.iter().all(Option::is_none)
    }
}

/// The pipeline a context has bound.
#[derive(Clone, Default)]
pub(crate) enum BoundPipeline {
    #[default]
    None,
    Pipeline(Arc<PipelineState>),
    StateObject(Arc<StateObject>),
}

/// Pooled recording state of a context.
pub(crate) struct ContextStorage {
    pub(crate) queue: QueueType,
    pub(crate) list: NativeCommandList,
    pub(crate) allocator: Option<NativeCommandAllocator>,
    pub(crate) batch: Vec<Barrier>,
    pub(crate) batch_size: usize,
    pub(crate) pending: Vec<PendingBarrier>,
    pub(crate) local: HashMap<u64, LocalState>,
    pub(crate) scratch: ScratchAllocator,
    pub(crate) descriptors: Option<DynamicGpuDescriptorAllocator>,
    pub(crate) staging: DescriptorStaging,
    pub(crate) pipeline: BoundPipeline,
    pub(crate) root_signature: Option<(BindPoint, Arc<RootSignature>)>,
    pub(crate) render_pass: Option<ActiveRenderPass>,
    pub(crate) keep_alive: Vec<Arc<dyn Any + Send + Sync>>,
    pub(crate) event_depth: u32,
}

impl ContextStorage {
    pub(crate) fn new(
        queue: QueueType,
        list: NativeCommandList,
        allocator: NativeCommandAllocator,
        scratch: Arc<ScratchAllocationManager>,
        resource_heap: Option<Arc<GlobalDescriptorHeap>>,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            list,
            allocator: Some(allocator),
            batch: Vec::with_capacity(batch_size),
            batch_size,
            pending: Vec::new(),
            local: HashMap::new(),
            scratch: ScratchAllocator::new(scratch),
            descriptors: resource_heap.map(DynamicGpuDescriptorAllocator::new),
            staging: DescriptorStaging::new(),
            pipeline: BoundPipeline::None,
            root_signature: None,
            render_pass: None,
            keep_alive: Vec::new(),
            event_depth: 0,
        }
    }

    /// Clears the recording state before reuse.
    pub(crate) fn reset(&mut self) {
        self.batch.clear();
        self.pending.clear();
        self.local.clear();
        self.staging.reset();
        self.pipeline = BoundPipeline::None;
        self.root_signature = None;
        self.render_pass = None;
        self.keep_alive.clear();
        self.event_depth = 0;
    }

    /// Hands transient allocations back against the submission's sync point
    /// and drops every reference the recording held.
    pub(crate) fn release(&mut self, sync: &SyncPoint) {
        self.scratch.release(Some(sync));
        if let Some(descriptors) = &mut self.descriptors {
            descriptors.release(sync);
        }
        self.reset();
    }
}

fn storage_of(slot: &mut Option<Box<ContextStorage>>) -> &mut ContextStorage {
    match slot.as_deref_mut() {
        Some(storage) => storage,
        None => rhi_fatal!("command context used after it was submitted"),
    }
}

/// Records commands for one queue.
///
/// Contexts are thread-affine: one thread records at a time. Submit with
/// [`CommandContext::execute`] or in batches with
/// [`crate::CommandQueue::execute`]. A context dropped without being
/// executed discards what it recorded.
pub struct CommandContext {
    device: Arc<Device>,
    queue: QueueType,
    storage: Option<Box<ContextStorage>>,
}

impl CommandContext {
    pub(crate) fn new(device: Arc<Device>, storage: Box<ContextStorage>) -> Self {
        Self {
            device,
            queue: storage.queue,
            storage: Some(storage),
        }
    }

    /// The queue the context records for.
    pub fn queue_type(&self) -> QueueType {
        self.queue
    }

    /// The device.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// The native command list.
    pub fn native_list(&mut self) -> NativeCommandList {
        storage_of(&mut self.storage).list
    }

    fn storage(&mut self) -> &mut ContextStorage {
        storage_of(&mut self.storage)
    }

    fn record(&mut self, command: NativeCommand) {
        let list = self.storage().list;
        self.device.native().record(list, command);
    }

    /// Keeps `value` alive until the submission holding this context
    /// completes.
    pub fn keep_alive(&mut self, value: Arc<dyn Any + Send + Sync>) {
        self.storage().keep_alive.push(value);
    }

    /// Number of transitions waiting in the batch.
    pub fn batched_barrier_count(&mut self) -> usize {
        self.storage().batch.len()
    }

    /// Number of pending barriers resolved at submission.
    pub fn pending_barrier_count(&mut self) -> usize {
        self.storage().pending.len()
    }

    /// The state this context last put a subresource in, if it touched it.
    pub fn local_state(&mut self, resource: &Resource, subresource: u32) -> Option<ResourceStates> {
        self.storage()
            .local
            .get(&resource.id())
            .and_then(|local| local.get(subresource))
    }

    // --- Debug markers ---

    /// Opens a named event region.
    pub fn begin_event(&mut self, name: &str) {
        self.storage().event_depth += 1;
        self.record(NativeCommand::BeginEvent(name.to_string()));
    }

    /// Closes the innermost event region.
    pub fn end_event(&mut self) {
        let storage = self.storage();
        keel_core::rhi_check!(storage.event_depth > 0, "end_event without a matching begin_event");
        storage.event_depth = storage.event_depth.saturating_sub(1);
        self.record(NativeCommand::EndEvent);
    }

    /// Inserts a single marker.
    pub fn set_marker(&mut self, name: &str) {
        self.record(NativeCommand::SetMarker(name.to_string()));
    }

    // --- Submission ---

    /// Flushes batched barriers and closes the list, then takes the storage
    /// out of the context.
    pub(crate) fn take_storage(&mut self) -> Result<Box<ContextStorage>, RhiError> {
        self.flush_resource_barriers();
        let storage = self.storage();
        keel_core::rhi_check!(
            storage.render_pass.is_none(),
            "a context was closed inside a render pass"
        );
        keel_core::rhi_check!(
            storage.event_depth == 0,
            "a context was closed with {} open event(s)",
            storage.event_depth
        );
        let list = storage.list;
        self.device.native().close_command_list(list)?;
        match self.storage.take() {
            Some(storage) => Ok(storage),
            None => rhi_fatal!("command context used after it was submitted"),
        }
    }

    /// Submits the context alone on its queue.
    pub fn execute(self) -> Result<SyncPoint, RhiError> {
        let device = self.device.clone();
        device.queue(self.queue).execute(vec![self])
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            log::warn!(
                "A {} context was dropped without being executed; its commands are discarded",
                self.queue.name()
            );
            self.device.queue(self.queue).discard_storage(storage);
        }
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("queue", &self.queue)
            .field("submitted", &self.storage.is_none())
            .finish()
    }
}
