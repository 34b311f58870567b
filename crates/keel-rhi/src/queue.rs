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

//! Hardware queues.
//!
//! A [`CommandQueue`] owns a fence, a FIFO of command allocators tagged
//! with the sync point of their last submission, and a pool of recording
//! storages reused by [`CommandContext`]s.
//!
//! Submission resolves every pending barrier of a context against the
//! global resource states, in submission order. The resulting transitions
//! are recorded into a prologue list executed right before the context.

use crate::context::{CommandContext, ContextStorage, PendingBarrier};
use crate::descriptors::GlobalDescriptorHeap;
use crate::device::Device;
use crate::error::RhiError;
use crate::fence::{Fence, SyncPoint};
use crate::resource::Resource;
use crate::scratch::ScratchAllocationManager;
use keel_core::rhi::{
    is_legal_on_queue, Barrier, NativeCommand, NativeCommandAllocator, NativeCommandList, NativeDevice,
    NativeObject, QueueType, ResourceState, ResourceStates, ALL_SUBRESOURCES,
};
use keel_core::rhi_check;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One of the three hardware queues.
pub struct CommandQueue {
    ty: QueueType,
    native: Arc<dyn NativeDevice>,
    fence: Arc<Fence>,
    scratch: Arc<ScratchAllocationManager>,
    resource_heap: Arc<GlobalDescriptorHeap>,
    sampler_heap: Arc<GlobalDescriptorHeap>,
    barrier_batch_size: usize,
    allocators: Mutex<VecDeque<(NativeCommandAllocator, SyncPoint)>>,
    storages: Mutex<Vec<Box<ContextStorage>>>,
    lists_created: AtomicUsize,
    last_sync: Mutex<Option<SyncPoint>>,
    in_flight: Mutex<VecDeque<(SyncPoint, Vec<Arc<dyn Any + Send + Sync>>)>>,
}

impl CommandQueue {
    pub(crate) fn new(
        ty: QueueType,
        native: Arc<dyn NativeDevice>,
        scratch: Arc<ScratchAllocationManager>,
        resource_heap: Arc<GlobalDescriptorHeap>,
        sampler_heap: Arc<GlobalDescriptorHeap>,
        barrier_batch_size: usize,
    ) -> Result<Self, RhiError> {
        let fence = Fence::new(native.clone(), &format!("{} Fence", ty.name()))?;
        Ok(Self {
            ty,
            native,
            fence,
            scratch,
            resource_heap,
            sampler_heap,
            barrier_batch_size: barrier_batch_size.max(1),
            allocators: Mutex::new(VecDeque::new()),
            storages: Mutex::new(Vec::new()),
            lists_created: AtomicUsize::new(0),
            last_sync: Mutex::new(None),
            in_flight: Mutex::new(VecDeque::new()),
        })
    }

    /// The queue family.
    pub fn queue_type(&self) -> QueueType {
        self.ty
    }

    /// The fence signaled after every submission.
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// The sync point of the last submission, if any.
    pub fn last_sync_point(&self) -> Option<SyncPoint> {
        self.last_sync.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of command lists created so far.
    pub fn command_list_count(&self) -> usize {
        self.lists_created.load(Ordering::Relaxed)
    }

    /// Number of command allocators owned by the pool.
    pub fn allocator_count(&self) -> usize {
        self.allocators.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns the oldest allocator if its submission completed, or a new
    /// one.
    fn request_allocator(&self) -> Result<NativeCommandAllocator, RhiError> {
        {
            let mut pool = self.allocators.lock().unwrap_or_else(PoisonError::into_inner);
            if pool.front().is_some_and(|(_, sync)| sync.is_complete()) {
                if let Some((allocator, _)) = pool.pop_front() {
                    drop(pool);
                    self.native.reset_command_allocator(allocator)?;
                    return Ok(allocator);
                }
            }
        }
        let allocator = self.native.create_command_allocator(self.ty)?;
        let index = self.allocator_count();
        self.native.set_name(
            NativeObject::CommandAllocator(allocator),
            &format!("{} Allocator {index}", self.ty.name()),
        );
        Ok(allocator)
    }

    fn return_allocator(&self, allocator: NativeCommandAllocator, sync: SyncPoint) {
        self.allocators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((allocator, sync));
    }

    /// Pops a pooled storage (or creates one with its own command list) and
    /// opens it on a fresh allocator.
    pub(crate) fn acquire_storage(&self) -> Result<Box<ContextStorage>, RhiError> {
        let allocator = self.request_allocator()?;
        let pooled = self.storages.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut storage = match pooled {
            Some(mut storage) => {
                self.native.reset_command_list(storage.list, allocator)?;
                storage.allocator = Some(allocator);
                storage
            }
            None => {
                let list = self.native.create_command_list(self.ty, allocator)?;
                let index = self.lists_created.fetch_add(1, Ordering::Relaxed);
                self.native.set_name(
                    NativeObject::CommandList(list),
                    &format!("{} List {index}", self.ty.name()),
                );
                Box::new(ContextStorage::new(
                    self.ty,
                    list,
                    allocator,
                    self.scratch.clone(),
                    (self.ty != QueueType::Copy).then(|| self.resource_heap.clone()),
                    self.barrier_batch_size,
                ))
            }
        };
        if self.ty != QueueType::Copy {
            self.native.record(
                storage.list,
                NativeCommand::SetDescriptorHeaps {
                    resources: self.resource_heap.native_heap(),
                    samplers: self.sampler_heap.native_heap(),
                },
            );
        }
        storage.reset();
        Ok(storage)
    }

    /// Returns a storage whose work is covered by `sync`.
    fn recycle_storage(&self, mut storage: Box<ContextStorage>, sync: &SyncPoint) {
        if let Some(allocator) = storage.allocator.take() {
            self.return_allocator(allocator, sync.clone());
        }
        storage.release(sync);
        self.storages.lock().unwrap_or_else(PoisonError::into_inner).push(storage);
    }

    /// Takes back the storage of a context that was dropped without being
    /// executed.
    pub(crate) fn discard_storage(&self, storage: Box<ContextStorage>) {
        if let Err(err) = self.native.close_command_list(storage.list) {
            log::error!("Failed to close a discarded {} list: {err}", self.ty.name());
        }
        let sync = SyncPoint::new(self.fence.clone(), self.fence.last_signaled_value());
        self.recycle_storage(storage, &sync);
    }

    /// Creates a context recording on this queue.
    pub fn allocate_context(&self, device: Arc<Device>) -> Result<CommandContext, RhiError> {
        let storage = self.acquire_storage()?;
        Ok(CommandContext::new(device, storage))
    }

    /// Submits contexts in order and signals the queue fence.
    ///
    /// Pending barriers of each context are resolved against the global
    /// state left by everything submitted before it. The states the
    /// contexts end in become global only once the submission succeeded.
    pub fn execute(&self, contexts: Vec<CommandContext>) -> Result<SyncPoint, RhiError> {
        let mut last_sync = self.last_sync.lock().unwrap_or_else(PoisonError::into_inner);

        let mut storages = Vec::with_capacity(contexts.len() * 2);
        let mut staged = StagedStates::default();
        let submitted = self
            .prepare(contexts, &mut storages, &mut staged)
            .and_then(|lists| Ok(self.native.execute_command_lists(self.ty, &lists)?));
        if let Err(err) = submitted {
            self.abandon(storages);
            return Err(err);
        }
        staged.apply();

        let value = match self.fence.signal(self.ty) {
            Ok(value) => value,
            Err(err) => {
                self.abandon(storages);
                return Err(err);
            }
        };
        let sync = SyncPoint::new(self.fence.clone(), value);
        let keep_alive: Vec<_> = storages
            .iter_mut()
            .flat_map(|storage| storage.keep_alive.drain(..))
            .collect();
        for storage in storages {
            self.recycle_storage(storage, &sync);
        }
        self.retire(Some((sync.clone(), keep_alive)));
        *last_sync = Some(sync.clone());
        Ok(sync)
    }

    /// Closes the contexts and builds the list sequence of a batch.
    ///
    /// Every storage taken, prologues included, lands in `storages` even
    /// when this fails part way.
    fn prepare(
        &self,
        contexts: Vec<CommandContext>,
        storages: &mut Vec<Box<ContextStorage>>,
        staged: &mut StagedStates,
    ) -> Result<Vec<NativeCommandList>, RhiError> {
        for mut context in contexts {
            rhi_check!(
                context.queue_type() == self.ty,
                "a {} context was submitted to the {}",
                context.queue_type().name(),
                self.ty.name()
            );
            storages.push(context.take_storage()?);
        }

        let count = storages.len();
        let mut lists = Vec::with_capacity(count * 2);
        for index in 0..count {
            let barriers = self.resolve_pending(&storages[index].pending, staged);
            if !barriers.is_empty() {
                let prologue = self.acquire_storage()?;
                let list = prologue.list;
                storages.push(prologue);
                self.native.record(list, NativeCommand::Barriers(barriers));
                self.native.close_command_list(list)?;
                lists.push(list);
            }
            staged.stage(&storages[index]);
            lists.push(storages[index].list);
        }
        Ok(lists)
    }

    /// Recycles storages whose lists never reached the GPU.
    fn abandon(&self, storages: Vec<Box<ContextStorage>>) {
        let sync = SyncPoint::new(self.fence.clone(), self.fence.last_signaled_value());
        for storage in storages {
            self.recycle_storage(storage, &sync);
        }
    }

    /// Drops the values kept alive by completed submissions, then queues
    /// `entry`.
    fn retire(&self, entry: Option<(SyncPoint, Vec<Arc<dyn Any + Send + Sync>>)>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.front().is_some_and(|(sync, _)| sync.is_complete()) {
            in_flight.pop_front();
        }
        if let Some(entry) = entry.filter(|(_, values)| !values.is_empty()) {
            in_flight.push_back(entry);
        }
    }

    /// Makes this queue wait on the GPU for `sync`.
    pub fn insert_wait(&self, sync: &SyncPoint) -> Result<(), RhiError> {
        if sync.fence().handle() == self.fence.handle() {
            return Ok(());
        }
        sync.gpu_wait(self.ty)
    }

    /// Makes this queue wait for everything submitted to `other`.
    pub fn insert_wait_for_queue(&self, other: &CommandQueue) -> Result<(), RhiError> {
        match other.last_sync_point() {
            Some(sync) => self.insert_wait(&sync),
            None => Ok(()),
        }
    }

    /// Blocks until everything submitted to this queue completed.
    pub fn wait_for_idle(&self) -> Result<(), RhiError> {
        self.fence.wait_for_last_signal()?;
        self.retire(None);
        Ok(())
    }

    /// Turns pending barriers into transitions from the global state.
    fn resolve_pending(&self, pending: &[PendingBarrier], staged: &StagedStates) -> Vec<Barrier> {
        let mut barriers = Vec::new();
        for barrier in pending {
            let resource = &barrier.resource;
            let global = staged.get(resource);
            let mut push = |subresource: u32, before: ResourceStates| {
                if before == barrier.after {
                    return;
                }
                rhi_check!(
                    is_legal_on_queue(before, self.ty),
                    "'{}' is in {:?} when the {} needs it in {:?}; the state is illegal on this queue",
                    resource.name(),
                    before,
                    self.ty.name(),
                    barrier.after
                );
                barriers.push(Barrier::Transition {
                    resource: resource.handle(),
                    subresource,
                    before,
                    after: barrier.after,
                });
            };
            if barrier.subresource != ALL_SUBRESOURCES {
                push(barrier.subresource, global.get(barrier.subresource));
            } else if global.is_uniform() {
                push(ALL_SUBRESOURCES, global.get(0));
            } else {
                for (subresource, before) in global.iter() {
                    push(subresource, before);
                }
            }
        }
        barriers
    }

    /// Closes every pooled storage's resources. Called on device shutdown.
    pub(crate) fn shutdown(&self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).clear();
        let storages = std::mem::take(&mut *self.storages.lock().unwrap_or_else(PoisonError::into_inner));
        for storage in storages {
            self.native.release(NativeObject::CommandList(storage.list));
        }
        let allocators = std::mem::take(&mut *self.allocators.lock().unwrap_or_else(PoisonError::into_inner));
        for (allocator, _) in allocators {
            self.native.release(NativeObject::CommandAllocator(allocator));
        }
    }
}

/// Global states as a batch leaves them, applied once it is submitted.
#[derive(Default)]
struct StagedStates {
    states: HashMap<u64, (Arc<Resource>, ResourceState)>,
}

impl StagedStates {
    fn get(&self, resource: &Arc<Resource>) -> ResourceState {
        match self.states.get(&resource.id()) {
            Some((_, state)) => state.clone(),
            None => resource.global_state().clone(),
        }
    }

    fn stage(&mut self, storage: &ContextStorage) {
        for local in storage.local.values() {
            let (_, state) = self
                .states
                .entry(local.resource.id())
                .or_insert_with(|| (local.resource.clone(), local.resource.global_state().clone()));
            local.apply_to(state);
        }
    }

    fn apply(self) {
        for (resource, state) in self.states.into_values() {
            *resource.global_state() = state;
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("type", &self.ty)
            .field("allocators", &self.allocator_count())
            .field("last_signaled", &self.fence.last_signaled_value())
            .finish()
    }
}
