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

//! Resource state tracking and barrier batching.

use super::{storage_of, CommandContext, ContextStorage, LocalState, PendingBarrier};
use crate::resource::{GpuResource, Resource};
use keel_core::rhi::{can_combine, is_legal_on_queue, Barrier, NativeCommand, ResourceStates, ALL_SUBRESOURCES};
use keel_core::rhi_check;
use std::sync::Arc;

impl CommandContext {
    /// Transitions every subresource of `resource` to `after`.
    pub fn transition(&mut self, resource: &dyn GpuResource, after: ResourceStates) {
        self.insert_resource_barrier(resource, None, after, ALL_SUBRESOURCES);
    }

    /// Transitions one subresource of `resource` to `after`.
    pub fn transition_subresource(&mut self, resource: &dyn GpuResource, after: ResourceStates, subresource: u32) {
        self.insert_resource_barrier(resource, None, after, subresource);
    }

    /// Records a state transition.
    ///
    /// With `before == None` the context uses the state it last put the
    /// subresource in. A subresource the context has not touched yet gets a
    /// pending barrier, resolved against the global state at submission.
    /// Untracked resources are ignored.
    pub fn insert_resource_barrier(
        &mut self,
        resource: &dyn GpuResource,
        before: Option<ResourceStates>,
        after: ResourceStates,
        subresource: u32,
    ) {
        let resource = resource.resource();
        if !resource.is_state_tracked() {
            return;
        }
        let native = self.device.native().clone();
        let storage = storage_of(&mut self.storage);
        rhi_check!(
            is_legal_on_queue(after, storage.queue),
            "'{}' cannot be transitioned to {:?} on the {}",
            resource.name(),
            after,
            storage.queue.name()
        );
        if let Some(before) = before {
            rhi_check!(
                is_legal_on_queue(before, storage.queue),
                "'{}' cannot be transitioned from {:?} on the {}",
                resource.name(),
                before,
                storage.queue.name()
            );
            storage.emit_transition(resource, before, after, subresource);
        } else {
            storage.track(resource, after, subresource);
        }
        if storage.batch.len() >= storage.batch_size {
            storage.flush(native.as_ref());
        }
    }

    /// Orders unordered-access work on `resource` (or on every resource).
    pub fn uav_barrier(&mut self, resource: Option<&dyn GpuResource>) {
        let native = self.device.native().clone();
        let storage = storage_of(&mut self.storage);
        storage.batch.push(Barrier::Uav {
            resource: resource.map(|r| r.resource().handle()),
        });
        if storage.batch.len() >= storage.batch_size {
            storage.flush(native.as_ref());
        }
    }

    /// Records every batched barrier.
    pub fn flush_resource_barriers(&mut self) {
        let native = self.device.native().clone();
        storage_of(&mut self.storage).flush(native.as_ref());
    }
}

impl ContextStorage {
    /// Transition with an unknown before-state.
    fn track(&mut self, resource: &Arc<Resource>, after: ResourceStates, subresource: u32) {
        let local = self
            .local
            .entry(resource.id())
            .or_insert_with(|| LocalState::new(resource.clone()));

        if subresource != ALL_SUBRESOURCES {
            match local.get(subresource) {
                Some(before) => self.emit_transition(resource, before, after, subresource),
                None => {
                    local.set(after, subresource);
                    self.pending.push(PendingBarrier {
                        resource: resource.clone(),
                        subresource,
                        after,
                    });
                }
            }
            return;
        }

        if local.is_untouched() {
            local.set(after, ALL_SUBRESOURCES);
            self.pending.push(PendingBarrier {
                resource: resource.clone(),
                subresource: ALL_SUBRESOURCES,
                after,
            });
        } else if let Some(before) = local.uniform() {
            self.emit_transition(resource, before, after, ALL_SUBRESOURCES);
        } else {
            // Subresources diverged (or are partly unknown): one barrier each.
            for subresource in 0..local.states.len() as u32 {
                self.track(resource, after, subresource);
            }
        }
    }

    /// Transition with a known before-state.
    fn emit_transition(
        &mut self,
        resource: &Arc<Resource>,
        before: ResourceStates,
        after: ResourceStates,
        subresource: u32,
    ) {
        let local = self
            .local
            .entry(resource.id())
            .or_insert_with(|| LocalState::new(resource.clone()));

        if before == after {
            local.set(after, subresource);
            return;
        }
        // A combined read state already covers the requested read.
        if after.is_read_only() && before.is_read_only() && before.contains(after) {
            local.set(before, subresource);
            return;
        }

        let handle = resource.handle();
        if let Some(Barrier::Transition {
            resource: last_resource,
            subresource: last_subresource,
            after: last_after,
            ..
        }) = self.batch.last_mut()
        {
            if *last_resource == handle
                && *last_subresource == subresource
                && *last_after == before
                && can_combine(before, after)
            {
                *last_after = before | after;
                local.set(before | after, subresource);
                return;
            }
        }

        self.batch.push(Barrier::Transition {
            resource: handle,
            subresource,
            before,
            after,
        });
        local.set(after, subresource);
    }

    pub(crate) fn flush(&mut self, native: &dyn keel_core::rhi::NativeDevice) {
        if self.batch.is_empty() {
            return;
        }
        let barriers = std::mem::take(&mut self.batch);
        native.record(self.list, NativeCommand::Barriers(barriers));
    }
}
