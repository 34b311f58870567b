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


//! Transient resources recycled across graphs and frames.

use crate::resource::{GraphResource, RgResourceDesc};
use keel_rhi::{Device, RhiError, SyncPoint};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

struct PoolEntry {
    resource: GraphResource,
    sync: SyncPoint,
    last_used_frame: u64,
}

/// The pool transient graph resources are drawn from.
///
/// One pool lives in the device's subsystem registry. Returned resources are
/// tagged with the frame fence and handed out again once the GPU is past
/// that point; resources nobody asked for during `eviction_frames` frames
/// are dropped, which sends them through the deferred release queue.
pub struct TransientPool {
    eviction_frames: u64,
    entries: Mutex<Vec<PoolEntry>>,
    created: AtomicUsize,
}

impl TransientPool {
    /// Creates an empty pool.
    pub fn new(eviction_frames: u32) -> Self {
        Self {
            eviction_frames: u64::from(eviction_frames),
            entries: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// The pool registered on `device`, registering one on first use.
    pub fn for_device(device: &Device) -> Arc<TransientPool> {
        if let Some(pool) = device.subsystems().get::<TransientPool>() {
            return pool;
        }
        let mut subsystems = device.subsystems_mut();
        match subsystems.get::<TransientPool>() {
            Some(pool) => pool,
            None => subsystems.register(TransientPool::new(device.settings().graph.pool_eviction_frames)),
        }
    }

    /// Takes a free resource compatible with `desc`, or creates one.
    pub fn acquire(&self, device: &Device, desc: &RgResourceDesc, name: &str) -> Result<GraphResource, RhiError> {
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let found = entries
                .iter()
                .position(|e| e.resource.desc().is_compatible(desc) && e.sync.is_complete());
            if let Some(position) = found {
                let entry = entries.swap_remove(position);
                log::trace!("Transient '{}' reuses '{}'", name, entry.resource.resource().name());
                return Ok(entry.resource);
            }
        }
        let resource = GraphResource::create(device, desc, name)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        log::debug!("Transient pool created {} '{}'", desc.kind(), name);
        Ok(resource)
    }

    /// Returns a resource; it becomes available once `sync` completes.
    pub fn release(&self, resource: GraphResource, sync: SyncPoint, frame: u64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PoolEntry {
                resource,
                sync,
                last_used_frame: frame,
            });
    }

    /// Drops the resources last used `eviction_frames` or more frames
    /// before `frame`. Returns how many were dropped.
    pub fn evict(&self, frame: u64) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| frame.saturating_sub(e.last_used_frame) < self.eviction_frames);
        let evicted = before - entries.len();
        if evicted > 0 {
            log::debug!("Transient pool evicted {} resource(s) at frame {}", evicted, frame);
        }
        evicted
    }

    /// Drops every pooled resource.
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of resources waiting in the pool.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no resource is waiting in the pool.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resources the pool ever created.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Returns `true` if `resource` is waiting in the pool.
    pub fn contains(&self, resource: &GraphResource) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.resource.ptr_eq(resource))
    }
}

impl std::fmt::Debug for TransientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientPool")
            .field("pooled", &self.len())
            .field("created", &self.created_count())
            .field("eviction_frames", &self.eviction_frames)
            .finish()
    }
}
