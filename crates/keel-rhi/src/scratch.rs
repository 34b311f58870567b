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

//! Page-pooled upload memory for transient CPU-to-GPU data.

use crate::error::RhiError;
use crate::fence::SyncPoint;
use crate::release::DeferredReleaseQueue;
use keel_core::rhi::{
    align_up, BufferDesc, HeapType, NativeDevice, NativeObject, NativeResource, ResourceDesc,
};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One upload buffer backing scratch allocations.
#[derive(Debug)]
pub struct ScratchPage {
    resource: NativeResource,
    size: u64,
    gpu_address: u64,
    offset: u64,
    dedicated: bool,
}

impl ScratchPage {
    /// The upload buffer.
    pub fn resource(&self) -> NativeResource {
        self.resource
    }
}

/// A slice of a scratch page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchAllocation {
    /// The upload buffer holding the slice.
    pub resource: NativeResource,
    /// Byte offset in the buffer.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    /// GPU virtual address of the slice.
    pub gpu_address: u64,
}

/// The thread-safe pool of scratch pages shared by every context.
///
/// Pages handed back with a sync point are reused only once it completes.
/// Requests larger than a page get a dedicated page that is released
/// through the deferred queue instead of pooled.
pub struct ScratchAllocationManager {
    native: Arc<dyn NativeDevice>,
    release: Arc<DeferredReleaseQueue>,
    page_size: u64,
    pool: Mutex<Vec<(ScratchPage, Option<SyncPoint>)>>,
    created: AtomicUsize,
}

impl ScratchAllocationManager {
    /// Creates an empty pool.
    pub fn new(native: Arc<dyn NativeDevice>, release: Arc<DeferredReleaseQueue>, page_size: u64) -> Self {
        Self {
            native,
            release,
            page_size,
            pool: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Size of a pooled page.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of upload buffers created so far, dedicated ones included.
    pub fn pages_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Acquires a page able to hold `size` bytes.
    pub fn allocate_page(&self, size: u64) -> Result<ScratchPage, RhiError> {
        if size > self.page_size {
            return self.create_page(size, true);
        }
        {
            let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            let reusable = pool
                .iter()
                .position(|(_, sync)| sync.as_ref().map_or(true, SyncPoint::is_complete));
            if let Some(index) = reusable {
                let (mut page, _) = pool.swap_remove(index);
                page.offset = 0;
                return Ok(page);
            }
        }
        self.create_page(self.page_size, false)
    }

    fn create_page(&self, size: u64, dedicated: bool) -> Result<ScratchPage, RhiError> {
        let desc = ResourceDesc::Buffer(BufferDesc::upload(size));
        let resource = self
            .native
            .create_resource(&desc, HeapType::Upload, BufferDesc::upload(size).initial_state(), None)?;
        let index = self.created.fetch_add(1, Ordering::Relaxed);
        let name = if dedicated {
            format!("Scratch Page {index} (dedicated, {size} bytes)")
        } else {
            format!("Scratch Page {index}")
        };
        self.native.set_name(NativeObject::Resource(resource), &name);
        log::trace!("Created {name}");
        Ok(ScratchPage {
            resource,
            size,
            gpu_address: self.native.gpu_virtual_address(resource),
            offset: 0,
            dedicated,
        })
    }

    /// Returns pages used by a submission.
    pub fn free_pages(&self, pages: impl IntoIterator<Item = ScratchPage>, sync: Option<&SyncPoint>) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        for page in pages {
            if page.dedicated {
                self.release.release(NativeObject::Resource(page.resource));
            } else {
                pool.push((page, sync.cloned()));
            }
        }
    }

    /// Writes into a scratch allocation.
    pub fn write(&self, allocation: &ScratchAllocation, data: &[u8]) -> Result<(), RhiError> {
        keel_core::rhi_check!(
            data.len() as u64 <= allocation.size,
            "writing {} bytes into a {} byte scratch allocation",
            data.len(),
            allocation.size
        );
        self.native.write_mapped(allocation.resource, allocation.offset, data)?;
        Ok(())
    }

    /// Number of pooled pages.
    pub fn pooled_count(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl fmt::Debug for ScratchAllocationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchAllocationManager")
            .field("page_size", &self.page_size)
            .field("pooled", &self.pooled_count())
            .finish()
    }
}

impl Drop for ScratchAllocationManager {
    fn drop(&mut self) {
        let pool = self.pool.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (page, _) in pool.drain(..) {
            self.native.release(NativeObject::Resource(page.resource));
        }
    }
}

/// A context's bump allocator over scratch pages.
pub struct ScratchAllocator {
    manager: Arc<ScratchAllocationManager>,
    current: Option<ScratchPage>,
    used: Vec<ScratchPage>,
}

impl ScratchAllocator {
    /// Creates an allocator with no page.
    pub fn new(manager: Arc<ScratchAllocationManager>) -> Self {
        Self {
            manager,
            current: None,
            used: Vec::new(),
        }
    }

    /// Allocates `size` bytes aligned to `alignment`.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<ScratchAllocation, RhiError> {
        let size = size.max(1);
        if size > self.manager.page_size() {
            let mut page = self.manager.allocate_page(size)?;
            page.offset = size;
            let allocation = ScratchAllocation {
                resource: page.resource,
                offset: 0,
                size,
                gpu_address: page.gpu_address,
            };
            self.used.push(page);
            return Ok(allocation);
        }

        let page = match self.current.take() {
            Some(page) if align_up(page.offset, alignment) + size <= page.size => page,
            previous => {
                self.used.extend(previous);
                self.manager.allocate_page(size)?
            }
        };
        let page = self.current.insert(page);
        let offset = align_up(page.offset, alignment);
        page.offset = offset + size;
        Ok(ScratchAllocation {
            resource: page.resource,
            offset,
            size,
            gpu_address: page.gpu_address + offset,
        })
    }

    /// Allocates and fills a slice with `data`.
    pub fn upload(&mut self, data: &[u8], alignment: u64) -> Result<ScratchAllocation, RhiError> {
        let allocation = self.allocate(data.len() as u64, alignment)?;
        self.manager.write(&allocation, data)?;
        Ok(allocation)
    }

    /// Writes into an allocation of this allocator.
    pub fn write(&self, allocation: &ScratchAllocation, data: &[u8]) -> Result<(), RhiError> {
        self.manager.write(allocation, data)
    }

    /// Hands every page back, reusable once `sync` completes.
    pub fn release(&mut self, sync: Option<&SyncPoint>) {
        let pages = self.used.drain(..).chain(self.current.take());
        self.manager.free_pages(pages, sync);
    }

    /// Number of pages held.
    pub fn page_count(&self) -> usize {
        self.used.len() + usize::from(self.current.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::Fence;
    use keel_core::rhi::QueueType;
    use keel_infra::{CompletionMode, HeadlessConfig, HeadlessDevice};

    fn setup() -> (Arc<HeadlessDevice>, Arc<Fence>, Arc<ScratchAllocationManager>) {
        let device = HeadlessDevice::new(HeadlessConfig::default().with_completion(CompletionMode::Manual));
        let fence = Fence::new(device.clone(), "Frame Fence").unwrap();
        let release = Arc::new(DeferredReleaseQueue::new(device.clone(), fence.clone()));
        let manager = Arc::new(ScratchAllocationManager::new(device.clone(), release, 1024));
        (device, fence, manager)
    }

    #[test]
    fn allocations_are_aligned_and_linear() {
        let (device, _fence, manager) = setup();
        let mut scratch = ScratchAllocator::new(manager.clone());
        let a = scratch.allocate(10, 1).unwrap();
        let b = scratch.allocate(16, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(a.resource, b.resource);
        assert_eq!(b.gpu_address, a.gpu_address + 256);

        scratch.write(&b, &[7; 16]).unwrap();
        let contents = device.resource_contents(b.resource).unwrap();
        assert_eq!(&contents[256..272], &[7; 16]);
    }

    #[test]
    fn exhaustion_rotates_pages() {
        let (_device, _fence, manager) = setup();
        let mut scratch = ScratchAllocator::new(manager.clone());
        let a = scratch.allocate(800, 4).unwrap();
        let b = scratch.allocate(800, 4).unwrap();
        assert_ne!(a.resource, b.resource);
        assert_eq!(scratch.page_count(), 2);
    }

    #[test]
    fn oversized_requests_get_a_dedicated_page() {
        let (device, fence, manager) = setup();
        let mut scratch = ScratchAllocator::new(manager.clone());
        let big = scratch.allocate(4096, 256).unwrap();
        assert_eq!(big.offset, 0);
        let Some(ResourceDesc::Buffer(desc)) = device.resource_desc(big.resource) else {
            panic!("scratch pages are buffers");
        };
        assert_eq!(desc.size, 4096);

        let sync = SyncPoint::new(fence.clone(), fence.signal(QueueType::Graphics).unwrap());
        scratch.release(Some(&sync));
        assert_eq!(manager.pooled_count(), 0);
    }

    #[test]
    fn pages_are_reused_only_after_completion() {
        let (device, fence, manager) = setup();

        let mut first = ScratchAllocator::new(manager.clone());
        let a = first.allocate(64, 16).unwrap();
        let sync = SyncPoint::new(fence.clone(), fence.signal(QueueType::Graphics).unwrap());
        first.release(Some(&sync));

        let mut second = ScratchAllocator::new(manager.clone());
        let b = second.allocate(64, 16).unwrap();
        assert_ne!(a.resource, b.resource);
        second.release(None);

        device.process_all();
        assert!(sync.is_complete());
        let mut third = ScratchAllocator::new(manager.clone());
        let c = third.allocate(64, 16).unwrap();
        assert!(c.resource == a.resource || c.resource == b.resource);
        assert_eq!(manager.pages_created(), 2);
    }
}
