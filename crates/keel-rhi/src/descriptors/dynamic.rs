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

use super::{DescriptorHandle, DescriptorPage, GlobalDescriptorHeap};
use crate::error::RhiError;
use crate::fence::SyncPoint;
use keel_core::rhi_check;
use std::sync::Arc;

/// A context's linear allocator over dynamic descriptor pages.
///
/// Allocations are carved from the current page; when it runs out a fresh
/// page is fetched and the old one is kept until [`Self::release`] hands
/// every used page back against the submission's sync point.
pub struct DynamicGpuDescriptorAllocator {
    heap: Arc<GlobalDescriptorHeap>,
    current: Option<DescriptorPage>,
    used: Vec<DescriptorPage>,
}

impl DynamicGpuDescriptorAllocator {
    /// Creates an allocator with no page.
    pub fn new(heap: Arc<GlobalDescriptorHeap>) -> Self {
        Self {
            heap,
            current: None,
            used: Vec::new(),
        }
    }

    /// Allocates `count` contiguous descriptors.
    pub fn allocate(&mut self, count: u32) -> Result<DescriptorHandle, RhiError> {
        rhi_check!(
            count <= self.heap.page_size(),
            "descriptor table of {} entries exceeds the dynamic page size {}",
            count,
            self.heap.page_size()
        );
        if let Some(index) = self.current.as_mut().and_then(|page| page.carve(count)) {
            return Ok(self.heap.handle(index));
        }

        let mut page = self.heap.allocate_page()?;
        let index = page.carve(count).ok_or(RhiError::OutOfDynamicDescriptors {
            pages: 1,
            page_size: self.heap.page_size(),
        })?;
        if let Some(previous) = self.current.replace(page) {
            self.used.push(previous);
        }
        Ok(self.heap.handle(index))
    }

    /// Returns every page to the heap, reusable once `sync` completes.
    pub fn release(&mut self, sync: &SyncPoint) {
        let pages = self.used.drain(..).chain(self.current.take());
        self.heap.free_pages(pages, sync);
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
    use keel_core::rhi::{DescriptorHeapType, QueueType};
    use keel_infra::{HeadlessConfig, HeadlessDevice};

    #[test]
    fn rotates_pages() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let fence = Fence::new(device.clone(), "Frame Fence").unwrap();
        let heap = Arc::new(
            GlobalDescriptorHeap::new(device.clone(), DescriptorHeapType::CbvSrvUav, 4, 8, 4, fence.clone()).unwrap(),
        );
        let mut allocator = DynamicGpuDescriptorAllocator::new(heap.clone());

        let a = allocator.allocate(5).unwrap();
        let b = allocator.allocate(3).unwrap();
        let c = allocator.allocate(2).unwrap();
        assert_eq!(a.heap_index, 4);
        assert_eq!(b.heap_index, 9);
        assert_eq!(c.heap_index, 12);
        assert_eq!(allocator.page_count(), 2);

        let sync = SyncPoint::new(fence.clone(), fence.signal(QueueType::Graphics).unwrap());
        allocator.release(&sync);
        assert_eq!(allocator.page_count(), 0);
    }
}
