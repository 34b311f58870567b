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

use super::DescriptorHandle;
use crate::error::RhiError;
use crate::fence::{Fence, SyncPoint};
use keel_core::rhi::{
    CpuDescriptor, DescriptorHeapType, GpuDescriptor, NativeDescriptorHeap, NativeDevice, NativeObject,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A slice of the dynamic region owned by one context at a time.
#[derive(Debug)]
pub struct DescriptorPage {
    start: u32,
    size: u32,
    offset: u32,
}

impl DescriptorPage {
    /// Heap index of the first descriptor of the page.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Descriptors left in the page.
    pub fn remaining(&self) -> u32 {
        self.size - self.offset
    }

    pub(crate) fn carve(&mut self, count: u32) -> Option<u32> {
        if count > self.remaining() {
            return None;
        }
        let index = self.start + self.offset;
        self.offset += count;
        Some(index)
    }
}

struct PersistentRegion {
    free: Vec<u32>,
    pending: VecDeque<(u32, u64)>,
}

struct DynamicRegion {
    free: VecDeque<DescriptorPage>,
    retired: VecDeque<(DescriptorPage, SyncPoint)>,
}

/// The shader-visible descriptor heap.
///
/// Indices `0..persistent_count` form the persistent region, handed out one
/// at a time for bindless views. The remainder is cut into pages of
/// `page_size` descriptors that contexts fill linearly with descriptor
/// tables.
pub struct GlobalDescriptorHeap {
    native: Arc<dyn NativeDevice>,
    ty: DescriptorHeapType,
    heap: NativeDescriptorHeap,
    cpu_start: CpuDescriptor,
    gpu_start: GpuDescriptor,
    increment: u32,
    persistent_count: u32,
    page_size: u32,
    page_count: u32,
    frame_fence: Arc<Fence>,
    persistent: Mutex<PersistentRegion>,
    dynamic: Mutex<DynamicRegion>,
}

impl GlobalDescriptorHeap {
    /// Creates the heap.
    pub fn new(
        native: Arc<dyn NativeDevice>,
        ty: DescriptorHeapType,
        persistent_count: u32,
        page_size: u32,
        page_count: u32,
        frame_fence: Arc<Fence>,
    ) -> Result<Self, RhiError> {
        let total = persistent_count + page_size * page_count;
        let heap = native.create_descriptor_heap(ty, total, true)?;
        let name = match ty {
            DescriptorHeapType::Sampler => "Global Sampler Heap",
            _ => "Global CBV/SRV/UAV Heap",
        };
        native.set_name(NativeObject::DescriptorHeap(heap), name);
        let (cpu_start, gpu_start) = native.descriptor_heap_start(heap);
        let increment = native.descriptor_increment(ty);

        let free_pages = (0..page_count)
            .map(|i| DescriptorPage {
                start: persistent_count + i * page_size,
                size: page_size,
                offset: 0,
            })
            .collect();

        Ok(Self {
            native,
            ty,
            heap,
            cpu_start,
            gpu_start: gpu_start.unwrap_or(GpuDescriptor(0)),
            increment,
            persistent_count,
            page_size,
            page_count,
            frame_fence,
            persistent: Mutex::new(PersistentRegion {
                free: (0..persistent_count).rev().collect(),
                pending: VecDeque::new(),
            }),
            dynamic: Mutex::new(DynamicRegion {
                free: free_pages,
                retired: VecDeque::new(),
            }),
        })
    }

    /// The handle of a heap index.
    pub fn handle(&self, index: u32) -> DescriptorHandle {
        DescriptorHandle {
            cpu: self.cpu_start.offset(index, self.increment),
            gpu: self.gpu_start.offset(index, self.increment),
            heap_index: index,
        }
    }

    // --- Persistent region ---

    /// Allocates a persistent index.
    ///
    /// When the free list is empty, indices whose frame has completed are
    /// reclaimed first.
    pub fn allocate_persistent(&self) -> Result<DescriptorHandle, RhiError> {
        let mut region = self.persistent.lock().unwrap_or_else(PoisonError::into_inner);
        if region.free.is_empty() {
            self.cleanup_locked(&mut region);
        }
        match region.free.pop() {
            Some(index) => Ok(self.handle(index)),
            None => Err(RhiError::OutOfPersistentDescriptors {
                capacity: self.persistent_count,
            }),
        }
    }

    /// Frees a persistent index once the current frame has completed.
    pub fn free_persistent(&self, index: u32) {
        keel_core::rhi_check!(
            index < self.persistent_count,
            "heap index {} is outside the persistent region ({})",
            index,
            self.persistent_count
        );
        let value = self.frame_fence.current_value();
        self.persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .push_back((index, value));
    }

    /// Returns to the free list every freed index whose frame completed.
    pub fn cleanup_persistent(&self) -> usize {
        let mut region = self.persistent.lock().unwrap_or_else(PoisonError::into_inner);
        self.cleanup_locked(&mut region)
    }

    fn cleanup_locked(&self, region: &mut PersistentRegion) -> usize {
        let mut reclaimed = 0;
        while let Some(&(index, value)) = region.pending.front() {
            if !self.frame_fence.is_complete(value) {
                break;
            }
            region.pending.pop_front();
            region.free.push(index);
            reclaimed += 1;
        }
        if reclaimed > 0 {
            log::debug!("Reclaimed {reclaimed} persistent {:?} descriptors", self.ty);
        }
        reclaimed
    }

    /// Size of the persistent region.
    pub fn persistent_capacity(&self) -> u32 {
        self.persistent_count
    }

    /// Persistent indices immediately available.
    pub fn persistent_free_count(&self) -> usize {
        self.persistent.lock().unwrap_or_else(PoisonError::into_inner).free.len()
    }

    // --- Dynamic region ---

    /// Acquires a dynamic page, recycling the first retired page whose
    /// sync point completed.
    pub fn allocate_page(&self) -> Result<DescriptorPage, RhiError> {
        let mut region = self.dynamic.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = region.retired.iter().position(|(_, sync)| sync.is_complete()) {
            if let Some((mut page, _)) = region.retired.remove(position) {
                page.offset = 0;
                return Ok(page);
            }
        }
        region.free.pop_front().ok_or(RhiError::OutOfDynamicDescriptors {
            pages: self.page_count,
            page_size: self.page_size,
        })
    }

    /// Returns pages used by a submission; they are recycled once `sync`
    /// completes.
    pub fn free_pages(&self, pages: impl IntoIterator<Item = DescriptorPage>, sync: &SyncPoint) {
        let mut region = self.dynamic.lock().unwrap_or_else(PoisonError::into_inner);
        region
            .retired
            .extend(pages.into_iter().map(|page| (page, sync.clone())));
    }

    /// Descriptors per dynamic page.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Descriptor type of the heap.
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.ty
    }

    /// Distance between two descriptors.
    pub fn increment(&self) -> u32 {
        self.increment
    }

    /// The native heap.
    pub fn native_heap(&self) -> NativeDescriptorHeap {
        self.heap
    }
}

impl fmt::Debug for GlobalDescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalDescriptorHeap")
            .field("ty", &self.ty)
            .field("persistent_count", &self.persistent_count)
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count)
            .finish()
    }
}

impl Drop for GlobalDescriptorHeap {
    fn drop(&mut self) {
        self.native.release(NativeObject::DescriptorHeap(self.heap));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::QueueType;
    use keel_infra::{CompletionMode, HeadlessConfig, HeadlessDevice};

    fn setup(persistent: u32, pages: u32) -> (Arc<HeadlessDevice>, Arc<Fence>, GlobalDescriptorHeap) {
        let device = HeadlessDevice::new(HeadlessConfig::default().with_completion(CompletionMode::Manual));
        let fence = Fence::new(device.clone(), "Frame Fence").unwrap();
        let heap = GlobalDescriptorHeap::new(
            device.clone(),
            DescriptorHeapType::CbvSrvUav,
            persistent,
            4,
            pages,
            fence.clone(),
        )
        .unwrap();
        (device, fence, heap)
    }

    #[test]
    fn persistent_indices_are_ascending() {
        let (_device, _fence, heap) = setup(8, 1);
        let a = heap.allocate_persistent().unwrap();
        let b = heap.allocate_persistent().unwrap();
        assert_eq!((a.heap_index, b.heap_index), (0, 1));
        assert!(a.is_shader_visible());
        assert_eq!(b.cpu, a.cpu.offset(1, heap.increment()));
    }

    #[test]
    fn freed_index_waits_for_its_frame() {
        let (device, fence, heap) = setup(2, 1);
        heap.allocate_persistent().unwrap();
        let second = heap.allocate_persistent().unwrap();

        heap.free_persistent(second.heap_index);
        assert!(matches!(
            heap.allocate_persistent(),
            Err(RhiError::OutOfPersistentDescriptors { capacity: 2 })
        ));

        let frame = fence.signal(QueueType::Graphics).unwrap();
        assert!(heap.allocate_persistent().is_err());

        fence.cpu_wait(frame).unwrap();
        assert_eq!(heap.allocate_persistent().unwrap().heap_index, second.heap_index);
        drop(device);
    }

    #[test]
    fn pages_recycle_after_their_sync_point() {
        let (device, fence, heap) = setup(0, 2);
        let first = heap.allocate_page().unwrap();
        let second = heap.allocate_page().unwrap();
        assert_eq!(first.start(), 0);
        assert_eq!(second.start(), 4);
        assert!(heap.allocate_page().is_err());

        let sync = SyncPoint::new(fence.clone(), fence.signal(QueueType::Graphics).unwrap());
        heap.free_pages([first], &sync);
        assert!(heap.allocate_page().is_err());

        device.process_all();
        let recycled = heap.allocate_page().unwrap();
        assert_eq!(recycled.start(), 0);
        assert_eq!(recycled.remaining(), 4);
    }
}
