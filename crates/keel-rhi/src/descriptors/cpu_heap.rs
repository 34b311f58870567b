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

use crate::error::RhiError;
use keel_core::rhi::{CpuDescriptor, DescriptorHeapType, NativeDescriptorHeap, NativeDevice, NativeObject};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

struct Blocks {
    heaps: Vec<NativeDescriptorHeap>,
    free: Vec<CpuDescriptor>,
}

/// A growable pool of CPU-only descriptors of one type.
///
/// Backing heaps are created `heap_size` descriptors at a time and never
/// shrink. Freed handles go straight back to the free list.
pub struct CpuDescriptorHeap {
    native: Arc<dyn NativeDevice>,
    ty: DescriptorHeapType,
    heap_size: u32,
    increment: u32,
    blocks: Mutex<Blocks>,
}

impl CpuDescriptorHeap {
    /// Creates an empty pool.
    pub fn new(native: Arc<dyn NativeDevice>, ty: DescriptorHeapType, heap_size: u32) -> Self {
        let increment = native.descriptor_increment(ty);
        Self {
            native,
            ty,
            heap_size: heap_size.max(1),
            increment,
            blocks: Mutex::new(Blocks {
                heaps: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Allocates a descriptor, growing the pool if needed.
    pub fn allocate(&self) -> Result<CpuDescriptor, RhiError> {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = blocks.free.pop() {
            return Ok(handle);
        }

        let heap = self.native.create_descriptor_heap(self.ty, self.heap_size, false)?;
        self.native.set_name(
            NativeObject::DescriptorHeap(heap),
            &format!("CPU {:?} Heap {}", self.ty, blocks.heaps.len()),
        );
        let (start, _) = self.native.descriptor_heap_start(heap);
        blocks.heaps.push(heap);
        // Reversed so that handles come out in ascending order.
        blocks
            .free
            .extend((1..self.heap_size).rev().map(|i| start.offset(i, self.increment)));
        log::debug!(
            "Grew CPU {:?} descriptor pool to {} heaps",
            self.ty,
            blocks.heaps.len()
        );
        Ok(start)
    }

    /// Returns a descriptor to the pool.
    pub fn free(&self, handle: CpuDescriptor) {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .free
            .push(handle);
    }

    /// Descriptor type of the pool.
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.ty
    }

    /// Number of descriptors currently handed out.
    pub fn allocated_count(&self) -> usize {
        let blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        blocks.heaps.len() * self.heap_size as usize - blocks.free.len()
    }
}

impl fmt::Debug for CpuDescriptorHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuDescriptorHeap")
            .field("ty", &self.ty)
            .field("allocated", &self.allocated_count())
            .finish()
    }
}

impl Drop for CpuDescriptorHeap {
    fn drop(&mut self) {
        let blocks = self.blocks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for heap in blocks.heaps.drain(..) {
            self.native.release(NativeObject::DescriptorHeap(heap));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_infra::{HeadlessConfig, HeadlessDevice};

    #[test]
    fn grows_and_recycles() {
        let device = HeadlessDevice::new(HeadlessConfig::default());
        let heap = CpuDescriptorHeap::new(device.clone(), DescriptorHeapType::Rtv, 2);

        let a = heap.allocate().unwrap();
        let b = heap.allocate().unwrap();
        let c = heap.allocate().unwrap();
        assert_eq!(b, a.offset(1, device.descriptor_increment(DescriptorHeapType::Rtv)));
        assert_ne!(c, a);
        assert_eq!(heap.allocated_count(), 3);

        heap.free(b);
        assert_eq!(heap.allocate().unwrap(), b);
    }
}
