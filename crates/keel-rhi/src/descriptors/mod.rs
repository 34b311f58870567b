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

//! Descriptor management.
//!
//! * [`CpuDescriptorHeap`]: offline, per-type pools that views are written
//!   into.
//! * [`GlobalDescriptorHeap`]: the shader-visible heap, split into a
//!   persistent (bindless) region and a paged dynamic region.
//! * [`DynamicGpuDescriptorAllocator`]: a context's linear allocator over
//!   dynamic pages.
//! * [`DescriptorStaging`]: the per-context staging of descriptor tables,
//!   copied into the dynamic region at draw time.

mod cpu_heap;
mod dynamic;
mod global_heap;
mod staging;

pub use cpu_heap::CpuDescriptorHeap;
pub use dynamic::DynamicGpuDescriptorAllocator;
pub use global_heap::{DescriptorPage, GlobalDescriptorHeap};
pub use staging::DescriptorStaging;

use keel_core::rhi::{CpuDescriptor, GpuDescriptor, INVALID_HEAP_INDEX};

/// A descriptor slot: CPU handle, GPU handle and heap index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    /// CPU handle, used to write and copy the descriptor.
    pub cpu: CpuDescriptor,
    /// GPU handle, null outside shader-visible heaps.
    pub gpu: GpuDescriptor,
    /// Index in the shader-visible heap, or [`INVALID_HEAP_INDEX`].
    pub heap_index: u32,
}

impl DescriptorHandle {
    /// A CPU-only handle.
    pub const fn cpu_only(cpu: CpuDescriptor) -> Self {
        Self {
            cpu,
            gpu: GpuDescriptor(0),
            heap_index: INVALID_HEAP_INDEX,
        }
    }

    /// Returns `true` if the handle has a shader-visible slot.
    pub const fn is_shader_visible(&self) -> bool {
        self.heap_index != INVALID_HEAP_INDEX
    }
}
