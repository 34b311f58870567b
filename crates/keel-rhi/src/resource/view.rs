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

use crate::descriptors::{CpuDescriptorHeap, GlobalDescriptorHeap};
use crate::error::RhiError;
use keel_core::rhi::{
    CpuDescriptor, DescriptorHeapType, GpuDescriptor, NativeDevice, ViewDesc, ViewKind, INVALID_HEAP_INDEX,
};
use std::fmt;
use std::sync::Arc;

/// A resource view: a CPU descriptor and, for bindless views, a slot in the
/// persistent region of the shader-visible heap.
///
/// Views are owned by the resource they describe. Dropping a view frees its
/// CPU descriptor at once and its persistent slot after the current frame.
pub struct View {
    desc: ViewDesc,
    cpu: CpuDescriptor,
    gpu: GpuDescriptor,
    heap_index: u32,
    cpu_heap: Arc<CpuDescriptorHeap>,
    gpu_heap: Option<Arc<GlobalDescriptorHeap>>,
}

impl View {
    /// Writes a view into a new CPU descriptor and, when `bindless` is
    /// given, copies it into a persistent slot.
    pub fn new(
        native: &dyn NativeDevice,
        desc: ViewDesc,
        cpu_heap: &Arc<CpuDescriptorHeap>,
        bindless: Option<&Arc<GlobalDescriptorHeap>>,
    ) -> Result<Self, RhiError> {
        let cpu = cpu_heap.allocate()?;
        native.create_view(&desc, cpu);

        let mut view = Self {
            desc,
            cpu,
            gpu: GpuDescriptor(0),
            heap_index: INVALID_HEAP_INDEX,
            cpu_heap: cpu_heap.clone(),
            gpu_heap: None,
        };
        if let Some(heap) = bindless {
            // On failure the partially built view frees its CPU descriptor.
            let handle = heap.allocate_persistent()?;
            native.copy_descriptors(1, handle.cpu, cpu, DescriptorHeapType::CbvSrvUav);
            view.gpu = handle.gpu;
            view.heap_index = handle.heap_index;
            view.gpu_heap = Some(heap.clone());
        }
        Ok(view)
    }

    /// The view description.
    pub fn desc(&self) -> &ViewDesc {
        &self.desc
    }

    /// The kind of view.
    pub fn kind(&self) -> ViewKind {
        self.desc.kind
    }

    /// The CPU descriptor.
    pub fn cpu_handle(&self) -> CpuDescriptor {
        self.cpu
    }

    /// The GPU descriptor of the persistent slot, null if not bindless.
    pub fn gpu_handle(&self) -> GpuDescriptor {
        self.gpu
    }

    /// The bindless index, or [`INVALID_HEAP_INDEX`].
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("kind", &self.desc.kind)
            .field("cpu", &self.cpu)
            .field("heap_index", &self.heap_index)
            .finish()
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.cpu_heap.free(self.cpu);
        if let Some(heap) = &self.gpu_heap {
            heap.free_persistent(self.heap_index);
        }
    }
}
