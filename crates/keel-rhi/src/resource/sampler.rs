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
use keel_core::rhi::{CpuDescriptor, DescriptorHeapType, GpuDescriptor, NativeDevice, SamplerDesc};
use std::fmt;
use std::sync::Arc;

/// A sampler living in the shader-visible sampler heap.
pub struct Sampler {
    desc: SamplerDesc,
    cpu: CpuDescriptor,
    gpu: GpuDescriptor,
    heap_index: u32,
    cpu_heap: Arc<CpuDescriptorHeap>,
    gpu_heap: Arc<GlobalDescriptorHeap>,
}

impl Sampler {
    pub(crate) fn new(
        native: &dyn NativeDevice,
        desc: SamplerDesc,
        cpu_heap: &Arc<CpuDescriptorHeap>,
        gpu_heap: &Arc<GlobalDescriptorHeap>,
    ) -> Result<Self, RhiError> {
        let cpu = cpu_heap.allocate()?;
        native.create_sampler(&desc, cpu);
        let handle = match gpu_heap.allocate_persistent() {
            Ok(handle) => handle,
            Err(err) => {
                cpu_heap.free(cpu);
                return Err(err);
            }
        };
        native.copy_descriptors(1, handle.cpu, cpu, DescriptorHeapType::Sampler);
        Ok(Self {
            desc,
            cpu,
            gpu: handle.gpu,
            heap_index: handle.heap_index,
            cpu_heap: cpu_heap.clone(),
            gpu_heap: gpu_heap.clone(),
        })
    }

    /// The sampler state.
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    /// The CPU descriptor.
    pub fn cpu_handle(&self) -> CpuDescriptor {
        self.cpu
    }

    /// The shader-visible descriptor.
    pub fn gpu_handle(&self) -> GpuDescriptor {
        self.gpu
    }

    /// Index in the sampler heap.
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("filter", &self.desc.filter)
            .field("heap_index", &self.heap_index)
            .finish()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.cpu_heap.free(self.cpu);
        self.gpu_heap.free_persistent(self.heap_index);
    }
}
