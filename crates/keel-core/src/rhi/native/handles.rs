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

//! Opaque handles to native objects.

macro_rules! native_handle {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw backend value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw backend value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

native_handle!(
    /// A committed or placed GPU resource.
    NativeResource
);
native_handle!(
    /// A monotonic fence.
    NativeFence
);
native_handle!(
    /// A command list.
    NativeCommandList
);
native_handle!(
    /// The memory backing recorded commands.
    NativeCommandAllocator
);
native_handle!(
    /// A descriptor heap.
    NativeDescriptorHeap
);
native_handle!(
    /// A compiled graphics or compute pipeline.
    NativePipelineState
);
native_handle!(
    /// A raytracing or work-graph state object.
    NativeStateObject
);
native_handle!(
    /// A root signature.
    NativeRootSignature
);
native_handle!(
    /// An indirect command signature.
    NativeCommandSignature
);
native_handle!(
    /// A swapchain.
    NativeSwapChain
);

/// A CPU descriptor handle (a heap address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CpuDescriptor(pub u64);

impl CpuDescriptor {
    /// Returns the handle `index` descriptors further.
    pub const fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }

    /// Returns `true` for the null handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A GPU descriptor handle (a shader-visible heap address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GpuDescriptor(pub u64);

impl GpuDescriptor {
    /// Returns the handle `index` descriptors further.
    pub const fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }

    /// Returns `true` for the null handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Any native object, for naming and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum NativeObject {
    Resource(NativeResource),
    Fence(NativeFence),
    CommandList(NativeCommandList),
    CommandAllocator(NativeCommandAllocator),
    DescriptorHeap(NativeDescriptorHeap),
    PipelineState(NativePipelineState),
    StateObject(NativeStateObject),
    RootSignature(NativeRootSignature),
    CommandSignature(NativeCommandSignature),
    SwapChain(NativeSwapChain),
}
