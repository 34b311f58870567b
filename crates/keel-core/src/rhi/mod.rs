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

//! Backend-agnostic RHI vocabulary: formats, descriptors, states and the
//! native API boundary.

pub mod desc;
pub mod format;
pub mod native;
pub mod shader;
pub mod state;

pub use desc::*;
pub use format::Format;
pub use native::*;
pub use shader::*;
pub use state::*;

/// Sentinel for "no GPU-visible descriptor".
pub const INVALID_HEAP_INDEX: u32 = 0xFFFF_FFFF;

/// Maximum thread groups per dispatch dimension.
pub const MAX_DISPATCH_GROUPS: u32 = 65535;

/// The three hardware queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueType {
    /// Graphics, compute and copy work.
    Graphics = 0,
    /// Compute and copy work.
    Compute = 1,
    /// Copy work.
    Copy = 2,
}

impl QueueType {
    /// Every queue type, in index order.
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Copy];

    /// Index of the queue type in per-queue arrays.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Debug name of the queue.
    pub const fn name(self) -> &'static str {
        match self {
            QueueType::Graphics => "Graphics Queue",
            QueueType::Compute => "Compute Queue",
            QueueType::Copy => "Copy Queue",
        }
    }
}
