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

//! Resource states, the combinable-read policy, per-queue legality and the
//! per-subresource state tracker.

use super::QueueType;
use crate::keel_bitflags;

/// Sentinel subresource index meaning "every subresource".
pub const ALL_SUBRESOURCES: u32 = u32::MAX;

keel_bitflags! {
    /// The usage mode a resource is in, as understood by the native API.
    ///
    /// `COMMON` is the empty set.
    pub struct ResourceStates: u32 {
        /// Vertex buffer or constant buffer.
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        /// Index buffer.
        const INDEX_BUFFER = 0x2;
        /// Colour attachment.
        const RENDER_TARGET = 0x4;
        /// Read-write shader access.
        const UNORDERED_ACCESS = 0x8;
        /// Depth attachment with writes enabled.
        const DEPTH_WRITE = 0x10;
        /// Depth attachment with writes disabled.
        const DEPTH_READ = 0x20;
        /// Shader resource accessed by non-pixel stages.
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        /// Shader resource accessed by the pixel stage.
        const PIXEL_SHADER_RESOURCE = 0x80;
        /// Stream-output target.
        const STREAM_OUT = 0x100;
        /// Indirect argument buffer.
        const INDIRECT_ARGUMENT = 0x200;
        /// Copy destination.
        const COPY_DEST = 0x400;
        /// Copy source.
        const COPY_SOURCE = 0x800;
        /// Resolve destination.
        const RESOLVE_DEST = 0x1000;
        /// Resolve source.
        const RESOLVE_SOURCE = 0x2000;
        /// Raytracing acceleration structure.
        const RAYTRACING_ACCELERATION_STRUCTURE = 0x40_0000;
        /// Variable rate shading image.
        const SHADING_RATE_SOURCE = 0x100_0000;
        /// Every read state an upload heap resource is created in.
        const GENERIC_READ = 0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800;
        /// Shader resource for every stage.
        const ALL_SHADER_RESOURCE = 0x40 | 0x80;
    }
}

impl ResourceStates {
    /// The implicit state of untracked resources.
    pub const COMMON: Self = Self::EMPTY;

    /// Returns `true` if every state in the set is a read state.
    pub const fn is_read_only(self) -> bool {
        !self.is_empty() && COMBINABLE_READ_STATES.contains(self)
    }

    /// Returns `true` if the set contains any write state.
    pub const fn has_write(self) -> bool {
        self.intersects(WRITE_STATES)
    }
}

/// Read states that may be OR-ed together into one combined state.
///
/// Depth-read, acceleration structures and all write states stay exclusive.
const COMBINABLE_READ_STATES: ResourceStates = ResourceStates::from_bits_retain(
    ResourceStates::VERTEX_AND_CONSTANT_BUFFER.bits()
        | ResourceStates::INDEX_BUFFER.bits()
        | ResourceStates::NON_PIXEL_SHADER_RESOURCE.bits()
        | ResourceStates::PIXEL_SHADER_RESOURCE.bits()
        | ResourceStates::INDIRECT_ARGUMENT.bits()
        | ResourceStates::COPY_SOURCE.bits()
        | ResourceStates::RESOLVE_SOURCE.bits()
        | ResourceStates::SHADING_RATE_SOURCE.bits(),
);

const WRITE_STATES: ResourceStates = ResourceStates::from_bits_retain(
    ResourceStates::RENDER_TARGET.bits()
        | ResourceStates::UNORDERED_ACCESS.bits()
        | ResourceStates::DEPTH_WRITE.bits()
        | ResourceStates::STREAM_OUT.bits()
        | ResourceStates::COPY_DEST.bits()
        | ResourceStates::RESOLVE_DEST.bits(),
);

/// Returns `true` if `a` and `b` are both read states and may be merged into
/// a single state `a | b`.
pub const fn can_combine(a: ResourceStates, b: ResourceStates) -> bool {
    a.is_read_only() && b.is_read_only()
}

/// States a queue of the given type may transition resources into.
const QUEUE_LEGAL_STATES: [ResourceStates; 3] = [
    // Graphics
    ResourceStates::from_bits_retain(u32::MAX),
    // Compute
    ResourceStates::from_bits_retain(
        ResourceStates::VERTEX_AND_CONSTANT_BUFFER.bits()
            | ResourceStates::UNORDERED_ACCESS.bits()
            | ResourceStates::NON_PIXEL_SHADER_RESOURCE.bits()
            | ResourceStates::INDIRECT_ARGUMENT.bits()
            | ResourceStates::COPY_DEST.bits()
            | ResourceStates::COPY_SOURCE.bits()
            | ResourceStates::RAYTRACING_ACCELERATION_STRUCTURE.bits(),
    ),
    // Copy
    ResourceStates::from_bits_retain(
        ResourceStates::COPY_DEST.bits() | ResourceStates::COPY_SOURCE.bits(),
    ),
];

/// The states a queue of the given type accepts.
pub const fn legal_states(queue: QueueType) -> ResourceStates {
    QUEUE_LEGAL_STATES[queue as usize]
}

/// Returns `true` if `state` may be used on a queue of the given type.
pub const fn is_legal_on_queue(state: ResourceStates, queue: QueueType) -> bool {
    legal_states(queue).contains(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────────────────

/// The state of a resource, uniform across subresources or tracked per
/// subresource once they diverge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    uniform: ResourceStates,
    per_subresource: Vec<ResourceStates>,
    subresource_count: u32,
}

impl ResourceState {
    /// Creates a tracker for `subresource_count` subresources, all in `initial`.
    pub fn new(subresource_count: u32, initial: ResourceStates) -> Self {
        Self {
            uniform: initial,
            per_subresource: Vec::new(),
            subresource_count: subresource_count.max(1),
        }
    }

    /// Number of tracked subresources.
    pub fn subresource_count(&self) -> u32 {
        self.subresource_count
    }

    /// Returns `true` if every subresource shares one state.
    pub fn is_uniform(&self) -> bool {
        self.per_subresource.is_empty()
    }

    /// Sets the state of one subresource, or of all of them.
    pub fn set(&mut self, state: ResourceStates, subresource: u32) {
        if subresource == ALL_SUBRESOURCES {
            self.uniform = state;
            self.per_subresource.clear();
            return;
        }

        crate::rhi_check!(
            subresource < self.subresource_count,
            "subresource {} out of range ({} subresources)",
            subresource,
            self.subresource_count
        );

        if self.per_subresource.is_empty() {
            if self.uniform == state {
                return;
            }
            self.per_subresource = vec![self.uniform; self.subresource_count as usize];
        }
        self.per_subresource[subresource as usize] = state;

        if self.per_subresource.iter().all(|s| *s == state) {
            self.uniform = state;
            self.per_subresource.clear();
        }
    }

    /// Returns the state of one subresource.
    ///
    /// Asking for [`ALL_SUBRESOURCES`] on a diverged tracker returns the
    /// state of subresource 0.
    pub fn get(&self, subresource: u32) -> ResourceStates {
        if self.per_subresource.is_empty() {
            return self.uniform;
        }
        let index = if subresource == ALL_SUBRESOURCES { 0 } else { subresource };
        self.per_subresource
            .get(index as usize)
            .copied()
            .unwrap_or(self.uniform)
    }

    /// Iterates `(subresource, state)` pairs for every subresource.
    pub fn iter(&self) -> impl Iterator<Item = (u32, ResourceStates)> + '_ {
        (0..self.subresource_count).map(move |i| (i, self.get(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_states_combine() {
        assert!(can_combine(
            ResourceStates::NON_PIXEL_SHADER_RESOURCE,
            ResourceStates::PIXEL_SHADER_RESOURCE
        ));
        assert!(can_combine(
            ResourceStates::COPY_SOURCE,
            ResourceStates::INDIRECT_ARGUMENT | ResourceStates::NON_PIXEL_SHADER_RESOURCE
        ));
        assert!(ResourceStates::GENERIC_READ.is_read_only());
    }

    #[test]
    fn write_states_never_combine() {
        assert!(!can_combine(
            ResourceStates::UNORDERED_ACCESS,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE
        ));
        assert!(!can_combine(ResourceStates::COPY_DEST, ResourceStates::COPY_SOURCE));
        assert!(!can_combine(ResourceStates::COMMON, ResourceStates::COPY_SOURCE));
        assert!(!can_combine(
            ResourceStates::DEPTH_READ,
            ResourceStates::PIXEL_SHADER_RESOURCE
        ));
    }

    #[test]
    fn queue_legality() {
        assert!(is_legal_on_queue(ResourceStates::RENDER_TARGET, QueueType::Graphics));
        assert!(!is_legal_on_queue(ResourceStates::RENDER_TARGET, QueueType::Compute));
        assert!(is_legal_on_queue(ResourceStates::UNORDERED_ACCESS, QueueType::Compute));
        assert!(!is_legal_on_queue(ResourceStates::PIXEL_SHADER_RESOURCE, QueueType::Compute));
        assert!(is_legal_on_queue(ResourceStates::COPY_DEST, QueueType::Copy));
        assert!(!is_legal_on_queue(ResourceStates::UNORDERED_ACCESS, QueueType::Copy));
        assert!(is_legal_on_queue(ResourceStates::COMMON, QueueType::Copy));
    }

    #[test]
    fn tracker_diverges_and_collapses() {
        let mut state = ResourceState::new(4, ResourceStates::COMMON);
        assert!(state.is_uniform());

        state.set(ResourceStates::RENDER_TARGET, 2);
        assert!(!state.is_uniform());
        assert_eq!(state.get(2), ResourceStates::RENDER_TARGET);
        assert_eq!(state.get(1), ResourceStates::COMMON);

        for sub in [0, 1, 3] {
            state.set(ResourceStates::RENDER_TARGET, sub);
        }
        assert!(state.is_uniform());
        assert_eq!(state.get(ALL_SUBRESOURCES), ResourceStates::RENDER_TARGET);
    }

    #[test]
    fn tracker_set_all_resets() {
        let mut state = ResourceState::new(3, ResourceStates::COMMON);
        state.set(ResourceStates::COPY_DEST, 0);
        state.set(ResourceStates::UNORDERED_ACCESS, ALL_SUBRESOURCES);
        assert!(state.is_uniform());
        assert_eq!(
            state.iter().map(|(_, s)| s).collect::<Vec<_>>(),
            vec![ResourceStates::UNORDERED_ACCESS; 3]
        );
    }
}
