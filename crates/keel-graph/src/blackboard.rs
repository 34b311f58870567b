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


//! A typed side channel for data shared between passes.

use ahash::AHashMap;
use std::any::{Any, TypeId};

/// Stores at most one value per type.
///
/// Passes publish derived data (handles, culling results, constants) under
/// their own types so later passes can pick them up without extra plumbing.
#[derive(Default)]
pub struct Blackboard {
    entries: AHashMap<TypeId, Box<dyn Any + Send>>,
}

impl Blackboard {
    /// Creates an empty blackboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the one it replaces.
    pub fn insert<T: Any + Send>(&mut self, value: T) -> Option<T> {
        self.entries
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// The stored value of type `T`.
    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.entries.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref())
    }

    /// The stored value of type `T`, mutably.
    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.entries.get_mut(&TypeId::of::<T>()).and_then(|v| v.downcast_mut())
    }

    /// Removes and returns the value of type `T`.
    pub fn remove<T: Any + Send>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn contains<T: Any + Send>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct LightGrid {
        tiles: u32,
    }

    #[derive(Debug, PartialEq)]
    struct Exposure(f32);

    #[test]
    fn test_values_are_keyed_by_type() {
        let mut board = Blackboard::new();
        board.insert(LightGrid { tiles: 16 });
        board.insert(Exposure(1.5));
        assert_eq!(board.len(), 2);
        assert_eq!(board.get::<LightGrid>(), Some(&LightGrid { tiles: 16 }));
        assert_eq!(board.get::<Exposure>(), Some(&Exposure(1.5)));
        assert!(board.get::<u32>().is_none());
    }

    #[test]
    fn test_insert_replaces_and_returns_previous() {
        let mut board = Blackboard::new();
        assert!(board.insert(LightGrid { tiles: 1 }).is_none());
        let old = board.insert(LightGrid { tiles: 2 });
        assert_eq!(old, Some(LightGrid { tiles: 1 }));
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn test_get_mut_and_remove() {
        let mut board = Blackboard::new();
        board.insert(Exposure(1.0));
        if let Some(exposure) = board.get_mut::<Exposure>() {
            exposure.0 = 2.0;
        }
        assert_eq!(board.remove::<Exposure>(), Some(Exposure(2.0)));
        assert!(!board.contains::<Exposure>());
        assert!(board.is_empty());
    }
}
