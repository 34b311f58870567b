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

//! A type-keyed registry for the subsystems a device hands out.
//!
//! Process-wide singletons (profilers, debug renderers, shared shader
//! parameters) are owned by the [`Device`](../../keel_rhi/struct.Device.html)
//! through a [`SubsystemRegistry`] and reached through it, so two devices
//! never share hidden global state.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A registry of shared subsystem handles keyed by [`TypeId`].
#[derive(Default)]
pub struct SubsystemRegistry {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl SubsystemRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registers a subsystem and returns the shared handle to it.
    ///
    /// A subsystem of the same type that was already registered is replaced;
    /// holders of the previous handle keep it alive until they drop it.
    pub fn register<T: Send + Sync + 'static>(&mut self, subsystem: T) -> Arc<T> {
        let handle = Arc::new(subsystem);
        self.entries.insert(TypeId::of::<T>(), handle.clone());
        handle
    }

    /// Returns a shared handle to a registered subsystem.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    /// Removes a subsystem, returning its handle.
    pub fn unregister<T: Send + Sync + 'static>(&mut self) -> Option<Arc<T>> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    /// Returns `true` if a subsystem of type `T` is registered.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of registered subsystems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SubsystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DebugRenderer {
        lines: usize,
    }

    struct Profiler;

    #[test]
    fn register_and_fetch() {
        let mut registry = SubsystemRegistry::new();
        registry.register(DebugRenderer { lines: 12 });

        let renderer = registry.get::<DebugRenderer>().unwrap();
        assert_eq!(renderer.lines, 12);
        assert!(registry.get::<Profiler>().is_none());
    }

    #[test]
    fn replaced_subsystem_keeps_old_handle_alive() {
        let mut registry = SubsystemRegistry::new();
        let old = registry.register(DebugRenderer { lines: 1 });
        registry.register(DebugRenderer { lines: 2 });

        assert_eq!(old.lines, 1);
        assert_eq!(registry.get::<DebugRenderer>().unwrap().lines, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_removes_entry() {
        let mut registry = SubsystemRegistry::new();
        registry.register(Profiler);
        assert!(registry.contains::<Profiler>());
        assert!(registry.unregister::<Profiler>().is_some());
        assert!(registry.is_empty());
    }
}
