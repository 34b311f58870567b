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

//! Multicast delegates with owner-aware targets.
//!
//! A [`MulticastDelegate`] stores its targets in a generational slot map.
//! Each target is one of four arms:
//!
//! | Arm      | Storage                        | Owner              |
//! |----------|--------------------------------|--------------------|
//! | `Free`   | inline function pointer        | none               |
//! | `Member` | boxed closure                  | object address     |
//! | `Shared` | weak owner + boxed method      | `Weak` handle      |
//! | `Lambda` | boxed closure                  | none               |
//!
//! `Shared` targets whose owner has been dropped become no-ops and are
//! reclaimed by [`MulticastDelegate::compact`]. Subscribers that want
//! automatic removal hold a [`WatcherToken`], which unregisters its target
//! when dropped.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

type Callback<A> = Box<dyn Fn(&A) + Send + Sync>;
type SharedMethod<A> = Box<dyn Fn(&(dyn Any + Send + Sync), &A) + Send + Sync>;

/// The callable stored in a delegate slot.
pub enum Target<A: 'static> {
    /// A free function.
    Free(fn(&A)),
    /// A closure bound to an object identified by its address.
    Member {
        /// Address of the owning object, used by [`MulticastDelegate::remove_object`].
        owner: usize,
        /// The bound call.
        call: Callback<A>,
    },
    /// A method on a reference-counted owner, held weakly.
    Shared {
        /// The owner; the target is inert once it is gone.
        owner: Weak<dyn Any + Send + Sync>,
        /// The method, invoked with the upgraded owner.
        method: SharedMethod<A>,
    },
    /// An unowned closure.
    Lambda(Callback<A>),
}

impl<A: 'static> Target<A> {
    fn invoke(&self, args: &A) -> bool {
        match self {
            Target::Free(function) => {
                function(args);
                true
            }
            Target::Member { call, .. } | Target::Lambda(call) => {
                call(args);
                true
            }
            Target::Shared { owner, method } => match owner.upgrade() {
                Some(owner) => {
                    method(owner.as_ref(), args);
                    true
                }
                None => false,
            },
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Target::Shared { owner, .. } => owner.strong_count() > 0,
            _ => true,
        }
    }

    fn owner_address(&self) -> Option<usize> {
        match self {
            Target::Member { owner, .. } => Some(*owner),
            Target::Shared { owner, .. } => {
                (owner.strong_count() > 0).then(|| owner.as_ptr() as *const () as usize)
            }
            _ => None,
        }
    }
}

impl<A: 'static> fmt::Debug for Target<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Free(_) => write!(f, "Free"),
            Target::Member { owner, .. } => write!(f, "Member({owner:#x})"),
            Target::Shared { owner, .. } => write!(f, "Shared(alive: {})", owner.strong_count() > 0),
            Target::Lambda(_) => write!(f, "Lambda"),
        }
    }
}

/// Identifies one registered target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateHandle {
    index: u32,
    generation: u32,
}

struct Slot<A: 'static> {
    generation: u32,
    target: Option<Arc<Target<A>>>,
}

struct Slots<A: 'static> {
    entries: Vec<Slot<A>>,
    free: Vec<u32>,
}

impl<A: 'static> Slots<A> {
    fn insert(&mut self, target: Target<A>) -> DelegateHandle {
        let target = Some(Arc::new(target));
        if let Some(index) = self.free.pop() {
            let slot = &mut self.entries[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.target = target;
            DelegateHandle {
                index,
                generation: slot.generation,
            }
        } else {
            self.entries.push(Slot {
                generation: 0,
                target,
            });
            DelegateHandle {
                index: (self.entries.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    fn remove(&mut self, handle: DelegateHandle) -> bool {
        match self.entries.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.target.is_some() => {
                slot.target = None;
                self.free.push(handle.index);
                true
            }
            _ => false,
        }
    }

    fn retain(&mut self, mut keep: impl FnMut(&Target<A>) -> bool) -> usize {
        let mut removed = 0;
        for (index, slot) in self.entries.iter_mut().enumerate() {
            if slot.target.as_deref().is_some_and(|target| !keep(target)) {
                slot.target = None;
                self.free.push(index as u32);
                removed += 1;
            }
        }
        removed
    }
}

/// A list of targets invoked together by [`broadcast`](Self::broadcast).
///
/// Cloning a delegate yields another handle to the same target list.
pub struct MulticastDelegate<A: 'static> {
    slots: Arc<Mutex<Slots<A>>>,
}

impl<A: 'static> Clone for MulticastDelegate<A> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<A: 'static> Default for MulticastDelegate<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> MulticastDelegate<A> {
    /// Creates a delegate with no targets.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots<A>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a target.
    pub fn add(&self, target: Target<A>) -> DelegateHandle {
        self.lock().insert(target)
    }

    /// Adds a free function.
    pub fn add_free(&self, function: fn(&A)) -> DelegateHandle {
        self.add(Target::Free(function))
    }

    /// Adds a closure.
    pub fn add_lambda(&self, call: impl Fn(&A) + Send + Sync + 'static) -> DelegateHandle {
        self.add(Target::Lambda(Box::new(call)))
    }

    /// Adds a closure owned by `owner`, removable with [`remove_object`](Self::remove_object).
    pub fn add_member<T>(
        &self,
        owner: &T,
        call: impl Fn(&A) + Send + Sync + 'static,
    ) -> DelegateHandle {
        self.add(Target::Member {
            owner: owner as *const T as *const () as usize,
            call: Box::new(call),
        })
    }

    /// Adds a method of a reference-counted owner, held weakly.
    pub fn add_shared<T: Send + Sync + 'static>(
        &self,
        owner: &Arc<T>,
        method: fn(&T, &A),
    ) -> DelegateHandle {
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(owner) as Weak<dyn Any + Send + Sync>;
        self.add(Target::Shared {
            owner: weak,
            method: Box::new(move |owner, args| {
                if let Some(owner) = owner.downcast_ref::<T>() {
                    method(owner, args);
                }
            }),
        })
    }

    /// Adds a closure and returns a token that removes it when dropped.
    pub fn subscribe(&self, call: impl Fn(&A) + Send + Sync + 'static) -> WatcherToken {
        let handle = self.add_lambda(call);
        let slots: Weak<Mutex<Slots<A>>> = Arc::downgrade(&self.slots);
        WatcherToken {
            unsubscribe: Some(Box::new(move || {
                if let Some(slots) = slots.upgrade() {
                    slots
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .remove(handle);
                }
            })),
        }
    }

    /// Removes a target. Returns `false` if the handle was stale.
    pub fn remove(&self, handle: DelegateHandle) -> bool {
        self.lock().remove(handle)
    }

    /// Removes every `Member` and `Shared` target owned by `object`.
    pub fn remove_object<T>(&self, object: &T) -> usize {
        let address = object as *const T as *const () as usize;
        self.lock()
            .retain(|target| target.owner_address() != Some(address))
    }

    /// Reclaims the slots of `Shared` targets whose owner is gone.
    pub fn compact(&self) -> usize {
        self.lock().retain(Target::is_alive)
    }

    /// Returns the number of registered targets, including inert ones.
    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|slot| slot.target.is_some())
            .count()
    }

    /// Returns `true` if no target is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every live target with `args`.
    ///
    /// Targets are collected under the lock and called outside of it, so a
    /// target may add or remove targets on the same delegate.
    pub fn broadcast(&self, args: &A) -> usize {
        let targets: Vec<Arc<Target<A>>> = self
            .lock()
            .entries
            .iter()
            .filter_map(|slot| slot.target.clone())
            .collect();
        targets.iter().filter(|target| target.invoke(args)).count()
    }
}

impl<A: 'static> fmt::Debug for MulticastDelegate<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MulticastDelegate")
            .field("targets", &self.len())
            .finish()
    }
}

/// Unregisters its delegate target when dropped.
#[must_use = "dropping the token unsubscribes immediately"]
pub struct WatcherToken {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatcherToken {
    /// Keeps the subscription alive for the rest of the delegate's life.
    pub fn forget(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for WatcherToken {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for WatcherToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherToken")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FREE_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn count_free(value: &u32) {
        FREE_CALLS.fetch_add(*value as usize, Ordering::SeqCst);
    }

    struct Listener {
        seen: AtomicUsize,
    }

    impl Listener {
        fn on_event(&self, value: &u32) {
            self.seen.fetch_add(*value as usize, Ordering::SeqCst);
        }
    }

    #[test]
    fn broadcast_reaches_every_arm() {
        let delegate = MulticastDelegate::<u32>::new();
        let listener = Arc::new(Listener {
            seen: AtomicUsize::new(0),
        });
        let lambda_calls = Arc::new(AtomicUsize::new(0));

        delegate.add_free(count_free);
        delegate.add_shared(&listener, Listener::on_event);
        let calls = lambda_calls.clone();
        delegate.add_lambda(move |v| {
            calls.fetch_add(*v as usize, Ordering::SeqCst);
        });

        assert_eq!(delegate.broadcast(&3), 3);
        assert!(FREE_CALLS.load(Ordering::SeqCst) >= 3);
        assert_eq!(listener.seen.load(Ordering::SeqCst), 3);
        assert_eq!(lambda_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dead_shared_owner_is_inert_until_compacted() {
        let delegate = MulticastDelegate::<u32>::new();
        let listener = Arc::new(Listener {
            seen: AtomicUsize::new(0),
        });
        delegate.add_shared(&listener, Listener::on_event);
        drop(listener);

        assert_eq!(delegate.broadcast(&1), 0);
        assert_eq!(delegate.len(), 1);
        assert_eq!(delegate.compact(), 1);
        assert!(delegate.is_empty());
    }

    #[test]
    fn remove_object_only_removes_owned_targets() {
        let delegate = MulticastDelegate::<u32>::new();
        let owner = Listener {
            seen: AtomicUsize::new(0),
        };
        delegate.add_member(&owner, |_| {});
        delegate.add_member(&owner, |_| {});
        delegate.add_lambda(|_| {});

        assert_eq!(delegate.remove_object(&owner), 2);
        assert_eq!(delegate.len(), 1);
    }

    #[test]
    fn watcher_token_unsubscribes_on_drop() {
        let delegate = MulticastDelegate::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let token = delegate.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        delegate.broadcast(&0);
        drop(token);
        delegate.broadcast(&0);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(delegate.is_empty());
    }

    #[test]
    fn stale_handle_does_not_remove_reused_slot() {
        let delegate = MulticastDelegate::<u32>::new();
        let first = delegate.add_lambda(|_| {});
        assert!(delegate.remove(first));
        let second = delegate.add_lambda(|_| {});

        assert!(!delegate.remove(first));
        assert!(delegate.remove(second));
    }
}
