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

//! Deferred release of native objects still referenced by in-flight frames.

use crate::fence::Fence;
use keel_core::rhi::{NativeDevice, NativeObject};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

enum Deferred {
    Object(NativeObject),
    KeepAlive(Box<dyn Any + Send + Sync>),
}

/// Holds native objects (and arbitrary keep-alive values) until the frame
/// that may still use them has completed on the GPU.
///
/// Entries are tagged with the frame fence's current value, which the
/// device signals at the end of the frame being recorded.
pub struct DeferredReleaseQueue {
    native: Arc<dyn NativeDevice>,
    frame_fence: Arc<Fence>,
    entries: Mutex<VecDeque<(u64, Deferred)>>,
}

impl DeferredReleaseQueue {
    /// Creates an empty queue tied to the frame fence.
    pub fn new(native: Arc<dyn NativeDevice>, frame_fence: Arc<Fence>) -> Self {
        Self {
            native,
            frame_fence,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Releases `object` once the current frame has completed.
    pub fn release(&self, object: NativeObject) {
        self.push(Deferred::Object(object));
    }

    /// Keeps `value` alive until the current frame has completed.
    pub fn keep_alive(&self, value: impl Any + Send + Sync) {
        self.push(Deferred::KeepAlive(Box::new(value)));
    }

    fn push(&self, entry: Deferred) {
        let value = self.frame_fence.current_value();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((value, entry));
    }

    /// Releases every entry whose frame has completed. Returns how many
    /// were released.
    pub fn process(&self) -> usize {
        let ready: Vec<Deferred> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let mut ready = Vec::new();
            let mut pending = VecDeque::with_capacity(entries.len());
            for (value, entry) in entries.drain(..) {
                if self.frame_fence.is_complete(value) {
                    ready.push(entry);
                } else {
                    pending.push_back((value, entry));
                }
            }
            *entries = pending;
            ready
        };
        // Dropped keep-alive values may enqueue further releases.
        let count = ready.len();
        self.finish(ready);
        count
    }

    /// Releases every entry regardless of its frame. Only valid once the
    /// GPU is idle.
    pub fn release_all(&self) -> usize {
        let mut count = 0;
        loop {
            let ready: Vec<Deferred> = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .map(|(_, entry)| entry)
                .collect();
            if ready.is_empty() {
                return count;
            }
            count += ready.len();
            self.finish(ready);
        }
    }

    fn finish(&self, ready: Vec<Deferred>) {
        for entry in ready {
            match entry {
                Deferred::Object(object) => self.native.release(object),
                Deferred::KeepAlive(value) => drop(value),
            }
        }
    }

    /// Number of entries waiting for their frame.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DeferredReleaseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredReleaseQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::{BufferDesc, HeapType, QueueType, ResourceDesc, ResourceStates};
    use keel_infra::{CompletionMode, HeadlessConfig, HeadlessDevice};

    #[test]
    fn objects_wait_for_their_frame() {
        let device = HeadlessDevice::new(HeadlessConfig::default().with_completion(CompletionMode::Manual));
        let fence = Fence::new(device.clone(), "Frame Fence").unwrap();
        let queue = DeferredReleaseQueue::new(device.clone(), fence.clone());

        let buffer = device
            .create_resource(
                &ResourceDesc::Buffer(BufferDesc::upload(256)),
                HeapType::Upload,
                ResourceStates::GENERIC_READ,
                None,
            )
            .unwrap();
        queue.release(NativeObject::Resource(buffer));
        queue.keep_alive(String::from("payload"));
        assert_eq!(queue.len(), 2);

        fence.signal(QueueType::Graphics).unwrap();
        assert_eq!(queue.process(), 0);
        assert!(device.is_alive(NativeObject::Resource(buffer)));

        device.process_all();
        assert_eq!(queue.process(), 2);
        assert!(!device.is_alive(NativeObject::Resource(buffer)));
        assert!(queue.is_empty());
    }
}
