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

//! Monotonic fences and the sync points built on them.

use crate::error::RhiError;
use keel_core::rhi::{NativeDevice, NativeFence, NativeObject, QueueType};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A GPU fence with a CPU-side view of its progress.
///
/// `current_value` is the value the next [`Fence::signal`] will enqueue, so
/// work recorded now completes once the fence reaches `current_value`.
/// Queries of completion are lock-free; CPU waits are serialized.
pub struct Fence {
    native: Arc<dyn NativeDevice>,
    handle: NativeFence,
    name: String,
    current_value: AtomicU64,
    last_signaled: AtomicU64,
    last_completed: AtomicU64,
    signal_lock: Mutex<()>,
    wait_lock: Mutex<()>,
}

impl Fence {
    /// Creates a fence whose first signal will be `1`.
    pub fn new(native: Arc<dyn NativeDevice>, name: &str) -> Result<Arc<Self>, RhiError> {
        let handle = native.create_fence(0)?;
        native.set_name(NativeObject::Fence(handle), name);
        Ok(Arc::new(Self {
            native,
            handle,
            name: name.to_string(),
            current_value: AtomicU64::new(1),
            last_signaled: AtomicU64::new(0),
            last_completed: AtomicU64::new(0),
            signal_lock: Mutex::new(()),
            wait_lock: Mutex::new(()),
        }))
    }

    /// Enqueues a signal on `queue` and returns the signaled value.
    pub fn signal(&self, queue: QueueType) -> Result<u64, RhiError> {
        let _guard = self.signal_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let value = self.current_value.load(Ordering::Acquire);
        self.native.signal_queue(queue, self.handle, value)?;
        self.last_signaled.store(value, Ordering::Release);
        self.current_value.store(value + 1, Ordering::Release);
        Ok(value)
    }

    /// Blocks until the fence reaches `value`.
    pub fn cpu_wait(&self, value: u64) -> Result<(), RhiError> {
        if self.is_complete(value) {
            return Ok(());
        }
        let _guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_complete(value) {
            return Ok(());
        }
        self.native.wait_for_fence(self.handle, value)?;
        self.last_completed.fetch_max(value, Ordering::AcqRel);
        Ok(())
    }

    /// Makes `queue` wait on the GPU until the fence reaches `value`.
    pub fn gpu_wait(&self, queue: QueueType, value: u64) -> Result<(), RhiError> {
        self.native.wait_queue(queue, self.handle, value)?;
        Ok(())
    }

    /// Returns `true` once the GPU has reached `value`.
    pub fn is_complete(&self, value: u64) -> bool {
        if value <= self.last_completed.load(Ordering::Acquire) {
            return true;
        }
        let completed = self.native.fence_completed_value(self.handle);
        self.last_completed.fetch_max(completed, Ordering::AcqRel);
        value <= completed
    }

    /// Blocks until every signal enqueued so far has completed.
    pub fn wait_for_last_signal(&self) -> Result<(), RhiError> {
        self.cpu_wait(self.last_signaled_value())
    }

    /// The value the next signal will use.
    pub fn current_value(&self) -> u64 {
        self.current_value.load(Ordering::Acquire)
    }

    /// The value of the most recent signal.
    pub fn last_signaled_value(&self) -> u64 {
        self.last_signaled.load(Ordering::Acquire)
    }

    /// The most recent value known to have completed, without querying the
    /// GPU.
    pub fn last_completed_value(&self) -> u64 {
        self.last_completed.load(Ordering::Acquire)
    }

    /// The native fence.
    pub fn handle(&self) -> NativeFence {
        self.handle
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("name", &self.name)
            .field("current_value", &self.current_value())
            .field("last_completed", &self.last_completed_value())
            .finish()
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.native.release(NativeObject::Fence(self.handle));
    }
}

/// A point on a fence's timeline: work up to here is done once the fence
/// reaches `value`.
#[derive(Clone)]
pub struct SyncPoint {
    fence: Arc<Fence>,
    value: u64,
}

impl SyncPoint {
    /// Creates a sync point.
    pub fn new(fence: Arc<Fence>, value: u64) -> Self {
        Self { fence, value }
    }

    /// The fence.
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// The fence value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Returns `true` once the GPU has passed this point.
    pub fn is_complete(&self) -> bool {
        self.fence.is_complete(self.value)
    }

    /// Blocks until the GPU has passed this point.
    pub fn cpu_wait(&self) -> Result<(), RhiError> {
        self.fence.cpu_wait(self.value)
    }

    /// Makes `queue` wait for this point.
    pub fn gpu_wait(&self, queue: QueueType) -> Result<(), RhiError> {
        self.fence.gpu_wait(queue, self.value)
    }
}

impl PartialEq for SyncPoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fence, &other.fence) && self.value == other.value
    }
}

impl Eq for SyncPoint {}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncPoint({}@{})", self.fence.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_infra::{CompletionMode, HeadlessConfig, HeadlessDevice};

    fn manual_device() -> Arc<HeadlessDevice> {
        HeadlessDevice::new(HeadlessConfig::default().with_completion(CompletionMode::Manual))
    }

    #[test]
    fn signals_strictly_increase() {
        let device = manual_device();
        let fence = Fence::new(device.clone(), "Test Fence").unwrap();
        let mut last = 0;
        for queue in [QueueType::Graphics, QueueType::Compute, QueueType::Graphics] {
            let value = fence.signal(queue).unwrap();
            assert!(value > last);
            last = value;
        }
        assert_eq!(fence.last_signaled_value(), last);
        assert_eq!(fence.current_value(), last + 1);
    }

    #[test]
    fn completion_is_monotone() {
        let device = manual_device();
        let fence = Fence::new(device.clone(), "Test Fence").unwrap();
        let first = fence.signal(QueueType::Graphics).unwrap();
        let second = fence.signal(QueueType::Graphics).unwrap();
        assert!(!fence.is_complete(first));

        device.process_all();
        assert!(fence.is_complete(first));
        assert!(fence.is_complete(second));
        assert!(fence.is_complete(0));
        assert!(!fence.is_complete(second + 1));
    }

    #[test]
    fn cpu_wait_drives_completion() {
        let device = manual_device();
        let fence = Fence::new(device.clone(), "Test Fence").unwrap();
        let sync = SyncPoint::new(fence.clone(), fence.signal(QueueType::Copy).unwrap());
        assert!(!sync.is_complete());
        sync.cpu_wait().unwrap();
        assert!(sync.is_complete());
        assert_eq!(fence.last_completed_value(), sync.value());
    }

    #[test]
    fn gpu_wait_orders_queues() {
        let device = manual_device();
        let fence = Fence::new(device.clone(), "Test Fence").unwrap();
        let other = Fence::new(device.clone(), "Other Fence").unwrap();

        let produced = fence.signal(QueueType::Compute).unwrap();
        fence.gpu_wait(QueueType::Graphics, produced).unwrap();
        let consumed = other.signal(QueueType::Graphics).unwrap();

        device.process_queue(QueueType::Graphics);
        assert!(!other.is_complete(consumed));
        device.process_queue(QueueType::Compute);
        device.process_queue(QueueType::Graphics);
        assert!(other.is_complete(consumed));
    }
}
