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

//! Buffers, textures and their views.
//!
//! Every GPU allocation is a reference-counted [`Resource`] holding the
//! native handle, its description and its global state. [`Buffer`] and
//! [`Texture`] wrap a resource together with the views they own. Dropping
//! the last reference hands the native object to the deferred release
//! queue.

mod buffer;
mod sampler;
mod texture;
mod view;

pub use buffer::Buffer;
pub use sampler::Sampler;
pub use texture::Texture;
pub use view::View;

use crate::error::RhiError;
use crate::release::DeferredReleaseQueue;
use keel_core::rhi::{
    HeapType, NativeDevice, NativeObject, NativeResource, ResourceDesc, ResourceState, ResourceStates,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A GPU allocation.
pub struct Resource {
    id: u64,
    handle: NativeResource,
    desc: ResourceDesc,
    heap: HeapType,
    name: String,
    tracked: bool,
    gpu_address: u64,
    state: Mutex<ResourceState>,
    native: Arc<dyn NativeDevice>,
    release: Arc<DeferredReleaseQueue>,
}

impl Resource {
    /// Wraps a native resource created in `initial_state`.
    pub fn new(
        native: Arc<dyn NativeDevice>,
        release: Arc<DeferredReleaseQueue>,
        handle: NativeResource,
        desc: ResourceDesc,
        heap: HeapType,
        initial_state: ResourceStates,
        name: &str,
    ) -> Self {
        let tracked = match &desc {
            ResourceDesc::Buffer(b) => b.is_state_tracked(),
            ResourceDesc::Texture(t) => t.is_state_tracked(),
        };
        let gpu_address = match desc {
            ResourceDesc::Buffer(_) => native.gpu_virtual_address(handle),
            ResourceDesc::Texture(_) => 0,
        };
        native.set_name(NativeObject::Resource(handle), name);
        Self {
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
            handle,
            desc,
            heap,
            name: name.to_string(),
            tracked,
            gpu_address,
            state: Mutex::new(ResourceState::new(desc.subresource_count(), initial_state)),
            native,
            release,
        }
    }

    /// Creates a committed native resource and wraps it.
    pub(crate) fn create(
        native: &Arc<dyn NativeDevice>,
        release: &Arc<DeferredReleaseQueue>,
        desc: ResourceDesc,
        heap: HeapType,
        initial_state: ResourceStates,
        name: &str,
    ) -> Result<Self, RhiError> {
        let clear_value = match &desc {
            ResourceDesc::Texture(t) => t.clear_value,
            ResourceDesc::Buffer(_) => None,
        };
        let handle = native.create_resource(&desc, heap, initial_state, clear_value.as_ref())?;
        Ok(Self::new(
            native.clone(),
            release.clone(),
            handle,
            desc,
            heap,
            initial_state,
            name,
        ))
    }

    /// Process-unique identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The native resource.
    pub fn handle(&self) -> NativeResource {
        self.handle
    }

    /// The description.
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    /// The memory pool.
    pub fn heap_type(&self) -> HeapType {
        self.heap
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if barriers are recorded for this resource.
    pub fn is_state_tracked(&self) -> bool {
        self.tracked
    }

    /// GPU virtual address of a buffer, `0` for textures.
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Number of subresources.
    pub fn subresource_count(&self) -> u32 {
        self.desc.subresource_count()
    }

    /// The global state of a subresource as of the last submission.
    pub fn state(&self, subresource: u32) -> ResourceStates {
        self.global_state().get(subresource)
    }

    pub(crate) fn global_state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes into the persistent mapping of an upload resource.
    pub fn write_mapped(&self, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        keel_core::rhi_check!(
            self.heap != HeapType::Default,
            "'{}' is not CPU visible",
            self.name
        );
        self.native.write_mapped(self.handle, offset, data)?;
        Ok(())
    }

    /// Reads from the persistent mapping of a readback resource.
    pub fn read_mapped(&self, offset: u64, out: &mut [u8]) -> Result<(), RhiError> {
        keel_core::rhi_check!(
            self.heap != HeapType::Default,
            "'{}' is not CPU visible",
            self.name
        );
        self.native.read_mapped(self.handle, offset, out)?;
        Ok(())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("desc", &self.desc)
            .field("tracked", &self.tracked)
            .finish()
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.release.release(NativeObject::Resource(self.handle));
    }
}

/// Anything backed by a [`Resource`].
pub trait GpuResource: Send + Sync {
    /// The underlying resource.
    fn resource(&self) -> &Arc<Resource>;

    /// Debug name.
    fn name(&self) -> &str {
        self.resource().name()
    }
}

impl GpuResource for Arc<Resource> {
    fn resource(&self) -> &Arc<Resource> {
        self
    }
}

impl GpuResource for Arc<Buffer> {
    fn resource(&self) -> &Arc<Resource> {
        Buffer::resource(self)
    }
}

impl GpuResource for Arc<Texture> {
    fn resource(&self) -> &Arc<Resource> {
        Texture::resource(self)
    }
}
