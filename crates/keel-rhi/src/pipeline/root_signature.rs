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

//! Root signatures.

use crate::device::Device;
use crate::error::RhiError;
use crate::release::DeferredReleaseQueue;
use keel_core::rhi::{NativeObject, NativeRootSignature, RootParameter, RootSignatureDesc};
use std::fmt;
use std::sync::Arc;

/// A root signature and the description it was built from.
pub struct RootSignature {
    name: String,
    desc: RootSignatureDesc,
    native: NativeRootSignature,
    release: Arc<DeferredReleaseQueue>,
}

impl RootSignature {
    /// Creates a root signature.
    pub fn new(device: &Device, desc: RootSignatureDesc, name: &str) -> Result<Arc<Self>, RhiError> {
        let native = device.native().create_root_signature(&desc)?;
        device.native().set_name(NativeObject::RootSignature(native), name);
        Ok(Arc::new(Self {
            name: name.to_string(),
            desc,
            native,
            release: device.release_queue().clone(),
        }))
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description.
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }

    /// The native handle.
    pub fn native(&self) -> NativeRootSignature {
        self.native
    }

    /// The parameter at `root_index`.
    pub fn parameter(&self, root_index: u32) -> Option<&RootParameter> {
        self.desc.parameters.get(root_index as usize)
    }

    /// Number of root parameters.
    pub fn parameter_count(&self) -> u32 {
        self.desc.parameters.len() as u32
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        self.release.release(NativeObject::RootSignature(self.native));
    }
}

impl fmt::Debug for RootSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSignature")
            .field("name", &self.name)
            .field("parameters", &self.desc.parameters.len())
            .finish()
    }
}
