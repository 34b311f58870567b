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

//! Indirect command signatures.

use super::RootSignature;
use crate::device::Device;
use crate::error::RhiError;
use crate::release::DeferredReleaseQueue;
use keel_core::rhi::{CommandSignatureDesc, IndirectArgument, NativeCommandSignature, NativeObject};
use std::fmt;
use std::sync::Arc;

/// Layout of the commands in an indirect argument buffer.
pub struct CommandSignature {
    name: String,
    desc: CommandSignatureDesc,
    native: NativeCommandSignature,
    root_signature: Option<Arc<RootSignature>>,
    release: Arc<DeferredReleaseQueue>,
}

impl CommandSignature {
    /// Creates a signature. Arguments that change root parameters need the
    /// root signature they apply to.
    pub fn new(
        device: &Device,
        desc: CommandSignatureDesc,
        root_signature: Option<Arc<RootSignature>>,
        name: &str,
    ) -> Result<Arc<Self>, RhiError> {
        if desc.arguments.iter().any(IndirectArgument::changes_root) && root_signature.is_none() {
            return Err(RhiError::InvalidResource {
                name: name.to_string(),
                reason: "root arguments need a root signature".into(),
            });
        }
        let native = device
            .native()
            .create_command_signature(&desc, root_signature.as_ref().map(|r| r.native()))?;
        device.native().set_name(NativeObject::CommandSignature(native), name);
        Ok(Arc::new(Self {
            name: name.to_string(),
            desc,
            native,
            root_signature,
            release: device.release_queue().clone(),
        }))
    }

    /// A signature of plain draws.
    pub fn draw(device: &Device) -> Result<Arc<Self>, RhiError> {
        Self::simple(device, IndirectArgument::Draw, "Draw Signature")
    }

    /// A signature of plain indexed draws.
    pub fn draw_indexed(device: &Device) -> Result<Arc<Self>, RhiError> {
        Self::simple(device, IndirectArgument::DrawIndexed, "DrawIndexed Signature")
    }

    /// A signature of plain dispatches.
    pub fn dispatch(device: &Device) -> Result<Arc<Self>, RhiError> {
        Self::simple(device, IndirectArgument::Dispatch, "Dispatch Signature")
    }

    fn simple(device: &Device, argument: IndirectArgument, name: &str) -> Result<Arc<Self>, RhiError> {
        let desc = CommandSignatureDesc {
            byte_stride: argument.size(),
            arguments: vec![argument],
        };
        Self::new(device, desc, None, name)
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description.
    pub fn desc(&self) -> &CommandSignatureDesc {
        &self.desc
    }

    /// Distance between commands.
    pub fn stride(&self) -> u32 {
        self.desc.byte_stride
    }

    /// The native handle.
    pub fn native(&self) -> NativeCommandSignature {
        self.native
    }

    /// The root signature root arguments apply to.
    pub fn root_signature(&self) -> Option<&Arc<RootSignature>> {
        self.root_signature.as_ref()
    }

    /// The final draw or dispatch argument.
    pub fn operation(&self) -> Option<IndirectArgument> {
        self.desc.arguments.last().copied()
    }
}

impl Drop for CommandSignature {
    fn drop(&mut self) {
        self.release.release(NativeObject::CommandSignature(self.native));
    }
}

impl fmt::Debug for CommandSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSignature")
            .field("name", &self.name)
            .field("stride", &self.desc.byte_stride)
            .field("arguments", &self.desc.arguments)
            .finish()
    }
}
