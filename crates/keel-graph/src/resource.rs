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


//! Virtual resource handles and the concrete resources they resolve to.

use keel_core::rhi::{BufferDesc, ResourceStates, TextureDesc};
use keel_rhi::{Buffer, Device, Resource, RhiError, Texture};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) fn next_graph_id() -> u32 {
    NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)
}

/// An untyped handle to a resource declared on one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgHandle {
    pub(crate) graph: u32,
    pub(crate) index: u32,
}

impl RgHandle {
    /// Position of the resource in declaration order.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// A handle to a texture declared on a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgTexture(pub(crate) RgHandle);

/// A handle to a buffer declared on a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RgBuffer(pub(crate) RgHandle);

impl RgTexture {
    /// The untyped handle.
    pub fn handle(self) -> RgHandle {
        self.0
    }
}

impl RgBuffer {
    /// The untyped handle.
    pub fn handle(self) -> RgHandle {
        self.0
    }
}

impl From<RgTexture> for RgHandle {
    fn from(texture: RgTexture) -> Self {
        texture.0
    }
}

impl From<RgBuffer> for RgHandle {
    fn from(buffer: RgBuffer) -> Self {
        buffer.0
    }
}

/// The descriptor of a virtual resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RgResourceDesc {
    /// A buffer.
    Buffer(BufferDesc),
    /// A texture.
    Texture(TextureDesc),
}

impl RgResourceDesc {
    /// Returns `true` if a resource created with `self` can stand in for one
    /// requested with `requested`.
    pub fn is_compatible(&self, requested: &RgResourceDesc) -> bool {
        match (self, requested) {
            (Self::Buffer(a), Self::Buffer(b)) => a.is_compatible(b),
            (Self::Texture(a), Self::Texture(b)) => a.is_compatible(b),
            _ => false,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Texture(_) => "texture",
        }
    }
}

/// A concrete resource backing a graph handle.
#[derive(Clone)]
pub enum GraphResource {
    /// A buffer.
    Buffer(Arc<Buffer>),
    /// A texture.
    Texture(Arc<Texture>),
}

impl GraphResource {
    /// Creates a resource for `desc`.
    pub fn create(device: &Device, desc: &RgResourceDesc, name: &str) -> Result<Self, RhiError> {
        Ok(match desc {
            RgResourceDesc::Buffer(desc) => Self::Buffer(Buffer::new(device, *desc, name)?),
            RgResourceDesc::Texture(desc) => Self::Texture(Texture::new(device, *desc, name)?),
        })
    }

    /// The underlying resource.
    pub fn resource(&self) -> &Arc<Resource> {
        match self {
            Self::Buffer(buffer) => buffer.resource(),
            Self::Texture(texture) => texture.resource(),
        }
    }

    /// The descriptor the resource was created with.
    pub fn desc(&self) -> RgResourceDesc {
        match self {
            Self::Buffer(buffer) => RgResourceDesc::Buffer(*buffer.desc()),
            Self::Texture(texture) => RgResourceDesc::Texture(*texture.desc()),
        }
    }

    /// The buffer, if this is one.
    pub fn as_buffer(&self) -> Option<&Arc<Buffer>> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            Self::Texture(_) => None,
        }
    }

    /// The texture, if this is one.
    pub fn as_texture(&self) -> Option<&Arc<Texture>> {
        match self {
            Self::Texture(texture) => Some(texture),
            Self::Buffer(_) => None,
        }
    }

    /// Returns `true` if both wrap the same GPU object.
    pub fn ptr_eq(&self, other: &GraphResource) -> bool {
        Arc::ptr_eq(self.resource(), other.resource())
    }
}

impl fmt::Debug for GraphResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(&buffer.resource().name()).finish(),
            Self::Texture(texture) => f.debug_tuple("Texture").field(&texture.resource().name()).finish(),
        }
    }
}

/// A slot outside the graph that keeps a texture alive across frames.
///
/// A graph declares the texture with
/// [`RenderGraph::create_persistent_texture`](crate::RenderGraph::create_persistent_texture)
/// and the slot receives the concrete texture when the graph executes.
#[derive(Clone, Default)]
pub struct PersistentTexture(Arc<Mutex<Option<Arc<Texture>>>>);

/// A slot outside the graph that keeps a buffer alive across frames.
#[derive(Clone, Default)]
pub struct PersistentBuffer(Arc<Mutex<Option<Arc<Buffer>>>>);

impl PersistentTexture {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The published texture.
    pub fn get(&self) -> Option<Arc<Texture>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forgets the published texture.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn set(&self, texture: Arc<Texture>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(texture);
    }
}

impl PersistentBuffer {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The published buffer.
    pub fn get(&self) -> Option<Arc<Buffer>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forgets the published buffer.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn set(&self, buffer: Arc<Buffer>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(buffer);
    }
}

impl fmt::Debug for PersistentTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PersistentTexture").field(&self.get().map(|t| t.resource().name().to_owned())).finish()
    }
}

impl fmt::Debug for PersistentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PersistentBuffer").field(&self.get().map(|b| b.resource().name().to_owned())).finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ExportSlot {
    Texture(PersistentTexture),
    Buffer(PersistentBuffer),
}

impl ExportSlot {
    pub(crate) fn publish(&self, resource: &GraphResource) {
        match (self, resource) {
            (Self::Texture(slot), GraphResource::Texture(texture)) => slot.set(texture.clone()),
            (Self::Buffer(slot), GraphResource::Buffer(buffer)) => slot.set(buffer.clone()),
            _ => keel_core::rhi_fatal!("export slot kind does not match '{}'", resource.resource().name()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Export {
    pub slot: ExportSlot,
    pub state: Option<ResourceStates>,
}

#[derive(Debug, Clone)]
pub(crate) enum Origin {
    /// Owned by the frame and drawn from the transient pool.
    Transient,
    /// Owned by the caller.
    Imported(GraphResource),
    /// Kept alive across frames by an export slot; `Some` when the slot
    /// already held a compatible resource.
    Persistent(Option<GraphResource>),
}

#[derive(Debug, Clone)]
pub(crate) struct VirtualResource {
    pub name: String,
    pub desc: RgResourceDesc,
    pub origin: Origin,
    pub export: Option<Export>,
    /// Number of passes registered before the resource was declared.
    pub declared_at: usize,
}

impl VirtualResource {
    /// Content exists before the first pass of the frame runs.
    pub fn is_initialized(&self) -> bool {
        matches!(self.origin, Origin::Imported(_) | Origin::Persistent(Some(_)))
    }

    /// Writes to the resource are observable outside the graph.
    pub fn is_sink(&self) -> bool {
        self.export.is_some() || !matches!(self.origin, Origin::Transient)
    }

    /// Drawn from and returned to the transient pool.
    pub fn is_pooled(&self) -> bool {
        matches!(self.origin, Origin::Transient) && self.export.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::{BufferFlags, Format, TextureFlags};

    // ─── Descriptors ───────────────────────────────────────────────────────

    #[test]
    fn test_buffer_and_texture_descs_never_match() {
        let buffer = RgResourceDesc::Buffer(BufferDesc::byte_address(256, BufferFlags::UNORDERED_ACCESS));
        let texture = RgResourceDesc::Texture(TextureDesc::new_2d(4, 4, Format::R8G8B8A8Unorm, TextureFlags::EMPTY));
        assert!(!buffer.is_compatible(&texture));
        assert!(!texture.is_compatible(&buffer));
        assert!(buffer.is_compatible(&buffer));
    }

    #[test]
    fn test_usage_superset_is_compatible() {
        let plain = RgResourceDesc::Texture(TextureDesc::new_2d(64, 64, Format::R8G8B8A8Unorm, TextureFlags::EMPTY));
        let uav = RgResourceDesc::Texture(TextureDesc::new_2d(
            64,
            64,
            Format::R8G8B8A8Unorm,
            TextureFlags::UNORDERED_ACCESS,
        ));
        assert!(uav.is_compatible(&plain));
        assert!(!plain.is_compatible(&uav));
    }

    // ─── Slots ─────────────────────────────────────────────────────────────

    #[test]
    fn test_slots_share_state_between_clones() {
        let slot = PersistentBuffer::new();
        let clone = slot.clone();
        assert!(clone.get().is_none());
        slot.clear();
        assert!(slot.get().is_none());
    }
}
