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


//! Pass declaration: flags, resource accesses and the bind closure.

use crate::resource::{GraphResource, RgBuffer, RgHandle, RgTexture};
use keel_core::rhi::{QueueType, ResourceStates};
use keel_rhi::{Buffer, CommandContext, Texture};
use std::fmt;
use std::sync::Arc;

keel_core::keel_bitflags! {
    /// What kind of work a pass records.
    pub struct PassFlags: u32 {
        /// Draws; gets an automatic render pass over its attachments.
        const RASTER = 1 << 0;
        /// Dispatches.
        const COMPUTE = 1 << 1;
        /// Copies.
        const COPY = 1 << 2;
        /// Never removed by culling.
        const NEVER_CULL = 1 << 3;
        /// The closure opens its own render pass.
        const SKIP_AUTO_RENDER_PASS = 1 << 4;
    }
}

/// Identifies a pass in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) usize);

impl PassId {
    /// Registration index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// The closure recording a pass.
pub type BindFn = Box<dyn FnOnce(&mut CommandContext, &PassResources<'_>) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Access {
    pub handle: RgHandle,
    pub state: ResourceStates,
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ColorAttachment {
    pub texture: RgTexture,
    pub clear: Option<[f32; 4]>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DepthAttachment {
    pub texture: RgTexture,
    pub clear: Option<(f32, u8)>,
    pub read_only: bool,
}

/// The state of one resource over a whole pass, every access merged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Usage {
    pub index: usize,
    pub state: ResourceStates,
    pub read: bool,
    pub write: bool,
}

pub(crate) struct Pass {
    pub name: String,
    pub flags: PassFlags,
    pub queue: QueueType,
    pub accesses: Vec<Access>,
    pub colors: Vec<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
    pub bind: Option<BindFn>,
}

impl Pass {
    pub fn new(name: String, flags: PassFlags) -> Self {
        Self {
            name,
            flags,
            queue: QueueType::Graphics,
            accesses: Vec::new(),
            colors: Vec::new(),
            depth: None,
            bind: None,
        }
    }

    /// One entry per resource, in first-access order. A resource both read
    /// and written takes its write state; read states combine. Compilation
    /// rejects a pass writing one resource in two states.
    pub fn usages(&self) -> Vec<Usage> {
        let mut usages: Vec<Usage> = Vec::with_capacity(self.accesses.len());
        for access in &self.accesses {
            let index = access.handle.index as usize;
            match usages.iter_mut().find(|u| u.index == index) {
                Some(usage) => {
                    if access.write && !usage.write {
                        usage.state = access.state;
                    } else if access.write == usage.write {
                        usage.state |= access.state;
                    }
                    usage.read |= access.read;
                    usage.write |= access.write;
                }
                None => usages.push(Usage {
                    index,
                    state: access.state,
                    read: access.read,
                    write: access.write,
                }),
            }
        }
        usages
    }

    pub fn has_attachments(&self) -> bool {
        !self.colors.is_empty() || self.depth.is_some()
    }

    fn default_read_state(&self) -> ResourceStates {
        if self.flags.contains(PassFlags::COPY) {
            ResourceStates::COPY_SOURCE
        } else if self.flags.contains(PassFlags::RASTER) {
            ResourceStates::ALL_SHADER_RESOURCE
        } else {
            ResourceStates::NON_PIXEL_SHADER_RESOURCE
        }
    }

    fn default_write_state(&self) -> ResourceStates {
        if self.flags.contains(PassFlags::COPY) {
            ResourceStates::COPY_DEST
        } else {
            ResourceStates::UNORDERED_ACCESS
        }
    }
}

impl fmt::Debug for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("queue", &self.queue)
            .field("accesses", &self.accesses)
            .field("bound", &self.bind.is_some())
            .finish()
    }
}

/// Declares the accesses of a pass.
///
/// Returned by [`RenderGraph::add_pass`](crate::RenderGraph::add_pass);
/// finish with [`bind`](Self::bind) or [`build`](Self::build).
///
/// ```ignore
/// graph
///     .add_pass("Blur", PassFlags::COMPUTE)
///     .read(input)
///     .write(output)
///     .bind(move |ctx, res| {
///         ctx.set_root_constants(0, &[res.texture(input).srv_index()]);
///         ctx.dispatch_threads(1920, 1080, 1);
///         Ok(())
///     });
/// ```
pub struct PassBuilder<'g> {
    pass: &'g mut Pass,
    id: PassId,
}

impl<'g> PassBuilder<'g> {
    pub(crate) fn new(pass: &'g mut Pass, id: PassId) -> Self {
        Self { pass, id }
    }

    fn access(self, handle: RgHandle, state: ResourceStates, read: bool, write: bool) -> Self {
        self.pass.accesses.push(Access {
            handle,
            state,
            read,
            write,
        });
        self
    }

    /// Reads a resource in the default state for the pass kind: copy source
    /// for copies, any shader resource for raster passes, non-pixel shader
    /// resource otherwise.
    pub fn read(self, handle: impl Into<RgHandle>) -> Self {
        let state = self.pass.default_read_state();
        self.access(handle.into(), state, true, false)
    }

    /// Reads a resource in an explicit read-only state.
    pub fn read_as(self, handle: impl Into<RgHandle>, state: ResourceStates) -> Self {
        keel_core::rhi_check!(
            state.is_read_only(),
            "pass '{}' reads in a writable state {:?}",
            self.pass.name,
            state
        );
        self.access(handle.into(), state, true, false)
    }

    /// Writes a resource: copy destination for copies, unordered access
    /// otherwise.
    pub fn write(self, handle: impl Into<RgHandle>) -> Self {
        let state = self.pass.default_write_state();
        self.access(handle.into(), state, false, true)
    }

    /// Writes a resource in an explicit state.
    pub fn write_as(self, handle: impl Into<RgHandle>, state: ResourceStates) -> Self {
        self.access(handle.into(), state, false, true)
    }

    /// Reads and then writes a resource, keeping its previous content.
    pub fn read_write(self, handle: impl Into<RgHandle>) -> Self {
        let state = self.pass.default_write_state();
        self.access(handle.into(), state, true, true)
    }

    /// Overwrites a color attachment.
    pub fn render_target(self, texture: RgTexture) -> Self {
        self.color(texture, None, false)
    }

    /// Clears a color attachment before drawing.
    pub fn render_target_cleared(self, texture: RgTexture, color: [f32; 4]) -> Self {
        self.color(texture, Some(color), false)
    }

    /// Draws over the existing content of a color attachment.
    pub fn blend_render_target(self, texture: RgTexture) -> Self {
        self.color(texture, None, true)
    }

    fn color(self, texture: RgTexture, clear: Option<[f32; 4]>, read: bool) -> Self {
        self.pass.colors.push(ColorAttachment { texture, clear });
        self.access(texture.0, ResourceStates::RENDER_TARGET, read, true)
    }

    /// Depth tests and writes against the existing depth content.
    pub fn depth_stencil(self, texture: RgTexture) -> Self {
        self.depth(texture, None, false)
    }

    /// Clears the depth attachment before drawing.
    pub fn depth_stencil_cleared(self, texture: RgTexture, depth: f32, stencil: u8) -> Self {
        self.depth(texture, Some((depth, stencil)), false)
    }

    /// Depth tests without writing.
    pub fn depth_stencil_read_only(self, texture: RgTexture) -> Self {
        self.depth(texture, None, true)
    }

    fn depth(self, texture: RgTexture, clear: Option<(f32, u8)>, read_only: bool) -> Self {
        keel_core::rhi_check!(
            self.pass.depth.is_none(),
            "pass '{}' declares two depth attachments",
            self.pass.name
        );
        self.pass.depth = Some(DepthAttachment {
            texture,
            clear,
            read_only,
        });
        if read_only {
            self.access(texture.0, ResourceStates::DEPTH_READ, true, false)
        } else {
            // A cleared attachment has no previous content to depend on.
            self.access(texture.0, ResourceStates::DEPTH_WRITE, clear.is_none(), true)
        }
    }

    /// Runs the pass on another queue.
    pub fn queue(self, queue: QueueType) -> Self {
        self.pass.queue = queue;
        self
    }

    /// Sets the closure that records the pass and finishes the declaration.
    pub fn bind<F>(self, record: F) -> PassId
    where
        F: FnOnce(&mut CommandContext, &PassResources<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.pass.bind = Some(Box::new(record));
        self.id
    }

    /// Finishes a pass that records nothing besides its barriers and
    /// automatic render pass.
    pub fn build(self) -> PassId {
        self.id
    }
}

/// The concrete resources visible to a pass closure.
pub struct PassResources<'a> {
    pub(crate) pass: &'a str,
    pub(crate) graph: u32,
    pub(crate) resources: &'a [Option<GraphResource>],
}

impl<'a> PassResources<'a> {
    /// The concrete resource behind `handle`, if the graph allocated one.
    pub fn get(&self, handle: impl Into<RgHandle>) -> Option<&'a GraphResource> {
        let handle = handle.into();
        if handle.graph != self.graph {
            return None;
        }
        self.resources.get(handle.index as usize).and_then(Option::as_ref)
    }

    /// The texture behind `texture`.
    ///
    /// # Panics
    ///
    /// If the pass never declared the texture.
    pub fn texture(&self, texture: RgTexture) -> &'a Arc<Texture> {
        match self.get(texture).and_then(GraphResource::as_texture) {
            Some(texture) => texture,
            None => keel_core::rhi_fatal!(
                "pass '{}' uses texture #{} without declaring it",
                self.pass,
                texture.0.index
            ),
        }
    }

    /// The buffer behind `buffer`.
    ///
    /// # Panics
    ///
    /// If the pass never declared the buffer.
    pub fn buffer(&self, buffer: RgBuffer) -> &'a Arc<Buffer> {
        match self.get(buffer).and_then(GraphResource::as_buffer) {
            Some(buffer) => buffer,
            None => keel_core::rhi_fatal!(
                "pass '{}' uses buffer #{} without declaring it",
                self.pass,
                buffer.0.index
            ),
        }
    }

    /// The name of the running pass.
    pub fn pass_name(&self) -> &str {
        self.pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(index: u32) -> RgHandle {
        RgHandle { graph: 1, index }
    }

    // ─── Default states ────────────────────────────────────────────────────

    #[test]
    fn test_default_states_follow_the_pass_kind() {
        let mut copy = Pass::new("copy".into(), PassFlags::COPY);
        PassBuilder::new(&mut copy, PassId(0)).read(handle(0)).write(handle(1)).build();
        assert_eq!(copy.accesses[0].state, ResourceStates::COPY_SOURCE);
        assert_eq!(copy.accesses[1].state, ResourceStates::COPY_DEST);

        let mut raster = Pass::new("raster".into(), PassFlags::RASTER);
        PassBuilder::new(&mut raster, PassId(1)).read(handle(0)).build();
        assert_eq!(raster.accesses[0].state, ResourceStates::ALL_SHADER_RESOURCE);

        let mut compute = Pass::new("compute".into(), PassFlags::COMPUTE);
        PassBuilder::new(&mut compute, PassId(2)).read(handle(0)).write(handle(1)).build();
        assert_eq!(compute.accesses[0].state, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
        assert_eq!(compute.accesses[1].state, ResourceStates::UNORDERED_ACCESS);
    }

    #[test]
    fn test_cleared_depth_is_a_pure_write() {
        let texture = RgTexture(handle(3));
        let mut pass = Pass::new("depth".into(), PassFlags::RASTER);
        PassBuilder::new(&mut pass, PassId(0)).depth_stencil_cleared(texture, 1.0, 0).build();
        assert!(!pass.accesses[0].read);
        assert!(pass.accesses[0].write);

        let mut pass = Pass::new("depth".into(), PassFlags::RASTER);
        PassBuilder::new(&mut pass, PassId(0)).depth_stencil(texture).build();
        assert!(pass.accesses[0].read && pass.accesses[0].write);
    }

    // ─── Usage merging ─────────────────────────────────────────────────────

    #[test]
    fn test_write_state_wins_when_merging() {
        let mut pass = Pass::new("rmw".into(), PassFlags::COMPUTE);
        PassBuilder::new(&mut pass, PassId(0)).read(handle(0)).write(handle(0)).read(handle(1)).build();
        let usages = pass.usages();
        assert_eq!(usages.len(), 2);
        assert_eq!(usages[0].state, ResourceStates::UNORDERED_ACCESS);
        assert!(usages[0].read && usages[0].write);
        assert_eq!(usages[1].index, 1);
    }

    #[test]
    fn test_reads_union_their_states() {
        let mut pass = Pass::new("reads".into(), PassFlags::COMPUTE);
        PassBuilder::new(&mut pass, PassId(0))
            .read(handle(0))
            .read_as(handle(0), ResourceStates::INDIRECT_ARGUMENT)
            .build();
        let usages = pass.usages();
        assert_eq!(
            usages[0].state,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE | ResourceStates::INDIRECT_ARGUMENT
        );
    }

    #[test]
    fn test_queue_defaults_to_graphics() {
        let mut pass = Pass::new("async".into(), PassFlags::COMPUTE);
        assert_eq!(pass.queue, QueueType::Graphics);
        PassBuilder::new(&mut pass, PassId(0)).queue(QueueType::Compute).build();
        assert_eq!(pass.queue, QueueType::Compute);
    }
}
