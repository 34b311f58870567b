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


//! The per-frame render graph.

use crate::blackboard::Blackboard;
use crate::compile::Compiled;
use crate::dump;
use crate::error::GraphError;
use crate::execute::{self, GraphReport};
use crate::pass::{Pass, PassBuilder, PassFlags, PassId};
use crate::pool::TransientPool;
use crate::resource::{
    next_graph_id, Export, ExportSlot, GraphResource, Origin, PersistentBuffer, PersistentTexture, RgBuffer, RgHandle,
    RgResourceDesc, RgTexture, VirtualResource,
};
use keel_core::rhi::{BufferDesc, ResourceStates, TextureDesc};
use keel_core::thread::is_main_thread;
use keel_rhi::{Buffer, Device, SyncPoint, Texture};
use std::sync::Arc;

/// A frame's worth of passes and the resources they exchange.
///
/// Build a graph on the owning thread, declare resources and passes in
/// execution order, then [`execute`](Self::execute) it; compilation runs on
/// demand. Transient resources come from the device's [`TransientPool`]
/// and go back to it once the frame's fence completes.
pub struct RenderGraph {
    id: u32,
    device: Arc<Device>,
    pool: Arc<TransientPool>,
    enable_culling: bool,
    resources: Vec<VirtualResource>,
    passes: Vec<Pass>,
    blackboard: Blackboard,
    compiled: Option<Compiled>,
}

impl RenderGraph {
    /// Creates an empty graph and evicts idle pooled resources.
    pub fn new(device: &Arc<Device>) -> Self {
        keel_core::rhi_check!(is_main_thread(), "a render graph must be built on the main thread");
        let pool = TransientPool::for_device(device);
        pool.evict(device.frame_index());
        Self {
            id: next_graph_id(),
            device: device.clone(),
            pool,
            enable_culling: device.settings().graph.enable_culling,
            resources: Vec::new(),
            passes: Vec::new(),
            blackboard: Blackboard::new(),
            compiled: None,
        }
    }

    /// The device the graph records on.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn declare(&mut self, name: &str, desc: RgResourceDesc, origin: Origin) -> RgHandle {
        keel_core::rhi_check!(
            self.compiled.is_none(),
            "resource '{}' declared after the graph was compiled",
            name
        );
        let handle = RgHandle {
            graph: self.id,
            index: self.resources.len() as u32,
        };
        self.resources.push(VirtualResource {
            name: name.to_owned(),
            desc,
            origin,
            export: None,
            declared_at: self.passes.len(),
        });
        handle
    }

    // ─── Resources ─────────────────────────────────────────────────────────

    /// Declares a transient texture.
    pub fn create_texture(&mut self, name: &str, desc: TextureDesc) -> RgTexture {
        RgTexture(self.declare(name, RgResourceDesc::Texture(desc), Origin::Transient))
    }

    /// Declares a transient buffer.
    pub fn create_buffer(&mut self, name: &str, desc: BufferDesc) -> RgBuffer {
        RgBuffer(self.declare(name, RgResourceDesc::Buffer(desc), Origin::Transient))
    }

    /// Wraps a texture owned by the caller.
    pub fn import_texture(&mut self, texture: &Arc<Texture>) -> RgTexture {
        let desc = RgResourceDesc::Texture(*texture.desc());
        let origin = Origin::Imported(GraphResource::Texture(texture.clone()));
        RgTexture(self.declare(texture.resource().name(), desc, origin))
    }

    /// Wraps a buffer owned by the caller.
    pub fn import_buffer(&mut self, buffer: &Arc<Buffer>) -> RgBuffer {
        let desc = RgResourceDesc::Buffer(*buffer.desc());
        let origin = Origin::Imported(GraphResource::Buffer(buffer.clone()));
        RgBuffer(self.declare(buffer.resource().name(), desc, origin))
    }

    /// Imports `texture`, or `fallback` when there is none.
    pub fn try_import_texture(&mut self, texture: Option<&Arc<Texture>>, fallback: &Arc<Texture>) -> RgTexture {
        self.import_texture(texture.unwrap_or(fallback))
    }

    /// Imports `buffer`, or `fallback` when there is none.
    pub fn try_import_buffer(&mut self, buffer: Option<&Arc<Buffer>>, fallback: &Arc<Buffer>) -> RgBuffer {
        self.import_buffer(buffer.unwrap_or(fallback))
    }

    /// Declares a texture that outlives the frame in `slot`.
    ///
    /// The texture already in the slot is reused when it matches `desc`, and
    /// its content is visible to the first pass; otherwise a new one is
    /// created. Either way the slot holds it after execution.
    pub fn create_persistent_texture(&mut self, name: &str, desc: TextureDesc, slot: &PersistentTexture) -> RgTexture {
        let requested = RgResourceDesc::Texture(desc);
        let existing = slot
            .get()
            .map(GraphResource::Texture)
            .filter(|t| t.desc().is_compatible(&requested));
        let handle = self.declare(name, requested, Origin::Persistent(existing));
        self.resources[handle.index as usize].export = Some(Export {
            slot: ExportSlot::Texture(slot.clone()),
            state: None,
        });
        RgTexture(handle)
    }

    /// Declares a buffer that outlives the frame in `slot`.
    pub fn create_persistent_buffer(&mut self, name: &str, desc: BufferDesc, slot: &PersistentBuffer) -> RgBuffer {
        let requested = RgResourceDesc::Buffer(desc);
        let existing = slot
            .get()
            .map(GraphResource::Buffer)
            .filter(|b| b.desc().is_compatible(&requested));
        let handle = self.declare(name, requested, Origin::Persistent(existing));
        self.resources[handle.index as usize].export = Some(Export {
            slot: ExportSlot::Buffer(slot.clone()),
            state: None,
        });
        RgBuffer(handle)
    }

    fn export(&mut self, handle: RgHandle, slot: ExportSlot, state: Option<ResourceStates>) -> Result<(), GraphError> {
        if handle.graph != self.id {
            return Err(GraphError::ForeignHandle {
                pass: "<export>".to_owned(),
            });
        }
        let Some(resource) = self.resources.get_mut(handle.index as usize) else {
            return Err(GraphError::UndeclaredResource {
                pass: "<export>".to_owned(),
                index: handle.index,
            });
        };
        if matches!(resource.origin, Origin::Imported(_)) {
            return Err(GraphError::ExportOfImported {
                resource: resource.name.clone(),
            });
        }
        resource.export = Some(Export { slot, state });
        Ok(())
    }

    /// Keeps `texture` alive after the frame in `slot`, optionally leaving
    /// it in `state`.
    pub fn export_texture(
        &mut self,
        texture: RgTexture,
        slot: &PersistentTexture,
        state: Option<ResourceStates>,
    ) -> Result<(), GraphError> {
        self.export(texture.0, ExportSlot::Texture(slot.clone()), state)
    }

    /// Keeps `buffer` alive after the frame in `slot`, optionally leaving it
    /// in `state`.
    pub fn export_buffer(
        &mut self,
        buffer: RgBuffer,
        slot: &PersistentBuffer,
        state: Option<ResourceStates>,
    ) -> Result<(), GraphError> {
        self.export(buffer.0, ExportSlot::Buffer(slot.clone()), state)
    }

    // ─── Passes ────────────────────────────────────────────────────────────

    /// Adds a pass; passes run in the order they are added.
    pub fn add_pass(&mut self, name: &str, flags: PassFlags) -> PassBuilder<'_> {
        keel_core::rhi_check!(is_main_thread(), "pass '{}' added off the main thread", name);
        keel_core::rhi_check!(
            self.compiled.is_none(),
            "pass '{}' added after the graph was compiled",
            name
        );
        let index = self.passes.len();
        self.passes.push(Pass::new(name.to_owned(), flags));
        PassBuilder::new(&mut self.passes[index], PassId(index))
    }

    /// Number of passes added.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Number of resources declared.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// The side channel shared by the passes.
    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    /// The side channel shared by the passes, mutably.
    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    // ─── Compilation ───────────────────────────────────────────────────────

    /// Validates the graph, culls dead passes, assigns concrete resources
    /// and plans barriers. Compiling twice is a no-op.
    pub fn compile(&mut self) -> Result<(), GraphError> {
        keel_core::rhi_check!(is_main_thread(), "a render graph must be compiled on the main thread");
        if self.compiled.is_some() {
            return Ok(());
        }
        let compiled = Compiled::build(
            &self.device,
            &self.pool,
            self.id,
            &self.passes,
            &self.resources,
            self.enable_culling,
        )?;
        self.compiled = Some(compiled);
        Ok(())
    }

    /// Returns `true` once compiled.
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Returns `true` if compilation removed the pass.
    pub fn is_culled(&self, pass: PassId) -> bool {
        self.compiled.as_ref().is_some_and(|c| !c.live[pass.0])
    }

    /// The concrete resource behind `handle`, once compiled.
    pub fn resolved(&self, handle: impl Into<RgHandle>) -> Option<&GraphResource> {
        let handle = handle.into();
        if handle.graph != self.id {
            return None;
        }
        self.compiled.as_ref()?.resolved.get(handle.index as usize)?.as_ref()
    }

    /// The concrete texture behind `texture`, once compiled.
    pub fn resolved_texture(&self, texture: RgTexture) -> Option<&Arc<Texture>> {
        self.resolved(texture)?.as_texture()
    }

    /// The concrete buffer behind `buffer`, once compiled.
    pub fn resolved_buffer(&self, buffer: RgBuffer) -> Option<&Arc<Buffer>> {
        self.resolved(buffer)?.as_buffer()
    }

    /// The graph in Graphviz dot syntax, culled passes dashed once
    /// compiled.
    pub fn dump_graphviz(&self) -> String {
        let live = self.compiled.as_ref().map(|c| c.live.as_slice());
        dump::graphviz(&self.passes, &self.resources, live)
    }

    // ─── Execution ─────────────────────────────────────────────────────────

    /// Compiles if needed, then records and submits every surviving pass.
    ///
    /// A pass whose closure fails is logged and reported; its barriers are
    /// still submitted and the rest of the frame runs. Pooled transients
    /// return to the pool whether or not submission succeeds.
    pub fn execute(mut self) -> Result<GraphReport, GraphError> {
        keel_core::rhi_check!(is_main_thread(), "a render graph must execute on the main thread");
        let compiled = match self.compiled.take() {
            Some(compiled) => compiled,
            None => Compiled::build(
                &self.device,
                &self.pool,
                self.id,
                &self.passes,
                &self.resources,
                self.enable_culling,
            )?,
        };
        let result = execute::run(&self.device, self.id, &mut self.passes, &self.resources, &compiled);

        // Transients go back even when a submission failed half way; the
        // frame fence covers whatever did reach a queue.
        let fence = self.device.frame_fence();
        let sync = SyncPoint::new(fence.clone(), fence.current_value());
        let frame = self.device.frame_index();
        for resource in compiled.pooled() {
            self.pool.release(resource.clone(), sync.clone(), frame);
        }

        let report = result?;
        log::trace!(
            "Render graph executed {} pass(es), culled {}",
            report.executed.len(),
            report.culled.len()
        );
        Ok(report)
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        // Compiled but never executed: nothing touched the pooled resources.
        if let Some(compiled) = self.compiled.take() {
            let fence = self.device.frame_fence();
            let sync = SyncPoint::new(fence.clone(), fence.last_completed_value());
            for resource in compiled.pooled() {
                self.pool.release(resource.clone(), sync.clone(), self.device.frame_index());
            }
        }
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("id", &self.id)
            .field("passes", &self.passes.len())
            .field("resources", &self.resources.len())
            .field("compiled", &self.compiled.is_some())
            .finish()
    }
}
