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

//! Raytracing and work graph state objects.

use super::RootSignature;
use crate::device::Device;
use crate::error::RhiError;
use crate::release::DeferredReleaseQueue;
use crate::shader::{Shader, ShaderDesc};
use keel_core::rhi::{
    ExportDesc, HitGroupType, NativeDevice, NativeObject, NativeStateObject, RaytracingTier, StateObjectStream,
    StateObjectType, StateSubobject,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A hit group: the shaders run when a ray hits a geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroupDesc {
    /// Export name of the group.
    pub name: String,
    /// Geometry kind.
    pub ty: HitGroupType,
    /// Closest-hit export.
    pub closest_hit: Option<String>,
    /// Any-hit export.
    pub any_hit: Option<String>,
    /// Intersection export, for procedural geometry.
    pub intersection: Option<String>,
}

impl HitGroupDesc {
    /// A triangle hit group.
    pub fn triangles(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: HitGroupType::Triangles,
            closest_hit: None,
            any_hit: None,
            intersection: None,
        }
    }

    /// A procedural hit group using `intersection`.
    pub fn procedural(name: impl Into<String>, intersection: impl Into<String>) -> Self {
        Self {
            ty: HitGroupType::ProceduralPrimitive,
            intersection: Some(intersection.into()),
            ..Self::triangles(name)
        }
    }

    /// Sets the closest-hit shader.
    pub fn closest_hit(mut self, export: impl Into<String>) -> Self {
        self.closest_hit = Some(export.into());
        self
    }

    /// Sets the any-hit shader.
    pub fn any_hit(mut self, export: impl Into<String>) -> Self {
        self.any_hit = Some(export.into());
        self
    }
}

/// Declares a state object.
#[derive(Debug, Clone)]
pub struct StateObjectBuilder {
    name: String,
    ty: StateObjectType,
    libraries: Vec<(ShaderDesc, Vec<ExportDesc>)>,
    hit_groups: Vec<HitGroupDesc>,
    miss_shaders: Vec<String>,
    global_root_signature: Option<Arc<RootSignature>>,
    local_root_signatures: Vec<(Arc<RootSignature>, Vec<String>)>,
    max_payload_size: u32,
    max_attribute_size: u32,
    max_recursion_depth: u32,
    pipeline_flags: u32,
    config_flags: u32,
    work_graph: Option<(String, Vec<String>)>,
}

impl StateObjectBuilder {
    /// Starts a state object of kind `ty`.
    pub fn new(name: impl Into<String>, ty: StateObjectType) -> Self {
        Self {
            name: name.into(),
            ty,
            libraries: Vec::new(),
            hit_groups: Vec::new(),
            miss_shaders: Vec::new(),
            global_root_signature: None,
            local_root_signatures: Vec::new(),
            max_payload_size: 16,
            max_attribute_size: 8,
            max_recursion_depth: 1,
            pipeline_flags: 0,
            config_flags: 0,
            work_graph: None,
        }
    }

    /// Imports `exports` from a library under their own names.
    pub fn library(self, desc: ShaderDesc, exports: &[&str]) -> Self {
        let exports = exports
            .iter()
            .map(|name| ExportDesc {
                name: (*name).to_string(),
                export_to_rename: None,
            })
            .collect();
        self.library_with_exports(desc, exports)
    }

    /// Imports a library with explicit, possibly renamed, exports.
    pub fn library_with_exports(mut self, desc: ShaderDesc, exports: Vec<ExportDesc>) -> Self {
        self.libraries.push((desc, exports));
        self
    }

    /// Adds a hit group.
    pub fn hit_group(mut self, group: HitGroupDesc) -> Self {
        self.hit_groups.push(group);
        self
    }

    /// Declares an export as a miss shader.
    pub fn miss_shader(mut self, export: impl Into<String>) -> Self {
        self.miss_shaders.push(export.into());
        self
    }

    /// Sets the global root signature.
    pub fn global_root_signature(mut self, root_signature: Arc<RootSignature>) -> Self {
        self.global_root_signature = Some(root_signature);
        self
    }

    /// Associates a local root signature with `exports`.
    pub fn local_root_signature(mut self, root_signature: Arc<RootSignature>, exports: &[&str]) -> Self {
        let exports = exports.iter().map(|e| (*e).to_string()).collect();
        self.local_root_signatures.push((root_signature, exports));
        self
    }

    /// Sets the payload and attribute sizes.
    pub fn shader_config(mut self, max_payload_size: u32, max_attribute_size: u32) -> Self {
        self.max_payload_size = max_payload_size;
        self.max_attribute_size = max_attribute_size;
        self
    }

    /// Sets the recursion depth and pipeline flags.
    pub fn pipeline_config(mut self, max_recursion_depth: u32, flags: u32) -> Self {
        self.max_recursion_depth = max_recursion_depth;
        self.pipeline_flags = flags;
        self
    }

    /// Sets the state object config flags.
    pub fn config_flags(mut self, flags: u32) -> Self {
        self.config_flags = flags;
        self
    }

    /// Declares the work graph of a work graph state object.
    pub fn work_graph(mut self, name: impl Into<String>, entry_points: &[&str]) -> Self {
        self.work_graph = Some((name.into(), entry_points.iter().map(|e| (*e).to_string()).collect()));
        self
    }

    /// Linearizes the subobjects into a single stream.
    fn linearize(&self, libraries: &[Arc<Shader>]) -> StateObjectStream {
        let mut subobjects = Vec::new();
        if self.config_flags != 0 {
            subobjects.push(StateSubobject::Config {
                flags: self.config_flags,
            });
        }
        if let Some(root) = &self.global_root_signature {
            subobjects.push(StateSubobject::GlobalRootSignature(root.native()));
        }
        for (shader, (_, exports)) in libraries.iter().zip(&self.libraries) {
            subobjects.push(StateSubobject::DxilLibrary {
                bytecode: shader.bytecode().clone(),
                exports: exports.clone(),
            });
        }
        for group in &self.hit_groups {
            subobjects.push(StateSubobject::HitGroup {
                name: group.name.clone(),
                ty: group.ty,
                any_hit: group.any_hit.clone(),
                closest_hit: group.closest_hit.clone(),
                intersection: group.intersection.clone(),
            });
        }
        if self.ty != StateObjectType::WorkGraph {
            subobjects.push(StateSubobject::ShaderConfig {
                max_payload_size: self.max_payload_size,
                max_attribute_size: self.max_attribute_size,
            });
            subobjects.push(StateSubobject::PipelineConfig {
                max_recursion_depth: self.max_recursion_depth,
                flags: self.pipeline_flags,
            });
        }
        for (root, exports) in &self.local_root_signatures {
            subobjects.push(StateSubobject::LocalRootSignature(root.native()));
            subobjects.push(StateSubobject::SubobjectToExportsAssociation {
                subobject: subobjects.len() - 1,
                exports: exports.clone(),
            });
        }
        if let Some((name, entry_points)) = &self.work_graph {
            subobjects.push(StateSubobject::WorkGraph {
                name: name.clone(),
                entry_points: entry_points.clone(),
            });
        }
        StateObjectStream { ty: self.ty, subobjects }
    }

    /// Compiles the libraries and creates the state object.
    pub fn build(self, device: &Device) -> Result<Arc<StateObject>, RhiError> {
        if self.ty == StateObjectType::RaytracingPipeline
            && device.capabilities().raytracing == RaytracingTier::NotSupported
        {
            return Err(RhiError::UnsupportedDevice {
                adapter: device.adapter().name.clone(),
                reason: format!("'{}' needs raytracing", self.name),
            });
        }
        let manager = device.shader_manager()?;
        let libraries = self
            .libraries
            .iter()
            .map(|(desc, _)| manager.get_shader(desc))
            .collect::<Result<Vec<_>, _>>()?;

        let stream = self.linearize(&libraries);
        let exports: Vec<&str> = stream.export_names();
        if let Some(missing) = self.miss_shaders.iter().find(|m| !exports.contains(&m.as_str())) {
            return Err(RhiError::InvalidResource {
                name: self.name,
                reason: format!("miss shader '{missing}' is not exported"),
            });
        }

        let native_device = device.native().clone();
        let native = native_device.create_state_object(&stream)?;
        native_device.set_name(NativeObject::StateObject(native), &self.name);
        log::debug!("Created state object '{}' with {} exports", self.name, exports.len());

        Ok(Arc::new(StateObject {
            name: self.name,
            native,
            global_root_signature: self.global_root_signature,
            local_root_signatures: self.local_root_signatures.into_iter().map(|(root, _)| root).collect(),
            miss_shaders: self.miss_shaders,
            _libraries: libraries,
            identifier_size: device.capabilities().shader_identifier_size,
            identifiers: Mutex::new(HashMap::new()),
            native_device,
            release: device.release_queue().clone(),
            stream,
        }))
    }
}

/// A created state object.
pub struct StateObject {
    name: String,
    stream: StateObjectStream,
    native: NativeStateObject,
    global_root_signature: Option<Arc<RootSignature>>,
    local_root_signatures: Vec<Arc<RootSignature>>,
    miss_shaders: Vec<String>,
    _libraries: Vec<Arc<Shader>>,
    identifier_size: u32,
    identifiers: Mutex<HashMap<String, Vec<u8>>>,
    native_device: Arc<dyn NativeDevice>,
    release: Arc<DeferredReleaseQueue>,
}

impl StateObject {
    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of state object.
    pub fn ty(&self) -> StateObjectType {
        self.stream.ty
    }

    /// The linearized stream it was created from.
    pub fn stream(&self) -> &StateObjectStream {
        &self.stream
    }

    /// The native handle.
    pub fn native(&self) -> NativeStateObject {
        self.native
    }

    /// The global root signature, if any.
    pub fn global_root_signature(&self) -> Option<&Arc<RootSignature>> {
        self.global_root_signature.as_ref()
    }

    /// Local root signatures, in declaration order.
    pub fn local_root_signatures(&self) -> &[Arc<RootSignature>] {
        &self.local_root_signatures
    }

    /// Exports declared as miss shaders.
    pub fn miss_shaders(&self) -> &[String] {
        &self.miss_shaders
    }

    /// Size of one shader identifier.
    pub fn identifier_size(&self) -> u32 {
        self.identifier_size
    }

    /// The shader identifier of `export`, or `None` for unknown exports.
    pub fn shader_identifier(&self, export: &str) -> Option<Vec<u8>> {
        let mut identifiers = self.identifiers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(identifier) = identifiers.get(export) {
            return Some(identifier.clone());
        }
        let identifier = self.native_device.shader_identifier(self.native, export)?;
        identifiers.insert(export.to_string(), identifier.clone());
        Some(identifier)
    }
}

impl Drop for StateObject {
    fn drop(&mut self) {
        self.release.release(NativeObject::StateObject(self.native));
    }
}

impl fmt::Debug for StateObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateObject")
            .field("name", &self.name)
            .field("type", &self.stream.ty)
            .field("subobjects", &self.stream.subobjects.len())
            .finish()
    }
}
