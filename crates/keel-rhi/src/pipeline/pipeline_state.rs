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

//! Graphics and compute pipeline states with hot reload.

use super::RootSignature;
use crate::device::Device;
use crate::error::{RhiError, ShaderError};
use crate::release::DeferredReleaseQueue;
use crate::shader::{Shader, ShaderDesc, ShaderKey, ShaderManager, ShaderRecompiled};
use keel_core::delegate::WatcherToken;
use keel_core::rhi::{
    BlendMode, DepthStencilDesc, Format, InputElement, NativeDevice, NativeObject, NativePipelineState,
    PipelineStateStream, PipelineSubobject, RasterizerDesc, ShaderStage, TopologyType,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Collects the subobjects of a pipeline state.
#[derive(Debug, Clone)]
pub struct PipelineStateBuilder {
    name: String,
    root_signature: Option<Arc<RootSignature>>,
    shaders: Vec<ShaderDesc>,
    blend: Vec<BlendMode>,
    alpha_to_coverage: bool,
    rasterizer: RasterizerDesc,
    depth_stencil: Option<DepthStencilDesc>,
    input_layout: Vec<InputElement>,
    topology: TopologyType,
    render_targets: Vec<Format>,
    depth_format: Option<Format>,
    sample_count: u32,
}

impl PipelineStateBuilder {
    /// Starts a pipeline named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_signature: None,
            shaders: Vec::new(),
            blend: Vec::new(),
            alpha_to_coverage: false,
            rasterizer: RasterizerDesc::default(),
            depth_stencil: None,
            input_layout: Vec::new(),
            topology: TopologyType::Triangle,
            render_targets: Vec::new(),
            depth_format: None,
            sample_count: 1,
        }
    }

    /// Sets the root signature.
    pub fn root_signature(mut self, root_signature: Arc<RootSignature>) -> Self {
        self.root_signature = Some(root_signature);
        self
    }

    /// Adds a shader; its stage comes from the description.
    pub fn shader(mut self, desc: ShaderDesc) -> Self {
        self.shaders.retain(|s| s.stage != desc.stage);
        self.shaders.push(desc);
        self
    }

    /// Sets the render target formats, with one blend mode each.
    pub fn render_targets(mut self, formats: &[Format], blend: BlendMode) -> Self {
        self.render_targets = formats.to_vec();
        self.blend = vec![blend; formats.len()];
        self
    }

    /// Enables alpha-to-coverage.
    pub fn alpha_to_coverage(mut self, enabled: bool) -> Self {
        self.alpha_to_coverage = enabled;
        self
    }

    /// Sets the depth format and state.
    pub fn depth(mut self, format: Format, state: DepthStencilDesc) -> Self {
        self.depth_format = Some(format);
        self.depth_stencil = Some(state);
        self
    }

    /// Sets the rasterizer state.
    pub fn rasterizer(mut self, rasterizer: RasterizerDesc) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Sets the input layout.
    pub fn input_layout(mut self, elements: Vec<InputElement>) -> Self {
        self.input_layout = elements;
        self
    }

    /// Sets the topology class.
    pub fn topology(mut self, topology: TopologyType) -> Self {
        self.topology = topology;
        self
    }

    /// Sets the sample count.
    pub fn samples(mut self, count: u32) -> Self {
        self.sample_count = count.max(1);
        self
    }

    fn is_compute(&self) -> bool {
        self.shaders.iter().any(|s| s.stage == ShaderStage::Compute)
    }

    /// The subobjects that do not depend on shaders.
    fn fixed_subobjects(&self) -> Vec<PipelineSubobject> {
        if self.is_compute() {
            return Vec::new();
        }
        let mut subobjects = vec![
            PipelineSubobject::Blend {
                modes: self.blend.clone(),
                alpha_to_coverage: self.alpha_to_coverage,
            },
            PipelineSubobject::Rasterizer(self.rasterizer),
            PipelineSubobject::Topology(self.topology),
            PipelineSubobject::RenderTargetFormats(self.render_targets.clone()),
            PipelineSubobject::SampleDesc {
                count: self.sample_count,
                quality: 0,
            },
        ];
        if !self.input_layout.is_empty() {
            subobjects.push(PipelineSubobject::InputLayout(self.input_layout.clone()));
        }
        if let Some(format) = self.depth_format {
            subobjects.push(PipelineSubobject::DepthStencilFormat(format));
            subobjects.push(PipelineSubobject::DepthStencil(self.depth_stencil.unwrap_or_default()));
        }
        subobjects
    }

    /// Compiles the shaders and creates the pipeline.
    pub fn build(self, device: &Device) -> Result<Arc<PipelineState>, RhiError> {
        let manager = device.shader_manager()?;
        let Some(root_signature) = self.root_signature.clone() else {
            return Err(RhiError::InvalidResource {
                name: self.name,
                reason: "a pipeline needs a root signature".into(),
            });
        };
        PipelineState::create(
            self.name.clone(),
            root_signature,
            self.shaders.clone(),
            self.fixed_subobjects(),
            self.is_compute(),
            manager,
            device.native().clone(),
            device.release_queue().clone(),
        )
    }
}

struct Compiled {
    native: NativePipelineState,
    shaders: Vec<Arc<Shader>>,
}

/// A pipeline state object.
///
/// The pipeline listens for recompiles of its shaders; a recompile sets
/// [`needs_reload`](Self::needs_reload) and the pipeline recreates itself
/// on its next bind. If the new shaders fail to build, the previous
/// pipeline stays in use.
pub struct PipelineState {
    name: String,
    root_signature: Arc<RootSignature>,
    shader_descs: Vec<ShaderDesc>,
    fixed: Vec<PipelineSubobject>,
    compute: bool,
    manager: Arc<ShaderManager>,
    native_device: Arc<dyn NativeDevice>,
    release: Arc<DeferredReleaseQueue>,
    current: Mutex<Compiled>,
    needs_reload: Arc<AtomicBool>,
    reloads: AtomicUsize,
    _token: WatcherToken,
}

impl PipelineState {
    #[allow(clippy::too_many_arguments)]
    fn create(
        name: String,
        root_signature: Arc<RootSignature>,
        shader_descs: Vec<ShaderDesc>,
        fixed: Vec<PipelineSubobject>,
        compute: bool,
        manager: Arc<ShaderManager>,
        native_device: Arc<dyn NativeDevice>,
        release: Arc<DeferredReleaseQueue>,
    ) -> Result<Arc<Self>, RhiError> {
        let (stream, shaders) = resolve(&manager, &root_signature, &shader_descs, &fixed)?;
        let native = native_device.create_pipeline_state(&stream)?;
        native_device.set_name(NativeObject::PipelineState(native), &name);

        let needs_reload = Arc::new(AtomicBool::new(false));
        let keys: Vec<ShaderKey> = shader_descs.iter().map(|d| manager.key_for(d)).collect();
        let flag = needs_reload.clone();
        let token = manager.on_recompiled().subscribe(move |event: &ShaderRecompiled| {
            if keys.contains(event.old.key()) {
                flag.store(true, Ordering::Release);
            }
        });

        Ok(Arc::new(Self {
            name,
            root_signature,
            shader_descs,
            fixed,
            compute,
            manager,
            native_device,
            release,
            current: Mutex::new(Compiled { native, shaders }),
            needs_reload,
            reloads: AtomicUsize::new(0),
            _token: token,
        }))
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root signature.
    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }

    /// Returns `true` for compute pipelines.
    pub fn is_compute(&self) -> bool {
        self.compute
    }

    /// The current native pipeline.
    pub fn native(&self) -> NativePipelineState {
        self.lock().native
    }

    /// The shaders the current native pipeline was built from.
    pub fn shaders(&self) -> Vec<Arc<Shader>> {
        self.lock().shaders.clone()
    }

    /// Thread group size of the compute shader, if reflected.
    pub fn thread_group_size(&self) -> Option<[u32; 3]> {
        self.lock()
            .shaders
            .iter()
            .find(|s| s.key().stage == ShaderStage::Compute)
            .and_then(|s| s.reflection().thread_group_size)
    }

    /// Returns `true` if a shader was recompiled since the pipeline was
    /// last built, or one of its files changed since.
    pub fn needs_reload(&self) -> bool {
        self.needs_reload.load(Ordering::Acquire) || self.shader_descs.iter().any(|d| self.manager.is_dirty(d))
    }

    /// Number of times the pipeline was recreated.
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::Relaxed)
    }

    /// The stream the pipeline would be created from now, with the current
    /// shaders resolved.
    pub fn get_desc(&self) -> Result<PipelineStateStream, ShaderError> {
        resolve(&self.manager, &self.root_signature, &self.shader_descs, &self.fixed).map(|(stream, _)| stream)
    }

    /// Recreates the pipeline if a shader changed. Returns `true` if a new
    /// native pipeline is in use.
    pub fn reload_if_needed(&self) -> Result<bool, RhiError> {
        if !self.needs_reload() {
            return Ok(false);
        }
        let resolved = resolve(&self.manager, &self.root_signature, &self.shader_descs, &self.fixed);
        // Resolving recompiles dirty shaders, which raises the flag again.
        self.needs_reload.store(false, Ordering::Release);
        let (stream, shaders) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                log::error!("Keeping the previous '{}' pipeline: {err}", self.name);
                return Ok(false);
            }
        };
        let native = match self.native_device.create_pipeline_state(&stream) {
            Ok(native) => native,
            Err(err) if err.is_device_removed() => return Err(err.into()),
            Err(err) => {
                log::error!("Keeping the previous '{}' pipeline: {err}", self.name);
                return Ok(false);
            }
        };
        self.native_device.set_name(NativeObject::PipelineState(native), &self.name);

        let old = std::mem::replace(&mut *self.lock(), Compiled { native, shaders });
        self.release.release(NativeObject::PipelineState(old.native));
        self.release.keep_alive(old.shaders);
        self.reloads.fetch_add(1, Ordering::Relaxed);
        log::info!("Reloaded pipeline '{}'", self.name);
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Compiled> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds the stream from the current shaders.
fn resolve(
    manager: &ShaderManager,
    root_signature: &RootSignature,
    shader_descs: &[ShaderDesc],
    fixed: &[PipelineSubobject],
) -> Result<(PipelineStateStream, Vec<Arc<Shader>>), ShaderError> {
    let shaders = shader_descs
        .iter()
        .map(|desc| manager.get_shader(desc))
        .collect::<Result<Vec<_>, _>>()?;
    let mut subobjects = Vec::with_capacity(1 + shaders.len() + fixed.len());
    subobjects.push(PipelineSubobject::RootSignature(root_signature.native()));
    subobjects.extend(shaders.iter().map(|shader| PipelineSubobject::Shader {
        stage: shader.key().stage,
        bytecode: shader.bytecode().clone(),
    }));
    subobjects.extend_from_slice(fixed);
    Ok((PipelineStateStream { subobjects }, shaders))
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        let current = self.current.get_mut().unwrap_or_else(PoisonError::into_inner);
        self.release.release(NativeObject::PipelineState(current.native));
    }
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineState")
            .field("name", &self.name)
            .field("compute", &self.compute)
            .field("needs_reload", &self.needs_reload())
            .finish()
    }
}
