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

//! Render passes: attachment binding, load clears and resolves.

use super::{storage_of, CommandContext};
use crate::error::RhiError;
use crate::resource::{Texture, View};
use keel_core::rhi::{
    NativeCommand, QueueType, ResourceStates, ScissorRect, TextureCopyLocation, TextureDesc, TextureType, Viewport,
};
use keel_core::rhi_check;
use std::sync::Arc;

/// What happens to an attachment when the pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LoadOp {
    /// Keep the previous contents.
    #[default]
    Load,
    /// Clear to the attachment's clear value.
    Clear,
    /// The previous contents are not needed.
    DontCare,
}

/// What happens to an attachment when the pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    /// Keep the contents.
    #[default]
    Store,
    /// The contents are not needed after the pass.
    DontCare,
    /// Resolve into the attachment's resolve target.
    Resolve,
}

/// A colour attachment.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    /// The texture.
    pub texture: Arc<Texture>,
    /// Mip level.
    pub mip: u32,
    /// Array slice (depth slice for 3D textures).
    pub slice: u32,
    /// Load operation.
    pub load: LoadOp,
    /// Store operation.
    pub store: StoreOp,
    /// Clear colour used by [`LoadOp::Clear`].
    pub clear_color: [f32; 4],
    /// Destination of [`StoreOp::Resolve`].
    pub resolve_target: Option<Arc<Texture>>,
}

impl RenderTarget {
    /// Mip 0, slice 0, loaded and stored.
    pub fn new(texture: Arc<Texture>) -> Self {
        Self {
            texture,
            mip: 0,
            slice: 0,
            load: LoadOp::Load,
            store: StoreOp::Store,
            clear_color: [0.0; 4],
            resolve_target: None,
        }
    }

    /// Clears to `color` when the pass begins.
    pub fn clear(mut self, color: [f32; 4]) -> Self {
        self.load = LoadOp::Clear;
        self.clear_color = color;
        self
    }

    /// Selects a mip and slice.
    pub fn subresource(mut self, mip: u32, slice: u32) -> Self {
        self.mip = mip;
        self.slice = slice;
        self
    }

    /// Resolves into `target` when the pass ends.
    pub fn resolve(mut self, target: Arc<Texture>) -> Self {
        self.store = StoreOp::Resolve;
        self.resolve_target = Some(target);
        self
    }
}

/// The depth-stencil attachment.
#[derive(Debug, Clone)]
pub struct DepthAttachment {
    /// The texture.
    pub texture: Arc<Texture>,
    /// Mip level.
    pub mip: u32,
    /// Array slice.
    pub slice: u32,
    /// Depth load operation.
    pub depth_load: LoadOp,
    /// Stencil load operation.
    pub stencil_load: LoadOp,
    /// Store operation.
    pub store: StoreOp,
    /// Depth clear value.
    pub clear_depth: f32,
    /// Stencil clear value.
    pub clear_stencil: u8,
    /// Binds the attachment read-only.
    pub read_only: bool,
    /// Destination of [`StoreOp::Resolve`].
    pub resolve_target: Option<Arc<Texture>>,
}

impl DepthAttachment {
    /// Mip 0, slice 0, loaded and stored, writable.
    pub fn new(texture: Arc<Texture>) -> Self {
        Self {
            texture,
            mip: 0,
            slice: 0,
            depth_load: LoadOp::Load,
            stencil_load: LoadOp::DontCare,
            store: StoreOp::Store,
            clear_depth: 0.0,
            clear_stencil: 0,
            read_only: false,
            resolve_target: None,
        }
    }

    /// Clears depth (and stencil, for formats that have one).
    pub fn clear(mut self, depth: f32, stencil: u8) -> Self {
        self.depth_load = LoadOp::Clear;
        self.clear_depth = depth;
        if self.texture.desc().format.has_stencil() {
            self.stencil_load = LoadOp::Clear;
            self.clear_stencil = stencil;
        }
        self
    }

    /// Binds the attachment read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Resolves into `target` when the pass ends.
    pub fn resolve(mut self, target: Arc<Texture>) -> Self {
        self.store = StoreOp::Resolve;
        self.resolve_target = Some(target);
        self
    }
}

/// The attachments of a render pass.
#[derive(Debug, Clone, Default)]
pub struct RenderPassInfo {
    /// Debug event name wrapped around the pass.
    pub name: Option<String>,
    /// Colour attachments, in slot order.
    pub render_targets: Vec<RenderTarget>,
    /// Depth-stencil attachment.
    pub depth_stencil: Option<DepthAttachment>,
}

impl RenderPassInfo {
    /// A pass without attachments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the pass.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a colour attachment.
    pub fn color(mut self, target: RenderTarget) -> Self {
        self.render_targets.push(target);
        self
    }

    /// Sets the depth-stencil attachment.
    pub fn depth(mut self, depth: DepthAttachment) -> Self {
        self.depth_stencil = Some(depth);
        self
    }

    /// Extent of the first attachment at its mip.
    pub fn extent(&self) -> Option<(u32, u32)> {
        let (texture, mip) = match (self.render_targets.first(), &self.depth_stencil) {
            (Some(rt), _) => (&rt.texture, rt.mip),
            (None, Some(ds)) => (&ds.texture, ds.mip),
            (None, None) => return None,
        };
        let (width, height, _) = texture.desc().mip_extent(mip);
        Some((width, height))
    }
}

pub(crate) struct ActiveRenderPass {
    info: RenderPassInfo,
    _views: Vec<Arc<View>>,
}

/// Subresource addressed by an attachment; 3D textures address depth
/// slices inside a single subresource.
fn attachment_subresource(desc: &TextureDesc, mip: u32, slice: u32) -> u32 {
    if desc.ty == TextureType::Texture3D {
        mip
    } else {
        desc.subresource_index(mip, slice)
    }
}

impl CommandContext {
    /// Begins a render pass: transitions and binds the attachments, runs
    /// load clears and sets a full viewport and scissor.
    pub fn begin_render_pass(&mut self, info: RenderPassInfo) -> Result<(), RhiError> {
        rhi_check!(
            self.queue_type() == QueueType::Graphics,
            "render passes are only available on the graphics queue"
        );
        rhi_check!(
            storage_of(&mut self.storage).render_pass.is_none(),
            "begin_render_pass inside another render pass"
        );
        if let Some(name) = &info.name {
            self.begin_event(name);
        }

        for rt in &info.render_targets {
            let sub = attachment_subresource(rt.texture.desc(), rt.mip, rt.slice);
            self.transition_subresource(&rt.texture, ResourceStates::RENDER_TARGET, sub);
        }
        if let Some(ds) = &info.depth_stencil {
            rhi_check!(
                !(ds.read_only && (ds.depth_load == LoadOp::Clear || ds.stencil_load == LoadOp::Clear)),
                "'{}' is bound read-only and cannot be cleared",
                ds.texture.resource().name()
            );
            let state = if ds.read_only {
                ResourceStates::DEPTH_READ
            } else {
                ResourceStates::DEPTH_WRITE
            };
            let sub = attachment_subresource(ds.texture.desc(), ds.mip, ds.slice);
            self.transition_subresource(&ds.texture, state, sub);
        }
        self.flush_resource_barriers();

        let mut views = Vec::with_capacity(info.render_targets.len() + 1);
        let mut rtvs = Vec::with_capacity(info.render_targets.len());
        for rt in &info.render_targets {
            let view = rt.texture.rtv(rt.mip, rt.slice)?;
            rtvs.push(view.cpu_handle());
            views.push(view);
        }
        let dsv = match &info.depth_stencil {
            Some(ds) => {
                let view = ds.texture.dsv(ds.mip, ds.slice, ds.read_only)?;
                let handle = view.cpu_handle();
                views.push(view);
                Some(handle)
            }
            None => None,
        };
        self.record(NativeCommand::SetRenderTargets {
            render_targets: rtvs.clone(),
            depth_stencil: dsv,
        });

        for (rt, view) in info.render_targets.iter().zip(&rtvs) {
            if rt.load == LoadOp::Clear {
                self.record(NativeCommand::ClearRenderTargetView {
                    view: *view,
                    color: rt.clear_color,
                });
            }
        }
        if let (Some(ds), Some(view)) = (&info.depth_stencil, dsv) {
            let depth = (ds.depth_load == LoadOp::Clear).then_some(ds.clear_depth);
            let stencil = (ds.stencil_load == LoadOp::Clear).then_some(ds.clear_stencil);
            if depth.is_some() || stencil.is_some() {
                self.record(NativeCommand::ClearDepthStencilView { view, depth, stencil });
            }
        }

        if let Some((width, height)) = info.extent() {
            self.set_viewport(Viewport::from_extent(width, height));
            self.set_scissor(ScissorRect::from_extent(width, height));
        }

        storage_of(&mut self.storage).render_pass = Some(ActiveRenderPass { info, _views: views });
        Ok(())
    }

    /// Ends the render pass, resolving attachments that asked for it.
    pub fn end_render_pass(&mut self) {
        let Some(active) = storage_of(&mut self.storage).render_pass.take() else {
            rhi_check!(false, "end_render_pass without an active render pass");
            return;
        };
        let info = active.info;

        for rt in &info.render_targets {
            if let (StoreOp::Resolve, Some(target)) = (rt.store, &rt.resolve_target) {
                self.resolve_attachment(&rt.texture, rt.mip, rt.slice, target);
            }
        }
        if let Some(ds) = &info.depth_stencil {
            if let (StoreOp::Resolve, Some(target)) = (ds.store, &ds.resolve_target) {
                self.resolve_attachment(&ds.texture, ds.mip, ds.slice, target);
            }
        }

        for rt in &info.render_targets {
            self.keep_alive(rt.texture.clone());
        }
        if let Some(ds) = &info.depth_stencil {
            self.keep_alive(ds.texture.clone());
        }
        if info.name.is_some() {
            self.end_event();
        }
    }

    /// Resolves a multisampled subresource, or copies a single-sampled one.
    fn resolve_attachment(&mut self, source: &Arc<Texture>, mip: u32, slice: u32, target: &Arc<Texture>) {
        let src_sub = attachment_subresource(source.desc(), mip, slice);
        let dst_sub = attachment_subresource(target.desc(), mip.min(target.desc().mip_levels - 1), slice);
        let src = source.resource().handle();
        let dst = target.resource().handle();

        if source.desc().sample_count > 1 {
            self.transition_subresource(source, ResourceStates::RESOLVE_SOURCE, src_sub);
            self.transition_subresource(target, ResourceStates::RESOLVE_DEST, dst_sub);
            self.flush_resource_barriers();
            self.record(NativeCommand::ResolveSubresource {
                dst,
                dst_subresource: dst_sub,
                src,
                src_subresource: src_sub,
                format: source.desc().format,
            });
        } else {
            self.transition_subresource(source, ResourceStates::COPY_SOURCE, src_sub);
            self.transition_subresource(target, ResourceStates::COPY_DEST, dst_sub);
            self.flush_resource_barriers();
            self.record(NativeCommand::CopyTextureRegion {
                dst: TextureCopyLocation::Subresource {
                    resource: dst,
                    index: dst_sub,
                },
                dst_x: 0,
                dst_y: 0,
                dst_z: 0,
                src: TextureCopyLocation::Subresource {
                    resource: src,
                    index: src_sub,
                },
                src_region: None,
            });
        }
        self.keep_alive(target.clone());
    }
}
