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


//! Recording and submission of a compiled graph.

use crate::compile::Compiled;
use crate::error::GraphError;
use crate::pass::{Pass, PassFlags, PassResources};
use crate::resource::{GraphResource, VirtualResource};
use keel_core::rhi::{QueueType, ResourceStates};
use keel_rhi::{CommandContext, DepthAttachment, Device, RenderPassInfo, RenderTarget, SyncPoint};
use std::sync::Arc;

/// What happened when a graph executed.
#[derive(Debug, Default)]
pub struct GraphReport {
    /// Passes that ran, in submission order.
    pub executed: Vec<String>,
    /// Passes removed by culling.
    pub culled: Vec<String>,
    /// Passes whose closure returned an error. Their output is undefined
    /// for the frame.
    pub failed: Vec<String>,
    /// The sync point of every submitted pass.
    pub submissions: Vec<(QueueType, SyncPoint)>,
}

impl GraphReport {
    /// The last sync point submitted on `queue`.
    pub fn last_sync_point(&self, queue: QueueType) -> Option<&SyncPoint> {
        self.submissions.iter().rev().find(|(q, _)| *q == queue).map(|(_, sync)| sync)
    }
}

fn render_pass_info(pass: &Pass, resolved: &[Option<GraphResource>]) -> RenderPassInfo {
    let texture = |index: u32| match resolved[index as usize].as_ref().and_then(GraphResource::as_texture) {
        Some(texture) => texture.clone(),
        None => keel_core::rhi_fatal!("attachment #{} of pass '{}' is not a texture", index, pass.name),
    };
    let mut info = RenderPassInfo::new().named(pass.name.clone());
    for color in &pass.colors {
        let mut target = RenderTarget::new(texture(color.texture.0.index));
        if let Some(clear) = color.clear {
            target = target.clear(clear);
        }
        info = info.color(target);
    }
    if let Some(depth) = &pass.depth {
        let mut attachment = DepthAttachment::new(texture(depth.texture.0.index));
        if let Some((d, s)) = depth.clear {
            attachment = attachment.clear(d, s);
        }
        if depth.read_only {
            attachment = attachment.read_only();
        }
        info = info.depth(attachment);
    }
    info
}

fn record_pass(
    ctx: &mut CommandContext,
    pass: &mut Pass,
    graph: u32,
    compiled: &Compiled,
    step: usize,
) -> Result<bool, GraphError> {
    let plan = &compiled.plan.steps[step];
    for &(slot, state) in &plan.transitions {
        ctx.transition(compiled.concrete[slot].resource(), state);
    }
    for &slot in &plan.uav_barriers {
        ctx.uav_barrier(Some(compiled.concrete[slot].resource() as &dyn keel_rhi::GpuResource));
    }
    ctx.flush_resource_barriers();

    let auto_render_pass = pass.flags.contains(PassFlags::RASTER)
        && !pass.flags.contains(PassFlags::SKIP_AUTO_RENDER_PASS)
        && pass.has_attachments();
    if auto_render_pass {
        ctx.begin_render_pass(render_pass_info(pass, &compiled.resolved))?;
    }

    let resources = PassResources {
        pass: &pass.name,
        graph,
        resources: &compiled.resolved,
    };
    let succeeded = match pass.bind.take() {
        Some(record) => match record(&mut *ctx, &resources) {
            Ok(()) => true,
            Err(err) => {
                log::error!("Render graph pass '{}' failed: {:#}", pass.name, err);
                false
            }
        },
        None => true,
    };

    if auto_render_pass {
        ctx.end_render_pass();
    }
    for &(slot, state) in &plan.handoffs {
        ctx.transition(compiled.concrete[slot].resource(), state);
    }
    Ok(succeeded)
}

/// Records and submits every surviving pass, applies export states and
/// publishes persistent resources.
pub(crate) fn run(
    device: &Arc<Device>,
    graph: u32,
    passes: &mut [Pass],
    resources: &[VirtualResource],
    compiled: &Compiled,
) -> Result<GraphReport, GraphError> {
    let mut report = GraphReport {
        culled: passes
            .iter()
            .zip(&compiled.live)
            .filter(|(_, live)| !**live)
            .map(|(pass, _)| pass.name.clone())
            .collect(),
        ..GraphReport::default()
    };
    for name in &report.culled {
        log::trace!("Render graph culled '{}'", name);
    }

    let prologue = if compiled.plan.prologue.is_empty() {
        None
    } else {
        let mut ctx = device.allocate_context(QueueType::Graphics)?;
        ctx.begin_event("Render graph prologue");
        for &slot in &compiled.plan.prologue {
            ctx.transition(compiled.concrete[slot].resource(), ResourceStates::COMMON);
        }
        ctx.end_event();
        Some(ctx.execute()?)
    };
    let mut waited_prologue = [false; 3];

    let mut step_syncs: Vec<Option<SyncPoint>> = vec![None; compiled.plan.steps.len()];
    for (step, plan) in compiled.plan.steps.iter().enumerate() {
        let pass = &mut passes[plan.pass];
        let queue = device.queue(pass.queue);
        if let Some(sync) = &prologue {
            if pass.queue != QueueType::Graphics && !waited_prologue[pass.queue as usize] {
                queue.insert_wait(sync)?;
                waited_prologue[pass.queue as usize] = true;
            }
        }
        for &dependency in &plan.waits {
            if let Some(sync) = &step_syncs[dependency] {
                queue.insert_wait(sync)?;
            }
        }

        let mut ctx = device.allocate_context(pass.queue)?;
        ctx.begin_event(&pass.name);
        let succeeded = record_pass(&mut ctx, pass, graph, compiled, step)?;
        ctx.end_event();
        let sync = ctx.execute()?;

        if !succeeded {
            report.failed.push(pass.name.clone());
        }
        report.executed.push(pass.name.clone());
        report.submissions.push((pass.queue, sync.clone()));
        step_syncs[step] = Some(sync);
    }

    finish_exports(device, resources, compiled, &step_syncs, &mut report)?;
    Ok(report)
}

fn finish_exports(
    device: &Arc<Device>,
    resources: &[VirtualResource],
    compiled: &Compiled,
    step_syncs: &[Option<SyncPoint>],
    report: &mut GraphReport,
) -> Result<(), GraphError> {
    let exports: Vec<_> = resources
        .iter()
        .enumerate()
        .filter_map(|(i, r)| Some((r.export.as_ref()?, compiled.mapping[i]?)))
        .collect();
    if exports.is_empty() {
        return Ok(());
    }

    if exports.iter().any(|(export, _)| export.state.is_some()) {
        let graphics = device.queue(QueueType::Graphics);
        let mut ctx = device.allocate_context(QueueType::Graphics)?;
        ctx.begin_event("Render graph exports");
        for (export, slot) in &exports {
            let Some(state) = export.state else { continue };
            if let Some((step, queue)) = compiled.plan.last_use[*slot] {
                if queue != QueueType::Graphics {
                    if let Some(sync) = &step_syncs[step] {
                        graphics.insert_wait(sync)?;
                    }
                }
            }
            ctx.transition(compiled.concrete[*slot].resource(), state);
        }
        ctx.end_event();
        let sync = ctx.execute()?;
        report.submissions.push((QueueType::Graphics, sync));
    }

    for (export, slot) in &exports {
        export.slot.publish(&compiled.concrete[*slot]);
    }
    Ok(())
}
