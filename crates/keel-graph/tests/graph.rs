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


//! End-to-end render graph tests on the headless device: culling,
//! aliasing, barrier plans, cross-queue hand-offs, exports and failures.

mod common;

use keel_core::config::DeviceSettings;
use keel_core::rhi::{Barrier, BufferDesc, BufferFlags, QueueType, ResourceStates};
use keel_graph::{GraphError, PassFlags, PersistentTexture, RenderGraph};
use keel_infra::headless::ExecutedKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, name: &'static str) -> impl FnOnce(&mut keel_rhi::CommandContext, &keel_graph::PassResources<'_>) -> anyhow::Result<()> + Send + 'static {
    let log = log.clone();
    move |_, _| {
        log.lock().unwrap().push(name);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Culling
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_passes_without_a_sink_never_run() {
    let t = common::device();
    let ran = Arc::new(AtomicBool::new(false));
    let mut graph = RenderGraph::new(&t.device);
    let bx = graph.create_buffer("Bx", common::uav_buffer_desc(256));
    let by = graph.create_buffer("By", common::uav_buffer_desc(256));

    let flag = ran.clone();
    let px = graph.add_pass("pX", PassFlags::COMPUTE).write(bx).bind(move |_, _| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });
    let flag = ran.clone();
    let py = graph.add_pass("pY", PassFlags::COMPUTE).read(bx).write(by).bind(move |_, _| {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    graph.compile().unwrap();
    assert!(graph.is_culled(px));
    assert!(graph.is_culled(py));
    assert!(graph.resolved_buffer(bx).is_none());

    let report = graph.execute().unwrap();
    assert!(!ran.load(Ordering::SeqCst));
    assert!(report.executed.is_empty());
    assert_eq!(report.culled, vec!["pX", "pY"]);
    assert!(t.gpu.executed_barriers().is_empty());
}

#[test]
fn test_disabled_culling_runs_every_pass() {
    let mut settings = DeviceSettings::default();
    settings.graph.enable_culling = false;
    let t = common::device_with(settings);
    let order = log();
    let mut graph = RenderGraph::new(&t.device);
    let bx = graph.create_buffer("Bx", common::uav_buffer_desc(256));
    let by = graph.create_buffer("By", common::uav_buffer_desc(256));
    graph.add_pass("pX", PassFlags::COMPUTE).write(bx).bind(record(&order, "pX"));
    graph.add_pass("pY", PassFlags::COMPUTE).read(bx).write(by).bind(record(&order, "pY"));

    let report = graph.execute().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["pX", "pY"]);
    assert!(report.culled.is_empty());
}

#[test]
fn test_imported_resource_keeps_its_writer_alive() {
    let t = common::device();
    let order = log();
    let target = keel_rhi::Buffer::new(&t.device, common::uav_buffer_desc(64), "History").unwrap();
    let mut graph = RenderGraph::new(&t.device);
    let imported = graph.import_buffer(&target);
    let scratch = graph.create_buffer("Scratch", common::uav_buffer_desc(64));
    graph.add_pass("Unused", PassFlags::COMPUTE).write(scratch).bind(record(&order, "Unused"));
    graph.add_pass("Accumulate", PassFlags::COMPUTE).write(imported).bind(record(&order, "Accumulate"));

    let report = graph.execute().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["Accumulate"]);
    assert_eq!(report.culled, vec!["Unused"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Barrier plans
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_uav_producer_feeds_an_exported_target() {
    let t = common::device();
    let order = log();
    let exported = PersistentTexture::new();
    let mut graph = RenderGraph::new(&t.device);
    let b = graph.create_buffer(
        "B",
        BufferDesc::structured(1024, 4, BufferFlags::UNORDERED_ACCESS | BufferFlags::SHADER_RESOURCE),
    );
    let target = graph.create_texture("T", common::uav_texture_desc(64, 64));
    graph.export_texture(target, &exported, None).unwrap();

    graph.add_pass("pA", PassFlags::COMPUTE).write(b).bind(record(&order, "pA"));
    graph.add_pass("pB", PassFlags::COMPUTE).read(b).write(target).bind(record(&order, "pB"));
    graph.compile().unwrap();
    let buffer = graph.resolved_buffer(b).unwrap().clone();
    let texture = graph.resolved_texture(target).unwrap().clone();

    let report = graph.execute().unwrap();
    assert_eq!(report.executed, vec!["pA", "pB"]);
    assert_eq!(*order.lock().unwrap(), vec!["pA", "pB"]);
    assert_eq!(
        common::transitions_of(&t.gpu, buffer.resource().handle()),
        vec![
            (ResourceStates::COMMON, ResourceStates::UNORDERED_ACCESS),
            (ResourceStates::UNORDERED_ACCESS, ResourceStates::NON_PIXEL_SHADER_RESOURCE),
        ]
    );
    assert_eq!(
        common::transitions_of(&t.gpu, texture.resource().handle()),
        vec![(ResourceStates::COMMON, ResourceStates::UNORDERED_ACCESS)]
    );
    assert!(Arc::ptr_eq(&exported.get().unwrap(), &texture));
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_back_to_back_unordered_writes_are_separated_by_a_uav_barrier() {
    let t = common::device();
    let target = keel_rhi::Buffer::new(&t.device, common::uav_buffer_desc(256), "Histogram").unwrap();
    let mut graph = RenderGraph::new(&t.device);
    let histogram = graph.import_buffer(&target);
    graph.add_pass("Clear", PassFlags::COMPUTE).write(histogram).build();
    graph.add_pass("Bin", PassFlags::COMPUTE).read_write(histogram).build();
    graph.execute().unwrap();

    let handle = target.resource().handle();
    let uav_barriers = t
        .gpu
        .executed_barriers()
        .into_iter()
        .filter(|(_, b)| matches!(b, Barrier::Uav { resource: Some(r) } if *r == handle))
        .count();
    assert_eq!(uav_barriers, 1);
    assert_eq!(
        common::transitions_of(&t.gpu, handle),
        vec![(ResourceStates::COMMON, ResourceStates::UNORDERED_ACCESS)]
    );
}

#[test]
fn test_compute_producer_hands_off_to_graphics_consumer() {
    let t = common::device();
    let mut graph = RenderGraph::new(&t.device);
    let tiles = graph.create_buffer("L", common::uav_buffer_desc(4096));
    graph
        .add_pass("pC", PassFlags::COMPUTE)
        .write(tiles)
        .queue(QueueType::Compute)
        .build();
    graph
        .add_pass("pG", PassFlags::COMPUTE | PassFlags::NEVER_CULL)
        .read(tiles)
        .build();
    graph.compile().unwrap();
    let buffer = graph.resolved_buffer(tiles).unwrap().clone();

    let report = graph.execute().unwrap();
    let producer = report.last_sync_point(QueueType::Compute).unwrap().clone();

    let handle = buffer.resource().handle();
    let barriers: Vec<_> = t
        .gpu
        .executed_barriers()
        .into_iter()
        .filter_map(|(queue, b)| match b {
            Barrier::Transition {
                resource, before, after, ..
            } if resource == handle => Some((queue, before, after)),
            _ => None,
        })
        .collect();
    assert_eq!(
        barriers,
        vec![
            (QueueType::Compute, ResourceStates::COMMON, ResourceStates::UNORDERED_ACCESS),
            (
                QueueType::Compute,
                ResourceStates::UNORDERED_ACCESS,
                ResourceStates::NON_PIXEL_SHADER_RESOURCE
            ),
        ]
    );
    let waited = t.gpu.executed().iter().any(|op| {
        op.queue == QueueType::Graphics
            && op.kind
                == ExecutedKind::Wait {
                    fence: producer.fence().handle(),
                    value: producer.value(),
                }
    });
    assert!(waited, "the graphics queue never waited for the compute pass");
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_raster_pass_gets_an_automatic_render_pass() {
    let t = common::device();
    let target = keel_rhi::Texture::new(&t.device, common::render_target_desc(8, 8), "Back Buffer").unwrap();
    let mut graph = RenderGraph::new(&t.device);
    let color = graph.import_texture(&target);
    graph
        .add_pass("Clear", PassFlags::RASTER)
        .render_target_cleared(color, [0.0, 0.0, 1.0, 1.0])
        .build();
    graph.execute().unwrap();

    let handle = target.resource().handle();
    assert_eq!(t.gpu.resource_state(handle, 0), Some(ResourceStates::RENDER_TARGET));
    assert_eq!(&t.gpu.resource_contents(handle).unwrap()[..4], &[0, 0, 255, 255]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Aliasing and persistence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_disjoint_transients_share_one_resource() {
    let t = common::device();
    let out = keel_rhi::Buffer::new(&t.device, common::uav_buffer_desc(512), "Out").unwrap();
    let mut graph = RenderGraph::new(&t.device);
    let a = graph.create_buffer("A", common::uav_buffer_desc(512));
    let b = graph.create_buffer("B", common::uav_buffer_desc(512));
    let c = graph.create_buffer("C", common::uav_buffer_desc(512));
    let out = graph.import_buffer(&out);
    graph.add_pass("WriteA", PassFlags::COMPUTE).write(a).build();
    graph.add_pass("AtoB", PassFlags::COMPUTE).read(a).write(b).build();
    graph.add_pass("BtoC", PassFlags::COMPUTE).read(b).write(c).build();
    graph.add_pass("CtoOut", PassFlags::COMPUTE).read(c).write(out).build();
    graph.compile().unwrap();

    let first = graph.resolved_buffer(a).unwrap();
    let second = graph.resolved_buffer(b).unwrap();
    let third = graph.resolved_buffer(c).unwrap();
    assert!(Arc::ptr_eq(first, third));
    assert!(!Arc::ptr_eq(first, second));
    graph.execute().unwrap();
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_persistent_texture_survives_into_the_next_frame() {
    let t = common::device();
    let history = PersistentTexture::new();

    let mut graph = RenderGraph::new(&t.device);
    let first = graph.create_persistent_texture("TAA History", common::render_target_desc(4, 4), &history);
    graph
        .export_texture(first, &history, Some(ResourceStates::PIXEL_SHADER_RESOURCE))
        .unwrap();
    graph
        .add_pass("Resolve", PassFlags::RASTER)
        .render_target_cleared(first, [0.0, 1.0, 0.0, 1.0])
        .build();
    graph.execute().unwrap();

    let texture = history.get().expect("the slot received the texture");
    let handle = texture.resource().handle();
    assert_eq!(t.gpu.resource_state(handle, 0), Some(ResourceStates::PIXEL_SHADER_RESOURCE));
    assert_eq!(&t.gpu.resource_contents(handle).unwrap()[..4], &[0, 255, 0, 255]);
    t.device.tick_frame().unwrap();

    let order = log();
    let mut graph = RenderGraph::new(&t.device);
    let second = graph.create_persistent_texture("TAA History", common::render_target_desc(4, 4), &history);
    graph
        .add_pass("Reproject", PassFlags::RASTER | PassFlags::NEVER_CULL)
        .read(second)
        .bind(record(&order, "Reproject"));
    graph.compile().unwrap();
    assert!(Arc::ptr_eq(graph.resolved_texture(second).unwrap(), &texture));
    graph.execute().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["Reproject"]);
    assert!(Arc::ptr_eq(&history.get().unwrap(), &texture));
}

#[test]
fn test_persistent_slot_with_another_size_is_replaced() {
    let t = common::device();
    let history = PersistentTexture::new();
    for size in [4, 8] {
        let mut graph = RenderGraph::new(&t.device);
        let texture = graph.create_persistent_texture("History", common::render_target_desc(size, size), &history);
        graph.add_pass("Fill", PassFlags::RASTER).render_target(texture).build();
        graph.execute().unwrap();
        assert_eq!(history.get().unwrap().width(), size);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_failing_closure_is_reported_and_the_frame_continues() {
    let t = common::device();
    let order = log();
    let target = keel_rhi::Buffer::new(&t.device, common::uav_buffer_desc(64), "Target").unwrap();
    let mut graph = RenderGraph::new(&t.device);
    let scratch = graph.create_buffer("Scratch", common::uav_buffer_desc(64));
    let target_handle = graph.import_buffer(&target);
    graph
        .add_pass("Broken", PassFlags::COMPUTE)
        .write(scratch)
        .bind(|_, _| Err(anyhow::anyhow!("shader 'broken.hlsl' is missing")));
    graph
        .add_pass("Consumer", PassFlags::COMPUTE)
        .read(scratch)
        .write(target_handle)
        .bind(record(&order, "Consumer"));

    let report = graph.execute().unwrap();
    assert_eq!(report.failed, vec!["Broken"]);
    assert_eq!(report.executed, vec!["Broken", "Consumer"]);
    assert_eq!(*order.lock().unwrap(), vec!["Consumer"]);
    assert_eq!(
        t.gpu.resource_state(target.resource().handle(), 0),
        Some(ResourceStates::UNORDERED_ACCESS)
    );
}

#[test]
fn test_write_after_write_fails_before_anything_runs() {
    let t = common::device();
    let order = log();
    let mut graph = RenderGraph::new(&t.device);
    let target = graph.create_texture("GBuffer Normals", common::uav_texture_desc(16, 16));
    let slot = PersistentTexture::new();
    graph.export_texture(target, &slot, None).unwrap();
    graph.add_pass("GBuffer", PassFlags::COMPUTE).write(target).bind(record(&order, "GBuffer"));
    graph.add_pass("Decals", PassFlags::COMPUTE).write(target).bind(record(&order, "Decals"));

    let err = graph.execute().unwrap_err();
    assert!(matches!(err, GraphError::WriteAfterWrite { .. }));
    assert!(order.lock().unwrap().is_empty());
    assert!(slot.get().is_none());
}

#[test]
fn test_pass_writing_one_target_in_two_states_is_rejected() {
    let t = common::device();
    let order = log();
    let mut graph = RenderGraph::new(&t.device);
    let target = graph.create_texture("Scene Color", common::render_target_desc(16, 16));
    graph
        .add_pass("Shade", PassFlags::RASTER | PassFlags::NEVER_CULL)
        .render_target(target)
        .write(target)
        .bind(record(&order, "Shade"));

    let err = graph.execute().unwrap_err();
    assert!(matches!(
        err,
        GraphError::ConflictingWrites { ref pass, first, second, .. }
            if pass == "Shade"
                && first == ResourceStates::RENDER_TARGET
                && second == ResourceStates::UNORDERED_ACCESS
    ));
    assert!(order.lock().unwrap().is_empty());
}

#[test]
fn test_handles_from_another_graph_are_rejected() {
    let t = common::device();
    let mut first = RenderGraph::new(&t.device);
    let foreign = first.create_buffer("Foreign", common::uav_buffer_desc(64));

    let mut second = RenderGraph::new(&t.device);
    second
        .add_pass("Thief", PassFlags::COMPUTE | PassFlags::NEVER_CULL)
        .write(foreign)
        .build();
    assert!(matches!(
        second.compile(),
        Err(GraphError::ForeignHandle { pass }) if pass == "Thief"
    ));
}

#[test]
fn test_imported_resources_cannot_be_exported() {
    let t = common::device();
    let texture = keel_rhi::Texture::new(&t.device, common::uav_texture_desc(4, 4), "Swap Image").unwrap();
    let mut graph = RenderGraph::new(&t.device);
    let imported = graph.import_texture(&texture);
    let err = graph
        .export_texture(imported, &PersistentTexture::new(), None)
        .unwrap_err();
    assert!(matches!(err, GraphError::ExportOfImported { resource } if resource == "Swap Image"));
}

#[test]
fn test_try_import_falls_back() {
    let t = common::device();
    let fallback = keel_rhi::Texture::new(&t.device, common::uav_texture_desc(1, 1), "Black").unwrap();
    let mut graph = RenderGraph::new(&t.device);
    let handle = graph.try_import_texture(None, &fallback);
    graph
        .add_pass("Sample", PassFlags::COMPUTE | PassFlags::NEVER_CULL)
        .read(handle)
        .build();
    graph.compile().unwrap();
    assert!(Arc::ptr_eq(graph.resolved_texture(handle).unwrap(), &fallback));
}

// ─────────────────────────────────────────────────────────────────────────────
// Debug output
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_graphviz_marks_culled_passes() {
    let t = common::device();
    let slot = PersistentTexture::new();
    let mut graph = RenderGraph::new(&t.device);
    let color = graph.create_texture("Color", common::uav_texture_desc(8, 8));
    let junk = graph.create_texture("Junk", common::uav_texture_desc(8, 8));
    graph.export_texture(color, &slot, None).unwrap();
    graph.add_pass("Shade", PassFlags::COMPUTE).write(color).build();
    graph.add_pass("Debug", PassFlags::COMPUTE).write(junk).build();
    graph.compile().unwrap();

    let dot = graph.dump_graphviz();
    assert!(dot.contains("label=\"Shade\\nGraphics\""));
    assert!(dot.contains("P1 [shape=box, style=\"dashed,filled\", fillcolor=gray"));
    assert!(dot.contains("P0 -> R0 [color=red];"));
}
