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


//! Integration tests for GPU/CPU synchronisation and everything recycled
//! against it: fences, frame pacing, deferred release, persistent
//! descriptors, scratch pages and readback.

mod common;

use keel_core::error::ApiError;
use keel_core::rhi::{BufferDesc, BufferFlags, NativeObject, QueueType};
use keel_infra::CompletionMode;
use keel_rhi::{Buffer, RhiError};

// ─────────────────────────────────────────────────────────────────────────────
// Fences
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_fence_values_increase_and_complete_in_order() {
    let t = common::device_with(common::settings(), CompletionMode::Manual);
    let queue = t.device.queue(QueueType::Graphics);

    let mut syncs = Vec::new();
    for _ in 0..4 {
        let ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
        syncs.push(ctx.execute().unwrap());
    }
    for pair in syncs.windows(2) {
        assert!(pair[0].value() < pair[1].value());
    }
    assert!(syncs.iter().all(|s| !s.is_complete()));
    assert_eq!(queue.last_sync_point().map(|s| s.value()), syncs.last().map(|s| s.value()));

    let mut completed = queue.fence().last_completed_value();
    while t.gpu.process_queue(QueueType::Graphics) > 0 {
        let now = queue.fence().last_completed_value().max(completed);
        assert!(now >= completed);
        completed = now;
    }
    syncs[1].cpu_wait().unwrap();
    assert!(syncs[0].is_complete());
    assert!(syncs[1].is_complete());
    assert!(queue.fence().last_completed_value() >= syncs[1].value());
}

#[test]
fn test_cross_queue_wait_orders_work() {
    let t = common::device_with(common::settings(), CompletionMode::Manual);

    let copy = t.device.allocate_context(QueueType::Copy).unwrap();
    let uploaded = copy.execute().unwrap();
    t.device.queue(QueueType::Graphics).insert_wait(&uploaded).unwrap();
    let graphics = t.device.allocate_context(QueueType::Graphics).unwrap();
    let drawn = graphics.execute().unwrap();

    t.gpu.process_queue(QueueType::Graphics);
    assert!(!drawn.is_complete(), "graphics ran before the copy it waits on");

    t.gpu.process_all();
    assert!(uploaded.is_complete());
    assert!(drawn.is_complete());
}

#[test]
fn test_tick_frame_throttles_to_frames_in_flight() {
    let mut settings = common::settings();
    settings.frames_in_flight = 2;
    let t = common::device_with(settings, CompletionMode::Manual);

    let first = t.device.tick_frame().unwrap();
    let second = t.device.tick_frame().unwrap();
    assert!(!first.is_complete());
    let third = t.device.tick_frame().unwrap();

    assert!(first.is_complete(), "the oldest frame is waited on");
    assert!(second.value() < third.value());
    assert_eq!(t.device.frame_index(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Deferred release
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_dropped_resources_outlive_the_current_frame() {
    let t = common::device();
    let buffer = Buffer::new(
        &t.device,
        BufferDesc::byte_address(256, BufferFlags::UNORDERED_ACCESS),
        "Transient",
    )
    .unwrap();
    let handle = buffer.resource().handle();
    drop(buffer);

    assert!(t.gpu.is_alive(NativeObject::Resource(handle)));
    assert_eq!(t.device.release_queue().len(), 1);

    t.device.tick_frame().unwrap();
    assert!(!t.gpu.is_alive(NativeObject::Resource(handle)));
    assert!(t.device.release_queue().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistent descriptors
// ─────────────────────────────────────────────────────────────────────────────

fn srv_buffer(device: &keel_rhi::Device, index: usize) -> Result<std::sync::Arc<Buffer>, RhiError> {
    Buffer::new(
        device,
        BufferDesc::structured(4, 16, BufferFlags::SHADER_RESOURCE),
        &format!("Srv {index}"),
    )
}

#[test]
fn test_exhausting_the_persistent_region_reports_its_capacity() {
    let mut settings = common::settings();
    settings.persistent_descriptor_count = 1024;
    let t = common::device_with(settings, CompletionMode::Immediate);

    let buffers: Vec<_> = (0..1024).map(|i| srv_buffer(&t.device, i).unwrap()).collect();
    let err = srv_buffer(&t.device, 1024).unwrap_err();

    assert!(matches!(err, RhiError::OutOfPersistentDescriptors { capacity: 1024 }));
    assert_eq!(err.to_string(), "Out of persistent descriptor heap space (1024).");
    drop(buffers);
}

#[test]
fn test_freed_descriptor_is_reused_only_after_its_frame_completes() {
    let mut settings = common::settings();
    settings.persistent_descriptor_count = 4;
    let t = common::device_with(settings, CompletionMode::Immediate);

    let mut buffers: Vec<_> = (0..4).map(|i| srv_buffer(&t.device, i).unwrap()).collect();
    let freed = buffers.remove(1);
    let freed_index = freed.srv_index();
    drop(freed);

    assert!(
        srv_buffer(&t.device, 4).is_err(),
        "the slot is still visible to the frame that freed it"
    );

    t.device.tick_frame().unwrap();
    let reused = srv_buffer(&t.device, 5).unwrap();
    assert_eq!(reused.srv_index(), freed_index);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scratch memory
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_scratch_pages_are_recycled_after_their_sync_point() {
    let t = common::device_with(common::settings(), CompletionMode::Manual);
    let scratch = t.device.scratch().clone();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.upload_scratch(&[7u8; 64], 256).unwrap();
    let first = ctx.execute().unwrap();
    let created = scratch.pages_created();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.upload_scratch(&[8u8; 64], 256).unwrap();
    assert_eq!(scratch.pages_created(), created + 1, "an in-flight page was reused");
    ctx.execute().unwrap();

    t.gpu.process_all();
    assert!(first.is_complete());

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.upload_scratch(&[9u8; 64], 256).unwrap();
    assert_eq!(scratch.pages_created(), created + 1);
    ctx.execute().unwrap();
}

#[test]
fn test_oversized_scratch_uploads_get_a_dedicated_page() {
    let t = common::device();
    let page_size = t.device.scratch().page_size();

    let data = vec![1u8; page_size as usize + 16];
    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    let allocation = ctx.upload_scratch(&data, 256).unwrap();
    assert_eq!(allocation.offset, 0);
    ctx.execute().unwrap().cpu_wait().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Readback
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_readback_is_visible_after_the_sync_point() {
    let t = common::device_with(common::settings(), CompletionMode::Manual);
    let data: Vec<u8> = (0..64u8).collect();
    let source = Buffer::new(
        &t.device,
        BufferDesc::byte_address(64, BufferFlags::UNORDERED_ACCESS),
        "Readback Source",
    )
    .unwrap();
    let readback = Buffer::new(&t.device, BufferDesc::readback(64), "Readback").unwrap();

    let mut ctx = t.device.allocate_context(QueueType::Copy).unwrap();
    ctx.write_buffer(&source, 0, &data).unwrap();
    ctx.copy_buffer(&readback, 0, &source, 0, 64);
    let sync = ctx.execute().unwrap();

    assert!(!sync.is_complete());
    assert_eq!(readback.read_to_vec().unwrap(), vec![0u8; 64]);

    sync.cpu_wait().unwrap();
    assert_eq!(readback.read_to_vec().unwrap(), data);
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

// ─────────────────────────────────────────────────────────────────────────────
// Device removal
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_submissions_fail_after_device_removal() {
    let mut settings = common::settings();
    settings.enable_dred = true;
    let t = common::device_with(settings, CompletionMode::Immediate);
    let buffer = Buffer::new(
        &t.device,
        BufferDesc::byte_address(256, BufferFlags::UNORDERED_ACCESS),
        "Faulting Buffer",
    )
    .unwrap();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.write_buffer(&buffer, 0, &[1, 2, 3, 4]).unwrap();
    ctx.execute().unwrap();

    t.gpu.remove_device(ApiError::DEVICE_HUNG, Some(buffer.gpu_address() + 16));

    let ctx = t.device.allocate_context(QueueType::Graphics);
    let err = match ctx.and_then(|ctx| ctx.execute()) {
        Ok(_) => panic!("execution on a removed device succeeded"),
        Err(err) => err,
    };
    assert!(matches!(err, RhiError::DeviceRemoved { .. }), "{err}");

    let reason = t.device.native().device_removed_reason();
    assert!(reason.as_ref().is_some_and(ApiError::is_device_removed));
    let report = t.device.native().dred_report().expect("DRED was enabled");
    let text = keel_rhi::dred::format_report(reason.as_ref(), &report);
    assert!(text.starts_with("Device removed"), "{text}");
    assert!(text.contains("Faulting Buffer"), "{text}");
}
