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


//! Integration tests for resource state tracking: batching, combining of
//! read states, and pending barriers resolved at submission.

mod common;

use keel_core::rhi::{
    Barrier, BufferDesc, BufferFlags, Format, NativeCommand, NativeResource, QueueType, ResourceStates,
    TextureDesc, TextureFlags, ALL_SUBRESOURCES,
};
use keel_infra::headless::ExecutedKind;
use keel_rhi::{Buffer, GpuResource, Texture};
use std::sync::Arc;

fn uav_buffer(device: &keel_rhi::Device, name: &str) -> Arc<Buffer> {
    Buffer::new(
        device,
        BufferDesc::structured(64, 16, BufferFlags::UNORDERED_ACCESS | BufferFlags::SHADER_RESOURCE),
        name,
    )
    .expect("buffer creation")
}

fn transitions_of(gpu: &keel_infra::HeadlessDevice, target: NativeResource) -> Vec<(u32, ResourceStates, ResourceStates)> {
    gpu.executed_barriers()
        .into_iter()
        .filter_map(|(_, barrier)| match barrier {
            Barrier::Transition {
                resource,
                subresource,
                before,
                after,
            } if resource == target => Some((subresource, before, after)),
            _ => None,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Batching
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_consecutive_read_transitions_combine_into_one_barrier() {
    let t = common::device();
    let buffer = uav_buffer(&t.device, "Combined");

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::COPY_DEST);
    assert_eq!(ctx.pending_barrier_count(), 1);
    ctx.transition(&*buffer, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    ctx.transition(&*buffer, ResourceStates::PIXEL_SHADER_RESOURCE);
    assert_eq!(ctx.batched_barrier_count(), 1);
    ctx.execute().unwrap();

    let handle = buffer.resource().handle();
    let combined = ResourceStates::NON_PIXEL_SHADER_RESOURCE | ResourceStates::PIXEL_SHADER_RESOURCE;
    assert_eq!(
        transitions_of(&t.gpu, handle),
        vec![
            (ALL_SUBRESOURCES, ResourceStates::COMMON, ResourceStates::COPY_DEST),
            (ALL_SUBRESOURCES, ResourceStates::COPY_DEST, combined),
        ]
    );
    assert_eq!(t.gpu.resource_state(handle, 0), Some(combined));
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_reading_a_subset_of_the_current_read_state_emits_nothing() {
    let t = common::device();
    let buffer = uav_buffer(&t.device, "Read Twice");

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::COPY_DEST);
    ctx.transition(&*buffer, ResourceStates::GENERIC_READ);
    ctx.flush_resource_barriers();
    ctx.transition(&*buffer, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    assert_eq!(ctx.batched_barrier_count(), 0);
    assert_eq!(
        ctx.local_state(buffer.resource(), 0),
        Some(ResourceStates::GENERIC_READ)
    );
    ctx.execute().unwrap();
}

#[test]
fn test_same_state_transition_is_a_no_op() {
    let t = common::device();
    let buffer = uav_buffer(&t.device, "Same State");

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::UNORDERED_ACCESS);
    ctx.transition(&*buffer, ResourceStates::UNORDERED_ACCESS);
    assert_eq!(ctx.pending_barrier_count(), 1);
    assert_eq!(ctx.batched_barrier_count(), 0);
    ctx.execute().unwrap();

    assert_eq!(transitions_of(&t.gpu, buffer.resource().handle()).len(), 1);
}

#[test]
fn test_untracked_resources_never_get_barriers() {
    let t = common::device();
    let buffer = Buffer::new(
        &t.device,
        BufferDesc::structured(16, 4, BufferFlags::SHADER_RESOURCE),
        "Static Data",
    )
    .unwrap();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    assert_eq!(ctx.pending_barrier_count(), 0);
    ctx.execute().unwrap();

    assert!(transitions_of(&t.gpu, buffer.resource().handle()).is_empty());
}

#[test]
fn test_uav_barrier_is_recorded_on_flush() {
    let t = common::device();
    let buffer = uav_buffer(&t.device, "Accumulator");

    let mut ctx = t.device.allocate_context(QueueType::Compute).unwrap();
    ctx.transition(&*buffer, ResourceStates::UNORDERED_ACCESS);
    ctx.uav_barrier(Some(&*buffer as &dyn GpuResource));
    ctx.uav_barrier(None);
    ctx.flush_resource_barriers();
    ctx.execute().unwrap();

    let uavs: Vec<_> = t
        .gpu
        .executed_barriers()
        .into_iter()
        .filter(|(queue, barrier)| *queue == QueueType::Compute && matches!(barrier, Barrier::Uav { .. }))
        .map(|(_, barrier)| barrier)
        .collect();
    assert_eq!(
        uavs,
        vec![
            Barrier::Uav {
                resource: Some(buffer.resource().handle())
            },
            Barrier::Uav { resource: None },
        ]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending resolution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_pending_barrier_resolves_against_the_previous_context_in_the_batch() {
    let t = common::device();
    let buffer = uav_buffer(&t.device, "Shared");

    let mut first = t.device.allocate_context(QueueType::Graphics).unwrap();
    let mut second = t.device.allocate_context(QueueType::Graphics).unwrap();
    first.transition(&*buffer, ResourceStates::UNORDERED_ACCESS);
    second.transition(&*buffer, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    assert_eq!(second.pending_barrier_count(), 1);
    assert_eq!(second.batched_barrier_count(), 0);

    let first_list = first.native_list();
    let second_list = second.native_list();
    t.gpu.clear_executed();
    t.device
        .queue(QueueType::Graphics)
        .execute(vec![first, second])
        .unwrap();

    let handle = buffer.resource().handle();
    let ops = t.gpu.executed();
    let begin = |list| {
        ops.iter()
            .position(|op| op.kind == ExecutedKind::BeginList(list))
            .expect("list executed")
    };
    let first_at = begin(first_list);
    let second_at = begin(second_list);
    let handoff = ops
        .iter()
        .position(|op| match &op.kind {
            ExecutedKind::Command(NativeCommand::Barriers(barriers)) => barriers.contains(&Barrier::Transition {
                resource: handle,
                subresource: ALL_SUBRESOURCES,
                before: ResourceStates::UNORDERED_ACCESS,
                after: ResourceStates::NON_PIXEL_SHADER_RESOURCE,
            }),
            _ => false,
        })
        .expect("hand-off barrier executed");

    assert!(first_at < handoff && handoff < second_at, "{ops:?}");
    assert!(ops[second_at..]
        .iter()
        .all(|op| !matches!(op.kind, ExecutedKind::Command(NativeCommand::Barriers(_)))));
    assert_eq!(
        t.gpu.resource_state(handle, 0),
        Some(ResourceStates::NON_PIXEL_SHADER_RESOURCE)
    );
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_pending_barrier_already_satisfied_is_skipped() {
    let t = common::device();
    let buffer = uav_buffer(&t.device, "Steady");

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::UNORDERED_ACCESS);
    ctx.execute().unwrap();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::UNORDERED_ACCESS);
    ctx.execute().unwrap();

    assert_eq!(transitions_of(&t.gpu, buffer.resource().handle()).len(), 1);
}

#[test]
fn test_diverged_subresources_resolve_one_by_one() {
    let t = common::device();
    let texture = Texture::new(
        &t.device,
        TextureDesc::new_2d(64, 64, Format::R8G8B8A8Unorm, TextureFlags::RENDER_TARGET | TextureFlags::SHADER_RESOURCE)
            .with_mips(3),
        "Mip Chain",
    )
    .unwrap();
    let handle = texture.resource().handle();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition_subresource(&*texture, ResourceStates::RENDER_TARGET, 1);
    ctx.execute().unwrap();
    assert_eq!(t.gpu.resource_state(handle, 0), Some(ResourceStates::COMMON));
    assert_eq!(t.gpu.resource_state(handle, 1), Some(ResourceStates::RENDER_TARGET));

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*texture, ResourceStates::PIXEL_SHADER_RESOURCE);
    ctx.execute().unwrap();

    let transitions = transitions_of(&t.gpu, handle);
    assert!(transitions.contains(&(
        1,
        ResourceStates::RENDER_TARGET,
        ResourceStates::PIXEL_SHADER_RESOURCE
    )));
    assert!(!transitions
        .iter()
        .any(|(subresource, _, after)| *subresource == ALL_SUBRESOURCES && *after == ResourceStates::PIXEL_SHADER_RESOURCE));
    for mip in 0..3 {
        assert_eq!(
            t.gpu.resource_state(handle, mip),
            Some(ResourceStates::PIXEL_SHADER_RESOURCE)
        );
    }
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

// ─────────────────────────────────────────────────────────────────────────────
// Rejected submissions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_rejected_submission_leaves_global_state_untouched() {
    let t = common::device();
    let buffer = uav_buffer(&t.device, "Rejected");
    let handle = buffer.resource().handle();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::UNORDERED_ACCESS);
    t.gpu.fail_next_submissions(QueueType::Graphics, 1);
    assert!(ctx.execute().is_err());
    assert_eq!(buffer.resource().state(0), ResourceStates::COMMON);

    // The next first use resolves against the state the GPU actually holds.
    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*buffer, ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    ctx.execute().unwrap();

    assert_eq!(
        transitions_of(&t.gpu, handle),
        vec![(
            ALL_SUBRESOURCES,
            ResourceStates::COMMON,
            ResourceStates::NON_PIXEL_SHADER_RESOURCE
        )]
    );
    assert_eq!(buffer.resource().state(0), ResourceStates::NON_PIXEL_SHADER_RESOURCE);
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_rejected_submission_recycles_its_lists() {
    let t = common::device();
    let queue = t.device.queue(QueueType::Graphics);
    let first = uav_buffer(&t.device, "First");
    let second = uav_buffer(&t.device, "Second");

    // A pending first use needs a prologue list on top of the context's own.
    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*first, ResourceStates::UNORDERED_ACCESS);
    t.gpu.fail_next_submissions(QueueType::Graphics, 1);
    assert!(ctx.execute().is_err());
    let lists = queue.command_list_count();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.transition(&*second, ResourceStates::UNORDERED_ACCESS);
    ctx.execute().unwrap();
    assert_eq!(queue.command_list_count(), lists);
}
