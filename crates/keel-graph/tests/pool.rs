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


//! Transient pool behaviour across frames.

mod common;

use keel_core::config::DeviceSettings;
use keel_core::rhi::QueueType;
use keel_graph::{GraphError, PassFlags, RenderGraph, TransientPool};
use std::sync::Arc;

/// One frame reading a transient written by the previous pass.
fn run_frame(device: &Arc<keel_rhi::Device>) -> Arc<keel_rhi::Buffer> {
    let mut graph = RenderGraph::new(device);
    let temp = graph.create_buffer("Temp", common::uav_buffer_desc(1024));
    graph.add_pass("Produce", PassFlags::COMPUTE).write(temp).build();
    graph
        .add_pass("Consume", PassFlags::COMPUTE | PassFlags::NEVER_CULL)
        .read(temp)
        .build();
    graph.compile().unwrap();
    let buffer = graph.resolved_buffer(temp).unwrap().clone();
    graph.execute().unwrap();
    buffer
}

#[test]
fn test_pool_is_a_device_subsystem() {
    let t = common::device();
    let pool = TransientPool::for_device(&t.device);
    assert!(Arc::ptr_eq(&pool, &TransientPool::for_device(&t.device)));
    assert!(t.device.subsystems().contains::<TransientPool>());
}

#[test]
fn test_transients_return_to_the_pool_after_execution() {
    let t = common::device();
    let buffer = run_frame(&t.device);
    let pool = TransientPool::for_device(&t.device);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.created_count(), 1);
    assert!(pool.contains(&keel_graph::GraphResource::Buffer(buffer)));
}

#[test]
fn test_pooled_resource_is_reused_once_the_frame_completes() {
    let t = common::device();
    let first = run_frame(&t.device);
    t.device.tick_frame().unwrap();
    let second = run_frame(&t.device);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(TransientPool::for_device(&t.device).created_count(), 1);
}

#[test]
fn test_pooled_resource_in_flight_is_not_reused() {
    let t = common::device();
    let first = run_frame(&t.device);
    // The frame fence has not been signaled for the first frame yet.
    let second = run_frame(&t.device);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(TransientPool::for_device(&t.device).created_count(), 2);
}

#[test]
fn test_idle_resources_are_evicted() {
    let mut settings = DeviceSettings::default();
    settings.graph.pool_eviction_frames = 2;
    let t = common::device_with(settings);
    let buffer = run_frame(&t.device);
    let handle = buffer.resource().handle();
    drop(buffer);
    let pool = TransientPool::for_device(&t.device);

    t.device.tick_frame().unwrap();
    drop(RenderGraph::new(&t.device));
    assert_eq!(pool.len(), 1);

    t.device.tick_frame().unwrap();
    drop(RenderGraph::new(&t.device));
    assert!(pool.is_empty());

    // The release goes through the deferred queue.
    t.device.wait_for_idle().unwrap();
    t.device.tick_frame().unwrap();
    t.device.tick_frame().unwrap();
    assert!(!t.gpu.is_alive(keel_core::rhi::NativeObject::Resource(handle)));
}

#[test]
fn test_unexecuted_graph_returns_its_transients() {
    let t = common::device();
    let mut graph = RenderGraph::new(&t.device);
    let temp = graph.create_buffer("Temp", common::uav_buffer_desc(64));
    graph
        .add_pass("Never Submitted", PassFlags::COMPUTE | PassFlags::NEVER_CULL)
        .write(temp)
        .build();
    graph.compile().unwrap();
    drop(graph);
    assert_eq!(TransientPool::for_device(&t.device).len(), 1);
}

#[test]
fn test_failed_execution_still_returns_its_transients() {
    let t = common::device();
    let mut graph = RenderGraph::new(&t.device);
    let temp = graph.create_buffer("Temp", common::uav_buffer_desc(1024));
    graph.add_pass("Produce", PassFlags::COMPUTE).write(temp).build();
    graph
        .add_pass("Consume", PassFlags::COMPUTE | PassFlags::NEVER_CULL)
        .read(temp)
        .build();
    graph.compile().unwrap();
    let first = graph.resolved_buffer(temp).unwrap().clone();

    t.gpu.fail_next_submissions(QueueType::Graphics, 1);
    assert!(matches!(graph.execute(), Err(GraphError::Rhi(_))));
    let pool = TransientPool::for_device(&t.device);
    assert_eq!(pool.len(), 1);

    t.device.tick_frame().unwrap();
    let second = run_frame(&t.device);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(pool.created_count(), 1);
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}
