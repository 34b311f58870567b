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


use criterion::{criterion_group, criterion_main, Criterion};
use keel_core::config::DeviceSettings;
use keel_core::rhi::{BufferDesc, BufferFlags};
use keel_graph::{PassFlags, RenderGraph};
use keel_infra::{HeadlessBackend, HeadlessConfig};
use keel_rhi::{Buffer, Device};
use std::hint::black_box;
use std::sync::Arc;

/// A chain of compute passes ping-ponging between transients, plus a side
/// branch every fourth pass that culling removes.
fn build_chain(device: &Arc<Device>, output: &Arc<Buffer>, length: usize) -> RenderGraph {
    let desc = BufferDesc::byte_address(64 * 1024, BufferFlags::UNORDERED_ACCESS | BufferFlags::SHADER_RESOURCE);
    let mut graph = RenderGraph::new(device);
    let mut previous = graph.create_buffer("Seed", desc);
    graph.add_pass("Seed", PassFlags::COMPUTE).write(previous).build();
    for i in 0..length {
        let next = graph.create_buffer("Chain", desc);
        graph.add_pass("Step", PassFlags::COMPUTE).read(previous).write(next).build();
        if i % 4 == 0 {
            let dead = graph.create_buffer("Dead", desc);
            graph.add_pass("Branch", PassFlags::COMPUTE).read(next).write(dead).build();
        }
        previous = next;
    }
    let output = graph.import_buffer(output);
    graph.add_pass("Resolve", PassFlags::COMPUTE).read(previous).write(output).build();
    graph
}

fn bench_graph(c: &mut Criterion) {
    let backend = HeadlessBackend::new(HeadlessConfig::default());
    let device = Device::new(&backend, DeviceSettings::default()).expect("headless device creation");
    let output = Buffer::new(
        &device,
        BufferDesc::byte_address(64 * 1024, BufferFlags::UNORDERED_ACCESS),
        "Output",
    )
    .expect("output buffer");

    let mut group = c.benchmark_group("Render Graph");

    for length in [16, 128] {
        group.bench_function(format!("Compile chain of {length}"), |b| {
            b.iter(|| {
                let mut graph = build_chain(&device, &output, length);
                graph.compile().expect("compile");
                black_box(graph.is_compiled());
            });
        });

        group.bench_function(format!("Compile and execute chain of {length}"), |b| {
            b.iter(|| {
                let graph = build_chain(&device, &output, length);
                black_box(graph.execute().expect("execute"));
                device.tick_frame().expect("frame");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_graph);
criterion_main!(benches);
