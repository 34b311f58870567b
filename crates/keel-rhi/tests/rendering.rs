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


//! Integration tests for render passes, draws, indirect execution and
//! presentation.

mod common;

use keel_core::config::DisplayMode;
use keel_core::rhi::{
    BlendMode, BufferDesc, BufferFlags, ColorSpace, Format, NativeCommand, OutputInfo, QueueType, ResourceStates,
    RootSignatureDesc, ShaderStage, TextureDesc, TextureFlags,
};
use keel_infra::headless::ExecutedKind;
use keel_infra::{HeadlessCompiler, HeadlessConfig};
use keel_rhi::{
    Buffer, CommandSignature, PipelineStateBuilder, RenderPassInfo, RenderTarget, RootSignature, ShaderDesc,
    SwapChain, Texture,
};
use raw_window_handle::{RawWindowHandle, WebWindowHandle};
use std::fs;
use std::sync::Arc;

const SHADERS: &str = "\
float4 VSMain(uint id : SV_VertexID) : SV_Position { return float4(0, 0, 0, 1); }
float4 PSMain() : SV_Target { return float4(1, 0, 0, 1); }
[numthreads(64, 1, 1)]
void CSMain(uint3 id : SV_DispatchThreadID) {}
";

fn window() -> RawWindowHandle {
    RawWindowHandle::Web(WebWindowHandle::new(1))
}

fn render_target(device: &keel_rhi::Device, name: &str) -> Arc<Texture> {
    Texture::new(
        device,
        TextureDesc::new_2d(4, 4, Format::R8G8B8A8Unorm, TextureFlags::RENDER_TARGET | TextureFlags::SHADER_RESOURCE),
        name,
    )
    .unwrap()
}

fn executed_commands(gpu: &keel_infra::HeadlessDevice) -> Vec<NativeCommand> {
    gpu.executed()
        .into_iter()
        .filter_map(|op| match op.kind {
            ExecutedKind::Command(command) => Some(command),
            _ => None,
        })
        .collect()
}

/// A device with a shader manager reading from a temporary directory.
fn device_with_shaders() -> (tempfile::TempDir, common::TestDevice) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("triangle.hlsl"), SHADERS).unwrap();
    let mut settings = common::settings();
    settings.shader.cache_dir = dir.path().join("cache");
    settings.shader.include_dirs = vec![dir.path().to_path_buf()];
    let t = common::device_with(settings, keel_infra::CompletionMode::Immediate);
    t.device
        .install_shader_manager(Arc::new(HeadlessCompiler::new()))
        .unwrap();
    (dir, t)
}

// ─────────────────────────────────────────────────────────────────────────────
// Render passes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_render_pass_clears_and_leaves_targets_renderable() {
    let t = common::device();
    let target = render_target(&t.device, "Scene Color");

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.begin_render_pass(
        RenderPassInfo::new()
            .named("Clear")
            .color(RenderTarget::new(target.clone()).clear([1.0, 0.0, 0.0, 1.0])),
    )
    .unwrap();
    ctx.end_render_pass();
    ctx.execute().unwrap();

    let handle = target.resource().handle();
    assert_eq!(t.gpu.resource_state(handle, 0), Some(ResourceStates::RENDER_TARGET));
    let contents = t.gpu.resource_contents(handle).unwrap();
    assert_eq!(&contents[..4], &[255, 0, 0, 255]);
    assert!(executed_commands(&t.gpu)
        .iter()
        .any(|c| matches!(c, NativeCommand::SetViewports(_))));
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_draw_binds_pipeline_and_root_signature_once() {
    let (_dir, t) = device_with_shaders();
    let target = render_target(&t.device, "Triangle Target");
    let root = RootSignature::new(&t.device, RootSignatureDesc::default(), "Empty Root").unwrap();
    let pipeline = PipelineStateBuilder::new("Triangle")
        .root_signature(root)
        .shader(ShaderDesc::new("triangle.hlsl", "VSMain", ShaderStage::Vertex))
        .shader(ShaderDesc::new("triangle.hlsl", "PSMain", ShaderStage::Pixel))
        .render_targets(&[Format::R8G8B8A8Unorm], BlendMode::Replace)
        .build(&t.device)
        .unwrap();

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.begin_render_pass(RenderPassInfo::new().color(RenderTarget::new(target.clone()))).unwrap();
    ctx.set_pipeline_state(&pipeline).unwrap();
    ctx.set_pipeline_state(&pipeline).unwrap();
    ctx.draw(3, 1, 0, 0).unwrap();
    ctx.end_render_pass();
    ctx.execute().unwrap();

    let commands = executed_commands(&t.gpu);
    let root_binds = commands
        .iter()
        .filter(|c| matches!(c, NativeCommand::SetRootSignature { .. }))
        .count();
    assert_eq!(root_binds, 1);
    assert!(commands.contains(&NativeCommand::Draw {
        vertex_count: 3,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    }));
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

// ─────────────────────────────────────────────────────────────────────────────
// Indirect execution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_execute_indirect_moves_arguments_into_the_indirect_state() {
    let (_dir, t) = device_with_shaders();
    let root = RootSignature::new(&t.device, RootSignatureDesc::default(), "Cull Root").unwrap();
    let pipeline = PipelineStateBuilder::new("Cull")
        .root_signature(root)
        .shader(ShaderDesc::new("triangle.hlsl", "CSMain", ShaderStage::Compute))
        .build(&t.device)
        .unwrap();
    let signature = CommandSignature::dispatch(&t.device).unwrap();
    let arguments = Buffer::new(
        &t.device,
        BufferDesc::structured(1, 12, BufferFlags::UNORDERED_ACCESS | BufferFlags::INDIRECT_ARGUMENTS),
        "Dispatch Arguments",
    )
    .unwrap();

    let mut ctx = t.device.allocate_context(QueueType::Compute).unwrap();
    ctx.write_buffer(&arguments, 0, bytemuck::cast_slice(&[4u32, 1, 1])).unwrap();
    ctx.set_pipeline_state(&pipeline).unwrap();
    ctx.execute_indirect(&signature, 1, &arguments, 0, None).unwrap();
    ctx.execute().unwrap();

    assert_eq!(
        t.gpu.resource_state(arguments.resource().handle(), 0),
        Some(ResourceStates::INDIRECT_ARGUMENT)
    );
    assert!(executed_commands(&t.gpu)
        .iter()
        .any(|c| matches!(c, NativeCommand::ExecuteIndirect { max_count: 1, .. })));
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

// ─────────────────────────────────────────────────────────────────────────────
// Presentation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_swapchain_renders_presents_and_resizes() {
    let t = common::device();
    let mut swap_chain = SwapChain::new(&t.device, window(), 64, 32).unwrap();
    assert_eq!(swap_chain.backbuffers().len(), 3);
    assert_eq!(swap_chain.format(), Format::R8G8B8A8Unorm);

    let mut ctx = t.device.allocate_context(QueueType::Graphics).unwrap();
    ctx.begin_render_pass(
        RenderPassInfo::new().color(RenderTarget::new(swap_chain.current_backbuffer().clone()).clear([0.0; 4])),
    )
    .unwrap();
    ctx.end_render_pass();
    swap_chain.prepare_present(&mut ctx);
    ctx.execute().unwrap();
    swap_chain.present().unwrap();
    t.device.tick_frame().unwrap();

    assert_eq!(t.gpu.present_count(swap_chain.native()), 1);
    assert_eq!(swap_chain.current_index(), 1);

    assert!(!swap_chain.resize(64, 32).unwrap(), "same size is a no-op");
    assert!(!swap_chain.resize(0, 32).unwrap(), "minimised windows keep their buffers");
    assert!(swap_chain.resize(128, 96).unwrap());
    assert_eq!((swap_chain.width(), swap_chain.height()), (128, 96));
    assert!(swap_chain.backbuffers().iter().all(|b| b.width() == 128 && b.height() == 96));
    assert!(t.gpu.validation_errors().is_empty(), "{:?}", t.gpu.validation_errors());
}

#[test]
fn test_hdr_request_is_honoured_on_an_hdr_output() {
    let mut settings = common::settings();
    settings.swapchain.display_mode = DisplayMode::Hdr10;
    let t = common::device_with(settings, keel_infra::CompletionMode::Immediate);

    let swap_chain = SwapChain::new(&t.device, window(), 64, 64).unwrap();
    assert_eq!(swap_chain.display_mode(), DisplayMode::Hdr10);
    assert_eq!(swap_chain.format(), Format::R10G10B10A2Unorm);
    assert_eq!(t.gpu.swap_chain_color_space(swap_chain.native()), Some(ColorSpace::Hdr10));
}

#[test]
fn test_hdr_request_falls_back_to_sdr_without_an_hdr_output() {
    let mut settings = common::settings();
    settings.swapchain.display_mode = DisplayMode::HdrScRgb;
    let config = HeadlessConfig::default().with_outputs(vec![OutputInfo {
        name: "Office Monitor".into(),
        color_space: ColorSpace::Srgb,
        max_luminance: 250.0,
    }]);
    let t = common::device_from(config, settings);

    let swap_chain = SwapChain::new(&t.device, window(), 64, 64).unwrap();
    assert_eq!(swap_chain.requested_display_mode(), DisplayMode::HdrScRgb);
    assert_eq!(swap_chain.display_mode(), DisplayMode::Sdr);
    assert_eq!(swap_chain.format(), Format::R8G8B8A8Unorm);
    assert_eq!(t.gpu.swap_chain_color_space(swap_chain.native()), Some(ColorSpace::Srgb));
}
