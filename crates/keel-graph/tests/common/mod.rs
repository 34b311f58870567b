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


//! A headless device for the render graph tests.

#![allow(dead_code)]

use keel_core::config::DeviceSettings;
use keel_core::rhi::{Barrier, BufferDesc, BufferFlags, Format, NativeResource, ResourceStates, TextureDesc, TextureFlags};
use keel_infra::{CompletionMode, HeadlessBackend, HeadlessConfig, HeadlessDevice};
use keel_rhi::Device;
use std::sync::Arc;

pub struct TestDevice {
    pub device: Arc<Device>,
    pub gpu: Arc<HeadlessDevice>,
    _backend: HeadlessBackend,
}

pub fn device_with(settings: DeviceSettings) -> TestDevice {
    keel_infra::logging::init_for_tests();
    let backend = HeadlessBackend::new(HeadlessConfig::default().with_completion(CompletionMode::Immediate));
    let device = Device::new(&backend, settings).expect("headless device creation");
    let gpu = backend.last_device().expect("the backend created a device");
    TestDevice {
        device,
        gpu,
        _backend: backend,
    }
}

pub fn device() -> TestDevice {
    device_with(DeviceSettings::default())
}

pub fn uav_buffer_desc(size: u64) -> BufferDesc {
    BufferDesc::byte_address(size, BufferFlags::UNORDERED_ACCESS | BufferFlags::SHADER_RESOURCE)
}

pub fn uav_texture_desc(width: u32, height: u32) -> TextureDesc {
    TextureDesc::new_2d(
        width,
        height,
        Format::R8G8B8A8Unorm,
        TextureFlags::UNORDERED_ACCESS | TextureFlags::SHADER_RESOURCE,
    )
}

pub fn render_target_desc(width: u32, height: u32) -> TextureDesc {
    TextureDesc::new_2d(
        width,
        height,
        Format::R8G8B8A8Unorm,
        TextureFlags::RENDER_TARGET | TextureFlags::SHADER_RESOURCE,
    )
}

/// Executed transitions of one resource as `(before, after)`.
pub fn transitions_of(gpu: &HeadlessDevice, target: NativeResource) -> Vec<(ResourceStates, ResourceStates)> {
    gpu.executed_barriers()
        .into_iter()
        .filter_map(|(_, barrier)| match barrier {
            Barrier::Transition {
                resource, before, after, ..
            } if resource == target => Some((before, after)),
            _ => None,
        })
        .collect()
}
