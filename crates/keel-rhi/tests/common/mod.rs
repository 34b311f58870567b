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


//! Shared set-up for the integration tests: a device over the headless
//! backend.

#![allow(dead_code)]

use keel_core::config::DeviceSettings;
use keel_infra::{CompletionMode, HeadlessBackend, HeadlessConfig, HeadlessDevice};
use keel_rhi::Device;
use std::sync::Arc;

pub struct TestDevice {
    pub device: Arc<Device>,
    pub gpu: Arc<HeadlessDevice>,
    _backend: HeadlessBackend,
}

/// Settings small enough to exhaust in a test.
pub fn settings() -> DeviceSettings {
    DeviceSettings {
        persistent_descriptor_count: 256,
        dynamic_descriptor_page_size: 64,
        dynamic_descriptor_page_count: 8,
        ..DeviceSettings::default()
    }
}

pub fn device_with(settings: DeviceSettings, completion: CompletionMode) -> TestDevice {
    device_from(HeadlessConfig::default().with_completion(completion), settings)
}

pub fn device_from(config: HeadlessConfig, settings: DeviceSettings) -> TestDevice {
    keel_infra::logging::init_for_tests();
    let backend = HeadlessBackend::new(config);
    let device = Device::new(&backend, settings).expect("headless device creation");
    let gpu = backend.last_device().expect("the backend created a device");
    TestDevice {
        device,
        gpu,
        _backend: backend,
    }
}

pub fn device() -> TestDevice {
    device_with(settings(), CompletionMode::Immediate)
}
