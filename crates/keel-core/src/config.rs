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

//! Device configuration.
//!
//! [`DeviceSettings`] gathers every tunable the RHI reads at construction
//! time. It deserializes from RON so applications can ship a settings file
//! next to the executable:
//!
//! ```ron
//! (
//!     frames_in_flight: 2,
//!     persistent_descriptor_count: 8192,
//!     shader: (cache_dir: "Saved/ShaderCache", include_dirs: ["Shaders"]),
//!     swapchain: (display_mode: Hdr10),
//! )
//! ```

use crate::rhi::ShaderModel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An error raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("failed to read settings file '{path}': {source}")]
    Io {
        /// The settings path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid RON for [`DeviceSettings`].
    #[error("failed to parse device settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// The values are inconsistent.
    #[error("invalid device settings: {0}")]
    Invalid(String),
}

/// Native validation layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Enables the native debug layer and its info queue.
    pub enable_debug_layer: bool,
    /// Breaks into the debugger on error messages.
    pub break_on_error: bool,
    /// Breaks into the debugger on warning messages.
    pub break_on_warning: bool,
    /// Enables GPU-based validation (slow).
    pub gpu_validation: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enable_debug_layer: cfg!(debug_assertions),
            break_on_error: false,
            break_on_warning: false,
            gpu_validation: false,
        }
    }
}

/// How the swapchain presents to the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayMode {
    /// 8-bit UNORM, sRGB colour space.
    Sdr,
    /// 10-bit UNORM, HDR10 / ST.2084 colour space.
    Hdr10,
    /// 16-bit float, linear scRGB colour space.
    HdrScRgb,
}

/// Swapchain configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapChainSettings {
    /// Requested display mode; downgraded to SDR when the output lacks HDR.
    pub display_mode: DisplayMode,
    /// Number of backbuffers.
    pub buffer_count: u32,
    /// Allows tearing when presenting with a sync interval of 0.
    pub allow_tearing: bool,
    /// Uses the frame-latency waitable object to throttle the CPU.
    pub use_waitable_object: bool,
    /// Maximum number of queued frames when the waitable object is used.
    pub max_frame_latency: u32,
    /// Presents with vertical sync.
    pub vsync: bool,
}

impl Default for SwapChainSettings {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Sdr,
            buffer_count: 3,
            allow_tearing: true,
            use_waitable_object: true,
            max_frame_latency: 2,
            vsync: true,
        }
    }
}

/// Shader compilation and caching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderSettings {
    /// Directory holding compiled shader cache files.
    pub cache_dir: PathBuf,
    /// Directories searched, in order, for sources and includes.
    pub include_dirs: Vec<PathBuf>,
    /// Target shader model.
    pub shader_model: ShaderModel,
    /// Compiles with debug information and without optimizations.
    pub debug: bool,
    /// Directory watched for hot reload, if any.
    pub watch_directory: Option<PathBuf>,
}

impl Default for ShaderSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("ShaderCache"),
            include_dirs: Vec::new(),
            shader_model: ShaderModel::SM_6_6,
            debug: cfg!(debug_assertions),
            watch_directory: None,
        }
    }
}

/// Render graph configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Frames a pooled transient resource may stay unused before release.
    pub pool_eviction_frames: u32,
    /// Culls passes that contribute to no sink.
    pub enable_culling: bool,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            pool_eviction_frames: 3,
            enable_culling: true,
        }
    }
}

/// Every tunable of the device, its heaps and its allocators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Native validation layer.
    pub validation: ValidationSettings,
    /// Installs the device-removed handler and DRED reporting.
    pub enable_dred: bool,
    /// Maximum number of frames the CPU may run ahead of the GPU.
    pub frames_in_flight: u32,
    /// Size of the persistent (bindless) region of the GPU resource heap.
    pub persistent_descriptor_count: u32,
    /// Descriptors per dynamic page.
    pub dynamic_descriptor_page_size: u32,
    /// Number of dynamic pages.
    pub dynamic_descriptor_page_count: u32,
    /// Size of the GPU sampler heap.
    pub sampler_descriptor_count: u32,
    /// Descriptors per CPU heap block.
    pub cpu_descriptor_heap_size: u32,
    /// Size in bytes of a scratch page.
    pub scratch_page_size: u64,
    /// Number of batched barriers that triggers a flush.
    pub barrier_batch_size: usize,
    /// Shader compilation.
    pub shader: ShaderSettings,
    /// Swapchain.
    pub swapchain: SwapChainSettings,
    /// Render graph.
    pub graph: GraphSettings,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            validation: ValidationSettings::default(),
            enable_dred: true,
            frames_in_flight: 3,
            persistent_descriptor_count: 4096,
            dynamic_descriptor_page_size: 256,
            dynamic_descriptor_page_count: 64,
            sampler_descriptor_count: 2048,
            cpu_descriptor_heap_size: 256,
            scratch_page_size: 64 * 1024,
            barrier_batch_size: 16,
            shader: ShaderSettings::default(),
            swapchain: SwapChainSettings::default(),
            graph: GraphSettings::default(),
        }
    }
}

impl DeviceSettings {
    /// Parses settings from a RON string. Missing fields keep their defaults.
    pub fn from_ron_str(source: &str) -> Result<Self, SettingsError> {
        let settings: Self = ron::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&source)
    }

    /// Checks the values the allocators depend on.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.frames_in_flight == 0 {
            return Err(SettingsError::Invalid("frames_in_flight must be at least 1".into()));
        }
        if self.persistent_descriptor_count == 0 {
            return Err(SettingsError::Invalid(
                "persistent_descriptor_count must be at least 1".into(),
            ));
        }
        if self.dynamic_descriptor_page_size == 0 || self.dynamic_descriptor_page_count == 0 {
            return Err(SettingsError::Invalid(
                "the dynamic descriptor region needs at least one non-empty page".into(),
            ));
        }
        if self.scratch_page_size == 0 || !self.scratch_page_size.is_power_of_two() {
            return Err(SettingsError::Invalid(format!(
                "scratch_page_size must be a power of two, got {}",
                self.scratch_page_size
            )));
        }
        if self.swapchain.buffer_count < 2 {
            return Err(SettingsError::Invalid(
                "a swapchain needs at least two buffers".into(),
            ));
        }
        Ok(())
    }

    /// Total descriptors of the GPU-visible resource heap.
    pub fn gpu_resource_heap_size(&self) -> u32 {
        self.persistent_descriptor_count
            + self.dynamic_descriptor_page_size * self.dynamic_descriptor_page_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = DeviceSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.frames_in_flight, 3);
        assert_eq!(settings.swapchain.buffer_count, 3);
        assert_eq!(settings.gpu_resource_heap_size(), 4096 + 256 * 64);
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let settings = DeviceSettings::from_ron_str(
            "(frames_in_flight: 2, swapchain: (display_mode: Hdr10), shader: (include_dirs: [\"Shaders\"]))",
        )
        .expect("valid settings");

        assert_eq!(settings.frames_in_flight, 2);
        assert_eq!(settings.swapchain.display_mode, DisplayMode::Hdr10);
        assert_eq!(settings.swapchain.buffer_count, 3);
        assert_eq!(settings.shader.include_dirs, vec![PathBuf::from("Shaders")]);
        assert_eq!(settings.persistent_descriptor_count, 4096);
    }

    #[test]
    fn invalid_scratch_page_size_is_rejected() {
        let err = DeviceSettings::from_ron_str("(scratch_page_size: 1000)").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn malformed_ron_is_a_parse_error() {
        let err = DeviceSettings::from_ron_str("(frames_in_flight: \"three\")").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
