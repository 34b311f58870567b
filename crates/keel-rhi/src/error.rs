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

//! Error types of the RHI.

use keel_core::config::SettingsError;
use keel_core::ApiError;
use std::path::PathBuf;
use thiserror::Error;

/// An error raised by the RHI.
#[derive(Debug, Error)]
pub enum RhiError {
    /// A native API call failed.
    #[error("{0}")]
    Api(ApiError),
    /// The GPU device was removed or hung.
    #[error("The device was removed: {reason}")]
    DeviceRemoved {
        /// Removal reason reported by the native API.
        reason: String,
    },
    /// The selected adapter lacks a required feature.
    #[error("Adapter '{adapter}' is not supported: {reason}")]
    UnsupportedDevice {
        /// Adapter name.
        adapter: String,
        /// The missing feature.
        reason: String,
    },
    /// No adapter could be used.
    #[error("No suitable graphics adapter was found")]
    NoAdapter,
    /// The persistent descriptor region is full, even after reclaiming
    /// every index whose frame completed.
    #[error("Out of persistent descriptor heap space ({capacity}).")]
    OutOfPersistentDescriptors {
        /// Size of the persistent region.
        capacity: u32,
    },
    /// Every dynamic descriptor page is still in use by the GPU.
    #[error("Out of dynamic descriptor pages ({pages} pages of {page_size}).")]
    OutOfDynamicDescriptors {
        /// Number of pages.
        pages: u32,
        /// Descriptors per page.
        page_size: u32,
    },
    /// A resource description was rejected.
    #[error("Invalid description for '{name}': {reason}")]
    InvalidResource {
        /// Debug name of the resource.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Shader compilation or caching failed.
    #[error(transparent)]
    Shader(#[from] ShaderError),
    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The device settings are invalid.
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
    /// A subsystem the operation needs was not installed on the device.
    #[error("The {0} subsystem is not installed")]
    MissingSubsystem(&'static str),
}

impl From<ApiError> for RhiError {
    fn from(error: ApiError) -> Self {
        if error.is_device_removed() {
            RhiError::DeviceRemoved {
                reason: error.to_string(),
            }
        } else {
            RhiError::Api(error)
        }
    }
}

/// An error raised while loading or compiling a shader.
#[derive(Debug, Error)]
pub enum ShaderError {
    /// The source file was not found in any include directory.
    #[error("Shader source '{0}' not found")]
    SourceNotFound(PathBuf),
    /// An `#include` could not be resolved.
    #[error("Include '{include}' from '{from}' not found")]
    IncludeNotFound {
        /// The include as written.
        include: String,
        /// The including file.
        from: PathBuf,
    },
    /// The compiler rejected the source.
    #[error("Failed to compile '{path}' ({entry}):\n{message}")]
    Compilation {
        /// Source path.
        path: PathBuf,
        /// Entry point.
        entry: String,
        /// Compiler output.
        message: String,
    },
    /// Reading or writing a cache file failed.
    #[error("Shader cache I/O error on '{path}': {source}")]
    CacheIo {
        /// Cache file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A cache file was written by another cache version.
    #[error("Shader cache '{path}' has version {found}, expected {expected}")]
    CacheVersionMismatch {
        /// Cache file path.
        path: PathBuf,
        /// Version found in the file.
        found: u32,
        /// Current version.
        expected: u32,
    },
    /// A cache file ended early or holds invalid data.
    #[error("Shader cache '{path}' is corrupt")]
    CacheCorrupt {
        /// Cache file path.
        path: PathBuf,
    },
}

impl ShaderError {
    /// Returns `true` for errors that only invalidate the cache, after
    /// which the shader is recompiled.
    pub fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            ShaderError::CacheIo { .. }
                | ShaderError::CacheVersionMismatch { .. }
                | ShaderError::CacheCorrupt { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_exhaustion_message() {
        let err = RhiError::OutOfPersistentDescriptors { capacity: 1024 };
        assert_eq!(err.to_string(), "Out of persistent descriptor heap space (1024).");
    }

    #[test]
    fn removed_devices_are_mapped() {
        let err: RhiError = ApiError::new(ApiError::DEVICE_REMOVED, "hung").into();
        assert!(matches!(err, RhiError::DeviceRemoved { .. }));
        let err: RhiError = ApiError::new(ApiError::E_INVALIDARG, "bad").into();
        assert!(matches!(err, RhiError::Api(_)));
    }
}
