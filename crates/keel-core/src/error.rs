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

//! Errors returned across the native API boundary.

use std::fmt;

/// A failed call into the native graphics API.
///
/// `hresult` carries the native status code (an `HRESULT` on D3D12-class
/// APIs); `message` is the human readable context assembled by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (hresult {code})")]
pub struct ApiError {
    /// The native status code.
    pub hresult: i32,
    /// A description of the failed operation.
    pub message: String,
    #[doc(hidden)]
    code: HResult,
}

impl ApiError {
    /// `E_FAIL`.
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
    /// `E_INVALIDARG`.
    pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;
    /// `E_OUTOFMEMORY`.
    pub const E_OUTOFMEMORY: i32 = 0x8007_000E_u32 as i32;
    /// `DXGI_ERROR_DEVICE_REMOVED`.
    pub const DEVICE_REMOVED: i32 = 0x887A_0005_u32 as i32;
    /// `DXGI_ERROR_DEVICE_HUNG`.
    pub const DEVICE_HUNG: i32 = 0x887A_0006_u32 as i32;
    /// `DXGI_ERROR_UNSUPPORTED`.
    pub const UNSUPPORTED: i32 = 0x887A_0004_u32 as i32;

    /// Creates a new error from a status code and a message.
    pub fn new(hresult: i32, message: impl Into<String>) -> Self {
        Self {
            hresult,
            message: message.into(),
            code: HResult(hresult),
        }
    }

    /// Returns `true` for the device-removed family of status codes.
    pub fn is_device_removed(&self) -> bool {
        matches!(self.hresult, Self::DEVICE_REMOVED | Self::DEVICE_HUNG)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HResult(i32);

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ApiError::new(ApiError::E_OUTOFMEMORY, "CreateCommittedResource failed");
        assert_eq!(
            format!("{err}"),
            "CreateCommittedResource failed (hresult 0x8007000E)"
        );
        assert!(!err.is_device_removed());
        assert!(ApiError::new(ApiError::DEVICE_HUNG, "present").is_device_removed());
    }
}
