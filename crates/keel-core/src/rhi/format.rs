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

//! Texel and element formats.

/// A texel or typed-buffer element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    R8Uint,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    R8G8B8A8Uint,
    B8G8R8A8Unorm,
    B8G8R8A8UnormSrgb,
    R10G10B10A2Unorm,
    R11G11B10Float,
    R16Float,
    R16Uint,
    R16G16Float,
    R16G16B16A16Float,
    R16G16B16A16Unorm,
    R32Float,
    R32Uint,
    R32Sint,
    R32G32Float,
    R32G32Uint,
    R32G32B32Float,
    R32G32B32A32Float,
    R32G32B32A32Uint,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8X24Uint,
    Bc1Unorm,
    Bc1UnormSrgb,
    Bc3Unorm,
    Bc3UnormSrgb,
    Bc4Unorm,
    Bc5Unorm,
    Bc6hUf16,
    Bc7Unorm,
    Bc7UnormSrgb,
}

impl Format {
    /// Size in bytes of one block (one texel for uncompressed formats).
    pub const fn block_size(self) -> u32 {
        use Format::*;
        match self {
            Unknown => 0,
            R8Unorm | R8Uint => 1,
            R8G8Unorm | R16Float | R16Uint | D16Unorm => 2,
            R8G8B8A8Unorm | R8G8B8A8UnormSrgb | R8G8B8A8Uint | B8G8R8A8Unorm
            | B8G8R8A8UnormSrgb | R10G10B10A2Unorm | R11G11B10Float | R16G16Float | R32Float
            | R32Uint | R32Sint | D24UnormS8Uint | D32Float => 4,
            R16G16B16A16Float | R16G16B16A16Unorm | R32G32Float | R32G32Uint
            | D32FloatS8X24Uint => 8,
            R32G32B32Float => 12,
            R32G32B32A32Float | R32G32B32A32Uint => 16,
            Bc1Unorm | Bc1UnormSrgb | Bc4Unorm => 8,
            Bc3Unorm | Bc3UnormSrgb | Bc5Unorm | Bc6hUf16 | Bc7Unorm | Bc7UnormSrgb => 16,
        }
    }

    /// Width and height of a block in texels.
    pub const fn block_extent(self) -> u32 {
        if self.is_block_compressed() {
            4
        } else {
            1
        }
    }

    /// Returns `true` for BCn formats.
    pub const fn is_block_compressed(self) -> bool {
        use Format::*;
        matches!(
            self,
            Bc1Unorm
                | Bc1UnormSrgb
                | Bc3Unorm
                | Bc3UnormSrgb
                | Bc4Unorm
                | Bc5Unorm
                | Bc6hUf16
                | Bc7Unorm
                | Bc7UnormSrgb
        )
    }

    /// Returns `true` for depth (and depth-stencil) formats.
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm | Format::D24UnormS8Uint | Format::D32Float | Format::D32FloatS8X24Uint
        )
    }

    /// Returns `true` if the format carries a stencil plane.
    pub const fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8X24Uint)
    }

    /// Returns `true` for sRGB-encoded formats.
    pub const fn is_srgb(self) -> bool {
        use Format::*;
        matches!(
            self,
            R8G8B8A8UnormSrgb | B8G8R8A8UnormSrgb | Bc1UnormSrgb | Bc3UnormSrgb | Bc7UnormSrgb
        )
    }

    /// The sRGB variant of the format, or the format itself if it has none.
    pub const fn to_srgb(self) -> Format {
        use Format::*;
        match self {
            R8G8B8A8Unorm => R8G8B8A8UnormSrgb,
            B8G8R8A8Unorm => B8G8R8A8UnormSrgb,
            Bc1Unorm => Bc1UnormSrgb,
            Bc3Unorm => Bc3UnormSrgb,
            Bc7Unorm => Bc7UnormSrgb,
            other => other,
        }
    }

    /// The linear variant of an sRGB format.
    pub const fn to_linear(self) -> Format {
        use Format::*;
        match self {
            R8G8B8A8UnormSrgb => R8G8B8A8Unorm,
            B8G8R8A8UnormSrgb => B8G8R8A8Unorm,
            Bc1UnormSrgb => Bc1Unorm,
            Bc3UnormSrgb => Bc3Unorm,
            Bc7UnormSrgb => Bc7Unorm,
            other => other,
        }
    }

    /// The format a shader reads a depth format through.
    pub const fn depth_srv_format(self) -> Format {
        match self {
            Format::D16Unorm => Format::R16Float,
            Format::D32Float | Format::D32FloatS8X24Uint => Format::R32Float,
            Format::D24UnormS8Uint => Format::R32Uint,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes() {
        assert_eq!(Format::R8G8B8A8Unorm.block_size(), 4);
        assert_eq!(Format::R32G32B32A32Float.block_size(), 16);
        assert_eq!(Format::Bc1Unorm.block_size(), 8);
        assert_eq!(Format::Bc1Unorm.block_extent(), 4);
        assert_eq!(Format::R16G16Float.block_extent(), 1);
    }

    #[test]
    fn srgb_round_trip() {
        assert_eq!(Format::R8G8B8A8Unorm.to_srgb(), Format::R8G8B8A8UnormSrgb);
        assert_eq!(Format::R8G8B8A8UnormSrgb.to_linear(), Format::R8G8B8A8Unorm);
        assert_eq!(Format::R32Float.to_srgb(), Format::R32Float);
        assert!(Format::Bc7UnormSrgb.is_srgb());
    }

    #[test]
    fn depth_formats() {
        assert!(Format::D32Float.is_depth());
        assert!(!Format::D32Float.has_stencil());
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert_eq!(Format::D32Float.depth_srv_format(), Format::R32Float);
    }
}
