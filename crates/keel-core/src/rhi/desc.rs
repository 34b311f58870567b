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

//! Buffer and texture descriptors, clear values and copyable footprints.

use super::format::Format;
use super::state::ResourceStates;
use crate::keel_bitflags;

/// Row pitch alignment of texture data in buffers.
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;
/// Offset alignment of texture data in buffers.
pub const TEXTURE_DATA_PLACEMENT_ALIGNMENT: u64 = 512;
/// Alignment of constant buffer data.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

keel_bitflags! {
    /// Usage flags of a buffer.
    pub struct BufferFlags: u32 {
        /// Bound as an unordered access view.
        const UNORDERED_ACCESS = 1 << 0;
        /// Bound as a shader resource view.
        const SHADER_RESOURCE = 1 << 1;
        /// CPU-writable upload memory, persistently mapped.
        const UPLOAD = 1 << 2;
        /// CPU-readable readback memory, persistently mapped.
        const READBACK = 1 << 3;
        /// Views are raw (byte address) views.
        const BYTE_ADDRESS = 1 << 4;
        /// Holds a raytracing acceleration structure.
        const ACCELERATION_STRUCTURE = 1 << 5;
        /// Views do not claim a persistent bindless index.
        const NO_BINDLESS = 1 << 6;
        /// Used as an indirect argument buffer.
        const INDIRECT_ARGUMENTS = 1 << 7;
    }
}

keel_bitflags! {
    /// Usage flags of a texture.
    pub struct TextureFlags: u32 {
        /// Bound as an unordered access view.
        const UNORDERED_ACCESS = 1 << 0;
        /// Bound as a shader resource view.
        const SHADER_RESOURCE = 1 << 1;
        /// Used as a colour attachment.
        const RENDER_TARGET = 1 << 2;
        /// Used as a depth-stencil attachment.
        const DEPTH_STENCIL = 1 << 3;
        /// Shader resource views read the sRGB variant of the format.
        const SRGB = 1 << 4;
    }
}

/// The dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TextureType {
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

impl TextureType {
    /// Returns `true` for types whose third dimension counts array slices.
    pub const fn is_array_like(self) -> bool {
        !matches!(self, TextureType::Texture3D)
    }
}

/// The optimized clear value of a render target or depth-stencil texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA colour.
    Color([f32; 4]),
    /// Depth and stencil.
    DepthStencil {
        /// Depth value.
        depth: f32,
        /// Stencil value.
        stencil: u8,
    },
}

impl ClearValue {
    fn key(&self) -> [u32; 5] {
        match *self {
            ClearValue::Color(c) => [0, c[0].to_bits(), c[1].to_bits(), c[2].to_bits(), c[3].to_bits()],
            ClearValue::DepthStencil { depth, stencil } => [1, depth.to_bits(), stencil as u32, 0, 0],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Buffers
// ─────────────────────────────────────────────────────────────────────────────

/// Describes a linear GPU allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// Size in bytes.
    pub size: u64,
    /// Stride of a structured element, `0` for raw or typed buffers.
    pub element_size: u32,
    /// Element format of typed buffers.
    pub format: Format,
    /// Usage flags.
    pub flags: BufferFlags,
}

impl BufferDesc {
    /// A structured buffer of `count` elements of `stride` bytes.
    pub fn structured(count: u32, stride: u32, flags: BufferFlags) -> Self {
        Self {
            size: count as u64 * stride as u64,
            element_size: stride,
            format: Format::Unknown,
            flags,
        }
    }

    /// A typed buffer of `count` elements of `format`.
    pub fn typed(count: u32, format: Format, flags: BufferFlags) -> Self {
        Self {
            size: count as u64 * format.block_size() as u64,
            element_size: format.block_size(),
            format,
            flags,
        }
    }

    /// A raw (byte address) buffer.
    pub fn byte_address(size: u64, flags: BufferFlags) -> Self {
        Self {
            size,
            element_size: 4,
            format: Format::Unknown,
            flags: flags | BufferFlags::BYTE_ADDRESS,
        }
    }

    /// A persistently mapped upload buffer.
    pub fn upload(size: u64) -> Self {
        Self {
            size,
            element_size: 0,
            format: Format::Unknown,
            flags: BufferFlags::UPLOAD,
        }
    }

    /// A persistently mapped readback buffer.
    pub fn readback(size: u64) -> Self {
        Self {
            size,
            element_size: 0,
            format: Format::Unknown,
            flags: BufferFlags::READBACK,
        }
    }

    /// Number of elements, when the buffer has an element size.
    pub fn element_count(&self) -> u32 {
        if self.element_size == 0 {
            0
        } else {
            (self.size / self.element_size as u64) as u32
        }
    }

    /// Returns `true` if a buffer created from `self` can stand in for one
    /// requested with `requested`: same layout, superset of usage flags.
    pub fn is_compatible(&self, requested: &BufferDesc) -> bool {
        self.size == requested.size
            && self.element_size == requested.element_size
            && self.format == requested.format
            && self.flags.contains(requested.flags)
    }

    /// The state a freshly created buffer starts in.
    pub fn initial_state(&self) -> ResourceStates {
        if self.flags.contains(BufferFlags::READBACK) {
            ResourceStates::COPY_DEST
        } else if self.flags.contains(BufferFlags::UPLOAD) {
            ResourceStates::GENERIC_READ
        } else if self.flags.contains(BufferFlags::ACCELERATION_STRUCTURE) {
            ResourceStates::RAYTRACING_ACCELERATION_STRUCTURE
        } else {
            ResourceStates::COMMON
        }
    }

    /// Returns `true` if the buffer takes part in state tracking.
    pub fn is_state_tracked(&self) -> bool {
        self.flags.intersects(
            BufferFlags::UPLOAD | BufferFlags::READBACK | BufferFlags::UNORDERED_ACCESS,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Textures
// ─────────────────────────────────────────────────────────────────────────────

/// Describes a texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc {
    /// Dimensionality.
    pub ty: TextureType,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth for 3D textures, array size otherwise (faces count for cubes).
    pub depth_or_array_size: u32,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// MSAA sample count.
    pub sample_count: u32,
    /// Texel format.
    pub format: Format,
    /// Usage flags.
    pub flags: TextureFlags,
    /// Optimized clear value.
    pub clear_value: Option<ClearValue>,
}

impl TextureDesc {
    /// A single-mip 2D texture.
    pub fn new_2d(width: u32, height: u32, format: Format, flags: TextureFlags) -> Self {
        Self {
            ty: TextureType::Texture2D,
            width,
            height,
            depth_or_array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            format,
            flags,
            clear_value: None,
        }
    }

    /// A single-mip 3D texture.
    pub fn new_3d(width: u32, height: u32, depth: u32, format: Format, flags: TextureFlags) -> Self {
        Self {
            ty: TextureType::Texture3D,
            depth_or_array_size: depth,
            ..Self::new_2d(width, height, format, flags)
        }
    }

    /// A single-mip cube texture.
    pub fn new_cube(size: u32, format: Format, flags: TextureFlags) -> Self {
        Self {
            ty: TextureType::TextureCube,
            depth_or_array_size: 6,
            ..Self::new_2d(size, size, format, flags)
        }
    }

    /// Sets the mip count.
    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// Turns the texture into an array of `size` slices.
    pub fn with_array_size(mut self, size: u32) -> Self {
        self.ty = match self.ty {
            TextureType::Texture1D | TextureType::Texture1DArray => TextureType::Texture1DArray,
            TextureType::TextureCube | TextureType::TextureCubeArray => TextureType::TextureCubeArray,
            _ => TextureType::Texture2DArray,
        };
        self.depth_or_array_size = size;
        self
    }

    /// Sets the sample count.
    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    /// Sets the optimized clear value.
    pub fn with_clear_value(mut self, clear: ClearValue) -> Self {
        self.clear_value = Some(clear);
        self
    }

    /// Number of array slices.
    pub fn array_size(&self) -> u32 {
        if self.ty.is_array_like() {
            self.depth_or_array_size.max(1)
        } else {
            1
        }
    }

    /// Depth of mip 0 (1 for non-3D textures).
    pub fn depth(&self) -> u32 {
        if self.ty == TextureType::Texture3D {
            self.depth_or_array_size.max(1)
        } else {
            1
        }
    }

    /// Number of subresources (mips × slices).
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels.max(1) * self.array_size()
    }

    /// The subresource index of a mip in an array slice.
    pub fn subresource_index(&self, mip: u32, slice: u32) -> u32 {
        mip + slice * self.mip_levels.max(1)
    }

    /// Dimensions of a mip level.
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        (
            (self.width >> mip).max(1),
            (self.height >> mip).max(1),
            (self.depth() >> mip).max(1),
        )
    }

    /// Returns the reason the descriptor is illegal, if it is.
    pub fn validate(&self) -> Result<(), String> {
        if self
            .flags
            .contains(TextureFlags::RENDER_TARGET | TextureFlags::DEPTH_STENCIL)
        {
            return Err("a texture cannot be both a render target and a depth-stencil".into());
        }
        if self.width == 0 || self.height == 0 || self.depth_or_array_size == 0 {
            return Err(format!(
                "texture extent {}x{}x{} must be non-zero",
                self.width, self.height, self.depth_or_array_size
            ));
        }
        if self.flags.contains(TextureFlags::DEPTH_STENCIL) && !self.format.is_depth() {
            return Err(format!("{:?} is not a depth format", self.format));
        }
        if self.sample_count > 1 && self.flags.contains(TextureFlags::UNORDERED_ACCESS) {
            return Err("multisampled textures cannot have unordered access".into());
        }
        Ok(())
    }

    /// Returns `true` if a texture created from `self` can stand in for one
    /// requested with `requested`: same layout, superset of usage flags.
    pub fn is_compatible(&self, requested: &TextureDesc) -> bool {
        self.ty == requested.ty
            && self.width == requested.width
            && self.height == requested.height
            && self.depth_or_array_size == requested.depth_or_array_size
            && self.mip_levels == requested.mip_levels
            && self.sample_count == requested.sample_count
            && self.format == requested.format
            && self.flags.contains(requested.flags)
            && self.clear_value.map(|c| c.key()) == requested.clear_value.map(|c| c.key())
    }

    /// The state a freshly created texture starts in.
    pub fn initial_state(&self) -> ResourceStates {
        ResourceStates::COMMON
    }

    /// Returns `true` if the texture takes part in state tracking.
    pub fn is_state_tracked(&self) -> bool {
        self.flags.intersects(
            TextureFlags::UNORDERED_ACCESS | TextureFlags::RENDER_TARGET | TextureFlags::DEPTH_STENCIL,
        )
    }
}

/// A buffer or texture description handed to the native device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceDesc {
    /// A buffer.
    Buffer(BufferDesc),
    /// A texture.
    Texture(TextureDesc),
}

impl ResourceDesc {
    /// Number of subresources.
    pub fn subresource_count(&self) -> u32 {
        match self {
            ResourceDesc::Buffer(_) => 1,
            ResourceDesc::Texture(t) => t.subresource_count(),
        }
    }
}

/// The memory pool a resource is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// GPU-local memory.
    Default,
    /// CPU-writable, GPU-readable memory.
    Upload,
    /// GPU-writable, CPU-readable memory.
    Readback,
}

// ─────────────────────────────────────────────────────────────────────────────
// Footprints
// ─────────────────────────────────────────────────────────────────────────────

/// The layout of one texture subresource inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceFootprint {
    /// Offset of the subresource in the buffer.
    pub offset: u64,
    /// Texel format.
    pub format: Format,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels.
    pub depth: u32,
    /// Aligned distance between rows, in bytes.
    pub row_pitch: u32,
    /// Number of block rows.
    pub row_count: u32,
    /// Unaligned size of one row, in bytes.
    pub row_size: u64,
}

impl SubresourceFootprint {
    /// Bytes spanned by the footprint in the buffer.
    pub fn total_size(&self) -> u64 {
        self.row_pitch as u64 * self.row_count as u64 * self.depth as u64
    }
}

/// Computes the buffer layout of `count` consecutive subresources of a
/// texture, starting at `base_offset`. Returns the footprints and the total
/// size needed in the buffer.
pub fn copyable_footprints(
    desc: &TextureDesc,
    first_subresource: u32,
    count: u32,
    base_offset: u64,
) -> (Vec<SubresourceFootprint>, u64) {
    let mips = desc.mip_levels.max(1);
    let block = desc.format.block_extent();
    let mut footprints = Vec::with_capacity(count as usize);
    let mut offset = align_up(base_offset, TEXTURE_DATA_PLACEMENT_ALIGNMENT);
    let mut end = base_offset;

    for subresource in first_subresource..first_subresource + count {
        let mip = subresource % mips;
        let (width, height, depth) = desc.mip_extent(mip);
        let blocks_wide = width.div_ceil(block);
        let row_count = height.div_ceil(block);
        let row_size = blocks_wide as u64 * desc.format.block_size() as u64;
        let row_pitch = align_up(row_size, TEXTURE_DATA_PITCH_ALIGNMENT) as u32;

        let footprint = SubresourceFootprint {
            offset,
            format: desc.format,
            width,
            height,
            depth,
            row_pitch,
            row_count,
            row_size,
        };
        let size = row_pitch as u64 * (row_count as u64 * depth as u64 - 1) + row_size;
        end = offset + size;
        offset = align_up(end, TEXTURE_DATA_PLACEMENT_ALIGNMENT);
        footprints.push(footprint);
    }

    (footprints, end - base_offset)
}

/// Rounds `value` up to a multiple of the power-of-two `alignment`.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_target_and_depth_is_illegal() {
        let desc = TextureDesc::new_2d(
            64,
            64,
            Format::D32Float,
            TextureFlags::RENDER_TARGET | TextureFlags::DEPTH_STENCIL,
        );
        assert!(desc.validate().is_err());
    }

    #[test]
    fn subresource_indexing() {
        let desc = TextureDesc::new_2d(256, 256, Format::R8G8B8A8Unorm, TextureFlags::SHADER_RESOURCE)
            .with_mips(9)
            .with_array_size(4);
        assert_eq!(desc.ty, TextureType::Texture2DArray);
        assert_eq!(desc.subresource_count(), 36);
        assert_eq!(desc.subresource_index(2, 1), 11);
        assert_eq!(desc.mip_extent(8), (1, 1, 1));
    }

    #[test]
    fn compatibility_allows_flag_superset() {
        let pooled = BufferDesc::structured(
            1024,
            4,
            BufferFlags::UNORDERED_ACCESS | BufferFlags::SHADER_RESOURCE,
        );
        let requested = BufferDesc::structured(1024, 4, BufferFlags::UNORDERED_ACCESS);
        assert!(pooled.is_compatible(&requested));
        assert!(!requested.is_compatible(&pooled));
        assert!(!pooled.is_compatible(&BufferDesc::structured(512, 4, BufferFlags::UNORDERED_ACCESS)));
    }

    #[test]
    fn initial_states_follow_flags() {
        assert_eq!(BufferDesc::readback(16).initial_state(), ResourceStates::COPY_DEST);
        assert_eq!(BufferDesc::upload(16).initial_state(), ResourceStates::GENERIC_READ);
        assert_eq!(
            BufferDesc::byte_address(16, BufferFlags::ACCELERATION_STRUCTURE).initial_state(),
            ResourceStates::RAYTRACING_ACCELERATION_STRUCTURE
        );
        assert!(!BufferDesc::structured(4, 4, BufferFlags::SHADER_RESOURCE).is_state_tracked());
    }

    #[test]
    fn footprints_are_aligned() {
        let desc = TextureDesc::new_2d(10, 4, Format::R8G8B8A8Unorm, TextureFlags::SHADER_RESOURCE)
            .with_mips(2);
        let (footprints, total) = copyable_footprints(&desc, 0, 2, 0);

        assert_eq!(footprints[0].row_pitch, 256);
        assert_eq!(footprints[0].row_size, 40);
        assert_eq!(footprints[0].row_count, 4);
        assert_eq!(footprints[1].offset, 1024);
        assert_eq!(footprints[1].width, 5);
        assert_eq!(total, 1024 + 256 + 20);
    }

    #[test]
    fn compressed_footprints_count_blocks() {
        let desc = TextureDesc::new_2d(16, 16, Format::Bc1Unorm, TextureFlags::SHADER_RESOURCE);
        let (footprints, _) = copyable_footprints(&desc, 0, 1, 0);
        assert_eq!(footprints[0].row_count, 4);
        assert_eq!(footprints[0].row_size, 32);
    }
}
