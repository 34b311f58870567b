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

//! Byte storage of headless resources: layouts, copies and clears.

use keel_core::rhi::{
    ResourceDesc, SubresourceFootprint, TextureCopyLocation, TextureDesc, TextureRegion, Format,
};

/// Tight layout of one texture subresource in resource memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubresourceLayout {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_size: u64,
    pub row_count: u32,
}

/// Computes the tight per-subresource layout of a texture and its size.
pub(crate) fn texture_layout(desc: &TextureDesc) -> (Vec<SubresourceLayout>, u64) {
    let block = desc.format.block_extent();
    let mut layouts = Vec::with_capacity(desc.subresource_count() as usize);
    let mut offset = 0u64;

    for _slice in 0..desc.array_size() {
        for mip in 0..desc.mip_levels.max(1) {
            let (width, height, depth) = desc.mip_extent(mip);
            let row_size = width.div_ceil(block) as u64 * desc.format.block_size() as u64;
            let row_count = height.div_ceil(block);
            layouts.push(SubresourceLayout {
                offset,
                width,
                height,
                depth,
                row_size,
                row_count,
            });
            offset += row_size * row_count as u64 * depth as u64;
        }
    }

    (layouts, offset)
}

/// Size of the memory backing a resource.
pub(crate) fn resource_size(desc: &ResourceDesc) -> (Vec<SubresourceLayout>, u64) {
    match desc {
        ResourceDesc::Buffer(b) => (Vec::new(), b.size),
        ResourceDesc::Texture(t) => texture_layout(t),
    }
}

/// A strided view of texel blocks inside resource memory.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Surface {
    pub base: u64,
    pub row_pitch: u64,
    pub slice_pitch: u64,
    pub block_size: u64,
    pub block_extent: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Surface {
    pub fn from_layout(layout: &SubresourceLayout, format: Format) -> Self {
        Self {
            base: layout.offset,
            row_pitch: layout.row_size,
            slice_pitch: layout.row_size * layout.row_count as u64,
            block_size: format.block_size() as u64,
            block_extent: format.block_extent(),
            width: layout.width,
            height: layout.height,
            depth: layout.depth,
        }
    }

    pub fn from_footprint(footprint: &SubresourceFootprint) -> Self {
        Self {
            base: footprint.offset,
            row_pitch: footprint.row_pitch as u64,
            slice_pitch: footprint.row_pitch as u64 * footprint.row_count as u64,
            block_size: footprint.format.block_size() as u64,
            block_extent: footprint.format.block_extent(),
            width: footprint.width,
            height: footprint.height,
            depth: footprint.depth,
        }
    }

    fn offset_of(&self, x_block: u32, y_block: u32, z: u32) -> u64 {
        self.base
            + z as u64 * self.slice_pitch
            + y_block as u64 * self.row_pitch
            + x_block as u64 * self.block_size
    }
}

/// Resolves one side of a texture copy to a surface, given the layouts of
/// the resource it names.
pub(crate) fn copy_surface(
    location: &TextureCopyLocation,
    desc: &ResourceDesc,
    layouts: &[SubresourceLayout],
) -> Result<Surface, String> {
    match (location, desc) {
        (TextureCopyLocation::Footprint { footprint, .. }, ResourceDesc::Buffer(_)) => {
            Ok(Surface::from_footprint(footprint))
        }
        (TextureCopyLocation::Subresource { index, .. }, ResourceDesc::Texture(t)) => layouts
            .get(*index as usize)
            .map(|l| Surface::from_layout(l, t.format))
            .ok_or_else(|| format!("subresource {index} out of range")),
        (TextureCopyLocation::Footprint { .. }, _) => {
            Err("footprint copy locations must name a buffer".into())
        }
        (TextureCopyLocation::Subresource { .. }, _) => {
            Err("subresource copy locations must name a texture".into())
        }
    }
}

/// Copies a block region between two surfaces in possibly different memories.
pub(crate) fn copy_region(
    dst_mem: &mut [u8],
    dst: &Surface,
    dst_xyz: (u32, u32, u32),
    src_mem: &[u8],
    src: &Surface,
    region: Option<TextureRegion>,
) -> Result<(), String> {
    let region = region.unwrap_or(TextureRegion {
        left: 0,
        top: 0,
        front: 0,
        right: src.width,
        bottom: src.height,
        back: src.depth,
    });
    let extent = src.block_extent.max(1);
    let blocks_wide = (region.right - region.left).div_ceil(extent);
    let rows = (region.bottom - region.top).div_ceil(extent);
    let row_bytes = blocks_wide as u64 * src.block_size;

    for z in 0..(region.back - region.front) {
        for row in 0..rows {
            let s = src.offset_of(region.left / extent, region.top / extent + row, region.front + z);
            let d = dst.offset_of(dst_xyz.0 / extent, dst_xyz.1 / extent + row, dst_xyz.2 + z);
            let (s, d, n) = (s as usize, d as usize, row_bytes as usize);
            if s + n > src_mem.len() || d + n > dst_mem.len() {
                return Err(format!(
                    "texture copy row out of bounds (src {}..{} of {}, dst {}..{} of {})",
                    s,
                    s + n,
                    src_mem.len(),
                    d,
                    d + n,
                    dst_mem.len()
                ));
            }
            dst_mem[d..d + n].copy_from_slice(&src_mem[s..s + n]);
        }
    }
    Ok(())
}

/// Fills every block of a surface with the same encoded value.
pub(crate) fn fill_surface(mem: &mut [u8], surface: &Surface, value: &[u8]) {
    let extent = surface.block_extent.max(1);
    let blocks_wide = surface.width.div_ceil(extent);
    let rows = surface.height.div_ceil(extent);
    for z in 0..surface.depth {
        for row in 0..rows {
            for x in 0..blocks_wide {
                let at = surface.offset_of(x, row, z) as usize;
                if let Some(dst) = mem.get_mut(at..at + value.len()) {
                    dst.copy_from_slice(value);
                }
            }
        }
    }
}

/// Encodes a clear colour into one texel of `format`.
pub(crate) fn encode_color(format: Format, color: [f32; 4]) -> Vec<u8> {
    let unorm8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    let unorm16 = |v: f32| ((v.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16).to_le_bytes();
    let floats = |n: usize| -> Vec<u8> { color[..n].iter().flat_map(|c| c.to_le_bytes()).collect() };
    let halves = |n: usize| -> Vec<u8> {
        color[..n]
            .iter()
            .flat_map(|c| f32_to_f16(*c).to_le_bytes())
            .collect()
    };

    match format {
        Format::R8Unorm => vec![unorm8(color[0])],
        Format::R8G8Unorm => vec![unorm8(color[0]), unorm8(color[1])],
        Format::R8G8B8A8Unorm | Format::R8G8B8A8UnormSrgb => color.iter().map(|c| unorm8(*c)).collect(),
        Format::B8G8R8A8Unorm | Format::B8G8R8A8UnormSrgb => vec![
            unorm8(color[2]),
            unorm8(color[1]),
            unorm8(color[0]),
            unorm8(color[3]),
        ],
        Format::R10G10B10A2Unorm => {
            let c = |v: f32, max: f32| (v.clamp(0.0, 1.0) * max + 0.5) as u32;
            let packed = c(color[0], 1023.0)
                | c(color[1], 1023.0) << 10
                | c(color[2], 1023.0) << 20
                | c(color[3], 3.0) << 30;
            packed.to_le_bytes().to_vec()
        }
        Format::R16G16B16A16Unorm => color.iter().flat_map(|c| unorm16(*c)).collect(),
        Format::R16Float => halves(1),
        Format::R16G16Float => halves(2),
        Format::R16G16B16A16Float => halves(4),
        Format::R32Float => floats(1),
        Format::R32G32Float => floats(2),
        Format::R32G32B32Float => floats(3),
        Format::R32G32B32A32Float => floats(4),
        Format::R32Uint | Format::R32Sint => (color[0] as u32).to_le_bytes().to_vec(),
        Format::R32G32B32A32Uint => color.iter().flat_map(|c| (*c as u32).to_le_bytes()).collect(),
        other => vec![0; other.block_size() as usize],
    }
}

/// Encodes a depth-stencil clear into one texel of `format`, preserving the
/// components that are not cleared.
pub(crate) fn encode_depth(format: Format, existing: &[u8], depth: Option<f32>, stencil: Option<u8>) -> Vec<u8> {
    let mut texel = existing.to_vec();
    texel.resize(format.block_size() as usize, 0);
    match format {
        Format::D32Float => {
            if let Some(d) = depth {
                texel[..4].copy_from_slice(&d.to_le_bytes());
            }
        }
        Format::D16Unorm => {
            if let Some(d) = depth {
                let v = (d.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16;
                texel[..2].copy_from_slice(&v.to_le_bytes());
            }
        }
        Format::D24UnormS8Uint => {
            let mut packed = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
            if let Some(d) = depth {
                packed = (packed & 0xFF00_0000) | ((d.clamp(0.0, 1.0) * 16_777_215.0 + 0.5) as u32);
            }
            if let Some(s) = stencil {
                packed = (packed & 0x00FF_FFFF) | ((s as u32) << 24);
            }
            texel[..4].copy_from_slice(&packed.to_le_bytes());
        }
        Format::D32FloatS8X24Uint => {
            if let Some(d) = depth {
                texel[..4].copy_from_slice(&d.to_le_bytes());
            }
            if let Some(s) = stencil {
                texel[4] = s;
            }
        }
        _ => {}
    }
    texel
}

/// Converts an `f32` to IEEE half precision, rounding to nearest even.
pub(crate) fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exp == 0xFF {
        // Inf / NaN
        return sign | 0x7C00 | if mantissa != 0 { 0x200 } else { 0 };
    }
    let unbiased = exp - 127 + 15;
    if unbiased >= 0x1F {
        return sign | 0x7C00;
    }
    if unbiased <= 0 {
        if unbiased < -10 {
            return sign;
        }
        let m = mantissa | 0x0080_0000;
        let shift = (14 - unbiased) as u32;
        let half = m >> shift;
        let round = (m >> (shift - 1)) & 1;
        return sign | (half + round) as u16;
    }
    let half = ((unbiased as u32) << 10) | (mantissa >> 13);
    let round = (mantissa >> 12) & 1;
    sign | (half + round) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::TextureFlags;

    #[test]
    fn layout_packs_mips_tightly() {
        let desc = TextureDesc::new_2d(4, 4, Format::R8G8B8A8Unorm, TextureFlags::SHADER_RESOURCE)
            .with_mips(3);
        let (layouts, size) = texture_layout(&desc);
        assert_eq!(layouts.len(), 3);
        assert_eq!(layouts[1].offset, 64);
        assert_eq!(layouts[2].offset, 80);
        assert_eq!(size, 84);
    }

    #[test]
    fn half_conversion() {
        assert_eq!(f32_to_f16(1.0), 0x3C00);
        assert_eq!(f32_to_f16(-2.0), 0xC000);
        assert_eq!(f32_to_f16(0.0), 0);
        assert_eq!(f32_to_f16(65504.0), 0x7BFF);
        assert_eq!(f32_to_f16(f32::INFINITY), 0x7C00);
    }

    #[test]
    fn color_encoding() {
        assert_eq!(
            encode_color(Format::R8G8B8A8Unorm, [1.0, 0.0, 0.5, 1.0]),
            vec![255, 0, 128, 255]
        );
        assert_eq!(
            encode_color(Format::B8G8R8A8Unorm, [1.0, 0.0, 0.0, 1.0]),
            vec![0, 0, 255, 255]
        );
        assert_eq!(encode_color(Format::R32Float, [2.5, 0.0, 0.0, 0.0]), 2.5f32.to_le_bytes());
    }

    #[test]
    fn depth_encoding_keeps_stencil() {
        let texel = encode_depth(Format::D24UnormS8Uint, &[0, 0, 0, 7], Some(1.0), None);
        assert_eq!(texel, vec![0xFF, 0xFF, 0xFF, 7]);
    }
}
