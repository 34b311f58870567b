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

//! Copies, uploads and clears.

use super::{storage_of, CommandContext};
use crate::error::RhiError;
use crate::resource::{Buffer, GpuResource, Texture, View};
use crate::scratch::ScratchAllocation;
use keel_core::rhi::{
    copyable_footprints, NativeCommand, ResourceStates, SubresourceFootprint, TextureCopyLocation, TextureRegion,
    TEXTURE_DATA_PLACEMENT_ALIGNMENT,
};
use keel_core::rhi_check;

impl CommandContext {
    /// Copies `data` into transient upload memory that stays valid until
    /// the submission holding this context completes.
    pub fn upload_scratch(&mut self, data: &[u8], alignment: u64) -> Result<ScratchAllocation, RhiError> {
        storage_of(&mut self.storage).scratch.upload(data, alignment)
    }

    /// Copies a whole resource into another of identical layout.
    pub fn copy_resource(&mut self, dst: &dyn GpuResource, src: &dyn GpuResource) {
        let (dst, src) = (dst.resource().clone(), src.resource().clone());
        rhi_check!(
            dst.handle() != src.handle(),
            "copy_resource from '{}' onto itself",
            src.name()
        );
        self.transition(&dst, ResourceStates::COPY_DEST);
        self.transition(&src, ResourceStates::COPY_SOURCE);
        self.flush_resource_barriers();
        self.record(NativeCommand::CopyResource {
            dst: dst.handle(),
            src: src.handle(),
        });
    }

    /// Copies `size` bytes between buffers.
    pub fn copy_buffer(&mut self, dst: &Buffer, dst_offset: u64, src: &Buffer, src_offset: u64, size: u64) {
        rhi_check!(
            dst_offset + size <= dst.size() && src_offset + size <= src.size(),
            "copy of {} bytes from '{}'+{} to '{}'+{} is out of bounds",
            size,
            src.resource().name(),
            src_offset,
            dst.resource().name(),
            dst_offset
        );
        self.transition(dst.resource(), ResourceStates::COPY_DEST);
        self.transition(src.resource(), ResourceStates::COPY_SOURCE);
        self.flush_resource_barriers();
        self.record(NativeCommand::CopyBufferRegion {
            dst: dst.resource().handle(),
            dst_offset,
            src: src.resource().handle(),
            src_offset,
            size,
        });
    }

    /// Copies one texture subresource (or a region of it) into another.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_texture(
        &mut self,
        dst: &Texture,
        dst_subresource: u32,
        dst_origin: [u32; 3],
        src: &Texture,
        src_subresource: u32,
        src_region: Option<TextureRegion>,
    ) {
        rhi_check!(
            dst_subresource < dst.desc().subresource_count() && src_subresource < src.desc().subresource_count(),
            "copy_texture subresource out of range ('{}' {} <- '{}' {})",
            dst.resource().name(),
            dst_subresource,
            src.resource().name(),
            src_subresource
        );
        self.transition_subresource(dst.resource(), ResourceStates::COPY_DEST, dst_subresource);
        self.transition_subresource(src.resource(), ResourceStates::COPY_SOURCE, src_subresource);
        self.flush_resource_barriers();
        self.record(NativeCommand::CopyTextureRegion {
            dst: TextureCopyLocation::Subresource {
                resource: dst.resource().handle(),
                index: dst_subresource,
            },
            dst_x: dst_origin[0],
            dst_y: dst_origin[1],
            dst_z: dst_origin[2],
            src: TextureCopyLocation::Subresource {
                resource: src.resource().handle(),
                index: src_subresource,
            },
            src_region,
        });
    }

    /// Copies `count` subresources of a texture into a buffer, laid out by
    /// [`copyable_footprints`] from `dst_offset`. Returns the footprints.
    pub fn copy_texture_to_buffer(
        &mut self,
        dst: &Buffer,
        dst_offset: u64,
        src: &Texture,
        first_subresource: u32,
        count: u32,
    ) -> Vec<SubresourceFootprint> {
        let (footprints, size) = copyable_footprints(src.desc(), first_subresource, count, dst_offset);
        rhi_check!(
            dst_offset + size <= dst.size(),
            "'{}' needs {} bytes from offset {} to hold '{}'",
            dst.resource().name(),
            size,
            dst_offset,
            src.resource().name()
        );
        self.transition(dst.resource(), ResourceStates::COPY_DEST);
        for subresource in first_subresource..first_subresource + count {
            self.transition_subresource(src.resource(), ResourceStates::COPY_SOURCE, subresource);
        }
        self.flush_resource_barriers();
        for (subresource, footprint) in (first_subresource..).zip(&footprints) {
            self.record(NativeCommand::CopyTextureRegion {
                dst: TextureCopyLocation::Footprint {
                    resource: dst.resource().handle(),
                    footprint: *footprint,
                },
                dst_x: 0,
                dst_y: 0,
                dst_z: 0,
                src: TextureCopyLocation::Subresource {
                    resource: src.resource().handle(),
                    index: subresource,
                },
                src_region: None,
            });
        }
        footprints
    }

    /// Copies `count` subresources from a buffer laid out by
    /// [`copyable_footprints`] from `src_offset`.
    pub fn copy_buffer_to_texture(
        &mut self,
        dst: &Texture,
        first_subresource: u32,
        count: u32,
        src: &Buffer,
        src_offset: u64,
    ) {
        let (footprints, _) = copyable_footprints(dst.desc(), first_subresource, count, src_offset);
        for subresource in first_subresource..first_subresource + count {
            self.transition_subresource(dst.resource(), ResourceStates::COPY_DEST, subresource);
        }
        self.transition(src.resource(), ResourceStates::COPY_SOURCE);
        self.flush_resource_barriers();
        for (subresource, footprint) in (first_subresource..).zip(footprints) {
            self.record(NativeCommand::CopyTextureRegion {
                dst: TextureCopyLocation::Subresource {
                    resource: dst.resource().handle(),
                    index: subresource,
                },
                dst_x: 0,
                dst_y: 0,
                dst_z: 0,
                src: TextureCopyLocation::Footprint {
                    resource: src.resource().handle(),
                    footprint,
                },
                src_region: None,
            });
        }
    }

    /// Uploads `data` into `dst` at `offset` through scratch memory.
    pub fn write_buffer(&mut self, dst: &Buffer, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        if data.is_empty() {
            return Ok(());
        }
        rhi_check!(
            offset + data.len() as u64 <= dst.size(),
            "write of {} bytes at {} overflows '{}'",
            data.len(),
            offset,
            dst.resource().name()
        );
        let upload = storage_of(&mut self.storage).scratch.upload(data, 4)?;
        self.transition(dst.resource(), ResourceStates::COPY_DEST);
        self.flush_resource_barriers();
        self.record(NativeCommand::CopyBufferRegion {
            dst: dst.resource().handle(),
            dst_offset: offset,
            src: upload.resource,
            src_offset: upload.offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    /// Uploads tightly packed texel rows into one subresource of `dst`.
    pub fn write_texture(&mut self, dst: &Texture, subresource: u32, data: &[u8]) -> Result<(), RhiError> {
        let (footprints, size) = copyable_footprints(dst.desc(), subresource, 1, 0);
        let Some(footprint) = footprints.first().copied() else {
            return Ok(());
        };
        let row_size = footprint.row_size as usize;
        let rows = footprint.row_count as usize * footprint.depth as usize;
        rhi_check!(
            data.len() >= row_size * rows,
            "write_texture on '{}' needs {} bytes, got {}",
            dst.resource().name(),
            row_size * rows,
            data.len()
        );

        let mut staged = vec![0u8; size as usize];
        for (row, chunk) in data.chunks(row_size).take(rows).enumerate() {
            let start = footprint.offset as usize + row * footprint.row_pitch as usize;
            staged[start..start + chunk.len()].copy_from_slice(chunk);
        }
        let upload = storage_of(&mut self.storage)
            .scratch
            .upload(&staged, TEXTURE_DATA_PLACEMENT_ALIGNMENT)?;

        self.transition_subresource(dst.resource(), ResourceStates::COPY_DEST, subresource);
        self.flush_resource_barriers();
        self.record(NativeCommand::CopyTextureRegion {
            dst: TextureCopyLocation::Subresource {
                resource: dst.resource().handle(),
                index: subresource,
            },
            dst_x: 0,
            dst_y: 0,
            dst_z: 0,
            src: TextureCopyLocation::Footprint {
                resource: upload.resource,
                footprint: SubresourceFootprint {
                    offset: upload.offset + footprint.offset,
                    ..footprint
                },
            },
            src_region: None,
        });
        Ok(())
    }

    /// Clears an unordered-access view to `values`. The view must have a
    /// shader-visible slot.
    pub fn clear_uav_float(&mut self, resource: &dyn GpuResource, view: &View, values: [f32; 4]) {
        let resource = resource.resource().clone();
        rhi_check!(
            view.desc().resource == Some(resource.handle()),
            "the cleared view does not belong to '{}'",
            resource.name()
        );
        self.transition(&resource, ResourceStates::UNORDERED_ACCESS);
        self.flush_resource_barriers();
        self.record(NativeCommand::ClearUnorderedAccessViewFloat {
            gpu_view: view.gpu_handle(),
            cpu_view: view.cpu_handle(),
            resource: resource.handle(),
            values,
        });
    }
}
