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

//! Shader binding tables for ray dispatches.

use super::StateObject;
use crate::context::CommandContext;
use crate::error::RhiError;
use keel_core::rhi::{align_up, DispatchRaysDesc, GpuAddressRange, GpuAddressRangeAndStride};
use std::sync::Arc;

/// Alignment of one shader record.
pub const SHADER_RECORD_ALIGNMENT: u64 = 32;
/// Alignment of the start of each table section.
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;

#[derive(Debug, Clone)]
struct Record {
    export: String,
    data: Vec<u8>,
}

/// Offsets and strides of the committed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderTableLayout {
    /// Size of the ray generation record.
    pub ray_gen_size: u64,
    /// Start of the miss section.
    pub miss_offset: u64,
    /// Stride of miss records.
    pub miss_stride: u64,
    /// Number of miss records.
    pub miss_count: u64,
    /// Start of the hit group section.
    pub hit_group_offset: u64,
    /// Stride of hit group records.
    pub hit_group_stride: u64,
    /// Number of hit group records.
    pub hit_group_count: u64,
    /// Start of the callable section.
    pub callable_offset: u64,
    /// Stride of callable records.
    pub callable_stride: u64,
    /// Number of callable records.
    pub callable_count: u64,
    /// Total size.
    pub size: u64,
}

/// Records the shader table of one ray dispatch.
///
/// Each record is a shader identifier followed by inline root arguments.
/// [`commit`](Self::commit) lays the sections out, uploads them into a
/// single scratch allocation and fills the dispatch description. Unbound
/// slots hold a null identifier.
#[derive(Debug, Clone)]
pub struct ShaderBindingTable {
    state_object: Arc<StateObject>,
    ray_gen: Option<Record>,
    miss: Vec<Option<Record>>,
    hit_groups: Vec<Option<Record>>,
    callable: Vec<Option<Record>>,
}

fn bind(records: &mut Vec<Option<Record>>, index: usize, export: &str, data: &[u8]) {
    if records.len() <= index {
        records.resize(index + 1, None);
    }
    records[index] = Some(Record {
        export: export.to_string(),
        data: data.to_vec(),
    });
}

impl ShaderBindingTable {
    /// An empty table for `state_object`.
    pub fn new(state_object: Arc<StateObject>) -> Self {
        Self {
            state_object,
            ray_gen: None,
            miss: Vec::new(),
            hit_groups: Vec::new(),
            callable: Vec::new(),
        }
    }

    /// Sets the ray generation shader.
    pub fn bind_ray_gen(&mut self, export: &str, data: &[u8]) {
        self.ray_gen = Some(Record {
            export: export.to_string(),
            data: data.to_vec(),
        });
    }

    /// Sets the miss shader of ray type `ray_index`.
    pub fn bind_miss(&mut self, ray_index: usize, export: &str, data: &[u8]) {
        bind(&mut self.miss, ray_index, export, data);
    }

    /// Sets the hit group record at `index`.
    pub fn bind_hit_group(&mut self, index: usize, export: &str, data: &[u8]) {
        bind(&mut self.hit_groups, index, export, data);
    }

    /// Sets the callable shader at `index`.
    pub fn bind_callable(&mut self, index: usize, export: &str, data: &[u8]) {
        bind(&mut self.callable, index, export, data);
    }

    fn stride(&self, records: &[Option<Record>]) -> u64 {
        let data = records.iter().flatten().map(|r| r.data.len()).max().unwrap_or(0) as u64;
        align_up(self.state_object.identifier_size() as u64 + data, SHADER_RECORD_ALIGNMENT)
    }

    /// Computes the layout of the table.
    pub fn layout(&self) -> ShaderTableLayout {
        let identifier = self.state_object.identifier_size() as u64;
        let ray_gen_size = align_up(
            identifier + self.ray_gen.as_ref().map_or(0, |r| r.data.len() as u64),
            SHADER_RECORD_ALIGNMENT,
        );

        let miss_offset = align_up(ray_gen_size, SHADER_TABLE_ALIGNMENT);
        let miss_stride = self.stride(&self.miss);
        let miss_count = self.miss.len() as u64;

        let hit_group_offset = align_up(miss_offset + miss_stride * miss_count, SHADER_TABLE_ALIGNMENT);
        let hit_group_stride = self.stride(&self.hit_groups);
        let hit_group_count = self.hit_groups.len() as u64;

        let callable_offset = align_up(
            hit_group_offset + hit_group_stride * hit_group_count,
            SHADER_TABLE_ALIGNMENT,
        );
        let callable_stride = self.stride(&self.callable);
        let callable_count = self.callable.len() as u64;

        ShaderTableLayout {
            ray_gen_size,
            miss_offset,
            miss_stride,
            miss_count,
            hit_group_offset,
            hit_group_stride,
            hit_group_count,
            callable_offset,
            callable_stride,
            callable_count,
            size: callable_offset + callable_stride * callable_count,
        }
    }

    fn write(&self, out: &mut [u8], offset: u64, record: &Record) -> Result<(), RhiError> {
        let identifier = self
            .state_object
            .shader_identifier(&record.export)
            .ok_or_else(|| RhiError::InvalidResource {
                name: self.state_object.name().to_string(),
                reason: format!("no export named '{}'", record.export),
            })?;
        let start = offset as usize;
        out[start..start + identifier.len()].copy_from_slice(&identifier);
        let data_start = start + identifier.len();
        out[data_start..data_start + record.data.len()].copy_from_slice(&record.data);
        Ok(())
    }

    /// Uploads the table and returns the dispatch description for a
    /// `width` x `height` x `depth` ray grid.
    pub fn commit(
        &self,
        context: &mut CommandContext,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<DispatchRaysDesc, RhiError> {
        let Some(ray_gen) = &self.ray_gen else {
            return Err(RhiError::InvalidResource {
                name: self.state_object.name().to_string(),
                reason: "the shader table has no ray generation shader".into(),
            });
        };
        let layout = self.layout();
        let mut bytes = vec![0u8; layout.size as usize];

        self.write(&mut bytes, 0, ray_gen)?;
        let sections = [
            (&self.miss, layout.miss_offset, layout.miss_stride),
            (&self.hit_groups, layout.hit_group_offset, layout.hit_group_stride),
            (&self.callable, layout.callable_offset, layout.callable_stride),
        ];
        for (records, offset, stride) in sections {
            for (i, record) in records.iter().enumerate() {
                if let Some(record) = record {
                    self.write(&mut bytes, offset + i as u64 * stride, record)?;
                }
            }
        }

        let table = context.upload_scratch(&bytes, SHADER_TABLE_ALIGNMENT)?;
        let base = table.gpu_address;
        let section = |offset: u64, stride: u64, count: u64| GpuAddressRangeAndStride {
            start: if count == 0 { 0 } else { base + offset },
            size: stride * count,
            stride,
        };
        Ok(DispatchRaysDesc {
            ray_generation: GpuAddressRange {
                start: base,
                size: layout.ray_gen_size,
            },
            miss: section(layout.miss_offset, layout.miss_stride, layout.miss_count),
            hit_group: section(layout.hit_group_offset, layout.hit_group_stride, layout.hit_group_count),
            callable: section(layout.callable_offset, layout.callable_stride, layout.callable_count),
            width,
            height,
            depth,
        })
    }
}
