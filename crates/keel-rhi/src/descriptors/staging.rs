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

use super::DynamicGpuDescriptorAllocator;
use crate::error::RhiError;
use keel_core::rhi::{
    BindPoint, CpuDescriptor, DescriptorHeapType, NativeCommand, NativeCommandList, NativeDevice,
    RootParameter, RootSignatureDesc,
};
use keel_core::rhi_check;

#[derive(Debug, Clone)]
struct StagedTable {
    descriptors: Vec<Option<CpuDescriptor>>,
}

/// Staged descriptor tables of the bound root signature.
///
/// Writes land in a per-root-index staging array and mark the table stale.
/// Before a draw or dispatch, every stale table is copied into a fresh
/// contiguous range of the dynamic heap and bound.
#[derive(Debug, Default)]
pub struct DescriptorStaging {
    tables: Vec<Option<StagedTable>>,
    stale: u64,
}

impl DescriptorStaging {
    /// Creates an empty staging area.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the staging arrays for the resource tables of a root signature.
    /// Sampler tables are not staged; samplers are bindless.
    pub fn parse_root_signature(&mut self, desc: &RootSignatureDesc) {
        rhi_check!(
            desc.parameters.len() <= 64,
            "root signature has {} parameters, at most 64 can be staged",
            desc.parameters.len()
        );
        self.tables = desc
            .parameters
            .iter()
            .map(|parameter| match parameter {
                RootParameter::Table(_) if !parameter.is_sampler_table() => Some(StagedTable {
                    descriptors: vec![None; parameter.table_size() as usize],
                }),
                _ => None,
            })
            .collect();
        self.stale = 0;
    }

    /// Writes descriptors into table `root_index` starting at `offset`.
    pub fn set_descriptors(&mut self, root_index: u32, offset: u32, handles: &[CpuDescriptor]) {
        let table = self
            .tables
            .get_mut(root_index as usize)
            .and_then(Option::as_mut);
        let Some(table) = table else {
            keel_core::rhi_fatal!("root parameter {} is not a staged descriptor table", root_index);
        };
        let end = offset as usize + handles.len();
        rhi_check!(
            end <= table.descriptors.len(),
            "descriptor table {} overflow: writing {}..{} into {} entries",
            root_index,
            offset,
            end,
            table.descriptors.len()
        );
        for (slot, handle) in table.descriptors[offset as usize..].iter_mut().zip(handles) {
            *slot = Some(*handle);
        }
        self.stale |= 1 << root_index;
    }

    /// Returns `true` if table `root_index` changed since it was last bound.
    pub fn is_stale(&self, root_index: u32) -> bool {
        self.stale & (1 << root_index) != 0
    }

    /// Marks every non-empty table stale, e.g. after a root signature
    /// rebind.
    pub fn invalidate(&mut self) {
        for (index, table) in self.tables.iter().enumerate() {
            if table.is_some() {
                self.stale |= 1 << index;
            }
        }
    }

    /// Copies stale tables into the dynamic heap and binds them. Returns
    /// the number of tables bound.
    pub fn flush(
        &mut self,
        native: &dyn NativeDevice,
        list: NativeCommandList,
        bind_point: BindPoint,
        allocator: &mut DynamicGpuDescriptorAllocator,
        increment: u32,
    ) -> Result<usize, RhiError> {
        let mut bound = 0;
        for (root_index, table) in self.tables.iter().enumerate() {
            if self.stale & (1 << root_index) == 0 {
                continue;
            }
            let Some(table) = table else { continue };
            let range = allocator.allocate(table.descriptors.len() as u32)?;
            for (i, handle) in table.descriptors.iter().enumerate() {
                if let Some(src) = handle {
                    native.copy_descriptors(
                        1,
                        range.cpu.offset(i as u32, increment),
                        *src,
                        DescriptorHeapType::CbvSrvUav,
                    );
                }
            }
            native.record(
                list,
                NativeCommand::SetRootDescriptorTable {
                    bind_point,
                    root_index: root_index as u32,
                    base: range.gpu,
                },
            );
            bound += 1;
        }
        self.stale = 0;
        Ok(bound)
    }

    /// Drops every staged table.
    pub fn reset(&mut self) {
        self.tables.clear();
        self.stale = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::{DescriptorRange, DescriptorRangeType};

    fn root_signature() -> RootSignatureDesc {
        RootSignatureDesc {
            parameters: vec![
                RootParameter::Constants {
                    register: 0,
                    space: 0,
                    count: 4,
                },
                RootParameter::Table(vec![DescriptorRange {
                    ty: DescriptorRangeType::Srv,
                    count: 3,
                    base_register: 0,
                    space: 0,
                }]),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn writes_mark_tables_stale() {
        let mut staging = DescriptorStaging::new();
        staging.parse_root_signature(&root_signature());
        assert!(!staging.is_stale(1));
        staging.set_descriptors(1, 1, &[CpuDescriptor(0x10), CpuDescriptor(0x20)]);
        assert!(staging.is_stale(1));
        assert!(!staging.is_stale(0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "descriptor table 1 overflow")]
    fn overflow_is_fatal() {
        let mut staging = DescriptorStaging::new();
        staging.parse_root_signature(&root_signature());
        staging.set_descriptors(1, 2, &[CpuDescriptor(0x10), CpuDescriptor(0x20)]);
    }
}
