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

//! Device-removed extended data (DRED) reports.

/// One operation of a command list, as recorded by auto-breadcrumbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreadcrumbOp {
    /// Name of the operation.
    pub name: String,
    /// Debug event context the operation ran under, if any.
    pub context: Option<String>,
}

/// The breadcrumb chain of one command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreadcrumbNode {
    /// Debug name of the command list.
    pub command_list_name: String,
    /// Debug name of the queue it executed on.
    pub command_queue_name: String,
    /// Number of operations the GPU completed.
    pub last_completed_op: u32,
    /// Every recorded operation.
    pub ops: Vec<BreadcrumbOp>,
}

impl BreadcrumbNode {
    /// Returns `true` if the GPU had not finished this list.
    pub fn is_incomplete(&self) -> bool {
        (self.last_completed_op as usize) < self.ops.len()
    }
}

/// An allocation named in a page-fault report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DredAllocation {
    /// Debug name of the object.
    pub name: String,
    /// Kind of the object.
    pub kind: String,
}

/// The faulting address and the allocations around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFault {
    /// The faulting GPU virtual address.
    pub virtual_address: u64,
    /// Live allocations overlapping the address.
    pub existing_allocations: Vec<DredAllocation>,
    /// Recently freed allocations overlapping the address.
    pub recent_freed_allocations: Vec<DredAllocation>,
}

/// Everything the native API reports after a device removal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DredReport {
    /// Breadcrumb chains of the command lists in flight.
    pub breadcrumbs: Vec<BreadcrumbNode>,
    /// Page-fault information, if the removal was caused by a fault.
    pub page_fault: Option<PageFault>,
}
