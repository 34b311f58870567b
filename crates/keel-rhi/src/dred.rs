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

//! Formatting of device-removed (DRED) reports.

use keel_core::rhi::{BreadcrumbNode, DredAllocation, DredReport};
use keel_core::ApiError;
use std::fmt::Write;

/// Number of operations printed before the last completed one.
const CONTEXT_OPS: usize = 4;

/// Renders a DRED report as the multi-line text logged on device removal.
pub fn format_report(reason: Option<&ApiError>, report: &DredReport) -> String {
    let mut out = String::new();
    match reason {
        Some(reason) => {
            let _ = writeln!(out, "Device removed: {reason}");
        }
        None => out.push_str("Device removed\n"),
    }

    let incomplete: Vec<&BreadcrumbNode> = report.breadcrumbs.iter().filter(|n| n.is_incomplete()).collect();
    if incomplete.is_empty() {
        out.push_str("No incomplete command lists were recorded\n");
    }
    for node in incomplete {
        write_breadcrumbs(&mut out, node);
    }

    if let Some(fault) = &report.page_fault {
        let _ = writeln!(out, "Page fault at VA {:#018x}", fault.virtual_address);
        write_allocations(&mut out, "Existing allocations", &fault.existing_allocations);
        write_allocations(&mut out, "Recently freed allocations", &fault.recent_freed_allocations);
    }
    out
}

fn write_breadcrumbs(out: &mut String, node: &BreadcrumbNode) {
    let last = node.last_completed_op as usize;
    let _ = writeln!(
        out,
        "[{}] {}: {} of {} operations completed",
        node.command_queue_name,
        node.command_list_name,
        last,
        node.ops.len()
    );
    let first = last.saturating_sub(CONTEXT_OPS);
    let end = (last + 2).min(node.ops.len());
    for (index, op) in node.ops.iter().enumerate().take(end).skip(first) {
        let marker = if index + 1 == last {
            " <-- last completed"
        } else if index == last {
            " <-- faulting"
        } else {
            ""
        };
        match &op.context {
            Some(context) => {
                let _ = writeln!(out, "    {index:4}: {} [{context}]{marker}", op.name);
            }
            None => {
                let _ = writeln!(out, "    {index:4}: {}{marker}", op.name);
            }
        }
    }
    if end < node.ops.len() {
        let _ = writeln!(out, "    ... {} more", node.ops.len() - end);
    }
}

fn write_allocations(out: &mut String, title: &str, allocations: &[DredAllocation]) {
    if allocations.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {title}:");
    for allocation in allocations {
        let _ = writeln!(out, "    {} ({})", allocation.name, allocation.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::{BreadcrumbOp, PageFault};

    fn op(name: &str) -> BreadcrumbOp {
        BreadcrumbOp {
            name: name.into(),
            context: None,
        }
    }

    #[test]
    fn report_marks_the_faulting_operation() {
        let report = DredReport {
            breadcrumbs: vec![BreadcrumbNode {
                command_list_name: "Graphics Queue List 0".into(),
                command_queue_name: "Graphics Queue".into(),
                last_completed_op: 2,
                ops: vec![op("ResourceBarrier"), op("SetPipelineState"), op("Dispatch"), op("CopyResource")],
            }],
            page_fault: Some(PageFault {
                virtual_address: 0x1000,
                existing_allocations: vec![DredAllocation {
                    name: "Lights".into(),
                    kind: "Buffer".into(),
                }],
                recent_freed_allocations: Vec::new(),
            }),
        };
        let reason = ApiError::new(ApiError::DEVICE_HUNG, "ExecuteCommandLists");
        let text = format_report(Some(&reason), &report);

        assert!(text.starts_with("Device removed: ExecuteCommandLists"));
        assert!(text.contains("[Graphics Queue] Graphics Queue List 0: 2 of 4 operations completed"));
        assert!(text.contains("SetPipelineState <-- last completed"));
        assert!(text.contains("Dispatch <-- faulting"));
        assert!(text.contains("Page fault at VA 0x0000000000001000"));
        assert!(text.contains("Lights (Buffer)"));
        assert!(!text.contains("Recently freed"));
    }

    #[test]
    fn completed_lists_are_skipped() {
        let report = DredReport {
            breadcrumbs: vec![BreadcrumbNode {
                command_list_name: "Copy Queue List 0".into(),
                command_queue_name: "Copy Queue".into(),
                last_completed_op: 1,
                ops: vec![op("CopyBufferRegion")],
            }],
            page_fault: None,
        };
        let text = format_report(None, &report);
        assert!(text.contains("No incomplete command lists"));
        assert!(!text.contains("Copy Queue List 0"));
    }
}
