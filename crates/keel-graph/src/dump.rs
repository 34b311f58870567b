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


//! Graphviz rendering of a graph's passes and resources.

use crate::pass::{Pass, PassFlags};
use crate::resource::{Origin, VirtualResource};
use std::fmt::Write;

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders passes as boxes and resources as ellipses, with an edge per
/// read and per write. Culled passes are dashed and grey; `live` is `None`
/// before compilation.
pub(crate) fn graphviz(passes: &[Pass], resources: &[VirtualResource], live: Option<&[bool]>) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_graph(&mut out, passes, resources, live);
    out
}

fn write_graph(
    out: &mut String,
    passes: &[Pass],
    resources: &[VirtualResource],
    live: Option<&[bool]>,
) -> std::fmt::Result {
    writeln!(out, "digraph RenderGraph {{")?;
    writeln!(out, "    rankdir=LR;")?;
    writeln!(out, "    node [fontname=\"Consolas\"];")?;

    for (i, pass) in passes.iter().enumerate() {
        let culled = live.is_some_and(|live| !live[i]);
        let color = if culled {
            "gray"
        } else if pass.flags.contains(PassFlags::COMPUTE) {
            "lightskyblue"
        } else if pass.flags.contains(PassFlags::COPY) {
            "khaki"
        } else {
            "palegreen"
        };
        let style = if culled { "dashed,filled" } else { "filled" };
        writeln!(
            out,
            "    P{} [shape=box, style=\"{}\", fillcolor={}, label=\"{}\\n{:?}\"];",
            i,
            style,
            color,
            escape(&pass.name),
            pass.queue
        )?;
    }

    for (i, resource) in resources.iter().enumerate() {
        let color = match resource.origin {
            Origin::Imported(_) => "orange",
            Origin::Persistent(_) => "plum",
            Origin::Transient if resource.export.is_some() => "plum",
            Origin::Transient => "white",
        };
        writeln!(
            out,
            "    R{} [shape=ellipse, style=filled, fillcolor={}, label=\"{}\\n{}\"];",
            i,
            color,
            escape(&resource.name),
            resource.desc.kind()
        )?;
    }

    for (i, pass) in passes.iter().enumerate() {
        for usage in pass.usages() {
            if usage.read {
                writeln!(out, "    R{} -> P{};", usage.index, i)?;
            }
            if usage.write {
                writeln!(out, "    P{} -> R{} [color=red];", i, usage.index)?;
            }
        }
    }
    writeln!(out, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{PassBuilder, PassId};
    use crate::resource::{RgHandle, RgResourceDesc};
    use keel_core::rhi::{BufferDesc, BufferFlags};

    #[test]
    fn test_dump_lists_nodes_edges_and_culled_passes() {
        let resources = vec![VirtualResource {
            name: "Light \"Tiles\"".into(),
            desc: RgResourceDesc::Buffer(BufferDesc::byte_address(64, BufferFlags::UNORDERED_ACCESS)),
            origin: Origin::Transient,
            export: None,
            declared_at: 0,
        }];
        let handle = RgHandle { graph: 1, index: 0 };
        let mut writer = Pass::new("Cull Lights".into(), PassFlags::COMPUTE);
        PassBuilder::new(&mut writer, PassId(0)).write(handle).build();
        let mut reader = Pass::new("Shade".into(), PassFlags::RASTER);
        PassBuilder::new(&mut reader, PassId(1)).read(handle).build();

        let dot = graphviz(&[writer, reader], &resources, Some(&[true, false]));
        assert!(dot.starts_with("digraph RenderGraph {"));
        assert!(dot.contains("P0 -> R0 [color=red];"));
        assert!(dot.contains("R0 -> P1;"));
        assert!(dot.contains("Light \\\"Tiles\\\""));
        assert!(dot.contains("P1 [shape=box, style=\"dashed,filled\", fillcolor=gray"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
