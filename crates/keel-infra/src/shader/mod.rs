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

//! Shader compiler implementations.

mod dxc;
mod headless;

pub use dxc::DxcProcessCompiler;
pub use headless::HeadlessCompiler;

use keel_core::rhi::BoundResource;

/// Finds the `[numthreads(x, y, z)]` attribute of an entry point.
pub(crate) fn parse_numthreads(source: &str, entry_point: &str) -> Option<[u32; 3]> {
    let entry_at = find_function(source, entry_point)?;
    let head = &source[..entry_at];
    let attr_at = head.rfind("numthreads")?;
    // The attribute must belong to this function, not a previous one.
    if head[attr_at..].contains('}') {
        return None;
    }
    let open = head[attr_at..].find('(')? + attr_at + 1;
    let close = head[open..].find(')')? + open;
    let mut dims = head[open..close].split(',').map(|d| d.trim().parse::<u32>());
    Some([dims.next()?.ok()?, dims.next()?.ok()?, dims.next()?.ok()?])
}

/// Finds resources declared with an explicit `register(...)` binding.
pub(crate) fn parse_bound_resources(source: &str) -> Vec<BoundResource> {
    let mut resources = Vec::new();
    for line in source.lines() {
        let Some(reg_at) = line.find("register(") else {
            continue;
        };
        let Some(colon) = line[..reg_at].rfind(':') else {
            continue;
        };
        let Some(name) = line[..colon].split_whitespace().last() else {
            continue;
        };
        let args_start = reg_at + "register(".len();
        let Some(args_len) = line[args_start..].find(')') else {
            continue;
        };
        let mut args = line[args_start..args_start + args_len].split(',').map(str::trim);
        let register = args
            .next()
            .and_then(|r| r.get(1..))
            .and_then(|r| r.parse().ok())
            .unwrap_or(0);
        let space = args
            .next()
            .and_then(|s| s.strip_prefix("space"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        resources.push(BoundResource {
            name: name.split('[').next().unwrap_or(name).to_string(),
            register,
            space,
        });
    }
    resources
}

/// Byte offset of `name(` as a function name in `source`.
pub(crate) fn find_function(source: &str, name: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = source[from..].find(name) {
        let at = from + pos;
        let before_ok = at == 0
            || !source[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let after = source[at + name.len()..].trim_start();
        if before_ok && after.starts_with('(') {
            return Some(at);
        }
        from = at + name.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
RWTexture2D<float4> Output : register(u0, space1);
Texture2D<float4> Input : register(t3);

[numthreads(8, 4, 1)]
void CSMain(uint3 id : SV_DispatchThreadID)
{
    Output[id.xy] = Input[id.xy];
}

[numthreads(64, 1, 1)]
void Other(uint3 id : SV_DispatchThreadID) {}
"#;

    #[test]
    fn numthreads_of_each_entry() {
        assert_eq!(parse_numthreads(SOURCE, "CSMain"), Some([8, 4, 1]));
        assert_eq!(parse_numthreads(SOURCE, "Other"), Some([64, 1, 1]));
        assert_eq!(parse_numthreads(SOURCE, "Missing"), None);
    }

    #[test]
    fn registers_are_parsed() {
        let resources = parse_bound_resources(SOURCE);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, "Output");
        assert_eq!((resources[0].register, resources[0].space), (0, 1));
        assert_eq!((resources[1].register, resources[1].space), (3, 0));
    }
}
