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

//! A deterministic in-process compiler for tests and headless runs.

use super::{find_function, parse_bound_resources, parse_numthreads};
use keel_core::rhi::{
    BoundResource, CompileArgs, CompiledShader, ShaderCompiler, ShaderReflection, ShaderStage,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bytecode container magic.
const MAGIC: &[u8; 4] = b"DXIL";

/// Appends the reflection block to a bytecode container.
fn encode_reflection(out: &mut Vec<u8>, reflection: &ShaderReflection) {
    match reflection.thread_group_size {
        Some(size) => {
            out.push(1);
            for v in size {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        None => out.push(0),
    }
    out.extend_from_slice(&(reflection.resources.len() as u32).to_le_bytes());
    for resource in &reflection.resources {
        out.extend_from_slice(&(resource.name.len() as u32).to_le_bytes());
        out.extend_from_slice(resource.name.as_bytes());
        out.extend_from_slice(&resource.register.to_le_bytes());
        out.extend_from_slice(&resource.space.to_le_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < len {
            return None;
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn decode_reflection(bytecode: &[u8]) -> Option<ShaderReflection> {
    let mut reader = Reader { bytes: bytecode };
    if reader.take(4)? != MAGIC {
        return None;
    }
    reader.take(32)?;
    let target_len = reader.u32()? as usize;
    reader.take(target_len)?;

    let thread_group_size = match reader.u8()? {
        0 => None,
        _ => Some([reader.u32()?, reader.u32()?, reader.u32()?]),
    };
    let count = reader.u32()?;
    let mut resources = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.u32()? as usize;
        let name = String::from_utf8(reader.take(len)?.to_vec()).ok()?;
        resources.push(BoundResource {
            name,
            register: reader.u32()?,
            space: reader.u32()?,
        });
    }
    Some(ShaderReflection {
        thread_group_size,
        resources,
    })
}

/// "Compiles" by hashing the flattened source and arguments.
///
/// The bytecode and shader hash are a pure function of the input, so equal
/// inputs give byte-identical outputs. A line `#error <message>` in the
/// source makes the compilation fail with `<message>`, and a missing entry
/// point is an error, as with a real compiler. Reflection travels inside the
/// bytecode, so [`ShaderCompiler::reflect`] works on cached blobs.
#[derive(Debug, Default)]
pub struct HeadlessCompiler {
    compilations: AtomicUsize,
}

impl HeadlessCompiler {
    /// Creates a compiler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of compilations performed, failed ones included.
    pub fn compile_count(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }
}

impl ShaderCompiler for HeadlessCompiler {
    fn compile(&self, args: &CompileArgs<'_>) -> Result<CompiledShader, String> {
        self.compilations.fetch_add(1, Ordering::Relaxed);

        if let Some(message) = args
            .source
            .lines()
            .find_map(|l| l.trim().strip_prefix("#error"))
        {
            return Err(format!("{}: error: {}", args.source_name, message.trim()));
        }
        if args.stage != ShaderStage::Library && find_function(args.source, args.entry_point).is_none() {
            return Err(format!(
                "{}: error: missing entry point definition '{}'",
                args.source_name, args.entry_point
            ));
        }

        let target = args.model.target(args.stage);
        let mut hasher = blake3::Hasher::new();
        hasher.update(args.source.as_bytes());
        hasher.update(args.entry_point.as_bytes());
        hasher.update(target.as_bytes());
        for define in args.defines {
            hasher.update(define.name.as_bytes());
            hasher.update(b"=");
            hasher.update(define.value.as_bytes());
            hasher.update(b";");
        }
        hasher.update(&[args.debug as u8]);
        let digest = hasher.finalize();

        let mut hash = [0u8; 16];
        hash.copy_from_slice(&digest.as_bytes()[..16]);

        let thread_group_size = match args.stage {
            ShaderStage::Compute | ShaderStage::Mesh | ShaderStage::Amplification => {
                parse_numthreads(args.source, args.entry_point)
            }
            _ => None,
        };
        let reflection = ShaderReflection {
            thread_group_size,
            resources: parse_bound_resources(args.source),
        };

        let mut bytecode = Vec::with_capacity(64 + target.len());
        bytecode.extend_from_slice(MAGIC);
        bytecode.extend_from_slice(digest.as_bytes());
        bytecode.extend_from_slice(&(target.len() as u32).to_le_bytes());
        bytecode.extend_from_slice(target.as_bytes());
        encode_reflection(&mut bytecode, &reflection);

        Ok(CompiledShader {
            bytecode,
            hash,
            reflection,
        })
    }

    fn reflect(&self, bytecode: &[u8]) -> ShaderReflection {
        decode_reflection(bytecode).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::{ShaderDefine, ShaderModel};

    fn args<'a>(source: &'a str, defines: &'a [ShaderDefine]) -> CompileArgs<'a> {
        CompileArgs {
            source,
            source_name: "test.hlsl",
            entry_point: "CSMain",
            stage: ShaderStage::Compute,
            model: ShaderModel::SM_6_6,
            defines,
            debug: false,
        }
    }

    const SOURCE: &str = "[numthreads(8, 8, 1)]\nvoid CSMain(uint3 id : SV_DispatchThreadID) {}\n";

    #[test]
    fn compilation_is_deterministic() {
        let compiler = HeadlessCompiler::new();
        let a = compiler.compile(&args(SOURCE, &[])).unwrap();
        let b = compiler.compile(&args(SOURCE, &[])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.reflection.thread_group_size, Some([8, 8, 1]));
        assert_eq!(compiler.compile_count(), 2);
    }

    #[test]
    fn defines_change_the_hash() {
        let compiler = HeadlessCompiler::new();
        let defines = [ShaderDefine::flag("USE_FOG")];
        let a = compiler.compile(&args(SOURCE, &[])).unwrap();
        let b = compiler.compile(&args(SOURCE, &defines)).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn reflection_survives_the_blob() {
        let compiler = HeadlessCompiler::new();
        let source = "RWTexture2D<float4> Output : register(u0);\n[numthreads(4, 2, 1)]\nvoid CSMain() {}\n";
        let compiled = compiler.compile(&args(source, &[])).unwrap();
        assert_eq!(compiler.reflect(&compiled.bytecode), compiled.reflection);
        assert_eq!(compiler.reflect(b"garbage"), ShaderReflection::default());
    }

    #[test]
    fn errors_are_reported() {
        let compiler = HeadlessCompiler::new();
        let err = compiler
            .compile(&args("#error undeclared identifier 'foo'\n", &[]))
            .unwrap_err();
        assert!(err.contains("undeclared identifier 'foo'"));

        let err = compiler.compile(&args("void Other() {}", &[])).unwrap_err();
        assert!(err.contains("missing entry point"));
    }
}
