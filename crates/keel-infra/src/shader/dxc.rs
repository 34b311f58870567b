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

//! A compiler driving the `dxc` executable.

use super::{parse_bound_resources, parse_numthreads};
use anyhow::{bail, Context};
use keel_core::rhi::{CompileArgs, CompiledShader, ShaderCompiler, ShaderReflection};
use std::path::PathBuf;
use std::process::Command;

/// Compiles through a `dxc` process.
///
/// Every compilation passes `-Zpr -WX -all_resources_bound`; debug builds
/// add `-Zi -Qembed_debug -Od`, release builds `-O3`. The shader hash is read
/// back from the `-Fsh` output.
#[derive(Debug, Clone)]
pub struct DxcProcessCompiler {
    executable: PathBuf,
    extra_args: Vec<String>,
}

impl Default for DxcProcessCompiler {
    fn default() -> Self {
        Self::new("dxc")
    }
}

impl DxcProcessCompiler {
    /// Uses the given `dxc` executable.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            extra_args: Vec::new(),
        }
    }

    /// Appends arguments to every invocation.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The command line for one compilation, without input and outputs.
    pub fn arguments(&self, args: &CompileArgs<'_>) -> Vec<String> {
        let mut cmd = vec![
            "-T".to_string(),
            args.model.target(args.stage),
            "-Zpr".into(),
            "-WX".into(),
            "-all_resources_bound".into(),
        ];
        if !args.entry_point.is_empty() {
            cmd.push("-E".into());
            cmd.push(args.entry_point.into());
        }
        if args.debug {
            cmd.extend(["-Zi".into(), "-Qembed_debug".into(), "-Od".into()]);
        } else {
            cmd.push("-O3".into());
        }
        for define in args.defines {
            cmd.push("-D".into());
            if define.value.is_empty() {
                cmd.push(define.name.clone());
            } else {
                cmd.push(format!("{}={}", define.name, define.value));
            }
        }
        cmd.extend(self.extra_args.iter().cloned());
        cmd
    }

    fn run(&self, args: &CompileArgs<'_>) -> anyhow::Result<CompiledShader> {
        let dir = tempfile::tempdir().context("failed to create a scratch directory")?;
        let input = dir.path().join("input.hlsl");
        let output = dir.path().join("output.dxil");
        let hash_file = dir.path().join("output.hash");
        std::fs::write(&input, args.source).context("failed to write the flattened source")?;

        let result = Command::new(&self.executable)
            .args(self.arguments(args))
            .arg("-Fo")
            .arg(&output)
            .arg("-Fsh")
            .arg(&hash_file)
            .arg(&input)
            .output()
            .with_context(|| format!("failed to launch '{}'", self.executable.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr)
                .replace(&input.display().to_string(), args.source_name);
            bail!("{}", stderr.trim());
        }

        let bytecode = std::fs::read(&output).context("compiler produced no bytecode")?;
        // ShaderHash is a u32 flags word followed by the 16-byte digest.
        let hash_blob = std::fs::read(&hash_file).unwrap_or_default();
        let mut hash = [0u8; 16];
        if hash_blob.len() >= 20 {
            hash.copy_from_slice(&hash_blob[4..20]);
        } else {
            hash.copy_from_slice(&blake3::hash(&bytecode).as_bytes()[..16]);
        }

        Ok(CompiledShader {
            bytecode,
            hash,
            reflection: ShaderReflection {
                thread_group_size: parse_numthreads(args.source, args.entry_point),
                resources: parse_bound_resources(args.source),
            },
        })
    }
}

impl ShaderCompiler for DxcProcessCompiler {
    fn compile(&self, args: &CompileArgs<'_>) -> Result<CompiledShader, String> {
        self.run(args).map_err(|e| format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::rhi::{ShaderDefine, ShaderModel, ShaderStage};

    #[test]
    fn command_line_flags() {
        let compiler = DxcProcessCompiler::default();
        let defines = [ShaderDefine::new("QUALITY", "2"), ShaderDefine::new("FLAG", "")];
        let args = CompileArgs {
            source: "",
            source_name: "a.hlsl",
            entry_point: "PSMain",
            stage: ShaderStage::Pixel,
            model: ShaderModel::SM_6_6,
            defines: &defines,
            debug: true,
        };
        let cmd = compiler.arguments(&args);
        for flag in ["-Zpr", "-WX", "-all_resources_bound", "-Zi", "-Qembed_debug", "ps_6_6", "QUALITY=2", "FLAG"] {
            assert!(cmd.iter().any(|a| a == flag), "missing {flag} in {cmd:?}");
        }
    }

    #[test]
    fn missing_executable_is_an_error() {
        let compiler = DxcProcessCompiler::new("definitely-not-a-real-dxc-binary");
        let args = CompileArgs {
            source: "void main() {}",
            source_name: "a.hlsl",
            entry_point: "main",
            stage: ShaderStage::Compute,
            model: ShaderModel::SM_6_6,
            defines: &[],
            debug: false,
        };
        let err = compiler.compile(&args).unwrap_err();
        assert!(err.contains("failed to launch"));
    }
}
