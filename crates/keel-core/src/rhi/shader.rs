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

//! Shader stages, models and the compiler contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A programmable pipeline stage, or a DXIL library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
    Amplification,
    Mesh,
    Library,
}

impl ShaderStage {
    /// The profile prefix the compiler expects.
    pub const fn profile_prefix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::Pixel => "ps",
            ShaderStage::Compute => "cs",
            ShaderStage::Amplification => "as",
            ShaderStage::Mesh => "ms",
            ShaderStage::Library => "lib",
        }
    }
}

/// A shader model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShaderModel {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl ShaderModel {
    /// Shader model 6.5.
    pub const SM_6_5: Self = Self::new(6, 5);
    /// Shader model 6.6.
    pub const SM_6_6: Self = Self::new(6, 6);
    /// Shader model 6.7.
    pub const SM_6_7: Self = Self::new(6, 7);
    /// Shader model 6.8.
    pub const SM_6_8: Self = Self::new(6, 8);

    /// Creates a shader model version.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// The full target profile for a stage, e.g. `cs_6_6`.
    pub fn target(self, stage: ShaderStage) -> String {
        format!("{}_{}_{}", stage.profile_prefix(), self.major, self.minor)
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A preprocessor define.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderDefine {
    /// Macro name.
    pub name: String,
    /// Macro value; empty for flag defines.
    pub value: String,
}

impl ShaderDefine {
    /// Creates a define.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates a flag define with value `1`.
    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, "1")
    }
}

/// Everything the compiler needs for one compilation.
///
/// `source` is already preprocessed: includes have been inlined.
#[derive(Debug, Clone, Copy)]
pub struct CompileArgs<'a> {
    /// Flattened source text.
    pub source: &'a str,
    /// Name of the source file, for diagnostics.
    pub source_name: &'a str,
    /// Entry point function.
    pub entry_point: &'a str,
    /// Target stage.
    pub stage: ShaderStage,
    /// Target shader model.
    pub model: ShaderModel,
    /// Preprocessor defines.
    pub defines: &'a [ShaderDefine],
    /// Embed debug information and skip optimizations.
    pub debug: bool,
}

/// A resource a shader binds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct BoundResource {
    pub name: String,
    pub register: u32,
    pub space: u32,
}

/// Reflection data extracted from a compiled shader.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderReflection {
    /// Thread group size of compute, mesh and amplification shaders.
    pub thread_group_size: Option<[u32; 3]>,
    /// Bound resources.
    pub resources: Vec<BoundResource>,
}

/// The output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    /// Validated bytecode.
    pub bytecode: Vec<u8>,
    /// Compiler-reported hash of the bytecode.
    pub hash: [u8; 16],
    /// Reflection data.
    pub reflection: ShaderReflection,
}

/// A shader compiler.
///
/// Implementations compile with row-major matrices, warnings as errors and
/// all resources bound; `debug` additionally embeds debug information.
pub trait ShaderCompiler: Send + Sync {
    /// Compiles one entry point. Failures return the compiler's message.
    fn compile(&self, args: &CompileArgs<'_>) -> Result<CompiledShader, String>;

    /// Recovers reflection data from previously compiled bytecode, such as a
    /// blob loaded from the shader cache.
    ///
    /// Compilers that cannot reflect a bare blob return empty reflection.
    fn reflect(&self, bytecode: &[u8]) -> ShaderReflection {
        let _ = bytecode;
        ShaderReflection::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_profiles() {
        assert_eq!(ShaderModel::SM_6_6.target(ShaderStage::Compute), "cs_6_6");
        assert_eq!(ShaderModel::SM_6_8.target(ShaderStage::Library), "lib_6_8");
        assert!(ShaderModel::SM_6_7 > ShaderModel::SM_6_6);
        assert_eq!(ShaderModel::SM_6_5.to_string(), "6.5");
    }
}
