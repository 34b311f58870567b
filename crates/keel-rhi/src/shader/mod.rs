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

//! Shader compilation, caching and hot reload.
//!
//! Shaders are identified by a [`ShaderKey`]: source path, entry point,
//! stage, define set, shader model and debug mode. The [`ShaderManager`]
//! compiles through an on-disk [`ShaderCache`], tracks every file a shader
//! includes and recompiles shaders whose sources change on disk.

mod cache;
mod include;
mod manager;
mod watcher;

pub use cache::{CachedShader, ShaderCache, CACHE_VERSION};
pub use include::{IncludeResolver, PreprocessedSource};
pub use manager::{ShaderManager, ShaderRecompiled};
pub use watcher::DirectoryWatcher;

use keel_core::rhi::{ShaderDefine, ShaderModel, ShaderReflection, ShaderStage};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What to compile: a source file, an entry point and defines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderDesc {
    /// Source path, relative to an include directory or absolute.
    pub path: PathBuf,
    /// Entry point; ignored for libraries.
    pub entry_point: String,
    /// Target stage.
    pub stage: ShaderStage,
    /// Preprocessor defines.
    pub defines: Vec<ShaderDefine>,
}

impl ShaderDesc {
    /// Describes `entry_point` of `path` for `stage`.
    pub fn new(path: impl Into<PathBuf>, entry_point: impl Into<String>, stage: ShaderStage) -> Self {
        Self {
            path: path.into(),
            entry_point: entry_point.into(),
            stage,
            defines: Vec::new(),
        }
    }

    /// Describes a DXIL library.
    pub fn library(path: impl Into<PathBuf>) -> Self {
        Self::new(path, "", ShaderStage::Library)
    }

    /// Adds a define.
    pub fn define(mut self, define: ShaderDefine) -> Self {
        self.defines.push(define);
        self
    }
}

/// The identity of a compiled shader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    /// Source path as requested.
    pub path: PathBuf,
    /// Entry point.
    pub entry_point: String,
    /// Stage.
    pub stage: ShaderStage,
    /// Defines, sorted.
    pub defines: Vec<ShaderDefine>,
    /// Shader model.
    pub model: ShaderModel,
    /// Debug compilation.
    pub debug: bool,
}

impl ShaderKey {
    /// Builds the key of `desc` under the given model and mode.
    pub fn new(desc: &ShaderDesc, model: ShaderModel, debug: bool) -> Self {
        let mut defines = desc.defines.clone();
        defines.sort();
        defines.dedup();
        Self {
            path: desc.path.clone(),
            entry_point: desc.entry_point.clone(),
            stage: desc.stage,
            defines,
            model,
            debug,
        }
    }

    /// Hash of the define set.
    pub fn define_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for define in &self.defines {
            hasher.update(define.name.as_bytes());
            hasher.update(b"=");
            hasher.update(define.value.as_bytes());
            hasher.update(b";");
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Name of the cache file:
    /// `{stem}_{target}_{major}_{minor}_{entry}_{defineHash}[_DEBUG].bin`.
    pub fn cache_file_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{}_{}_{}_{}_{}_{:016x}{}.bin",
            stem,
            self.stage.profile_prefix(),
            self.model.major,
            self.model.minor,
            self.entry_point,
            self.define_hash(),
            if self.debug { "_DEBUG" } else { "" }
        )
    }
}

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if !self.entry_point.is_empty() {
            write!(f, ":{}", self.entry_point)?;
        }
        write!(f, " ({})", self.model.target(self.stage))
    }
}

static NEXT_SHADER_ID: AtomicU64 = AtomicU64::new(1);

/// A compiled shader.
///
/// Shaders are immutable; a recompilation produces a new `Shader`.
pub struct Shader {
    id: u64,
    key: ShaderKey,
    source: PathBuf,
    bytecode: Arc<[u8]>,
    hash: [u8; 16],
    reflection: ShaderReflection,
    includes: Vec<PathBuf>,
    from_cache: bool,
}

impl Shader {
    pub(crate) fn new(
        key: ShaderKey,
        source: PathBuf,
        bytecode: Arc<[u8]>,
        hash: [u8; 16],
        reflection: ShaderReflection,
        includes: Vec<PathBuf>,
        from_cache: bool,
    ) -> Self {
        Self {
            id: NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed),
            key,
            source,
            bytecode,
            hash,
            reflection,
            includes,
            from_cache,
        }
    }

    /// Unique id of this compilation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The key the shader was compiled for.
    pub fn key(&self) -> &ShaderKey {
        &self.key
    }

    /// Resolved source path.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The bytecode.
    pub fn bytecode(&self) -> &Arc<[u8]> {
        &self.bytecode
    }

    /// Compiler-reported hash.
    pub fn hash(&self) -> &[u8; 16] {
        &self.hash
    }

    /// Reflection data.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// Every file the source includes, transitively.
    pub fn includes(&self) -> &[PathBuf] {
        &self.includes
    }

    /// Returns `true` if the shader was loaded from the disk cache.
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    /// Returns `true` if `path` is the source or one of its includes.
    pub fn depends_on(&self, path: &Path) -> bool {
        self.source == path || self.includes.iter().any(|p| p == path)
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("id", &self.id)
            .field("key", &self.key.to_string())
            .field("bytes", &self.bytecode.len())
            .field("includes", &self.includes.len())
            .field("from_cache", &self.from_cache)
            .finish()
    }
}

/// Canonical form of a path for dependency matching; falls back to the
/// path itself when it does not exist.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_file_names_follow_the_key() {
        let desc = ShaderDesc::new("passes/Tonemap.hlsl", "PSMain", ShaderStage::Pixel);
        let key = ShaderKey::new(&desc, ShaderModel::SM_6_6, false);
        let name = key.cache_file_name();
        assert!(name.starts_with("Tonemap_ps_6_6_PSMain_"), "{name}");
        assert!(name.ends_with(".bin"));
        assert!(!name.contains("_DEBUG"));

        let debug = ShaderKey::new(&desc, ShaderModel::SM_6_6, true);
        assert!(debug.cache_file_name().ends_with("_DEBUG.bin"));
    }

    #[test]
    fn define_order_does_not_change_the_key() {
        let a = ShaderDesc::new("a.hlsl", "Main", ShaderStage::Compute)
            .define(ShaderDefine::flag("A"))
            .define(ShaderDefine::new("B", "2"));
        let b = ShaderDesc::new("a.hlsl", "Main", ShaderStage::Compute)
            .define(ShaderDefine::new("B", "2"))
            .define(ShaderDefine::flag("A"));
        let ka = ShaderKey::new(&a, ShaderModel::SM_6_6, false);
        let kb = ShaderKey::new(&b, ShaderModel::SM_6_6, false);
        assert_eq!(ka, kb);
        assert_eq!(ka.cache_file_name(), kb.cache_file_name());

        let c = ShaderDesc::new("a.hlsl", "Main", ShaderStage::Compute).define(ShaderDefine::flag("A"));
        assert_ne!(ka.define_hash(), ShaderKey::new(&c, ShaderModel::SM_6_6, false).define_hash());
    }
}
