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

//! The on-disk shader cache.
//!
//! One file per [`ShaderKey`], little-endian:
//!
//! ```text
//! u32      version
//! u8[16]   shader hash
//! u32      include count
//!   { u32 length; u8[length] path } x include count
//! u32      blob size
//! u8[size] blob
//! ```

use super::ShaderKey;
use crate::error::ShaderError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Version of the cache file layout; files of another version are
/// discarded.
pub const CACHE_VERSION: u32 = 1;

/// The payload of a cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedShader {
    /// Compiler-reported hash.
    pub hash: [u8; 16],
    /// Files the source included.
    pub includes: Vec<PathBuf>,
    /// The bytecode.
    pub bytecode: Vec<u8>,
}

impl CachedShader {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.bytecode.len());
        out.extend_from_slice(&CACHE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&(self.includes.len() as u32).to_le_bytes());
        for include in &self.includes {
            let path = include.to_string_lossy();
            out.extend_from_slice(&(path.len() as u32).to_le_bytes());
            out.extend_from_slice(path.as_bytes());
        }
        out.extend_from_slice(&(self.bytecode.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.bytecode);
        out
    }

    fn decode(bytes: &[u8], path: &Path) -> Result<Self, ShaderError> {
        let corrupt = || ShaderError::CacheCorrupt {
            path: path.to_path_buf(),
        };
        let mut reader = Reader { bytes };

        let version = reader.u32().ok_or_else(corrupt)?;
        if version != CACHE_VERSION {
            return Err(ShaderError::CacheVersionMismatch {
                path: path.to_path_buf(),
                found: version,
                expected: CACHE_VERSION,
            });
        }
        let mut hash = [0u8; 16];
        hash.copy_from_slice(reader.take(16).ok_or_else(corrupt)?);

        let count = reader.u32().ok_or_else(corrupt)?;
        let mut includes = Vec::new();
        for _ in 0..count {
            let len = reader.u32().ok_or_else(corrupt)? as usize;
            let raw = reader.take(len).ok_or_else(corrupt)?;
            let include = std::str::from_utf8(raw).map_err(|_| corrupt())?;
            includes.push(PathBuf::from(include));
        }

        let size = reader.u32().ok_or_else(corrupt)? as usize;
        let bytecode = reader.take(size).ok_or_else(corrupt)?.to_vec();
        if !reader.bytes.is_empty() {
            return Err(corrupt());
        }
        Ok(Self {
            hash,
            includes,
            bytecode,
        })
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

    fn u32(&mut self) -> Option<u32> {
        let b = self.take(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// A directory of cache files.
#[derive(Debug, Clone)]
pub struct ShaderCache {
    dir: PathBuf,
}

impl ShaderCache {
    /// A cache rooted at `dir`; the directory is created on first store.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cache file for `key`.
    pub fn path_for(&self, key: &ShaderKey) -> PathBuf {
        self.dir.join(key.cache_file_name())
    }

    /// Loads the entry for `key` compiled from `source`.
    ///
    /// Returns `Ok(None)` when there is no entry, or when the source or any
    /// recorded include is newer than the entry. Unreadable, corrupt and
    /// outdated files are errors the caller treats as misses.
    pub fn load(&self, key: &ShaderKey, source: &Path) -> Result<Option<CachedShader>, ShaderError> {
        let path = self.path_for(key);
        let cached_at = match fs::metadata(&path) {
            Ok(meta) => meta.modified().map_err(|source| ShaderError::CacheIo {
                path: path.clone(),
                source,
            })?,
            Err(_) => return Ok(None),
        };
        let bytes = fs::read(&path).map_err(|source| ShaderError::CacheIo {
            path: path.clone(),
            source,
        })?;
        let entry = CachedShader::decode(&bytes, &path)?;

        let dependencies = std::iter::once(source).chain(entry.includes.iter().map(PathBuf::as_path));
        for dependency in dependencies {
            if !is_older_than(dependency, cached_at) {
                log::debug!("Shader cache entry '{}' is stale ({})", path.display(), dependency.display());
                return Ok(None);
            }
        }
        Ok(Some(entry))
    }

    /// Writes the entry for `key`.
    pub fn store(&self, key: &ShaderKey, entry: &CachedShader) -> Result<(), ShaderError> {
        let path = self.path_for(key);
        let io = |source| ShaderError::CacheIo {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io)?;
        fs::write(&path, entry.encode()).map_err(io)
    }
}

/// Returns `true` if `path` exists and was last modified no later than
/// `time`.
fn is_older_than(path: &Path, time: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| modified <= time)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderDesc;
    use keel_core::rhi::{ShaderModel, ShaderStage};
    use std::time::Duration;

    fn key() -> ShaderKey {
        ShaderKey::new(
            &ShaderDesc::new("blur.hlsl", "CSMain", ShaderStage::Compute),
            ShaderModel::SM_6_6,
            false,
        )
    }

    fn touch(path: &Path, offset: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + offset).unwrap();
    }

    #[test]
    fn entries_are_served_until_a_dependency_changes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blur.hlsl");
        let include = dir.path().join("common.hlsli");
        fs::write(&source, "void CSMain() {}").unwrap();
        fs::write(&include, "float X;").unwrap();
        touch(&source, Duration::ZERO);
        touch(&include, Duration::ZERO);

        let cache = ShaderCache::new(dir.path().join("cache"));
        let entry = CachedShader {
            hash: [7; 16],
            includes: vec![include.clone()],
            bytecode: vec![1, 2, 3, 4],
        };
        cache.store(&key(), &entry).unwrap();
        assert_eq!(cache.load(&key(), &source).unwrap(), Some(entry));

        touch(&include, Duration::from_secs(60));
        assert_eq!(cache.load(&key(), &source).unwrap(), None);
    }

    #[test]
    fn other_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blur.hlsl");
        fs::write(&source, "").unwrap();
        touch(&source, Duration::from_secs(0));
        let cache = ShaderCache::new(dir.path());
        let mut bytes = CachedShader {
            hash: [0; 16],
            includes: Vec::new(),
            bytecode: vec![9],
        }
        .encode();
        bytes[0..4].copy_from_slice(&(CACHE_VERSION + 1).to_le_bytes());
        fs::write(cache.path_for(&key()), bytes).unwrap();

        let err = cache.load(&key(), &source).unwrap_err();
        assert!(matches!(err, ShaderError::CacheVersionMismatch { found, .. } if found == CACHE_VERSION + 1));
        assert!(err.is_cache_miss());
    }

    #[test]
    fn truncated_files_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path());
        fs::write(cache.path_for(&key()), CACHE_VERSION.to_le_bytes()).unwrap();
        let err = cache.load(&key(), Path::new("blur.hlsl")).unwrap_err();
        assert!(matches!(err, ShaderError::CacheCorrupt { .. }));
    }

    #[test]
    fn missing_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ShaderCache::new(dir.path());
        assert_eq!(cache.load(&key(), Path::new("blur.hlsl")).unwrap(), None);
    }
}
