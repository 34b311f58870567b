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

//! `#include` resolution.

use super::normalize;
use crate::error::ShaderError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A source with every include inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedSource {
    /// Flattened source text.
    pub text: String,
    /// Every included file, in first-inclusion order, excluding the source.
    pub includes: Vec<PathBuf>,
}

/// Resolves sources and includes against a list of directories.
#[derive(Debug, Clone, Default)]
pub struct IncludeResolver {
    include_dirs: Vec<PathBuf>,
}

struct IncludeState {
    seen: HashSet<PathBuf>,
    includes: Vec<PathBuf>,
}

impl IncludeResolver {
    /// Creates a resolver searching `include_dirs` in order.
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self { include_dirs }
    }

    /// The search directories.
    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Finds a source file: absolute or existing paths as-is, then each
    /// include directory.
    pub fn resolve_source(&self, path: &Path) -> Result<PathBuf, ShaderError> {
        if path.is_file() {
            return Ok(normalize(path));
        }
        self.include_dirs
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
            .map(|found| normalize(&found))
            .ok_or_else(|| ShaderError::SourceNotFound(path.to_path_buf()))
    }

    /// Reads `source` and inlines its includes.
    ///
    /// A file included a second time expands to nothing. Includes are
    /// looked up next to the including file first, then in the include
    /// directories.
    pub fn preprocess(&self, source: &Path) -> Result<PreprocessedSource, ShaderError> {
        let source = normalize(source);
        let mut state = IncludeState {
            seen: HashSet::from([source.clone()]),
            includes: Vec::new(),
        };
        let text = std::fs::read_to_string(&source).map_err(|_| ShaderError::SourceNotFound(source.clone()))?;
        let text = self.expand(&source, &text, &mut state)?;
        Ok(PreprocessedSource {
            text,
            includes: state.includes,
        })
    }

    fn expand(&self, file: &Path, text: &str, state: &mut IncludeState) -> Result<String, ShaderError> {
        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("#pragma once") {
                continue;
            }
            let Some(include) = parse_include(trimmed) else {
                out.push_str(line);
                out.push('\n');
                continue;
            };

            let path = self.find_include(file, include).ok_or_else(|| ShaderError::IncludeNotFound {
                include: include.to_string(),
                from: file.to_path_buf(),
            })?;
            if !state.seen.insert(path.clone()) {
                continue;
            }
            state.includes.push(path.clone());
            let contents = std::fs::read_to_string(&path).map_err(|_| ShaderError::IncludeNotFound {
                include: include.to_string(),
                from: file.to_path_buf(),
            })?;
            let expanded = self.expand(&path, &contents, state)?;
            out.push_str(&expanded);
        }
        Ok(out)
    }

    fn find_include(&self, from: &Path, include: &str) -> Option<PathBuf> {
        let local = from.parent().map(|dir| dir.join(include));
        local
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(include)))
            .find(|candidate| candidate.is_file())
            .map(|found| normalize(&found))
    }
}

/// The target of an `#include "x"` or `#include <x>` line.
fn parse_include(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("#include")?.trim();
    let (open, close) = match rest.chars().next()? {
        '"' => ('"', '"'),
        '<' => ('<', '>'),
        _ => return None,
    };
    let rest = rest.strip_prefix(open)?;
    let end = rest.find(close)?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn include_lines_are_parsed() {
        assert_eq!(parse_include("#include \"common.hlsli\""), Some("common.hlsli"));
        assert_eq!(parse_include("#include <lib/math.hlsli>"), Some("lib/math.hlsli"));
        assert_eq!(parse_include("#define X 1"), None);
    }

    #[test]
    fn repeated_includes_expand_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("common.hlsli"), "#pragma once\nfloat Common;\n").unwrap();
        fs::write(dir.path().join("a.hlsli"), "#include \"common.hlsli\"\nfloat A;\n").unwrap();
        fs::write(
            dir.path().join("main.hlsl"),
            "#include \"a.hlsli\"\n#include \"common.hlsli\"\nvoid Main() {}\n",
        )
        .unwrap();

        let resolver = IncludeResolver::new(vec![dir.path().to_path_buf()]);
        let source = resolver.resolve_source(Path::new("main.hlsl")).unwrap();
        let pre = resolver.preprocess(&source).unwrap();

        assert_eq!(pre.text.matches("float Common;").count(), 1);
        assert!(pre.text.contains("float A;"));
        assert_eq!(pre.includes.len(), 2);
        assert!(pre.includes[0].ends_with("a.hlsli"));
        assert!(pre.includes[1].ends_with("common.hlsli"));
    }

    #[test]
    fn includes_fall_back_to_the_include_dirs() {
        let src = tempfile::tempdir().unwrap();
        let lib = tempfile::tempdir().unwrap();
        fs::write(lib.path().join("shared.hlsli"), "float Shared;\n").unwrap();
        fs::write(src.path().join("main.hlsl"), "#include <shared.hlsli>\n").unwrap();

        let resolver = IncludeResolver::new(vec![src.path().to_path_buf(), lib.path().to_path_buf()]);
        let pre = resolver.preprocess(&src.path().join("main.hlsl")).unwrap();
        assert!(pre.text.contains("float Shared;"));
    }

    #[test]
    fn missing_includes_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.hlsl"), "#include \"nope.hlsli\"\n").unwrap();
        let resolver = IncludeResolver::new(vec![dir.path().to_path_buf()]);
        let err = resolver.preprocess(&dir.path().join("main.hlsl")).unwrap_err();
        assert!(matches!(err, ShaderError::IncludeNotFound { ref include, .. } if include == "nope.hlsli"));

        let err = resolver.resolve_source(Path::new("absent.hlsl")).unwrap_err();
        assert!(matches!(err, ShaderError::SourceNotFound(_)));
    }
}
