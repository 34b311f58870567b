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

//! The shader manager.

use super::{normalize, CachedShader, DirectoryWatcher, IncludeResolver, Shader, ShaderCache, ShaderDesc, ShaderKey};
use crate::error::{RhiError, ShaderError};
use keel_core::config::ShaderSettings;
use keel_core::delegate::MulticastDelegate;
use keel_core::event::{EventBus, FileEvent};
use keel_core::rhi::{CompileArgs, ShaderCompiler, ShaderModel};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Broadcast when a shader is recompiled after one of its files changed.
#[derive(Debug, Clone)]
pub struct ShaderRecompiled {
    /// The shader that was replaced.
    pub old: Arc<Shader>,
    /// Its replacement.
    pub new: Arc<Shader>,
}

struct Entry {
    shader: Arc<Shader>,
    dirty: bool,
    /// Modification times of the shader's files once it was compiled.
    seen: HashMap<PathBuf, SystemTime>,
}

impl Entry {
    fn new(shader: Arc<Shader>) -> Self {
        let seen = std::iter::once(shader.source())
            .chain(shader.includes().iter().map(PathBuf::as_path))
            .filter_map(|path| Some((path.to_path_buf(), modified_time(path)?)))
            .collect();
        Self {
            shader,
            dirty: false,
            seen,
        }
    }

    /// Returns `true` unless `path` still has the modification time the
    /// shader was compiled against. Watchers report one save several times.
    fn changed_since_compile(&self, path: &Path) -> bool {
        match (self.seen.get(path), modified_time(path)) {
            (Some(seen), Some(now)) => now > *seen,
            _ => true,
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

/// Compiles, caches and hot-reloads shaders.
///
/// [`get_shader`](Self::get_shader) serves compiled shaders from memory.
/// File events, from the directory watcher or posted through
/// [`file_events`](Self::file_events), are consumed by
/// [`tick`](Self::tick): every shader whose source or includes contain a
/// changed path is marked dirty, and the next `get_shader` recompiles it and
/// broadcasts [`ShaderRecompiled`] once.
pub struct ShaderManager {
    compiler: Arc<dyn ShaderCompiler>,
    model: ShaderModel,
    debug: bool,
    resolver: IncludeResolver,
    cache: ShaderCache,
    shaders: Mutex<HashMap<ShaderKey, Entry>>,
    events: EventBus<FileEvent>,
    watcher: Mutex<Option<DirectoryWatcher>>,
    on_recompiled: MulticastDelegate<ShaderRecompiled>,
    compilations: AtomicUsize,
}

impl ShaderManager {
    /// Creates a manager; starts watching `settings.watch_directory` if set.
    pub fn new(compiler: Arc<dyn ShaderCompiler>, settings: &ShaderSettings) -> Result<Self, RhiError> {
        let manager = Self {
            compiler,
            model: settings.shader_model,
            debug: settings.debug,
            resolver: IncludeResolver::new(settings.include_dirs.clone()),
            cache: ShaderCache::new(settings.cache_dir.clone()),
            shaders: Mutex::new(HashMap::new()),
            events: EventBus::new(),
            watcher: Mutex::new(None),
            on_recompiled: MulticastDelegate::new(),
            compilations: AtomicUsize::new(0),
        };
        if let Some(dir) = &settings.watch_directory {
            manager.watch(dir)?;
        }
        Ok(manager)
    }

    /// Watches `dir` for changes, replacing any previous watcher.
    pub fn watch(&self, dir: &Path) -> Result<(), RhiError> {
        let watcher = DirectoryWatcher::new(dir, self.events.sender())?;
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);
        Ok(())
    }

    /// Sender for file events, for producers other than the built-in
    /// watcher.
    pub fn file_events(&self) -> flume::Sender<FileEvent> {
        self.events.sender()
    }

    /// The delegate fired on every hot recompile.
    pub fn on_recompiled(&self) -> &MulticastDelegate<ShaderRecompiled> {
        &self.on_recompiled
    }

    /// The key `desc` compiles under.
    pub fn key_for(&self, desc: &ShaderDesc) -> ShaderKey {
        ShaderKey::new(desc, self.model, self.debug)
    }

    /// The shader cache.
    pub fn cache(&self) -> &ShaderCache {
        &self.cache
    }

    /// Number of compiler invocations, failed ones included.
    pub fn compile_count(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    /// Number of shaders held in memory.
    pub fn shader_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ShaderKey, Entry>> {
        self.shaders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current shader for `desc`, compiling it on first use and
    /// after its files changed.
    ///
    /// On a failed recompile the error is returned and the shader stays
    /// dirty; callers keep using what they had.
    pub fn get_shader(&self, desc: &ShaderDesc) -> Result<Arc<Shader>, ShaderError> {
        let key = self.key_for(desc);
        let previous = match self.lock().get(&key) {
            Some(entry) if !entry.dirty => return Ok(entry.shader.clone()),
            Some(entry) => Some(entry.shader.clone()),
            None => None,
        };

        let shader = self.compile_key(&key)?;
        let fresh = Entry::new(shader.clone());

        {
            let mut shaders = self.lock();
            if let Some(entry) = shaders.get(&key) {
                let replaced = previous.as_ref().map_or(true, |p| p.id() != entry.shader.id());
                if !entry.dirty && replaced {
                    // Another thread finished the same compilation first.
                    return Ok(entry.shader.clone());
                }
            }
            shaders.insert(key, fresh);
        }

        if let Some(old) = previous {
            log::info!("Recompiled shader {}", shader.key());
            self.on_recompiled.broadcast(&ShaderRecompiled {
                old,
                new: shader.clone(),
            });
        }
        Ok(shader)
    }

    /// Compiles `desc` through the disk cache, bypassing the in-memory set.
    pub fn compile(&self, desc: &ShaderDesc) -> Result<Arc<Shader>, ShaderError> {
        self.compile_key(&self.key_for(desc))
    }

    fn compile_key(&self, key: &ShaderKey) -> Result<Arc<Shader>, ShaderError> {
        let source = self.resolver.resolve_source(&key.path)?;

        match self.cache.load(key, &source) {
            Ok(Some(entry)) => {
                let reflection = self.compiler.reflect(&entry.bytecode);
                return Ok(Arc::new(Shader::new(
                    key.clone(),
                    source,
                    Arc::from(entry.bytecode),
                    entry.hash,
                    reflection,
                    entry.includes,
                    true,
                )));
            }
            Ok(None) => {}
            Err(err) if err.is_cache_miss() => log::warn!("{err}; recompiling"),
            Err(err) => return Err(err),
        }

        let preprocessed = self.resolver.preprocess(&source)?;
        let source_name = source.to_string_lossy();
        let args = CompileArgs {
            source: &preprocessed.text,
            source_name: &source_name,
            entry_point: &key.entry_point,
            stage: key.stage,
            model: key.model,
            defines: &key.defines,
            debug: key.debug,
        };
        self.compilations.fetch_add(1, Ordering::Relaxed);
        let compiled = self.compiler.compile(&args).map_err(|message| {
            log::error!("Failed to compile shader {key}:\n{message}");
            ShaderError::Compilation {
                path: key.path.clone(),
                entry: key.entry_point.clone(),
                message,
            }
        })?;

        let entry = CachedShader {
            hash: compiled.hash,
            includes: preprocessed.includes.clone(),
            bytecode: compiled.bytecode.clone(),
        };
        if let Err(err) = self.cache.store(key, &entry) {
            log::warn!("Failed to write the shader cache: {err}");
        }

        Ok(Arc::new(Shader::new(
            key.clone(),
            source,
            Arc::from(compiled.bytecode),
            compiled.hash,
            compiled.reflection,
            preprocessed.includes,
            false,
        )))
    }

    /// Consumes pending file events and marks dependent shaders dirty.
    /// Events for a file whose modification time has not moved since the
    /// shader compiled are dropped. Returns the number of shaders newly
    /// marked.
    pub fn tick(&self) -> usize {
        let events = self.events.drain();
        if events.is_empty() {
            return 0;
        }
        let mut marked = 0;
        let mut shaders = self.lock();
        for event in events {
            let path = normalize(&event.path);
            for entry in shaders.values_mut() {
                if entry.dirty || !entry.shader.depends_on(&path) {
                    continue;
                }
                if !entry.changed_since_compile(&path) {
                    log::trace!("{} already compiled against {}", entry.shader.key(), path.display());
                    continue;
                }
                log::info!("{} changed ({:?}); {} will recompile", path.display(), event.kind, entry.shader.key());
                entry.dirty = true;
                marked += 1;
            }
        }
        marked
    }

    /// Returns `true` if the shader for `desc` is waiting to recompile.
    pub fn is_dirty(&self, desc: &ShaderDesc) -> bool {
        self.lock().get(&self.key_for(desc)).is_some_and(|e| e.dirty)
    }
}

impl fmt::Debug for ShaderManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderManager")
            .field("model", &self.model)
            .field("debug", &self.debug)
            .field("cache", &self.cache.dir())
            .field("shaders", &self.shader_count())
            .finish()
    }
}
