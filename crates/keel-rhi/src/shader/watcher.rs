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

//! Directory watching for hot reload.

use crate::error::RhiError;
use keel_core::event::{FileEvent, FileEventKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

/// Posts a [`FileEvent`] for every file created, modified or removed under
/// a directory. Watching stops when the watcher is dropped.
pub struct DirectoryWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Watches `root` recursively, sending events into `sender`.
    pub fn new(root: &Path, sender: flume::Sender<FileEvent>) -> Result<Self, RhiError> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                let Some(kind) = map_kind(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    // The receiver going away only means nobody listens anymore.
                    let _ = sender.send(FileEvent::new(kind, path));
                }
            }
            Err(err) => log::warn!("File watcher error: {err}"),
        })
        .map_err(to_io)?;
        watcher.watch(root, RecursiveMode::Recursive).map_err(to_io)?;
        log::info!("Watching '{}' for shader changes", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// The watched directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher").field("root", &self.root).finish()
    }
}

fn map_kind(kind: &EventKind) -> Option<FileEventKind> {
    match kind {
        EventKind::Create(_) => Some(FileEventKind::Added),
        EventKind::Modify(_) => Some(FileEventKind::Modified),
        EventKind::Remove(_) => Some(FileEventKind::Removed),
        _ => None,
    }
}

fn to_io(err: notify::Error) -> RhiError {
    RhiError::Io(std::io::Error::other(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn event_kinds_map_to_file_events() {
        assert_eq!(map_kind(&EventKind::Create(CreateKind::File)), Some(FileEventKind::Added));
        assert_eq!(map_kind(&EventKind::Modify(ModifyKind::Any)), Some(FileEventKind::Modified));
        assert_eq!(map_kind(&EventKind::Remove(RemoveKind::File)), Some(FileEventKind::Removed));
        assert_eq!(map_kind(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }
}
