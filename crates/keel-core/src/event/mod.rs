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

//! Event channels shared between background producers (file watchers,
//! compiler threads) and the frame loop.

mod bus;

pub use bus::EventBus;

use std::path::PathBuf;

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    /// The file contents changed.
    Modified,
    /// The file was created.
    Added,
    /// The file was deleted.
    Removed,
}

/// A change notification for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEvent {
    /// The kind of change.
    pub kind: FileEventKind,
    /// The affected path, as reported by the watcher.
    pub path: PathBuf,
}

impl FileEvent {
    /// Creates a new event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}
