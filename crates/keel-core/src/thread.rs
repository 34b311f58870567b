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

//! Thread affinity helpers.
//!
//! The application registers its main thread once with [`set_main_thread`].
//! Owner-thread assertions (render graph recording, frame ticking) query
//! [`is_main_thread`]; until a main thread is registered every thread
//! qualifies, which keeps headless tools and test harnesses unconstrained.

use std::sync::OnceLock;
use std::thread::{self, ThreadId};

static MAIN_THREAD: OnceLock<ThreadId> = OnceLock::new();

/// Registers the calling thread as the main thread.
///
/// Returns `false` if a different thread was already registered.
pub fn set_main_thread() -> bool {
    let current = thread::current().id();
    *MAIN_THREAD.get_or_init(|| current) == current
}

/// Returns `true` if the calling thread is the registered main thread, or if
/// no main thread has been registered yet.
pub fn is_main_thread() -> bool {
    MAIN_THREAD
        .get()
        .map_or(true, |id| *id == thread::current().id())
}

/// Returns the registered main thread, if any.
pub fn main_thread_id() -> Option<ThreadId> {
    MAIN_THREAD.get().copied()
}
