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

//! The native graphics API boundary.
//!
//! Everything the RHI asks of the GPU goes through [`NativeDevice`]: object
//! creation, command recording as a stream of [`NativeCommand`]s, queue
//! submission and fences. Native objects are opaque `u64` handles so the
//! boundary stays object-safe and `Send`.

mod commands;
mod device;
mod dred;
mod handles;
mod pipeline;

pub use commands::*;
pub use device::*;
pub use dred::*;
pub use handles::*;
pub use pipeline::*;
