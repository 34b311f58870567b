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


//! # Keel Graph
//!
//! A per-frame render graph over the Keel RHI. Passes declare what they read
//! and write; compilation culls passes that feed no sink, aliases transient
//! resources with disjoint lifetimes, and plans state transitions, UAV
//! barriers and cross-queue waits. Execution records each pass into its own
//! command context in registration order.

#![warn(missing_docs)]

pub mod blackboard;
mod compile;
mod dump;
pub mod error;
mod execute;
pub mod graph;
pub mod pass;
pub mod pool;
pub mod resource;

pub use blackboard::Blackboard;
pub use error::GraphError;
pub use execute::GraphReport;
pub use graph::RenderGraph;
pub use pass::{BindFn, PassBuilder, PassFlags, PassId, PassResources};
pub use pool::TransientPool;
pub use resource::{GraphResource, PersistentBuffer, PersistentTexture, RgBuffer, RgHandle, RgResourceDesc, RgTexture};
