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

//! # Keel Core
//!
//! Foundational crate containing the native API boundary, resource
//! descriptions, state tables and the small utilities shared by the RHI and
//! the render graph.

#![warn(missing_docs)]

pub mod check;
pub mod config;
pub mod delegate;
pub mod error;
pub mod event;
pub mod rhi;
pub mod subsystems;
pub mod thread;
pub mod utils;

pub use error::ApiError;
pub use subsystems::SubsystemRegistry;

#[doc(hidden)]
pub use log as __log;
