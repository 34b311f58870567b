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


//! Errors raised while compiling and executing a render graph.

use keel_core::rhi::ResourceStates;
use keel_rhi::RhiError;
use thiserror::Error;

/// A render graph failure.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A pass uses a handle that was not declared before the pass.
    #[error("pass '{pass}' uses resource #{index}, which was not declared before it")]
    UndeclaredResource {
        /// The offending pass.
        pass: String,
        /// Index of the handle.
        index: u32,
    },
    /// A pass reads a transient resource no earlier pass wrote.
    #[error("pass '{pass}' reads '{resource}' before any pass writes it")]
    UndeclaredDependency {
        /// The reading pass.
        pass: String,
        /// The resource.
        resource: String,
    },
    /// Two passes write a resource with no reader in between.
    #[error("'{resource}' is written by '{first}' and then by '{second}' without being read in between")]
    WriteAfterWrite {
        /// The resource.
        resource: String,
        /// The first writer.
        first: String,
        /// The second writer.
        second: String,
    },
    /// One pass writes a resource in two different states.
    #[error("pass '{pass}' writes '{resource}' as both {first:?} and {second:?}")]
    ConflictingWrites {
        /// The offending pass.
        pass: String,
        /// The resource.
        resource: String,
        /// State of the first write.
        first: ResourceStates,
        /// State of the conflicting write.
        second: ResourceStates,
    },
    /// A handle created by another graph.
    #[error("pass '{pass}' uses a handle that belongs to another graph")]
    ForeignHandle {
        /// The offending pass.
        pass: String,
    },
    /// Imported resources are owned outside the graph and cannot be exported.
    #[error("'{resource}' is imported and cannot be exported")]
    ExportOfImported {
        /// The resource.
        resource: String,
    },
    /// A device call failed.
    #[error(transparent)]
    Rhi(#[from] RhiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_passes() {
        let err = GraphError::WriteAfterWrite {
            resource: "GBuffer Normals".into(),
            first: "GBuffer".into(),
            second: "Decals".into(),
        };
        assert_eq!(
            err.to_string(),
            "'GBuffer Normals' is written by 'GBuffer' and then by 'Decals' without being read in between"
        );
    }
}
