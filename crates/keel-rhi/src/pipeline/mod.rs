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

//! Root signatures, pipeline states, state objects and the tables and
//! signatures used to dispatch them.

mod command_signature;
mod pipeline_state;
mod root_signature;
mod shader_binding_table;
mod state_object;

pub use command_signature::CommandSignature;
pub use pipeline_state::{PipelineState, PipelineStateBuilder};
pub use root_signature::RootSignature;
pub use shader_binding_table::{
    ShaderBindingTable, ShaderTableLayout, SHADER_RECORD_ALIGNMENT, SHADER_TABLE_ALIGNMENT,
};
pub use state_object::{HitGroupDesc, StateObject, StateObjectBuilder};
