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

//! Descriptions of root signatures, pipeline state streams, state objects and
//! command signatures.

use super::handles::*;
use crate::keel_bitflags;
use crate::rhi::{Format, ShaderStage};
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Root signatures
// ─────────────────────────────────────────────────────────────────────────────

/// The kind of descriptors in a table range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DescriptorRangeType {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

/// A contiguous range of descriptors in a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    /// Descriptor kind.
    pub ty: DescriptorRangeType,
    /// Number of descriptors.
    pub count: u32,
    /// First shader register.
    pub base_register: u32,
    /// Register space.
    pub space: u32,
}

/// One root parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootParameter {
    /// Inline 32-bit constants.
    Constants {
        /// Shader register.
        register: u32,
        /// Register space.
        space: u32,
        /// Number of 32-bit values.
        count: u32,
    },
    /// A root constant buffer view.
    Cbv {
        /// Shader register.
        register: u32,
        /// Register space.
        space: u32,
    },
    /// A root shader resource view.
    Srv {
        /// Shader register.
        register: u32,
        /// Register space.
        space: u32,
    },
    /// A root unordered access view.
    Uav {
        /// Shader register.
        register: u32,
        /// Register space.
        space: u32,
    },
    /// A descriptor table.
    Table(Vec<DescriptorRange>),
}

impl RootParameter {
    /// Total descriptors of a table parameter, `0` for other parameters.
    pub fn table_size(&self) -> u32 {
        match self {
            RootParameter::Table(ranges) => ranges.iter().map(|r| r.count).sum(),
            _ => 0,
        }
    }

    /// Returns `true` if the parameter is a sampler table.
    pub fn is_sampler_table(&self) -> bool {
        matches!(self, RootParameter::Table(ranges)
            if ranges.first().is_some_and(|r| r.ty == DescriptorRangeType::Sampler))
    }
}

keel_bitflags! {
    /// Root signature flags.
    pub struct RootSignatureFlags: u32 {
        /// Input assembler layouts are allowed.
        const ALLOW_INPUT_ASSEMBLER = 0x1;
        /// The signature is a local (per shader record) signature.
        const LOCAL = 0x80;
        /// Shaders may index the resource heap directly.
        const RESOURCE_HEAP_DIRECTLY_INDEXED = 0x400;
        /// Shaders may index the sampler heap directly.
        const SAMPLER_HEAP_DIRECTLY_INDEXED = 0x800;
    }
}

/// Texture addressing of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum AddressMode {
    #[default]
    Wrap,
    Mirror,
    Clamp,
    Border,
}

/// Texel filtering of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum Filter {
    Point,
    #[default]
    Linear,
    Anisotropic,
}

/// Comparison function for comparison samplers and depth tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    #[default]
    GreaterEqual,
    Always,
}

/// Describes a sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub compare: Option<CompareFunc>,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::Linear,
            address_u: AddressMode::Wrap,
            address_v: AddressMode::Wrap,
            address_w: AddressMode::Wrap,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            compare: None,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

/// A sampler baked into a root signature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSampler {
    /// Sampler state.
    pub desc: SamplerDesc,
    /// Shader register.
    pub register: u32,
    /// Register space.
    pub space: u32,
}

/// Describes a root signature.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RootSignatureDesc {
    /// Root parameters, in root index order.
    pub parameters: Vec<RootParameter>,
    /// Static samplers.
    pub static_samplers: Vec<StaticSampler>,
    /// Flags.
    pub flags: RootSignatureFlags,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline state streams
// ─────────────────────────────────────────────────────────────────────────────

/// Compiled shader bytecode shared between shaders and pipeline streams.
pub type Bytecode = Arc<[u8]>;

/// Colour blending of one render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum BlendMode {
    #[default]
    Replace,
    Alpha,
    PremultipliedAlpha,
    Additive,
    Multiply,
}

/// Triangle culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[allow(missing_docs)]
pub struct RasterizerDesc {
    pub cull_mode: CullMode,
    pub wireframe: bool,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip: bool,
    pub conservative: bool,
}

/// Depth-stencil state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunc,
    pub stencil: bool,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_func: CompareFunc::GreaterEqual,
            stencil: false,
        }
    }
}

/// Primitive topology class of a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum TopologyType {
    Point,
    Line,
    #[default]
    Triangle,
}

/// One element of an input layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct InputElement {
    pub semantic: String,
    pub semantic_index: u32,
    pub format: Format,
    pub slot: u32,
    pub offset: u32,
}

/// One subobject of a pipeline state stream.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum PipelineSubobject {
    RootSignature(NativeRootSignature),
    Shader { stage: ShaderStage, bytecode: Bytecode },
    Blend { modes: Vec<BlendMode>, alpha_to_coverage: bool },
    Rasterizer(RasterizerDesc),
    DepthStencil(DepthStencilDesc),
    InputLayout(Vec<InputElement>),
    Topology(TopologyType),
    RenderTargetFormats(Vec<Format>),
    DepthStencilFormat(Format),
    SampleDesc { count: u32, quality: u32 },
}

/// A linear stream of pipeline subobjects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineStateStream {
    /// The subobjects, in insertion order.
    pub subobjects: Vec<PipelineSubobject>,
}

impl PipelineStateStream {
    /// Returns `true` if the stream holds a compute shader.
    pub fn is_compute(&self) -> bool {
        self.subobjects.iter().any(|s| {
            matches!(s, PipelineSubobject::Shader { stage: ShaderStage::Compute, .. })
        })
    }

    /// The bytecode bound to a stage, if any.
    pub fn shader(&self, stage: ShaderStage) -> Option<&Bytecode> {
        self.subobjects.iter().find_map(|s| match s {
            PipelineSubobject::Shader { stage: st, bytecode } if *st == stage => Some(bytecode),
            _ => None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State objects
// ─────────────────────────────────────────────────────────────────────────────

/// The kind of state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StateObjectType {
    RaytracingPipeline,
    Collection,
    WorkGraph,
}

/// An export of a DXIL library, optionally renamed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportDesc {
    /// The name the export is visible under.
    pub name: String,
    /// The name in the library, when renamed.
    pub export_to_rename: Option<String>,
}

/// Hit group primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum HitGroupType {
    Triangles,
    ProceduralPrimitive,
}

/// One subobject of a state object stream.
///
/// Associations refer to other subobjects by their position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum StateSubobject {
    Config { flags: u32 },
    GlobalRootSignature(NativeRootSignature),
    LocalRootSignature(NativeRootSignature),
    DxilLibrary { bytecode: Bytecode, exports: Vec<ExportDesc> },
    HitGroup {
        name: String,
        ty: HitGroupType,
        any_hit: Option<String>,
        closest_hit: Option<String>,
        intersection: Option<String>,
    },
    ShaderConfig { max_payload_size: u32, max_attribute_size: u32 },
    PipelineConfig { max_recursion_depth: u32, flags: u32 },
    SubobjectToExportsAssociation { subobject: usize, exports: Vec<String> },
    WorkGraph { name: String, entry_points: Vec<String> },
}

/// A linearized state object description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateObjectStream {
    /// Kind of state object.
    pub ty: StateObjectType,
    /// The subobjects.
    pub subobjects: Vec<StateSubobject>,
}

impl StateObjectStream {
    /// Every export name visible in the state object.
    pub fn export_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for sub in &self.subobjects {
            match sub {
                StateSubobject::DxilLibrary { exports, .. } => {
                    names.extend(exports.iter().map(|e| e.name.as_str()));
                }
                StateSubobject::HitGroup { name, .. } => names.push(name.as_str()),
                _ => {}
            }
        }
        names
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command signatures
// ─────────────────────────────────────────────────────────────────────────────

/// One argument of an indirect command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum IndirectArgument {
    Draw,
    DrawIndexed,
    Dispatch,
    DispatchMesh,
    DispatchRays,
    Constant { root_index: u32, dest_offset: u32, count: u32 },
    ConstantBufferView { root_index: u32 },
    ShaderResourceView { root_index: u32 },
    UnorderedAccessView { root_index: u32 },
}

impl IndirectArgument {
    /// Size of the argument in the argument buffer, in bytes.
    pub const fn size(&self) -> u32 {
        match self {
            IndirectArgument::Draw => 16,
            IndirectArgument::DrawIndexed => 20,
            IndirectArgument::Dispatch | IndirectArgument::DispatchMesh => 12,
            IndirectArgument::DispatchRays => 104,
            IndirectArgument::Constant { count, .. } => *count * 4,
            IndirectArgument::ConstantBufferView { .. }
            | IndirectArgument::ShaderResourceView { .. }
            | IndirectArgument::UnorderedAccessView { .. } => 8,
        }
    }

    /// Returns `true` if the argument changes root parameters.
    pub const fn changes_root(&self) -> bool {
        matches!(
            self,
            IndirectArgument::Constant { .. }
                | IndirectArgument::ConstantBufferView { .. }
                | IndirectArgument::ShaderResourceView { .. }
                | IndirectArgument::UnorderedAccessView { .. }
        )
    }
}

/// Describes an indirect command signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandSignatureDesc {
    /// Distance between commands in the argument buffer.
    pub byte_stride: u32,
    /// Arguments of one command; the last one is the draw or dispatch.
    pub arguments: Vec<IndirectArgument>,
}

/// Arguments of an indirect draw, as laid out in the argument buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(missing_docs)]
pub struct DrawArguments {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Arguments of an indirect indexed draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(missing_docs)]
pub struct DrawIndexedArguments {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// Arguments of an indirect dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(missing_docs)]
pub struct DispatchArguments {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_argument_sizes_match_layouts() {
        assert_eq!(IndirectArgument::Draw.size() as usize, std::mem::size_of::<DrawArguments>());
        assert_eq!(
            IndirectArgument::DrawIndexed.size() as usize,
            std::mem::size_of::<DrawIndexedArguments>()
        );
        assert_eq!(
            IndirectArgument::Dispatch.size() as usize,
            std::mem::size_of::<DispatchArguments>()
        );
        assert_eq!(IndirectArgument::Constant { root_index: 0, dest_offset: 0, count: 3 }.size(), 12);
    }

    #[test]
    fn sampler_table_detection() {
        let table = RootParameter::Table(vec![DescriptorRange {
            ty: DescriptorRangeType::Sampler,
            count: 4,
            base_register: 0,
            space: 0,
        }]);
        assert!(table.is_sampler_table());
        assert_eq!(table.table_size(), 4);
        assert!(!RootParameter::Cbv { register: 0, space: 0 }.is_sampler_table());
    }

    #[test]
    fn export_names_include_hit_groups() {
        let stream = StateObjectStream {
            ty: StateObjectType::RaytracingPipeline,
            subobjects: vec![
                StateSubobject::DxilLibrary {
                    bytecode: Bytecode::from(vec![0u8; 4]),
                    exports: vec![
                        ExportDesc { name: "RayGen".into(), export_to_rename: None },
                        ExportDesc { name: "Miss".into(), export_to_rename: Some("MissMain".into()) },
                    ],
                },
                StateSubobject::HitGroup {
                    name: "HitGroup".into(),
                    ty: HitGroupType::Triangles,
                    any_hit: None,
                    closest_hit: Some("ClosestHit".into()),
                    intersection: None,
                },
            ],
        };
        assert_eq!(stream.export_names(), vec!["RayGen", "Miss", "HitGroup"]);
    }
}
