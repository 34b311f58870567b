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

//! Pipeline binding, root arguments, draws and dispatches.

use super::{storage_of, BoundPipeline, CommandContext};
use crate::error::RhiError;
use crate::pipeline::{CommandSignature, PipelineState, RootSignature, StateObject};
use crate::resource::{Buffer, View};
use keel_core::rhi::{
    BindPoint, CpuDescriptor, DispatchRaysDesc, IndexBufferView, IndirectArgument, NativeCommand,
    PrimitiveTopology, QueueType, ResourceStates, RootParameter, ScissorRect, VertexBufferView, Viewport,
    CONSTANT_BUFFER_ALIGNMENT, MAX_DISPATCH_GROUPS,
};
use keel_core::rhi_check;
use std::sync::Arc;

/// What a draw or dispatch needs bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Graphics,
    Compute,
    Rays,
}

impl CommandContext {
    // --- Pipelines ---

    /// Binds a pipeline, recreating it first if one of its shaders was
    /// recompiled, and binds its root signature.
    pub fn set_pipeline_state(&mut self, pipeline: &Arc<PipelineState>) -> Result<(), RhiError> {
        rhi_check!(
            self.queue_type() != QueueType::Copy,
            "pipeline '{}' bound on the copy queue",
            pipeline.name()
        );
        rhi_check!(
            pipeline.is_compute() || self.queue_type() == QueueType::Graphics,
            "graphics pipeline '{}' bound on the {}",
            pipeline.name(),
            self.queue_type().name()
        );
        pipeline.reload_if_needed()?;

        let bind_point = if pipeline.is_compute() {
            BindPoint::Compute
        } else {
            BindPoint::Graphics
        };
        self.record(NativeCommand::SetPipelineState(pipeline.native()));
        self.set_root_signature(bind_point, pipeline.root_signature());
        let storage = self.storage();
        storage.pipeline = BoundPipeline::Pipeline(pipeline.clone());
        storage.keep_alive.push(pipeline.clone());
        Ok(())
    }

    /// Binds a raytracing or work graph state object and its global root
    /// signature.
    pub fn set_state_object(&mut self, state_object: &Arc<StateObject>) {
        rhi_check!(
            self.queue_type() != QueueType::Copy,
            "state object '{}' bound on the copy queue",
            state_object.name()
        );
        self.record(NativeCommand::SetStateObject(state_object.native()));
        if let Some(root) = state_object.global_root_signature() {
            self.set_root_signature(BindPoint::Compute, root);
        }
        let storage = self.storage();
        storage.pipeline = BoundPipeline::StateObject(state_object.clone());
        storage.keep_alive.push(state_object.clone());
    }

    /// Binds a root signature. Rebinding the bound one is a no-op; a new one
    /// resets the descriptor table staging.
    pub fn set_root_signature(&mut self, bind_point: BindPoint, root_signature: &Arc<RootSignature>) {
        let storage = self.storage();
        if let Some((point, bound)) = &storage.root_signature {
            if *point == bind_point && Arc::ptr_eq(bound, root_signature) {
                return;
            }
        }
        storage.staging.parse_root_signature(root_signature.desc());
        storage.root_signature = Some((bind_point, root_signature.clone()));
        storage.keep_alive.push(root_signature.clone());
        self.record(NativeCommand::SetRootSignature {
            bind_point,
            root_signature: root_signature.native(),
        });
    }

    fn bound_root(&mut self) -> (BindPoint, Arc<RootSignature>) {
        match &self.storage().root_signature {
            Some((point, root)) => (*point, root.clone()),
            None => keel_core::rhi_fatal!("root arguments set without a bound root signature"),
        }
    }

    // --- Root arguments ---

    /// Sets 32-bit root constants.
    pub fn set_root_constants(&mut self, root_index: u32, values: &[u32], dest_offset: u32) {
        let (bind_point, root) = self.bound_root();
        match root.parameter(root_index) {
            Some(RootParameter::Constants { count, .. }) => rhi_check!(
                dest_offset + values.len() as u32 <= *count,
                "{} root constants at offset {} overflow parameter {} of '{}' ({} constants)",
                values.len(),
                dest_offset,
                root_index,
                root.name(),
                count
            ),
            _ => rhi_check!(
                false,
                "parameter {} of '{}' is not a root constant",
                root_index,
                root.name()
            ),
        }
        self.record(NativeCommand::SetRoot32BitConstants {
            bind_point,
            root_index,
            values: values.to_vec(),
            dest_offset,
        });
    }

    /// Sets root constants from a plain value.
    pub fn set_root_constants_pod<T: bytemuck::Pod>(&mut self, root_index: u32, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        rhi_check!(
            bytes.len() % 4 == 0,
            "root constants must be a whole number of 32-bit values"
        );
        let values: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.set_root_constants(root_index, &values, 0);
    }

    /// Uploads `data` into scratch memory and binds it as a root constant
    /// buffer.
    pub fn set_root_cbv_bytes(&mut self, root_index: u32, data: &[u8]) -> Result<(), RhiError> {
        let (bind_point, root) = self.bound_root();
        rhi_check!(
            matches!(root.parameter(root_index), Some(RootParameter::Cbv { .. })),
            "parameter {} of '{}' is not a root constant buffer",
            root_index,
            root.name()
        );
        let upload = self.upload_scratch(data, CONSTANT_BUFFER_ALIGNMENT)?;
        self.record(NativeCommand::SetRootConstantBufferView {
            bind_point,
            root_index,
            address: upload.gpu_address,
        });
        Ok(())
    }

    /// Uploads `value` and binds it as a root constant buffer.
    pub fn set_root_cbv<T: bytemuck::Pod>(&mut self, root_index: u32, value: &T) -> Result<(), RhiError> {
        self.set_root_cbv_bytes(root_index, bytemuck::bytes_of(value))
    }

    /// Binds a buffer as a root shader resource.
    pub fn set_root_srv(&mut self, root_index: u32, buffer: &Buffer) {
        let (bind_point, _) = self.bound_root();
        self.record(NativeCommand::SetRootShaderResourceView {
            bind_point,
            root_index,
            address: buffer.gpu_address(),
        });
    }

    /// Binds a buffer as a root unordered-access resource.
    pub fn set_root_uav(&mut self, root_index: u32, buffer: &Buffer) {
        let (bind_point, _) = self.bound_root();
        self.record(NativeCommand::SetRootUnorderedAccessView {
            bind_point,
            root_index,
            address: buffer.gpu_address(),
        });
    }

    /// Stages descriptors into table `root_index` from `offset`. The table
    /// is copied into the dynamic heap and bound at the next draw or
    /// dispatch.
    pub fn set_descriptors(&mut self, root_index: u32, offset: u32, handles: &[CpuDescriptor]) {
        self.storage().staging.set_descriptors(root_index, offset, handles);
    }

    /// Stages views into table `root_index` from `offset`.
    pub fn set_views(&mut self, root_index: u32, offset: u32, views: &[&View]) {
        let handles: Vec<CpuDescriptor> = views.iter().map(|v| v.cpu_handle()).collect();
        self.set_descriptors(root_index, offset, &handles);
    }

    // --- Fixed function ---

    /// Sets one viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record(NativeCommand::SetViewports(vec![viewport]));
    }

    /// Sets one scissor rectangle.
    pub fn set_scissor(&mut self, rect: ScissorRect) {
        self.record(NativeCommand::SetScissorRects(vec![rect]));
    }

    /// Sets the primitive topology.
    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.record(NativeCommand::SetPrimitiveTopology(topology));
    }

    /// Binds vertex buffers from `start_slot`.
    pub fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.record(NativeCommand::SetVertexBuffers {
            start_slot,
            views: views.to_vec(),
        });
    }

    /// Binds the index buffer.
    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.record(NativeCommand::SetIndexBuffer(view));
    }

    // --- Work ---

    /// Checks the bound pipeline, flushes barriers and binds stale
    /// descriptor tables.
    fn prepare(&mut self, requirement: Requirement, what: &str) -> Result<(), RhiError> {
        let bind_point = {
            let storage = self.storage();
            let ok = match (&storage.pipeline, requirement) {
                (BoundPipeline::Pipeline(p), Requirement::Graphics) => !p.is_compute(),
                (BoundPipeline::Pipeline(p), Requirement::Compute) => p.is_compute(),
                (BoundPipeline::StateObject(_), Requirement::Rays) => true,
                _ => false,
            };
            rhi_check!(ok, "{} without a matching pipeline bound", what);
            match requirement {
                Requirement::Graphics => BindPoint::Graphics,
                Requirement::Compute | Requirement::Rays => BindPoint::Compute,
            }
        };
        self.flush_resource_barriers();

        let native = self.device.native().clone();
        let increment = self.device.resource_heap().increment();
        let storage = storage_of(&mut self.storage);
        if let Some(descriptors) = storage.descriptors.as_mut() {
            storage
                .staging
                .flush(native.as_ref(), storage.list, bind_point, descriptors, increment)?;
        }
        Ok(())
    }

    /// Draws non-indexed primitives.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.prepare(Requirement::Graphics, "draw")?;
        self.record(NativeCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Draws indexed primitives.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.prepare(Requirement::Graphics, "draw_indexed")?;
        self.record(NativeCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Dispatches `x` x `y` x `z` thread groups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), RhiError> {
        check_groups(x, y, z);
        self.prepare(Requirement::Compute, "dispatch")?;
        self.record(NativeCommand::Dispatch { x, y, z });
        Ok(())
    }

    /// Dispatches enough groups to cover `x` x `y` x `z` threads, using the
    /// bound compute shader's group size.
    pub fn dispatch_threads(&mut self, x: u32, y: u32, z: u32) -> Result<(), RhiError> {
        let group = match &self.storage().pipeline {
            BoundPipeline::Pipeline(p) => p.thread_group_size(),
            _ => None,
        }
        .unwrap_or([1, 1, 1]);
        self.dispatch(
            x.div_ceil(group[0].max(1)),
            y.div_ceil(group[1].max(1)),
            z.div_ceil(group[2].max(1)),
        )
    }

    /// Dispatches mesh shader groups.
    pub fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) -> Result<(), RhiError> {
        check_groups(x, y, z);
        self.prepare(Requirement::Graphics, "dispatch_mesh")?;
        self.record(NativeCommand::DispatchMesh { x, y, z });
        Ok(())
    }

    /// Dispatches rays with the bound state object.
    pub fn dispatch_rays(&mut self, desc: DispatchRaysDesc) -> Result<(), RhiError> {
        self.prepare(Requirement::Rays, "dispatch_rays")?;
        self.record(NativeCommand::DispatchRays(desc));
        Ok(())
    }

    /// Executes up to `max_count` commands from `arguments`. With `count`,
    /// the number of commands is read from that buffer.
    pub fn execute_indirect(
        &mut self,
        signature: &Arc<CommandSignature>,
        max_count: u32,
        arguments: &Buffer,
        arguments_offset: u64,
        count: Option<(&Buffer, u64)>,
    ) -> Result<(), RhiError> {
        let requirement = match signature.operation() {
            Some(IndirectArgument::Dispatch) => Requirement::Compute,
            Some(IndirectArgument::DispatchRays) => Requirement::Rays,
            _ => Requirement::Graphics,
        };
        if let Some(root) = signature.root_signature() {
            let bound = self.storage().root_signature.as_ref().map(|(_, r)| r.clone());
            rhi_check!(
                bound.as_ref().is_some_and(|b| Arc::ptr_eq(b, root)),
                "command signature '{}' expects root signature '{}'",
                signature.name(),
                root.name()
            );
        }
        self.transition(arguments.resource(), ResourceStates::INDIRECT_ARGUMENT);
        if let Some((buffer, _)) = count {
            self.transition(buffer.resource(), ResourceStates::INDIRECT_ARGUMENT);
        }
        self.prepare(requirement, "execute_indirect")?;
        self.record(NativeCommand::ExecuteIndirect {
            signature: signature.native(),
            max_count,
            arguments: arguments.resource().handle(),
            arguments_offset,
            count: count.map(|(buffer, offset)| (buffer.resource().handle(), offset)),
        });
        self.storage().keep_alive.push(signature.clone());
        Ok(())
    }
}

fn check_groups(x: u32, y: u32, z: u32) {
    rhi_check!(
        x <= MAX_DISPATCH_GROUPS && y <= MAX_DISPATCH_GROUPS && z <= MAX_DISPATCH_GROUPS,
        "dispatch of {}x{}x{} groups exceeds the limit of {} per dimension",
        x,
        y,
        z,
        MAX_DISPATCH_GROUPS
    );
}
