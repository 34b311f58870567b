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

//! The simulated GPU timeline: queue processing and command execution.

use super::device::{DescriptorContent, ResourceEntry, State, SubmittedList, Submission};
use super::memory::{self, Surface};
use super::{ExecutedKind, ExecutedOp};
use keel_core::rhi::*;

impl State {
    /// Executes the ready submissions at the front of a queue, stopping at
    /// the first unsatisfied wait.
    pub(crate) fn process_queue(&mut self, queue: QueueType) -> usize {
        let mut processed = 0;
        loop {
            let ready = match self.queues[queue.index()].front() {
                None => false,
                Some(Submission::Wait { fence, value }) => self.fence_value(*fence) >= *value,
                Some(_) => true,
            };
            if !ready {
                break;
            }
            let Some(submission) = self.queues[queue.index()].pop_front() else {
                break;
            };

            match submission {
                Submission::Wait { fence, value } => {
                    self.log(queue, ExecutedKind::Wait { fence, value });
                }
                Submission::Signal { fence, value } => {
                    if let Some(current) = self.fences.get_mut(&fence) {
                        *current = (*current).max(value);
                    }
                    self.log(queue, ExecutedKind::Signal { fence, value });
                }
                Submission::Execute(lists) => {
                    for list in lists {
                        self.execute_list(queue, list);
                    }
                }
                Submission::Present { swap_chain, buffer } => {
                    let state = self.resources.get(&buffer).map(|r| r.states.get(0));
                    if state != Some(ResourceStates::COMMON) {
                        self.validation_error(format!(
                            "backbuffer {} presented in state {:?}, expected PRESENT",
                            self.name_of(buffer.raw()),
                            state
                        ));
                    }
                    self.log(queue, ExecutedKind::Present(swap_chain));
                }
            }
            processed += 1;
        }
        processed
    }

    /// Processes every queue until no submission can make progress.
    pub(crate) fn process_all(&mut self) -> usize {
        let mut total = 0;
        loop {
            let progress: usize = QueueType::ALL.iter().map(|q| self.process_queue(*q)).sum();
            if progress == 0 {
                break;
            }
            total += progress;
        }
        total
    }

    fn log(&mut self, queue: QueueType, kind: ExecutedKind) {
        self.executed.push(ExecutedOp { queue, kind });
    }

    fn execute_list(&mut self, queue: QueueType, list: SubmittedList) {
        self.log(queue, ExecutedKind::BeginList(list.list));

        let mut ops = Vec::new();
        let mut events: Vec<String> = Vec::new();
        for command in &list.commands {
            if let Err(message) = self.execute_command(queue, command) {
                let message = format!(
                    "{} in {} on the {}: {}",
                    command.name(),
                    self.name_of(list.list.raw()),
                    queue.name(),
                    message
                );
                self.validation_error(message);
            }
            if command.is_breadcrumb() {
                ops.push(BreadcrumbOp {
                    name: command.name().to_string(),
                    context: events.last().cloned(),
                });
            }
            match command {
                NativeCommand::BeginEvent(name) => events.push(name.clone()),
                NativeCommand::EndEvent => {
                    events.pop();
                }
                _ => {}
            }
            self.log(queue, ExecutedKind::Command(command.clone()));
        }

        if let Some(allocator) = self.allocators.get_mut(&list.allocator) {
            allocator.in_flight = allocator.in_flight.saturating_sub(1);
        }

        let node = BreadcrumbNode {
            command_list_name: self.name_of(list.list.raw()),
            command_queue_name: queue.name().to_string(),
            last_completed_op: ops.len() as u32,
            ops,
        };
        self.breadcrumbs.push_back(node);
        while self.breadcrumbs.len() > self.breadcrumb_history {
            self.breadcrumbs.pop_front();
        }
    }

    fn execute_command(&mut self, queue: QueueType, command: &NativeCommand) -> Result<(), String> {
        match command {
            NativeCommand::Barriers(barriers) => {
                for barrier in barriers {
                    self.execute_barrier(queue, barrier)?;
                }
                Ok(())
            }
            NativeCommand::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                self.require_state(*dst, 0, ResourceStates::COPY_DEST)?;
                self.require_state(*src, 0, ResourceStates::COPY_SOURCE)?;
                let (d, s, n) = (*dst_offset as usize, *src_offset as usize, *size as usize);
                self.with_pair(*dst, *src, |dst_mem, src_mem| {
                    let src_mem = src_mem.unwrap_or(&*dst_mem);
                    if s + n > src_mem.len() {
                        return Err(format!("source range {}..{} exceeds {} bytes", s, s + n, src_mem.len()));
                    }
                    let data = src_mem[s..s + n].to_vec();
                    let dst_len = dst_mem.len();
                    let target = dst_mem
                        .get_mut(d..d + n)
                        .ok_or_else(|| format!("destination range {}..{} exceeds {} bytes", d, d + n, dst_len))?;
                    target.copy_from_slice(&data);
                    Ok(())
                })
            }
            NativeCommand::CopyResource { dst, src } => {
                self.require_state(*dst, ALL_SUBRESOURCES, ResourceStates::COPY_DEST)?;
                self.require_state(*src, ALL_SUBRESOURCES, ResourceStates::COPY_SOURCE)?;
                if dst == src {
                    return Err("source and destination are the same resource".into());
                }
                self.with_pair(*dst, *src, |dst_mem, src_mem| {
                    let src_mem = src_mem.unwrap_or_default();
                    if dst_mem.len() != src_mem.len() {
                        return Err(format!("size mismatch ({} vs {} bytes)", dst_mem.len(), src_mem.len()));
                    }
                    dst_mem.copy_from_slice(src_mem);
                    Ok(())
                })
            }
            NativeCommand::CopyTextureRegion {
                dst,
                dst_x,
                dst_y,
                dst_z,
                src,
                src_region,
            } => {
                let dst_sub = match dst {
                    TextureCopyLocation::Subresource { index, .. } => *index,
                    TextureCopyLocation::Footprint { .. } => 0,
                };
                let src_sub = match src {
                    TextureCopyLocation::Subresource { index, .. } => *index,
                    TextureCopyLocation::Footprint { .. } => 0,
                };
                self.require_state(dst.resource(), dst_sub, ResourceStates::COPY_DEST)?;
                self.require_state(src.resource(), src_sub, ResourceStates::COPY_SOURCE)?;

                let dst_surface = self.surface(dst)?;
                let src_surface = self.surface(src)?;
                let origin = (*dst_x, *dst_y, *dst_z);
                let region = *src_region;
                self.with_pair(dst.resource(), src.resource(), |dst_mem, src_mem| {
                    match src_mem {
                        Some(src_mem) => memory::copy_region(dst_mem, &dst_surface, origin, src_mem, &src_surface, region),
                        None => {
                            let snapshot = dst_mem.to_vec();
                            memory::copy_region(dst_mem, &dst_surface, origin, &snapshot, &src_surface, region)
                        }
                    }
                })
            }
            NativeCommand::ResolveSubresource {
                dst,
                dst_subresource,
                src,
                src_subresource,
                ..
            } => {
                self.require_state(*dst, *dst_subresource, ResourceStates::RESOLVE_DEST)?;
                self.require_state(*src, *src_subresource, ResourceStates::RESOLVE_SOURCE)?;
                let dst_surface = self.surface(&TextureCopyLocation::Subresource {
                    resource: *dst,
                    index: *dst_subresource,
                })?;
                let src_surface = self.surface(&TextureCopyLocation::Subresource {
                    resource: *src,
                    index: *src_subresource,
                })?;
                self.with_pair(*dst, *src, |dst_mem, src_mem| {
                    let src_mem = src_mem.ok_or_else(|| "resolve into itself".to_string())?;
                    memory::copy_region(dst_mem, &dst_surface, (0, 0, 0), src_mem, &src_surface, None)
                })
            }
            NativeCommand::ClearRenderTargetView { view, color } => {
                let desc = self.view(*view, ViewKind::Rtv)?;
                let resource = desc.resource.ok_or("clear of a null render target view")?;
                let format = desc.format;
                let value = memory::encode_color(format, *color);
                for sub in self.view_subresources(resource, &desc)? {
                    self.require_state(resource, sub, ResourceStates::RENDER_TARGET)?;
                    self.fill_subresource(resource, sub, |_| value.clone())?;
                }
                Ok(())
            }
            NativeCommand::ClearDepthStencilView { view, depth, stencil } => {
                let desc = self.view(*view, ViewKind::Dsv)?;
                let resource = desc.resource.ok_or("clear of a null depth-stencil view")?;
                let format = desc.format;
                for sub in self.view_subresources(resource, &desc)? {
                    self.require_state(resource, sub, ResourceStates::DEPTH_WRITE)?;
                    let (depth, stencil) = (*depth, *stencil);
                    self.fill_subresource(resource, sub, |existing| {
                        memory::encode_depth(format, existing, depth, stencil)
                    })?;
                }
                Ok(())
            }
            NativeCommand::ClearUnorderedAccessViewFloat {
                cpu_view,
                resource,
                values,
                ..
            } => {
                let desc = self.view(*cpu_view, ViewKind::Uav)?;
                if desc.resource != Some(*resource) {
                    return Err("view does not belong to the cleared resource".into());
                }
                match desc.dimension {
                    ViewDimension::Buffer { .. } => {
                        self.require_state(*resource, 0, ResourceStates::UNORDERED_ACCESS)?;
                        let value = if desc.format == Format::Unknown {
                            values[0].to_le_bytes().to_vec()
                        } else {
                            memory::encode_color(desc.format, *values)
                        };
                        let entry = self.resource_mut(*resource)?;
                        for chunk in entry.memory.chunks_mut(value.len().max(1)) {
                            let n = chunk.len();
                            chunk.copy_from_slice(&value[..n]);
                        }
                        Ok(())
                    }
                    _ => {
                        let value = memory::encode_color(desc.format, *values);
                        for sub in self.view_subresources(*resource, &desc)? {
                            self.require_state(*resource, sub, ResourceStates::UNORDERED_ACCESS)?;
                            self.fill_subresource(*resource, sub, |_| value.clone())?;
                        }
                        Ok(())
                    }
                }
            }
            NativeCommand::ExecuteIndirect {
                signature,
                arguments,
                count,
                ..
            } => {
                if !self.command_signatures.contains_key(signature) {
                    return Err("unknown command signature".into());
                }
                self.require_state(*arguments, 0, ResourceStates::INDIRECT_ARGUMENT)?;
                if let Some((count_buffer, _)) = count {
                    self.require_state(*count_buffer, 0, ResourceStates::INDIRECT_ARGUMENT)?;
                }
                Ok(())
            }
            NativeCommand::SetPipelineState(pipeline) => {
                if self.pipelines.contains_key(pipeline) {
                    Ok(())
                } else {
                    Err("use of a released pipeline state".into())
                }
            }
            NativeCommand::SetStateObject(state_object) => {
                if self.state_objects.contains_key(state_object) {
                    Ok(())
                } else {
                    Err("use of a released state object".into())
                }
            }
            NativeCommand::SetRootSignature { root_signature, .. } => {
                if self.root_signatures.contains_key(root_signature) {
                    Ok(())
                } else {
                    Err("use of a released root signature".into())
                }
            }
            NativeCommand::SetDescriptorHeaps { resources, samplers } => {
                let visible = |heap| self.heaps.get(heap).is_some_and(|h| h.gpu_base.is_some());
                if visible(resources) && visible(samplers) {
                    Ok(())
                } else {
                    Err("descriptor heaps must be live and shader visible".into())
                }
            }
            NativeCommand::SetRenderTargets {
                render_targets,
                depth_stencil,
            } => {
                for rtv in render_targets {
                    self.view(*rtv, ViewKind::Rtv)?;
                }
                if let Some(dsv) = depth_stencil {
                    self.view(*dsv, ViewKind::Dsv)?;
                }
                Ok(())
            }
            NativeCommand::Dispatch { x, y, z } | NativeCommand::DispatchMesh { x, y, z } => {
                if [*x, *y, *z].iter().any(|d| *d > MAX_DISPATCH_GROUPS) {
                    return Err(format!("dispatch of {x}x{y}x{z} groups exceeds the limit"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn execute_barrier(&mut self, queue: QueueType, barrier: &Barrier) -> Result<(), String> {
        match *barrier {
            Barrier::Transition {
                resource,
                subresource,
                before,
                after,
            } => {
                if !is_legal_on_queue(before, queue) || !is_legal_on_queue(after, queue) {
                    return Err(format!(
                        "transition {before:?} -> {after:?} of {} is illegal on this queue",
                        self.name_of(resource.raw())
                    ));
                }
                let name = self.name_of(resource.raw());
                let entry = self.resource_mut(resource)?;
                let subresources: Vec<u32> = if subresource == ALL_SUBRESOURCES {
                    (0..entry.states.subresource_count()).collect()
                } else {
                    vec![subresource]
                };
                let mut mismatch = None;
                for sub in &subresources {
                    let current = entry.states.get(*sub);
                    if current != before && mismatch.is_none() {
                        mismatch = Some((*sub, current));
                    }
                }
                entry.states.set(after, subresource);
                match mismatch {
                    Some((sub, current)) => Err(format!(
                        "'{name}' subresource {sub}: barrier before-state {before:?} does not match current state {current:?}"
                    )),
                    None => Ok(()),
                }
            }
            Barrier::Uav { resource } | Barrier::Aliasing { after: resource, .. } => match resource {
                Some(r) if !self.resources.contains_key(&r) => Err("barrier on a released resource".into()),
                _ => Ok(()),
            },
        }
    }

    fn resource_mut(&mut self, resource: NativeResource) -> Result<&mut ResourceEntry, String> {
        self.resources
            .get_mut(&resource)
            .ok_or_else(|| format!("use of released resource {:#x}", resource.raw()))
    }

    /// Checks that a subresource is in `required` (or in COMMON, which
    /// promotes implicitly).
    fn require_state(&self, resource: NativeResource, subresource: u32, required: ResourceStates) -> Result<(), String> {
        let entry = self
            .resources
            .get(&resource)
            .ok_or_else(|| format!("use of released resource {:#x}", resource.raw()))?;
        let subresources: Vec<u32> = if subresource == ALL_SUBRESOURCES {
            (0..entry.states.subresource_count()).collect()
        } else {
            vec![subresource]
        };
        for sub in subresources {
            let state = entry.states.get(sub);
            if state != ResourceStates::COMMON && !state.contains(required) {
                return Err(format!(
                    "'{}' subresource {} is in {:?}, expected {:?}",
                    self.name_of(resource.raw()),
                    sub,
                    state,
                    required
                ));
            }
        }
        Ok(())
    }

    fn surface(&self, location: &TextureCopyLocation) -> Result<Surface, String> {
        let entry = self
            .resources
            .get(&location.resource())
            .ok_or("copy from or to a released resource")?;
        memory::copy_surface(location, &entry.desc, &entry.layouts)
    }

    fn view(&self, handle: CpuDescriptor, kind: ViewKind) -> Result<ViewDesc, String> {
        match self.descriptors.get(&handle.0) {
            Some(DescriptorContent::View(desc)) if desc.kind == kind => Ok(*desc),
            Some(_) => Err(format!("descriptor {:#x} is not a {kind:?} view", handle.0)),
            None => Err(format!("descriptor {:#x} is empty", handle.0)),
        }
    }

    fn view_subresources(&self, resource: NativeResource, view: &ViewDesc) -> Result<Vec<u32>, String> {
        let entry = self
            .resources
            .get(&resource)
            .ok_or("view of a released resource")?;
        let ResourceDesc::Texture(texture) = entry.desc else {
            return Ok(vec![0]);
        };
        let slices = view.range.slice_count.min(texture.array_size());
        Ok((view.range.first_slice..view.range.first_slice + slices.max(1))
            .map(|slice| texture.subresource_index(view.range.first_mip, slice))
            .collect())
    }

    fn fill_subresource(
        &mut self,
        resource: NativeResource,
        subresource: u32,
        encode: impl Fn(&[u8]) -> Vec<u8>,
    ) -> Result<(), String> {
        let entry = self.resource_mut(resource)?;
        let ResourceDesc::Texture(texture) = entry.desc else {
            return Err("clears through texture views need a texture".into());
        };
        let layout = *entry
            .layouts
            .get(subresource as usize)
            .ok_or("subresource out of range")?;
        let block = texture.format.block_size() as usize;
        let start = layout.offset as usize;
        let existing = entry.memory.get(start..start + block).unwrap_or(&[]).to_vec();
        let value = encode(&existing);
        memory::fill_surface(&mut entry.memory, &Surface::from_layout(&layout, texture.format), &value);
        Ok(())
    }

    /// Runs `f` with the destination memory and, if distinct, the source.
    fn with_pair<R>(
        &mut self,
        dst: NativeResource,
        src: NativeResource,
        f: impl FnOnce(&mut [u8], Option<&[u8]>) -> Result<R, String>,
    ) -> Result<R, String> {
        if dst == src {
            let entry = self.resource_mut(dst)?;
            return f(&mut entry.memory, None);
        }
        let mut dst_entry = self
            .resources
            .remove(&dst)
            .ok_or_else(|| format!("use of released resource {:#x}", dst.raw()))?;
        let result = match self.resources.get(&src) {
            Some(src_entry) => f(&mut dst_entry.memory, Some(&src_entry.memory)),
            None => Err(format!("use of released resource {:#x}", src.raw())),
        };
        self.resources.insert(dst, dst_entry);
        result
    }
}
