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


//! Graph compilation: validation, culling, lifetimes, physical slot
//! assignment and barrier planning.
//!
//! Everything here works on declarations only; [`realize`] is the one step
//! that touches the device.

use crate::error::GraphError;
use crate::pass::{Pass, PassFlags};
use crate::pool::TransientPool;
use crate::resource::{GraphResource, Origin, RgResourceDesc, VirtualResource};
use keel_core::rhi::{is_legal_on_queue, QueueType, ResourceStates};
use keel_rhi::{Device, RhiError, SyncPoint};

/// Checks handles, read-before-write and write-after-write in
/// registration order.
pub(crate) fn validate(graph: u32, passes: &[Pass], resources: &[VirtualResource]) -> Result<(), GraphError> {
    let mut initialized: Vec<bool> = resources.iter().map(VirtualResource::is_initialized).collect();
    let mut unread_writer: Vec<Option<usize>> = vec![None; resources.len()];

    for (i, pass) in passes.iter().enumerate() {
        for access in &pass.accesses {
            if access.handle.graph != graph {
                return Err(GraphError::ForeignHandle {
                    pass: pass.name.clone(),
                });
            }
            let declared = resources
                .get(access.handle.index as usize)
                .is_some_and(|r| r.declared_at <= i);
            if !declared {
                return Err(GraphError::UndeclaredResource {
                    pass: pass.name.clone(),
                    index: access.handle.index,
                });
            }
        }

        // Write states are exclusive, so a pass writes a resource in one of them.
        for (j, access) in pass.accesses.iter().enumerate().filter(|(_, a)| a.write) {
            let earlier = pass.accesses[..j]
                .iter()
                .find(|a| a.write && a.handle.index == access.handle.index && a.state != access.state);
            if let Some(earlier) = earlier {
                return Err(GraphError::ConflictingWrites {
                    pass: pass.name.clone(),
                    resource: resources[access.handle.index as usize].name.clone(),
                    first: earlier.state,
                    second: access.state,
                });
            }
        }

        let usages = pass.usages();
        for usage in usages.iter().filter(|u| u.read) {
            if !initialized[usage.index] {
                return Err(GraphError::UndeclaredDependency {
                    pass: pass.name.clone(),
                    resource: resources[usage.index].name.clone(),
                });
            }
            unread_writer[usage.index] = None;
        }
        for usage in usages.iter().filter(|u| u.write) {
            if let Some(first) = unread_writer[usage.index] {
                return Err(GraphError::WriteAfterWrite {
                    resource: resources[usage.index].name.clone(),
                    first: passes[first].name.clone(),
                    second: pass.name.clone(),
                });
            }
            initialized[usage.index] = true;
            unread_writer[usage.index] = Some(i);
        }

        keel_core::rhi_check!(
            !pass.flags.contains(PassFlags::RASTER) || pass.queue == QueueType::Graphics,
            "raster pass '{}' cannot run on the {:?} queue",
            pass.name,
            pass.queue
        );
    }
    Ok(())
}

/// Marks the passes that contribute to a sink, walking backwards.
///
/// A pass survives if it never culls, or writes an imported, exported or
/// persistent resource, or writes something a surviving later pass reads.
pub(crate) fn cull(passes: &[Pass], resources: &[VirtualResource], enabled: bool) -> Vec<bool> {
    if !enabled {
        return vec![true; passes.len()];
    }
    let mut needed = vec![false; resources.len()];
    let mut live = vec![false; passes.len()];
    for (i, pass) in passes.iter().enumerate().rev() {
        let usages = pass.usages();
        let contributes = pass.flags.contains(PassFlags::NEVER_CULL)
            || usages
                .iter()
                .any(|u| u.write && (needed[u.index] || resources[u.index].is_sink()));
        if !contributes {
            continue;
        }
        live[i] = true;
        for usage in usages.iter().filter(|u| u.write && !u.read) {
            needed[usage.index] = false;
        }
        for usage in usages.iter().filter(|u| u.read) {
            needed[usage.index] = true;
        }
    }
    live
}

/// First and last surviving pass touching a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lifetime {
    pub first: usize,
    pub last: usize,
}

pub(crate) fn lifetimes(passes: &[Pass], live: &[bool], resource_count: usize) -> Vec<Option<Lifetime>> {
    let mut lifetimes: Vec<Option<Lifetime>> = vec![None; resource_count];
    for (i, pass) in passes.iter().enumerate().filter(|(i, _)| live[*i]) {
        for usage in pass.usages() {
            let lifetime = lifetimes[usage.index].get_or_insert(Lifetime { first: i, last: i });
            lifetime.last = i;
        }
    }
    lifetimes
}

/// Where the concrete resource of a slot comes from.
#[derive(Debug, Clone)]
pub(crate) enum SlotSource {
    /// Imported, or carried over in a persistent slot.
    Existing(GraphResource),
    /// Created for this graph and kept by an export slot.
    Fresh,
    /// Drawn from the transient pool and returned after the frame.
    Pooled,
}

/// One concrete resource, shared by every virtual resource aliased onto it.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub name: String,
    pub desc: RgResourceDesc,
    pub source: SlotSource,
}

/// Maps every live virtual resource to a slot. Pooled resources whose
/// lifetimes do not overlap share a slot when their descriptors are
/// compatible and they run on the same queue.
pub(crate) fn assign_slots(
    passes: &[Pass],
    resources: &[VirtualResource],
    live: &[bool],
    lifetimes: &[Option<Lifetime>],
) -> (Vec<Slot>, Vec<Option<usize>>) {
    let mut slots: Vec<Slot> = Vec::new();
    let mut mapping: Vec<Option<usize>> = vec![None; resources.len()];
    let mut free: Vec<(usize, QueueType)> = Vec::new();

    for (i, pass) in passes.iter().enumerate().filter(|(i, _)| live[*i]) {
        let usages = pass.usages();
        for usage in &usages {
            let Some(lifetime) = lifetimes[usage.index] else { continue };
            if lifetime.first != i {
                continue;
            }
            let resource = &resources[usage.index];
            let source = match &resource.origin {
                Origin::Imported(existing) | Origin::Persistent(Some(existing)) => {
                    SlotSource::Existing(existing.clone())
                }
                Origin::Persistent(None) => SlotSource::Fresh,
                Origin::Transient if resource.export.is_some() => SlotSource::Fresh,
                Origin::Transient => SlotSource::Pooled,
            };
            if matches!(source, SlotSource::Pooled) {
                let reusable = free
                    .iter()
                    .position(|&(slot, queue)| queue == pass.queue && slots[slot].desc.is_compatible(&resource.desc));
                if let Some(position) = reusable {
                    let (slot, _) = free.swap_remove(position);
                    log::trace!("'{}' aliases '{}'", resource.name, slots[slot].name);
                    mapping[usage.index] = Some(slot);
                    continue;
                }
            }
            mapping[usage.index] = Some(slots.len());
            slots.push(Slot {
                name: resource.name.clone(),
                desc: resource.desc,
                source,
            });
        }
        for usage in &usages {
            let ends_here = lifetimes[usage.index].is_some_and(|l| l.last == i);
            if ends_here && resources[usage.index].is_pooled() {
                if let Some(slot) = mapping[usage.index] {
                    free.push((slot, pass.queue));
                }
            }
        }
    }
    (slots, mapping)
}

/// Creates or acquires the concrete resource of every slot.
///
/// On failure, resources already taken from the pool go back to it.
pub(crate) fn realize(device: &Device, pool: &TransientPool, slots: &[Slot]) -> Result<Vec<GraphResource>, RhiError> {
    let mut concrete = Vec::with_capacity(slots.len());
    for slot in slots {
        let resource = match &slot.source {
            SlotSource::Existing(resource) => Ok(resource.clone()),
            SlotSource::Fresh => GraphResource::create(device, &slot.desc, &slot.name),
            SlotSource::Pooled => pool.acquire(device, &slot.desc, &slot.name),
        };
        match resource {
            Ok(resource) => concrete.push(resource),
            Err(err) => {
                let fence = device.frame_fence();
                let sync = SyncPoint::new(fence.clone(), fence.last_completed_value());
                for (slot, resource) in slots.iter().zip(concrete) {
                    if matches!(slot.source, SlotSource::Pooled) {
                        pool.release(resource, sync.clone(), device.frame_index());
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(concrete)
}

/// The barriers and waits around one surviving pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PassStep {
    pub pass: usize,
    /// Slots that must reach a state before the pass.
    pub transitions: Vec<(usize, ResourceStates)>,
    /// Slots needing a UAV barrier before the pass.
    pub uav_barriers: Vec<usize>,
    /// Passes on other queues this one waits for.
    pub waits: Vec<usize>,
    /// Transitions recorded at the end of the pass for a consumer on
    /// another queue.
    pub handoffs: Vec<(usize, ResourceStates)>,
}

#[derive(Debug, Clone, Copy)]
struct LastUse {
    step: usize,
    queue: QueueType,
    state: ResourceStates,
    write: bool,
}

/// The barrier plan of a compiled graph.
#[derive(Debug, Clone, Default)]
pub(crate) struct BarrierPlan {
    pub steps: Vec<PassStep>,
    /// Slots whose first user runs off the graphics queue and that may hold
    /// a state only the graphics queue can leave; they are returned to
    /// common on the graphics queue first.
    pub prologue: Vec<usize>,
    /// Last step and queue touching each slot.
    pub last_use: Vec<Option<(usize, QueueType)>>,
}

/// Walks surviving passes in order and records, per pass, the state every
/// slot must be in, the UAV barriers between dependent unordered accesses,
/// and the cross-queue waits and hand-offs.
pub(crate) fn plan_barriers(passes: &[Pass], live: &[bool], mapping: &[Option<usize>], slots: &[Slot]) -> BarrierPlan {
    let mut plan = BarrierPlan {
        last_use: vec![None; slots.len()],
        ..BarrierPlan::default()
    };
    let mut last: Vec<Option<LastUse>> = vec![None; slots.len()];

    for (i, pass) in passes.iter().enumerate().filter(|(i, _)| live[*i]) {
        let step_index = plan.steps.len();
        let mut step = PassStep {
            pass: i,
            ..PassStep::default()
        };
        for usage in pass.usages() {
            let Some(slot) = mapping[usage.index] else { continue };
            match last[slot] {
                Some(prev) if prev.queue != pass.queue => {
                    if !step.waits.contains(&prev.step) {
                        step.waits.push(prev.step);
                    }
                    let handoff = if is_legal_on_queue(usage.state, prev.queue) {
                        usage.state
                    } else {
                        ResourceStates::COMMON
                    };
                    plan.steps[prev.step].handoffs.push((slot, handoff));
                }
                Some(prev) => {
                    let uav = ResourceStates::UNORDERED_ACCESS;
                    if prev.state.contains(uav) && usage.state.contains(uav) && (prev.write || usage.write) {
                        step.uav_barriers.push(slot);
                    }
                }
                None => {
                    let carries_state = !matches!(slots[slot].source, SlotSource::Fresh);
                    if pass.queue != QueueType::Graphics && carries_state {
                        plan.prologue.push(slot);
                    }
                }
            }
            step.transitions.push((slot, usage.state));
            last[slot] = Some(LastUse {
                step: step_index,
                queue: pass.queue,
                state: usage.state,
                write: usage.write,
            });
            plan.last_use[slot] = Some((step_index, pass.queue));
        }
        plan.steps.push(step);
    }
    plan
}

/// Everything [`execute`](crate::RenderGraph::execute) needs from compilation.
pub(crate) struct Compiled {
    pub live: Vec<bool>,
    pub mapping: Vec<Option<usize>>,
    pub slots: Vec<Slot>,
    /// Concrete resource per slot.
    pub concrete: Vec<GraphResource>,
    /// Concrete resource per virtual resource, `None` for unused ones.
    pub resolved: Vec<Option<GraphResource>>,
    pub plan: BarrierPlan,
}

impl Compiled {
    /// Runs every compilation stage in order.
    pub fn build(
        device: &Device,
        pool: &TransientPool,
        graph: u32,
        passes: &[Pass],
        resources: &[VirtualResource],
        enable_culling: bool,
    ) -> Result<Self, GraphError> {
        validate(graph, passes, resources)?;
        let live = cull(passes, resources, enable_culling);
        let lifetimes = lifetimes(passes, &live, resources.len());
        let (slots, mapping) = assign_slots(passes, resources, &live, &lifetimes);
        let plan = plan_barriers(passes, &live, &mapping, &slots);
        let concrete = realize(device, pool, &slots)?;
        let resolved = mapping.iter().map(|slot| slot.map(|s| concrete[s].clone())).collect();
        log::debug!(
            "Render graph compiled: {} of {} passes live, {} resources on {} slots",
            live.iter().filter(|l| **l).count(),
            passes.len(),
            resources.len(),
            slots.len()
        );
        Ok(Self {
            live,
            mapping,
            slots,
            concrete,
            resolved,
            plan,
        })
    }

    /// The concrete resources that go back to the pool after the frame.
    pub fn pooled(&self) -> impl Iterator<Item = &GraphResource> {
        self.slots
            .iter()
            .zip(&self.concrete)
            .filter(|(slot, _)| matches!(slot.source, SlotSource::Pooled))
            .map(|(_, resource)| resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{PassBuilder, PassId};
    use crate::resource::{Export, ExportSlot, PersistentBuffer, RgHandle};
    use keel_core::rhi::{BufferDesc, BufferFlags};

    const GRAPH: u32 = 7;

    fn buffer_desc(size: u64) -> RgResourceDesc {
        RgResourceDesc::Buffer(BufferDesc::byte_address(size, BufferFlags::UNORDERED_ACCESS))
    }

    fn transient(name: &str, size: u64) -> VirtualResource {
        VirtualResource {
            name: name.into(),
            desc: buffer_desc(size),
            origin: Origin::Transient,
            export: None,
            declared_at: 0,
        }
    }

    fn exported(name: &str, size: u64) -> VirtualResource {
        VirtualResource {
            export: Some(Export {
                slot: ExportSlot::Buffer(PersistentBuffer::new()),
                state: None,
            }),
            ..transient(name, size)
        }
    }

    fn h(index: u32) -> RgHandle {
        RgHandle { graph: GRAPH, index }
    }

    fn pass(name: &str, flags: PassFlags, declare: impl FnOnce(PassBuilder<'_>) -> PassBuilder<'_>) -> Pass {
        let mut pass = Pass::new(name.into(), flags);
        declare(PassBuilder::new(&mut pass, PassId(0))).build();
        pass
    }

    // ─── Validation ────────────────────────────────────────────────────────

    #[test]
    fn test_read_before_write_is_an_undeclared_dependency() {
        let resources = vec![transient("A", 64)];
        let passes = vec![pass("Reader", PassFlags::COMPUTE, |b| b.read(h(0)))];
        let err = validate(GRAPH, &passes, &resources).unwrap_err();
        assert!(matches!(err, GraphError::UndeclaredDependency { ref pass, .. } if pass == "Reader"));
    }

    #[test]
    fn test_two_write_states_in_one_pass_are_rejected() {
        let resources = vec![transient("A", 64)];
        let passes = vec![pass("Mixed", PassFlags::COMPUTE, |b| {
            b.write_as(h(0), ResourceStates::COPY_DEST).write(h(0))
        })];
        let err = validate(GRAPH, &passes, &resources).unwrap_err();
        assert!(matches!(
            err,
            GraphError::ConflictingWrites { ref pass, first, second, .. }
                if pass == "Mixed"
                    && first == ResourceStates::COPY_DEST
                    && second == ResourceStates::UNORDERED_ACCESS
        ));
    }

    #[test]
    fn test_repeated_write_in_one_state_is_accepted() {
        let resources = vec![transient("A", 64)];
        let passes = vec![pass("Twice", PassFlags::COMPUTE, |b| b.write(h(0)).write(h(0)))];
        validate(GRAPH, &passes, &resources).unwrap();
    }

    #[test]
    fn test_second_writer_without_reader_is_rejected() {
        let resources = vec![transient("A", 64)];
        let passes = vec![
            pass("First", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("Second", PassFlags::COMPUTE, |b| b.write(h(0))),
        ];
        let err = validate(GRAPH, &passes, &resources).unwrap_err();
        assert!(matches!(
            err,
            GraphError::WriteAfterWrite { ref first, ref second, .. } if first == "First" && second == "Second"
        ));
    }

    #[test]
    fn test_intervening_reader_or_read_modify_write_is_accepted() {
        let resources = vec![transient("A", 64), transient("B", 64)];
        let passes = vec![
            pass("Write", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("Read", PassFlags::COMPUTE, |b| b.read(h(0)).write(h(1))),
            pass("Overwrite", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("Accumulate", PassFlags::COMPUTE, |b| b.read_write(h(0))),
        ];
        assert!(validate(GRAPH, &passes, &resources).is_ok());
    }

    #[test]
    fn test_handles_must_belong_to_the_graph_and_exist() {
        let resources = vec![transient("A", 64)];
        let foreign = vec![pass("Foreign", PassFlags::COMPUTE, |b| {
            b.write(RgHandle { graph: GRAPH + 1, index: 0 })
        })];
        assert!(matches!(
            validate(GRAPH, &foreign, &resources),
            Err(GraphError::ForeignHandle { .. })
        ));

        let missing = vec![pass("Missing", PassFlags::COMPUTE, |b| b.write(h(4)))];
        assert!(matches!(
            validate(GRAPH, &missing, &resources),
            Err(GraphError::UndeclaredResource { index: 4, .. })
        ));
    }

    #[test]
    fn test_resource_declared_after_the_pass_is_undeclared() {
        let mut late = transient("Late", 64);
        late.declared_at = 1;
        let passes = vec![pass("Early", PassFlags::COMPUTE, |b| b.write(h(0)))];
        assert!(matches!(
            validate(GRAPH, &passes, &[late]),
            Err(GraphError::UndeclaredResource { index: 0, .. })
        ));
    }

    // ─── Culling ───────────────────────────────────────────────────────────

    #[test]
    fn test_chain_without_sink_is_culled() {
        let resources = vec![transient("Bx", 64), transient("By", 64)];
        let passes = vec![
            pass("pX", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("pY", PassFlags::COMPUTE, |b| b.read(h(0)).write(h(1))),
        ];
        assert_eq!(cull(&passes, &resources, true), vec![false, false]);
        assert_eq!(cull(&passes, &resources, false), vec![true, true]);
    }

    #[test]
    fn test_producers_of_an_export_survive() {
        let resources = vec![transient("B", 64), exported("T", 64), transient("Unused", 64)];
        let passes = vec![
            pass("pA", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("Orphan", PassFlags::COMPUTE, |b| b.write(h(2))),
            pass("pB", PassFlags::COMPUTE, |b| b.read(h(0)).write(h(1))),
        ];
        assert_eq!(cull(&passes, &resources, true), vec![true, false, true]);
    }

    #[test]
    fn test_never_cull_keeps_its_inputs_alive() {
        let resources = vec![transient("Stats", 64)];
        let passes = vec![
            pass("Gather", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("Readback", PassFlags::COPY | PassFlags::NEVER_CULL, |b| b.read(h(0))),
        ];
        assert_eq!(cull(&passes, &resources, true), vec![true, true]);
    }

    // ─── Lifetimes and aliasing ────────────────────────────────────────────

    #[test]
    fn test_disjoint_lifetimes_share_a_slot() {
        let resources = vec![
            transient("A", 64),
            transient("B", 64),
            transient("C", 64),
            exported("Out", 64),
        ];
        let passes = vec![
            pass("WriteA", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("AtoB", PassFlags::COMPUTE, |b| b.read(h(0)).write(h(1))),
            pass("BtoC", PassFlags::COMPUTE, |b| b.read(h(1)).write(h(2))),
            pass("CtoOut", PassFlags::COMPUTE, |b| b.read(h(2)).write(h(3))),
        ];
        let live = cull(&passes, &resources, true);
        let lifetimes = lifetimes(&passes, &live, resources.len());
        assert_eq!(lifetimes[0], Some(Lifetime { first: 0, last: 1 }));
        assert_eq!(lifetimes[2], Some(Lifetime { first: 2, last: 3 }));

        let (slots, mapping) = assign_slots(&passes, &resources, &live, &lifetimes);
        assert_eq!(mapping[0], mapping[2]);
        assert_ne!(mapping[0], mapping[1]);
        assert_eq!(slots.len(), 3);
        assert!(matches!(slots[mapping[3].unwrap()].source, SlotSource::Fresh));
    }

    #[test]
    fn test_incompatible_descs_never_alias() {
        let resources = vec![transient("Small", 64), transient("Mid", 64), transient("Large", 128)];
        let passes = vec![
            pass("WriteSmall", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("SmallToMid", PassFlags::COMPUTE, |b| b.read(h(0)).write(h(1))),
            pass("MidToLarge", PassFlags::COMPUTE | PassFlags::NEVER_CULL, |b| b.read(h(1)).write(h(2))),
        ];
        let live = cull(&passes, &resources, true);
        let lifetimes = lifetimes(&passes, &live, resources.len());
        let (slots, mapping) = assign_slots(&passes, &resources, &live, &lifetimes);
        assert_eq!(slots.len(), 3);
        assert_ne!(mapping[0], mapping[2]);
    }

    #[test]
    fn test_aliasing_stays_on_one_queue() {
        let resources = vec![transient("A", 64), transient("B", 64), transient("C", 64)];
        let passes = vec![
            pass("WriteA", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("AtoB", PassFlags::COMPUTE, |b| b.read(h(0)).write(h(1))),
            pass("BtoC", PassFlags::COMPUTE | PassFlags::NEVER_CULL, |b| {
                b.read(h(1)).write(h(2)).queue(QueueType::Compute)
            }),
        ];
        let live = cull(&passes, &resources, true);
        let lifetimes = lifetimes(&passes, &live, resources.len());
        let (_, mapping) = assign_slots(&passes, &resources, &live, &lifetimes);
        assert_ne!(mapping[0], mapping[2]);
    }

    // ─── Barrier planning ──────────────────────────────────────────────────

    #[test]
    fn test_consecutive_unordered_writes_get_a_uav_barrier() {
        let resources = vec![exported("Accum", 64)];
        let passes = vec![
            pass("Clear", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("Add", PassFlags::COMPUTE, |b| b.read_write(h(0))),
        ];
        let live = cull(&passes, &resources, true);
        let lifetimes = lifetimes(&passes, &live, resources.len());
        let (slots, mapping) = assign_slots(&passes, &resources, &live, &lifetimes);
        let plan = plan_barriers(&passes, &live, &mapping, &slots);
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps[0].uav_barriers.is_empty());
        assert_eq!(plan.steps[1].uav_barriers, vec![0]);
        assert_eq!(plan.steps[1].transitions, vec![(0, ResourceStates::UNORDERED_ACCESS)]);
    }

    #[test]
    fn test_write_then_read_transitions_without_uav_barrier() {
        let resources = vec![transient("B", 4096), exported("T", 64)];
        let passes = vec![
            pass("pA", PassFlags::COMPUTE, |b| b.write(h(0))),
            pass("pB", PassFlags::COMPUTE, |b| b.read(h(0)).write(h(1))),
        ];
        let live = cull(&passes, &resources, true);
        let lifetimes = lifetimes(&passes, &live, resources.len());
        let (slots, mapping) = assign_slots(&passes, &resources, &live, &lifetimes);
        let plan = plan_barriers(&passes, &live, &mapping, &slots);
        let b = mapping[0].unwrap();
        let t = mapping[1].unwrap();
        assert_eq!(plan.steps[0].transitions, vec![(b, ResourceStates::UNORDERED_ACCESS)]);
        assert_eq!(
            plan.steps[1].transitions,
            vec![
                (b, ResourceStates::NON_PIXEL_SHADER_RESOURCE),
                (t, ResourceStates::UNORDERED_ACCESS)
            ]
        );
        assert!(plan.steps[1].uav_barriers.is_empty());
        assert!(plan.prologue.is_empty());
    }

    #[test]
    fn test_cross_queue_consumer_waits_and_producer_hands_off() {
        let resources = vec![transient("L", 256)];
        let passes = vec![
            pass("pC", PassFlags::COMPUTE, |b| b.write(h(0)).queue(QueueType::Compute)),
            pass("pG", PassFlags::RASTER | PassFlags::NEVER_CULL, |b| {
                b.read_as(h(0), ResourceStates::NON_PIXEL_SHADER_RESOURCE)
            }),
        ];
        let live = cull(&passes, &resources, true);
        let lifetimes = lifetimes(&passes, &live, resources.len());
        let (slots, mapping) = assign_slots(&passes, &resources, &live, &lifetimes);
        let plan = plan_barriers(&passes, &live, &mapping, &slots);
        assert_eq!(plan.steps[1].waits, vec![0]);
        assert_eq!(plan.steps[0].handoffs, vec![(0, ResourceStates::NON_PIXEL_SHADER_RESOURCE)]);
        assert_eq!(plan.prologue, vec![0]);
        assert_eq!(plan.last_use[0], Some((1, QueueType::Graphics)));
    }

    #[test]
    fn test_hand_off_falls_back_to_common_when_illegal_on_producer() {
        let resources = vec![transient("Shadow", 256)];
        let passes = vec![
            pass("Build", PassFlags::COMPUTE, |b| b.write(h(0)).queue(QueueType::Compute)),
            pass("Shade", PassFlags::RASTER | PassFlags::NEVER_CULL, |b| {
                b.read_as(h(0), ResourceStates::PIXEL_SHADER_RESOURCE)
            }),
        ];
        let live = cull(&passes, &resources, true);
        let lifetimes = lifetimes(&passes, &live, resources.len());
        let (slots, mapping) = assign_slots(&passes, &resources, &live, &lifetimes);
        let plan = plan_barriers(&passes, &live, &mapping, &slots);
        assert_eq!(plan.steps[0].handoffs, vec![(0, ResourceStates::COMMON)]);
    }
}
