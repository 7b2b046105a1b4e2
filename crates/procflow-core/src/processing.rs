//! The processing state machine shared by every processing kind.
//!
//! ```text
//! deliver ─► queued ─► drain ─► schedule gate ─► workers ─► processing ─► done ─► routing ─► free_slot
//!                        ▲            │ inactive      │ waiting     │ breakdown
//!                        │            ▼               ▼             ▼
//!                        └──── ScheduleRecheck ◄── woken on release  repair, then remainder
//! ```
//!
//! A drain starts queued entities while capacity, the work schedule and the
//! worker pool allow. Each started entity owns one slot until it has left the
//! component; a slot whose entity cannot leave yet is blocked and keeps its
//! unit of capacity.

use tracing::{debug, error, trace};

use crate::component::{ComponentKind, ComponentType, SlotState};
use crate::fixed::{time_to_f64, to_time};
use crate::hooks::HookPoint;
use crate::id::{ComponentId, EntityId, SlotId, WorkerId, WorkerPoolId};
use crate::kernel::{Action, Holder};
use crate::model::Model;
use crate::queue::QueueEntry;
use crate::schedule::ScheduleState;
use crate::worker::Acquire;

/// Outcome of one start attempt within a drain.
enum Start {
    Started,
    Vetoed,
    NoSlot,
}

impl Model {
    /// An entity arrives at `target`: run the arrival hooks and queue it.
    pub(crate) fn deliver(&mut self, entity: EntityId, target: ComponentId) {
        let now = self.scheduler.now();
        let record = self.recording();
        let Some(e) = self.entities.get_mut(entity) else {
            return;
        };
        let reserved = std::mem::take(&mut e.capacity_reserved);
        let is_parent = e.is_parent;
        e.current_location = Some(target);
        e.destination = None;

        if !self.run_hook(target, HookPoint::BeforeArrival, Some(entity), None) {
            debug!(component = %self.components[target].name, "arrival vetoed");
            if reserved && let Some(core) = self.components[target].core_mut() {
                core.cancel_reservation();
                self.capacity_freed(target);
            }
            return;
        }

        let Some(component) = self.components.get_mut(target) else {
            return;
        };
        match &mut component.kind {
            ComponentKind::Combiner(c) if !is_parent => {
                if reserved {
                    c.core.cancel_reservation();
                }
                c.add_member(entity, now, record);
                if record {
                    c.core.stats.number_entered += 1;
                }
            }
            ComponentKind::Combiner(c) => {
                c.core.enqueue(entity, now, reserved, record);
                if record {
                    c.stats.number_parents_entered += 1;
                    c.core.stats.number_entered += 1;
                }
            }
            kind => {
                let Some(core) = kind.core_mut() else {
                    error!(component = %component.name, "entity delivered to a component that takes none");
                    return;
                };
                core.enqueue(entity, now, reserved, record);
                if record {
                    core.stats.number_entered += 1;
                }
            }
        }
        trace!(component = %self.components[target].name, "entity arrived");

        self.run_hook(target, HookPoint::AfterArrival, Some(entity), None);
        self.schedule_drain(target);
    }

    /// Drain once at the current instant; repeated requests collapse.
    pub(crate) fn schedule_drain(&mut self, id: ComponentId) {
        if self.drain_pending.insert(id) {
            self.scheduler.schedule_now(Action::Drain(id));
        }
    }

    /// Capacity came free: queued entities and storage queues get a chance.
    fn capacity_freed(&mut self, id: ComponentId) {
        self.schedule_drain(id);
        let pulls = self
            .components
            .get(id)
            .and_then(|c| c.core())
            .is_some_and(|core| !core.storage_queues.is_empty());
        if pulls {
            self.scheduler.schedule_now(Action::StoragePull(id));
        }
    }

    /// Whether the component's work schedule is active now. If it is not, a
    /// single recheck is scheduled for the start of the next shift.
    pub(crate) fn schedule_allows(&mut self, id: ComponentId) -> bool {
        let now = self.scheduler.now();
        let Some(core) = self.components.get_mut(id).and_then(|c| c.core_mut()) else {
            return false;
        };
        let Some(schedule) = core.schedule.and_then(|s| self.schedules.get(s)) else {
            return true;
        };
        match schedule.query(now) {
            ScheduleState::Active { .. } => true,
            ScheduleState::Inactive { wait } => {
                if !core.recheck_pending {
                    core.recheck_pending = true;
                    self.scheduler
                        .schedule_in(wait, Action::ScheduleRecheck(id));
                    debug!(component = %self.components[id].name, wait = %wait, "outside work schedule");
                }
                false
            }
        }
    }

    pub(crate) fn schedule_recheck(&mut self, id: ComponentId) {
        if let Some(core) = self.components.get_mut(id).and_then(|c| c.core_mut()) {
            core.recheck_pending = false;
        }
        self.drain(id);
        self.storage_pull(id);
    }

    /// Start queued entities until capacity, schedule, workers or (for a
    /// combiner) queued members run out.
    ///
    /// An entity vetoed by `before_processing` is set aside for the rest of
    /// the pass so the entities behind it can start, then goes back to the
    /// head of the queue.
    pub(crate) fn drain(&mut self, id: ComponentId) {
        self.drain_pending.remove(&id);
        let mut vetoed = Vec::new();
        self.drain_pass(id, &mut vetoed);
        if let Some(core) = self.components.get_mut(id).and_then(|c| c.core_mut()) {
            for entry in vetoed.into_iter().rev() {
                core.queue.requeue(entry);
            }
        }
    }

    fn drain_pass(&mut self, id: ComponentId, vetoed: &mut Vec<QueueEntry>) {
        let now = self.scheduler.now();
        loop {
            let Some(component) = self.components.get(id) else {
                return;
            };
            let Some(core) = component.core() else {
                return;
            };
            if !core.can_start() {
                if let Some(pool) = core.worker_pool.and_then(|p| self.pools.get_mut(p)) {
                    pool.cancel_wait(id);
                }
                return;
            }
            if let ComponentKind::Combiner(c) = &component.kind
                && !c.combination_ready(|m| self.entities.get(m).map(|e| e.entity_type))
            {
                return;
            }
            let (pool, required) = (core.worker_pool, core.workers_required);
            if !self.schedule_allows(id) {
                return;
            }

            let workers = match pool.and_then(|p| self.pools.get_mut(p)) {
                Some(pool) if required > 0 => match pool.try_acquire(required, id, now) {
                    Ok(Acquire::Granted(tokens)) => tokens,
                    Ok(Acquire::Waiting) => {
                        trace!(component = %self.components[id].name, pool = %pool.name, "waiting for workers");
                        return;
                    }
                    Err(e) => {
                        error!(component = %self.components[id].name, error = %e, "worker acquisition failed");
                        return;
                    }
                },
                _ => Vec::new(),
            };

            let Some(entry) = self.components[id].core_mut().and_then(|c| c.pop_startable()) else {
                self.release_workers(id, &workers);
                return;
            };
            match self.start_processing(id, entry, workers) {
                Start::Started => {}
                Start::Vetoed => vetoed.push(entry),
                Start::NoSlot => return,
            }
        }
    }

    /// Take a slot for `entry` and start its processing time. On a
    /// `before_processing` veto the slot and workers are released and the
    /// entry is left to the caller.
    fn start_processing(&mut self, id: ComponentId, entry: QueueEntry, workers: Vec<WorkerId>) -> Start {
        let now = self.scheduler.now();
        let record = self.recording();
        let Some(entity_type) = self.entities.get(entry.entity).map(|e| e.entity_type) else {
            // Stale queue entry: the entity no longer exists.
            if let Some(core) = self.components[id].core_mut() {
                core.note_dequeued(&entry, now, record);
            }
            self.release_workers(id, &workers);
            return Start::Started;
        };

        let global = self.processing_overrides.get(&(id, entity_type));
        let Some(core) = self.components[id].core_mut() else {
            return Start::NoSlot;
        };
        let processing_time = core.distribution_for(entity_type, global).sample(&mut self.rng);
        let units = core.used_capacity() + usize::from(!(entry.reserved && core.reserved() > 0));
        let state = SlotState {
            entity: entry.entity,
            workers: workers.clone(),
            started: now,
            processing_time,
            remaining: 0.0,
            units,
            blocked: false,
            repair: None,
        };
        let Some(slot) = core.begin(&entry, state) else {
            core.queue.requeue(entry);
            self.release_workers(id, &workers);
            return Start::NoSlot;
        };

        if !self.run_hook(id, HookPoint::BeforeProcessing, Some(entry.entity), Some(processing_time)) {
            if let Some(core) = self.components[id].core_mut() {
                core.abort(slot, &entry);
            }
            self.release_workers(id, &workers);
            debug!(component = %self.components[id].name, "processing vetoed, entity requeued");
            return Start::Vetoed;
        }

        let component = &mut self.components[id];
        let component_type = component.component_type();
        if let Some(core) = component.core_mut() {
            core.note_dequeued(&entry, now, record);
        }
        match component_type {
            ComponentType::Combiner => self.combine(id, entry.entity),
            ComponentType::Separator => self.separate(id, entry.entity),
            _ => {}
        }
        trace!(
            component = %self.components[id].name,
            processing_time,
            units,
            "processing started"
        );
        self.begin_timing(id, slot, processing_time);
        Start::Started
    }

    /// Schedule the end of processing, or the breakdown that interrupts it.
    fn begin_timing(&mut self, id: ComponentId, slot: SlotId, processing_time: f64) {
        let Some(core) = self.components[id].core_mut() else {
            return;
        };
        if let Some(breakdown) = &core.breakdown {
            let until = match core.time_until_breakdown {
                Some(t) => t,
                None => breakdown.time_between.sample(&mut self.rng),
            };
            if processing_time > until {
                core.time_until_breakdown = None;
                if let Some(state) = core.slot_mut(slot) {
                    state.remaining = processing_time - until;
                }
                self.scheduler.schedule_in(
                    to_time(until),
                    Action::BreakdownBegin { component: id, slot },
                );
                return;
            }
            core.time_until_breakdown = Some(until - processing_time);
        }
        self.scheduler.schedule_in(
            to_time(processing_time),
            Action::ProcessingDone { component: id, slot },
        );
    }

    pub(crate) fn breakdown_begin(&mut self, id: ComponentId, slot: SlotId) {
        let Some(core) = self.components.get_mut(id).and_then(|c| c.core_mut()) else {
            return;
        };
        let repair = core
            .breakdown
            .as_ref()
            .map_or(0.0, |b| b.duration.sample(&mut self.rng));
        if let Some(state) = core.slot_mut(slot) {
            state.repair = Some(repair);
        }
        debug!(component = %self.components[id].name, repair, "breakdown");
        self.scheduler.schedule_in(
            to_time(repair),
            Action::BreakdownEnd { component: id, slot },
        );
    }

    pub(crate) fn breakdown_end(&mut self, id: ComponentId, slot: SlotId) {
        let record = self.recording();
        let Some(core) = self.components.get_mut(id).and_then(|c| c.core_mut()) else {
            return;
        };
        let Some(state) = core.slot_mut(slot) else {
            return;
        };
        let repair = state.repair.take().unwrap_or(0.0);
        let remaining = std::mem::take(&mut state.remaining);
        if record {
            core.stats.total_downtime += repair;
            core.stats.number_downtimes += 1;
        }
        core.time_until_breakdown = core
            .breakdown
            .as_ref()
            .map(|b| b.time_between.sample(&mut self.rng));
        debug!(component = %self.components[id].name, "repaired, resuming");
        self.scheduler.schedule_in(
            to_time(remaining),
            Action::ProcessingDone { component: id, slot },
        );
    }

    pub(crate) fn processing_done(&mut self, id: ComponentId, slot: SlotId) {
        let now = self.scheduler.now();
        let record = self.recording();
        let Some(component) = self.components.get_mut(id) else {
            return;
        };
        let component_type = component.component_type();
        let Some(core) = component.core_mut() else {
            return;
        };
        let Some(state) = core.slot(slot) else {
            return;
        };
        let (entity, started, processing_time, units) =
            (state.entity, state.started, state.processing_time, state.units);
        // A storage's hold is counted when the entity is pulled.
        if record && component_type != ComponentType::Storage {
            core.stats.total_entities_processed += 1;
            core.stats.total_processing_time += processing_time;
            core.stats
                .units_utilized_over_time
                .push((time_to_f64(started), time_to_f64(now), units));
        }

        match component_type {
            ComponentType::Sink => return self.terminate(id, slot, entity),
            ComponentType::Storage => return self.deposit(id, slot, entity),
            _ => {}
        }

        if !self.run_hook(id, HookPoint::AfterProcessing, Some(entity), Some(processing_time)) {
            debug!(component = %self.components[id].name, "routing vetoed after processing");
            self.free_slot(id, slot);
            return;
        }

        match component_type {
            ComponentType::Combiner => self.note_combined_exit(id),
            ComponentType::Separator => self.note_parent_exit(id),
            _ => {}
        }
        if let Some(state) = self.components[id].core_mut().and_then(|c| c.slot_mut(slot)) {
            state.blocked = true;
        }
        let holder = Holder::slot(id, slot);
        if self.route_from(holder, entity) {
            self.release_holder(holder);
        }
    }

    /// The entity in `holder` has moved on.
    pub(crate) fn release_holder(&mut self, holder: Holder) {
        match holder.slot {
            Some(slot) => self.free_slot(holder.component, slot),
            None => {
                if matches!(
                    self.components.get(holder.component).map(|c| &c.kind),
                    Some(ComponentKind::Source(_))
                ) {
                    self.unblock_source(holder.component);
                }
            }
        }
    }

    /// Return a slot, its capacity and its workers.
    pub(crate) fn free_slot(&mut self, id: ComponentId, slot: SlotId) {
        let Some(core) = self.components.get_mut(id).and_then(|c| c.core_mut()) else {
            return;
        };
        let Some(state) = core.finish(slot) else {
            return;
        };
        self.release_workers(id, &state.workers);
        self.capacity_freed(id);
    }

    fn release_workers(&mut self, id: ComponentId, workers: &[WorkerId]) {
        if workers.is_empty() {
            return;
        }
        let now = self.scheduler.now();
        let Some(pool) = self.components[id].core().and_then(|c| c.worker_pool) else {
            return;
        };
        let woken = self
            .pools
            .get_mut(pool)
            .map(|p| p.release(workers, id, now))
            .unwrap_or_default();
        for waiter in woken {
            self.schedule_drain(waiter);
        }
    }

    /// Count an entity leaving `component`.
    pub(crate) fn record_exit(&mut self, component: ComponentId) {
        if !self.recording() {
            return;
        }
        match self.components.get_mut(component).map(|c| &mut c.kind) {
            Some(ComponentKind::Source(s)) => s.stats.number_exited += 1,
            Some(kind) => {
                if let Some(core) = kind.core_mut() {
                    core.stats.number_exited += 1;
                }
            }
            None => {}
        }
    }

    /// A worker pool reached a shift boundary.
    pub(crate) fn recompute_pool(&mut self, pool: WorkerPoolId) {
        let now = self.scheduler.now();
        let Some(p) = self.pools.get_mut(pool) else {
            return;
        };
        let next = p.recompute(now);
        let woken = p.waiters_to_wake();
        self.scheduler
            .schedule_in(next, Action::WorkerPoolRecompute(pool));
        for waiter in woken {
            self.schedule_drain(waiter);
        }
    }
}
