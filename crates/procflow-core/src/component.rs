//! Components of the process network and the processing state machine they
//! share.
//!
//! Every processing kind (server, separator, combiner, storage, sink) embeds a
//! [`ProcessingCore`]: capacity accounting, the input queue, the slot pool
//! that correlates in-flight units with their completion events, and the
//! warm-up aware statistics. Sources and vehicles are not processing kinds and
//! carry their own state.
//!
//! Statistics are exposed through small capability traits
//! ([`HasQueueStats`], [`HasProcessingStats`], ...) that each kind implements
//! only where they apply.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::combiner::Combiner;
use crate::distribution::Distribution;
use crate::entity::TimeInSystem;
use crate::fixed::SimTime;
use crate::hooks::Hooks;
use crate::id::{EntityId, EntityTypeId, ScheduleId, SlotId, WorkerId, WorkerPoolId};
use crate::queue::{EntityQueue, QueueDiscipline, QueueEntry};
use crate::routing::Router;
use crate::server::{Separator, Server};
use crate::sink::Sink;
use crate::source::Source;
use crate::storage::Storage;
use crate::tally::TallyStatistic;
use crate::vehicle::Vehicle;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Machine failures: time between breakdowns (counted in processing time
/// only) and how long a repair takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub time_between: Distribution,
    pub duration: Distribution,
}

/// Settings shared by every processing kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingConfig {
    pub capacity: usize,
    pub processing_time: Distribution,
    /// Per entity type processing times, by type name.
    pub processing_time_by_type: Vec<(String, Distribution)>,
    pub breakdown: Option<Breakdown>,
    pub schedule: Option<ScheduleId>,
    pub worker_pool: Option<WorkerPoolId>,
    pub workers_required: usize,
    pub discipline: QueueDiscipline,
    /// Named pull queues this component takes work from.
    pub storage_queues: Vec<String>,
    pub sequence_routing: bool,
    pub vehicle_group: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            processing_time: Distribution::default(),
            processing_time_by_type: Vec::new(),
            breakdown: None,
            schedule: None,
            worker_pool: None,
            workers_required: 1,
            discipline: QueueDiscipline::Fifo,
            storage_queues: Vec::new(),
            sequence_routing: false,
            vehicle_group: None,
        }
    }
}

impl ProcessingConfig {
    pub fn new(processing_time: Distribution) -> Self {
        Self {
            processing_time,
            ..Self::default()
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn time_for_type(mut self, entity_type: impl Into<String>, d: Distribution) -> Self {
        self.processing_time_by_type.push((entity_type.into(), d));
        self
    }

    pub fn breakdown(mut self, time_between: Distribution, duration: Distribution) -> Self {
        self.breakdown = Some(Breakdown {
            time_between,
            duration,
        });
        self
    }

    pub fn schedule(mut self, schedule: ScheduleId) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn workers(mut self, pool: WorkerPoolId, required: usize) -> Self {
        self.worker_pool = Some(pool);
        self.workers_required = required;
        self
    }

    pub fn discipline(mut self, discipline: QueueDiscipline) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn storage_queue(mut self, name: impl Into<String>) -> Self {
        self.storage_queues.push(name.into());
        self
    }

    pub fn sequence_routing(mut self) -> Self {
        self.sequence_routing = true;
        self
    }

    pub fn vehicle_group(mut self, group: impl Into<String>) -> Self {
        self.vehicle_group = Some(group.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters of one processing component. Counters, queue samples and
/// utilization intervals are only recorded once time reaches the warm-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingStats {
    pub number_entered: u64,
    pub number_exited: u64,
    pub total_entities_processed: u64,
    pub total_processing_time: f64,
    pub total_downtime: f64,
    pub number_downtimes: u64,
    /// Current queue length (always tracked).
    pub queue_length: usize,
    /// `(time, length)` after each change.
    pub queue_lengths: Vec<(f64, usize)>,
    pub queue_times: Vec<f64>,
    /// `(start, end, units in use at start)` per processed unit.
    pub units_utilized_over_time: Vec<(f64, f64, usize)>,
}

impl ProcessingStats {
    pub fn avg_processing_time(&self) -> f64 {
        if self.total_entities_processed == 0 {
            0.0
        } else {
            self.total_processing_time / self.total_entities_processed as f64
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

// ---------------------------------------------------------------------------
// Processing core
// ---------------------------------------------------------------------------

/// State of one busy processing slot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SlotState {
    pub entity: EntityId,
    pub workers: Vec<WorkerId>,
    pub started: SimTime,
    pub processing_time: f64,
    /// Processing left after the pending breakdown.
    pub remaining: f64,
    /// Units in use when processing started.
    pub units: usize,
    /// Processing is done but the entity has not left yet.
    pub blocked: bool,
    /// Duration of the repair in progress, if broken down.
    pub repair: Option<f64>,
}

/// Capacity, queue, slots and statistics of a processing component.
#[derive(Debug, Clone)]
pub struct ProcessingCore {
    pub capacity: usize,
    used_capacity: usize,
    /// Units of `used_capacity` held for entities routed here but not yet
    /// started.
    reserved: usize,
    pub queue: EntityQueue,
    slots: Vec<Option<SlotState>>,
    free_slots: Vec<SlotId>,
    pub processing_time: Distribution,
    pub processing_time_by_type: HashMap<EntityTypeId, Distribution>,
    pub breakdown: Option<Breakdown>,
    pub(crate) time_until_breakdown: Option<f64>,
    pub schedule: Option<ScheduleId>,
    pub worker_pool: Option<WorkerPoolId>,
    pub workers_required: usize,
    pub storage_queues: Vec<String>,
    pub(crate) storage_cursor: usize,
    pub(crate) recheck_pending: bool,
    pub stats: ProcessingStats,
}

impl ProcessingCore {
    pub fn new(
        capacity: usize,
        processing_time: Distribution,
        discipline: QueueDiscipline,
    ) -> Self {
        Self {
            capacity,
            used_capacity: 0,
            reserved: 0,
            queue: EntityQueue::new(discipline),
            slots: Vec::new(),
            free_slots: Vec::new(),
            processing_time,
            processing_time_by_type: HashMap::new(),
            breakdown: None,
            time_until_breakdown: None,
            schedule: None,
            worker_pool: None,
            workers_required: 0,
            storage_queues: Vec::new(),
            storage_cursor: 0,
            recheck_pending: false,
            stats: ProcessingStats::default(),
        }
    }

    pub fn used_capacity(&self) -> usize {
        self.used_capacity
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn has_free_capacity(&self) -> bool {
        self.used_capacity < self.capacity
    }

    /// Units currently processing or blocked.
    pub fn busy_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Hold one unit of capacity for an entity on its way here.
    pub fn reserve(&mut self) -> bool {
        if !self.has_free_capacity() {
            return false;
        }
        self.used_capacity += 1;
        self.reserved += 1;
        true
    }

    pub fn cancel_reservation(&mut self) {
        if self.reserved > 0 {
            self.reserved -= 1;
            self.used_capacity -= 1;
        }
    }

    pub(crate) fn enqueue(&mut self, entity: EntityId, now: SimTime, reserved: bool, record: bool) {
        self.queue.push(QueueEntry {
            entity,
            enqueued_at: now,
            reserved,
        });
        self.stats.queue_length += 1;
        if record {
            self.stats
                .queue_lengths
                .push((now.to_num::<f64>(), self.stats.queue_length));
        }
    }

    /// A queued entity may start now: either there is free capacity, or
    /// capacity was reserved for one that is queued.
    pub fn can_start(&self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        self.has_free_capacity() || (self.reserved > 0 && self.queue.count_matching(|e| e.reserved) > 0)
    }

    /// Remove the entity that starts next.
    pub(crate) fn pop_startable(&mut self) -> Option<QueueEntry> {
        if !self.can_start() {
            return None;
        }
        if self.has_free_capacity() {
            self.queue.pop_next()
        } else {
            self.queue.pop_first_matching(|e| e.reserved)
        }
    }

    pub(crate) fn note_dequeued(&mut self, entry: &QueueEntry, now: SimTime, record: bool) {
        self.stats.queue_length = self.stats.queue_length.saturating_sub(1);
        if record {
            let t = now.to_num::<f64>();
            self.stats.queue_times.push(t - entry.enqueued_at.to_num::<f64>());
            self.stats.queue_lengths.push((t, self.stats.queue_length));
        }
    }

    /// Take a free slot for `entry` and account for its capacity.
    pub(crate) fn begin(&mut self, entry: &QueueEntry, state: SlotState) -> Option<SlotId> {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                SlotId((self.slots.len() - 1) as u32)
            }
            None => return None,
        };
        if entry.reserved && self.reserved > 0 {
            self.reserved -= 1;
        } else {
            self.used_capacity += 1;
        }
        self.slots[slot.0 as usize] = Some(state);
        Some(slot)
    }

    /// Undo [`begin`](Self::begin) after a veto: the slot and its capacity
    /// (or reservation) are returned. The entry stays with the caller.
    pub(crate) fn abort(&mut self, slot: SlotId, entry: &QueueEntry) -> Option<SlotState> {
        let state = self.slots.get_mut(slot.0 as usize)?.take();
        self.free_slots.push(slot);
        if entry.reserved {
            self.reserved += 1;
        } else {
            self.used_capacity -= 1;
        }
        state
    }

    pub(crate) fn slot(&self, slot: SlotId) -> Option<&SlotState> {
        self.slots.get(slot.0 as usize)?.as_ref()
    }

    pub(crate) fn slot_mut(&mut self, slot: SlotId) -> Option<&mut SlotState> {
        self.slots.get_mut(slot.0 as usize)?.as_mut()
    }

    /// Release a slot and its unit of capacity.
    pub(crate) fn finish(&mut self, slot: SlotId) -> Option<SlotState> {
        let state = self.slots.get_mut(slot.0 as usize)?.take()?;
        self.free_slots.push(slot);
        self.used_capacity = self.used_capacity.saturating_sub(1);
        Some(state)
    }

    /// Distribution for an entity type, falling back to `global` and then
    /// the component default.
    pub fn distribution_for<'a>(
        &'a self,
        entity_type: EntityTypeId,
        global: Option<&'a Distribution>,
    ) -> &'a Distribution {
        self.processing_time_by_type
            .get(&entity_type)
            .or(global)
            .unwrap_or(&self.processing_time)
    }

    /// Clear queue, slots and statistics for a new replication.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.slots.clear();
        self.free_slots.clear();
        self.used_capacity = 0;
        self.reserved = 0;
        self.time_until_breakdown = None;
        self.storage_cursor = 0;
        self.recheck_pending = false;
        self.stats = ProcessingStats::default();
    }

    pub fn reset_stats(&mut self) {
        let queue_length = self.stats.queue_length;
        self.stats = ProcessingStats {
            queue_length,
            ..ProcessingStats::default()
        };
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

pub trait HasQueueStats {
    fn queue_length(&self) -> usize;
    fn queue_lengths(&self) -> &[(f64, usize)];
    fn queue_times(&self) -> &[f64];

    fn avg_queue_length(&self) -> f64 {
        mean(self.queue_lengths().iter().map(|&(_, l)| l as f64))
    }

    fn max_queue_length(&self) -> usize {
        self.queue_lengths().iter().map(|&(_, l)| l).max().unwrap_or(0)
    }

    fn avg_time_in_queue(&self) -> f64 {
        mean(self.queue_times().iter().copied())
    }

    fn max_time_in_queue(&self) -> f64 {
        self.queue_times().iter().copied().fold(0.0, f64::max)
    }
}

pub trait HasProcessingStats {
    fn core(&self) -> &ProcessingCore;

    fn processing_stats(&self) -> &ProcessingStats {
        &self.core().stats
    }

    fn capacity(&self) -> usize {
        self.core().capacity
    }

    fn number_entered(&self) -> u64 {
        self.processing_stats().number_entered
    }

    fn number_exited(&self) -> u64 {
        self.processing_stats().number_exited
    }

    fn total_entities_processed(&self) -> u64 {
        self.processing_stats().total_entities_processed
    }

    fn total_downtime(&self) -> f64 {
        self.processing_stats().total_downtime
    }

    fn units_utilized_over_time(&self) -> &[(f64, f64, usize)] {
        &self.processing_stats().units_utilized_over_time
    }
}

pub trait HasCreationStats {
    fn entities_created(&self) -> u64;
    fn number_exited(&self) -> u64;
}

pub trait HasTerminalStats {
    fn number_entered(&self) -> u64;
    fn time_in_system(&self) -> &TimeInSystem;
    fn tally(&self) -> &TallyStatistic;
}

pub trait HasCombinerStats {
    fn number_parents_entered(&self) -> u64;
    fn number_members_entered(&self) -> u64;
    fn number_combined_exited(&self) -> u64;
    fn member_queue_length(&self) -> usize;
    fn member_queue_times(&self) -> &[f64];
}

pub trait HasSeparatorStats {
    fn number_parents_exited(&self) -> u64;
    fn number_members_exited(&self) -> u64;
}

pub trait HasTransportStats {
    fn entities_transported(&self) -> u64;
    fn total_trips(&self) -> u64;
    fn total_travel_time(&self) -> f64;
    fn utilized_time(&self) -> f64;
    fn trips_over_time(&self) -> &[(f64, f64, usize)];
}

/// Implements the queue and processing capabilities for kinds that embed a
/// `core: ProcessingCore`.
macro_rules! impl_processing_kind {
    ($($kind:ty),* $(,)?) => {$(
        impl HasProcessingStats for $kind {
            fn core(&self) -> &ProcessingCore {
                &self.core
            }
        }

        impl HasQueueStats for $kind {
            fn queue_length(&self) -> usize {
                self.core.stats.queue_length
            }

            fn queue_lengths(&self) -> &[(f64, usize)] {
                &self.core.stats.queue_lengths
            }

            fn queue_times(&self) -> &[f64] {
                &self.core.stats.queue_times
            }
        }
    )*};
}

impl_processing_kind!(Server, Separator, Combiner, Storage, Sink);

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    Source,
    Server,
    Separator,
    Combiner,
    Storage,
    Sink,
    Vehicle,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug)]
pub enum ComponentKind {
    Source(Source),
    Server(Server),
    Separator(Separator),
    Combiner(Combiner),
    Storage(Storage),
    Sink(Sink),
    Vehicle(Vehicle),
}

impl ComponentKind {
    pub fn component_type(&self) -> ComponentType {
        match self {
            ComponentKind::Source(_) => ComponentType::Source,
            ComponentKind::Server(_) => ComponentType::Server,
            ComponentKind::Separator(_) => ComponentType::Separator,
            ComponentKind::Combiner(_) => ComponentType::Combiner,
            ComponentKind::Storage(_) => ComponentType::Storage,
            ComponentKind::Sink(_) => ComponentType::Sink,
            ComponentKind::Vehicle(_) => ComponentType::Vehicle,
        }
    }

    pub fn core(&self) -> Option<&ProcessingCore> {
        match self {
            ComponentKind::Server(s) => Some(&s.core),
            ComponentKind::Separator(s) => Some(&s.core),
            ComponentKind::Combiner(c) => Some(&c.core),
            ComponentKind::Storage(s) => Some(&s.core),
            ComponentKind::Sink(s) => Some(&s.core),
            ComponentKind::Source(_) | ComponentKind::Vehicle(_) => None,
        }
    }

    pub fn core_mut(&mut self) -> Option<&mut ProcessingCore> {
        match self {
            ComponentKind::Server(s) => Some(&mut s.core),
            ComponentKind::Separator(s) => Some(&mut s.core),
            ComponentKind::Combiner(c) => Some(&mut c.core),
            ComponentKind::Storage(s) => Some(&mut s.core),
            ComponentKind::Sink(s) => Some(&mut s.core),
            ComponentKind::Source(_) | ComponentKind::Vehicle(_) => None,
        }
    }

    /// Entities can be delivered to this kind.
    pub fn accepts_entities(&self) -> bool {
        self.core().is_some()
    }
}

/// A node of the network.
#[derive(Debug)]
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
    pub router: Router,
    pub hooks: Hooks,
}

impl Component {
    pub fn new(name: String, kind: ComponentKind) -> Self {
        Self {
            name,
            kind,
            router: Router::default(),
            hooks: Hooks::default(),
        }
    }

    pub fn component_type(&self) -> ComponentType {
        self.kind.component_type()
    }

    pub fn core(&self) -> Option<&ProcessingCore> {
        self.kind.core()
    }

    pub fn core_mut(&mut self) -> Option<&mut ProcessingCore> {
        self.kind.core_mut()
    }

    /// Restore counters and queues to empty for the next replication.
    pub fn reset_stats(&mut self) {
        match &mut self.kind {
            ComponentKind::Source(s) => s.reset_stats(),
            ComponentKind::Server(s) => s.core.reset_stats(),
            ComponentKind::Separator(s) => s.reset_stats(),
            ComponentKind::Combiner(c) => c.reset_stats(),
            ComponentKind::Storage(s) => s.core.reset_stats(),
            ComponentKind::Sink(s) => s.reset_stats(),
            ComponentKind::Vehicle(v) => v.reset_stats(),
        }
        self.router.retry_counter = 0;
    }
}
