//! Cooperative scheduling kernel.
//!
//! Every suspended "process" in the model is represented by an [`Action`]
//! waiting in a min-heap keyed by `(time, sequence)`. Popping an action
//! resumes that process. Actions scheduled for the same instant resume in the
//! order they were scheduled, which gives the single-threaded,
//! deterministic-resume-order contract: no preemption, and shared state is
//! only touched between suspension points.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::fixed::SimTime;
use crate::id::{ComponentId, ConnectionId, EntityId, SlotId, TripId, WorkerPoolId};

// ---------------------------------------------------------------------------
// Holders
// ---------------------------------------------------------------------------

/// Who is holding an entity while it waits to move on: a processing slot of a
/// component, or a source that has not released its freshly created entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Holder {
    pub component: ComponentId,
    pub slot: Option<SlotId>,
}

impl Holder {
    pub fn slot(component: ComponentId, slot: SlotId) -> Self {
        Self {
            component,
            slot: Some(slot),
        }
    }

    pub fn source(component: ComponentId) -> Self {
        Self {
            component,
            slot: None,
        }
    }

    /// An entity that left `component` without occupying a slot (released
    /// batch members). Releasing it is a no-op.
    pub fn detached(component: ComponentId) -> Self {
        Self::source(component)
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A resumable step of one simulated process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A source's inter-arrival timeout elapsed.
    SourceArrival(ComponentId),
    /// Create exactly one entity at a source (closed-loop retrigger).
    CreateSingle(ComponentId),
    /// Try to start processing as many queued entities as capacity allows.
    Drain(ComponentId),
    /// Processing of the unit in `slot` finished.
    ProcessingDone { component: ComponentId, slot: SlotId },
    /// The machine fails while processing the unit in `slot`.
    BreakdownBegin { component: ComponentId, slot: SlotId },
    /// Repair finished; the unit in `slot` resumes its remaining time.
    BreakdownEnd { component: ComponentId, slot: SlotId },
    /// Re-check an inactive work schedule that has now reached a shift start.
    ScheduleRecheck(ComponentId),
    /// Pull entities from storage queues into free capacity.
    StoragePull(ComponentId),
    /// Resize a worker pool's available set at a shift boundary.
    WorkerPoolRecompute(WorkerPoolId),
    /// Sequence routing found no free destination earlier; try again.
    RoutingRetry { holder: Holder, entity: EntityId },
    /// The head entity of a delayed connection reaches its target.
    ConnectionDeliver(ConnectionId),
    /// A vehicle trip arrives and unloads.
    TripDone { vehicle: ComponentId, trip: TripId },
}

/// An action scheduled for execution at a specific simulation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduled {
    time: SimTime,
    sequence: u64,
    action: Action,
}

impl Scheduled {
    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn action(&self) -> &Action {
        &self.action
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap; reverse both keys for earliest-first.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The simulation clock plus its pending actions.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: SimTime,
    heap: BinaryHeap<Scheduled>,
    next_sequence: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulation time. Never decreases.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `action` at an absolute time. Times in the past are clamped
    /// to `now` so the clock stays monotonic.
    pub fn schedule_at(&mut self, time: SimTime, action: Action) {
        let time = time.max(self.now);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Scheduled {
            time,
            sequence,
            action,
        });
    }

    /// Schedule `action` after `delay` steps.
    pub fn schedule_in(&mut self, delay: SimTime, action: Action) {
        let time = self.now.saturating_add(delay);
        self.schedule_at(time, action);
    }

    /// Schedule `action` at the current instant, after everything already
    /// scheduled for it.
    pub fn schedule_now(&mut self, action: Action) {
        self.schedule_at(self.now, action);
    }

    /// Time of the next pending action, if any.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|s| s.time)
    }

    /// Pop the next action and advance the clock to its time.
    pub fn pop_next(&mut self) -> Option<(SimTime, Action)> {
        let next = self.heap.pop()?;
        self.now = next.time;
        Some((next.time, next.action))
    }

    /// Advance the clock without popping (used when a run ends at a horizon
    /// with no action exactly there).
    pub fn advance_to(&mut self, time: SimTime) {
        if time > self.now {
            self.now = time;
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::to_time;
    use slotmap::SlotMap;

    fn component() -> ComponentId {
        let mut arena: SlotMap<ComponentId, ()> = SlotMap::with_key();
        arena.insert(())
    }

    #[test]
    fn pops_in_time_order() {
        let c = component();
        let mut s = Scheduler::new();
        s.schedule_at(to_time(5.0), Action::Drain(c));
        s.schedule_at(to_time(1.0), Action::SourceArrival(c));
        s.schedule_at(to_time(3.0), Action::StoragePull(c));

        let order: Vec<f64> = std::iter::from_fn(|| s.pop_next())
            .map(|(t, _)| t.to_num::<f64>())
            .collect();
        assert_eq!(order, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn equal_times_resume_in_schedule_order() {
        let c = component();
        let mut s = Scheduler::new();
        s.schedule_at(to_time(2.0), Action::Drain(c));
        s.schedule_at(to_time(2.0), Action::StoragePull(c));
        s.schedule_at(to_time(2.0), Action::ScheduleRecheck(c));

        let (_, a) = s.pop_next().unwrap();
        let (_, b) = s.pop_next().unwrap();
        let (_, d) = s.pop_next().unwrap();
        assert_eq!(a, Action::Drain(c));
        assert_eq!(b, Action::StoragePull(c));
        assert_eq!(d, Action::ScheduleRecheck(c));
    }

    #[test]
    fn clock_is_monotonic() {
        let c = component();
        let mut s = Scheduler::new();
        s.schedule_at(to_time(10.0), Action::Drain(c));
        s.pop_next();
        s.schedule_at(to_time(4.0), Action::Drain(c));
        let (t, _) = s.pop_next().unwrap();
        assert_eq!(t, to_time(10.0));
        assert_eq!(s.now(), to_time(10.0));
    }

    #[test]
    fn schedule_in_is_relative_to_now() {
        let c = component();
        let mut s = Scheduler::new();
        s.schedule_at(to_time(7.0), Action::Drain(c));
        s.pop_next();
        s.schedule_in(to_time(3.0), Action::Drain(c));
        assert_eq!(s.peek_time(), Some(to_time(10.0)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn schedule_in_saturates() {
        let c = component();
        let mut s = Scheduler::new();
        s.schedule_at(to_time(1.0), Action::Drain(c));
        s.pop_next();
        s.schedule_in(SimTime::MAX, Action::Drain(c));
        assert_eq!(s.peek_time(), Some(SimTime::MAX));
    }
}
