//! Schedule-driven worker pools with all-or-nothing multi-worker acquisition.
//!
//! A pool owns a fixed roster of [`Worker`] tokens. Each token is in exactly
//! one of three states: available, locked by a component, or off shift. The
//! pool's work schedule decides how many tokens should be on duty
//! (available + locked); [`WorkerPool::recompute`] adjusts the available set at
//! each shift boundary.
//!
//! Acquisition is two-phase. Phase 1 withdraws `n` tokens from the available
//! set, but only when `n` are there at once, so a component never sits on a
//! partial set. Phase 2 locks each withdrawn token. If a lock fails, every
//! withdrawn token is handed back before the error is returned.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fixed::{SimTime, time_to_f64};
use crate::id::{ComponentId, WorkerId};
use crate::schedule::{ScheduleState, WorkScheduleWeek};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker {worker} is already assigned")]
    AlreadyAssigned { worker: String },
    #[error("pool {pool} has {roster} workers but {required} are required")]
    InsufficientRoster {
        pool: String,
        required: usize,
        roster: usize,
    },
    #[error("worker pool {0} has an empty roster")]
    EmptyRoster(String),
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// An identity-bearing worker token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    /// Completed and in-progress assignments.
    pub allocations: u64,
    pub total_busy_time: f64,
    busy_since: Option<SimTime>,
    busy_with: Option<ComponentId>,
}

impl Worker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            allocations: 0,
            total_busy_time: 0.0,
            busy_since: None,
            busy_with: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy_since.is_some()
    }

    pub fn busy_with(&self) -> Option<ComponentId> {
        self.busy_with
    }

    pub fn start_assignment(
        &mut self,
        component: ComponentId,
        now: SimTime,
    ) -> Result<(), WorkerError> {
        if self.is_busy() {
            return Err(WorkerError::AlreadyAssigned {
                worker: self.id.clone(),
            });
        }
        self.allocations += 1;
        self.busy_since = Some(now);
        self.busy_with = Some(component);
        Ok(())
    }

    /// Finish the current assignment and return its busy duration. Releasing
    /// a worker that `component` does not hold is logged and ignored.
    pub fn end_assignment(&mut self, component: ComponentId, now: SimTime) -> f64 {
        match (self.busy_since, self.busy_with) {
            (Some(since), Some(holder)) if holder == component => {
                let busy = time_to_f64(now.saturating_sub(since));
                self.total_busy_time += busy;
                self.busy_since = None;
                self.busy_with = None;
                busy
            }
            _ => {
                warn!(worker = %self.id, "release of a worker not held by this component");
                0.0
            }
        }
    }

    /// Busy share of `sim_time`, counting a running assignment up to `now`.
    pub fn utilization(&self, sim_time: f64, now: SimTime) -> f64 {
        if sim_time <= 0.0 {
            return 0.0;
        }
        let running = self
            .busy_since
            .map_or(0.0, |since| time_to_f64(now.saturating_sub(since)));
        ((self.total_busy_time + running) / sim_time).min(1.0)
    }

    fn reset_stats(&mut self) {
        self.allocations = 0;
        self.total_busy_time = 0.0;
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Available,
    Locked(ComponentId),
    OffShift,
}

/// Outcome of [`WorkerPool::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    /// The tokens, in acquisition order.
    Granted(Vec<WorkerId>),
    /// Not enough workers; the component was queued as a waiter.
    Waiting,
}

/// A pool of worker tokens whose on-duty size follows a work schedule.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    pub name: String,
    schedule: WorkScheduleWeek,
    workers: Vec<Worker>,
    states: Vec<WorkerState>,
    available: VecDeque<WorkerId>,
    desired: usize,
    waiters: VecDeque<ComponentId>,
}

impl WorkerPool {
    /// Build a pool. Without a roster, `Worker_1..Worker_n` are created where
    /// `n` is the capacity of the schedule's first shift. All workers start
    /// off shift until the first [`recompute`](Self::recompute).
    pub fn new(
        name: impl Into<String>,
        schedule: WorkScheduleWeek,
        roster: Option<Vec<Worker>>,
    ) -> Result<Self, WorkerError> {
        let name = name.into();
        let workers = roster.unwrap_or_else(|| {
            (1..=schedule.first_shift_capacity())
                .map(|i| Worker::new(format!("Worker_{i}")))
                .collect()
        });
        if workers.is_empty() {
            return Err(WorkerError::EmptyRoster(name));
        }
        let states = vec![WorkerState::OffShift; workers.len()];
        Ok(Self {
            name,
            schedule,
            workers,
            states,
            available: VecDeque::new(),
            desired: 0,
            waiters: VecDeque::new(),
        })
    }

    /// Resize the available set to match the schedule at `now`. Returns the
    /// number of steps until the schedule changes again.
    pub fn recompute(&mut self, now: SimTime) -> SimTime {
        let state = self.schedule.query(now);
        self.desired = (state.capacity() as usize).min(self.workers.len());

        // Top up from off-shift workers in roster order.
        let mut i = 0;
        while self.on_duty() < self.desired && i < self.workers.len() {
            if self.states[i] == WorkerState::OffShift {
                self.states[i] = WorkerState::Available;
                self.available.push_back(WorkerId(i as u32));
            }
            i += 1;
        }
        // Trim surplus available workers, newest first. Locked workers finish
        // their assignment and go off shift on release.
        while self.on_duty() > self.desired {
            let Some(WorkerId(w)) = self.available.pop_back() else {
                break;
            };
            self.states[w as usize] = WorkerState::OffShift;
        }

        debug!(
            pool = %self.name,
            desired = self.desired,
            available = self.available.len(),
            locked = self.locked_count(),
            "worker pool recomputed"
        );
        match state {
            ScheduleState::Active { remaining, .. } => remaining,
            ScheduleState::Inactive { wait } => wait,
        }
    }

    /// Try to take `n` workers for `component`.
    ///
    /// With fewer than `n` available the component is registered as a FIFO
    /// waiter (once) and [`Acquire::Waiting`] is returned; nothing is held.
    pub fn try_acquire(
        &mut self,
        n: usize,
        component: ComponentId,
        now: SimTime,
    ) -> Result<Acquire, WorkerError> {
        if n > self.workers.len() {
            return Err(WorkerError::InsufficientRoster {
                pool: self.name.clone(),
                required: n,
                roster: self.workers.len(),
            });
        }
        if self.available.len() < n {
            if !self.waiters.contains(&component) {
                self.waiters.push_back(component);
            }
            return Ok(Acquire::Waiting);
        }

        // Phase 1: withdraw.
        let tokens: Vec<WorkerId> = self.available.drain(..n).collect();

        // Phase 2: lock each token.
        for (locked, &token) in tokens.iter().enumerate() {
            let idx = token.0 as usize;
            if let Err(e) = self.workers[idx].start_assignment(component, now) {
                self.rollback(&tokens, locked, component, now);
                return Err(e);
            }
            self.states[idx] = WorkerState::Locked(component);
        }
        self.waiters.retain(|&c| c != component);
        Ok(Acquire::Granted(tokens))
    }

    /// Hand back every withdrawn token after a failed lock; the first
    /// `locked` of them were already assigned.
    fn rollback(
        &mut self,
        tokens: &[WorkerId],
        locked: usize,
        component: ComponentId,
        now: SimTime,
    ) {
        for (i, &token) in tokens.iter().enumerate().rev() {
            let idx = token.0 as usize;
            if i < locked {
                self.workers[idx].end_assignment(component, now);
            }
            self.states[idx] = WorkerState::Available;
            self.available.push_front(token);
        }
    }

    /// Release tokens held by `component`, in reverse order of acquisition.
    /// Returns the components waiting for workers; the caller wakes them.
    pub fn release(
        &mut self,
        tokens: &[WorkerId],
        component: ComponentId,
        now: SimTime,
    ) -> Vec<ComponentId> {
        for &token in tokens.iter().rev() {
            let idx = token.0 as usize;
            if self.states.get(idx) != Some(&WorkerState::Locked(component)) {
                warn!(pool = %self.name, worker = idx, "release of a worker not locked by this component");
                continue;
            }
            self.workers[idx].end_assignment(component, now);
            // On duty counting this token after it is unlocked.
            if self.on_duty() <= self.desired {
                self.states[idx] = WorkerState::Available;
                self.available.push_back(token);
            } else {
                self.states[idx] = WorkerState::OffShift;
            }
        }
        self.waiters_to_wake()
    }

    /// The waiters to wake, in arrival order, when anyone is available.
    ///
    /// Waiters keep their place in line until they are granted workers or
    /// cancel, so one that is woken and still comes up short is not passed
    /// by later arrivals.
    pub fn waiters_to_wake(&self) -> Vec<ComponentId> {
        if self.available.is_empty() {
            return Vec::new();
        }
        self.waiters.iter().copied().collect()
    }

    /// Stop waiting for workers (the component no longer needs any).
    pub fn cancel_wait(&mut self, component: ComponentId) {
        self.waiters.retain(|&c| c != component);
    }

    fn on_duty(&self) -> usize {
        self.available.len() + self.locked_count()
    }

    // -- Accessors ----------------------------------------------------------

    pub fn roster_len(&self) -> usize {
        self.workers.len()
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn locked_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| matches!(s, WorkerState::Locked(_)))
            .count()
    }

    pub fn off_shift_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == WorkerState::OffShift)
            .count()
    }

    pub fn desired(&self) -> usize {
        self.desired
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub fn state(&self, worker: WorkerId) -> Option<WorkerState> {
        self.states.get(worker.0 as usize).copied()
    }

    pub fn worker(&self, worker: WorkerId) -> Option<&Worker> {
        self.workers.get(worker.0 as usize)
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn schedule(&self) -> &WorkScheduleWeek {
        &self.schedule
    }

    /// Worker id and utilization over `sim_time` for every roster member.
    pub fn utilization(&self, sim_time: f64, now: SimTime) -> Vec<(String, f64)> {
        self.workers
            .iter()
            .map(|w| (w.id.clone(), w.utilization(sim_time, now)))
            .collect()
    }

    pub fn reset_stats(&mut self) {
        for w in &mut self.workers {
            w.reset_stats();
        }
    }

    /// Conservation check: every roster member is in exactly one state and
    /// the available list agrees with the state table.
    pub fn is_consistent(&self) -> bool {
        let available_states = self
            .states
            .iter()
            .filter(|s| **s == WorkerState::Available)
            .count();
        available_states == self.available.len()
            && self.available.len() + self.locked_count() + self.off_shift_count()
                == self.workers.len()
            && self
                .available
                .iter()
                .all(|w| !self.workers[w.0 as usize].is_busy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::to_time;
    use crate::schedule::{TimeUnit, WorkScheduleDay};
    use slotmap::SlotMap;

    fn components(n: usize) -> Vec<ComponentId> {
        let mut arena: SlotMap<ComponentId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    fn always_on(capacity: u32) -> WorkScheduleWeek {
        let day = WorkScheduleDay::new().with_shift(0, 0, 24, 0, capacity).unwrap();
        WorkScheduleWeek::every_day(day, TimeUnit::Minutes, SimTime::ZERO).unwrap()
    }

    fn pool(capacity: u32) -> WorkerPool {
        let mut p = WorkerPool::new("Crew", always_on(capacity), None).unwrap();
        p.recompute(SimTime::ZERO);
        p
    }

    #[test]
    fn default_roster_follows_first_shift() {
        let p = pool(3);
        assert_eq!(p.roster_len(), 3);
        assert_eq!(p.workers()[0].id, "Worker_1");
        assert_eq!(p.available_count(), 3);
        assert!(p.is_consistent());
    }

    #[test]
    fn empty_roster_is_an_error() {
        let empty = WorkScheduleWeek::new(Default::default(), TimeUnit::Minutes, SimTime::ZERO).unwrap();
        assert!(matches!(
            WorkerPool::new("Nobody", empty, None),
            Err(WorkerError::EmptyRoster(_))
        ));
    }

    #[test]
    fn acquire_is_all_or_nothing() {
        let c = components(2);
        let mut p = pool(3);
        let granted = p.try_acquire(2, c[0], SimTime::ZERO).unwrap();
        assert!(matches!(granted, Acquire::Granted(ref t) if t.len() == 2));
        assert_eq!(p.try_acquire(2, c[1], SimTime::ZERO).unwrap(), Acquire::Waiting);
        // The single remaining worker was not taken.
        assert_eq!(p.available_count(), 1);
        assert_eq!(p.locked_count(), 2);
        assert_eq!(p.waiting(), 1);
        assert!(p.is_consistent());
    }

    #[test]
    fn release_is_reverse_order_and_wakes_waiters() {
        let c = components(2);
        let mut p = pool(3);
        let Acquire::Granted(tokens) = p.try_acquire(2, c[0], SimTime::ZERO).unwrap() else {
            panic!("expected grant");
        };
        p.try_acquire(2, c[1], SimTime::ZERO).unwrap();
        let woken = p.release(&tokens, c[0], to_time(5.0));
        assert_eq!(woken, vec![c[1]]);
        // Reverse order: the second token is returned first.
        let order: Vec<WorkerId> = p.available.iter().copied().collect();
        assert_eq!(order, vec![WorkerId(2), tokens[1], tokens[0]]);
        assert_eq!(p.workers()[0].total_busy_time, 5.0);
        assert!(p.is_consistent());
    }

    #[test]
    fn woken_waiters_keep_their_place() {
        let c = components(4);
        let mut p = pool(2);
        let Acquire::Granted(tokens) = p.try_acquire(2, c[0], SimTime::ZERO).unwrap() else {
            panic!("expected grant");
        };
        p.try_acquire(2, c[1], SimTime::ZERO).unwrap();
        p.try_acquire(2, c[2], SimTime::ZERO).unwrap();

        // One worker comes back: both waiters are woken but neither fits.
        let woken = p.release(&tokens[1..], c[0], to_time(1.0));
        assert_eq!(woken, vec![c[1], c[2]]);
        // A newcomer registers before the woken waiters retry.
        assert_eq!(p.try_acquire(2, c[3], to_time(1.0)).unwrap(), Acquire::Waiting);
        assert_eq!(p.try_acquire(2, c[2], to_time(1.0)).unwrap(), Acquire::Waiting);
        assert_eq!(p.try_acquire(2, c[1], to_time(1.0)).unwrap(), Acquire::Waiting);
        let order: Vec<ComponentId> = p.waiters.iter().copied().collect();
        assert_eq!(order, vec![c[1], c[2], c[3]]);

        let woken = p.release(&tokens[..1], c[0], to_time(2.0));
        assert_eq!(woken, vec![c[1], c[2], c[3]]);
        assert!(matches!(p.try_acquire(2, c[1], to_time(2.0)).unwrap(), Acquire::Granted(_)));
        assert_eq!(p.waiting(), 2);
        assert!(p.is_consistent());
    }

    #[test]
    fn failed_lock_rolls_back_every_token() {
        let c = components(2);
        let mut p = pool(3);
        // Corrupt the second available worker so phase 2 fails on it.
        p.workers[1].start_assignment(c[1], SimTime::ZERO).unwrap();
        let err = p.try_acquire(3, c[0], SimTime::ZERO).unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyAssigned { .. }));
        assert_eq!(p.available_count(), 3);
        assert_eq!(p.locked_count(), 0);
        assert!(!p.workers[0].is_busy());
        let order: Vec<WorkerId> = p.available.iter().copied().collect();
        assert_eq!(order, vec![WorkerId(0), WorkerId(1), WorkerId(2)]);
    }

    #[test]
    fn start_assignment_rejects_busy_worker() {
        let c = components(1);
        let mut w = Worker::new("W");
        w.start_assignment(c[0], SimTime::ZERO).unwrap();
        assert!(w.start_assignment(c[0], SimTime::ZERO).is_err());
        assert_eq!(w.end_assignment(c[0], to_time(4.0)), 4.0);
        assert_eq!(w.allocations, 1);
    }

    #[test]
    fn mismatched_release_is_ignored() {
        let c = components(2);
        let mut w = Worker::new("W");
        w.start_assignment(c[0], SimTime::ZERO).unwrap();
        assert_eq!(w.end_assignment(c[1], to_time(4.0)), 0.0);
        assert!(w.is_busy());
    }

    #[test]
    fn shift_end_sends_released_workers_off_shift() {
        let c = components(1);
        let day = WorkScheduleDay::new().with_shift(8, 0, 16, 0, 2).unwrap();
        let week = WorkScheduleWeek::every_day(day, TimeUnit::Minutes, SimTime::ZERO).unwrap();
        let mut p = WorkerPool::new("Day", week, None).unwrap();

        let next = p.recompute(to_time(8.0 * 60.0));
        assert_eq!(next, to_time(8.0 * 60.0));
        let Acquire::Granted(tokens) = p.try_acquire(1, c[0], to_time(480.0)).unwrap() else {
            panic!("expected grant");
        };

        // Shift ends while one worker is busy.
        p.recompute(to_time(16.0 * 60.0));
        assert_eq!(p.desired(), 0);
        assert_eq!(p.available_count(), 0);
        assert_eq!(p.locked_count(), 1);

        p.release(&tokens, c[0], to_time(17.0 * 60.0));
        assert_eq!(p.available_count(), 0);
        assert_eq!(p.off_shift_count(), 2);
        assert!(p.is_consistent());
    }

    #[test]
    fn utilization_counts_running_assignment() {
        let c = components(1);
        let mut p = pool(1);
        p.try_acquire(1, c[0], to_time(10.0)).unwrap();
        let util = p.utilization(20.0, to_time(20.0));
        assert_eq!(util, vec![("Worker_1".to_string(), 0.5)]);
    }

    #[test]
    fn oversized_request_is_an_error() {
        let c = components(1);
        let mut p = pool(2);
        assert!(matches!(
            p.try_acquire(3, c[0], SimTime::ZERO),
            Err(WorkerError::InsufficientRoster { required: 3, .. })
        ));
    }
}
