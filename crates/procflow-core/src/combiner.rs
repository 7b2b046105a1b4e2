//! Batch assembly: a parent waits in the processing queue until enough
//! members are queued, then takes them into its batch.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::component::{ComponentKind, HasCombinerStats, ProcessingConfig, ProcessingCore};
use crate::fixed::SimTime;
use crate::id::{ComponentId, EntityId, EntityTypeId};
use crate::model::Model;
use crate::queue::{EntityQueue, QueueDiscipline, QueueEntry};

/// "Combine `count` members of `entity_type`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationRule {
    pub entity_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinerConfig {
    pub processing: ProcessingConfig,
    /// Tried in order; the first satisfiable rule is used. Empty means a
    /// fixed count of members of any type.
    pub rules: Vec<CombinationRule>,
    pub members_to_combine: usize,
    pub member_discipline: QueueDiscipline,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            rules: Vec::new(),
            members_to_combine: 1,
            member_discipline: QueueDiscipline::Fifo,
        }
    }
}

impl CombinerConfig {
    pub fn new(processing: ProcessingConfig) -> Self {
        Self {
            processing,
            ..Self::default()
        }
    }

    pub fn rule(mut self, entity_type: impl Into<String>, count: usize) -> Self {
        self.rules.push(CombinationRule {
            entity_type: entity_type.into(),
            count,
        });
        self
    }

    pub fn members_to_combine(mut self, n: usize) -> Self {
        self.members_to_combine = n;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinerStats {
    pub number_parents_entered: u64,
    pub number_members_entered: u64,
    pub number_combined_exited: u64,
    pub member_queue_length: usize,
    pub member_queue_lengths: Vec<(f64, usize)>,
    pub member_queue_times: Vec<f64>,
}

/// Which members make up the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combination {
    Rule(EntityTypeId, usize),
    Any(usize),
}

#[derive(Debug, Clone)]
pub struct Combiner {
    pub core: ProcessingCore,
    pub members: EntityQueue,
    rules: Vec<(EntityTypeId, usize)>,
    pub members_to_combine: usize,
    pub stats: CombinerStats,
}

impl Combiner {
    pub(crate) fn new(
        core: ProcessingCore,
        rules: Vec<(EntityTypeId, usize)>,
        members_to_combine: usize,
        member_discipline: QueueDiscipline,
    ) -> Self {
        Self {
            core,
            members: EntityQueue::new(member_discipline),
            rules,
            members_to_combine,
            stats: CombinerStats::default(),
        }
    }

    pub(crate) fn add_member(&mut self, entity: EntityId, now: SimTime, record: bool) {
        self.members.push(QueueEntry {
            entity,
            enqueued_at: now,
            reserved: false,
        });
        self.stats.member_queue_length += 1;
        if record {
            self.stats.number_members_entered += 1;
            self.stats
                .member_queue_lengths
                .push((now.to_num::<f64>(), self.stats.member_queue_length));
        }
    }

    fn combination(&self, type_of: impl Fn(EntityId) -> Option<EntityTypeId>) -> Option<Combination> {
        if self.rules.is_empty() {
            return (self.members.len() >= self.members_to_combine)
                .then_some(Combination::Any(self.members_to_combine));
        }
        self.rules.iter().find_map(|&(ty, n)| {
            let queued = self
                .members
                .count_matching(|e| type_of(e.entity) == Some(ty));
            (queued >= n).then_some(Combination::Rule(ty, n))
        })
    }

    /// Enough members are queued for the next parent.
    pub fn combination_ready(&self, type_of: impl Fn(EntityId) -> Option<EntityTypeId>) -> bool {
        self.combination(type_of).is_some()
    }

    /// Remove the members of the next batch. Empty if no combination is
    /// satisfiable.
    pub(crate) fn take_members(
        &mut self,
        type_of: impl Fn(EntityId) -> Option<EntityTypeId>,
        now: SimTime,
        record: bool,
    ) -> Vec<EntityId> {
        let Some(combination) = self.combination(&type_of) else {
            return Vec::new();
        };
        let taken: Vec<QueueEntry> = match combination {
            Combination::Any(n) => (0..n).filter_map(|_| self.members.pop_next()).collect(),
            Combination::Rule(ty, n) => (0..n)
                .filter_map(|_| {
                    self.members
                        .pop_first_matching(|e| type_of(e.entity) == Some(ty))
                })
                .collect(),
        };
        self.stats.member_queue_length = self.stats.member_queue_length.saturating_sub(taken.len());
        if record {
            let t = now.to_num::<f64>();
            self.stats
                .member_queue_times
                .extend(taken.iter().map(|e| t - e.enqueued_at.to_num::<f64>()));
            self.stats
                .member_queue_lengths
                .push((t, self.stats.member_queue_length));
        }
        taken.into_iter().map(|e| e.entity).collect()
    }

    pub fn reset_stats(&mut self) {
        self.core.reset_stats();
        let member_queue_length = self.stats.member_queue_length;
        self.stats = CombinerStats {
            member_queue_length,
            ..CombinerStats::default()
        };
    }
}

impl HasCombinerStats for Combiner {
    fn number_parents_entered(&self) -> u64 {
        self.stats.number_parents_entered
    }

    fn number_members_entered(&self) -> u64 {
        self.stats.number_members_entered
    }

    fn number_combined_exited(&self) -> u64 {
        self.stats.number_combined_exited
    }

    fn member_queue_length(&self) -> usize {
        self.stats.member_queue_length
    }

    fn member_queue_times(&self) -> &[f64] {
        &self.stats.member_queue_times
    }
}

impl Model {
    /// Move the members of the next batch into `parent`.
    pub(crate) fn combine(&mut self, id: ComponentId, parent: EntityId) {
        let now = self.scheduler.now();
        let record = self.recording();
        let ComponentKind::Combiner(c) = &mut self.components[id].kind else {
            return;
        };
        let entities = &self.entities;
        let members = c.take_members(|m| entities.get(m).map(|e| e.entity_type), now, record);
        trace!(component = %self.components[id].name, members = members.len(), "batch combined");
        if let Some(parent) = self.entities.get_mut(parent) {
            parent.batch_members.extend(members);
        }
    }

    pub(crate) fn note_combined_exit(&mut self, id: ComponentId) {
        if self.recording()
            && let ComponentKind::Combiner(c) = &mut self.components[id].kind
        {
            c.stats.number_combined_exited += 1;
        }
    }
}
