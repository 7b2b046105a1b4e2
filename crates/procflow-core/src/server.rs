//! Servers and separators: plain processing, and processing that releases a
//! parent's batch members.

use tracing::trace;

use crate::component::{ComponentKind, HasSeparatorStats, ProcessingConfig, ProcessingCore};
use crate::id::{ComponentId, EntityId};
use crate::kernel::Holder;
use crate::model::Model;

/// Processes entities one per slot and routes them on.
#[derive(Debug, Clone)]
pub struct Server {
    pub core: ProcessingCore,
}

impl Server {
    pub(crate) fn new(core: ProcessingCore) -> Self {
        Self { core }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeparatorStats {
    pub number_parents_exited: u64,
    pub number_members_exited: u64,
}

/// A server that, when it starts processing a parent, sends the parent's
/// batch members onto the network.
#[derive(Debug, Clone)]
pub struct Separator {
    pub core: ProcessingCore,
    pub stats: SeparatorStats,
}

impl Separator {
    pub(crate) fn new(core: ProcessingCore) -> Self {
        Self {
            core,
            stats: SeparatorStats::default(),
        }
    }

    pub fn reset_stats(&mut self) {
        self.core.reset_stats();
        self.stats = SeparatorStats::default();
    }
}

impl HasSeparatorStats for Separator {
    fn number_parents_exited(&self) -> u64 {
        self.stats.number_parents_exited
    }

    fn number_members_exited(&self) -> u64 {
        self.stats.number_members_exited
    }
}

/// Build the core shared by every processing kind from its config.
pub(crate) fn core_from(config: &ProcessingConfig) -> ProcessingCore {
    let mut core = ProcessingCore::new(
        config.capacity,
        config.processing_time.clone(),
        config.discipline,
    );
    core.breakdown = config.breakdown.clone();
    core.schedule = config.schedule;
    core.worker_pool = config.worker_pool;
    core.workers_required = if config.worker_pool.is_some() {
        config.workers_required
    } else {
        0
    };
    core.storage_queues = config.storage_queues.clone();
    core
}

impl Model {
    /// Route every batch member of `parent` out of the separator.
    pub(crate) fn separate(&mut self, id: ComponentId, parent: EntityId) {
        let members = self
            .entities
            .get_mut(parent)
            .map(|p| std::mem::take(&mut p.batch_members))
            .unwrap_or_default();
        if members.is_empty() {
            return;
        }
        trace!(component = %self.components[id].name, members = members.len(), "separating batch");

        let record = self.recording();
        let holder = Holder::detached(id);
        for member in members {
            if record
                && let ComponentKind::Separator(s) = &mut self.components[id].kind
            {
                s.stats.number_members_exited += 1;
            }
            self.route_from(holder, member);
        }
    }

    pub(crate) fn note_parent_exit(&mut self, id: ComponentId) {
        if self.recording()
            && let ComponentKind::Separator(s) = &mut self.components[id].kind
        {
            s.stats.number_parents_exited += 1;
        }
    }
}
