//! Terminal component: destroys entities and records their time in system.

use tracing::trace;

use crate::component::{
    ComponentKind, HasTerminalStats, ProcessingConfig, ProcessingCore,
};
use crate::entity::TimeInSystem;
use crate::fixed::time_to_f64;
use crate::hooks::HookPoint;
use crate::id::{ComponentId, EntityId, SlotId};
use crate::kernel::Action;
use crate::model::Model;
use crate::tally::TallyStatistic;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkConfig {
    /// Defaults to zero processing time and one slot.
    pub processing: ProcessingConfig,
    /// Create one entity at this source for every destroyed entity.
    pub retrigger_source: Option<String>,
    /// Also record time-in-system in the model's named tally.
    pub tally_name: Option<String>,
}

impl SinkConfig {
    pub fn retrigger(mut self, source: impl Into<String>) -> Self {
        self.retrigger_source = Some(source.into());
        self
    }

    pub fn tally(mut self, name: impl Into<String>) -> Self {
        self.tally_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkStats {
    pub time_in_system: TimeInSystem,
    pub tally: TallyStatistic,
}

#[derive(Debug, Clone)]
pub struct Sink {
    pub core: ProcessingCore,
    pub retrigger_source: Option<ComponentId>,
    pub tally_name: Option<String>,
    pub stats: SinkStats,
}

impl Sink {
    pub(crate) fn new(core: ProcessingCore, retrigger_source: Option<ComponentId>, tally_name: Option<String>) -> Self {
        Self {
            core,
            retrigger_source,
            tally_name,
            stats: SinkStats::default(),
        }
    }

    pub fn reset_stats(&mut self) {
        self.core.reset_stats();
        self.stats = SinkStats::default();
    }
}

impl HasTerminalStats for Sink {
    fn number_entered(&self) -> u64 {
        self.core.stats.number_entered
    }

    fn time_in_system(&self) -> &TimeInSystem {
        &self.stats.time_in_system
    }

    fn tally(&self) -> &TallyStatistic {
        &self.stats.tally
    }
}

impl Model {
    /// Destroy an entity at the end of its sink processing.
    pub(crate) fn terminate(&mut self, id: ComponentId, slot: SlotId, entity: EntityId) {
        let now = self.scheduler.now();
        let warm_up = self.warm_up;

        self.run_hook(id, HookPoint::OnDestroy, Some(entity), None);

        let Some(e) = self.entities.get(entity) else {
            self.free_slot(id, slot);
            return;
        };
        let creation = e.creation_time;
        let members = e.batch_members.clone();
        let tis = time_to_f64(now.max(creation) - creation);
        let counted = creation >= warm_up && now > warm_up;

        let ComponentKind::Sink(sink) = &mut self.components[id].kind else {
            return;
        };
        if counted {
            sink.stats.time_in_system.record(tis);
            sink.stats.tally.record(tis);
        }
        let retrigger = sink.retrigger_source;
        if counted && let Some(name) = sink.tally_name.clone() {
            self.tallies.record(&name, tis);
        }

        // A batch leaves the system with its parent.
        for member in members {
            self.entities.destroy(member, now);
        }
        self.entities.destroy(entity, now);
        trace!(component = %self.components[id].name, time_in_system = tis, "entity destroyed");

        if let Some(source) = retrigger {
            self.scheduler.schedule_now(Action::CreateSingle(source));
        }
        self.free_slot(id, slot);
    }
}
