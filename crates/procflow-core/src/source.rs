//! Entity creation on an inter-arrival cadence or from an arrival table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::{debug, trace};

use crate::component::{Component, ComponentKind, HasCreationStats};
use crate::distribution::Distribution;
use crate::entity::DEFAULT_ENTITY_TYPE;
use crate::fixed::to_time;
use crate::hooks::HookPoint;
use crate::id::{ComponentId, EntityId, EntityTypeId};
use crate::kernel::{Action, Holder};
use crate::model::Model;

/// Entity class weights must sum to one within this tolerance.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// One row of an arrival table. Times are absolute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrivalRow {
    pub time: f64,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
}

impl ArrivalRow {
    pub fn at(time: f64) -> Self {
        Self {
            time,
            ..Self::default()
        }
    }

    pub fn of_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalPattern {
    /// Sampled inter-arrival times; the first arrival comes after one sample.
    Distribution(Distribution),
    /// Arrivals at the listed times, sorted ascending.
    Table(Vec<ArrivalRow>),
}

/// How the type of a new entity is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    Fixed(String),
    /// The `entity_type` column of the arrival row (default type if empty).
    FromTable,
    /// Weighted random pick; weights sum to one.
    Weighted(Vec<(String, f64)>),
}

impl Default for EntityClass {
    fn default() -> Self {
        EntityClass::Fixed("Default".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub arrivals: ArrivalPattern,
    pub entity_class: EntityClass,
    pub max_arrivals: Option<u64>,
    pub initial_sequence_index: usize,
    /// Created entities are batch parents (for combiners).
    pub is_parent: bool,
    pub sequence_routing: bool,
    pub vehicle_group: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            arrivals: ArrivalPattern::Distribution(Distribution::exponential(1.0)),
            entity_class: EntityClass::default(),
            max_arrivals: None,
            initial_sequence_index: 0,
            is_parent: false,
            sequence_routing: false,
            vehicle_group: None,
        }
    }
}

impl SourceConfig {
    pub fn interarrival(d: Distribution) -> Self {
        Self {
            arrivals: ArrivalPattern::Distribution(d),
            ..Self::default()
        }
    }

    pub fn table(mut rows: Vec<ArrivalRow>) -> Self {
        rows.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self {
            arrivals: ArrivalPattern::Table(rows),
            entity_class: EntityClass::FromTable,
            ..Self::default()
        }
    }

    pub fn entity_type(mut self, name: impl Into<String>) -> Self {
        self.entity_class = EntityClass::Fixed(name.into());
        self
    }

    pub fn weighted(mut self, weights: Vec<(String, f64)>) -> Self {
        self.entity_class = EntityClass::Weighted(weights);
        self
    }

    pub fn max_arrivals(mut self, n: u64) -> Self {
        self.max_arrivals = Some(n);
        self
    }

    pub fn parents(mut self) -> Self {
        self.is_parent = true;
        self
    }

    pub fn sequence_routing(mut self, initial_index: usize) -> Self {
        self.sequence_routing = true;
        self.initial_sequence_index = initial_index;
        self
    }

    pub fn vehicle_group(mut self, group: impl Into<String>) -> Self {
        self.vehicle_group = Some(group.into());
        self
    }
}

#[derive(Debug, Clone)]
enum ResolvedClass {
    Fixed(EntityTypeId),
    FromTable,
    Weighted(Vec<(EntityTypeId, f64)>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStats {
    pub entities_created: u64,
    pub number_exited: u64,
}

#[derive(Debug, Clone)]
pub struct Source {
    pub arrivals: ArrivalPattern,
    class: ResolvedClass,
    pub max_arrivals: Option<u64>,
    pub initial_sequence_index: usize,
    pub is_parent: bool,
    /// Next row of an arrival table.
    table_index: usize,
    /// Every creation, regardless of warm-up; used for names and the cutoff.
    created: u64,
    /// The last created entity has not left yet.
    pub(crate) blocked: bool,
    /// Delay of the arrival deferred while blocked.
    pub(crate) pending_wait: Option<f64>,
    pub stats: SourceStats,
}

impl Source {
    pub(crate) fn new(config: &SourceConfig, class_types: Vec<(EntityTypeId, f64)>) -> Self {
        let class = match &config.entity_class {
            EntityClass::Fixed(_) => ResolvedClass::Fixed(
                class_types.first().map_or(DEFAULT_ENTITY_TYPE, |(ty, _)| *ty),
            ),
            EntityClass::FromTable => ResolvedClass::FromTable,
            EntityClass::Weighted(_) => ResolvedClass::Weighted(class_types),
        };
        Self {
            arrivals: config.arrivals.clone(),
            class,
            max_arrivals: config.max_arrivals,
            initial_sequence_index: config.initial_sequence_index,
            is_parent: config.is_parent,
            table_index: 0,
            created: 0,
            blocked: false,
            pending_wait: None,
            stats: SourceStats::default(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Creations so far, including warm-up.
    pub fn created(&self) -> u64 {
        self.created
    }

    fn exhausted(&self) -> bool {
        self.max_arrivals.is_some_and(|max| self.created >= max)
    }

    pub fn reset_stats(&mut self) {
        self.stats = SourceStats::default();
    }
}

impl HasCreationStats for Source {
    fn entities_created(&self) -> u64 {
        self.stats.entities_created
    }

    fn number_exited(&self) -> u64 {
        self.stats.number_exited
    }
}

/// `Ok(sum)` when the weights are non-negative and sum to one, else
/// `Err(sum)`.
pub(crate) fn check_weights(weights: &[(String, f64)]) -> Result<f64, f64> {
    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
    if (sum - 1.0).abs() <= WEIGHT_TOLERANCE && weights.iter().all(|(_, w)| *w >= 0.0) {
        Ok(sum)
    } else {
        Err(sum)
    }
}

fn source_in(components: &mut SlotMap<ComponentId, Component>, id: ComponentId) -> Option<&mut Source> {
    match &mut components.get_mut(id)?.kind {
        ComponentKind::Source(s) => Some(s),
        _ => None,
    }
}

impl Model {
    /// Schedule the first arrival of a source.
    pub(crate) fn start_source(&mut self, id: ComponentId) {
        let Some(source) = source_in(&mut self.components, id) else {
            return;
        };
        match &source.arrivals {
            ArrivalPattern::Distribution(d) => {
                let wait = d.sample(&mut self.rng);
                self.scheduler
                    .schedule_in(to_time(wait), Action::SourceArrival(id));
            }
            ArrivalPattern::Table(rows) => {
                if let Some(first) = rows.first() {
                    self.scheduler
                        .schedule_at(to_time(first.time), Action::SourceArrival(id));
                }
            }
        }
    }

    pub(crate) fn source_arrival(&mut self, id: ComponentId) {
        let now = self.scheduler.now().to_num::<f64>();
        let Some(source) = source_in(&mut self.components, id) else {
            return;
        };
        if source.exhausted() {
            return;
        }

        let (row, next_wait) = match &source.arrivals {
            ArrivalPattern::Distribution(d) => (None, Some(d.sample(&mut self.rng))),
            ArrivalPattern::Table(rows) => {
                let row = rows.get(source.table_index).cloned();
                let next = rows
                    .get(source.table_index + 1)
                    .map(|r| (r.time - now).max(0.0));
                (row, next)
            }
        };
        if matches!(source.arrivals, ArrivalPattern::Table(_)) {
            source.table_index += 1;
        }

        // The next arrival waits until this entity has left the source.
        source.pending_wait = next_wait;
        source.blocked = true;

        let released = match self.create_entity(id, row.as_ref()) {
            Some(entity) => self.route_from(Holder::source(id), entity),
            None => true,
        };
        if released {
            self.release_holder(Holder::source(id));
        } else {
            trace!(component = %self.components[id].name, "source blocked");
        }
    }

    /// Closed-loop creation of exactly one entity, outside the cadence.
    pub(crate) fn create_single(&mut self, id: ComponentId) {
        if source_in(&mut self.components, id).is_none_or(|s| s.exhausted()) {
            return;
        }
        if let Some(entity) = self.create_entity(id, None) {
            self.route_from(Holder::source(id), entity);
        }
    }

    /// Create one entity and return it when it may be routed. `None` when
    /// `before_creation` vetoed, or when `after_creation` vetoed the
    /// release (the entity then stays in the system).
    fn create_entity(&mut self, id: ComponentId, row: Option<&ArrivalRow>) -> Option<EntityId> {
        if !self.run_hook(id, HookPoint::BeforeCreation, None, None) {
            debug!(component = %self.components[id].name, "creation vetoed");
            return None;
        }

        let now = self.scheduler.now();
        let record = self.recording();
        let draw = self.rng.next_f64();
        let source = source_in(&mut self.components, id)?;
        let entity_type = match &source.class {
            ResolvedClass::Fixed(ty) => *ty,
            ResolvedClass::FromTable => row
                .and_then(|r| r.entity_type.as_deref())
                .map_or(DEFAULT_ENTITY_TYPE, |name| self.entities.types.intern(name)),
            ResolvedClass::Weighted(weights) => {
                let mut cumulative = 0.0;
                weights
                    .iter()
                    .find(|(_, w)| {
                        cumulative += w;
                        draw < cumulative
                    })
                    .or(weights.last())
                    .map_or(DEFAULT_ENTITY_TYPE, |(ty, _)| *ty)
            }
        };
        source.created += 1;
        let n = source.created;
        let is_parent = source.is_parent;
        let sequence_index = source.initial_sequence_index;
        if record {
            source.stats.entities_created += 1;
        }

        let name = format!("{}_Entity_{n}", self.entities.entity_type_name(entity_type));
        let entity = self.entities.create(entity_type, name, now);
        if let Some(e) = self.entities.get_mut(entity) {
            e.is_parent = is_parent;
            e.sequence_index = sequence_index;
            e.current_location = Some(id);
            if let Some(row) = row {
                e.attributes
                    .extend(row.attributes.iter().map(|(k, v)| (k.clone(), *v)));
            }
        }
        trace!(component = %self.components[id].name, entity = n, "entity created");

        if !self.run_hook(id, HookPoint::AfterCreation, Some(entity), None) {
            debug!(component = %self.components[id].name, "release vetoed after creation");
            return None;
        }
        Some(entity)
    }

    /// A source's entity left: an arrival deferred while blocked resumes.
    pub(crate) fn unblock_source(&mut self, id: ComponentId) {
        let Some(source) = source_in(&mut self.components, id) else {
            return;
        };
        source.blocked = false;
        if let Some(wait) = source.pending_wait.take() {
            self.scheduler
                .schedule_in(to_time(wait), Action::SourceArrival(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_must_sum_to_one() {
        assert!(check_weights(&[("A".into(), 0.25), ("B".into(), 0.75)]).is_ok());
        assert_eq!(check_weights(&[("A".into(), 0.5), ("B".into(), 0.4)]), Err(0.9));
        assert!(check_weights(&[("A".into(), 1.5), ("B".into(), -0.5)]).is_err());
    }

    #[test]
    fn table_rows_are_sorted() {
        let cfg = SourceConfig::table(vec![ArrivalRow::at(5.0), ArrivalRow::at(1.0).of_type("B")]);
        let ArrivalPattern::Table(rows) = cfg.arrivals else {
            panic!("expected a table");
        };
        assert_eq!(rows[0].time, 1.0);
        assert_eq!(rows[0].entity_type.as_deref(), Some("B"));
        assert_eq!(cfg.entity_class, EntityClass::FromTable);
    }
}
