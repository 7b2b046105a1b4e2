//! End-of-run statistics keyed by `(type, name, statistic)`.
//!
//! A [`PivotTable`] holds one value per replication for every key.
//! [`PivotTable::collect`] reads a finished [`Model`]; [`PivotTable::merge`]
//! appends the replications of another table.

use std::collections::BTreeMap;
use std::fmt;

use procflow_core::component::{
    ComponentKind, ComponentType, HasCombinerStats, HasProcessingStats, HasQueueStats,
    HasSeparatorStats, HasTransportStats,
};
use procflow_core::entity::TimeInSystem;
use procflow_core::fixed::time_to_f64;
use procflow_core::model::Model;
use procflow_core::tally::TallyStatistic;
use serde::{Deserialize, Serialize};

use crate::utilization::{scheduled_utilization, starving, units_utilized};

// ---------------------------------------------------------------------------
// Keys and rows
// ---------------------------------------------------------------------------

/// What a pivot row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowType {
    /// Model-wide entity population.
    Entity,
    /// One entity type.
    EntityType,
    Component(ComponentType),
    Worker,
    Tally,
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowType::Component(ty) => write!(f, "{ty}"),
            RowType::Entity => f.write_str("Entity"),
            RowType::EntityType => f.write_str("EntityType"),
            RowType::Worker => f.write_str("Worker"),
            RowType::Tally => f.write_str("Tally"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatKey {
    pub row_type: RowType,
    pub name: String,
    pub stat: String,
}

impl StatKey {
    pub fn new(row_type: RowType, name: impl Into<String>, stat: impl Into<String>) -> Self {
        Self {
            row_type,
            name: name.into(),
            stat: stat.into(),
        }
    }
}

/// A flattened pivot entry, aggregated over replications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotRow {
    #[serde(rename = "Type")]
    pub row_type: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Stat")]
    pub stat: String,
    #[serde(rename = "Average")]
    pub average: f64,
    #[serde(rename = "Minimum")]
    pub minimum: f64,
    #[serde(rename = "Maximum")]
    pub maximum: f64,
}

// ---------------------------------------------------------------------------
// PivotTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotTable {
    values: BTreeMap<StatKey, Vec<f64>>,
    replications: usize,
}

impl PivotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every statistic of a finished run as one replication.
    pub fn collect(model: &Model) -> Self {
        let mut table = Collector {
            table: Self::new(),
            warm_up: time_to_f64(model.warm_up()),
            effective_time: model.observed_time(),
        };
        table.entities(model);
        table.components(model);
        table.workers(model);
        table.tallies(model);
        let mut table = table.table;
        table.replications = 1;
        table
    }

    /// Collect each model and merge the results.
    pub fn from_replications<'a>(models: impl IntoIterator<Item = &'a Model>) -> Self {
        let mut table = Self::new();
        for model in models {
            table.merge(&Self::collect(model));
        }
        table
    }

    /// Append one value for `key`.
    pub fn record(&mut self, key: StatKey, value: f64) {
        self.values.entry(key).or_default().push(value);
    }

    /// Append the replications of `other`.
    pub fn merge(&mut self, other: &PivotTable) {
        for (key, values) in &other.values {
            self.values
                .entry(key.clone())
                .or_default()
                .extend_from_slice(values);
        }
        self.replications += other.replications;
    }

    pub fn replications(&self) -> usize {
        self.replications
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StatKey, &[f64])> {
        self.values.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn values(&self, key: &StatKey) -> Option<&[f64]> {
        self.values.get(key).map(Vec::as_slice)
    }

    pub fn mean(&self, key: &StatKey) -> Option<f64> {
        let values = self.values(key).filter(|v| !v.is_empty())?;
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn min(&self, key: &StatKey) -> Option<f64> {
        self.values(key)?.iter().copied().reduce(f64::min)
    }

    pub fn max(&self, key: &StatKey) -> Option<f64> {
        self.values(key)?.iter().copied().reduce(f64::max)
    }

    /// Mean of `(row_type, name, stat)`.
    pub fn get(&self, row_type: RowType, name: &str, stat: &str) -> Option<f64> {
        self.mean(&StatKey::new(row_type, name, stat))
    }

    /// All rows of one component, entity type, worker or tally.
    pub fn rows_for<'a>(&'a self, row_type: RowType, name: &'a str) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        self.values
            .iter()
            .filter(move |(k, _)| k.row_type == row_type && k.name == name)
            .filter_map(move |(k, _)| Some((k.stat.as_str(), self.mean(k)?)))
    }

    /// Average, minimum and maximum per key, in key order.
    pub fn to_rows(&self) -> Vec<PivotRow> {
        self.values
            .keys()
            .filter_map(|key| {
                Some(PivotRow {
                    row_type: key.row_type.to_string(),
                    name: key.name.clone(),
                    stat: key.stat.clone(),
                    average: self.mean(key)?,
                    minimum: self.min(key)?,
                    maximum: self.max(key)?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

struct Collector {
    table: PivotTable,
    warm_up: f64,
    effective_time: f64,
}

impl Collector {
    fn put(&mut self, row_type: RowType, name: &str, stat: &str, value: f64) {
        self.table.record(StatKey::new(row_type, name, stat), value);
    }

    fn time_in_system(&mut self, row_type: RowType, name: &str, tis: &TimeInSystem) {
        self.put(row_type, name, "TimeInSystem (average)", tis.average().unwrap_or(0.0));
        self.put(row_type, name, "TimeInSystem (max)", tis.max.unwrap_or(0.0));
        self.put(row_type, name, "TimeInSystem (min)", tis.min.unwrap_or(0.0));
    }

    fn entities(&mut self, model: &Model) {
        let em = model.entities();
        let now = model.now();
        let row = RowType::Entity;
        self.put(row, "Entity", "NumberCreated", em.number_created() as f64);
        self.put(row, "Entity", "NumberDestroyed", em.number_destroyed() as f64);
        self.put(row, "Entity", "NumberInSystem (average)", em.avg_number_in_system(now));
        self.put(row, "Entity", "NumberRemaining", em.number_in_system() as f64);
        self.time_in_system(row, "Entity", em.time_in_system());

        if !model.config().collect_entity_type_stats {
            return;
        }
        let averages = em.avg_number_per_type(now);
        for (ty, stats) in em.type_stats_iter() {
            let name = em.entity_type_name(ty);
            let row = RowType::EntityType;
            self.put(row, name, "NumberCreated", stats.number_created as f64);
            self.put(row, name, "NumberDestroyed", stats.number_destroyed as f64);
            self.put(row, name, "NumberRemaining", stats.number_remaining as f64);
            let avg = averages.get(&ty).copied().unwrap_or(0.0);
            self.put(row, name, "NumberInSystem (average)", avg);
            self.time_in_system(row, name, &stats.time_in_system);
        }
    }

    fn components(&mut self, model: &Model) {
        for (_, component) in model.components() {
            let name = component.name.as_str();
            let row = RowType::Component(component.component_type());
            match &component.kind {
                ComponentKind::Source(s) => {
                    self.put(row, name, "NumberCreated", s.stats.entities_created as f64);
                    self.put(row, name, "NumberExited", s.stats.number_exited as f64);
                }
                ComponentKind::Server(s) => self.processing(row, name, s),
                ComponentKind::Storage(s) => self.processing(row, name, s),
                ComponentKind::Separator(s) => {
                    self.processing(row, name, s);
                    self.put(row, name, "ParentsExited", s.number_parents_exited() as f64);
                    self.put(row, name, "MembersExited", s.number_members_exited() as f64);
                }
                ComponentKind::Combiner(c) => {
                    self.processing(row, name, c);
                    let members = &c.stats.member_queue_lengths;
                    let avg_members = if members.is_empty() {
                        0.0
                    } else {
                        members.iter().map(|&(_, l)| l as f64).sum::<f64>() / members.len() as f64
                    };
                    let max_members = members.iter().map(|&(_, l)| l).max().unwrap_or(0);
                    let times = c.member_queue_times();
                    let avg_time = if times.is_empty() {
                        0.0
                    } else {
                        times.iter().sum::<f64>() / times.len() as f64
                    };
                    self.put(row, name, "ParentsEntered", c.number_parents_entered() as f64);
                    self.put(row, name, "MembersEntered", c.number_members_entered() as f64);
                    self.put(row, name, "CombinedExited", c.number_combined_exited() as f64);
                    self.put(row, name, "MembersInQueue (average)", avg_members);
                    self.put(row, name, "MembersInQueue (max)", max_members as f64);
                    self.put(row, name, "Members TimeInQueue (average)", avg_time);
                    self.put(
                        row,
                        name,
                        "Members TimeInQueue (max)",
                        times.iter().copied().fold(0.0, f64::max),
                    );
                }
                ComponentKind::Sink(s) => {
                    self.put(row, name, "NumberEntered", s.core.stats.number_entered as f64);
                    self.time_in_system(row, name, &s.stats.time_in_system);
                    self.tally_rows(row, name, "NumTimesProcessed", &s.stats.tally);
                }
                ComponentKind::Vehicle(v) => {
                    self.queue(row, name, v);
                    let trips = v.total_trips();
                    let util = if trips > 0 {
                        scheduled_utilization(v.utilized_time(), self.effective_time, v.trip_capacity)
                    } else {
                        0.0
                    };
                    let (scheduled, total) = starving(util, v.utilized_time());
                    let avg_travel = if trips > 0 {
                        v.total_travel_time() / trips as f64
                    } else {
                        0.0
                    };
                    self.put(row, name, "EntitiesTransported", v.entities_transported() as f64);
                    self.put(row, name, "TotalTrips", trips as f64);
                    self.put(row, name, "TravelTime (average)", avg_travel);
                    self.put(row, name, "TravelTime (total)", v.total_travel_time());
                    self.put(row, name, "ScheduledUtilization", util);
                    self.put(row, name, "StarvingTime (scheduled)", scheduled);
                    self.put(row, name, "StarvingTime (total)", total);
                    self.put(
                        row,
                        name,
                        "UnitsUtilized",
                        units_utilized(v.trips_over_time(), v.vehicle_capacity, self.warm_up),
                    );
                }
            }
        }
    }

    fn queue<Q: HasQueueStats>(&mut self, row: RowType, name: &str, q: &Q) {
        self.put(row, name, "EntitiesInQueue (average)", q.avg_queue_length());
        self.put(row, name, "EntitiesInQueue (max)", q.max_queue_length() as f64);
        self.put(row, name, "TimeInQueue (average)", q.avg_time_in_queue());
        self.put(row, name, "TimeInQueue (max)", q.max_time_in_queue());
    }

    fn processing<P: HasProcessingStats + HasQueueStats>(&mut self, row: RowType, name: &str, p: &P) {
        self.queue(row, name, p);
        let stats = p.processing_stats();
        let processed = stats.total_entities_processed;
        let (util, avg_processing) = if processed > 0 {
            (
                scheduled_utilization(stats.total_processing_time, self.effective_time, p.capacity()),
                stats.total_processing_time / processed as f64,
            )
        } else {
            (0.0, 0.0)
        };
        let (scheduled, total) = starving(util, stats.total_processing_time);
        self.put(row, name, "EntitiesInQueue (total)", stats.number_entered as f64);
        self.put(row, name, "EntitiesProcessed", processed as f64);
        self.put(row, name, "NumberDowntimes", stats.number_downtimes as f64);
        self.put(row, name, "ScheduledUtilization", util);
        self.put(row, name, "StarvingTime (scheduled)", scheduled);
        self.put(row, name, "StarvingTime (total)", total);
        self.put(row, name, "TimeProcessing (average)", avg_processing);
        self.put(row, name, "TimeProcessing (total)", stats.total_processing_time);
        self.put(row, name, "TotalDowntime", stats.total_downtime);
        self.put(
            row,
            name,
            "UnitsUtilized",
            units_utilized(&stats.units_utilized_over_time, p.capacity(), self.warm_up),
        );
    }

    /// `Min`/`Max`/`Average` of a tally; nothing for an empty one.
    fn tally_rows(&mut self, row: RowType, name: &str, prefix: &str, tally: &TallyStatistic) {
        let (Some(min), Some(max), Some(mean)) = (tally.min(), tally.max(), tally.mean()) else {
            return;
        };
        let label = |s: &str| if prefix.is_empty() { s.to_string() } else { format!("{prefix} ({s})") };
        self.put(row, name, &label("Min"), min);
        self.put(row, name, &label("Max"), max);
        self.put(row, name, &label("Average"), mean);
    }

    fn workers(&mut self, model: &Model) {
        let now = model.now();
        let sim_time = time_to_f64(now);
        for (_, pool) in model.worker_pools() {
            for worker in pool.workers() {
                let name = format!("{}/{}", pool.name, worker.id);
                self.put(RowType::Worker, &name, "Allocations", worker.allocations as f64);
                self.put(RowType::Worker, &name, "TotalBusyTime", worker.total_busy_time);
                self.put(
                    RowType::Worker,
                    &name,
                    "Utilization",
                    worker.utilization(sim_time, now) * 100.0,
                );
            }
        }
    }

    fn tallies(&mut self, model: &Model) {
        for (name, tally) in model.tallies().iter() {
            self.tally_rows(RowType::Tally, name, "", tally);
        }
    }
}
