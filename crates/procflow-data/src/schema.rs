//! On-disk description of a model topology.
//!
//! These structs are deserialized from RON, JSON or TOML and then resolved
//! into a [`Model`](procflow_core::model::Model) by
//! [`build_model`](crate::build::build_model). Components refer to each
//! other, to schedules and to worker pools by name.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use procflow_core::combiner::CombinationRule;
use procflow_core::component::Breakdown;
use procflow_core::config::ModelConfig;
use procflow_core::distribution::Distribution;
use procflow_core::queue::QueueDiscipline;
use procflow_core::routing::GroupStrategy;
use procflow_core::schedule::Weekday;
use procflow_core::vehicle::VehicleConfig;

fn one() -> usize {
    1
}

// ===========================================================================
// Top level
// ===========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyData {
    pub config: ModelConfig,
    pub schedules: Vec<ScheduleData>,
    pub worker_pools: Vec<WorkerPoolData>,
    pub storage_queues: Vec<StorageQueueData>,
    pub sources: Vec<SourceData>,
    pub servers: Vec<ProcessingData>,
    pub separators: Vec<ProcessingData>,
    pub combiners: Vec<CombinerData>,
    pub storages: Vec<StorageData>,
    pub sinks: Vec<SinkData>,
    pub vehicles: Vec<VehicleData>,
    pub vehicle_groups: Vec<VehicleGroupData>,
    pub routing_groups: Vec<RoutingGroupData>,
    pub connections: Vec<ConnectionData>,
    pub sequence: Option<SequenceData>,
}

// ===========================================================================
// Schedules and workers
// ===========================================================================

/// A weekly work schedule, given inline, as a CSV file, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleData {
    pub name: String,
    #[serde(default)]
    pub shifts: Vec<ShiftData>,
    /// `day,start_hour,start_minute,end_hour,end_minute,capacity` CSV,
    /// relative to the description file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftData {
    /// Days the shift applies to; every day when empty.
    #[serde(default)]
    pub days: Vec<Weekday>,
    pub start_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    pub end_hour: u32,
    #[serde(default)]
    pub end_minute: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolData {
    pub name: String,
    pub schedule: String,
    /// Worker ids. Without ids or a roster file, the pool is sized by the
    /// schedule's first shift.
    #[serde(default)]
    pub workers: Vec<String>,
    #[serde(default)]
    pub roster_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageQueueData {
    pub name: String,
    #[serde(default)]
    pub discipline: QueueDiscipline,
}

// ===========================================================================
// Components
// ===========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceData {
    pub name: String,
    pub interarrival: Option<Distribution>,
    /// Arrival-table CSV; takes precedence over `interarrival`.
    pub arrival_table: Option<PathBuf>,
    pub entity_type: Option<String>,
    /// Weighted entity types; weights sum to one.
    pub entity_weights: Vec<(String, f64)>,
    pub max_arrivals: Option<u64>,
    pub parents: bool,
    pub sequence_routing: bool,
    pub initial_sequence_index: usize,
    pub vehicle_group: Option<String>,
}

/// Settings shared by every processing component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub capacity: usize,
    pub processing_time: Distribution,
    pub processing_time_by_type: BTreeMap<String, Distribution>,
    pub breakdown: Option<Breakdown>,
    pub schedule: Option<String>,
    pub worker_pool: Option<String>,
    pub workers_required: usize,
    pub discipline: QueueDiscipline,
    pub storage_queues: Vec<String>,
    pub sequence_routing: bool,
    pub vehicle_group: Option<String>,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            capacity: one(),
            processing_time: Distribution::default(),
            processing_time_by_type: BTreeMap::new(),
            breakdown: None,
            schedule: None,
            worker_pool: None,
            workers_required: one(),
            discipline: QueueDiscipline::default(),
            storage_queues: Vec::new(),
            sequence_routing: false,
            vehicle_group: None,
        }
    }
}

/// A server or separator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingData {
    pub name: String,
    #[serde(default)]
    pub processing: ProcessingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinerData {
    pub name: String,
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub rules: Vec<CombinationRule>,
    #[serde(default = "one")]
    pub members_to_combine: usize,
    #[serde(default)]
    pub member_discipline: QueueDiscipline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageData {
    pub name: String,
    pub queue: String,
    #[serde(default)]
    pub processing: ProcessingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkData {
    pub name: String,
    #[serde(default)]
    pub processing: ProcessingSettings,
    /// Source that creates a new entity for every one destroyed here.
    #[serde(default)]
    pub retrigger: Option<String>,
    #[serde(default)]
    pub tally: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleData {
    pub name: String,
    #[serde(default)]
    pub vehicle: VehicleConfig,
}

// ===========================================================================
// Groups, connections, sequences
// ===========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleGroupData {
    pub name: String,
    pub vehicles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingGroupData {
    pub name: String,
    pub members: Vec<String>,
    #[serde(default)]
    pub strategy: GroupStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionData {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub transit_delay: Option<Distribution>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub vehicle_group: Option<String>,
}

/// Sequence-routing destinations, inline or from a CSV column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceData {
    pub destinations: Vec<String>,
    pub file: Option<PathBuf>,
    pub column: Option<String>,
}
