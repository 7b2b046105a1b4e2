//! Resolution pipeline: reads a topology file, resolves names and builds a
//! validated [`Model`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use procflow_core::combiner::CombinerConfig;
use procflow_core::component::ProcessingConfig;
use procflow_core::connection::ConnectOptions;
use procflow_core::id::{ComponentId, ScheduleId, WorkerPoolId};
use procflow_core::model::Model;
use procflow_core::routing::SequenceTable;
use procflow_core::schedule::{DAYS_PER_WEEK, Weekday, WorkScheduleDay};
use procflow_core::sink::SinkConfig;
use procflow_core::source::SourceConfig;
use procflow_core::storage::StorageConfig;
use procflow_core::worker::Worker;

use crate::loader::{DataLoadError, check_duplicate, deserialize_file, require_data_file, resolve_name};
use crate::schema::{ProcessingSettings, ScheduleData, SourceData, TopologyData};
use crate::tables::{
    load_arrival_table_csv, load_schedule_csv, load_sequence_table_csv, load_workers_csv,
};

/// Column read from a sequence CSV when none is named.
pub const DEFAULT_SEQUENCE_COLUMN: &str = "destination";

/// Base name looked up by [`load_model_dir`].
pub const MODEL_FILE_STEM: &str = "model";

/// Read and deserialize a topology description.
pub fn load_topology(path: &Path) -> Result<TopologyData, DataLoadError> {
    deserialize_file(path)
}

/// Load a topology description and build a validated model from it. Paths
/// inside the description are relative to its directory.
pub fn load_model(path: &Path) -> Result<Model, DataLoadError> {
    let topology = load_topology(path)?;
    build_model(&topology, path)
}

/// Load `model.{ron,toml,json}` from `dir`.
pub fn load_model_dir(dir: &Path) -> Result<Model, DataLoadError> {
    let path = require_data_file(dir, MODEL_FILE_STEM)?;
    load_model(&path)
}

/// Build a model from an already parsed description. `file` names the
/// description in errors; relative paths are resolved against its directory.
pub fn build_model(topology: &TopologyData, file: &Path) -> Result<Model, DataLoadError> {
    let mut builder = Builder {
        model: Model::new(topology.config.clone()),
        file,
        base: file.parent().map(Path::to_path_buf).unwrap_or_default(),
        schedules: HashMap::new(),
        pools: HashMap::new(),
    };
    builder.schedules(topology)?;
    builder.workers(topology)?;
    builder.components(topology)?;
    builder.groups(topology)?;
    builder.connections(topology)?;
    builder.sequence(topology)?;

    let mut model = builder.model;
    model.validate().map_err(DataLoadError::model(file))?;
    info!(
        file = %file.display(),
        components = model.components().count(),
        "model loaded"
    );
    Ok(model)
}

struct Builder<'a> {
    model: Model,
    file: &'a Path,
    base: PathBuf,
    schedules: HashMap<String, ScheduleId>,
    pools: HashMap<String, WorkerPoolId>,
}

impl Builder<'_> {
    fn path(&self, relative: &Path) -> PathBuf {
        self.base.join(relative)
    }

    fn component(&self, name: &str) -> Result<ComponentId, DataLoadError> {
        self.model
            .component_id(name)
            .ok_or_else(|| DataLoadError::UnresolvedRef {
                file: self.file.to_path_buf(),
                name: name.to_string(),
                expected_kind: "component",
            })
    }

    // -- Schedules and workers ----------------------------------------------

    fn week(&self, data: &ScheduleData) -> Result<[WorkScheduleDay; DAYS_PER_WEEK], DataLoadError> {
        let mut days: [WorkScheduleDay; DAYS_PER_WEEK] = match &data.file {
            Some(csv) => load_schedule_csv(&self.path(csv))?,
            None => Default::default(),
        };
        for shift in &data.shifts {
            let applies: &[Weekday] = if shift.days.is_empty() {
                &Weekday::ALL
            } else {
                &shift.days
            };
            for day in applies {
                days[day.index()]
                    .set_time(
                        shift.start_hour,
                        shift.start_minute,
                        shift.end_hour,
                        shift.end_minute,
                        shift.capacity,
                    )
                    .map_err(|error| DataLoadError::Schedule {
                        file: self.file.to_path_buf(),
                        name: data.name.clone(),
                        error,
                    })?;
            }
        }
        Ok(days)
    }

    fn schedules(&mut self, topology: &TopologyData) -> Result<(), DataLoadError> {
        for data in &topology.schedules {
            check_duplicate(&self.schedules, &data.name, self.file)?;
            let days = self.week(data)?;
            let id = self
                .model
                .add_schedule(days)
                .map_err(DataLoadError::model(self.file))?;
            self.schedules.insert(data.name.clone(), id);
        }
        Ok(())
    }

    fn workers(&mut self, topology: &TopologyData) -> Result<(), DataLoadError> {
        for queue in &topology.storage_queues {
            self.model.add_storage_queue(&queue.name, queue.discipline);
        }
        for data in &topology.worker_pools {
            check_duplicate(&self.pools, &data.name, self.file)?;
            let schedule = *resolve_name(&self.schedules, &data.schedule, self.file, "schedule")?;
            let mut roster: Vec<Worker> = match &data.roster_file {
                Some(csv) => load_workers_csv(&self.path(csv))?,
                None => Vec::new(),
            };
            roster.extend(data.workers.iter().map(Worker::new));
            let roster = (!roster.is_empty()).then_some(roster);
            let id = self
                .model
                .add_worker_pool(&data.name, schedule, roster)
                .map_err(DataLoadError::model(self.file))?;
            self.pools.insert(data.name.clone(), id);
        }
        Ok(())
    }

    // -- Components ---------------------------------------------------------

    fn processing(&self, settings: &ProcessingSettings) -> Result<ProcessingConfig, DataLoadError> {
        let mut config = ProcessingConfig::new(settings.processing_time.clone())
            .capacity(settings.capacity)
            .discipline(settings.discipline);
        for (entity_type, d) in &settings.processing_time_by_type {
            config = config.time_for_type(entity_type.clone(), d.clone());
        }
        if let Some(b) = &settings.breakdown {
            config = config.breakdown(b.time_between.clone(), b.duration.clone());
        }
        if let Some(name) = &settings.schedule {
            config = config.schedule(*resolve_name(&self.schedules, name, self.file, "schedule")?);
        }
        if let Some(name) = &settings.worker_pool {
            let pool = *resolve_name(&self.pools, name, self.file, "worker pool")?;
            config = config.workers(pool, settings.workers_required);
        }
        for queue in &settings.storage_queues {
            config = config.storage_queue(queue.clone());
        }
        if settings.sequence_routing {
            config = config.sequence_routing();
        }
        if let Some(group) = &settings.vehicle_group {
            config = config.vehicle_group(group.clone());
        }
        Ok(config)
    }

    fn source(&self, data: &SourceData) -> Result<SourceConfig, DataLoadError> {
        let mut config = match (&data.arrival_table, &data.interarrival) {
            (Some(csv), _) => SourceConfig::table(load_arrival_table_csv(&self.path(csv))?),
            (None, Some(d)) => SourceConfig::interarrival(d.clone()),
            (None, None) => SourceConfig::default(),
        };
        if let Some(entity_type) = &data.entity_type {
            config = config.entity_type(entity_type.clone());
        }
        if !data.entity_weights.is_empty() {
            config = config.weighted(data.entity_weights.clone());
        }
        if let Some(n) = data.max_arrivals {
            config = config.max_arrivals(n);
        }
        if data.parents {
            config = config.parents();
        }
        if data.sequence_routing {
            config = config.sequence_routing(data.initial_sequence_index);
        }
        if let Some(group) = &data.vehicle_group {
            config = config.vehicle_group(group.clone());
        }
        Ok(config)
    }

    fn components(&mut self, topology: &TopologyData) -> Result<(), DataLoadError> {
        let err = DataLoadError::model;
        for data in &topology.sources {
            let config = self.source(data)?;
            self.model.add_source(&data.name, config).map_err(err(self.file))?;
        }
        for data in &topology.servers {
            let config = self.processing(&data.processing)?;
            self.model.add_server(&data.name, config).map_err(err(self.file))?;
        }
        for data in &topology.separators {
            let config = self.processing(&data.processing)?;
            self.model.add_separator(&data.name, config).map_err(err(self.file))?;
        }
        for data in &topology.combiners {
            let mut config = data.rules.iter().fold(
                CombinerConfig::new(self.processing(&data.processing)?),
                |c, rule| c.rule(rule.entity_type.clone(), rule.count),
            );
            if data.rules.is_empty() {
                config = config.members_to_combine(data.members_to_combine);
            }
            config.member_discipline = data.member_discipline;
            self.model.add_combiner(&data.name, config).map_err(err(self.file))?;
        }
        for data in &topology.storages {
            let config = StorageConfig::new(data.queue.clone())
                .processing(self.processing(&data.processing)?);
            self.model.add_storage(&data.name, config).map_err(err(self.file))?;
        }
        for data in &topology.sinks {
            let mut config = SinkConfig {
                processing: self.processing(&data.processing)?,
                ..SinkConfig::default()
            };
            if let Some(source) = &data.retrigger {
                config = config.retrigger(source.clone());
            }
            if let Some(tally) = &data.tally {
                config = config.tally(tally.clone());
            }
            self.model.add_sink(&data.name, config).map_err(err(self.file))?;
        }
        for data in &topology.vehicles {
            self.model
                .add_vehicle(&data.name, data.vehicle.clone())
                .map_err(err(self.file))?;
        }
        debug!(components = self.model.components().count(), "components added");
        Ok(())
    }

    // -- Wiring -------------------------------------------------------------

    fn groups(&mut self, topology: &TopologyData) -> Result<(), DataLoadError> {
        for group in &topology.vehicle_groups {
            let vehicles = group
                .vehicles
                .iter()
                .map(|v| self.component(v))
                .collect::<Result<Vec<_>, _>>()?;
            self.model
                .add_vehicle_group(&group.name, &vehicles)
                .map_err(DataLoadError::model(self.file))?;
        }
        for group in &topology.routing_groups {
            let members = group
                .members
                .iter()
                .map(|m| self.component(m))
                .collect::<Result<Vec<_>, _>>()?;
            self.model
                .add_routing_group(&group.name, &members, group.strategy)
                .map_err(DataLoadError::model(self.file))?;
        }
        Ok(())
    }

    fn connections(&mut self, topology: &TopologyData) -> Result<(), DataLoadError> {
        for edge in &topology.connections {
            let from = self.component(&edge.from)?;
            let to = self.component(&edge.to)?;
            let options = ConnectOptions {
                probability: edge.probability,
                transit_delay: edge.transit_delay.clone(),
                entity_type: edge.entity_type.clone(),
                vehicle_group: edge.vehicle_group.clone(),
            };
            self.model
                .connect(from, to, options)
                .map_err(DataLoadError::model(self.file))?;
        }
        Ok(())
    }

    fn sequence(&mut self, topology: &TopologyData) -> Result<(), DataLoadError> {
        let Some(sequence) = &topology.sequence else {
            return Ok(());
        };
        let mut destinations = match &sequence.file {
            Some(csv) => {
                let column = sequence.column.as_deref().unwrap_or(DEFAULT_SEQUENCE_COLUMN);
                load_sequence_table_csv(&self.path(csv), column)?
                    .iter()
                    .map(str::to_string)
                    .collect()
            }
            None => Vec::new(),
        };
        destinations.extend(sequence.destinations.iter().cloned());
        self.model.set_sequence_table(SequenceTable::new(destinations));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procflow_core::component::ComponentType;
    use std::fs;
    use tempfile::TempDir;

    const PIPELINE_JSON: &str = r#"{
        "config": { "duration": 200.0, "seed": 4 },
        "sources": [{ "name": "In", "interarrival": { "kind": "constant", "value": 10.0 } }],
        "servers": [{ "name": "Work", "processing": { "processing_time": { "kind": "constant", "value": 4.0 } } }],
        "sinks": [{ "name": "Out" }],
        "connections": [{ "from": "In", "to": "Work" }, { "from": "Work", "to": "Out" }]
    }"#;

    #[test]
    fn builds_and_runs_a_pipeline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, PIPELINE_JSON).unwrap();

        let mut model = load_model_dir(dir.path()).unwrap();
        assert_eq!(model.components().count(), 3);
        let work = model.component_id("Work").unwrap();
        assert_eq!(model.component(work).unwrap().component_type(), ComponentType::Server);
        model.run().unwrap();
        let out = model.component_id("Out").unwrap();
        assert_eq!(model.sink(out).unwrap().core.stats.number_entered, 19);
    }

    #[test]
    fn unknown_connection_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, PIPELINE_JSON.replace(r#""to": "Out""#, r#""to": "Nowhere""#)).unwrap();
        match load_model(&path) {
            Err(DataLoadError::UnresolvedRef { name, expected_kind, .. }) => {
                assert_eq!(name, "Nowhere");
                assert_eq!(expected_kind, "component");
            }
            other => panic!("expected unresolved reference, got {:?}", other.err()),
        }
    }

    #[test]
    fn bad_probabilities_fail_validation() {
        let topology: TopologyData = serde_json::from_str(
            r#"{
                "sources": [{ "name": "In" }],
                "sinks": [{ "name": "A" }, { "name": "B" }],
                "connections": [
                    { "from": "In", "to": "A", "probability": 30.0 },
                    { "from": "In", "to": "B", "probability": 30.0 }
                ]
            }"#,
        )
        .unwrap();
        let err = build_model(&topology, Path::new("inline.json")).unwrap_err();
        assert!(matches!(err, DataLoadError::Model { .. }));
        assert!(err.to_string().contains("sum to 60"));
    }

    #[test]
    fn schedules_pools_and_csv_tables() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("shifts.csv"),
            "day,start_hour,start_minute,end_hour,end_minute,capacity\nSaturday,9,0,13,0,1\n",
        )
        .unwrap();
        fs::write(dir.path().join("crew.csv"), "id\nAda\nBo\n").unwrap();
        fs::write(dir.path().join("orders.csv"), "time,entity_type\n0,Rush\n5,Plain\n").unwrap();
        let path = dir.path().join("model.toml");
        fs::write(
            &path,
            r#"
            [config]
            duration = 1440.0

            [[schedules]]
            name = "Week"
            file = "shifts.csv"
            shifts = [{ days = ["Monday", "Tuesday"], start_hour = 8, end_hour = 16, capacity = 2 }]

            [[worker_pools]]
            name = "Crew"
            schedule = "Week"
            roster_file = "crew.csv"
            workers = ["Cy"]

            [[sources]]
            name = "Orders"
            arrival_table = "orders.csv"

            [[servers]]
            name = "Pick"
            processing = { worker_pool = "Crew", workers_required = 2, processing_time = { kind = "constant", value = 1.0 } }

            [[sinks]]
            name = "Done"

            [[connections]]
            from = "Orders"
            to = "Pick"

            [[connections]]
            from = "Pick"
            to = "Done"
            "#,
        )
        .unwrap();

        let mut model = load_model(&path).unwrap();
        let (_, pool) = model.worker_pools().next().unwrap();
        let ids: Vec<&str> = pool.workers().iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, ["Ada", "Bo", "Cy"]);

        model.run().unwrap();
        let done = model.component_id("Done").unwrap();
        assert_eq!(model.sink(done).unwrap().core.stats.number_entered, 2);
        let rush = model.entities().types.get("Rush");
        assert!(rush.is_some());
    }

    #[test]
    fn unknown_schedule_reference() {
        let topology: TopologyData = serde_json::from_str(
            r#"{ "worker_pools": [{ "name": "Crew", "schedule": "Night" }] }"#,
        )
        .unwrap();
        assert!(matches!(
            build_model(&topology, Path::new("inline.json")),
            Err(DataLoadError::UnresolvedRef { expected_kind: "schedule", .. })
        ));
    }

    #[test]
    fn duplicate_schedule_names() {
        let topology: TopologyData = serde_json::from_str(
            r#"{ "schedules": [{ "name": "Day" }, { "name": "Day" }] }"#,
        )
        .unwrap();
        assert!(matches!(
            build_model(&topology, Path::new("inline.json")),
            Err(DataLoadError::DuplicateName { .. })
        ));
    }

    #[test]
    fn sequence_from_inline_list() {
        let topology: TopologyData = serde_json::from_str(
            r#"{
                "sources": [{ "name": "In", "sequence_routing": true }],
                "servers": [{ "name": "Lathe", "processing": { "sequence_routing": true } }],
                "sinks": [{ "name": "Done" }],
                "sequence": { "destinations": ["Lathe", "Done"] }
            }"#,
        )
        .unwrap();
        let model = build_model(&topology, Path::new("inline.json")).unwrap();
        let table = model.sequence_table();
        assert_eq!(table.iter().collect::<Vec<_>>(), ["Lathe", "Done"]);

        let bad: TopologyData =
            serde_json::from_str(r#"{ "sequence": { "destinations": ["Nowhere"] } }"#).unwrap();
        assert!(matches!(
            build_model(&bad, Path::new("inline.json")),
            Err(DataLoadError::Model { .. })
        ));
    }
}
