//! Replication studies: several seeds of one model merged into a pivot
//! table, with a rolling history of the replication values.

use procflow_core::component::ComponentType;
use procflow_core::model::Model;
use procflow_core::test_utils::*;
use procflow_stats::{PivotTable, ReplicationHistory, RowType, StatKey};

fn contended_run(seed: u64) -> Model {
    let mut m = model(2_000.0, seed);
    build_contended(&mut m, 3, 2, 1, exponential(2.0));
    m.run().unwrap();
    m
}

fn sink_key() -> StatKey {
    StatKey::new(RowType::Component(ComponentType::Sink), "Sink", "NumberEntered")
}

#[test]
fn merged_table_aggregates_every_replication() {
    let runs: Vec<Model> = (1..=5).map(contended_run).collect();
    let merged = PivotTable::from_replications(&runs);
    assert_eq!(merged.replications(), 5);

    let per_run: Vec<f64> = runs
        .iter()
        .map(|m| PivotTable::collect(m).mean(&sink_key()).unwrap())
        .collect();
    assert_eq!(merged.values(&sink_key()).unwrap(), per_run.as_slice());
    let mean = per_run.iter().sum::<f64>() / per_run.len() as f64;
    assert!((merged.mean(&sink_key()).unwrap() - mean).abs() < 1e-9);

    let rows = merged.to_rows();
    let row = rows
        .iter()
        .find(|r| r.row_type == "Sink" && r.name == "Sink" && r.stat == "NumberEntered")
        .unwrap();
    assert!(row.minimum <= row.average && row.average <= row.maximum);
}

#[test]
fn worker_rows_cover_the_whole_crew() {
    let merged = PivotTable::from_replications(&[contended_run(8), contended_run(9)]);
    for id in ["Crew/Worker_1", "Crew/Worker_2"] {
        let util = merged.get(RowType::Worker, id, "Utilization").unwrap();
        assert!((0.0..=100.0).contains(&util), "{id}: {util}");
        assert_eq!(merged.values(&StatKey::new(RowType::Worker, id, "Allocations")).unwrap().len(), 2);
    }
    let stations: Vec<_> = merged
        .rows_for(RowType::Component(ComponentType::Server), "Station1")
        .map(|(stat, _)| stat.to_string())
        .collect();
    assert!(stations.iter().any(|s| s == "EntitiesProcessed"));
    assert!(stations.iter().any(|s| s == "ScheduledUtilization"));
}

#[test]
fn history_keeps_the_latest_replications() {
    let mut history = ReplicationHistory::new(3);
    let mut recent = Vec::new();
    for seed in 1..=5 {
        let table = PivotTable::collect(&contended_run(seed));
        recent.push(table.mean(&sink_key()).unwrap());
        history.record(&table);
    }

    let series = history.series(&sink_key()).unwrap();
    assert_eq!(series.len(), 3);
    assert!(series.is_full());
    assert_eq!(history.latest(&sink_key()), recent.last().copied());

    // Counts are integers, so the fixed-point mean of the last three is exact
    // to well under one unit.
    let expected = recent[2..].iter().sum::<f64>() / 3.0;
    assert!((history.moving_average(&sink_key()).unwrap() - expected).abs() < 1e-6);
    let drift = history.drift(&sink_key()).unwrap();
    assert!((drift - (recent[4] - recent[2])).abs() < 1e-6);
}

#[test]
fn identical_seeds_leave_no_drift() {
    let mut history = ReplicationHistory::new(4);
    for _ in 0..4 {
        history.record(&PivotTable::collect(&contended_run(3)));
    }
    assert_eq!(history.drift(&sink_key()), Some(0.0));
    let latest = history.latest(&sink_key()).unwrap();
    assert_eq!(history.moving_average(&sink_key()), Some(latest));
}
