//! End-to-end scenarios for the Procflow core engine.
//!
//! Each test builds a small network with the shared helpers, runs it, and
//! checks the statistics a modeller would look at.

use procflow_core::combiner::CombinerConfig;
use procflow_core::component::{
    HasCombinerStats, HasProcessingStats, HasSeparatorStats, HasTransportStats, ProcessingConfig,
};
use procflow_core::connection::ConnectOptions;
use procflow_core::hooks::HookPoint;
use procflow_core::model::{Model, ModelError};
use procflow_core::routing::{GroupStrategy, RouteDecision, SequenceTable};
use procflow_core::sink::SinkConfig;
use procflow_core::source::{ArrivalRow, SourceConfig};
use procflow_core::storage::StorageConfig;
use procflow_core::test_utils::*;
use procflow_core::vehicle::VehicleConfig;

fn sink_entered(m: &Model, name: &str) -> u64 {
    let id = m.component_id(name).unwrap();
    m.sink(id).unwrap().core.stats.number_entered
}

fn processed(m: &Model, name: &str) -> u64 {
    let id = m.component_id(name).unwrap();
    m.component(id)
        .and_then(|c| c.core())
        .map_or(0, |core| core.stats.total_entities_processed)
}

// ===========================================================================
// Basic flow
// ===========================================================================

#[test]
fn pipeline_moves_entities_to_the_sink() {
    let mut m = model(1_000.0, 42);
    let p = build_pipeline(&mut m, exponential(5.0), constant(4.0));
    m.run().unwrap();

    let created = m.source(p.source).unwrap().stats.entities_created;
    let entered = m.sink(p.sink).unwrap().core.stats.number_entered;
    assert!(created > 100, "created only {created}");
    assert!(entered <= created);
    // At most the entity in service and those queued behind it are missing.
    let server = m.server(p.server).unwrap();
    assert_eq!(
        created - entered,
        (server.core.busy_slots() + server.core.queue.len()) as u64
    );
    assert!(server.total_entities_processed() >= entered);
    assert_eq!(m.now(), m.duration());
}

#[test]
fn warm_up_excludes_early_statistics() {
    let mut m = Model::new(
        procflow_core::config::ModelConfig::new(200.0)
            .warm_up(100.0)
            .seed(1),
    );
    let source = add_source(&mut m, "Source", constant(10.0));
    let server = add_server(&mut m, "Server", 1, constant(1.0));
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, server);
    connect(&mut m, server, sink);
    m.run().unwrap();

    // Arrivals at 100, 110, ..., 200.
    assert_eq!(m.source(source).unwrap().stats.entities_created, 11);
    assert_eq!(m.server(server).unwrap().number_entered(), 11);
    // The entity created at 200 has not reached the sink.
    let tis = &m.sink(sink).unwrap().stats.time_in_system;
    assert_eq!(tis.count, 10);
    assert_eq!(tis.average(), Some(1.0));
}

#[test]
fn closed_source_drains_completely() {
    let mut m = model(10_000.0, 3);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(2.0)).max_arrivals(50),
        )
        .unwrap();
    let server = add_server(&mut m, "Server", 2, exponential(3.0));
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, server);
    connect(&mut m, server, sink);
    m.run().unwrap();

    let entities = m.entities();
    assert_eq!(entities.total_created(), 50);
    assert_eq!(entities.total_destroyed(), 50);
    assert_eq!(entities.number_in_system(), 0);
    assert_eq!(sink_entered(&m, "Sink"), 50);
}

#[test]
fn transit_delay_adds_to_time_in_system() {
    let mut m = model(100.0, 9);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(10.0)).max_arrivals(3),
        )
        .unwrap();
    let sink = m.add_sink("Sink", SinkConfig::default().tally("tis")).unwrap();
    m.connect(source, sink, ConnectOptions::default().delay(constant(5.0)))
        .unwrap();
    m.run().unwrap();

    let tally = m.tallies().get("tis").unwrap();
    assert_eq!(tally.count(), 3);
    assert_eq!(tally.mean(), Some(5.0));
    let conn = m.connections().next().unwrap().1;
    assert_eq!(conn.stats.entities_processed, 3);
    assert_eq!(conn.in_transit(), 0);
}

#[test]
fn identical_seeds_give_identical_runs() {
    let run = |seed| {
        let mut m = model(2_000.0, seed);
        build_chain(&mut m, 3, exponential(4.0), exponential(3.0));
        m.run().unwrap();
        let tis = m.sink(m.component_id("Sink").unwrap()).unwrap().stats.time_in_system.clone();
        (m.events_processed(), tis.count, tis.total)
    };
    assert_eq!(run(11), run(11));
    assert_ne!(run(11), run(12));
}

// ===========================================================================
// Schedules and workers
// ===========================================================================

#[test]
fn work_schedule_gates_processing() {
    let mut m = model(3.0 * 1440.0, 5);
    let shift = daily_shift(&mut m, 9, 17, 1);
    let source = add_source(&mut m, "Source", constant(30.0));
    let server = m
        .add_server("Desk", ProcessingConfig::new(constant(4.0)).schedule(shift))
        .unwrap();
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, server);
    connect(&mut m, server, sink);
    m.run().unwrap();

    let starts: Vec<f64> = m
        .server(server)
        .unwrap()
        .units_utilized_over_time()
        .iter()
        .map(|&(start, _, _)| start)
        .collect();
    assert!(!starts.is_empty());
    for start in starts {
        let minute_of_day = start % 1440.0;
        assert!(
            (540.0..1020.0).contains(&minute_of_day),
            "processing started at {start}, outside 09:00-17:00"
        );
    }
}

#[test]
fn shared_crew_never_deadlocks() {
    let mut m = model(500.0, 8);
    let stations = build_contended(&mut m, 2, 3, 2, constant(5.0));
    let pool_id = m.worker_pools().next().unwrap().0;

    while m.step().unwrap() {
        let pool = m.worker_pool(pool_id).unwrap();
        assert!(pool.locked_count() <= 3);
        assert!(pool.is_consistent());
    }

    for station in stations {
        assert!(m.server(station).unwrap().total_entities_processed() > 0);
    }
}

#[test]
fn off_shift_workers_block_processing() {
    let mut m = model(1440.0, 2);
    let schedule = daily_shift(&mut m, 8, 12, 2);
    let pool = m.add_worker_pool("Crew", schedule, None).unwrap();
    let source = add_source(&mut m, "Source", constant(20.0));
    let server = m
        .add_server(
            "Assembly",
            ProcessingConfig::new(constant(10.0)).workers(pool, 2),
        )
        .unwrap();
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, server);
    connect(&mut m, server, sink);
    m.run().unwrap();

    let starts = m.server(server).unwrap().units_utilized_over_time();
    assert!(!starts.is_empty());
    assert!(starts.iter().all(|&(s, _, _)| (480.0..720.0).contains(&s)));
    assert!(m.worker_pool(pool).unwrap().is_consistent());
}

// ===========================================================================
// Batching
// ===========================================================================

fn pallets_and_parts(m: &mut Model) {
    let pallets = m
        .add_source(
            "Pallets",
            SourceConfig::interarrival(constant(5.0))
                .entity_type("Pallet")
                .parents(),
        )
        .unwrap();
    let parts = add_typed_source(m, "Parts", constant(2.0), "A");
    let combiner = add_combiner(m, "Packer", constant(1.0), &[("A", 2)]);
    connect(m, pallets, combiner);
    connect(m, parts, combiner);
}

#[test]
fn combiner_waits_for_its_rule() {
    let mut m = model(600.0, 4);
    pallets_and_parts(&mut m);
    let combiner = m.component_id("Packer").unwrap();
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, combiner, sink);
    m.set_hook(combiner, HookPoint::AfterProcessing, |ctx| {
        let size = ctx.entity.as_ref().map_or(0, |e| e.batch_members.len());
        let smallest = ctx.state.get("smallest").map_or(size as f64, |s| s.min(size as f64));
        ctx.state.set("smallest", smallest);
        Ok(true)
    })
    .unwrap();
    m.run().unwrap();

    assert_eq!(m.state().get("smallest"), Some(2.0));
    let packer = m.combiner(combiner).unwrap();
    assert!(packer.number_combined_exited() > 0);
    assert!(packer.number_parents_entered() >= packer.number_combined_exited());
    // Parts arrive faster than pallets consume them.
    assert!(packer.member_queue_length() > 0);

    let e = m.entities();
    assert_eq!(e.total_created(), e.total_destroyed() + e.number_in_system() as u64);
}

#[test]
fn separator_releases_members_before_the_parent() {
    let mut m = model(600.0, 4);
    pallets_and_parts(&mut m);
    let combiner = m.component_id("Packer").unwrap();
    let separator = m
        .add_separator("Unpacker", ProcessingConfig::new(constant(2.0)))
        .unwrap();
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, combiner, separator);
    connect(&mut m, separator, sink);
    m.run().unwrap();

    let unpacker = m.separator(separator).unwrap();
    let parents = unpacker.number_parents_exited();
    let members = unpacker.number_members_exited();
    assert!(parents > 0);
    assert!(members >= 2 * parents);
    assert!(members <= 2 * (parents + 1));
}

// ===========================================================================
// Routing
// ===========================================================================

#[test]
fn sequence_table_drives_the_route() {
    let mut m = model(1_000.0, 6);
    m.add_source(
        "Orders",
        SourceConfig::interarrival(constant(10.0))
            .max_arrivals(5)
            .sequence_routing(0),
    )
    .unwrap();
    for (name, service) in [("Lathe", 3.0), ("Mill", 25.0)] {
        m.add_server(name, ProcessingConfig::new(constant(service)).sequence_routing())
            .unwrap();
    }
    add_sink(&mut m, "Done");
    m.set_sequence_table(SequenceTable::new(vec![
        "Lathe".into(),
        "Mill".into(),
        "Done".into(),
    ]));
    m.run().unwrap();

    assert_eq!(processed(&m, "Lathe"), 5);
    assert_eq!(processed(&m, "Mill"), 5);
    assert_eq!(sink_entered(&m, "Done"), 5);
    assert_eq!(m.entities().number_in_system(), 0);
}

#[test]
fn sequence_table_resolves_groups() {
    let mut m = model(1_000.0, 6);
    m.add_source(
        "Orders",
        SourceConfig::interarrival(constant(2.0))
            .max_arrivals(20)
            .sequence_routing(0),
    )
    .unwrap();
    let a = m
        .add_server("CellA", ProcessingConfig::new(constant(5.0)).sequence_routing())
        .unwrap();
    let b = m
        .add_server("CellB", ProcessingConfig::new(constant(5.0)).sequence_routing())
        .unwrap();
    m.add_routing_group("Cells", &[a, b], GroupStrategy::LowestQueue)
        .unwrap();
    add_sink(&mut m, "Done");
    m.set_sequence_table(SequenceTable::new(vec!["Cells".into(), "Done".into()]));
    m.run().unwrap();

    assert_eq!(processed(&m, "CellA") + processed(&m, "CellB"), 20);
    assert!(processed(&m, "CellA") > 0);
    assert!(processed(&m, "CellB") > 0);
    assert_eq!(sink_entered(&m, "Done"), 20);
}

#[test]
fn custom_route_overrides_edges() {
    let mut m = model(500.0, 10);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(1.0))
                .weighted(vec![("Red".into(), 0.5), ("Blue".into(), 0.5)]),
        )
        .unwrap();
    let red = add_sink(&mut m, "RedSink");
    let blue = add_sink(&mut m, "BlueSink");
    connect(&mut m, source, blue);
    m.set_route_fn(source, move |ctx| {
        if ctx.entity.name.starts_with("Red") {
            RouteDecision::Forward(red)
        } else {
            RouteDecision::Default
        }
    })
    .unwrap();
    m.run().unwrap();

    let red_count = sink_entered(&m, "RedSink");
    let blue_count = sink_entered(&m, "BlueSink");
    assert!(red_count > 150 && blue_count > 150);
    let red_type = m.entity_type("Red").unwrap();
    assert_eq!(
        m.entities().type_stats(red_type).unwrap().number_created,
        red_count + m.entities().type_stats(red_type).unwrap().number_remaining
    );
}

#[test]
fn zero_retry_delay_is_rejected_before_running() {
    let mut config = procflow_core::config::ModelConfig::new(500.0);
    config.routing_retry_delay = 0.0;
    let mut m = Model::new(config);
    m.add_source(
        "Orders",
        SourceConfig::interarrival(constant(1.0)).sequence_routing(0),
    )
    .unwrap();
    m.add_server("Lathe", ProcessingConfig::new(constant(100.0)).sequence_routing())
        .unwrap();
    add_sink(&mut m, "Done");
    m.set_sequence_table(SequenceTable::new(vec!["Lathe".into(), "Done".into()]));

    assert!(matches!(m.step(), Err(ModelError::NonPositiveRetryDelay(_))));
    assert_eq!(m.events_processed(), 0);
}

#[test]
fn zero_delay_custom_retries_still_advance_the_clock() {
    let mut m = model(200.0, 19);
    let p = build_pipeline(&mut m, constant(1.0), constant(1.0));
    let release_at = procflow_core::fixed::to_time(50.0);
    m.set_route_fn(p.server, move |ctx| {
        if ctx.now < release_at {
            RouteDecision::Retry(0.0)
        } else {
            RouteDecision::Default
        }
    })
    .unwrap();

    let mut steps = 0;
    while m.step().unwrap() {
        steps += 1;
        assert!(steps < 100_000, "clock stuck at {}", m.now());
    }
    assert!(sink_entered(&m, "Sink") > 100);
}

#[test]
fn type_filtered_edges() {
    let mut m = model(300.0, 12);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(1.0))
                .weighted(vec![("Bolt".into(), 0.3), ("Nut".into(), 0.7)]),
        )
        .unwrap();
    let bolts = add_sink(&mut m, "Bolts");
    let nuts = add_sink(&mut m, "Nuts");
    m.connect(source, bolts, ConnectOptions::default().entity_type("Bolt"))
        .unwrap();
    m.connect(source, nuts, ConnectOptions::default().entity_type("Nut"))
        .unwrap();
    m.run().unwrap();

    let bolt = m.entity_type("Bolt").unwrap();
    let nut = m.entity_type("Nut").unwrap();
    let created = |ty| m.entities().type_stats(ty).unwrap().number_created;
    let destroyed = |ty| m.entities().type_stats(ty).unwrap().number_destroyed;
    assert_eq!(sink_entered(&m, "Bolts"), destroyed(bolt));
    assert_eq!(sink_entered(&m, "Nuts"), destroyed(nut));
    assert!(created(nut) > created(bolt));
}

// ===========================================================================
// Storage and vehicles
// ===========================================================================

#[test]
fn consumers_pull_from_storage() {
    let mut m = model(1_000.0, 13);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(2.0)).max_arrivals(30),
        )
        .unwrap();
    let shelf = m
        .add_storage(
            "Shelf",
            StorageConfig::new("Shelf").processing(ProcessingConfig::default().capacity(50)),
        )
        .unwrap();
    let picker = m
        .add_server(
            "Picker",
            ProcessingConfig::new(constant(3.0)).storage_queue("Shelf"),
        )
        .unwrap();
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, shelf);
    connect(&mut m, picker, sink);
    m.run().unwrap();

    assert_eq!(sink_entered(&m, "Sink"), 30);
    assert_eq!(m.storage(shelf).unwrap().core.stats.total_entities_processed, 30);
    assert_eq!(m.server(picker).unwrap().total_entities_processed(), 30);
    let storage = m.storage_manager();
    assert_eq!(storage.queue_len("Shelf"), 0);
    assert!(storage.is_consistent());
}

#[test]
fn vehicles_carry_entities_between_components() {
    let mut m = model(1_000.0, 14);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(10.0)).max_arrivals(6),
        )
        .unwrap();
    let dock = m
        .add_server(
            "Dock",
            ProcessingConfig::new(constant(1.0)).vehicle_group("Trucks"),
        )
        .unwrap();
    let truck = m
        .add_vehicle("Truck", VehicleConfig::new(constant(5.0)).group("Trucks"))
        .unwrap();
    let sink = m.add_sink("Sink", SinkConfig::default().tally("tis")).unwrap();
    connect(&mut m, source, dock);
    connect(&mut m, dock, sink);
    m.run().unwrap();

    let truck = m.vehicle(truck).unwrap();
    assert_eq!(truck.total_trips(), 6);
    assert_eq!(truck.entities_transported(), 6);
    assert_eq!(sink_entered(&m, "Sink"), 6);
    // One unit of processing plus five of travel.
    assert_eq!(m.tallies().get("tis").unwrap().mean(), Some(6.0));
}

// ===========================================================================
// Hooks, breakdowns and closed loops
// ===========================================================================

#[test]
fn arrival_veto_leaves_entity_in_system() {
    let mut m = model(1_000.0, 15);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(5.0)).max_arrivals(10),
        )
        .unwrap();
    let server = add_server(&mut m, "Server", 1, constant(1.0));
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, server);
    connect(&mut m, server, sink);
    m.set_hook(server, HookPoint::BeforeArrival, |ctx| {
        let n = ctx.state.add("arrivals", 1.0);
        Ok(n % 2.0 == 0.0)
    })
    .unwrap();
    m.run().unwrap();

    assert_eq!(sink_entered(&m, "Sink"), 5);
    assert_eq!(m.entities().number_in_system(), 5);
    assert_eq!(m.state().get("arrivals"), Some(10.0));
}

#[test]
fn vetoed_head_does_not_stall_the_queue() {
    let mut m = model(100.0, 23);
    let source = m
        .add_source(
            "Source",
            SourceConfig::interarrival(constant(1.0)).max_arrivals(3),
        )
        .unwrap();
    let server = add_server(&mut m, "Server", 2, constant(1.0));
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, server);
    connect(&mut m, server, sink);
    m.set_hook(server, HookPoint::BeforeProcessing, |ctx| {
        let first = ctx.entity.as_ref().is_some_and(|e| e.name.ends_with("_Entity_1"));
        if first {
            ctx.state.add("vetoes", 1.0);
        }
        Ok(!first)
    })
    .unwrap();
    m.run().unwrap();

    // The two entities behind the vetoed one pass; it stays queued.
    assert_eq!(sink_entered(&m, "Sink"), 2);
    assert_eq!(m.entities().number_in_system(), 1);
    assert!(m.state().get("vetoes").unwrap() >= 3.0);
}

#[test]
fn panicking_hook_does_not_stop_the_run() {
    let mut m = model(100.0, 24);
    let p = build_pipeline(&mut m, constant(10.0), constant(1.0));
    m.set_hook(p.server, HookPoint::AfterArrival, |ctx| {
        if ctx.state.add("arrivals", 1.0) == 2.0 {
            panic!("hook bug");
        }
        Ok(true)
    })
    .unwrap();
    m.run().unwrap();

    assert!(sink_entered(&m, "Sink") >= 9);
    assert!(m.state().get("arrivals").unwrap() >= 9.0);
}

#[test]
fn breakdowns_record_downtime() {
    let mut m = model(500.0, 16);
    let source = add_source(&mut m, "Source", constant(4.0));
    let server = m
        .add_server(
            "Press",
            ProcessingConfig::new(constant(4.0)).breakdown(constant(10.0), constant(5.0)),
        )
        .unwrap();
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, source, server);
    connect(&mut m, server, sink);
    m.run().unwrap();

    let stats = m.server(server).unwrap().processing_stats();
    assert!(stats.number_downtimes > 0);
    assert_eq!(stats.total_downtime, 5.0 * stats.number_downtimes as f64);
}

#[test]
fn sink_retrigger_keeps_population_constant() {
    let mut m = model(100.0, 17);
    m.add_source(
        "Tokens",
        SourceConfig::table(vec![ArrivalRow::at(0.0), ArrivalRow::at(0.0), ArrivalRow::at(0.0)]),
    )
    .unwrap();
    let source = m.component_id("Tokens").unwrap();
    let server = add_server(&mut m, "Server", 3, constant(10.0));
    let sink = m.add_sink("Sink", SinkConfig::default().retrigger("Tokens")).unwrap();
    connect(&mut m, source, server);
    connect(&mut m, server, sink);

    while m.step().unwrap() {
        assert!(m.entities().number_in_system() <= 3);
    }
    assert!(sink_entered(&m, "Sink") >= 27);
}

#[test]
fn invalid_models_fail_before_running() {
    let mut m = model(100.0, 0);
    let source = add_source(&mut m, "Source", constant(1.0));
    let a = add_sink(&mut m, "A");
    let b = add_sink(&mut m, "B");
    connect_weighted(&mut m, source, a, 40.0);
    connect_weighted(&mut m, source, b, 50.0);
    assert!(matches!(m.run(), Err(ModelError::Routing(_))));
    assert_eq!(m.events_processed(), 0);
}

#[test]
fn combiner_config_without_rules_takes_a_fixed_count() {
    let mut m = model(300.0, 18);
    let pallets = m
        .add_source(
            "Pallets",
            SourceConfig::interarrival(constant(10.0)).parents(),
        )
        .unwrap();
    let parts = add_source(&mut m, "Parts", constant(1.0));
    let combiner = m
        .add_combiner(
            "Packer",
            CombinerConfig::new(ProcessingConfig::new(constant(1.0))).members_to_combine(3),
        )
        .unwrap();
    let sink = add_sink(&mut m, "Sink");
    connect(&mut m, pallets, combiner);
    connect(&mut m, parts, combiner);
    connect(&mut m, combiner, sink);
    m.set_hook(combiner, HookPoint::AfterProcessing, |ctx| {
        let size = ctx.entity.as_ref().map_or(0, |e| e.batch_members.len());
        Ok(size == 3)
    })
    .unwrap();
    m.run().unwrap();

    // Every batch had exactly three members, so none was vetoed.
    assert_eq!(
        m.combiner(combiner).unwrap().number_combined_exited(),
        m.combiner(combiner).unwrap().total_entities_processed()
    );
}
