//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::combiner::CombinerConfig;
use crate::component::ProcessingConfig;
use crate::config::ModelConfig;
use crate::connection::ConnectOptions;
use crate::distribution::Distribution;
use crate::id::{ComponentId, ScheduleId, WorkerPoolId};
use crate::model::Model;
use crate::schedule::WorkScheduleDay;
use crate::sink::SinkConfig;
use crate::source::SourceConfig;

// ===========================================================================
// Models
// ===========================================================================

pub fn model(duration: f64, seed: u64) -> Model {
    Model::new(ModelConfig::new(duration).seed(seed))
}

pub fn constant(v: f64) -> Distribution {
    Distribution::constant(v)
}

pub fn exponential(mean: f64) -> Distribution {
    Distribution::exponential(mean)
}

// ===========================================================================
// Component constructors
// ===========================================================================

pub fn add_source(m: &mut Model, name: &str, interarrival: Distribution) -> ComponentId {
    m.add_source(name, SourceConfig::interarrival(interarrival))
        .expect("add source")
}

pub fn add_typed_source(
    m: &mut Model,
    name: &str,
    interarrival: Distribution,
    entity_type: &str,
) -> ComponentId {
    m.add_source(
        name,
        SourceConfig::interarrival(interarrival).entity_type(entity_type),
    )
    .expect("add source")
}

pub fn add_server(m: &mut Model, name: &str, capacity: usize, service: Distribution) -> ComponentId {
    m.add_server(name, ProcessingConfig::new(service).capacity(capacity))
        .expect("add server")
}

pub fn add_sink(m: &mut Model, name: &str) -> ComponentId {
    m.add_sink(name, SinkConfig::default()).expect("add sink")
}

pub fn add_combiner(m: &mut Model, name: &str, service: Distribution, rules: &[(&str, usize)]) -> ComponentId {
    let config = rules.iter().fold(
        CombinerConfig::new(ProcessingConfig::new(service)),
        |c, (ty, n)| c.rule(*ty, *n),
    );
    m.add_combiner(name, config).expect("add combiner")
}

pub fn connect(m: &mut Model, from: ComponentId, to: ComponentId) {
    m.connect(from, to, ConnectOptions::default())
        .expect("connect");
}

pub fn connect_weighted(m: &mut Model, from: ComponentId, to: ComponentId, probability: f64) {
    m.connect(from, to, ConnectOptions::default().probability(probability))
        .expect("connect");
}

// ===========================================================================
// Schedules and workers
// ===========================================================================

/// One shift per day, every day of the week.
pub fn daily_shift(m: &mut Model, start_hour: u32, end_hour: u32, capacity: u32) -> ScheduleId {
    let day = WorkScheduleDay::new()
        .with_shift(start_hour, 0, end_hour, 0, capacity)
        .expect("valid shift");
    m.add_daily_schedule(day).expect("valid schedule")
}

pub fn always_on(m: &mut Model, capacity: u32) -> ScheduleId {
    daily_shift(m, 0, 24, capacity)
}

pub fn crew(m: &mut Model, name: &str, size: u32) -> WorkerPoolId {
    let schedule = always_on(m, size);
    m.add_worker_pool(name, schedule, None).expect("add pool")
}

// ===========================================================================
// Topologies
// ===========================================================================

/// Source -> Server -> Sink.
pub struct Pipeline {
    pub source: ComponentId,
    pub server: ComponentId,
    pub sink: ComponentId,
}

pub fn build_pipeline(m: &mut Model, interarrival: Distribution, service: Distribution) -> Pipeline {
    let source = add_source(m, "Source", interarrival);
    let server = add_server(m, "Server", 1, service);
    let sink = add_sink(m, "Sink");
    connect(m, source, server);
    connect(m, server, sink);
    Pipeline {
        source,
        server,
        sink,
    }
}

/// A source feeding `length` servers in series, ending in a sink.
pub fn build_chain(m: &mut Model, length: usize, interarrival: Distribution, service: Distribution) -> Vec<ComponentId> {
    let mut chain = vec![add_source(m, "Source", interarrival)];
    for i in 0..length {
        chain.push(add_server(m, &format!("Server{}", i + 1), 1, service.clone()));
    }
    chain.push(add_sink(m, "Sink"));
    for pair in chain.windows(2) {
        connect(m, pair[0], pair[1]);
    }
    chain
}

/// `width` parallel stations sharing one worker pool of `workers`, each
/// station requiring `required` workers.
pub fn build_contended(
    m: &mut Model,
    width: usize,
    workers: u32,
    required: usize,
    service: Distribution,
) -> Vec<ComponentId> {
    let pool = crew(m, "Crew", workers);
    let source = add_source(m, "Source", exponential(1.0));
    let sink = add_sink(m, "Sink");
    let share = 100.0 / width as f64;
    let mut stations = Vec::with_capacity(width);
    for i in 0..width {
        let station = m
            .add_server(
                &format!("Station{}", i + 1),
                ProcessingConfig::new(service.clone()).workers(pool, required),
            )
            .expect("add station");
        let p = if i + 1 == width { 100.0 - share * (width - 1) as f64 } else { share };
        connect_weighted(m, source, station, p);
        connect(m, station, sink);
        stations.push(station);
    }
    stations
}
