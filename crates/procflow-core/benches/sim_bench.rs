//! Criterion benchmarks for the Procflow simulation engine.
//!
//! Three benchmark groups:
//! - `pipeline`: source, one server, sink -- raw action throughput
//! - `chain`: twenty servers in series -- routing and drain overhead
//! - `contended`: parallel stations sharing one worker pool -- acquisition
//!   and waiter wake-ups

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use procflow_core::model::Model;
use procflow_core::test_utils::*;

// ===========================================================================
// Model builders
// ===========================================================================

fn pipeline_model() -> Model {
    let mut m = model(10_000.0, 1);
    build_pipeline(&mut m, exponential(2.0), exponential(1.5));
    m
}

fn chain_model() -> Model {
    let mut m = model(5_000.0, 2);
    build_chain(&mut m, 20, exponential(3.0), exponential(2.0));
    m
}

fn contended_model() -> Model {
    let mut m = model(5_000.0, 3);
    build_contended(&mut m, 6, 4, 2, exponential(2.5));
    m
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(50);
    group.bench_function("10k_steps", |b| {
        b.iter_batched(
            pipeline_model,
            |mut m| {
                m.run().unwrap();
                m.events_processed()
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    group.sample_size(20);
    group.bench_function("20_servers", |b| {
        b.iter_batched(
            chain_model,
            |mut m| {
                m.run().unwrap();
                m.events_processed()
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.sample_size(20);
    group.bench_function("6_stations_4_workers", |b| {
        b.iter_batched(
            contended_model,
            |mut m| {
                m.run().unwrap();
                m.events_processed()
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_chain, bench_contended);
criterion_main!(benches);
