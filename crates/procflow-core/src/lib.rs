//! Procflow Core -- a discrete-event engine for process and manufacturing
//! networks.
//!
//! Entities are created by sources, flow over connections through servers,
//! separators, combiners and storages, ride vehicles, and leave the system at
//! sinks. Components compete for capacity, follow weekly work schedules and
//! share schedule-driven worker pools.
//!
//! # Execution Model
//!
//! A run is single-threaded and cooperative. Every waiting "process" is an
//! [`kernel::Action`] in a time-ordered heap; popping it resumes the process.
//! Actions at the same instant resume in the order they were scheduled, so a
//! given seed always yields the same trajectory.
//!
//! An entity at a processing component moves through:
//!
//! 1. **Arrival** -- `before_arrival` hook, then the input queue.
//! 2. **Drain** -- capacity, work schedule and worker pool are checked.
//! 3. **Processing** -- a slot is held for a sampled time, interrupted by
//!    breakdowns.
//! 4. **Routing** -- custom route function, sequence table, or weighted edges.
//! 5. **Release** -- the slot and its workers are freed once the entity has
//!    left.
//!
//! # Building a Model
//!
//! ```rust,ignore
//! let mut model = Model::new(ModelConfig::new(1_000.0).seed(7));
//! let src = model.add_source("Arrivals", SourceConfig::interarrival(Distribution::exponential(5.0)))?;
//! let srv = model.add_server("Lathe", ProcessingConfig::new(Distribution::constant(4.0)))?;
//! let out = model.add_sink("Done", SinkConfig::default())?;
//! model.connect(src, srv, ConnectOptions::default())?;
//! model.connect(srv, out, ConnectOptions::default())?;
//! model.run()?;
//! ```
//!
//! # Key Types
//!
//! - [`model::Model`] -- The simulation context: arenas, builders, run loop.
//! - [`component::ProcessingCore`] -- Capacity, queue, slots and statistics
//!   shared by every processing kind.
//! - [`worker::WorkerPool`] -- All-or-nothing multi-worker acquisition.
//! - [`schedule::WorkScheduleWeek`] -- Weekly shifts with capacities.
//! - [`storage_manager::StorageManager`] -- Named pull queues.
//! - [`entity::EntityManager`] -- Entity arena with per-type recycling.
//! - [`fixed::SimTime`] -- Q32.32 fixed-point simulation time.

pub mod combiner;
pub mod component;
pub mod config;
pub mod connection;
pub mod distribution;
pub mod entity;
pub mod fixed;
pub mod hooks;
pub mod id;
pub mod kernel;
pub mod model;
pub mod processing;
pub mod queue;
pub mod rng;
pub mod routing;
pub mod schedule;
pub mod server;
pub mod sink;
pub mod source;
pub mod storage;
pub mod storage_manager;
pub mod tally;
pub mod vehicle;
pub mod worker;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
