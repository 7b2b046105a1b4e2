//! Data adapters for Procflow models.
//!
//! * [`loader`] -- format detection (RON, TOML, JSON), file discovery,
//!   [`ModelConfig`](procflow_core::config::ModelConfig) loading and the
//!   [`DataLoadError`] type.
//! * [`tables`] -- CSV work schedules, worker rosters, arrival tables and
//!   sequence tables; pivot-table output.
//! * [`schema`] and [`build`] -- a declarative topology description and the
//!   pipeline that turns it into a validated
//!   [`Model`](procflow_core::model::Model).

pub mod build;
pub mod loader;
pub mod schema;
pub mod tables;

pub use build::{build_model, load_model, load_model_dir, load_topology};
pub use loader::{DataLoadError, Format, load_model_config};
pub use schema::TopologyData;
pub use tables::{
    load_arrival_table_csv, load_schedule_csv, load_sequence_table_csv, load_workers_csv,
    write_pivot_csv,
};
