//! Post-run statistics for Procflow models.
//!
//! Reads the counters a finished [`Model`](procflow_core::model::Model)
//! exposes and aggregates them into pivot tables keyed by
//! `(type, name, statistic)`, merges replications, summarizes worker pools
//! and derives time-weighted utilization from recorded busy intervals.
//!
//! # Usage
//!
//! ```ignore
//! let mut table = PivotTable::new();
//! for seed in 0..10 {
//!     let mut model = build(seed);
//!     model.run()?;
//!     table.merge(&PivotTable::collect(&model));
//! }
//! for row in table.to_rows() {
//!     println!("{} {} {}: {:.2}", row.row_type, row.name, row.stat, row.average);
//! }
//! ```

pub mod history;
pub mod pivot;
pub mod utilization;
pub mod workers;

pub use history::{ReplicationHistory, RingBuffer, RingBufferIter};
pub use pivot::{PivotRow, PivotTable, RowType, StatKey};
pub use utilization::{scheduled_utilization, starving, units_utilized, utilization_ratio};
pub use workers::{WorkerRow, WorkerUtilizationSummary};
