//! Per-worker utilization tables.

use procflow_core::fixed::{SimTime, time_to_f64};
use procflow_core::model::Model;
use procflow_core::worker::WorkerPool;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRow {
    pub id: String,
    pub allocations: u64,
    pub total_busy_time: f64,
    /// Percentage of the simulated time spent busy.
    pub utilization: f64,
}

/// One worker pool's roster with busy times and a pool total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerUtilizationSummary {
    pub pool: String,
    pub workers: Vec<WorkerRow>,
}

impl WorkerUtilizationSummary {
    /// Summarize `pool` over `sim_time` steps, counting running assignments
    /// up to `now`.
    pub fn from_pool(pool: &WorkerPool, sim_time: f64, now: SimTime) -> Self {
        let workers = pool
            .workers()
            .iter()
            .map(|w| WorkerRow {
                id: w.id.clone(),
                allocations: w.allocations,
                total_busy_time: w.total_busy_time,
                utilization: w.utilization(sim_time, now) * 100.0,
            })
            .collect();
        Self {
            pool: pool.name.clone(),
            workers,
        }
    }

    /// One summary per pool of a finished run, in pool creation order.
    pub fn collect(model: &Model) -> Vec<Self> {
        let now = model.now();
        let sim_time = time_to_f64(now);
        model
            .worker_pools()
            .map(|(_, pool)| Self::from_pool(pool, sim_time, now))
            .collect()
    }

    pub fn total_allocations(&self) -> u64 {
        self.workers.iter().map(|w| w.allocations).sum()
    }

    pub fn total_busy_time(&self) -> f64 {
        self.workers.iter().map(|w| w.total_busy_time).sum()
    }

    /// Mean utilization over the roster, in percent.
    pub fn average_utilization(&self) -> f64 {
        if self.workers.is_empty() {
            return 0.0;
        }
        self.workers.iter().map(|w| w.utilization).sum::<f64>() / self.workers.len() as f64
    }

    pub fn busiest(&self) -> Option<&WorkerRow> {
        self.workers
            .iter()
            .max_by(|a, b| a.total_busy_time.total_cmp(&b.total_busy_time))
    }
}
