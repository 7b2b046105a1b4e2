//! Run-level settings of a [`Model`](crate::model::Model).

use serde::{Deserialize, Serialize};

use crate::fixed::{SimTime, to_time};
use crate::schedule::{TimeUnit, Weekday};

/// Wall-clock instant that simulation time zero corresponds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartTime {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Simulated horizon in model steps.
    pub duration: f64,
    /// Statistics are only collected from this time on.
    pub warm_up: f64,
    pub seed: u64,
    /// Destroyed entities kept for reuse, per entity type.
    pub entity_pool_size: usize,
    /// Steps between sequence-routing attempts when no destination is free.
    /// Must be positive and above the clock resolution.
    pub routing_retry_delay: f64,
    /// Log every n-th consecutive routing retry.
    pub retry_log_interval: u64,
    pub time_unit: TimeUnit,
    pub start: StartTime,
    pub collect_entity_type_stats: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            duration: 1_000.0,
            warm_up: 0.0,
            seed: 0,
            entity_pool_size: 500,
            routing_retry_delay: 10.0,
            retry_log_interval: 100,
            time_unit: TimeUnit::Minutes,
            start: StartTime::default(),
            collect_entity_type_stats: true,
        }
    }
}

impl ModelConfig {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    pub fn warm_up(mut self, warm_up: f64) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    pub fn start_at(mut self, weekday: Weekday, hour: u32, minute: u32) -> Self {
        self.start = StartTime {
            weekday,
            hour,
            minute,
        };
        self
    }

    /// Offset of time zero into the schedule week, in model steps.
    pub fn start_offset(&self) -> SimTime {
        to_time(self.time_unit.to_steps(
            self.start.weekday.index() as f64,
            self.start.hour as f64,
            self.start.minute as f64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::time_to_f64;

    #[test]
    fn defaults() {
        let c = ModelConfig::default();
        assert_eq!(c.entity_pool_size, 500);
        assert_eq!(c.routing_retry_delay, 10.0);
        assert_eq!(c.retry_log_interval, 100);
        assert_eq!(c.time_unit, TimeUnit::Minutes);
        assert!(c.collect_entity_type_stats);
        assert_eq!(c.start_offset(), SimTime::ZERO);
    }

    #[test]
    fn start_offset_in_minutes() {
        let c = ModelConfig::new(100.0).start_at(Weekday::Wednesday, 8, 30);
        assert_eq!(time_to_f64(c.start_offset()), 2.0 * 1440.0 + 8.0 * 60.0 + 30.0);
    }

    #[test]
    fn start_offset_in_hours() {
        let c = ModelConfig::new(100.0)
            .time_unit(TimeUnit::Hours)
            .start_at(Weekday::Tuesday, 6, 0);
        assert_eq!(time_to_f64(c.start_offset()), 30.0);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let c: ModelConfig = serde_json::from_str(r#"{"duration": 480.0, "seed": 7}"#).unwrap();
        assert_eq!(c.duration, 480.0);
        assert_eq!(c.seed, 7);
        assert_eq!(c.entity_pool_size, 500);
    }
}
