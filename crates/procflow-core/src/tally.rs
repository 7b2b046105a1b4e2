//! Named observation tallies (count, mean, min, max, variance).

use std::collections::BTreeMap;

/// Running statistics over recorded observations (Welford's update).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TallyStatistic {
    count: u64,
    mean: f64,
    m2: f64,
    min: Option<f64>,
    max: Option<f64>,
    total: f64,
}

impl TallyStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample variance; needs at least two observations.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.m2 / (self.count - 1) as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Fold another tally into this one (parallel-merge formula).
    pub fn merge(&mut self, other: &TallyStatistic) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let n = (self.count + other.count) as f64;
        let delta = other.mean - self.mean;
        self.m2 += other.m2 + delta * delta * self.count as f64 * other.count as f64 / n;
        self.mean += delta * other.count as f64 / n;
        self.count += other.count;
        self.total += other.total;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Tallies keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Tallies {
    by_name: BTreeMap<String, TallyStatistic>,
}

impl Tallies {
    pub fn record(&mut self, name: &str, value: f64) {
        if let Some(t) = self.by_name.get_mut(name) {
            t.record(value);
        } else {
            let mut t = TallyStatistic::new();
            t.record(value);
            self.by_name.insert(name.to_string(), t);
        }
    }

    pub fn get(&self, name: &str) -> Option<&TallyStatistic> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TallyStatistic)> {
        self.by_name.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge every tally whose name starts with `prefix`.
    pub fn tally_prefix(&self, prefix: &str) -> TallyStatistic {
        let mut merged = TallyStatistic::new();
        for (_, t) in self
            .by_name
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            merged.merge(t);
        }
        merged
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
    }
}
