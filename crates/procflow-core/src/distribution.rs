//! Sampled durations: processing times, inter-arrival times, breakdown
//! intervals, travel and transit times.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A probability distribution over non-negative durations (in model steps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    /// Always the same value.
    Constant { value: f64 },
    /// Uniform over `[min, max)`.
    Uniform { min: f64, max: f64 },
    /// Exponential with the given mean (not rate).
    Exponential { mean: f64 },
    /// Normal, truncated at zero.
    Normal { mean: f64, std_dev: f64 },
    /// Triangular with lower bound, mode and upper bound.
    Triangular { min: f64, mode: f64, max: f64 },
    /// `exp(N(mu, sigma))`.
    LogNormal { mu: f64, sigma: f64 },
    /// Uniform pick from observed values.
    Empirical { values: Vec<f64> },
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::Constant { value: 0.0 }
    }
}

impl Distribution {
    pub fn constant(value: f64) -> Self {
        Distribution::Constant { value }
    }

    pub fn exponential(mean: f64) -> Self {
        Distribution::Exponential { mean }
    }

    pub fn uniform(min: f64, max: f64) -> Self {
        Distribution::Uniform { min, max }
    }

    pub fn triangular(min: f64, mode: f64, max: f64) -> Self {
        Distribution::Triangular { min, mode, max }
    }

    /// Draw one sample. Never negative.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let v = match self {
            Distribution::Constant { value } => *value,
            Distribution::Uniform { min, max } => {
                if max <= min {
                    *min
                } else {
                    rng.gen_range(*min..*max)
                }
            }
            Distribution::Exponential { mean } => {
                if *mean <= 0.0 {
                    return 0.0;
                }
                // Inverse transform; 1 - u is in (0, 1] so ln never sees zero.
                let u: f64 = rng.r#gen();
                -(1.0 - u).ln() * mean
            }
            Distribution::Normal { mean, std_dev } => mean + std_dev * standard_normal(rng),
            Distribution::Triangular { min, mode, max } => triangular(rng, *min, *mode, *max),
            Distribution::LogNormal { mu, sigma } => (mu + sigma * standard_normal(rng)).exp(),
            Distribution::Empirical { values } => {
                if values.is_empty() {
                    0.0
                } else {
                    values[rng.gen_range(0..values.len())]
                }
            }
        };
        if v.is_nan() { 0.0 } else { v.max(0.0) }
    }

    /// Analytical mean, ignoring truncation at zero.
    pub fn mean(&self) -> f64 {
        match self {
            Distribution::Constant { value } => *value,
            Distribution::Uniform { min, max } => (min + max) / 2.0,
            Distribution::Exponential { mean } => *mean,
            Distribution::Normal { mean, .. } => *mean,
            Distribution::Triangular { min, mode, max } => (min + mode + max) / 3.0,
            Distribution::LogNormal { mu, sigma } => (mu + sigma * sigma / 2.0).exp(),
            Distribution::Empirical { values } => {
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            }
        }
    }
}

/// Box-Muller transform.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn triangular<R: Rng + ?Sized>(rng: &mut R, min: f64, mode: f64, max: f64) -> f64 {
    if max <= min {
        return min;
    }
    let u: f64 = rng.r#gen();
    let split = (mode - min) / (max - min);
    if u < split {
        min + ((max - min) * (mode - min) * u).sqrt()
    } else {
        max - ((max - min) * (max - mode) * (1.0 - u)).sqrt()
    }
}
