//! Utilization figures derived from recorded busy intervals.
//!
//! Intervals are `(start, end, units)` triples as recorded by
//! `ProcessingStats::units_utilized_over_time` and vehicle trip logs: one
//! entry per finished job, with `units` the slots in use when it started.

use std::ops::Range;

/// Length of `[start, end)` that falls inside `span`.
fn clipped(start: f64, end: f64, span: &Range<f64>) -> Option<f64> {
    let s = start.max(span.start);
    let e = end.min(span.end);
    (e > s).then_some(e - s)
}

/// Busy share of `capacity` slots over `span`, in `[0, 1]`.
pub fn utilization_ratio(intervals: &[(f64, f64, usize)], capacity: usize, span: Range<f64>) -> f64 {
    let length = span.end - span.start;
    if capacity == 0 || length <= 0.0 {
        return 0.0;
    }
    let busy: f64 = intervals
        .iter()
        .filter_map(|&(start, end, _)| clipped(start, end, &span))
        .sum();
    (busy / (capacity as f64 * length)).min(1.0)
}

/// Average number of slots in use while busy, weighted by interval length.
///
/// Time before `warm_up` is ignored and `units` above `capacity` count as
/// `capacity`.
pub fn units_utilized(intervals: &[(f64, f64, usize)], capacity: usize, warm_up: f64) -> f64 {
    let observed = warm_up..f64::INFINITY;
    let mut weighted = 0.0;
    let mut total = 0.0;
    for &(start, end, units) in intervals {
        if let Some(duration) = clipped(start, end, &observed) {
            weighted += duration * units.min(capacity) as f64;
            total += duration;
        }
    }
    if total > 0.0 { weighted / total } else { 0.0 }
}

/// Processing time as a percentage of the slot time available over
/// `effective_time`.
pub fn scheduled_utilization(total_processing_time: f64, effective_time: f64, capacity: usize) -> f64 {
    if effective_time <= 0.0 || capacity == 0 {
        return 0.0;
    }
    total_processing_time / effective_time * 100.0 / capacity as f64
}

/// Starving figures for a component: the idle percentage and the idle time
/// scaled by the time spent processing.
pub fn starving(scheduled_utilization: f64, total_processing_time: f64) -> (f64, f64) {
    let scheduled = 100.0 - scheduled_utilization;
    let total = if scheduled_utilization > 0.0 {
        scheduled / 100.0 * total_processing_time
    } else {
        0.0
    };
    (scheduled, total)
}
