//! Bounded per-statistic history across replications.

use std::collections::BTreeMap;

use procflow_core::fixed::{Fixed64, fixed64_to_f64};

use crate::pivot::{PivotTable, StatKey};

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity ring buffer. When full, the oldest entry is overwritten.
/// Iterates oldest-to-newest.
#[derive(Debug, Clone)]
pub struct RingBuffer<T = Fixed64> {
    data: Vec<T>,
    head: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            data: vec![T::default(); capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn latest(&self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.capacity() - 1) % self.capacity();
        Some(self.data[idx])
    }

    pub fn oldest(&self) -> Option<T> {
        self.iter().next()
    }

    pub fn iter(&self) -> RingBufferIter<'_, T> {
        let start = if self.is_full() { self.head } else { 0 };
        RingBufferIter {
            buffer: self,
            index: start,
            remaining: self.len,
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Drop every value, keeping the capacity.
    pub fn clear(&mut self) {
        self.data.fill(T::default());
        self.head = 0;
        self.len = 0;
    }
}

pub struct RingBufferIter<'a, T> {
    buffer: &'a RingBuffer<T>,
    index: usize,
    remaining: usize,
}

impl<T: Copy + Default> Iterator for RingBufferIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.remaining == 0 {
            return None;
        }
        let value = self.buffer.data[self.index];
        self.index = (self.index + 1) % self.buffer.capacity();
        self.remaining -= 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Copy + Default> ExactSizeIterator for RingBufferIter<'_, T> {}

// ---------------------------------------------------------------------------
// ReplicationHistory
// ---------------------------------------------------------------------------

/// Saturating conversion; NaN maps to zero.
fn to_fixed(v: f64) -> Fixed64 {
    if v.is_nan() {
        Fixed64::ZERO
    } else {
        Fixed64::saturating_from_num(v)
    }
}

/// The last `capacity` replication values of every pivot statistic, stored
/// as [`Fixed64`] so that moving averages are bit-identical across
/// platforms.
#[derive(Debug, Clone)]
pub struct ReplicationHistory {
    capacity: usize,
    series: BTreeMap<StatKey, RingBuffer<Fixed64>>,
}

impl ReplicationHistory {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ReplicationHistory capacity must be > 0");
        Self {
            capacity,
            series: BTreeMap::new(),
        }
    }

    /// Append the most recent value of every statistic in `table`.
    pub fn record(&mut self, table: &PivotTable) {
        for (key, values) in table.iter() {
            let Some(&value) = values.last() else {
                continue;
            };
            self.series
                .entry(key.clone())
                .or_insert_with(|| RingBuffer::new(self.capacity))
                .push(to_fixed(value));
        }
    }

    pub fn series(&self, key: &StatKey) -> Option<&RingBuffer<Fixed64>> {
        self.series.get(key)
    }

    pub fn latest(&self, key: &StatKey) -> Option<f64> {
        self.series(key)?.latest().map(fixed64_to_f64)
    }

    /// Mean of the retained values.
    pub fn moving_average(&self, key: &StatKey) -> Option<f64> {
        let buf = self.series(key)?;
        if buf.is_empty() {
            return None;
        }
        let sum = buf
            .iter()
            .fold(Fixed64::ZERO, |acc, v| acc.saturating_add(v));
        Some(fixed64_to_f64(sum / Fixed64::from_num(buf.len())))
    }

    /// Newest minus oldest retained value.
    pub fn drift(&self, key: &StatKey) -> Option<f64> {
        let buf = self.series(key)?;
        let (oldest, latest) = (buf.oldest()?, buf.latest()?);
        Some(fixed64_to_f64(latest.saturating_sub(oldest)))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
