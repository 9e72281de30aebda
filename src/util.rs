//! Miscellaneous utility structs and functions.

use std::cmp::Ordering;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An object found at some distance from the observer.
///
/// Entries are ordered by distance, and then by object,
/// so that sets of entries are well ordered.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entry<T> {
    /// The distance to the object in m.
    pub distance: f64,
    /// The object.
    pub object: T,
}

impl<T> Entry<T> {
    pub fn new(distance: f64, object: T) -> Self {
        Self { distance, object }
    }
}

impl<T: Ord> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for Entry<T> {}

impl<T: Ord> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.object.cmp(&other.object))
    }
}

/// An append-only log of values keyed by simulation time.
///
/// Lookups return the value that was current at the requested time.
#[derive(Clone, Debug)]
pub struct History<T> {
    /// The time span of values to retain, in s.
    retain: f64,
    /// The logged values, in order of time.
    values: Vec<(f64, T)>,
}

impl<T> History<T> {
    /// Creates an empty history which retains values for `retain` seconds.
    pub fn new(retain: f64) -> Self {
        Self {
            retain,
            values: vec![],
        }
    }

    /// Records a value as current from time `time`.
    /// Values set at an earlier time than the latest entry replace the later entries.
    pub fn set(&mut self, time: f64, value: T) {
        let idx = self.values.partition_point(|(t, _)| *t < time);
        self.values.truncate(idx);
        self.values.push((time, value));
        self.prune(time - self.retain);
    }

    /// Gets the most recent value.
    pub fn get(&self) -> Option<&T> {
        self.values.last().map(|(_, v)| v)
    }

    /// Gets the value that was current at the given time.
    pub fn get_at(&self, time: f64) -> Option<&T> {
        let idx = self.values.partition_point(|(t, _)| *t <= time);
        idx.checked_sub(1).map(|idx| &self.values[idx].1)
    }

    /// Removes values that were superseded before `time`.
    /// The value that was current at `time` is kept.
    pub fn prune(&mut self, time: f64) {
        let idx = self.values.partition_point(|(t, _)| *t <= time);
        if idx > 1 {
            self.values.drain(..idx - 1);
        }
    }

    /// Removes all values.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// The number of logged values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
