//! Named collections of time intervals.
//!
//! A [`TimeTable`] is the exchange format for lists of ranges: coverage
//! snapshots, event catalogs, instrument on-times. It is an ordered list,
//! not a set; callers decide whether entries may overlap.

use serde::{Deserialize, Serialize};

use crate::interval::Interval;

/// A named, ordered list of intervals with optional free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeTable {
    name: String,
    metadata: Option<serde_json::Value>,
    ranges: Vec<Interval>,
}

impl TimeTable {
    /// Create an empty timetable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
            ranges: Vec::new(),
        }
    }

    /// Create a timetable from existing ranges.
    pub fn with_ranges(name: impl Into<String>, ranges: Vec<Interval>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
            ranges,
        }
    }

    /// Attach free-form metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The timetable's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attached metadata, if any.
    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    /// Number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// True if the timetable holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Append one range.
    pub fn push(&mut self, range: Interval) {
        self.ranges.push(range);
    }

    /// Append several ranges.
    pub fn extend(&mut self, ranges: impl IntoIterator<Item = Interval>) {
        self.ranges.extend(ranges);
    }

    /// Remove and return the last range.
    pub fn pop(&mut self) -> Option<Interval> {
        self.ranges.pop()
    }

    /// The ranges in insertion order.
    pub fn ranges(&self) -> &[Interval] {
        &self.ranges
    }

    /// Iterate over the ranges.
    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.ranges.iter()
    }
}

impl std::ops::Index<usize> for TimeTable {
    type Output = Interval;

    fn index(&self, index: usize) -> &Interval {
        &self.ranges[index]
    }
}

impl IntoIterator for TimeTable {
    type Item = Interval;
    type IntoIter = std::vec::IntoIter<Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.into_iter()
    }
}
