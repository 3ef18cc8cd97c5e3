//! Half-open time intervals.
//!
//! [`Interval`] is the unit of time arithmetic for the whole workspace:
//! query windows, fragment boundaries and coverage entries are all
//! intervals. The type is an immutable value; every operation returns a
//! new interval instead of mutating in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{ConfigError, TessellaResult};
use crate::Timestamp;

/// A half-open time range `[start, stop)`.
///
/// # Invariant
///
/// `start <= stop`, enforced by the only public constructor. An interval
/// with `start == stop` is empty and intersects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    start: Timestamp,
    stop: Timestamp,
}

impl Interval {
    /// Create a new interval.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `stop` precedes `start`.
    pub fn new(start: Timestamp, stop: Timestamp) -> TessellaResult<Self> {
        if stop < start {
            return Err(ConfigError::InvalidValue {
                field: "interval".to_string(),
                value: format!("[{start}, {stop})"),
                reason: "stop must not precede start".to_string(),
            }
            .into());
        }
        Ok(Self { start, stop })
    }

    /// Create an interval from millisecond offsets since the Unix epoch.
    ///
    /// Used by the fragment indexer, where boundaries are computed in
    /// millisecond arithmetic.
    pub fn from_millis(start_ms: i64, stop_ms: i64) -> TessellaResult<Self> {
        let to_ts = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "interval".to_string(),
                    value: ms.to_string(),
                    reason: "millisecond offset out of representable range".to_string(),
                }
            })
        };
        Self::new(to_ts(start_ms)?, to_ts(stop_ms)?)
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Exclusive upper bound.
    pub fn stop(&self) -> Timestamp {
        self.stop
    }

    /// True if the interval contains no instant.
    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    /// Length of the interval.
    pub fn duration(&self) -> Duration {
        (self.stop - self.start).to_std().unwrap_or(Duration::ZERO)
    }

    /// True if `instant` falls within `[start, stop)`.
    pub fn contains_instant(&self, instant: Timestamp) -> bool {
        self.start <= instant && instant < self.stop
    }

    /// True if `other` lies entirely within this interval.
    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }

    /// True if the two intervals share at least one instant.
    pub fn intersects(&self, other: &Interval) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// True if the two intervals touch without overlapping.
    pub fn is_adjacent(&self, other: &Interval) -> bool {
        self.stop == other.start || other.stop == self.start
    }

    /// The overlapping part of the two intervals, if any.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        if !self.intersects(other) {
            return None;
        }
        Some(Interval {
            start: self.start.max(other.start),
            stop: self.stop.min(other.stop),
        })
    }

    /// The combined span of two overlapping or adjacent intervals.
    ///
    /// Returns `None` when the intervals are disjoint and not touching:
    /// their union would not be a single contiguous range.
    pub fn union(&self, other: &Interval) -> Option<Interval> {
        if !self.intersects(other) && !self.is_adjacent(other) {
            return None;
        }
        Some(Interval {
            start: self.start.min(other.start),
            stop: self.stop.max(other.stop),
        })
    }

    /// Remove the overlap with `other`, returning the 0, 1 or 2 remaining
    /// pieces in time order.
    ///
    /// This is the primitive behind missing-range computation: subtracting
    /// each covered entry from a query interval leaves the sub-ranges that
    /// still have to be fetched.
    pub fn subtract(&self, other: &Interval) -> Vec<Interval> {
        if !self.intersects(other) {
            return vec![*self];
        }
        let mut pieces = Vec::with_capacity(2);
        if self.start < other.start {
            pieces.push(Interval {
                start: self.start,
                stop: other.start,
            });
        }
        if other.stop < self.stop {
            pieces.push(Interval {
                start: other.stop,
                stop: self.stop,
            });
        }
        pieces
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.stop.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2014, 6, 1, h, m, 0).unwrap()
    }

    fn iv(start_h: u32, start_m: u32, stop_h: u32, stop_m: u32) -> Interval {
        Interval::new(ts(start_h, start_m), ts(stop_h, stop_m)).expect("valid interval")
    }

    #[test]
    fn test_new_rejects_reversed_bounds() {
        assert!(Interval::new(ts(2, 0), ts(1, 0)).is_err());
    }

    #[test]
    fn test_new_accepts_empty() {
        let interval = Interval::new(ts(1, 0), ts(1, 0)).expect("empty interval is valid");
        assert!(interval.is_empty());
        assert_eq!(interval.duration(), Duration::ZERO);
    }

    #[test]
    fn test_contains_instant_half_open() {
        let interval = iv(1, 0, 2, 0);
        assert!(interval.contains_instant(ts(1, 0)));
        assert!(interval.contains_instant(ts(1, 59)));
        assert!(!interval.contains_instant(ts(2, 0)));
        assert!(!interval.contains_instant(ts(0, 59)));
    }

    #[test]
    fn test_intersects() {
        assert!(iv(1, 0, 3, 0).intersects(&iv(2, 0, 4, 0)));
        assert!(iv(2, 0, 4, 0).intersects(&iv(1, 0, 3, 0)));
        // Touching intervals share no instant.
        assert!(!iv(1, 0, 2, 0).intersects(&iv(2, 0, 3, 0)));
        assert!(!iv(1, 0, 2, 0).intersects(&iv(3, 0, 4, 0)));
    }

    #[test]
    fn test_empty_interval_intersects_nothing() {
        let empty = iv(2, 0, 2, 0);
        assert!(!empty.intersects(&iv(1, 0, 3, 0)));
        assert!(!iv(1, 0, 3, 0).intersects(&empty));
    }

    #[test]
    fn test_contains() {
        let outer = iv(1, 0, 4, 0);
        assert!(outer.contains(&iv(2, 0, 3, 0)));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&iv(0, 0, 2, 0)));
        assert!(!iv(2, 0, 3, 0).contains(&outer));
    }

    #[test]
    fn test_intersection() {
        let overlap = iv(1, 0, 3, 0).intersection(&iv(2, 0, 4, 0)).expect("overlaps");
        assert_eq!(overlap, iv(2, 0, 3, 0));
        assert!(iv(1, 0, 2, 0).intersection(&iv(3, 0, 4, 0)).is_none());
        assert!(iv(1, 0, 2, 0).intersection(&iv(2, 0, 3, 0)).is_none());
    }

    #[test]
    fn test_union_overlapping() {
        let union = iv(1, 0, 3, 0).union(&iv(2, 0, 4, 0)).expect("overlaps");
        assert_eq!(union, iv(1, 0, 4, 0));
    }

    #[test]
    fn test_union_adjacent() {
        let union = iv(1, 0, 2, 0).union(&iv(2, 0, 3, 0)).expect("adjacent");
        assert_eq!(union, iv(1, 0, 3, 0));
    }

    #[test]
    fn test_union_disjoint_is_none() {
        assert!(iv(1, 0, 2, 0).union(&iv(3, 0, 4, 0)).is_none());
    }

    #[test]
    fn test_subtract_no_overlap_returns_self() {
        let interval = iv(1, 0, 2, 0);
        assert_eq!(interval.subtract(&iv(3, 0, 4, 0)), vec![interval]);
    }

    #[test]
    fn test_subtract_middle_splits_in_two() {
        let pieces = iv(1, 0, 4, 0).subtract(&iv(2, 0, 3, 0));
        assert_eq!(pieces, vec![iv(1, 0, 2, 0), iv(3, 0, 4, 0)]);
    }

    #[test]
    fn test_subtract_left_overlap() {
        let pieces = iv(1, 0, 4, 0).subtract(&iv(0, 0, 2, 0));
        assert_eq!(pieces, vec![iv(2, 0, 4, 0)]);
    }

    #[test]
    fn test_subtract_right_overlap() {
        let pieces = iv(1, 0, 4, 0).subtract(&iv(3, 0, 5, 0));
        assert_eq!(pieces, vec![iv(1, 0, 3, 0)]);
    }

    #[test]
    fn test_subtract_covering_leaves_nothing() {
        assert!(iv(2, 0, 3, 0).subtract(&iv(1, 0, 4, 0)).is_empty());
        let interval = iv(2, 0, 3, 0);
        assert!(interval.subtract(&interval).is_empty());
    }

    #[test]
    fn test_from_millis_roundtrip() {
        let interval = iv(1, 0, 2, 0);
        let rebuilt = Interval::from_millis(
            interval.start().timestamp_millis(),
            interval.stop().timestamp_millis(),
        )
        .expect("valid millis");
        assert_eq!(interval, rebuilt);
    }
}
