//! Coverage tracking for cached time ranges.
//!
//! A [`CoverageTable`] records, per `(namespace, product)`, which time
//! ranges are already cached. Entries for one key are kept as a sorted
//! set of disjoint intervals; inserting a range merges it with anything
//! it overlaps or touches, so the set never holds two entries that could
//! be expressed as one.
//!
//! The table is an in-memory index over the store, rebuilt from stored
//! fragment records after a restart. It is optimistic: a covered range
//! promises a record existed, not that the record is still fresh. The
//! store read stays authoritative.

use std::collections::HashMap;
use std::sync::RwLock;

use tessella_core::{
    Interval, Namespace, ProductId, StoreError, TessellaResult, TimeTable,
};

type CoverageKey = (Namespace, ProductId);

/// Per-key sets of disjoint, sorted covered intervals.
///
/// All mutations for one key happen under the table's write lock, which
/// keeps the disjoint-sorted invariant atomic with respect to concurrent
/// writers. Reads share the read lock.
#[derive(Debug, Default)]
pub struct CoverageTable {
    entries: RwLock<HashMap<CoverageKey, Vec<Interval>>>,
}

impl CoverageTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `interval` as covered for the key, merging with any
    /// overlapping or adjacent entries.
    ///
    /// Marking an already-covered range is a no-op, so repeated calls
    /// with the same interval are idempotent.
    pub fn mark_covered(
        &self,
        namespace: &Namespace,
        product: &ProductId,
        interval: Interval,
    ) -> TessellaResult<()> {
        if interval.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let ranges = entries
            .entry((namespace.clone(), product.clone()))
            .or_default();

        let mut merged = interval;
        ranges.retain(|covered| match merged.union(covered) {
            Some(combined) => {
                merged = combined;
                false
            }
            None => true,
        });
        let idx = ranges.partition_point(|covered| covered.start() < merged.start());
        ranges.insert(idx, merged);
        Ok(())
    }

    /// The parts of `query` not covered for the key, in time order.
    pub fn missing(
        &self,
        namespace: &Namespace,
        product: &ProductId,
        query: &Interval,
    ) -> TessellaResult<Vec<Interval>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let Some(ranges) = entries.get(&(namespace.clone(), product.clone())) else {
            return Ok(vec![*query]);
        };

        let mut remaining = vec![*query];
        for covered in ranges {
            if !covered.intersects(query) {
                continue;
            }
            remaining = remaining
                .iter()
                .flat_map(|piece| piece.subtract(covered))
                .collect();
            if remaining.is_empty() {
                break;
            }
        }
        Ok(remaining)
    }

    /// Covered entries intersecting `query`, in time order.
    pub fn covered_overlapping(
        &self,
        namespace: &Namespace,
        product: &ProductId,
        query: &Interval,
    ) -> TessellaResult<Vec<Interval>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries
            .get(&(namespace.clone(), product.clone()))
            .map(|ranges| {
                ranges
                    .iter()
                    .filter(|covered| covered.intersects(query))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// True once the key has been seen, even with nothing covered yet.
    pub fn is_tracked(&self, namespace: &Namespace, product: &ProductId) -> TessellaResult<bool> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.contains_key(&(namespace.clone(), product.clone())))
    }

    /// Start tracking the key with an empty covered set.
    ///
    /// Returns true if the key was not tracked before. Used by the
    /// coordinator to rebuild coverage from the store exactly once per
    /// key per process.
    pub fn ensure_tracked(
        &self,
        namespace: &Namespace,
        product: &ProductId,
    ) -> TessellaResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut newly_tracked = false;
        entries
            .entry((namespace.clone(), product.clone()))
            .or_insert_with(|| {
                newly_tracked = true;
                Vec::new()
            });
        Ok(newly_tracked)
    }

    /// Drop all coverage for the key. Whole-key invalidation is the only
    /// way entries are ever removed.
    pub fn clear(&self, namespace: &Namespace, product: &ProductId) -> TessellaResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.remove(&(namespace.clone(), product.clone()));
        Ok(())
    }

    /// Export the key's covered ranges as a timetable.
    pub fn to_timetable(
        &self,
        namespace: &Namespace,
        product: &ProductId,
        name: impl Into<String>,
    ) -> TessellaResult<TimeTable> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let ranges = entries
            .get(&(namespace.clone(), product.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(TimeTable::with_ranges(name, ranges))
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn iv(start_ms: i64, stop_ms: i64) -> Interval {
        Interval::from_millis(start_ms, stop_ms).expect("valid interval")
    }

    fn interval_strategy() -> impl Strategy<Value = Interval> {
        (0i64..100_000, 1i64..10_000).prop_map(|(start, len)| iv(start, start + len))
    }

    proptest! {
        /// After arbitrary marks, entries are sorted, disjoint and
        /// non-adjacent.
        #[test]
        fn prop_entries_stay_disjoint_and_sorted(
            marks in proptest::collection::vec(interval_strategy(), 1..40),
        ) {
            let table = CoverageTable::new();
            let namespace = Namespace::new("ns").expect("valid");
            let product = ProductId::new("p").expect("valid");
            for mark in &marks {
                table.mark_covered(&namespace, &product, *mark).expect("marks");
            }
            let covered = table
                .covered_overlapping(&namespace, &product, &iv(0, 200_000))
                .expect("reads");
            for pair in covered.windows(2) {
                prop_assert!(pair[0].stop() < pair[1].start());
            }
        }

        /// Every marked instant is covered and missing() finds no part of
        /// a marked range.
        #[test]
        fn prop_marked_ranges_are_never_missing(
            marks in proptest::collection::vec(interval_strategy(), 1..40),
        ) {
            let table = CoverageTable::new();
            let namespace = Namespace::new("ns").expect("valid");
            let product = ProductId::new("p").expect("valid");
            for mark in &marks {
                table.mark_covered(&namespace, &product, *mark).expect("marks");
            }
            for mark in &marks {
                let missing = table.missing(&namespace, &product, mark).expect("reads");
                prop_assert!(missing.is_empty(), "marked range {mark} reported missing: {missing:?}");
            }
        }

        /// missing() partitions the query: gaps plus covered overlaps add
        /// up to the query's duration, and gaps never intersect coverage.
        #[test]
        fn prop_missing_is_exact_complement(
            marks in proptest::collection::vec(interval_strategy(), 0..40),
            query in interval_strategy(),
        ) {
            let table = CoverageTable::new();
            let namespace = Namespace::new("ns").expect("valid");
            let product = ProductId::new("p").expect("valid");
            for mark in &marks {
                table.mark_covered(&namespace, &product, *mark).expect("marks");
            }

            let missing = table.missing(&namespace, &product, &query).expect("reads");
            let covered = table
                .covered_overlapping(&namespace, &product, &query)
                .expect("reads");

            for gap in &missing {
                prop_assert!(query.contains(gap));
                for entry in &covered {
                    prop_assert!(!gap.intersects(entry));
                }
            }

            let gap_total: std::time::Duration = missing.iter().map(Interval::duration).sum();
            let overlap_total: std::time::Duration = covered
                .iter()
                .filter_map(|entry| entry.intersection(&query))
                .map(|overlap| overlap.duration())
                .sum();
            prop_assert_eq!(gap_total + overlap_total, query.duration());
        }
    }
}
