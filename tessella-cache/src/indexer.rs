//! Fragment decomposition.
//!
//! Requested intervals are broken into consecutive fragments of a fixed,
//! per-product duration, anchored to the Unix epoch. The anchoring is the
//! whole point: any two queries that overlap resolve to identical fragment
//! boundaries, so their downloads land under the same store keys and the
//! cache reuse is maximal.

use std::time::Duration;

use tessella_core::{ConfigError, Interval, TessellaResult};

/// Decompose `query` into epoch-aligned fragments of `fragment_duration`.
///
/// The first fragment starts at `query.start` truncated down to a multiple
/// of `fragment_duration`; fragments then follow back to back until one
/// ends at or past `query.stop`. The returned fragments are in time order,
/// mutually adjacent, and together cover `query` with at most one
/// fragment's slack on each side.
///
/// An empty query decomposes to no fragments.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if `fragment_duration` is zero or
/// not representable in whole milliseconds.
pub fn fragments_for(
    query: &Interval,
    fragment_duration: Duration,
) -> TessellaResult<Vec<Interval>> {
    let duration_ms = i64::try_from(fragment_duration.as_millis())
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "fragment_duration".to_string(),
            value: format!("{fragment_duration:?}"),
            reason: "must be a positive number of milliseconds".to_string(),
        })?;

    if query.is_empty() {
        return Ok(Vec::new());
    }

    let stop_ms = query.stop().timestamp_millis();
    let mut start_ms = query.start().timestamp_millis().div_euclid(duration_ms) * duration_ms;

    let mut fragments = Vec::new();
    loop {
        let fragment_stop = start_ms + duration_ms;
        fragments.push(Interval::from_millis(start_ms, fragment_stop)?);
        if fragment_stop >= stop_ms {
            return Ok(fragments);
        }
        start_ms = fragment_stop;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tessella_core::Timestamp;

    const TWELVE_HOURS: Duration = Duration::from_secs(12 * 3600);

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn iv(start: Timestamp, stop: Timestamp) -> Interval {
        Interval::new(start, stop).expect("valid interval")
    }

    #[test]
    fn test_late_evening_query_spans_two_fragments() {
        // A 70 minute query across midnight needs the fragment holding its
        // start and the one holding its stop.
        let query = iv(ts(2014, 6, 1, 23, 0), ts(2014, 6, 2, 0, 10));
        let fragments = fragments_for(&query, TWELVE_HOURS).expect("decomposes");
        assert_eq!(
            fragments,
            vec![
                iv(ts(2014, 6, 1, 12, 0), ts(2014, 6, 2, 0, 0)),
                iv(ts(2014, 6, 2, 0, 0), ts(2014, 6, 2, 12, 0)),
            ]
        );
    }

    #[test]
    fn test_query_inside_one_fragment() {
        let query = iv(ts(2014, 6, 1, 13, 0), ts(2014, 6, 1, 14, 0));
        let fragments = fragments_for(&query, TWELVE_HOURS).expect("decomposes");
        assert_eq!(fragments, vec![iv(ts(2014, 6, 1, 12, 0), ts(2014, 6, 2, 0, 0))]);
    }

    #[test]
    fn test_query_on_exact_boundaries() {
        let query = iv(ts(2014, 6, 1, 12, 0), ts(2014, 6, 2, 12, 0));
        let fragments = fragments_for(&query, TWELVE_HOURS).expect("decomposes");
        assert_eq!(
            fragments,
            vec![
                iv(ts(2014, 6, 1, 12, 0), ts(2014, 6, 2, 0, 0)),
                iv(ts(2014, 6, 2, 0, 0), ts(2014, 6, 2, 12, 0)),
            ]
        );
    }

    #[test]
    fn test_fragments_cover_query_and_are_adjacent() {
        let query = iv(ts(2014, 6, 1, 3, 17), ts(2014, 6, 4, 21, 42));
        let fragments = fragments_for(&query, TWELVE_HOURS).expect("decomposes");
        assert!(fragments.first().expect("nonempty").start() <= query.start());
        assert!(fragments.last().expect("nonempty").stop() >= query.stop());
        for pair in fragments.windows(2) {
            assert_eq!(pair[0].stop(), pair[1].start());
        }
    }

    #[test]
    fn test_pre_epoch_query_aligns_down() {
        // div_euclid keeps truncation toward negative infinity, so
        // fragments stay aligned for timestamps before 1970.
        let query = iv(ts(1969, 12, 31, 23, 0), ts(1970, 1, 1, 1, 0));
        let fragments = fragments_for(&query, TWELVE_HOURS).expect("decomposes");
        assert_eq!(
            fragments,
            vec![
                iv(ts(1969, 12, 31, 12, 0), ts(1970, 1, 1, 0, 0)),
                iv(ts(1970, 1, 1, 0, 0), ts(1970, 1, 1, 12, 0)),
            ]
        );
    }

    #[test]
    fn test_empty_query_yields_no_fragments() {
        let query = iv(ts(2014, 6, 1, 23, 0), ts(2014, 6, 1, 23, 0));
        assert!(fragments_for(&query, TWELVE_HOURS).expect("decomposes").is_empty());
    }

    #[test]
    fn test_zero_duration_is_rejected() {
        let query = iv(ts(2014, 6, 1, 0, 0), ts(2014, 6, 2, 0, 0));
        assert!(fragments_for(&query, Duration::ZERO).is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn millis_strategy() -> impl Strategy<Value = i64> {
        -4_102_444_800_000i64..4_102_444_800_000i64
    }

    fn query_strategy() -> impl Strategy<Value = Interval> {
        (millis_strategy(), 1i64..(30 * 86_400_000)).prop_map(|(start, len)| {
            Interval::from_millis(start, start + len).expect("ordered millis")
        })
    }

    /// One hour up to 40 days, in odd millisecond amounts; together with
    /// the query bound this caps a decomposition at a few hundred
    /// fragments.
    fn duration_strategy() -> impl Strategy<Value = Duration> {
        (3_600u64..(40 * 86_400), 0u32..1000)
            .prop_map(|(secs, ms)| Duration::from_millis(secs * 1000 + ms as u64))
    }

    proptest! {
        /// Fragments cover the query, are uniform, adjacent and aligned.
        #[test]
        fn prop_decomposition_is_aligned_cover(
            query in query_strategy(),
            duration in duration_strategy(),
        ) {
            let fragments = fragments_for(&query, duration).expect("decomposes");
            let duration_ms = duration.as_millis() as i64;

            prop_assert!(!fragments.is_empty());
            prop_assert!(fragments.first().expect("nonempty").start() <= query.start());
            prop_assert!(fragments.last().expect("nonempty").stop() >= query.stop());
            for fragment in &fragments {
                prop_assert_eq!(fragment.duration(), duration);
                prop_assert_eq!(fragment.start().timestamp_millis().rem_euclid(duration_ms), 0);
            }
            for pair in fragments.windows(2) {
                prop_assert_eq!(pair[0].stop(), pair[1].start());
            }
        }

        /// Overlapping queries share identical fragment boundaries: each
        /// fragment of one query that intersects the other query appears
        /// verbatim in the other query's decomposition.
        #[test]
        fn prop_alignment_is_stable_across_queries(
            a in query_strategy(),
            b in query_strategy(),
            duration in duration_strategy(),
        ) {
            let fragments_a = fragments_for(&a, duration).expect("decomposes");
            let fragments_b = fragments_for(&b, duration).expect("decomposes");
            for fragment in &fragments_a {
                if fragment.intersects(&b) {
                    prop_assert!(fragments_b.contains(fragment));
                }
            }
        }
    }
}
