//! Fragment assembly.
//!
//! Takes the fragment payloads a query resolved to (from the store, the
//! upstream, or both) and stitches them into one series trimmed to
//! exactly the requested window. Fragments may overlap at their edges or
//! repeat samples after a refetch; assembly keeps one sample per instant,
//! preferring the most recently fetched copy.

use tessella_core::{Interval, Sample, Series, Timestamp};

/// One fragment's contribution to an assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentPayload {
    /// The interval this payload actually covers. May be wider than the
    /// samples' span (gaps are real absences) and wider than the
    /// requested window (assembly trims).
    pub covers: Interval,
    /// When this payload was fetched; newer wins on duplicate instants.
    pub fetched_at: Timestamp,
    /// The samples.
    pub series: Series,
}

impl FragmentPayload {
    /// Create a payload.
    pub fn new(covers: Interval, fetched_at: Timestamp, series: Series) -> Self {
        Self {
            covers,
            fetched_at,
            series,
        }
    }
}

/// Stitch `payloads` into one series restricted to `query`.
///
/// The result contains every sample whose instant falls inside both the
/// payload's covered interval and `[query.start, query.stop)`, in
/// strictly increasing time order. When two payloads carry a sample at
/// the same instant, the one with the later `fetched_at` survives.
///
/// An empty result means no samples existed in the window; the caller
/// distinguishes that from provider-level absence.
pub fn assemble(payloads: &[FragmentPayload], query: &Interval) -> Series {
    let mut tagged: Vec<(&Sample, Timestamp)> = Vec::new();
    for payload in payloads {
        let Some(window) = payload.covers.intersection(query) else {
            continue;
        };
        for sample in payload.series.samples() {
            if window.contains_instant(sample.at) {
                tagged.push((sample, payload.fetched_at));
            }
        }
    }

    // Stable sort by instant, then fetch time: for a duplicated instant
    // the latest fetch lands last and wins the replacement below.
    tagged.sort_by_key(|(sample, fetched_at)| (sample.at, *fetched_at));

    let mut samples: Vec<Sample> = Vec::with_capacity(tagged.len());
    for (sample, _) in tagged {
        match samples.last_mut() {
            Some(last) if last.at == sample.at => *last = sample.clone(),
            _ => samples.push(sample.clone()),
        }
    }
    Series::from_samples(samples)
}
