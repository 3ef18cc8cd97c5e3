//! Tessella Test Utilities
//!
//! Centralized test infrastructure for the Tessella workspace:
//! - Mock upstream provider with call counting and scripted outcomes
//! - Mock product range oracle
//! - Deterministic series fixtures

// Re-export the seams the mocks implement, so tests need one import.
pub use tessella_cache::{FragmentResponse, ProductRangeOracle, UpstreamProvider};

// Re-export core types for convenience
pub use tessella_core::{
    FetchOptions, Interval, Namespace, ProductId, Sample, Series, TessellaResult, Timestamp,
    UpstreamError,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

// ============================================================================
// FIXTURES
// ============================================================================

/// A deterministic series over `interval`: one sample at every
/// epoch-aligned multiple of `step` inside the window, carrying its own
/// millisecond offset as the value.
///
/// Alignment to the epoch (not to `interval.start`) means overlapping
/// fetches produce identical samples where they overlap, like a real
/// provider re-serving the same measurements.
pub fn linear_series(interval: &Interval, step: Duration) -> Series {
    let step_ms = step.as_millis() as i64;
    if step_ms <= 0 {
        return Series::new();
    }
    let start_ms = interval.start().timestamp_millis();
    let stop_ms = interval.stop().timestamp_millis();

    let mut at_ms = start_ms.div_euclid(step_ms) * step_ms;
    if at_ms < start_ms {
        at_ms += step_ms;
    }

    let mut samples = Vec::new();
    while at_ms < stop_ms {
        if let Some(at) = DateTime::from_timestamp_millis(at_ms) {
            samples.push(Sample::new(at, vec![at_ms as f64]));
        }
        at_ms += step_ms;
    }
    Series::from_samples(samples)
}

// ============================================================================
// MOCK UPSTREAM PROVIDER
// ============================================================================

/// What the mock answers when asked for a fragment.
#[derive(Debug, Clone)]
enum MockBehavior {
    /// Serve a [`linear_series`] over the requested interval.
    Serve,
    /// Report that no data exists for the interval.
    NoData,
    /// Fail with the given error.
    Fail(UpstreamError),
}

/// Mock upstream provider with call counting.
///
/// Every call is counted and its requested interval recorded, so tests
/// can assert the no-duplicate-fetch guarantee and the exact fragment
/// boundaries that were requested.
#[derive(Debug)]
pub struct MockUpstreamProvider {
    step: Duration,
    last_updated: Timestamp,
    behavior: MockBehavior,
    delay: Option<Duration>,
    calls: AtomicU64,
    requested: Mutex<Vec<Interval>>,
}

impl MockUpstreamProvider {
    /// A provider serving a [`linear_series`] sampled every `step`.
    pub fn serving(step: Duration) -> Self {
        Self {
            step,
            last_updated: Utc::now(),
            behavior: MockBehavior::Serve,
            delay: None,
            calls: AtomicU64::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// A provider that reports no data for every interval.
    pub fn empty() -> Self {
        Self {
            behavior: MockBehavior::NoData,
            ..Self::serving(Duration::from_secs(60))
        }
    }

    /// A provider that fails every call with `error`.
    pub fn failing(error: UpstreamError) -> Self {
        Self {
            behavior: MockBehavior::Fail(error),
            ..Self::serving(Duration::from_secs(60))
        }
    }

    /// Set the instant the provider claims its data was last modified.
    /// Freshness-conditioned calls with a threshold at or after this
    /// instant answer `NotModified`.
    pub fn with_last_updated(mut self, at: Timestamp) -> Self {
        self.last_updated = at;
        self
    }

    /// Delay every call, so concurrent callers genuinely overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The intervals requested so far, in call order.
    pub fn requested_intervals(&self) -> Vec<Interval> {
        self.requested
            .lock()
            .map(|requested| requested.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UpstreamProvider for MockUpstreamProvider {
    async fn fetch_fragment(
        &self,
        _product: &ProductId,
        interval: &Interval,
        if_newer_than: Option<Timestamp>,
    ) -> Result<FragmentResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(*interval);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(threshold) = if_newer_than {
            if self.last_updated <= threshold {
                return Ok(FragmentResponse::NotModified);
            }
        }

        match &self.behavior {
            MockBehavior::Serve => Ok(FragmentResponse::Data {
                series: linear_series(interval, self.step),
                version_token: Some(self.last_updated.to_rfc3339()),
            }),
            MockBehavior::NoData => Ok(FragmentResponse::NoData),
            MockBehavior::Fail(error) => Err(error.clone()),
        }
    }
}

// ============================================================================
// MOCK RANGE ORACLE
// ============================================================================

/// Mock product range oracle answering the same range for every product.
#[derive(Debug)]
pub struct MockRangeOracle {
    range: Option<Interval>,
}

impl MockRangeOracle {
    /// An oracle that knows no ranges; queries are never short-circuited.
    pub fn unbounded() -> Self {
        Self { range: None }
    }

    /// An oracle declaring every product valid exactly over `range`.
    pub fn covering(range: Interval) -> Self {
        Self { range: Some(range) }
    }
}

#[async_trait]
impl ProductRangeOracle for MockRangeOracle {
    async fn valid_range(&self, _product: &ProductId) -> TessellaResult<Option<Interval>> {
        Ok(self.range)
    }
}

// ============================================================================
// TESTS
// ============================================================================
