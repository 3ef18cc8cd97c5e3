//! Tessella Core - Data Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no cache logic, no I/O.

pub mod config;
pub mod error;
pub mod interval;
pub mod timetable;

pub use config::{CacheMode, FetchOptions, ProductConfig};
pub use error::{ConfigError, StoreError, TessellaError, TessellaResult, UpstreamError};
pub use interval::Interval;
pub use timetable::TimeTable;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for record integrity verification.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Cache namespace, usually one per upstream provider (e.g. `"cda"`).
///
/// Namespaces partition the store: all fragments for one provider can be
/// listed or wiped without touching another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    /// Create a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] for an empty name.
    pub fn new(name: impl Into<String>) -> TessellaResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "namespace".to_string(),
            }
            .into());
        }
        Ok(Self(name))
    }

    /// The namespace as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Product identifier in `"DATASET/VARIABLE"` form.
///
/// The dataset half names an upstream collection, the variable half one
/// measured quantity within it. Providers that address products by a
/// single opaque id use the whole string as the dataset with no variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(String);

impl ProductId {
    /// Create a product id from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] for an empty id.
    pub fn new(id: impl Into<String>) -> TessellaResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "product".to_string(),
            }
            .into());
        }
        Ok(Self(id))
    }

    /// Join a dataset and variable into a product id.
    pub fn from_parts(dataset: &str, variable: &str) -> TessellaResult<Self> {
        Self::new(format!("{dataset}/{variable}"))
    }

    /// The full id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(dataset, variable)`, if the id has the two-part form.
    pub fn split(&self) -> Option<(&str, &str)> {
        let (dataset, variable) = self.0.split_once('/')?;
        if dataset.is_empty() || variable.is_empty() {
            return None;
        }
        Some((dataset, variable))
    }

    /// The dataset half, or the whole id when there is no variable part.
    pub fn dataset(&self) -> &str {
        self.split().map(|(d, _)| d).unwrap_or(&self.0)
    }

    /// The variable half, if present.
    pub fn variable(&self) -> Option<&str> {
        self.split().map(|(_, v)| v)
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PAYLOAD TYPES
// ============================================================================

/// One measurement: an instant and the values recorded at it.
///
/// The value vector's width is product-defined (1 for a scalar, 3 for a
/// field vector, more for spectrograms) and constant within one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the measurement was taken.
    pub at: Timestamp,
    /// The recorded values.
    pub values: Vec<f64>,
}

impl Sample {
    /// Create a sample.
    pub fn new(at: Timestamp, values: Vec<f64>) -> Self {
        Self { at, values }
    }
}

/// A time-ordered sequence of samples.
///
/// # Invariant
///
/// Samples are sorted by timestamp, non-strictly: construction sorts and
/// [`Series::push`] inserts in order. Duplicate timestamps are permitted
/// here; the assembler resolves them when stitching fragments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    samples: Vec<Sample>,
}

impl Series {
    /// Create an empty series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a series from samples, sorting them by timestamp.
    ///
    /// The sort is stable, so samples sharing a timestamp keep their
    /// relative order.
    pub fn from_samples(mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|s| s.at);
        Self { samples }
    }

    /// Insert a sample at its time-ordered position.
    pub fn push(&mut self, sample: Sample) {
        let at = sample.at;
        let idx = self.samples.partition_point(|s| s.at <= at);
        self.samples.insert(idx, sample);
    }

    /// The samples in time order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the series holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The earliest sample, if any.
    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    /// The latest sample, if any.
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// A copy restricted to samples inside `window` (half-open).
    pub fn trim(&self, window: &Interval) -> Series {
        Series {
            samples: self
                .samples
                .iter()
                .filter(|s| window.contains_instant(s.at))
                .cloned()
                .collect(),
        }
    }

    /// Consume the series and return its samples.
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> Timestamp {
        DateTime::from_timestamp_millis(ms).expect("valid millis")
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = compute_content_hash(b"fragment payload");
        let b = compute_content_hash(b"fragment payload");
        let c = compute_content_hash(b"different payload");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_namespace_rejects_empty() {
        assert!(Namespace::new("").is_err());
        assert_eq!(Namespace::new("cda").expect("valid").as_str(), "cda");
    }

    #[test]
    fn test_product_id_two_part_form() {
        let product = ProductId::new("THA_L2_FGM/tha_fgl_gsm").expect("valid");
        assert_eq!(product.split(), Some(("THA_L2_FGM", "tha_fgl_gsm")));
        assert_eq!(product.dataset(), "THA_L2_FGM");
        assert_eq!(product.variable(), Some("tha_fgl_gsm"));
    }

    #[test]
    fn test_product_id_opaque_form() {
        let product = ProductId::new("sharedrequest-42").expect("valid");
        assert_eq!(product.split(), None);
        assert_eq!(product.dataset(), "sharedrequest-42");
        assert_eq!(product.variable(), None);
    }

    #[test]
    fn test_product_id_from_parts() {
        let product = ProductId::from_parts("WI_K0_SMS", "C_O_ratio").expect("valid");
        assert_eq!(product.as_str(), "WI_K0_SMS/C_O_ratio");
    }

    #[test]
    fn test_product_id_rejects_empty() {
        assert!(ProductId::new("").is_err());
    }

    #[test]
    fn test_series_from_samples_sorts() {
        let series = Series::from_samples(vec![
            Sample::new(ts(300), vec![3.0]),
            Sample::new(ts(100), vec![1.0]),
            Sample::new(ts(200), vec![2.0]),
        ]);
        let instants: Vec<i64> = series.samples().iter().map(|s| s.at.timestamp_millis()).collect();
        assert_eq!(instants, vec![100, 200, 300]);
    }

    #[test]
    fn test_series_push_keeps_order() {
        let mut series = Series::new();
        series.push(Sample::new(ts(200), vec![2.0]));
        series.push(Sample::new(ts(100), vec![1.0]));
        series.push(Sample::new(ts(300), vec![3.0]));
        let instants: Vec<i64> = series.samples().iter().map(|s| s.at.timestamp_millis()).collect();
        assert_eq!(instants, vec![100, 200, 300]);
    }

    #[test]
    fn test_series_trim_is_half_open() {
        let series = Series::from_samples(vec![
            Sample::new(ts(100), vec![1.0]),
            Sample::new(ts(200), vec![2.0]),
            Sample::new(ts(300), vec![3.0]),
        ]);
        let window = Interval::from_millis(100, 300).expect("valid");
        let trimmed = series.trim(&window);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed.first().expect("nonempty").at, ts(100));
        assert_eq!(trimmed.last().expect("nonempty").at, ts(200));
    }

    #[test]
    fn test_series_trim_empty_window() {
        let series = Series::from_samples(vec![Sample::new(ts(100), vec![1.0])]);
        let window = Interval::from_millis(500, 600).expect("valid");
        assert!(series.trim(&window).is_empty());
    }

    #[test]
    fn test_timestamp_alias_is_utc() {
        let instant: Timestamp = Utc.with_ymd_and_hms(2014, 6, 1, 23, 0, 0).unwrap();
        assert_eq!(instant.timezone(), Utc);
    }
}
