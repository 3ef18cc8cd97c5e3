//! Store and collaborator traits.
//!
//! The cache core is generic over three seams: where fragments persist
//! ([`StoreBackend`]), where they come from ([`UpstreamProvider`]), and
//! who knows a product's declared time range ([`ProductRangeOracle`]).
//! The core never sees a wire protocol or file format through any of
//! them.

use async_trait::async_trait;

use tessella_core::{
    Interval, Namespace, ProductId, Series, TessellaResult, Timestamp, UpstreamError,
};

use crate::key::FragmentKey;
use crate::record::FragmentRecord;

/// Persistent keyed storage of fragment records.
///
/// Implementations must be safe for concurrent readers and writers: a
/// write of one fragment never corrupts or partially exposes another.
/// Records that fail integrity checks on read are deleted and reported
/// as absent, so callers refetch them.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Get a record, or `None` if absent or unreadable.
    async fn get(&self, key: &FragmentKey) -> TessellaResult<Option<FragmentRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: &FragmentRecord) -> TessellaResult<()>;

    /// Delete a record. Returns true if one existed.
    async fn delete(&self, key: &FragmentKey) -> TessellaResult<bool>;

    /// All readable records for one product, in fragment-start order.
    async fn list_for_product(
        &self,
        namespace: &Namespace,
        product: &ProductId,
    ) -> TessellaResult<Vec<FragmentRecord>>;

    /// Delete every record for one product. Returns the count removed.
    async fn wipe_product(
        &self,
        namespace: &Namespace,
        product: &ProductId,
    ) -> TessellaResult<u64>;

    /// Delete every record in a namespace. Returns the count removed.
    /// Used for catalog-driven full refreshes.
    async fn wipe_namespace(&self, namespace: &Namespace) -> TessellaResult<u64>;

    /// Presence counters for this backend.
    async fn stats(&self) -> TessellaResult<CacheStats>;
}

/// What the upstream said about one fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentResponse {
    /// Data exists; the series covers the requested interval (it may
    /// extend past it, the assembler trims).
    Data {
        /// The fetched samples.
        series: Series,
        /// Provider's version or last-modified token, if it sent one.
        version_token: Option<String>,
    },
    /// The provider explicitly reports nothing exists for this interval.
    NoData,
    /// The provider reports nothing newer than the supplied freshness
    /// instant. Only returned when `if_newer_than` was passed.
    NotModified,
}

/// Range-based download endpoint of a data provider.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    /// Fetch the samples of `product` within `interval`.
    ///
    /// `if_newer_than` carries the caller's freshness condition through
    /// to the provider (If-Modified-Since semantics). Timeouts are the
    /// provider's concern and surface as [`UpstreamError::Timeout`].
    async fn fetch_fragment(
        &self,
        product: &ProductId,
        interval: &Interval,
        if_newer_than: Option<Timestamp>,
    ) -> Result<FragmentResponse, UpstreamError>;
}

/// Knows the time range over which a product is declared to exist.
#[async_trait]
pub trait ProductRangeOracle: Send + Sync {
    /// The product's declared range, or `None` when unknown (queries are
    /// then never short-circuited).
    async fn valid_range(&self, product: &ProductId) -> TessellaResult<Option<Interval>>;
}

/// Presence counters kept by store backends.
///
/// Hits and misses count raw record presence at the store; freshness is
/// the coordinator's concern and does not reclassify them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found a readable record.
    pub hits: u64,
    /// Number of reads that found nothing, or an unreadable record.
    pub misses: u64,
    /// Number of records currently stored.
    pub entry_count: u64,
    /// Approximate stored bytes.
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
