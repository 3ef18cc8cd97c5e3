//! Fetch coordination.
//!
//! [`FetchCoordinator`] is the entry point of the cache: it decomposes a
//! query into aligned fragments, serves what the store already holds,
//! fetches the rest from the configured sources, and hands everything to
//! the assembler.
//!
//! # Deduplication
//!
//! Concurrent fetches of the same fragment share one upstream call. The
//! pending table maps each in-flight [`FragmentKey`] to a shared,
//! single-resolution future; the first caller spawns the actual fetch as
//! a task and later callers clone the handle. Spawning (rather than
//! polling inline) is what keeps a shared flight running when the caller
//! that started it disappears: remaining waiters still get its result.
//! The table entry is removed when the flight resolves, success or
//! failure, regardless of how many callers were waiting.
//!
//! Deduplication is keyed by fragment, not by query, so two different
//! queries sharing a fragment still download it once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use tessella_core::{
    FetchOptions, Interval, Namespace, ProductConfig, ProductId, Series, StoreError,
    TessellaError, TessellaResult, TimeTable, Timestamp, UpstreamError,
};

use crate::assembler::{self, FragmentPayload};
use crate::coverage::CoverageTable;
use crate::indexer;
use crate::key::FragmentKey;
use crate::record::{FragmentData, FragmentRecord};
use crate::traits::{
    CacheStats, FragmentResponse, ProductRangeOracle, StoreBackend, UpstreamProvider,
};

/// Terminal outcome of a fetch.
///
/// Failures are `Err(TessellaError)`, never outcomes: every variant here
/// is a valid answer about the data.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Samples inside the requested window, stitched and trimmed.
    Data(Series),
    /// The window resolved, but holds no samples (the provider had
    /// nothing there, e.g. the instrument was off).
    Empty,
    /// The caller asked for data newer than its freshness instant and
    /// the upstream reports nothing newer exists.
    NoNewData,
    /// The query does not intersect the product's declared range; no
    /// source was contacted.
    OutOfRange,
}

impl FetchOutcome {
    /// The stitched series, if this outcome carries data.
    pub fn series(&self) -> Option<&Series> {
        match self {
            Self::Data(series) => Some(series),
            _ => None,
        }
    }

    /// Consume the outcome and return the series, if any.
    pub fn into_series(self) -> Option<Series> {
        match self {
            Self::Data(series) => Some(series),
            _ => None,
        }
    }

    /// True if this outcome carries data.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}

/// Resolution of one deduplicated fragment flight.
#[derive(Debug, Clone)]
enum FlightResult {
    /// The fragment was fetched and stored (with data or as an explicit
    /// empty record).
    Stored(FragmentRecord),
    /// The upstream reported nothing newer than the freshness instant.
    NotModified,
}

type SharedFlight = Shared<BoxFuture<'static, Result<FlightResult, TessellaError>>>;

/// Orchestrates fragment lookup, deduplicated fetching and assembly for
/// one namespace.
///
/// # Type Parameters
///
/// - `S`: the fragment store
/// - `U`: the primary upstream provider
/// - `O`: the product range oracle
pub struct FetchCoordinator<S, U, O>
where
    S: StoreBackend,
    U: UpstreamProvider,
    O: ProductRangeOracle,
{
    namespace: Namespace,
    store: Arc<S>,
    upstream: Arc<U>,
    oracle: Arc<O>,
    /// Optional alternate source tried before the primary provider.
    proxy: Option<Arc<dyn UpstreamProvider>>,
    coverage: Arc<CoverageTable>,
    /// In-flight fragment fetches, keyed by the exact fragment.
    pending: Arc<Mutex<HashMap<FragmentKey, SharedFlight>>>,
    default_config: ProductConfig,
    overrides: Arc<RwLock<HashMap<ProductId, ProductConfig>>>,
}

impl<S, U, O> FetchCoordinator<S, U, O>
where
    S: StoreBackend + 'static,
    U: UpstreamProvider + 'static,
    O: ProductRangeOracle,
{
    /// Create a coordinator with the default product configuration
    /// (12 h fragments, 7 day retention).
    pub fn new(namespace: Namespace, store: Arc<S>, upstream: Arc<U>, oracle: Arc<O>) -> Self {
        Self {
            namespace,
            store,
            upstream,
            oracle,
            proxy: None,
            coverage: Arc::new(CoverageTable::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            default_config: ProductConfig::default(),
            overrides: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the default product configuration.
    ///
    /// # Errors
    ///
    /// Returns the config's own validation error if it is unusable.
    pub fn with_default_config(mut self, config: ProductConfig) -> TessellaResult<Self> {
        config.validate()?;
        self.default_config = config;
        Ok(self)
    }

    /// Configure an alternate source tried before the primary provider.
    pub fn with_proxy(mut self, proxy: Arc<dyn UpstreamProvider>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Override the configuration of one product.
    pub fn set_product_config(
        &self,
        product: ProductId,
        config: ProductConfig,
    ) -> TessellaResult<()> {
        config.validate()?;
        let mut overrides = self
            .overrides
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        overrides.insert(product, config);
        Ok(())
    }

    /// The namespace this coordinator serves.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Presence counters of the underlying store.
    pub async fn store_stats(&self) -> TessellaResult<CacheStats> {
        self.store.stats().await
    }

    /// Fetch `product` over `query`.
    ///
    /// The request short-circuits to [`FetchOutcome::OutOfRange`] without
    /// contacting any source when the oracle declares the query outside
    /// the product's range, and to [`FetchOutcome::NoNewData`] when a
    /// freshness-conditioned fragment fetch reports nothing newer.
    pub async fn fetch(
        &self,
        product: &ProductId,
        query: Interval,
        options: FetchOptions,
    ) -> TessellaResult<FetchOutcome> {
        if let Some(valid_range) = self.oracle.valid_range(product).await? {
            if !valid_range.intersects(&query) {
                warn!(
                    %product, %query, %valid_range,
                    "requested interval outside the product's declared range"
                );
                return Ok(FetchOutcome::OutOfRange);
            }
        }
        if query.is_empty() {
            return Ok(FetchOutcome::Empty);
        }
        if options.disable_cache {
            return self.fetch_uncached(product, &query, &options).await;
        }

        let config = self.config_for(product)?;
        let fragments = indexer::fragments_for(&query, config.fragment_duration)?;
        self.rebuild_coverage_if_needed(product, &config).await?;

        let now = Utc::now();
        let mut payloads: Vec<FragmentPayload> = Vec::with_capacity(fragments.len());
        let mut flights: Vec<SharedFlight> = Vec::new();
        for fragment in fragments {
            let key = FragmentKey::new(self.namespace.clone(), product.clone(), fragment);
            match self.cached_record(&key, &config, now).await? {
                Some(record) => {
                    debug!(%key, "fragment cache hit");
                    if let Some(payload) = record_payload(&record) {
                        payloads.push(payload);
                    }
                }
                None => {
                    debug!(%key, "fragment cache miss");
                    flights.push(self.join_or_spawn_flight(key, &options));
                }
            }
        }

        for flight in flights {
            match flight.await? {
                FlightResult::Stored(record) => {
                    if let Some(payload) = record_payload(&record) {
                        payloads.push(payload);
                    }
                }
                // Any fragment with nothing newer resolves the whole
                // request; remaining flights finish in the background.
                FlightResult::NotModified => return Ok(FetchOutcome::NoNewData),
            }
        }

        let series = assembler::assemble(&payloads, &query);
        if series.is_empty() {
            Ok(FetchOutcome::Empty)
        } else {
            Ok(FetchOutcome::Data(series))
        }
    }

    /// Fetch by dataset and variable name, joining them into the
    /// product's `"DATASET/VARIABLE"` id.
    pub async fn fetch_variable(
        &self,
        dataset: &str,
        variable: &str,
        query: Interval,
        options: FetchOptions,
    ) -> TessellaResult<FetchOutcome> {
        let product = ProductId::from_parts(dataset, variable)?;
        self.fetch(&product, query, options).await
    }

    /// Remove every stored fragment and all coverage for `product`.
    /// Returns the number of records removed.
    pub async fn invalidate_product(&self, product: &ProductId) -> TessellaResult<u64> {
        let removed = self.store.wipe_product(&self.namespace, product).await?;
        self.coverage.clear(&self.namespace, product)?;
        Ok(removed)
    }

    /// The product's covered ranges as observed by this process.
    pub fn covered_ranges(&self, product: &ProductId) -> TessellaResult<TimeTable> {
        self.coverage.to_timetable(
            &self.namespace,
            product,
            format!("{}:{} cached ranges", self.namespace, product),
        )
    }

    /// The parts of `query` this process has not seen cached.
    pub fn missing_ranges(
        &self,
        product: &ProductId,
        query: &Interval,
    ) -> TessellaResult<Vec<Interval>> {
        self.coverage.missing(&self.namespace, product, query)
    }

    fn config_for(&self, product: &ProductId) -> TessellaResult<ProductConfig> {
        let overrides = self.overrides.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(overrides
            .get(product)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone()))
    }

    /// Rebuild the in-memory coverage of `product` from the store, once
    /// per process.
    async fn rebuild_coverage_if_needed(
        &self,
        product: &ProductId,
        config: &ProductConfig,
    ) -> TessellaResult<()> {
        if !self.coverage.ensure_tracked(&self.namespace, product)? {
            return Ok(());
        }
        let records = self.store.list_for_product(&self.namespace, product).await?;
        let now = Utc::now();
        for record in records {
            if !record.is_stale(&config.mode, now) {
                self.coverage
                    .mark_covered(&self.namespace, product, record.key.covers())?;
            }
        }
        Ok(())
    }

    /// A usable stored record for the fragment, or `None` when the
    /// fragment must be fetched.
    async fn cached_record(
        &self,
        key: &FragmentKey,
        config: &ProductConfig,
        now: Timestamp,
    ) -> TessellaResult<Option<FragmentRecord>> {
        // A coverage gap means the store cannot have a usable record;
        // covered only promises one existed, so the read stays
        // authoritative.
        let gaps = self
            .coverage
            .missing(&self.namespace, key.product(), &key.covers())?;
        if !gaps.is_empty() {
            return Ok(None);
        }

        let Some(record) = self.store.get(key).await? else {
            return Ok(None);
        };
        if record.is_stale(&config.mode, now) {
            debug!(%key, "fragment record past retention, refetching");
            self.store.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Join the fragment's in-flight fetch, or start one.
    fn join_or_spawn_flight(&self, key: FragmentKey, options: &FetchOptions) -> SharedFlight {
        // A poisoned pending table only means a flight panicked; the map
        // itself is still consistent.
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = pending.get(&key) {
            debug!(%key, "joining in-flight fragment fetch");
            return flight.clone();
        }

        let store = Arc::clone(&self.store);
        let coverage = Arc::clone(&self.coverage);
        let upstream = Arc::clone(&self.upstream);
        let proxy = if options.disable_proxy {
            None
        } else {
            self.proxy.clone()
        };
        let pending_table = Arc::clone(&self.pending);
        let if_newer_than = options.if_newer_than;
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let result =
                fetch_and_store(store, coverage, upstream, proxy, task_key.clone(), if_newer_than)
                    .await;
            // Tear down the entry on any resolution; waiters already hold
            // the shared handle.
            pending_table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_key);
            result
        });

        let product = key.product().clone();
        let flight: SharedFlight = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(UpstreamError::Aborted {
                    product: product.as_str().to_string(),
                    reason: join_error.to_string(),
                }
                .into()),
            }
        }
        .boxed()
        .shared();

        pending.insert(key, flight.clone());
        flight
    }

    /// Serve a request with the fragment cache bypassed: the exact query
    /// window is fetched from the sources and nothing is stored.
    async fn fetch_uncached(
        &self,
        product: &ProductId,
        query: &Interval,
        options: &FetchOptions,
    ) -> TessellaResult<FetchOutcome> {
        let proxy = if options.disable_proxy {
            None
        } else {
            self.proxy.as_deref()
        };
        let response =
            fetch_from_sources(self.upstream.as_ref(), proxy, product, query, options.if_newer_than)
                .await?;
        match response {
            FragmentResponse::NotModified => Ok(FetchOutcome::NoNewData),
            FragmentResponse::NoData => Ok(FetchOutcome::Empty),
            FragmentResponse::Data { series, .. } => {
                let payload = FragmentPayload::new(*query, Utc::now(), series);
                let assembled = assembler::assemble(std::slice::from_ref(&payload), query);
                if assembled.is_empty() {
                    Ok(FetchOutcome::Empty)
                } else {
                    Ok(FetchOutcome::Data(assembled))
                }
            }
        }
    }
}

impl<S, U, O> Clone for FetchCoordinator<S, U, O>
where
    S: StoreBackend,
    U: UpstreamProvider,
    O: ProductRangeOracle,
{
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            store: Arc::clone(&self.store),
            upstream: Arc::clone(&self.upstream),
            oracle: Arc::clone(&self.oracle),
            proxy: self.proxy.clone(),
            coverage: Arc::clone(&self.coverage),
            pending: Arc::clone(&self.pending),
            default_config: self.default_config.clone(),
            overrides: Arc::clone(&self.overrides),
        }
    }
}

/// The payload a record contributes to assembly, if any.
fn record_payload(record: &FragmentRecord) -> Option<FragmentPayload> {
    record.data.series().map(|series| {
        FragmentPayload::new(record.key.covers(), record.fetched_at, series.clone())
    })
}

/// Fetch one fragment from the configured sources and persist the result.
async fn fetch_and_store<S, U>(
    store: Arc<S>,
    coverage: Arc<CoverageTable>,
    upstream: Arc<U>,
    proxy: Option<Arc<dyn UpstreamProvider>>,
    key: FragmentKey,
    if_newer_than: Option<Timestamp>,
) -> Result<FlightResult, TessellaError>
where
    S: StoreBackend,
    U: UpstreamProvider,
{
    let interval = key.covers();
    let response = fetch_from_sources(
        upstream.as_ref(),
        proxy.as_deref(),
        key.product(),
        &interval,
        if_newer_than,
    )
    .await?;

    let (data, version_token) = match response {
        FragmentResponse::NotModified => return Ok(FlightResult::NotModified),
        FragmentResponse::Data {
            series,
            version_token,
        } => (FragmentData::Series(series), version_token),
        FragmentResponse::NoData => (FragmentData::NoData, None),
    };

    let record = FragmentRecord::new(key.clone(), data, Utc::now(), version_token);
    store.put(&record).await?;
    coverage.mark_covered(key.namespace(), key.product(), interval)?;
    Ok(FlightResult::Stored(record))
}

/// Try the proxy source first when configured, falling back to the
/// primary provider on any proxy failure.
async fn fetch_from_sources<U>(
    primary: &U,
    proxy: Option<&dyn UpstreamProvider>,
    product: &ProductId,
    interval: &Interval,
    if_newer_than: Option<Timestamp>,
) -> Result<FragmentResponse, UpstreamError>
where
    U: UpstreamProvider + ?Sized,
{
    if let Some(proxy) = proxy {
        match proxy.fetch_fragment(product, interval, if_newer_than).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                debug!(%product, %interval, %err, "proxy source failed, falling back to primary")
            }
        }
    }
    primary.fetch_fragment(product, interval, if_newer_than).await
}

