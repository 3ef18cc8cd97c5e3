//! Cache configuration and per-request options.
//!
//! The cache operates in one of two modes, selected per product. The
//! mode is a tagged variant consumed by the fetch coordinator; there is
//! no dynamic dispatch between mode implementations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::Timestamp;

/// Validity model for cached fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// A stored fragment is permanently valid: the upstream publishes
    /// immutable, versioned artifacts that never change in place.
    Versioned,

    /// A stored fragment expires `retention` after it was fetched and is
    /// refetched on the next read past that point.
    ///
    /// Use this for providers that revise recent data (e.g. preliminary
    /// measurements replaced by calibrated ones).
    FreshnessChecked {
        /// How long a fetched fragment is trusted.
        retention: Duration,
    },
}

impl CacheMode {
    /// Create a Versioned mode.
    pub fn versioned() -> Self {
        Self::Versioned
    }

    /// Create a FreshnessChecked mode with the given retention.
    pub fn freshness_checked(retention: Duration) -> Self {
        Self::FreshnessChecked { retention }
    }

    /// Returns true if this is the versioned mode.
    pub fn is_versioned(&self) -> bool {
        matches!(self, Self::Versioned)
    }

    /// The retention period, or `None` in versioned mode where entries
    /// never expire.
    pub fn retention(&self) -> Option<Duration> {
        match self {
            Self::Versioned => None,
            Self::FreshnessChecked { retention } => Some(*retention),
        }
    }
}

/// Per-product cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductConfig {
    /// Duration of one cache fragment. Queries are decomposed into
    /// consecutive epoch-aligned fragments of exactly this length.
    pub fragment_duration: Duration,
    /// Validity model for stored fragments.
    pub mode: CacheMode,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            fragment_duration: Duration::from_secs(12 * 3600),
            mode: CacheMode::FreshnessChecked {
                retention: Duration::from_secs(7 * 24 * 3600),
            },
        }
    }
}

impl ProductConfig {
    /// Create a config with default values (12 h fragments, 7 day
    /// retention).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fragment duration.
    pub fn with_fragment_duration(mut self, duration: Duration) -> Self {
        self.fragment_duration = duration;
        self
    }

    /// Set the cache mode.
    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check the config is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a zero fragment duration
    /// or a zero retention, either of which would make every read a miss.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fragment_duration.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "fragment_duration".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if let Some(retention) = self.mode.retention() {
            if retention.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "retention".to_string(),
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Per-request fetch options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Only accept data the upstream modified after this instant. When
    /// the upstream reports nothing newer, the whole request resolves to
    /// the no-new-data outcome.
    pub if_newer_than: Option<Timestamp>,
    /// Bypass the fragment cache entirely: fetch exactly the requested
    /// window from the source and store nothing.
    pub disable_cache: bool,
    /// Skip the proxy source even when one is configured.
    pub disable_proxy: bool,
}

impl FetchOptions {
    /// Default options: cache and proxy enabled, no freshness condition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require data newer than the given instant.
    pub fn with_if_newer_than(mut self, instant: Timestamp) -> Self {
        self.if_newer_than = Some(instant);
        self
    }

    /// Bypass the fragment cache for this request.
    pub fn with_cache_disabled(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    /// Skip the proxy source for this request.
    pub fn with_proxy_disabled(mut self) -> Self {
        self.disable_proxy = true;
        self
    }
}
