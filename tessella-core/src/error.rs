//! Error types for Tessella operations

use std::time::Duration;
use thiserror::Error;

/// Store layer errors.
///
/// All variants are `Clone`: a deduplicated fragment fetch resolves once
/// and every waiter receives its own copy of the same failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open store environment at {path}: {reason}")]
    EnvOpen { path: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Corrupt record for {key}: {reason}")]
    Corruption { key: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Upstream provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream unavailable for {product}: {reason}")]
    Unavailable { product: String, reason: String },

    #[error("Upstream timed out after {waited:?} for {product}")]
    Timeout { product: String, waited: Duration },

    #[error("Invalid response from upstream for {product}: {reason}")]
    InvalidResponse { product: String, reason: String },

    #[error("Fragment fetch aborted for {product}: {reason}")]
    Aborted { product: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tessella errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TessellaError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Tessella operations.
pub type TessellaResult<T> = Result<T, TessellaError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_corruption() {
        let err = StoreError::Corruption {
            key: "cda/THA_L2_FGM".to_string(),
            reason: "hash mismatch".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Corrupt record"));
        assert!(msg.contains("cda/THA_L2_FGM"));
        assert!(msg.contains("hash mismatch"));
    }

    #[test]
    fn test_upstream_error_display_timeout() {
        let err = UpstreamError::Timeout {
            product: "THA_L2_FGM/tha_fgl_gsm".to_string(),
            waited: Duration::from_secs(30),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("THA_L2_FGM/tha_fgl_gsm"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "fragment_duration".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("fragment_duration"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_tessella_error_from_variants() {
        let store = TessellaError::from(StoreError::LockPoisoned);
        assert!(matches!(store, TessellaError::Store(_)));

        let upstream = TessellaError::from(UpstreamError::Unavailable {
            product: "p".to_string(),
            reason: "connection refused".to_string(),
        });
        assert!(matches!(upstream, TessellaError::Upstream(_)));

        let config = TessellaError::from(ConfigError::MissingRequired {
            field: "namespace".to_string(),
        });
        assert!(matches!(config, TessellaError::Config(_)));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = TessellaError::from(UpstreamError::Aborted {
            product: "p".to_string(),
            reason: "task cancelled".to_string(),
        });
        assert_eq!(err.clone(), err);
    }
}
