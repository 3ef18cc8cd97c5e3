//! Stored fragment records and their binary codec.
//!
//! A [`FragmentRecord`] is what one successful upstream fetch leaves in
//! the store: the payload (or an explicit "nothing exists here" marker),
//! when it was fetched, and the upstream's version token if it sent one.
//!
//! # Value Format
//!
//! Records encode to `[schema: 1 byte][fetched_at millis: 8 bytes LE]
//! [sha256 of body: 32 bytes][body: JSON]`. The hash and schema byte are
//! checked on decode; any mismatch surfaces as [`StoreError::Corruption`],
//! which readers treat as a cache miss so the fragment is refetched
//! rather than served mangled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tessella_core::{
    compute_content_hash, CacheMode, Series, StoreError, Timestamp,
};

use crate::key::FragmentKey;

/// Version tag written into every stored record.
pub const SCHEMA_VERSION: u8 = 1;

/// Offset of the JSON body within an encoded value.
const HEADER_LEN: usize = 1 + 8 + 32;

/// Payload of one stored fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FragmentData {
    /// Samples the upstream returned for this fragment.
    Series(Series),
    /// The upstream explicitly reported that no data exists for this
    /// fragment. Stored so repeat queries over the same window cost no
    /// further upstream calls.
    NoData,
}

impl FragmentData {
    /// The samples, if this fragment holds any.
    pub fn series(&self) -> Option<&Series> {
        match self {
            Self::Series(series) => Some(series),
            Self::NoData => None,
        }
    }

    /// True for the explicit empty marker.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// Serialized body of a record value; the parts not kept in the header.
#[derive(Debug, Serialize, Deserialize)]
struct StoredBody {
    data: FragmentData,
    version_token: Option<String>,
}

/// One stored fragment: key, payload and fetch metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRecord {
    /// The key this record is stored under.
    pub key: FragmentKey,
    /// The fetched payload.
    pub data: FragmentData,
    /// When the upstream fetch completed.
    pub fetched_at: Timestamp,
    /// Upstream version/modification token, when the provider sent one.
    pub version_token: Option<String>,
    /// Schema tag the record was written with.
    pub schema_version: u8,
}

impl FragmentRecord {
    /// Create a record with the current schema version.
    pub fn new(
        key: FragmentKey,
        data: FragmentData,
        fetched_at: Timestamp,
        version_token: Option<String>,
    ) -> Self {
        Self {
            key,
            data,
            fetched_at,
            version_token,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Whether the record has outlived its retention under `mode`.
    ///
    /// Versioned products never go stale: their upstream artifacts are
    /// immutable once published, so presence alone means validity.
    pub fn is_stale(&self, mode: &CacheMode, now: Timestamp) -> bool {
        match mode.retention() {
            None => false,
            Some(retention) => {
                let age = (now - self.fetched_at).to_std().unwrap_or_default();
                age > retention
            }
        }
    }

    /// Encode the record's value bytes (the key is stored separately).
    pub fn encode_value(&self) -> Result<Vec<u8>, StoreError> {
        let body = serde_json::to_vec(&StoredBody {
            data: self.data.clone(),
            version_token: self.version_token.clone(),
        })
        .map_err(|e| StoreError::Serialization {
            key: self.key.to_string(),
            reason: e.to_string(),
        })?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.push(self.schema_version);
        bytes.extend_from_slice(&self.fetched_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&compute_content_hash(&body));
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decode a record read back under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] when the value is truncated,
    /// carries an unknown schema tag, fails the integrity hash, or does
    /// not parse.
    pub fn decode_value(key: &FragmentKey, bytes: &[u8]) -> Result<Self, StoreError> {
        let corrupt = |reason: &str| StoreError::Corruption {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt("value shorter than header"));
        }
        if bytes[0] != SCHEMA_VERSION {
            return Err(corrupt(&format!("unknown schema tag {}", bytes[0])));
        }

        let millis = i64::from_le_bytes(bytes[1..9].try_into().map_err(|_| corrupt("bad timestamp"))?);
        let fetched_at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| corrupt("timestamp out of range"))?;

        let stored_hash: [u8; 32] = bytes[9..HEADER_LEN]
            .try_into()
            .map_err(|_| corrupt("bad hash"))?;
        let body = &bytes[HEADER_LEN..];
        if compute_content_hash(body) != stored_hash {
            return Err(corrupt("integrity hash mismatch"));
        }

        let body: StoredBody =
            serde_json::from_slice(body).map_err(|e| corrupt(&format!("body parse: {e}")))?;

        Ok(Self {
            key: key.clone(),
            data: body.data,
            fetched_at,
            version_token: body.version_token,
            schema_version: SCHEMA_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessella_core::{Interval, Namespace, ProductId, Sample};

    fn key() -> FragmentKey {
        FragmentKey::new(
            Namespace::new("cda").expect("valid"),
            ProductId::new("THA_L2_FGM/tha_fgl_gsm").expect("valid"),
            Interval::from_millis(0, 43_200_000).expect("valid"),
        )
    }

    fn sample_series() -> Series {
        Series::from_samples(vec![
            Sample::new(DateTime::from_timestamp_millis(100).expect("valid"), vec![1.0, 2.0]),
            Sample::new(DateTime::from_timestamp_millis(200).expect("valid"), vec![3.0, 4.0]),
        ])
    }

    fn record() -> FragmentRecord {
        FragmentRecord::new(
            key(),
            FragmentData::Series(sample_series()),
            Utc::now(),
            Some("2014-06-02T00:00:00Z".to_string()),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let record = record();
        let bytes = record.encode_value().expect("encodes");
        let decoded = FragmentRecord::decode_value(&record.key, &bytes).expect("decodes");

        assert_eq!(decoded.data, record.data);
        assert_eq!(decoded.version_token, record.version_token);
        assert_eq!(decoded.schema_version, SCHEMA_VERSION);
        // Millisecond precision survives the header.
        assert_eq!(
            decoded.fetched_at.timestamp_millis(),
            record.fetched_at.timestamp_millis()
        );
    }

    #[test]
    fn test_no_data_marker_roundtrip() {
        let record = FragmentRecord::new(key(), FragmentData::NoData, Utc::now(), None);
        let bytes = record.encode_value().expect("encodes");
        let decoded = FragmentRecord::decode_value(&record.key, &bytes).expect("decodes");
        assert!(decoded.data.is_no_data());
        assert!(decoded.data.series().is_none());
    }

    #[test]
    fn test_decode_rejects_truncated_value() {
        let err = FragmentRecord::decode_value(&key(), &[SCHEMA_VERSION, 0, 0]).expect_err("corrupt");
        assert!(matches!(err, StoreError::Corruption { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_schema() {
        let mut bytes = record().encode_value().expect("encodes");
        bytes[0] = SCHEMA_VERSION + 1;
        let err = FragmentRecord::decode_value(&key(), &bytes).expect_err("corrupt");
        assert!(matches!(err, StoreError::Corruption { .. }));
    }

    #[test]
    fn test_decode_rejects_flipped_body_byte() {
        let mut bytes = record().encode_value().expect("encodes");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = FragmentRecord::decode_value(&key(), &bytes).expect_err("corrupt");
        assert!(matches!(err, StoreError::Corruption { ref reason, .. } if reason.contains("hash") || reason.contains("parse")));
    }

    #[test]
    fn test_staleness_in_freshness_checked_mode() {
        let mode = CacheMode::freshness_checked(Duration::from_secs(3600));
        let now = Utc::now();
        let fresh = FragmentRecord::new(key(), FragmentData::NoData, now, None);
        let old = FragmentRecord::new(
            key(),
            FragmentData::NoData,
            now - chrono::Duration::seconds(7200),
            None,
        );
        assert!(!fresh.is_stale(&mode, now));
        assert!(old.is_stale(&mode, now));
    }

    #[test]
    fn test_versioned_mode_never_stale() {
        let mode = CacheMode::versioned();
        let now = Utc::now();
        let ancient = FragmentRecord::new(
            key(),
            FragmentData::NoData,
            now - chrono::Duration::days(10_000),
            None,
        );
        assert!(!ancient.is_stale(&mode, now));
    }
}
