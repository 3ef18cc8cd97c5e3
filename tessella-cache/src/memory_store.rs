//! In-memory store backend.
//!
//! Holds encoded records in a sorted map behind an `RwLock`. Meant for
//! tests and short-lived embedding; the LMDB backend is the durable one.
//! Values go through the same binary codec as the persistent store, so
//! corruption handling is exercised identically.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

use tessella_core::{Namespace, ProductId, StoreError, TessellaResult};

use crate::key::FragmentKey;
use crate::record::FragmentRecord;
use crate::traits::{CacheStats, StoreBackend};

/// Store backend backed by a process-local sorted map.
#[derive(Debug, Default)]
pub struct MemoryStoreBackend {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    stats: RwLock<CacheStats>,
}

impl MemoryStoreBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    /// Collect the encoded keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &[u8]) -> TessellaResult<Vec<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn remove_keys(&self, keys: &[Vec<u8>]) -> TessellaResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut removed_bytes = 0u64;
        let mut removed = 0u64;
        for key in keys {
            if let Some(value) = entries.remove(key) {
                removed += 1;
                removed_bytes += (key.len() + value.len()) as u64;
            }
        }
        drop(entries);
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = stats.entry_count.saturating_sub(removed);
            stats.memory_bytes = stats.memory_bytes.saturating_sub(removed_bytes);
        }
        Ok(removed)
    }
}

#[async_trait]
impl StoreBackend for MemoryStoreBackend {
    async fn get(&self, key: &FragmentKey) -> TessellaResult<Option<FragmentRecord>> {
        let encoded_key = key.encode();
        let value = {
            let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
            entries.get(&encoded_key).cloned()
        };

        let Some(bytes) = value else {
            self.record_miss();
            return Ok(None);
        };

        match FragmentRecord::decode_value(key, &bytes) {
            Ok(record) => {
                self.record_hit();
                Ok(Some(record))
            }
            Err(err) => {
                // Unreadable entries are dropped so the fragment refetches.
                warn!(%key, %err, "dropping corrupt fragment record");
                self.remove_keys(std::slice::from_ref(&encoded_key))?;
                self.record_miss();
                Ok(None)
            }
        }
    }

    async fn put(&self, record: &FragmentRecord) -> TessellaResult<()> {
        let encoded_key = record.key.encode();
        let value = record.encode_value()?;
        let value_len = (encoded_key.len() + value.len()) as u64;

        let previous_len = {
            let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
            entries
                .insert(encoded_key.clone(), value)
                .map(|old| (encoded_key.len() + old.len()) as u64)
        };

        if let Ok(mut stats) = self.stats.write() {
            match previous_len {
                Some(old_len) => {
                    stats.memory_bytes = stats.memory_bytes.saturating_sub(old_len) + value_len;
                }
                None => {
                    stats.entry_count += 1;
                    stats.memory_bytes += value_len;
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &FragmentKey) -> TessellaResult<bool> {
        Ok(self.remove_keys(std::slice::from_ref(&key.encode()))? > 0)
    }

    async fn list_for_product(
        &self,
        namespace: &Namespace,
        product: &ProductId,
    ) -> TessellaResult<Vec<FragmentRecord>> {
        let prefix = FragmentKey::product_prefix(namespace, product);
        let keys = self.keys_with_prefix(&prefix)?;

        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut records = Vec::new();
        for encoded_key in keys {
            let Some(key) = FragmentKey::decode(&encoded_key) else {
                continue;
            };
            let Some(bytes) = entries.get(&encoded_key) else {
                continue;
            };
            match FragmentRecord::decode_value(&key, bytes) {
                Ok(record) => records.push(record),
                Err(err) => warn!(%key, %err, "skipping corrupt fragment record in listing"),
            }
        }
        Ok(records)
    }

    async fn wipe_product(
        &self,
        namespace: &Namespace,
        product: &ProductId,
    ) -> TessellaResult<u64> {
        let keys = self.keys_with_prefix(&FragmentKey::product_prefix(namespace, product))?;
        self.remove_keys(&keys)
    }

    async fn wipe_namespace(&self, namespace: &Namespace) -> TessellaResult<u64> {
        let keys = self.keys_with_prefix(&FragmentKey::namespace_prefix(namespace))?;
        self.remove_keys(&keys)
    }

    async fn stats(&self) -> TessellaResult<CacheStats> {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .map_err(|_| StoreError::LockPoisoned.into())
    }
}
