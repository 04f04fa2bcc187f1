// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded, self-expiring cache over a persistent key-value store.
//!
//! The [`CacheStore`] is a performance optimization, never a correctness
//! dependency: every persistence failure degrades to a miss or a no-op.
//! Entries carry their own expiry; the store is bounded by key count and
//! evicts least-recently-used entries to restore the bound on insert.
//!
//! Values are persisted as a JSON envelope (`value`, `stored_at`,
//! `expires_at`) under a configurable key prefix, so the engine can share
//! a storage instance with the rest of the application.

pub mod storage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics;
use crate::transit_data::now_millis;
use storage::KeyValueStorage;

/// A time-bounded cache entry. Immutable once created; a refresh writes a
/// whole new envelope, it never mutates the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    /// When the entry was written (epoch millis)
    pub stored_at: i64,
    /// When the entry stops being served by [`CacheStore::get`] (epoch millis)
    pub expires_at: i64,
}

impl<T> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        let now = now_millis();
        Self {
            value,
            stored_at: now,
            expires_at: now + ttl.as_millis() as i64,
        }
    }

    /// Whether the entry is past its expiry at time `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Copy)]
struct EntryMeta {
    stored_at: i64,
    expires_at: i64,
    size_bytes: usize,
}

/// In-memory bookkeeping of cached keys: recency order for LRU eviction
/// plus per-entry metadata for sweeps and observability. Rebuilt lazily
/// from storage hits after a restart.
#[derive(Default)]
struct LruIndex {
    /// Least-recently-used first
    order: Vec<String>,
    meta: HashMap<String, EntryMeta>,
}

impl LruIndex {
    fn touch(&mut self, key: &str, meta: EntryMeta) {
        self.order.retain(|k| k != key);
        self.order.push(key.to_string());
        self.meta.insert(key.to_string(), meta);
    }

    fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.meta.remove(key);
    }

    /// Drop least-recently-used keys until at most `max` remain,
    /// returning the victims.
    fn evict_over(&mut self, max: usize) -> Vec<String> {
        let mut victims = Vec::new();
        while self.order.len() > max {
            let victim = self.order.remove(0);
            self.meta.remove(&victim);
            victims.push(victim);
        }
        victims
    }

    fn expired_keys(&self, now: i64) -> Vec<String> {
        self.meta
            .iter()
            .filter(|(_, m)| now >= m.expires_at)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn total_bytes(&self) -> usize {
        self.meta.values().map(|m| m.size_bytes).sum()
    }
}

/// Snapshot of one cached entry, for the admin surface.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: String,
    pub size_bytes: usize,
    pub stored_at: i64,
    pub expires_at: i64,
}

/// Bounded TTL cache. See the module docs for the contract.
pub struct CacheStore {
    storage: Arc<dyn KeyValueStorage>,
    prefix: String,
    max_entries: usize,
    index: Mutex<LruIndex>,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, prefix: impl Into<String>, max_entries: usize) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            max_entries,
            index: Mutex::new(LruIndex::default()),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Get a live entry. Returns `None` on miss, expiry, storage failure,
    /// or a corrupt envelope; an expired or corrupt entry is removed.
    /// A hit refreshes the key's LRU position.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (entry, size_bytes) = self.read_envelope::<T>("get", key).await?;

        if entry.is_expired_at(now_millis()) {
            debug!(key = %key, "cache entry expired, treating as miss");
            metrics::record_cache_op("get", "expired");
            self.remove(key).await;
            return None;
        }

        self.index.lock().touch(
            key,
            EntryMeta {
                stored_at: entry.stored_at,
                expires_at: entry.expires_at,
                size_bytes,
            },
        );
        metrics::record_cache_op("get", "hit");
        Some(entry.value)
    }

    /// Expiry-respecting read that never removes. The chain's cache tier
    /// reads through this so an expired entry stays available for the
    /// stale-if-error fallback; actual deletion is left to `set`
    /// overwrites, [`evict_expired`](Self::evict_expired), and `get`.
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (entry, size_bytes) = self.read_envelope::<T>("peek", key).await?;

        if entry.is_expired_at(now_millis()) {
            metrics::record_cache_op("peek", "expired");
            return None;
        }

        self.index.lock().touch(
            key,
            EntryMeta {
                stored_at: entry.stored_at,
                expires_at: entry.expires_at,
                size_bytes,
            },
        );
        metrics::record_cache_op("peek", "hit");
        Some(entry.value)
    }

    /// Stale-if-error read: return the value regardless of expiry, without
    /// touching recency or removing anything. Used only after every live
    /// tier has failed.
    pub async fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (entry, _) = self.read_envelope::<T>("get_stale", key).await?;
        metrics::record_cache_op("get_stale", "hit");
        Some(entry.value)
    }

    async fn read_envelope<T: DeserializeOwned>(
        &self,
        op: &'static str,
        key: &str,
    ) -> Option<(CacheEntry<T>, usize)> {
        let skey = self.storage_key(key);
        let raw = match self.storage.get_item(&skey).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_cache_op(op, "miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                metrics::record_cache_op(op, "error");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Some((entry, raw.len())),
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt cache envelope, dropping entry");
                metrics::record_cache_op(op, "corrupt");
                self.remove(key).await;
                None
            }
        }
    }

    /// Store a value with the given TTL, overwriting any prior entry and
    /// restoring the size bound before returning. Persistence failures
    /// are logged and swallowed.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl);
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "cache serialization failed, skipping write");
                metrics::record_cache_op("set", "error");
                return;
            }
        };
        let size_bytes = raw.len();

        if let Err(e) = self.storage.set_item(&self.storage_key(key), &raw).await {
            warn!(key = %key, error = %e, "cache write failed, continuing without cache");
            metrics::record_cache_op("set", "error");
            return;
        }

        let victims = {
            let mut index = self.index.lock();
            index.touch(
                key,
                EntryMeta {
                    stored_at: entry.stored_at,
                    expires_at: entry.expires_at,
                    size_bytes,
                },
            );
            index.evict_over(self.max_entries)
        };

        if !victims.is_empty() {
            debug!(key = %key, evicted = victims.len(), "cache bound exceeded, evicted LRU entries");
            metrics::record_cache_eviction(victims.len());
            self.remove_from_storage(&victims).await;
        }

        let index = self.index.lock();
        metrics::set_cache_entries(index.len());
        metrics::set_cache_bytes(index.total_bytes());
        drop(index);

        metrics::record_cache_op("set", "ok");
    }

    /// Remove one entry (index and storage), best effort.
    pub async fn remove(&self, key: &str) {
        self.index.lock().remove(key);
        if let Err(e) = self.storage.remove_item(&self.storage_key(key)).await {
            warn!(key = %key, error = %e, "cache remove failed");
        }
    }

    /// Sweep all entries past their expiry. Safe to call opportunistically
    /// or from a timer; only entries the index knows about are swept.
    pub async fn evict_expired(&self) -> usize {
        let expired = {
            let mut index = self.index.lock();
            let keys = index.expired_keys(now_millis());
            for key in &keys {
                index.remove(key);
            }
            keys
        };

        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired cache entries");
            metrics::record_cache_eviction(expired.len());
            self.remove_from_storage(&expired).await;
        }
        expired.len()
    }

    /// Remove every entry under this store's prefix, including entries
    /// persisted by a previous process the index has never seen.
    pub async fn clear(&self) {
        {
            let mut index = self.index.lock();
            *index = LruIndex::default();
        }

        let keys = match self.storage.get_all_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cache clear: listing keys failed");
                return;
            }
        };
        let ours: Vec<String> = keys
            .into_iter()
            .filter(|k| k.starts_with(&self.prefix))
            .collect();
        if ours.is_empty() {
            return;
        }
        if let Err(e) = self.storage.multi_remove(&ours).await {
            warn!(error = %e, "cache clear: removal failed");
        }
        metrics::set_cache_entries(0);
        metrics::set_cache_bytes(0);
        debug!(removed = ours.len(), "cache cleared");
    }

    /// Number of keys the index currently tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-entry snapshots for the admin surface, least-recently-used first.
    #[must_use]
    pub fn entries(&self) -> Vec<EntryInfo> {
        let index = self.index.lock();
        index
            .order
            .iter()
            .filter_map(|key| {
                index.meta.get(key).map(|m| EntryInfo {
                    key: key.clone(),
                    size_bytes: m.size_bytes,
                    stored_at: m.stored_at,
                    expires_at: m.expires_at,
                })
            })
            .collect()
    }

    async fn remove_from_storage(&self, keys: &[String]) {
        let skeys: Vec<String> = keys.iter().map(|k| self.storage_key(k)).collect();
        if let Err(e) = self.storage.multi_remove(&skeys).await {
            warn!(error = %e, "cache eviction: storage removal failed");
        }
    }
}
