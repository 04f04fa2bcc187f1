// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine facade.
//!
//! [`TransitEngine`] wires the components together and exposes the
//! application-facing contract:
//! - one-shot tiered fetches ([`realtime_trains`](TransitEngine::realtime_trains),
//!   [`station_info`](TransitEngine::station_info)) that resolve to
//!   `None` on total failure and never panic or error past this surface;
//! - shared polling subscriptions;
//! - observability and administration (`sync_status`, `force_sync`,
//!   `clear_cache`, `cache_info`).
//!
//! The engine is an explicit instance, not a global: construct it once
//! at startup and hand references to consumers. Tests build as many
//! isolated instances as they like.
//!
//! Realtime arrivals resolve through live -> replica -> cache with a
//! short TTL; station metadata has no live feed, so it resolves through
//! replica -> cache with a 24 h TTL.

pub mod fetch;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::storage::KeyValueStorage;
use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::health::{HealthTracker, SyncStatus};
use crate::metrics;
use crate::subscription::{Listener, SubscriptionHandle, SubscriptionManager};
use crate::sync_queue::SyncQueue;
use crate::tier::cache_tier::CacheTier;
use crate::tier::live::{LiveSource, LiveTier};
use crate::tier::replica::{ReplicaClient, ReplicaTier};
use crate::tier::traits::{DataTier, TierName};
use crate::tier::TierChain;
use crate::transit_data::{RealtimeTrainData, Station};

use fetch::FetchCoordinator;
use types::{CacheInfo, CacheItemInfo};

/// Cache/replica namespace for realtime arrival snapshots.
const REALTIME_NS: &str = "realtime";
/// Cache/replica namespace for station metadata.
const STATION_NS: &str = "station";

/// The tiered acquisition engine. See module docs.
pub struct TransitEngine {
    realtime: FetchCoordinator<RealtimeTrainData>,
    stations: FetchCoordinator<Station>,
    subscriptions: SubscriptionManager<RealtimeTrainData>,
    cache: Arc<CacheStore>,
    sync_queue: SyncQueue,
    health: Arc<HealthTracker>,
    /// Kept for health probes independent of any key-specific fetch
    live_probe: LiveTier,
}

impl TransitEngine {
    /// Build an engine over the three external boundaries: the live
    /// transit API, the replicated document store, and the persistent
    /// key-value storage backing the cache.
    pub fn new(
        config: EngineConfig,
        live: Arc<dyn LiveSource>,
        replica: Arc<dyn ReplicaClient>,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        let health = Arc::new(HealthTracker::new());
        let sync_queue = SyncQueue::new(Arc::clone(&health));
        let cache = Arc::new(CacheStore::new(
            storage,
            config.cache_key_prefix.clone(),
            config.cache_max_entries,
        ));

        let realtime_chain = TierChain::new(vec![
            Arc::new(LiveTier::new(Arc::clone(&live), config.live_timeout()))
                as Arc<dyn DataTier<RealtimeTrainData>>,
            Arc::new(ReplicaTier::<RealtimeTrainData>::new(
                Arc::clone(&replica),
                REALTIME_NS,
            )),
            Arc::new(CacheTier::<RealtimeTrainData>::new(
                Arc::clone(&cache),
                REALTIME_NS,
            )),
        ]);
        let realtime = FetchCoordinator::new(
            realtime_chain,
            Arc::clone(&cache),
            sync_queue.clone(),
            Arc::clone(&health),
            Some(Arc::clone(&replica)),
            REALTIME_NS,
            config.realtime_ttl(),
        );

        // Station metadata has no live feed; the replica is its primary
        // source and no write-back applies.
        let station_chain = TierChain::new(vec![
            Arc::new(ReplicaTier::<Station>::new(Arc::clone(&replica), STATION_NS))
                as Arc<dyn DataTier<Station>>,
            Arc::new(CacheTier::<Station>::new(Arc::clone(&cache), STATION_NS)),
        ]);
        let stations = FetchCoordinator::new(
            station_chain,
            Arc::clone(&cache),
            sync_queue.clone(),
            Arc::clone(&health),
            None,
            STATION_NS,
            config.station_ttl(),
        );

        let subscriptions = SubscriptionManager::new(realtime.clone());
        let live_probe = LiveTier::new(live, config.live_timeout());

        info!(
            realtime_ttl_ms = config.realtime_ttl_ms,
            station_ttl_ms = config.station_ttl_ms,
            cache_max_entries = config.cache_max_entries,
            "transit engine constructed"
        );

        Self {
            realtime,
            stations,
            subscriptions,
            cache,
            sync_queue,
            health,
            live_probe,
        }
    }

    /// One-shot tiered fetch of realtime arrivals for a station.
    ///
    /// Resolves to `None` only when every tier *and* the stale-cache
    /// fallback failed; the UI renders that as "unavailable". This
    /// method never returns an error.
    pub async fn realtime_trains(&self, station: &str) -> Option<RealtimeTrainData> {
        match self.realtime.fetch_deduped(station).await {
            Ok(resolved) => {
                debug!(station = %station, tier = %resolved.tier, stale = resolved.stale, "realtime fetch resolved");
                Some(resolved.value)
            }
            Err(e) => {
                warn!(station = %station, errors = %e.summary(), "realtime data unavailable");
                None
            }
        }
    }

    /// One-shot tiered fetch of station metadata (24 h TTL tier).
    pub async fn station_info(&self, station: &str) -> Option<Station> {
        match self.stations.fetch_deduped(station).await {
            Ok(resolved) => Some(resolved.value),
            Err(e) => {
                warn!(station = %station, errors = %e.summary(), "station info unavailable");
                None
            }
        }
    }

    /// Subscribe to periodic realtime updates for a station. One poll
    /// timer per station is shared by all listeners; the first
    /// listener's interval wins. The returned handle unsubscribes on
    /// drop.
    #[must_use]
    pub fn subscribe_realtime(
        &self,
        station: &str,
        interval: Duration,
        listener: Listener<RealtimeTrainData>,
    ) -> SubscriptionHandle<RealtimeTrainData> {
        self.subscriptions.subscribe(station, interval, listener)
    }

    /// Current health snapshot: online flag, last sync time, pending
    /// write-backs, recent errors.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.health.status(self.sync_queue.len())
    }

    /// Actively probe the live API's health endpoint, independent of any
    /// key-specific fetch. Returns whether the upstream answered; the
    /// outcome also lands in [`sync_status`](Self::sync_status).
    pub async fn force_sync(&self) -> bool {
        match self.live_probe.probe().await {
            Ok(()) => {
                self.health.record_outcome(TierName::Primary, true, None);
                metrics::record_probe("ok");
                true
            }
            Err(e) => {
                self.health
                    .record_outcome(TierName::Primary, false, Some(&e.to_string()));
                metrics::record_probe("error");
                false
            }
        }
    }

    /// Drop every cached entry (user logout, storage pressure).
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        info!("cache cleared");
    }

    /// Sweep expired cache entries. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        self.cache.evict_expired().await
    }

    /// Cache contents overview for the admin surface.
    #[must_use]
    pub fn cache_info(&self) -> CacheInfo {
        let items: Vec<CacheItemInfo> = self
            .cache
            .entries()
            .into_iter()
            .map(|e| CacheItemInfo {
                key: e.key,
                size_bytes: e.size_bytes,
                stored_at: e.stored_at,
                expires_at: e.expires_at,
            })
            .collect();
        CacheInfo {
            total_items: items.len(),
            total_size: items.iter().map(|i| i.size_bytes).sum(),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use crate::tier::live::{LiveArrivalRow, LiveSourceError};
    use crate::tier::replica::ReplicaError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct DeadLive;

    #[async_trait]
    impl LiveSource for DeadLive {
        async fn fetch_arrivals(
            &self,
            _station: &str,
        ) -> Result<Vec<LiveArrivalRow>, LiveSourceError> {
            Err(LiveSourceError::Upstream("connection refused".to_string()))
        }

        async fn health_check(&self) -> Result<(), LiveSourceError> {
            Err(LiveSourceError::Upstream("connection refused".to_string()))
        }
    }

    struct DeadReplica;

    #[async_trait]
    impl ReplicaClient for DeadReplica {
        async fn get_by_key(&self, _key: &str) -> Result<Option<Value>, ReplicaError> {
            Err(ReplicaError::Unavailable("offline".to_string()))
        }
        async fn put(&self, _key: &str, _value: Value) -> Result<(), ReplicaError> {
            Err(ReplicaError::Unavailable("offline".to_string()))
        }
    }

    fn dead_engine() -> TransitEngine {
        TransitEngine::new(
            EngineConfig::default(),
            Arc::new(DeadLive),
            Arc::new(DeadReplica),
            Arc::new(MemoryStorage::new()),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_total_failure_resolves_to_none() {
        let engine = dead_engine();

        assert!(engine.realtime_trains("Gangnam").await.is_none());
        assert!(engine.station_info("Gangnam").await.is_none());

        let status = engine.sync_status();
        assert!(!status.is_online);
        assert!(!status.recent_errors.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_force_sync_reports_dead_upstream() {
        let engine = dead_engine();

        assert!(!engine.force_sync().await);
        assert!(!engine.sync_status().is_online);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cache_info_empty_engine() {
        let engine = dead_engine();
        let info = engine.cache_info();

        assert_eq!(info.total_items, 0);
        assert_eq!(info.total_size, 0);
        assert!(info.items.is_empty());
    }
}
