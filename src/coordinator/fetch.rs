// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deduplicating fetch coordination.
//!
//! The [`FetchCoordinator`] is the single entry point for tiered reads.
//! Concurrent callers for the same key share one chain walk: the first
//! caller registers an in-flight entry and spawns the driver task, later
//! callers subscribe to its settlement broadcast. Different keys proceed
//! fully in parallel with no coordination between them.
//!
//! The driver task is detached from its callers on purpose: a caller
//! that goes away (an unsubscribed poller, a cancelled request) does not
//! cancel the fetch - it completes and still updates the cache for
//! whoever asks next.
//!
//! Settlement order matters. The driver removes the in-flight entry
//! *under the map lock*, then broadcasts. A waiter either found the
//! entry before removal (and receives the broadcast) or finds no entry
//! and starts a fresh fetch - there is no window where a waiter can
//! subscribe and miss the result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::health::HealthTracker;
use crate::metrics;
use crate::sync_queue::{SyncQueue, SyncTask, SyncTaskError};
use crate::tier::replica::ReplicaClient;
use crate::tier::traits::{ChainExhausted, TierName};
use crate::tier::TierChain;

/// A settled fetch: the value, the tier that produced it, and whether it
/// was served stale (expired cache entry after total exhaustion).
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub tier: TierName,
    pub stale: bool,
}

/// Outcome of one coordinated fetch, shared verbatim with every waiter.
pub type FetchOutcome<T> = Result<Resolved<T>, ChainExhausted>;

struct InFlightFetch<T> {
    tx: broadcast::Sender<FetchOutcome<T>>,
    /// Callers sharing this fetch (the driver's caller included)
    waiters: usize,
}

struct CoordinatorInner<T> {
    chain: TierChain<T>,
    cache: Arc<CacheStore>,
    sync_queue: SyncQueue,
    health: Arc<HealthTracker>,
    /// Replica write-back target for primary-tier reads; `None` for
    /// kinds whose chain has no primary tier.
    replica: Option<Arc<dyn ReplicaClient>>,
    /// Cache/replica namespace, also the metrics `kind` label
    namespace: &'static str,
    ttl: Duration,
    in_flight: Mutex<HashMap<String, InFlightFetch<T>>>,
}

/// Deduplicating, cache-writing, health-recording fetch pipeline for one
/// data kind. The engine holds one per payload type. Cheap to clone; all
/// clones share the same in-flight map.
pub struct FetchCoordinator<T> {
    inner: Arc<CoordinatorInner<T>>,
}

impl<T> Clone for FetchCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FetchCoordinator<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        chain: TierChain<T>,
        cache: Arc<CacheStore>,
        sync_queue: SyncQueue,
        health: Arc<HealthTracker>,
        replica: Option<Arc<dyn ReplicaClient>>,
        namespace: &'static str,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                chain,
                cache,
                sync_queue,
                health,
                replica,
                namespace,
                ttl,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Fetch `key` through the tier chain, joining an in-flight fetch if
    /// one exists. N concurrent callers issue exactly one chain walk.
    #[tracing::instrument(skip(self), fields(kind = self.inner.namespace))]
    pub async fn fetch_deduped(&self, key: &str) -> FetchOutcome<T> {
        loop {
            let mut rx = {
                let mut in_flight = self.inner.in_flight.lock();
                match in_flight.get_mut(key) {
                    Some(entry) => {
                        entry.waiters += 1;
                        debug!(key = %key, waiters = entry.waiters, "joining in-flight fetch");
                        metrics::record_dedup_join(self.inner.namespace);
                        entry.tx.subscribe()
                    }
                    None => {
                        // Capacity 1: exactly one settlement message per fetch.
                        let (tx, rx) = broadcast::channel(1);
                        in_flight.insert(key.to_string(), InFlightFetch { tx, waiters: 1 });
                        tokio::spawn(CoordinatorInner::drive(
                            Arc::clone(&self.inner),
                            key.to_string(),
                        ));
                        rx
                    }
                }
            };

            match rx.recv().await {
                Ok(outcome) => return outcome,
                Err(_) => {
                    // Driver vanished without settling (runtime shutdown
                    // mid-fetch). Start over rather than hang.
                    warn!(key = %key, "in-flight fetch closed without settling, restarting");
                    continue;
                }
            }
        }
    }

    /// Number of keys with a fetch currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }
}

impl<T> CoordinatorInner<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// The driver: walk the chain, settle, notify. Runs on its own task
    /// so caller cancellation never aborts a fetch.
    async fn drive(self: Arc<Self>, key: String) {
        let start = Instant::now();
        let outcome = self.resolve(&key).await;

        // Remove before broadcast: see module docs for why this ordering
        // closes the lost-wakeup window.
        let entry = self.in_flight.lock().remove(&key);
        if let Some(entry) = entry {
            // Send fails only if every waiter stopped listening.
            let _ = entry.tx.send(outcome);
            debug!(key = %key, waiters = entry.waiters, "fetch settled");
        }
        metrics::record_fetch_latency(self.namespace, start.elapsed());
    }

    async fn resolve(&self, key: &str) -> FetchOutcome<T> {
        match self.chain.resolve(key).await {
            Ok(hit) => {
                self.health.record_outcome(hit.tier, true, None);
                metrics::record_fetch(self.namespace, hit.tier.as_str(), "hit");

                if hit.tier != TierName::Cache {
                    self.cache.set(&self.cache_key(key), &hit.value, self.ttl).await;
                }
                if hit.tier == TierName::Primary {
                    self.enqueue_write_back(key, &hit.value);
                }

                Ok(Resolved {
                    value: hit.value,
                    tier: hit.tier,
                    stale: false,
                })
            }
            Err(exhausted) => {
                self.health.record_exhausted(&exhausted);

                // Stale-if-error: an expired entry beats no data.
                match self.cache.get_stale::<T>(&self.cache_key(key)).await {
                    Some(value) => {
                        info!(key = %key, errors = %exhausted.summary(), "all tiers failed, serving stale cache entry");
                        metrics::record_fetch(self.namespace, TierName::Cache.as_str(), "stale");
                        metrics::record_stale_served(self.namespace);
                        Ok(Resolved {
                            value,
                            tier: TierName::Cache,
                            stale: true,
                        })
                    }
                    None => {
                        warn!(key = %key, errors = %exhausted.summary(), "all tiers failed, no stale fallback");
                        metrics::record_fetch(self.namespace, "none", "exhausted");
                        Err(exhausted)
                    }
                }
            }
        }
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Queue propagation of a fresh primary-tier read to the replica.
    /// Best-effort by design; failures are logged and dropped.
    fn enqueue_write_back(&self, key: &str, value: &T) {
        let Some(ref replica) = self.replica else {
            return;
        };
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "write-back serialization failed, skipping");
                return;
            }
        };

        let replica = Arc::clone(replica);
        let doc_key = self.cache_key(key);
        let label = format!("replicate:{}", doc_key);
        self.sync_queue.enqueue(SyncTask::new(label, move || async move {
            replica
                .put(&doc_key, payload)
                .await
                .map_err(|e| SyncTaskError::Failed(e.to_string()))
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use crate::tier::traits::{DataTier, TierError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// A scripted primary-like tier: counts calls, can fail on demand,
    /// and can hold every fetch at a gate so tests can pile up waiters.
    struct GatedTier {
        name: TierName,
        value: u64,
        fail: AtomicBool,
        calls: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedTier {
        fn open(name: TierName, value: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                value,
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
            })
        }

        fn gated(name: TierName, value: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                value,
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataTier<u64> for GatedTier {
        fn name(&self) -> TierName {
            self.name
        }

        async fn fetch(&self, _key: &str) -> Result<u64, TierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.expect("gate closed");
            if self.fail.load(Ordering::SeqCst) {
                Err(TierError::Unavailable("scripted failure".to_string()))
            } else {
                Ok(self.value)
            }
        }
    }

    fn coordinator(
        tiers: Vec<Arc<dyn DataTier<u64>>>,
        cache: Arc<CacheStore>,
        ttl: Duration,
    ) -> FetchCoordinator<u64> {
        let health = Arc::new(HealthTracker::new());
        FetchCoordinator::new(
            TierChain::new(tiers),
            cache,
            SyncQueue::new(health.clone()),
            health,
            None,
            "realtime",
            ttl,
        )
    }

    fn cache() -> Arc<CacheStore> {
        Arc::new(CacheStore::new(
            Arc::new(MemoryStorage::new()),
            "@test-cache:",
            100,
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_upstream_call() {
        let tier = GatedTier::gated(TierName::Primary, 7);
        let coord = coordinator(vec![tier.clone()], cache(), Duration::from_secs(30));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coord = coord.clone();
            handles.push(tokio::spawn(async move {
                coord.fetch_deduped("Gangnam").await
            }));
        }

        // Let every caller register before the fetch settles
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coord.in_flight_count(), 1);
        tier.gate.add_permits(1);

        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.value, 7);
            assert_eq!(outcome.tier, TierName::Primary);
            assert!(!outcome.stale);
        }

        assert_eq!(tier.calls(), 1);
        assert_eq!(coord.in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_keys_fetch_in_parallel() {
        let tier = GatedTier::open(TierName::Primary, 7);
        let coord = coordinator(vec![tier.clone()], cache(), Duration::from_secs(30));

        let a = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.fetch_deduped("Gangnam").await })
        };
        let b = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.fetch_deduped("Seolleung").await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Two distinct keys, two upstream calls
        assert_eq!(tier.calls(), 2);
    }

    #[tokio::test]
    async fn test_caller_after_settlement_starts_fresh_fetch() {
        let tier = GatedTier::open(TierName::Primary, 7);
        let coord = coordinator(vec![tier.clone()], cache(), Duration::from_secs(30));

        coord.fetch_deduped("Gangnam").await.unwrap();
        coord.fetch_deduped("Gangnam").await.unwrap();

        assert_eq!(tier.calls(), 2);
    }

    #[tokio::test]
    async fn test_success_writes_cache() {
        let tier = GatedTier::open(TierName::Primary, 7);
        let cache = cache();
        let coord = coordinator(vec![tier], cache.clone(), Duration::from_secs(30));

        coord.fetch_deduped("Gangnam").await.unwrap();

        let cached: Option<u64> = cache.get("realtime:Gangnam").await;
        assert_eq!(cached, Some(7));
    }

    #[tokio::test]
    async fn test_exhaustion_serves_stale_then_none() {
        let tier = GatedTier::open(TierName::Primary, 7);
        let cache = cache();
        let coord = coordinator(vec![tier.clone()], cache.clone(), Duration::from_millis(0));

        // Seed the cache with an immediately-expired entry
        coord.fetch_deduped("Gangnam").await.unwrap();
        tier.fail.store(true, Ordering::SeqCst);

        // Chain fails, stale entry rescues
        let outcome = coord.fetch_deduped("Gangnam").await.unwrap();
        assert_eq!(outcome.value, 7);
        assert_eq!(outcome.tier, TierName::Cache);
        assert!(outcome.stale);

        // No cached value at all -> exhaustion surfaces
        let err = coord.fetch_deduped("Jamsil").await.unwrap_err();
        assert_eq!(err.key, "Jamsil");
        assert_eq!(err.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_tier_hit_does_not_rewrite_cache() {
        use crate::tier::cache_tier::CacheTier;

        let cache = cache();
        cache.set("realtime:Gangnam", &42u64, Duration::from_secs(30)).await;
        let stored_at_before = cache.entries()[0].stored_at;

        let coord = coordinator(
            vec![Arc::new(CacheTier::<u64>::new(cache.clone(), "realtime"))],
            cache.clone(),
            Duration::from_secs(30),
        );

        let outcome = coord.fetch_deduped("Gangnam").await.unwrap();
        assert_eq!(outcome.tier, TierName::Cache);
        assert!(!outcome.stale);

        // Envelope untouched (same stored_at)
        assert_eq!(cache.entries()[0].stored_at, stored_at_before);
    }

    #[tokio::test]
    async fn test_primary_hit_enqueues_replica_write_back() {
        use crate::tier::replica::{ReplicaClient, ReplicaError};
        use parking_lot::Mutex as PlMutex;
        use serde_json::Value;

        struct RecordingReplica {
            writes: PlMutex<Vec<(String, Value)>>,
        }

        #[async_trait]
        impl ReplicaClient for RecordingReplica {
            async fn get_by_key(&self, _key: &str) -> Result<Option<Value>, ReplicaError> {
                Ok(None)
            }
            async fn put(&self, key: &str, value: Value) -> Result<(), ReplicaError> {
                self.writes.lock().push((key.to_string(), value));
                Ok(())
            }
        }

        let replica = Arc::new(RecordingReplica {
            writes: PlMutex::new(Vec::new()),
        });
        let health = Arc::new(HealthTracker::new());
        let sync_queue = SyncQueue::new(health.clone());
        let tier = GatedTier::open(TierName::Primary, 7);
        let coord = FetchCoordinator::new(
            TierChain::new(vec![tier as Arc<dyn DataTier<u64>>]),
            cache(),
            sync_queue.clone(),
            health,
            Some(replica.clone() as Arc<dyn ReplicaClient>),
            "realtime",
            Duration::from_secs(30),
        );

        coord.fetch_deduped("Gangnam").await.unwrap();
        sync_queue.drained().await;

        let writes = replica.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "realtime:Gangnam");
        assert_eq!(writes[0].1, serde_json::json!(7));
    }

    #[tokio::test]
    async fn test_health_outcomes_recorded() {
        let tier = GatedTier::open(TierName::Primary, 7);
        let health = Arc::new(HealthTracker::new());
        let coord = FetchCoordinator::new(
            TierChain::new(vec![tier.clone() as Arc<dyn DataTier<u64>>]),
            cache(),
            SyncQueue::new(health.clone()),
            health.clone(),
            None,
            "realtime",
            Duration::from_secs(30),
        );

        coord.fetch_deduped("Gangnam").await.unwrap();
        assert!(health.is_online());

        tier.fail.store(true, Ordering::SeqCst);
        let _ = coord.fetch_deduped("Jamsil").await;
        assert!(!health.is_online());
        assert_eq!(health.status(0).recent_errors.len(), 1);
    }
}
