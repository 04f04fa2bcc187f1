// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Refcounted per-key polling.
//!
//! The [`SubscriptionManager`] runs at most one poll task per key no
//! matter how many listeners are attached. The task fetches through the
//! coordinator (so concurrent polls and one-shot reads still share one
//! upstream call) and fans the result out to every listener: `Some` on
//! success (stale included), `None` when every tier failed.
//!
//! Lifecycle per key: Idle -> (first subscribe) -> Polling ->
//! (listener count reaches zero) -> Idle. The first tick fires
//! immediately; there is no initial wait.
//!
//! Known simplification: the shared timer uses the interval supplied by
//! the *first* subscriber for that key. Later subscribers with a
//! different interval share the existing cadence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::coordinator::fetch::FetchCoordinator;
use crate::metrics;

/// Callback invoked on every poll tick with the fetched value, or `None`
/// when the fetch exhausted every tier (and the stale fallback).
pub type Listener<T> = Arc<dyn Fn(Option<T>) + Send + Sync>;

struct PollState<T> {
    /// The shared timer's cadence, fixed by the first subscriber.
    interval: Duration,
    listeners: Vec<(u64, Listener<T>)>,
    task: JoinHandle<()>,
}

struct ManagerInner<T> {
    coordinator: FetchCoordinator<T>,
    polls: Mutex<HashMap<String, PollState<T>>>,
    next_id: AtomicU64,
}

/// Shared-timer polling on top of a [`FetchCoordinator`]. Cheap to
/// clone; clones share the per-key timer map.
pub struct SubscriptionManager<T> {
    inner: Arc<ManagerInner<T>>,
}

impl<T> Clone for SubscriptionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Detaches its listener when dropped or explicitly unsubscribed.
/// Stopping a subscription never cancels a fetch already in flight;
/// that fetch completes and still updates the cache.
pub struct SubscriptionHandle<T> {
    inner: Weak<ManagerInner<T>>,
    key: String,
    id: u64,
    active: bool,
}

impl<T> SubscriptionHandle<T> {
    /// Explicitly detach. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.inner.upgrade() {
            ManagerInner::unsubscribe(&inner, &self.key, self.id);
        }
    }
}

impl<T> Drop for SubscriptionHandle<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T> SubscriptionManager<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(coordinator: FetchCoordinator<T>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                coordinator,
                polls: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a listener for `key`. Starts the shared poll task if this
    /// is the key's first listener; otherwise joins the existing timer
    /// (the supplied interval is ignored in that case).
    pub fn subscribe(
        &self,
        key: &str,
        interval: Duration,
        listener: Listener<T>,
    ) -> SubscriptionHandle<T> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let active_keys = {
            let mut polls = self.inner.polls.lock();
            match polls.get_mut(key) {
                Some(state) => {
                    state.listeners.push((id, listener));
                    debug!(
                        key = %key,
                        listeners = state.listeners.len(),
                        interval_ms = state.interval.as_millis() as u64,
                        "joined existing poll timer"
                    );
                }
                None => {
                    let task = spawn_poll(Arc::downgrade(&self.inner), key.to_string(), interval);
                    polls.insert(
                        key.to_string(),
                        PollState {
                            interval,
                            listeners: vec![(id, listener)],
                            task,
                        },
                    );
                    debug!(key = %key, interval_ms = interval.as_millis() as u64, "poll timer started");
                }
            }
            polls.len()
        };
        metrics::set_active_polls(active_keys);

        SubscriptionHandle {
            inner: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id,
            active: true,
        }
    }

    /// Number of keys with an active poll timer.
    #[must_use]
    pub fn active_polls(&self) -> usize {
        self.inner.polls.lock().len()
    }

    /// Number of listeners attached to `key`.
    #[must_use]
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .polls
            .lock()
            .get(key)
            .map_or(0, |s| s.listeners.len())
    }
}

impl<T> ManagerInner<T> {
    fn unsubscribe(inner: &Arc<Self>, key: &str, id: u64) {
        let mut polls = inner.polls.lock();
        let empty = match polls.get_mut(key) {
            Some(state) => {
                state.listeners.retain(|(lid, _)| *lid != id);
                state.listeners.is_empty()
            }
            None => false,
        };
        if empty {
            if let Some(state) = polls.remove(key) {
                // Aborting between ticks stops future polling; a fetch in
                // flight lives on the coordinator's own driver task and
                // is unaffected.
                state.task.abort();
                debug!(key = %key, "last listener detached, poll timer stopped");
            }
        }
        metrics::set_active_polls(polls.len());
    }
}

fn spawn_poll<T>(inner: Weak<ManagerInner<T>>, key: String, interval: Duration) -> JoinHandle<()>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick completes immediately: one fetch-and-deliver
            // before any waiting.
            ticker.tick().await;

            let Some(inner) = inner.upgrade() else {
                return;
            };

            let outcome = inner.coordinator.fetch_deduped(&key).await;
            let payload = match outcome {
                Ok(resolved) => {
                    metrics::record_poll_tick("ok");
                    Some(resolved.value)
                }
                Err(_) => {
                    metrics::record_poll_tick("exhausted");
                    None
                }
            };

            // Snapshot listeners so callbacks run outside the lock.
            let listeners: Vec<Listener<T>> = {
                let polls = inner.polls.lock();
                match polls.get(&key) {
                    Some(state) => state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
                    None => return,
                }
            };

            for listener in &listeners {
                listener(payload.clone());
            }

            // Don't keep the manager alive across the sleep.
            drop(inner);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use crate::cache::CacheStore;
    use crate::health::HealthTracker;
    use crate::sync_queue::SyncQueue;
    use crate::tier::traits::{DataTier, TierError, TierName};
    use crate::tier::TierChain;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingTier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataTier<u64> for CountingTier {
        fn name(&self) -> TierName {
            TierName::Primary
        }

        async fn fetch(&self, _key: &str) -> Result<u64, TierError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(n as u64)
        }
    }

    fn manager() -> (SubscriptionManager<u64>, Arc<CountingTier>) {
        let tier = Arc::new(CountingTier {
            calls: AtomicUsize::new(0),
        });
        let health = Arc::new(HealthTracker::new());
        let coordinator = FetchCoordinator::new(
            TierChain::new(vec![tier.clone() as Arc<dyn DataTier<u64>>]),
            Arc::new(CacheStore::new(
                Arc::new(MemoryStorage::new()),
                "@test-cache:",
                100,
            )),
            SyncQueue::new(health.clone()),
            health,
            None,
            "realtime",
            Duration::from_secs(30),
        );
        (SubscriptionManager::new(coordinator), tier)
    }

    fn collecting_listener() -> (Listener<u64>, Arc<Mutex<Vec<Option<u64>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let listener: Listener<u64> = Arc::new(move |value| {
            seen_clone.lock().push(value);
        });
        (listener, seen)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_immediate_fetch_before_first_interval() {
        let (manager, _tier) = manager();
        let (listener, seen) = collecting_listener();

        let _sub = manager.subscribe("Gangnam", Duration::from_secs(3600), listener);

        // Deliveries arrive well before the hour-long interval elapses
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_listeners_share_one_timer() {
        let (manager, tier) = manager();
        let (listener_a, seen_a) = collecting_listener();
        let (listener_b, seen_b) = collecting_listener();

        let _sub_a = manager.subscribe("Gangnam", Duration::from_millis(50), listener_a);
        let _sub_b = manager.subscribe("Gangnam", Duration::from_millis(5), listener_b);

        assert_eq!(manager.active_polls(), 1);
        assert_eq!(manager.listener_count("Gangnam"), 2);

        tokio::time::sleep(Duration::from_millis(180)).await;

        // One fetch per tick, fanned out to both listeners
        let fetches = tier.calls.load(Ordering::SeqCst);
        assert!(fetches >= 2, "expected at least two ticks, saw {}", fetches);
        let a = seen_a.lock().len();
        let b = seen_b.lock().len();
        assert!(b > 0);
        // The second subscriber's 5ms interval was ignored (first wins):
        // had it applied, b would dwarf a.
        assert!(a >= b.saturating_sub(1), "listeners out of sync: a={}, b={}", a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsubscribe_stops_polling() {
        let (manager, tier) = manager();
        let (listener, _seen) = collecting_listener();

        let sub = manager.subscribe("Gangnam", Duration::from_millis(20), listener);
        tokio::time::sleep(Duration::from_millis(50)).await;

        sub.unsubscribe();
        assert_eq!(manager.active_polls(), 0);

        let calls_at_unsub = tier.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(tier.calls.load(Ordering::SeqCst), calls_at_unsub);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_partial_unsubscribe_keeps_timer() {
        let (manager, _tier) = manager();
        let (listener_a, _) = collecting_listener();
        let (listener_b, seen_b) = collecting_listener();

        let sub_a = manager.subscribe("Gangnam", Duration::from_millis(20), listener_a);
        let _sub_b = manager.subscribe("Gangnam", Duration::from_millis(20), listener_b);

        sub_a.unsubscribe();

        assert_eq!(manager.active_polls(), 1);
        assert_eq!(manager.listener_count("Gangnam"), 1);

        let before = seen_b.lock().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(seen_b.lock().len() > before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_unsubscribes() {
        let (manager, _tier) = manager();
        let (listener, _) = collecting_listener();

        {
            let _sub = manager.subscribe("Gangnam", Duration::from_millis(20), listener);
            assert_eq!(manager.active_polls(), 1);
        }

        assert_eq!(manager.active_polls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resubscribe_after_idle_restarts_timer() {
        let (manager, _tier) = manager();
        let (listener_a, _) = collecting_listener();
        let (listener_b, seen_b) = collecting_listener();

        manager
            .subscribe("Gangnam", Duration::from_millis(20), listener_a)
            .unsubscribe();
        assert_eq!(manager.active_polls(), 0);

        let _sub = manager.subscribe("Gangnam", Duration::from_millis(20), listener_b);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!seen_b.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_distinct_keys_get_distinct_timers() {
        let (manager, _tier) = manager();
        let (listener_a, _) = collecting_listener();
        let (listener_b, _) = collecting_listener();

        let _sub_a = manager.subscribe("Gangnam", Duration::from_millis(50), listener_a);
        let _sub_b = manager.subscribe("Seolleung", Duration::from_millis(50), listener_b);

        assert_eq!(manager.active_polls(), 2);
    }
}
