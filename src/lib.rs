//! # Transit Engine
//!
//! A tiered real-time data acquisition and caching engine for transit data.
//!
//! ## Architecture
//!
//! The engine resolves a station key through an ordered chain of data
//! sources, degrading gracefully when an upstream is unavailable:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TransitEngine (facade)                  │
//! │  • realtime_trains() / station_info() one-shot fetches     │
//! │  • subscribe_realtime() shared per-key polling             │
//! │  • sync_status() / force_sync() / cache administration     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FetchCoordinator                       │
//! │  • One in-flight fetch per key, concurrent callers join    │
//! │  • Write-through to cache, write-back queued to replica    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         TierChain                           │
//! │  primary: live transit API (rate limited, timeout-bounded) │
//! │  secondary: replicated document store                      │
//! │  cache: local bounded TTL store (stale-if-error fallback)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use transit_engine::{EngineConfig, TransitEngine, MemoryStorage};
//! # use transit_engine::{LiveSource, ReplicaClient};
//!
//! # async fn example(live: Arc<dyn LiveSource>, replica: Arc<dyn ReplicaClient>) {
//! let engine = TransitEngine::new(
//!     EngineConfig::default(),
//!     live,
//!     replica,
//!     Arc::new(MemoryStorage::new()),
//! );
//!
//! // One-shot tiered fetch; `None` means every tier failed.
//! if let Some(data) = engine.realtime_trains("Gangnam").await {
//!     println!("{} trains approaching", data.trains.len());
//! }
//!
//! // Shared polling subscription; dropping the handle unsubscribes.
//! let sub = engine.subscribe_realtime(
//!     "Gangnam",
//!     Duration::from_secs(15),
//!     Arc::new(|update| println!("update: {:?}", update)),
//! );
//! # drop(sub);
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Dedup**: N concurrent fetches for one key issue one upstream call.
//! - **Bounded cache**: at most `cache_max_entries` keys, LRU-evicted.
//! - **Stale-if-error**: an expired cache entry is served before `None`.
//! - **Best-effort write-back**: replica propagation never blocks reads.
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`TransitEngine`] facade and [`FetchCoordinator`]
//! - [`tier`]: the fallback chain and per-tier adapters
//! - [`cache`]: bounded TTL cache over a persistent key-value boundary
//! - [`sync_queue`]: ordered best-effort write-back queue
//! - [`subscription`]: refcounted per-key polling
//! - [`health`]: online/offline tracking and the error ring buffer

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod health;
pub mod metrics;
pub mod retry;
pub mod subscription;
pub mod sync_queue;
pub mod tier;
pub mod transit_data;

pub use cache::storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use cache::{CacheEntry, CacheStore};
pub use config::EngineConfig;
pub use coordinator::fetch::{FetchCoordinator, FetchOutcome, Resolved};
pub use coordinator::types::{CacheInfo, CacheItemInfo};
pub use coordinator::TransitEngine;
pub use health::{ErrorRecord, HealthTracker, SyncStatus};
pub use retry::RetryConfig;
pub use subscription::{Listener, SubscriptionHandle, SubscriptionManager};
pub use sync_queue::{SyncQueue, SyncTask, SyncTaskError};
pub use tier::cache_tier::CacheTier;
pub use tier::live::{LiveArrivalRow, LiveSource, LiveSourceError, LiveTier};
pub use tier::replica::{ReplicaClient, ReplicaError, ReplicaTier};
pub use tier::traits::{ChainExhausted, DataTier, TierError, TierFailure, TierName};
pub use tier::{TierChain, TierHit};
pub use transit_data::{ArrivalStatus, Direction, RealtimeTrainData, Station, TrainArrival};
