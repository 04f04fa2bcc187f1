//! Configuration for the transit engine.
//!
//! # Example
//!
//! ```
//! use transit_engine::EngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = EngineConfig::default();
//! assert_eq!(config.realtime_ttl_ms, 30_000); // 30 s
//! assert_eq!(config.cache_max_entries, 100);
//!
//! // Full config
//! let config = EngineConfig {
//!     realtime_ttl_ms: 20_000,
//!     live_timeout_ms: 2_500,
//!     cache_max_entries: 50,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the transit engine.
///
/// All fields have sensible defaults. The TTLs encode the freshness class
/// of the data: live arrivals go stale in tens of seconds, station
/// metadata barely changes.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// TTL for realtime arrival data in milliseconds (default: 30 s)
    #[serde(default = "default_realtime_ttl_ms")]
    pub realtime_ttl_ms: u64,

    /// TTL for station metadata in milliseconds (default: 24 h)
    #[serde(default = "default_station_ttl_ms")]
    pub station_ttl_ms: u64,

    /// Maximum number of cached keys before LRU eviction (default: 100)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Prefix applied to every key written to the persistent store,
    /// so the engine can share a storage instance with the rest of
    /// the application (default: "@transit-cache:")
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,

    /// Upper bound on a single live-API call in milliseconds before the
    /// chain falls through to the replica tier (default: 5 s)
    #[serde(default = "default_live_timeout_ms")]
    pub live_timeout_ms: u64,
}

fn default_realtime_ttl_ms() -> u64 {
    30_000
}
fn default_station_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}
fn default_cache_max_entries() -> usize {
    100
}
fn default_cache_key_prefix() -> String {
    "@transit-cache:".to_string()
}
fn default_live_timeout_ms() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            realtime_ttl_ms: default_realtime_ttl_ms(),
            station_ttl_ms: default_station_ttl_ms(),
            cache_max_entries: default_cache_max_entries(),
            cache_key_prefix: default_cache_key_prefix(),
            live_timeout_ms: default_live_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// TTL for realtime arrival data as a [`Duration`].
    #[must_use]
    pub fn realtime_ttl(&self) -> Duration {
        Duration::from_millis(self.realtime_ttl_ms)
    }

    /// TTL for station metadata as a [`Duration`].
    #[must_use]
    pub fn station_ttl(&self) -> Duration {
        Duration::from_millis(self.station_ttl_ms)
    }

    /// Live-tier call timeout as a [`Duration`].
    #[must_use]
    pub fn live_timeout(&self) -> Duration {
        Duration::from_millis(self.live_timeout_ms)
    }
}
