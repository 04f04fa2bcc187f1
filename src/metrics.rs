// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the transit engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `transit_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: primary, secondary, cache
//! - `kind`: realtime, station (which coordinator)
//! - `status`: hit, miss, error, ...

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Record one coordinated fetch settling.
pub fn record_fetch(kind: &str, tier: &str, status: &str) {
    counter!(
        "transit_engine_fetches_total",
        "kind" => kind.to_string(),
        "tier" => tier.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record end-to-end latency of one coordinated fetch.
pub fn record_fetch_latency(kind: &str, duration: Duration) {
    histogram!(
        "transit_engine_fetch_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a caller joining an already in-flight fetch instead of
/// issuing a new upstream call.
pub fn record_dedup_join(kind: &str) {
    counter!(
        "transit_engine_dedup_joins_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a stale cache entry served after chain exhaustion.
pub fn record_stale_served(kind: &str) {
    counter!(
        "transit_engine_stale_served_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record one tier attempt inside a chain walk.
pub fn record_tier_fetch(tier: &str, status: &str) {
    counter!(
        "transit_engine_tier_fetches_total",
        "tier" => tier.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one tier attempt's latency.
pub fn record_tier_latency(tier: &str, duration: Duration) {
    histogram!(
        "transit_engine_tier_seconds",
        "tier" => tier.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a cache operation outcome.
pub fn record_cache_op(operation: &str, status: &str) {
    counter!(
        "transit_engine_cache_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record evicted entries (LRU or expiry sweep).
pub fn record_cache_eviction(count: usize) {
    counter!("transit_engine_cache_evictions_total").increment(count as u64);
}

/// Set current cache key count.
pub fn set_cache_entries(count: usize) {
    gauge!("transit_engine_cache_entries").set(count as f64);
}

/// Set current cache size in bytes (serialized envelopes).
pub fn set_cache_bytes(bytes: usize) {
    gauge!("transit_engine_cache_bytes").set(bytes as f64);
}

/// Record a write-back task outcome.
pub fn record_sync_task(status: &str) {
    counter!(
        "transit_engine_sync_tasks_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set pending write-back task count.
pub fn set_sync_queue_depth(depth: usize) {
    gauge!("transit_engine_sync_queue_depth").set(depth as f64);
}

/// Set number of keys with an active poll timer.
pub fn set_active_polls(count: usize) {
    gauge!("transit_engine_active_polls").set(count as f64);
}

/// Record one poll tick delivered to subscribers.
pub fn record_poll_tick(status: &str) {
    counter!(
        "transit_engine_poll_ticks_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a primary health probe (`force_sync`).
pub fn record_probe(status: &str) {
    counter!(
        "transit_engine_probes_total",
        "status" => status.to_string()
    )
    .increment(1);
}
