// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered fallback chain of data sources.
//!
//! A [`TierChain`] is configuration, not runtime state: it is built once
//! from tier adapters in priority order and walked top-down on every
//! resolve. The first tier to succeed wins; a tier failure is logged and
//! the chain falls through. Only when every tier has failed does the
//! chain return [`ChainExhausted`] with the collected per-tier errors.
//!
//! Tier adapters:
//! - [`live::LiveTier`] - the rate-limited realtime API (primary)
//! - [`replica::ReplicaTier`] - the replicated document store (secondary)
//! - [`cache_tier::CacheTier`] - the local TTL cache as last resort

pub mod cache_tier;
pub mod live;
pub mod replica;
pub mod traits;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::metrics;
use traits::{ChainExhausted, DataTier, TierFailure, TierName};

/// A successful resolve: the value plus the tier that produced it. The
/// coordinator needs the tier to pick TTLs and write-back targets.
#[derive(Debug, Clone)]
pub struct TierHit<T> {
    pub value: T,
    pub tier: TierName,
}

/// The ordered chain. See module docs.
pub struct TierChain<T> {
    tiers: Vec<Arc<dyn DataTier<T>>>,
}

impl<T> TierChain<T> {
    /// Build a chain from tiers already in priority order.
    #[must_use]
    pub fn new(tiers: Vec<Arc<dyn DataTier<T>>>) -> Self {
        Self { tiers }
    }

    /// Number of tiers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Walk the chain for `key`, returning the first success together
    /// with the satisfying tier, or [`ChainExhausted`] with every tier's
    /// error.
    pub async fn resolve(&self, key: &str) -> Result<TierHit<T>, ChainExhausted> {
        let mut failures = Vec::with_capacity(self.tiers.len());

        for tier in &self.tiers {
            let name = tier.name();
            let start = Instant::now();
            match tier.fetch(key).await {
                Ok(value) => {
                    debug!(key = %key, tier = %name, "tier hit");
                    metrics::record_tier_fetch(name.as_str(), "hit");
                    metrics::record_tier_latency(name.as_str(), start.elapsed());
                    return Ok(TierHit { value, tier: name });
                }
                Err(e) => {
                    warn!(key = %key, tier = %name, error = %e, "tier fetch failed, falling through");
                    metrics::record_tier_fetch(name.as_str(), "error");
                    metrics::record_tier_latency(name.as_str(), start.elapsed());
                    failures.push(TierFailure {
                        tier: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(ChainExhausted {
            key: key.to_string(),
            failures,
        })
    }
}
