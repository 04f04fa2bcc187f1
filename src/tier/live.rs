// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Primary tier: the live transit API.
//!
//! The upstream is rate-limited, so this tier issues at most one call per
//! chain walk - no retries. Its only internal policy is a timeout, after
//! which the chain falls through to the replica. Raw feed rows are
//! normalized into [`RealtimeTrainData`] here, at the boundary; a
//! malformed row fails the whole fetch so garbage is never cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::transit_data::{ArrivalStatus, Direction, RealtimeTrainData, TrainArrival};

use super::traits::{DataTier, TierError, TierName};

#[derive(Error, Debug)]
pub enum LiveSourceError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("upstream error: {0}")]
    Upstream(String),
}

/// Boundary to the live transit API. The engine never sees transport
/// details; an implementation wraps whatever HTTP client and API-key
/// plumbing the deployment uses.
#[async_trait]
pub trait LiveSource: Send + Sync {
    /// Fetch raw arrival rows for a station. May fail on timeout, HTTP
    /// error, or rate limiting.
    async fn fetch_arrivals(&self, station: &str) -> Result<Vec<LiveArrivalRow>, LiveSourceError>;

    /// Probe the upstream's health endpoint without fetching data.
    async fn health_check(&self) -> Result<(), LiveSourceError>;
}

/// One raw row from the live arrivals feed, as delivered upstream.
/// Converted to [`TrainArrival`] by [`normalize_rows`]; nothing outside
/// this module touches the raw shape.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveArrivalRow {
    pub train_no: String,
    pub line: String,
    pub destination: String,
    /// Seconds until arrival; the feed has been seen emitting negatives
    pub eta_seconds: i64,
    /// Feed arrival code: "0" approaching, "1" arrived, "2" departed,
    /// anything else en route
    pub arrival_code: String,
    /// "up" / "down"
    pub direction: String,
}

/// Single conversion from the feed's row shape to the engine's
/// normalized snapshot. An invalid row makes the whole payload invalid:
/// the entry is treated as absent rather than cached half-parsed.
pub(crate) fn normalize_rows(
    station: &str,
    rows: Vec<LiveArrivalRow>,
) -> Result<RealtimeTrainData, TierError> {
    let mut trains = Vec::with_capacity(rows.len());

    for row in rows {
        if row.train_no.is_empty() {
            return Err(TierError::Malformed("empty train number".to_string()));
        }
        if row.eta_seconds < 0 {
            return Err(TierError::Malformed(format!(
                "negative eta {} for train {}",
                row.eta_seconds, row.train_no
            )));
        }
        let direction = match row.direction.as_str() {
            "up" => Direction::Up,
            "down" => Direction::Down,
            other => {
                return Err(TierError::Malformed(format!(
                    "unknown direction '{}' for train {}",
                    other, row.train_no
                )))
            }
        };
        let status = match row.arrival_code.as_str() {
            "0" => ArrivalStatus::Approaching,
            "1" => ArrivalStatus::Arrived,
            "2" => ArrivalStatus::Departed,
            _ => ArrivalStatus::EnRoute,
        };

        trains.push(TrainArrival {
            train_no: row.train_no,
            line: row.line,
            destination: row.destination,
            eta_seconds: row.eta_seconds as u32,
            status,
            direction,
        });
    }

    Ok(RealtimeTrainData::new(station, trains))
}

/// The primary tier adapter. Wraps a [`LiveSource`] with the tier-local
/// timeout.
pub struct LiveTier {
    source: Arc<dyn LiveSource>,
    timeout: Duration,
}

impl LiveTier {
    #[must_use]
    pub fn new(source: Arc<dyn LiveSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Probe the upstream health endpoint. Used by the engine's
    /// `force_sync`, independent of any key-specific fetch.
    pub async fn probe(&self) -> Result<(), TierError> {
        tokio::time::timeout(self.timeout, self.source.health_check())
            .await
            .map_err(|_| TierError::Timeout)?
            .map_err(|e| TierError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl DataTier<RealtimeTrainData> for LiveTier {
    fn name(&self) -> TierName {
        TierName::Primary
    }

    async fn fetch(&self, key: &str) -> Result<RealtimeTrainData, TierError> {
        let rows = tokio::time::timeout(self.timeout, self.source.fetch_arrivals(key))
            .await
            .map_err(|_| TierError::Timeout)?
            .map_err(|e| TierError::Unavailable(e.to_string()))?;

        debug!(station = %key, rows = rows.len(), "live feed returned");
        normalize_rows(key, rows)
    }
}
