//! Per-tier outcome tracking and the observability snapshot.
//!
//! The tracker is deliberately simple: the engine records one terminal
//! outcome per coordinated fetch plus any non-terminal errors worth
//! surfacing (failed write-backs, per-tier failures during exhaustion),
//! and readers take [`SyncStatus`] snapshots. Nothing here blocks; all
//! state lives behind one short-lived lock.

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::Serialize;

use crate::tier::traits::{ChainExhausted, TierName};
use crate::transit_data::now_millis;

/// Ring buffer bound for recent errors.
const MAX_RECENT_ERRORS: usize = 10;

/// One recorded error, timestamped.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// When the error was recorded (epoch millis)
    pub at: i64,
    /// Which component or tier produced it
    pub source: String,
    pub message: String,
}

/// Read-only snapshot of engine health.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Last successful remote fetch (epoch millis), if any
    pub last_sync_at: Option<i64>,
    /// True iff the most recent terminal outcome was a success from a
    /// non-cache tier
    pub is_online: bool,
    /// Write-back tasks waiting in the sync queue
    pub pending_task_count: usize,
    /// Up to the last 10 errors, oldest first
    pub recent_errors: Vec<ErrorRecord>,
}

#[derive(Default)]
struct HealthState {
    last_sync_at: Option<i64>,
    is_online: bool,
    recent_errors: VecDeque<ErrorRecord>,
}

impl HealthState {
    fn push_error(&mut self, source: &str, message: &str) {
        if self.recent_errors.len() == MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(ErrorRecord {
            at: now_millis(),
            source: source.to_string(),
            message: message.to_string(),
        });
    }
}

/// Records per-tier success/failure history. Shared by the coordinator
/// and the sync queue; cheap to clone behind an `Arc`.
#[derive(Default)]
pub struct HealthTracker {
    state: RwLock<HealthState>,
}

impl HealthTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal outcome of one coordinated fetch.
    ///
    /// A success from a remote tier marks the engine online and stamps
    /// `last_sync_at`; a cache-tier success says nothing about
    /// connectivity and leaves the engine offline.
    pub fn record_outcome(&self, tier: TierName, success: bool, error: Option<&str>) {
        let mut state = self.state.write();
        if success {
            state.is_online = tier.is_remote();
            if tier.is_remote() {
                state.last_sync_at = Some(now_millis());
            }
        } else {
            state.is_online = false;
            if let Some(message) = error {
                state.push_error(tier.as_str(), message);
            }
        }
    }

    /// Record a chain exhaustion: the engine goes offline and every
    /// per-tier error lands in the ring buffer.
    pub fn record_exhausted(&self, err: &ChainExhausted) {
        let mut state = self.state.write();
        state.is_online = false;
        for failure in &err.failures {
            state.push_error(failure.tier.as_str(), &failure.error);
        }
    }

    /// Record a non-terminal error (failed write-back, swallowed cache
    /// I/O). Does not touch the online flag.
    pub fn record_error(&self, source: &str, message: &str) {
        self.state.write().push_error(source, message);
    }

    /// Pure read of current state.
    #[must_use]
    pub fn status(&self, pending_task_count: usize) -> SyncStatus {
        let state = self.state.read();
        SyncStatus {
            last_sync_at: state.last_sync_at,
            is_online: state.is_online,
            pending_task_count,
            recent_errors: state.recent_errors.iter().cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.read().is_online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::traits::TierFailure;

    #[test]
    fn test_starts_offline_and_empty() {
        let tracker = HealthTracker::new();
        let status = tracker.status(0);

        assert!(!status.is_online);
        assert!(status.last_sync_at.is_none());
        assert!(status.recent_errors.is_empty());
        assert_eq!(status.pending_task_count, 0);
    }

    #[test]
    fn test_remote_success_marks_online() {
        let tracker = HealthTracker::new();

        tracker.record_outcome(TierName::Primary, true, None);

        let status = tracker.status(0);
        assert!(status.is_online);
        assert!(status.last_sync_at.is_some());
    }

    #[test]
    fn test_cache_success_does_not_mark_online() {
        let tracker = HealthTracker::new();
        tracker.record_outcome(TierName::Primary, true, None);

        // A later cache-only success means the network path is gone
        tracker.record_outcome(TierName::Cache, true, None);

        let status = tracker.status(0);
        assert!(!status.is_online);
        // last_sync_at keeps the earlier remote success
        assert!(status.last_sync_at.is_some());
    }

    #[test]
    fn test_failure_marks_offline_and_logs() {
        let tracker = HealthTracker::new();
        tracker.record_outcome(TierName::Primary, true, None);

        tracker.record_outcome(TierName::Primary, false, Some("timed out"));

        let status = tracker.status(0);
        assert!(!status.is_online);
        assert_eq!(status.recent_errors.len(), 1);
        assert_eq!(status.recent_errors[0].source, "primary");
        assert_eq!(status.recent_errors[0].message, "timed out");
    }

    #[test]
    fn test_exhaustion_records_every_tier_error() {
        let tracker = HealthTracker::new();

        tracker.record_exhausted(&ChainExhausted {
            key: "Gangnam".to_string(),
            failures: vec![
                TierFailure {
                    tier: TierName::Primary,
                    error: "timed out".to_string(),
                },
                TierFailure {
                    tier: TierName::Secondary,
                    error: "unavailable".to_string(),
                },
            ],
        });

        let status = tracker.status(0);
        assert!(!status.is_online);
        assert_eq!(status.recent_errors.len(), 2);
    }

    #[test]
    fn test_error_ring_is_bounded_at_ten() {
        let tracker = HealthTracker::new();

        for i in 0..25 {
            tracker.record_error("sync", &format!("error {}", i));
        }

        let status = tracker.status(0);
        assert_eq!(status.recent_errors.len(), 10);
        // Oldest entries were dropped
        assert_eq!(status.recent_errors[0].message, "error 15");
        assert_eq!(status.recent_errors[9].message, "error 24");
    }

    #[test]
    fn test_record_error_does_not_change_online_flag() {
        let tracker = HealthTracker::new();
        tracker.record_outcome(TierName::Primary, true, None);

        tracker.record_error("sync", "write-back failed");

        assert!(tracker.is_online());
    }
}
