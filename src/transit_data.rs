//! Transit data structures.
//!
//! The normalized types that flow through the engine. Each tier produces
//! these via its own conversion at the tier boundary; inside the engine
//! there is exactly one shape per data kind.

use serde::{Deserialize, Serialize};

/// Arrival state of a single train, normalized from the live feed's
/// numeric arrival codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrivalStatus {
    /// Entering the station
    Approaching,
    /// At the platform
    Arrived,
    /// Left the station
    Departed,
    /// Somewhere between stations
    EnRoute,
}

/// Travel direction on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

/// One upcoming train at a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainArrival {
    /// Operator-assigned train number (e.g. "K1204")
    pub train_no: String,
    /// Line name (e.g. "Line 2")
    pub line: String,
    /// Terminal station the train is headed to
    pub destination: String,
    /// Seconds until arrival at this station
    pub eta_seconds: u32,
    pub status: ArrivalStatus,
    pub direction: Direction,
}

/// Realtime arrivals snapshot for one station.
///
/// An empty `trains` list is a valid snapshot (no service right now),
/// not a fetch failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeTrainData {
    /// Station the snapshot was requested for
    pub station: String,
    pub trains: Vec<TrainArrival>,
    /// When this snapshot was produced (epoch millis)
    pub fetched_at: i64,
}

impl RealtimeTrainData {
    /// Create a snapshot stamped with the current time.
    pub fn new(station: impl Into<String>, trains: Vec<TrainArrival>) -> Self {
        Self {
            station: station.into(),
            trains,
            fetched_at: now_millis(),
        }
    }
}

/// Static station metadata. Changes rarely; cached with a long TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub line: String,
    /// Operator station code (e.g. "0222")
    pub station_code: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Lines reachable by transfer at this station
    #[serde(default)]
    pub transfers: Vec<String>,
}

/// Current wall-clock time as epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
