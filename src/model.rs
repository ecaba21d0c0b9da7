//! Core data model.
//!
//! A record is one row of a queue table: a store-assigned id, an opaque
//! payload, and the time it was enqueued. The engine never caches records
//! beyond a single operation.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A row as the store returns it. Payload bytes are still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Assigned by the store, strictly increasing in insertion order.
    pub id: i64,

    /// Serializer output. Opaque to the store.
    pub payload: Vec<u8>,

    pub enqueued_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Raw Item
// ---------------------------------------------------------------------------

/// A decoded record, returned by raw-mode `get` and `list_all`.
///
/// Carries the store id so the caller can hand it back to `update` or an
/// explicit-id `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem<T> {
    pub id: i64,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> RawItem<T> {
    pub fn into_data(self) -> T {
        self.data
    }
}

// ---------------------------------------------------------------------------
// Queue State
// ---------------------------------------------------------------------------

/// Per-handle cache of store-derived counters.
///
/// Rebuilt from the store every time a queue is opened; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueState {
    /// Present rows not yet returned by `get` on this handle. May drift
    /// negative when other handles share the table; readers clamp it.
    pub total: i64,

    /// Id of the most recently consumed row (deferred-commit mode only).
    pub cursor: i64,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Fractional Unix seconds, the on-disk timestamp format.
pub fn to_unix_secs(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Inverse of [`to_unix_secs`]. Out-of-range values clamp to the epoch.
pub fn from_unix_secs(secs: f64) -> DateTime<Utc> {
    let micros = (secs * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_secs_keeps_microsecond_precision() {
        let now = Utc::now();
        let back = from_unix_secs(to_unix_secs(now));
        let drift = (back - now).num_microseconds().unwrap().abs();
        assert!(drift <= 1, "drift was {drift}us");
    }

    #[test]
    fn nonsense_timestamp_falls_back_to_epoch() {
        assert_eq!(from_unix_secs(f64::MAX), DateTime::<Utc>::UNIX_EPOCH);
    }
}
