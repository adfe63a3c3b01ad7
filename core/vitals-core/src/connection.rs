//! Device liveness from the heartbeat timestamp.
//!
//! The device overwrites `devices/{mac}/status.lastSeen` on its own schedule.
//! Because `now` advances with no event at all, callers must re-run the
//! classification on a timer as well as on every status update, otherwise a
//! silent device would stay `Connected` forever.

use serde::{Deserialize, Serialize};

/// Heartbeats younger than this are live.
pub const STALE_THRESHOLD_MS: i64 = 30_000;
/// Heartbeats at least this old mean the device is gone.
pub const OFFLINE_THRESHOLD_MS: i64 = 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Stale,
    Offline,
    /// The device has never reported.
    NoData,
}

impl ConnectionState {
    /// Whether a reading may be started against a device in this state.
    /// Only `Offline` blocks; a device that has not reported yet may still
    /// pick up the command once it wakes.
    pub fn permits_start(self) -> bool {
        self != ConnectionState::Offline
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connected => "Ready",
            ConnectionState::Stale | ConnectionState::NoData => "Waiting",
            ConnectionState::Offline => "Offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub stale_ms: i64,
    pub offline_ms: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            stale_ms: STALE_THRESHOLD_MS,
            offline_ms: OFFLINE_THRESHOLD_MS,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, last_seen_ms: Option<i64>, now_ms: i64) -> ConnectionState {
        // 0 means the device never reported.
        let Some(last_seen) = last_seen_ms.filter(|at| *at != 0) else {
            return ConnectionState::NoData;
        };

        // A heartbeat from the future (clock skew) counts as fresh.
        let age = now_ms.saturating_sub(last_seen);
        if age < self.stale_ms {
            ConnectionState::Connected
        } else if age < self.offline_ms {
            ConnectionState::Stale
        } else {
            ConnectionState::Offline
        }
    }
}

/// Classifies with the standard 30s / 90s thresholds.
pub fn classify(last_seen_ms: Option<i64>, now_ms: i64) -> ConnectionState {
    Thresholds::default().classify(last_seen_ms, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn absent_heartbeat_is_no_data() {
        assert_eq!(classify(None, NOW), ConnectionState::NoData);
    }

    #[test]
    fn zero_heartbeat_is_no_data() {
        assert_eq!(classify(Some(0), NOW), ConnectionState::NoData);
        assert!(ConnectionState::NoData.permits_start());
    }

    #[test]
    fn classifies_by_age() {
        assert_eq!(classify(Some(NOW - 1_000), NOW), ConnectionState::Connected);
        assert_eq!(classify(Some(NOW - 60_000), NOW), ConnectionState::Stale);
        assert_eq!(classify(Some(NOW - 100_000), NOW), ConnectionState::Offline);
    }

    #[test]
    fn boundaries_belong_to_the_older_state() {
        assert_eq!(classify(Some(NOW - 29_999), NOW), ConnectionState::Connected);
        assert_eq!(classify(Some(NOW - 30_000), NOW), ConnectionState::Stale);
        assert_eq!(classify(Some(NOW - 89_999), NOW), ConnectionState::Stale);
        assert_eq!(classify(Some(NOW - 90_000), NOW), ConnectionState::Offline);
    }

    #[test]
    fn same_heartbeat_ages_into_offline() {
        let last_seen = Some(NOW);
        assert_eq!(classify(last_seen, NOW), ConnectionState::Connected);
        assert_eq!(classify(last_seen, NOW + 45_000), ConnectionState::Stale);
        assert_eq!(classify(last_seen, NOW + 120_000), ConnectionState::Offline);
    }

    #[test]
    fn future_heartbeat_is_connected() {
        assert_eq!(classify(Some(NOW + 5_000), NOW), ConnectionState::Connected);
    }

    #[test]
    fn custom_thresholds() {
        let thresholds = Thresholds {
            stale_ms: 5_000,
            offline_ms: 10_000,
        };
        assert_eq!(
            thresholds.classify(Some(NOW - 6_000), NOW),
            ConnectionState::Stale
        );
        assert_eq!(
            thresholds.classify(Some(NOW - 10_000), NOW),
            ConnectionState::Offline
        );
    }

    #[test]
    fn only_offline_blocks_start() {
        assert!(ConnectionState::Connected.permits_start());
        assert!(ConnectionState::Stale.permits_start());
        assert!(ConnectionState::NoData.permits_start());
        assert!(!ConnectionState::Offline.permits_start());
    }
}
