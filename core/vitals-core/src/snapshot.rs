//! Decoding of subtree snapshots pushed by the backend.
//!
//! Snapshots come from firmware and older app versions, so a single malformed
//! child must never take the whole collection down. Bad entries are skipped
//! with a warning and the rest are kept.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Decodes every child of an object snapshot, keyed by child key.
///
/// `None`, non-object snapshots and undecodable children all degrade to
/// fewer entries rather than an error.
pub fn decode_entries<T: DeserializeOwned>(
    snapshot: Option<Value>,
    what: &str,
) -> BTreeMap<String, T> {
    let Some(value) = snapshot else {
        return BTreeMap::new();
    };
    let Value::Object(children) = value else {
        warn!(what, "Snapshot is not an object, treating as empty");
        return BTreeMap::new();
    };

    let mut entries = BTreeMap::new();
    for (key, child) in children {
        match serde_json::from_value::<T>(child) {
            Ok(entry) => {
                entries.insert(key, entry);
            }
            Err(err) => {
                warn!(what, key = %key, error = %err, "Skipping malformed entry");
            }
        }
    }
    entries
}

/// Decodes a single-value snapshot, `None` when absent or malformed.
pub fn decode_value<T: DeserializeOwned>(snapshot: Option<Value>, what: &str) -> Option<T> {
    let value = snapshot?;
    match serde_json::from_value::<T>(value) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(what, error = %err, "Ignoring malformed value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vitals_protocol::{DeviceStatus, SessionRecord};

    #[test]
    fn malformed_children_are_skipped() {
        let sessions: BTreeMap<String, SessionRecord> = decode_entries(
            Some(json!({
                "s1": { "timestamp": 10, "heartRate": 70 },
                "s2": "garbage",
                "s3": { "timestamp": "yesterday" }
            })),
            "sessions",
        );
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions["s1"].heart_rate, Some(70.0));
    }

    #[test]
    fn non_object_snapshot_is_empty() {
        let sessions: BTreeMap<String, SessionRecord> =
            decode_entries(Some(json!([1, 2, 3])), "sessions");
        assert!(sessions.is_empty());
        let none: BTreeMap<String, SessionRecord> = decode_entries(None, "sessions");
        assert!(none.is_empty());
    }

    #[test]
    fn decode_value_tolerates_bad_shape() {
        let status: Option<DeviceStatus> =
            decode_value(Some(json!({ "lastSeen": 5 })), "status");
        assert_eq!(status.and_then(|s| s.last_seen), Some(5));

        let bad: Option<DeviceStatus> = decode_value(Some(json!({ "lastSeen": "now" })), "status");
        assert!(bad.is_none());
    }
}
