//! Device registry and the driver → device resolution.
//!
//! Resolution priority, highest first:
//! 1. A device assigned to the driver
//! 2. The shared test device
//! 3. Any registered device (degraded; reported as such)
//! 4. Nothing, and every device-dependent action is disabled
//!
//! The registry is shared, unsynchronized state: several drivers may resolve
//! to the same test device at once and that race is accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vitals_protocol::DeviceRecord;

use crate::snapshot::decode_entries;

/// Label shown for the shared test device instead of its MAC.
pub const TEST_DEVICE_LABEL: &str = "Test Sensor";

/// Registry keyed by MAC. Key order is the enumeration order.
pub type DeviceRegistry = BTreeMap<String, DeviceRecord>;

pub fn registry_from_snapshot(snapshot: Option<Value>) -> DeviceRegistry {
    decode_entries(snapshot, "devices")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionReason {
    Assigned,
    TestFallback,
    ArbitraryFallback,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub device_id: Option<String>,
    pub reason: ResolutionReason,
}

impl Resolution {
    pub fn none() -> Self {
        Self {
            device_id: None,
            reason: ResolutionReason::None,
        }
    }

    fn found(device_id: &str, reason: ResolutionReason) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            reason,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.reason == ResolutionReason::ArbitraryFallback
    }
}

/// Resolves over any enumeration of `(mac, record)` pairs.
///
/// An assigned device wins even when the test device comes first.
pub fn resolve_from<'a, I>(devices: I, driver_id: &str) -> Resolution
where
    I: IntoIterator<Item = (&'a str, &'a DeviceRecord)>,
{
    let mut test_device: Option<&str> = None;
    let mut first_device: Option<&str> = None;

    for (mac, record) in devices {
        if record.is_assigned_to(driver_id) {
            return Resolution::found(mac, ResolutionReason::Assigned);
        }
        if test_device.is_none() && record.is_test() {
            test_device = Some(mac);
        }
        if first_device.is_none() {
            first_device = Some(mac);
        }
    }

    match (test_device, first_device) {
        (Some(mac), _) => Resolution::found(mac, ResolutionReason::TestFallback),
        (None, Some(mac)) => Resolution::found(mac, ResolutionReason::ArbitraryFallback),
        (None, None) => Resolution::none(),
    }
}

pub fn resolve(registry: &DeviceRegistry, driver_id: &str) -> Resolution {
    resolve_from(
        registry.iter().map(|(mac, record)| (mac.as_str(), record)),
        driver_id,
    )
}

/// Device for an action taken on a driver's behalf by an administrator:
/// assigned, else test. Never an arbitrary device.
pub fn resolve_strict(registry: &DeviceRegistry, driver_id: &str) -> Option<String> {
    let resolution = resolve(registry, driver_id);
    if resolution.is_degraded() {
        return None;
    }
    resolution.device_id
}

pub fn device_label(registry: &DeviceRegistry, mac: &str) -> String {
    match registry.get(mac) {
        Some(record) if record.is_test() => TEST_DEVICE_LABEL.to_string(),
        _ => mac.to_string(),
    }
}

/// MACs of every device currently marked as test, in key order.
pub fn test_devices(registry: &DeviceRegistry) -> Vec<&str> {
    registry
        .iter()
        .filter(|(_, record)| record.is_test())
        .map(|(mac, _)| mac.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry(entries: &[(&str, DeviceRecord)]) -> DeviceRegistry {
        entries
            .iter()
            .map(|(mac, record)| (mac.to_string(), record.clone()))
            .collect()
    }

    #[test]
    fn assigned_device_wins_over_test_device_listed_first() {
        let test = DeviceRecord::test();
        let assigned = DeviceRecord::assigned_to("driver-x");
        let devices = vec![("TEST-01", &test), ("ZZ-ASSIGNED", &assigned)];

        let resolution = resolve_from(devices, "driver-x");
        assert_eq!(resolution.device_id.as_deref(), Some("ZZ-ASSIGNED"));
        assert_eq!(resolution.reason, ResolutionReason::Assigned);
    }

    #[test]
    fn falls_back_to_test_device() {
        let registry = registry(&[
            ("AA", DeviceRecord::assigned_to("someone-else")),
            ("BB", DeviceRecord::test()),
        ]);
        let resolution = resolve(&registry, "driver-x");
        assert_eq!(resolution.device_id.as_deref(), Some("BB"));
        assert_eq!(resolution.reason, ResolutionReason::TestFallback);
    }

    #[test]
    fn arbitrary_fallback_is_first_key_and_flagged() {
        let registry = registry(&[
            ("CC", DeviceRecord::assigned_to("other")),
            ("AA", DeviceRecord::default()),
        ]);
        let resolution = resolve(&registry, "driver-x");
        assert_eq!(resolution.device_id.as_deref(), Some("AA"));
        assert!(resolution.is_degraded());
        assert_eq!(resolve_strict(&registry, "driver-x"), None);
    }

    #[test]
    fn empty_registry_resolves_to_none() {
        let resolution = resolve(&DeviceRegistry::new(), "driver-x");
        assert_eq!(resolution, Resolution::none());
    }

    #[test]
    fn stale_assignment_field_on_test_device_is_ignored() {
        let mut odd = DeviceRecord::test();
        odd.assigned_driver = Some("driver-x".to_string());
        let registry = registry(&[("AA", odd)]);
        assert_eq!(resolve(&registry, "driver-x").reason, ResolutionReason::TestFallback);
    }

    #[test]
    fn registry_snapshot_skips_bad_entries() {
        let registry = registry_from_snapshot(Some(json!({
            "AA": { "type": "test" },
            "BB": 17,
        })));
        assert_eq!(registry.len(), 1);
        assert_eq!(device_label(&registry, "AA"), TEST_DEVICE_LABEL);
        assert_eq!(device_label(&registry, "BB"), "BB");
        assert_eq!(test_devices(&registry), vec!["AA"]);
    }

    #[test]
    fn reason_serializes_for_operators() {
        let value = serde_json::to_value(ResolutionReason::ArbitraryFallback).expect("encode");
        assert_eq!(value, json!("ARBITRARY_FALLBACK"));
    }
}
