//! Backend data types for the driver vitals monitor.
//!
//! This crate is shared by the monitor core, its CLI, and anything that writes
//! to the same realtime tree (the sensor firmware reads `deviceControl/{mac}`
//! and writes `devices/{mac}/status` plus session records). Field names follow
//! the JSON the firmware already produces, so every struct here is camelCase
//! on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod paths;

/// Characters the realtime tree refuses inside a single path segment.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '#', '$', '[', ']', '/'];
pub const MAX_KEY_BYTES: usize = 768;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Devices
// ═══════════════════════════════════════════════════════════════════════════════

/// Heartbeat written by the device itself. Read-only for the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(rename = "lastSeen", default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Bound to exactly one driver.
    Assigned,
    /// Shared by every driver without exclusivity.
    Test,
    /// Registered but never configured (or written by a newer firmware).
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    #[serde(rename = "assignedDriver", default)]
    pub assigned_driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
}

impl DeviceRecord {
    pub fn assigned_to(driver_id: impl Into<String>) -> Self {
        Self {
            device_type: DeviceType::Assigned,
            assigned_driver: Some(driver_id.into()),
            status: None,
        }
    }

    pub fn test() -> Self {
        Self {
            device_type: DeviceType::Test,
            assigned_driver: None,
            status: None,
        }
    }

    pub fn is_assigned_to(&self, driver_id: &str) -> bool {
        self.device_type == DeviceType::Assigned
            && self.assigned_driver.as_deref() == Some(driver_id)
    }

    pub fn is_test(&self) -> bool {
        self.device_type == DeviceType::Test
    }

    /// Partial update that binds the device to one driver.
    pub fn assignment_patch(driver_id: &str) -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("type".to_string(), Value::from("assigned"));
        patch.insert("assignedDriver".to_string(), Value::from(driver_id));
        patch
    }

    /// Partial update that turns the device into the shared test device.
    pub fn test_patch() -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("type".to_string(), Value::from("test"));
        patch.insert("assignedDriver".to_string(), Value::Null);
        patch
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════════════

/// One completed sensor reading. Written once by the device, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gsr: Option<f64>,
}

impl SessionRecord {
    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// True when the record carries anything the live screen can show.
    pub fn has_vitals(&self) -> bool {
        self.temperature.is_some()
            || self.heart_rate.is_some()
            || self.spo2.is_some()
            || self.gsr.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Control channel
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedBy {
    Admin,
    Driver,
}

/// Written to `deviceControl/{mac}`; the device polls it on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingCommand {
    pub start_reading: bool,
    #[serde(rename = "targetDriver")]
    pub target_driver: String,
    pub requested_by: RequestedBy,
    pub timestamp: i64,
}

impl ReadingCommand {
    pub fn start(target_driver: impl Into<String>, requested_by: RequestedBy, now_ms: i64) -> Self {
        Self {
            start_reading: true,
            target_driver: target_driver.into(),
            requested_by,
            timestamp: now_ms,
        }
    }

    /// Stop is a partial update: it flips `startReading` and leaves the
    /// target, requester and timestamp of the last start in place.
    pub fn stop_patch() -> Map<String, Value> {
        let mut patch = Map::new();
        patch.insert("startReading".to_string(), Value::Bool(false));
        patch
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Accounts
// ═══════════════════════════════════════════════════════════════════════════════

fn default_active() -> bool {
    true
}

/// Entry in the `drivers` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl DriverProfile {
    /// Username, else email, else empty.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|value| !value.is_empty())
            .or_else(|| self.email.as_deref().filter(|value| !value.is_empty()))
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Driver,
    #[serde(other)]
    Unknown,
}

/// Entry in `users/{uid}`; read by the sign-in flow to route by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub role: Role,
    #[serde(default = "default_active")]
    pub active: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════════════

/// Checks that `value` can be used as one segment of a backend path.
pub fn validate_key(field: &str, value: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_KEY_BYTES {
        return Err(ErrorInfo::new(
            "invalid_key",
            format!("{} must be {} bytes or fewer", field, MAX_KEY_BYTES),
        ));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_control())
    {
        return Err(ErrorInfo::new(
            "invalid_key",
            format!("{} contains forbidden character {:?}", field, bad),
        ));
    }
    Ok(())
}
