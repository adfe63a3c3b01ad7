//! Backend tree layout.
//!
//! Callers validate identifiers with [`crate::validate_key`] before building
//! paths from them; these helpers only join segments.

pub const DEVICES: &str = "devices";
pub const DEVICE_CONTROL: &str = "deviceControl";
pub const SESSIONS: &str = "sessions";
pub const DRIVER_DATA: &str = "driverData";
pub const DRIVERS: &str = "drivers";
pub const USERS: &str = "users";
pub const USERNAMES: &str = "usernames";

pub fn device(mac: &str) -> String {
    format!("{}/{}", DEVICES, mac)
}

pub fn device_status(mac: &str) -> String {
    format!("{}/{}/status", DEVICES, mac)
}

pub fn device_control(mac: &str) -> String {
    format!("{}/{}", DEVICE_CONTROL, mac)
}

/// Current location of a driver's readings.
pub fn primary_sessions(driver_id: &str) -> String {
    format!("{}/{}", SESSIONS, driver_id)
}

/// Older firmware wrote readings here; not provisioned for newer drivers.
pub fn legacy_sessions(driver_id: &str) -> String {
    format!("{}/{}/sessions", DRIVER_DATA, driver_id)
}

pub fn driver(driver_id: &str) -> String {
    format!("{}/{}", DRIVERS, driver_id)
}

pub fn user(uid: &str) -> String {
    format!("{}/{}", USERS, uid)
}

pub fn username(name: &str) -> String {
    format!("{}/{}", USERNAMES, name)
}

/// Splits a path into non-empty segments (`"a//b/"` → `["a", "b"]`).
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}
