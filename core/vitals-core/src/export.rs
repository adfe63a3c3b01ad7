//! Export row assembly.
//!
//! Every driver's history is read once from both session sources and
//! reconciled with the same primary-wins merge the live view uses. File
//! formatting is left to the caller.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};
use vitals_protocol::{paths, DriverProfile, SessionRecord};

use crate::backend::Backend;
use crate::error::Result;
use crate::sessions::{merge, SessionMap, SessionSource};
use crate::snapshot::decode_entries;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub driver_key: String,
    pub driver_id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub record: SessionRecord,
}

/// Reads and merges both session sources of one driver.
///
/// An unreadable legacy source counts as empty; an unreadable primary source
/// is an error.
pub fn read_reconciled<B: Backend>(backend: &B, driver_id: &str) -> Result<SessionMap> {
    let primary: SessionMap = decode_entries(
        backend.read_once(&paths::primary_sessions(driver_id))?,
        SessionSource::Primary.as_str(),
    );
    let legacy: SessionMap = match backend.read_once(&paths::legacy_sessions(driver_id)) {
        Ok(snapshot) => decode_entries(snapshot, SessionSource::Legacy.as_str()),
        Err(err) => {
            warn!(driver_id, error = %err, "Legacy sessions unreadable, treating as empty");
            SessionMap::new()
        }
    };
    Ok(merge(&primary, &legacy))
}

/// File-safe key for a driver: username, else the email local part, else the
/// uid, with anything but ASCII letters and digits replaced by `_`.
pub fn base_driver_key(driver_id: &str, profile: &DriverProfile) -> String {
    let raw = profile
        .username
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            profile
                .email
                .as_deref()
                .and_then(|email| email.split('@').next())
                .filter(|local| !local.trim().is_empty())
        })
        .unwrap_or(driver_id);
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Assigns unique keys in uid order. Later collisions get `_{uid prefix}`.
pub fn driver_keys(drivers: &BTreeMap<String, DriverProfile>) -> BTreeMap<String, String> {
    let mut used = HashSet::new();
    let mut keys = BTreeMap::new();
    for (driver_id, profile) in drivers {
        let mut key = base_driver_key(driver_id, profile);
        if used.contains(&key) {
            let prefix: String = driver_id.chars().take(8).collect();
            key = format!("{}_{}", key, prefix);
        }
        used.insert(key.clone());
        keys.insert(driver_id.clone(), key);
    }
    keys
}

/// Rows for every driver in the directory, oldest first.
pub fn export_rows<B: Backend>(backend: &B) -> Result<Vec<ExportRow>> {
    let drivers: BTreeMap<String, DriverProfile> =
        decode_entries(backend.read_once(paths::DRIVERS)?, "drivers");
    let keys = driver_keys(&drivers);

    let mut rows = Vec::new();
    for (driver_id, driver_key) in &keys {
        let sessions = read_reconciled(backend, driver_id)?;
        debug!(driver_id = %driver_id, sessions = sessions.len(), "Driver sessions collected");
        rows.extend(sessions.into_iter().map(|(session_id, record)| ExportRow {
            driver_key: driver_key.clone(),
            driver_id: driver_id.clone(),
            session_id,
            record,
        }));
    }

    rows.sort_by(|a, b| {
        a.record
            .timestamp
            .cmp(&b.record.timestamp)
            .then_with(|| a.driver_key.cmp(&b.driver_key))
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    Ok(rows)
}
