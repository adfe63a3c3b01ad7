//! Administrator operations on the shared tree.
//!
//! Device assignment, the shared test device, reading commands sent on a
//! driver's behalf, driver provisioning and disabling, and the fleet
//! overview. All identifiers are validated before any write.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use vitals_protocol::{
    paths, validate_key, DeviceRecord, DriverProfile, ReadingCommand, RequestedBy, Role, UserRecord,
};

use crate::backend::Backend;
use crate::devices::{self, DeviceRegistry};
use crate::error::{Result, VitalsError};
use crate::export::read_reconciled;
use crate::sessions::{self, SessionEntry};
use crate::snapshot::{decode_entries, decode_value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub total_drivers: usize,
    pub active_drivers: usize,
    pub disabled_drivers: usize,
    pub devices: usize,
    pub assigned_devices: usize,
    pub test_devices: usize,
}

pub fn summarize(
    drivers: &BTreeMap<String, DriverProfile>,
    registry: &DeviceRegistry,
) -> FleetSummary {
    let active_drivers = drivers.values().filter(|profile| profile.active).count();
    FleetSummary {
        total_drivers: drivers.len(),
        active_drivers,
        disabled_drivers: drivers.len() - active_drivers,
        devices: registry.len(),
        assigned_devices: registry
            .values()
            .filter(|record| record.assigned_driver.is_some() && !record.is_test())
            .count(),
        test_devices: registry.values().filter(|record| record.is_test()).count(),
    }
}

pub struct AdminConsole<'a, B: Backend> {
    backend: &'a B,
}

impl<'a, B: Backend> AdminConsole<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    pub fn load_registry(&self) -> Result<DeviceRegistry> {
        Ok(devices::registry_from_snapshot(
            self.backend.read_once(paths::DEVICES)?,
        ))
    }

    pub fn load_drivers(&self) -> Result<BTreeMap<String, DriverProfile>> {
        Ok(decode_entries(self.backend.read_once(paths::DRIVERS)?, "drivers"))
    }

    pub fn fleet_summary(&self) -> Result<FleetSummary> {
        Ok(summarize(&self.load_drivers()?, &self.load_registry()?))
    }

    /// Reconciled history of one driver, newest first.
    pub fn driver_history(&self, driver_id: &str) -> Result<Vec<SessionEntry>> {
        validate_key("driver_id", driver_id)?;
        let merged = read_reconciled(self.backend, driver_id)?;
        Ok(sessions::newest_first(&merged))
    }

    /// Assigns `mac` to an active driver from the directory.
    pub fn assign_device(&self, mac: &str, driver_id: &str) -> Result<()> {
        validate_key("device", mac)?;
        validate_key("driver_id", driver_id)?;
        let profile: Option<DriverProfile> =
            decode_value(self.backend.read_once(&paths::driver(driver_id))?, "driver profile");
        match profile {
            None => return Err(VitalsError::DriverNotFound(driver_id.to_string())),
            Some(profile) if !profile.active => {
                return Err(VitalsError::DriverInactive(driver_id.to_string()))
            }
            Some(_) => {}
        }
        self.backend
            .patch_update(&paths::device(mac), DeviceRecord::assignment_patch(driver_id))?;
        info!(mac, driver_id, "Device assigned");
        Ok(())
    }

    /// Marks `mac` as the shared test device. Other test devices are left in
    /// place, which makes the test fallback ambiguous; that is logged.
    pub fn set_test_device(&self, mac: &str) -> Result<()> {
        validate_key("device", mac)?;
        let registry = self.load_registry()?;
        let others: Vec<&str> = devices::test_devices(&registry)
            .into_iter()
            .filter(|other| *other != mac)
            .collect();
        if !others.is_empty() {
            warn!(mac, others = ?others, "Registry now has more than one test device");
        }
        self.backend
            .patch_update(&paths::device(mac), DeviceRecord::test_patch())?;
        info!(mac, "Device marked as test device");
        Ok(())
    }

    /// Sends a start command to `mac` on behalf of `driver_id`.
    pub fn start_reading(&self, mac: &str, driver_id: &str, now_ms: i64) -> Result<ReadingCommand> {
        validate_key("device", mac)?;
        validate_key("driver_id", driver_id)?;
        let command = ReadingCommand::start(driver_id, RequestedBy::Admin, now_ms);
        let value = serde_json::to_value(&command).map_err(|source| VitalsError::Json {
            context: "encoding start command".to_string(),
            source,
        })?;
        self.backend
            .write(&paths::device_control(mac), value)
            .map_err(|err| VitalsError::CommandWrite {
                device_id: mac.to_string(),
                details: err.to_string(),
            })?;
        info!(mac, driver_id, "Admin start sent");
        Ok(command)
    }

    /// Starts a reading on the driver's assigned device, else the test device.
    pub fn start_reading_for_driver(
        &self,
        driver_id: &str,
        now_ms: i64,
    ) -> Result<(String, ReadingCommand)> {
        validate_key("driver_id", driver_id)?;
        let registry = self.load_registry()?;
        let mac = devices::resolve_strict(&registry, driver_id)
            .ok_or_else(|| VitalsError::NoDeviceForDriver(driver_id.to_string()))?;
        let command = self.start_reading(&mac, driver_id, now_ms)?;
        Ok((mac, command))
    }

    pub fn stop_reading(&self, mac: &str) -> Result<()> {
        validate_key("device", mac)?;
        self.backend
            .patch_update(&paths::device_control(mac), ReadingCommand::stop_patch())
            .map_err(|err| VitalsError::CommandWrite {
                device_id: mac.to_string(),
                details: err.to_string(),
            })?;
        info!(mac, "Admin stop sent");
        Ok(())
    }

    /// Marks the driver inactive in both the directory and the user record.
    pub fn disable_driver(&self, driver_id: &str) -> Result<()> {
        validate_key("driver_id", driver_id)?;
        if self.backend.read_once(&paths::driver(driver_id))?.is_none() {
            return Err(VitalsError::DriverNotFound(driver_id.to_string()));
        }
        self.backend
            .patch_update(&paths::driver(driver_id), inactive_patch())?;
        self.backend.patch_update(&paths::user(driver_id), inactive_patch())?;
        info!(driver_id, "Driver disabled");
        Ok(())
    }

    /// Writes the records of a newly created driver account: user record,
    /// directory entry and username index.
    pub fn provision_driver_records(
        &self,
        uid: &str,
        username: &str,
        email: Option<&str>,
    ) -> Result<()> {
        validate_key("uid", uid)?;
        validate_key("username", username)?;

        if let Some(owner) = self.backend.read_once(&paths::username(username))? {
            if owner.as_str() != Some(uid) {
                return Err(VitalsError::UsernameTaken(username.to_string()));
            }
        }

        let user = UserRecord {
            role: Role::Driver,
            active: true,
        };
        let profile = DriverProfile {
            username: Some(username.to_string()),
            email: email.map(str::to_string),
            active: true,
        };
        self.backend.write(&paths::user(uid), encode(&user, "user record")?)?;
        self.backend
            .write(&paths::driver(uid), encode(&profile, "driver profile")?)?;
        self.backend
            .write(&paths::username(username), Value::from(uid))?;
        info!(uid, username, "Driver records provisioned");
        Ok(())
    }
}

fn inactive_patch() -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("active".to_string(), Value::Bool(false));
    patch
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Value> {
    serde_json::to_value(value).map_err(|source| VitalsError::Json {
        context: format!("encoding {}", what),
        source,
    })
}
