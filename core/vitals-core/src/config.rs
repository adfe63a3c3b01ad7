//! Monitor configuration.
//!
//! Loaded from `~/.vitals/monitor.toml` unless a path is given. A missing file
//! means defaults; a file that exists but does not parse is an error, since a
//! silently ignored threshold would change what "offline" means.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::connection::{OFFLINE_THRESHOLD_MS, STALE_THRESHOLD_MS};
use crate::error::{Result, VitalsError};

pub const AUTO_START_COUNTDOWN_SEC: u32 = 10;
pub const AUTO_START_DELAY_MS: u64 = 500;
pub const CONNECTION_REFRESH_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub stale_threshold_ms: i64,
    pub offline_threshold_ms: i64,
    /// Seconds between a start request and the command reaching the device.
    pub countdown_secs: u32,
    /// Delay before the one automatic start of a view.
    pub auto_start_delay_ms: u64,
    /// How often liveness is re-evaluated when no status update arrives.
    pub connection_refresh_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: STALE_THRESHOLD_MS,
            offline_threshold_ms: OFFLINE_THRESHOLD_MS,
            countdown_secs: AUTO_START_COUNTDOWN_SEC,
            auto_start_delay_ms: AUTO_START_DELAY_MS,
            connection_refresh_ms: CONNECTION_REFRESH_MS,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stale_threshold_ms <= 0 {
            return Err(VitalsError::ConfigInvalid(
                "stale_threshold_ms must be positive".to_string(),
            ));
        }
        if self.offline_threshold_ms <= self.stale_threshold_ms {
            return Err(VitalsError::ConfigInvalid(format!(
                "offline_threshold_ms ({}) must exceed stale_threshold_ms ({})",
                self.offline_threshold_ms, self.stale_threshold_ms
            )));
        }
        if self.countdown_secs == 0 {
            return Err(VitalsError::ConfigInvalid(
                "countdown_secs must be at least 1".to_string(),
            ));
        }
        if self.auto_start_delay_ms == 0 {
            return Err(VitalsError::ConfigInvalid(
                "auto_start_delay_ms must be positive".to_string(),
            ));
        }
        if self.connection_refresh_ms == 0 {
            return Err(VitalsError::ConfigInvalid(
                "connection_refresh_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the path to the vitals data directory (~/.vitals).
pub fn get_vitals_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".vitals"))
}

pub fn default_config_path() -> Option<PathBuf> {
    get_vitals_dir().map(|d| d.join("monitor.toml"))
}

/// Loads and validates the configuration, returning defaults if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(MonitorConfig::default()),
        },
    };

    if !config_path.exists() {
        return Ok(MonitorConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| VitalsError::Io {
        context: format!("reading {}", config_path.display()),
        source,
    })?;
    let config =
        toml::from_str::<MonitorConfig>(&content).map_err(|err| VitalsError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}
