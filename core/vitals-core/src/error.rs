//! Error types for vitals-core operations.
//!
//! Only genuinely failed operations end up here. Degraded upstream reads are
//! absorbed where they happen, and a refused start is a
//! [`StartRejection`](crate::orchestrator::StartRejection) value.

use std::path::PathBuf;

use vitals_protocol::ErrorInfo;

#[derive(Debug, thiserror::Error)]
pub enum VitalsError {
    // ─────────────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Backend operation failed: {path}: {details}")]
    Backend { path: String, details: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Reading command to {device_id} failed: {details}")]
    CommandWrite { device_id: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid identifier: {0}")]
    Validation(#[from] ErrorInfo),

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("Driver is disabled: {0}")]
    DriverInactive(String),

    #[error("No assigned or test device for driver {0}")]
    NoDeviceForDriver(String),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl VitalsError {
    pub fn backend(path: &str, details: impl Into<String>) -> Self {
        VitalsError::Backend {
            path: path.to_string(),
            details: details.into(),
        }
    }
}

/// Convenience type alias for Results using VitalsError.
pub type Result<T> = std::result::Result<T, VitalsError>;

impl From<VitalsError> for String {
    fn from(err: VitalsError) -> String {
        err.to_string()
    }
}
