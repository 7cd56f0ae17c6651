//! Errors for daemon start-up paths.
//!
//! Event handling itself never fails: unknown targets and unparseable lines
//! are no-ops. Only configuration and device setup can produce these.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TimecardError {
    #[error("Configuration file unreadable: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Device unavailable: {path}: {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}
