//! Runtime configuration.
//!
//! Loaded from `~/.timecard/config.toml` unless a path is given. Every field
//! has a default, so a missing file (or a partial one) is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TimecardError;

const CONFIG_DIR: &str = ".timecard";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    Table,
    Json,
}

impl Default for DisplayFormat {
    fn default() -> Self {
        Self::Table
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_path")]
    pub path: PathBuf,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: default_device_path(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl DeviceConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default)]
    pub format: DisplayFormat,
    #[serde(default)]
    pub clear_screen: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            format: DisplayFormat::default(),
            clear_screen: false,
        }
    }
}

impl DisplayConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
    /// Daily rolling log files go here when set; otherwise logs go to stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/ttyACM0")
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_max_line_bytes() -> usize {
    4096
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

pub fn default_config_path() -> Result<PathBuf, TimecardError> {
    let home = dirs::home_dir().ok_or(TimecardError::HomeDirNotFound)?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Loads the config at `path`, or the default location when `None`.
///
/// A missing file yields defaults. An explicit path that exists but cannot be
/// read or parsed is an error.
pub fn load(path: Option<&Path>) -> Result<Config, TimecardError> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content =
        fs_err::read_to_string(&config_path).map_err(|source| TimecardError::ConfigRead {
            path: config_path.clone(),
            source,
        })?;
    toml::from_str::<Config>(&content).map_err(|err| TimecardError::ConfigMalformed {
        path: config_path,
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load(Some(&path)).expect("load config");
        assert_eq!(config.device.path, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(config.device.poll_timeout(), Duration::from_millis(100));
        assert_eq!(config.display.refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.display.format, DisplayFormat::Table);
        assert!(!config.logging.debug);
    }

    #[test]
    fn load_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[device]
path = "/dev/ttyUSB1"

[display]
format = "json"
refresh_interval_ms = 250

[logging]
debug = true
directory = "/tmp/timecard-logs"
"#,
        )
        .expect("write config");

        let config = load(Some(&path)).expect("load config");
        assert_eq!(config.device.path, PathBuf::from("/dev/ttyUSB1"));
        assert_eq!(config.device.max_line_bytes, 4096);
        assert_eq!(config.display.format, DisplayFormat::Json);
        assert_eq!(config.display.refresh_interval(), Duration::from_millis(250));
        assert!(!config.display.clear_screen);
        assert!(config.logging.debug);
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/tmp/timecard-logs"))
        );
    }

    #[test]
    fn malformed_config_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[display]\nformat = \"hologram\"\n").expect("write config");

        match load(Some(&path)) {
            Err(TimecardError::ConfigMalformed { path: reported, .. }) => {
                assert_eq!(reported, path)
            }
            other => panic!("expected malformed config, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = DisplayConfig {
            refresh_interval_ms: 0,
            ..DisplayConfig::default()
        };
        assert_eq!(config.refresh_interval(), Duration::from_millis(1));
    }
}
