//! Host configuration, loaded from `{config_dir}/config.json`.

use crate::error::config::ConfigError;

use common::ErrorLocation;
use common::envelope::DEFAULT_FRESHNESS_TOLERANCE_MS;

use std::panic::Location;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Absolute path to the worker binary; `None` resolves from PATH and
    /// the host executable's own directory.
    pub binary_override: Option<String>,

    /// Fixed listening port; `None` picks a free loopback port per spawn.
    pub port_override: Option<u16>,

    /// Envelope freshness tolerance in milliseconds, forwarded to the
    /// worker so both sides agree.
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary_override: None,
            port_override: None,
            tolerance_ms: default_tolerance_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Silence budget in milliseconds before the worker is declared dead.
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
}

impl WatchdogConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            time_limit_ms: default_time_limit_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            worker: WorkerConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_tolerance_ms() -> i64 {
    DEFAULT_FRESHNESS_TOLERANCE_MS
}
fn default_time_limit_ms() -> u64 {
    10_000
}

impl HostConfig {
    /// Load config from `{config_dir}/config.json`; a missing file yields
    /// defaults, a present-but-invalid file is an error.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {e}");
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: HostConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {e}");
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to `{config_dir}/config.json` via temp file + rename.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{CONFIG_FILE_NAME}.tmp"));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid version: {} (expected 1-{CONFIG_VERSION})",
                    self.version
                ),
            });
        }

        if self.worker.tolerance_ms <= 0 {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid tolerance_ms: {} (must be positive)",
                    self.worker.tolerance_ms
                ),
            });
        }

        // The watchdog divides the limit into five sub-intervals; each must
        // be at least a millisecond.
        if self.watchdog.time_limit_ms < 5 {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid time_limit_ms: {} (must be at least 5)",
                    self.watchdog.time_limit_ms
                ),
            });
        }

        Ok(())
    }
}
