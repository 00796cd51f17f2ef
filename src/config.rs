//! Configuration management for cellctl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{CellularError, CellularResult};

/// Main cellctl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellularConfig {
    /// Configuration file paths
    #[serde(default)]
    pub paths: ConfigPaths,
    /// Remote call timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Delay before a registration drop seen while connected is applied
    #[serde(default = "default_registration_drop_delay_ms")]
    pub registration_drop_delay_ms: u64,
    /// Allow data connections while roaming
    #[serde(default)]
    pub allow_roaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPaths {
    /// Profile directory holding the activation store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

/// Per-operation timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_timeout_ms")]
    pub default: u64,
    #[serde(default = "default_enable_ms")]
    pub enable: u64,
    #[serde(default = "default_long_ms")]
    pub connect: u64,
    #[serde(default = "default_long_ms")]
    pub disconnect: u64,
    #[serde(default = "default_long_ms")]
    pub register: u64,
    #[serde(default = "default_long_ms")]
    pub reset: u64,
    #[serde(default = "default_scan_ms")]
    pub scan: u64,
    #[serde(default = "default_enable_ms")]
    pub enter_pin: u64,
    #[serde(default = "default_enable_ms")]
    pub set_power_state: u64,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("/var/lib/cellctl")
}

fn default_registration_drop_delay_ms() -> u64 {
    15000
}

fn default_timeout_ms() -> u64 {
    25000
}

fn default_enable_ms() -> u64 {
    20000
}

fn default_long_ms() -> u64 {
    90000
}

fn default_scan_ms() -> u64 {
    120000
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default: default_timeout_ms(),
            enable: default_enable_ms(),
            connect: default_long_ms(),
            disconnect: default_long_ms(),
            register: default_long_ms(),
            reset: default_long_ms(),
            scan: default_scan_ms(),
            enter_pin: default_enable_ms(),
            set_power_state: default_enable_ms(),
        }
    }
}

impl Default for CellularConfig {
    fn default() -> Self {
        Self {
            paths: ConfigPaths::default(),
            timeouts: TimeoutSettings::default(),
            registration_drop_delay_ms: default_registration_drop_delay_ms(),
            allow_roaming: false,
        }
    }
}

impl TimeoutSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default)
    }

    pub fn enable(&self) -> Duration {
        Duration::from_millis(self.enable)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect)
    }

    pub fn register(&self) -> Duration {
        Duration::from_millis(self.register)
    }

    pub fn reset(&self) -> Duration {
        Duration::from_millis(self.reset)
    }

    pub fn scan(&self) -> Duration {
        Duration::from_millis(self.scan)
    }

    pub fn enter_pin(&self) -> Duration {
        Duration::from_millis(self.enter_pin)
    }

    pub fn set_power_state(&self) -> Duration {
        Duration::from_millis(self.set_power_state)
    }
}

impl CellularConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> CellularResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CellularError::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> CellularResult<Self> {
        toml::from_str(content)
            .map_err(|e| CellularError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CellularResult<()> {
        let content = self.to_toml()?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| CellularError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn to_toml(&self) -> CellularResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CellularError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Ensure the storage directory exists
    pub fn ensure_directories(&self) -> CellularResult<()> {
        let dir = &self.paths.storage_dir;
        std::fs::create_dir_all(dir)
            .map_err(|e| CellularError::Config(format!("Failed to create directory {:?}: {}", dir, e)))?;
        Ok(())
    }

    pub fn registration_drop_delay(&self) -> Duration {
        Duration::from_millis(self.registration_drop_delay_ms)
    }
}
