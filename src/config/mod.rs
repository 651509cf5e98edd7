//! Configuration module for the flashlog node
//!
//! This module handles node configuration including:
//! - Persisted node settings (sensor kind, sampling period, flash persistence)
//! - Log file layout (path, header, partition capacity)
//! - Export tuning (inline threshold, idle timeout)
//!
//! # Data Location
//!
//! The node configuration is stored as pretty JSON in the platform-appropriate
//! data directory under `dev.flashlog.node`:
//!
//! - **Linux**: `~/.local/share/dev.flashlog.node/`
//! - **macOS**: `~/Library/Application Support/dev.flashlog.node/`
//! - **Windows**: `%APPDATA%\dev.flashlog.node\`
//!
//! The same directory holds the simulated flash partition (`flash/`) used by
//! the `flashlog-node` binary.
//!
//! # Example
//!
//! ```ignore
//! use flashlog_rs::config::{ConfigUpdate, NodeConfig};
//!
//! let mut config = NodeConfig::load_or_default();
//! config.apply(&ConfigUpdate {
//!     store_flash: Some(true),
//!     ..Default::default()
//! });
//! config.save()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.flashlog.node";

/// Node configuration filename
pub const CONFIG_FILE: &str = "node_config.json";

/// Directory (under the data dir) standing in for the flash partition
pub const FLASH_DIR: &str = "flash";

/// Default log file name on the flash partition
pub const DEFAULT_LOG_PATH: &str = "log.csv";

/// Default CSV header (column schema)
pub const DEFAULT_LOG_HEADER: &str = "date_time,value1,value2";

/// Suffix replacing `.csv` for the temporary file used during header repair
pub const TEMP_SUFFIX: &str = "_tmp.csv";

/// Suffix replacing `.csv` for quarantined log files
pub const QUARANTINE_SUFFIX: &str = "_bad.csv";

/// Default flash partition size (1.375 MiB LittleFS partition)
pub const DEFAULT_FLASH_CAPACITY: u64 = 1_441_792;

/// Default sampling period in milliseconds
pub const DEFAULT_FREQUENCY_MS: u32 = 1000;

/// Default device name
pub const DEFAULT_NODE_NAME: &str = "FlashLog Node";

/// Maximum device name length in bytes
pub const MAX_NAME_LEN: usize = 31;

// ==================== Data Directory ====================

/// Get the node data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the node data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        NodeError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            NodeError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the node configuration file
pub fn config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Sensor Kind ====================

/// Kind of sensor attached to the node
///
/// Only used here to label the configuration and to estimate the size of
/// a logged row; driver setup lives outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// I2C barometer (temperature + pressure)
    #[default]
    I2c,
    /// 1-Wire temperature probe
    OneWire,
    /// Analog pin
    Analog,
    /// Digital pin
    Digital,
    /// Pseudo-random values
    Random,
}

impl SensorKind {
    /// Estimated bytes per logged row, used for storage projections
    pub fn estimated_line_bytes(&self) -> u64 {
        match self {
            SensorKind::I2c => 32,
            _ => 24,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::I2c => write!(f, "i2c"),
            SensorKind::OneWire => write!(f, "onewire"),
            SensorKind::Analog => write!(f, "analog"),
            SensorKind::Digital => write!(f, "digital"),
            SensorKind::Random => write!(f, "random"),
        }
    }
}

// ==================== Node Config ====================

/// Persisted node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Device name
    #[serde(default = "default_name")]
    pub name: String,

    /// Attached sensor kind
    #[serde(default)]
    pub sensor: SensorKind,

    /// Sampling period in milliseconds
    #[serde(default = "default_frequency_ms", rename = "frequency")]
    pub frequency_ms: u32,

    /// Whether samples are persisted to the flash log
    #[serde(default)]
    pub store_flash: bool,

    /// Log file layout
    #[serde(default)]
    pub log: LogSettings,

    /// Export tuning
    #[serde(default)]
    pub export: ExportSettings,
}

fn default_name() -> String {
    DEFAULT_NODE_NAME.to_string()
}

fn default_frequency_ms() -> u32 {
    DEFAULT_FREQUENCY_MS
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            sensor: SensorKind::default(),
            frequency_ms: DEFAULT_FREQUENCY_MS,
            store_flash: false,
            log: LogSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

impl NodeConfig {
    /// Load the configuration from the default location
    pub fn load() -> Result<Self> {
        let path = config_path().ok_or_else(|| {
            NodeError::Config("Could not determine config path".to_string())
        })?;
        Self::load_from(path)
    }

    /// Load the configuration, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::debug!("Using default node config: {}", e);
            Self::default()
        })
    }

    /// Load the configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NodeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            NodeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Save the configuration to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(CONFIG_FILE))
    }

    /// Save the configuration to a specific file as pretty JSON
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                NodeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            NodeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Apply a partial update, returning whether anything changed
    pub fn apply(&mut self, update: &ConfigUpdate) -> bool {
        let mut changed = false;

        if let Some(ref name) = update.name {
            let name = sanitize_name(name);
            if !name.is_empty() && name != self.name {
                self.name = name;
                changed = true;
            }
        }
        if let Some(sensor) = update.sensor {
            self.sensor = sensor;
            changed = true;
        }
        if let Some(frequency_ms) = update.frequency_ms {
            // Zero means "back to default" rather than a busy loop
            self.frequency_ms = if frequency_ms == 0 {
                DEFAULT_FREQUENCY_MS
            } else {
                frequency_ms
            };
            changed = true;
        }
        if let Some(store_flash) = update.store_flash {
            self.store_flash = store_flash;
            changed = true;
        }

        changed
    }
}

/// Partial configuration update received from the paired application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    /// New device name
    pub name: Option<String>,
    /// New sensor kind
    pub sensor: Option<SensorKind>,
    /// New sampling period (0 resets to the default)
    pub frequency_ms: Option<u32>,
    /// Enable or disable flash persistence
    pub store_flash: Option<bool>,
}

/// Strip non-printable characters, quotes and backslashes from a device name
pub fn sanitize_name(input: &str) -> String {
    let mut out: String = input
        .trim()
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    while out.len() > MAX_NAME_LEN {
        out.pop();
    }
    out
}

// ==================== Utilities ====================

/// Helper to format bytes as human-readable size
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

// ==================== Tests ====================
