//! Log layout and export tuning settings
//!
//! These settings are embedded in [`NodeConfig`](super::NodeConfig) but are
//! also handed directly to the [`LogStore`](crate::storage::LogStore) and the
//! [`ExportEngine`](crate::export::ExportEngine), which do not need the rest
//! of the node configuration.
//!
//! # Main Types
//!
//! - [`LogSettings`] - Log file path, header and flash partition size
//! - [`ExportSettings`] - Inline threshold and idle timeout for exports

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    DEFAULT_FLASH_CAPACITY, DEFAULT_LOG_HEADER, DEFAULT_LOG_PATH, QUARANTINE_SUFFIX, TEMP_SUFFIX,
};

/// Largest log (in bytes) considered for a single inline message
pub const DEFAULT_INLINE_THRESHOLD: u64 = 900;

/// Idle time after which a streaming export is abandoned
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5000;

/// Unacknowledged blocks allowed in flight (strict stop-and-wait)
pub const ACK_WINDOW: u32 = 1;

/// ATT MTU before the peer negotiates a larger one
pub const DEFAULT_MTU: u16 = 23;

/// ATT notification header bytes (opcode + handle)
pub const ATT_OVERHEAD: u16 = 3;

/// Payload size assumed when the MTU is unusable
pub const FALLBACK_PAYLOAD: usize = 20;

/// Maximum notify payload for a negotiated MTU
pub fn max_payload_for_mtu(mtu: u16) -> usize {
    if mtu > ATT_OVERHEAD {
        (mtu - ATT_OVERHEAD) as usize
    } else {
        FALLBACK_PAYLOAD
    }
}

/// Log file layout on the flash partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log file path, relative to the partition root
    #[serde(default = "default_log_path")]
    pub path: String,

    /// Header line (without terminator)
    #[serde(default = "default_log_header")]
    pub header: String,

    /// Partition capacity in bytes
    #[serde(default = "default_flash_capacity")]
    pub capacity_bytes: u64,
}

fn default_log_path() -> String {
    DEFAULT_LOG_PATH.to_string()
}

fn default_log_header() -> String {
    DEFAULT_LOG_HEADER.to_string()
}

fn default_flash_capacity() -> u64 {
    DEFAULT_FLASH_CAPACITY
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            header: default_log_header(),
            capacity_bytes: DEFAULT_FLASH_CAPACITY,
        }
    }
}

impl LogSettings {
    /// Create settings for a custom path and header
    pub fn new(path: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            header: header.into(),
            ..Default::default()
        }
    }

    /// Path the log is moved to when its content cannot be trusted
    pub fn quarantine_path(&self) -> String {
        self.sibling_path(QUARANTINE_SUFFIX)
    }

    /// Scratch path used while rewriting the log with a header
    pub fn temp_path(&self) -> String {
        self.sibling_path(TEMP_SUFFIX)
    }

    fn sibling_path(&self, suffix: &str) -> String {
        match self.path.strip_suffix(".csv") {
            Some(stem) => format!("{}{}", stem, suffix),
            None => format!("{}{}", self.path, suffix.trim_end_matches(".csv")),
        }
    }
}

/// Export tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Largest file sent as one inline message
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: u64,

    /// Idle timeout for streaming sessions, in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_inline_threshold() -> u64 {
    DEFAULT_INLINE_THRESHOLD
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl ExportSettings {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_payload_for_mtu() {
        assert_eq!(max_payload_for_mtu(DEFAULT_MTU), 20);
        assert_eq!(max_payload_for_mtu(247), 244);
        assert_eq!(max_payload_for_mtu(3), FALLBACK_PAYLOAD);
        assert_eq!(max_payload_for_mtu(0), FALLBACK_PAYLOAD);
    }

    #[test]
    fn test_quarantine_path() {
        assert_eq!(LogSettings::default().quarantine_path(), "log_bad.csv");
        assert_eq!(LogSettings::new("data/log", "h").quarantine_path(), "data/log_bad");
        assert_eq!(LogSettings::default().temp_path(), "log_tmp.csv");
    }

    #[test]
    fn test_idle_timeout() {
        assert_eq!(ExportSettings::default().idle_timeout(), Duration::from_secs(5));
    }
}
