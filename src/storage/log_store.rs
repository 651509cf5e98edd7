//! Append-only CSV log with header self-healing
//!
//! The log store owns the single log file on the flash partition. Every
//! mutating operation goes through [`LogStore::open`], which guarantees that
//! the file begins with the configured header line before anything is
//! appended.
//!
//! # Header repair
//!
//! | File state                       | `repair = false` | `repair = true`          |
//! |----------------------------------|------------------|--------------------------|
//! | missing                          | created          | created                  |
//! | empty first line                 | rewritten        | rewritten                |
//! | header present                   | unchanged        | unchanged                |
//! | first line starts with a digit   | left as is       | header prepended         |
//! | anything else                    | left as is       | quarantined, fresh file  |
//!
//! Prepending the header copies the whole file into a scratch file and then
//! renames it over the live log, so an interrupted repair never leaves a
//! half-written header behind. Quarantine renames the old log aside instead of
//! deleting it.

use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::config::LogSettings;
use crate::error::{NodeError, Result, ResultExt};

use super::flash_trait::FlashStorage;

/// Copy buffer size used while rewriting the log
const COPY_CHUNK: usize = 512;

/// What [`LogStore::open`] found and did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// The file did not exist and was created with the header
    Created,
    /// The header was already present
    Valid,
    /// The header was written in front of the existing content
    Rewritten,
    /// The old file was moved to the quarantine path and a fresh file created
    Quarantined,
    /// The header is wrong but repair was not requested
    LeftAsIs,
}

impl HeaderStatus {
    /// Whether the file was modified
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            HeaderStatus::Created | HeaderStatus::Rewritten | HeaderStatus::Quarantined
        )
    }
}

/// Inputs for storage projections in [`FlashStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEstimate {
    /// Expected bytes per logged row
    pub line_bytes: u64,
    /// Sampling period in milliseconds
    pub frequency_ms: u32,
}

/// Flash partition usage as reported to the paired application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashStats {
    /// Partition size in bytes
    pub total: u64,
    /// Bytes in use
    pub used: u64,
    /// Bytes available
    pub free: u64,
    /// Integer percentage of the partition in use
    pub percent_used: u64,
    /// Current log file size
    pub log_bytes: u64,
    /// How many more rows fit in the free space
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_samples: Option<u64>,
    /// How long the node can keep logging at the current period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_seconds: Option<u64>,
}

/// The node's CSV log file
pub struct LogStore {
    /// Flash partition
    storage: Box<dyn FlashStorage>,
    /// Path and header
    settings: LogSettings,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("settings", &self.settings)
            .field("mounted", &self.storage.is_mounted())
            .finish()
    }
}

impl LogStore {
    /// Create a log store on the given partition
    pub fn new(storage: Box<dyn FlashStorage>, settings: LogSettings) -> Self {
        Self { storage, settings }
    }

    /// Log file path
    pub fn path(&self) -> &str {
        &self.settings.path
    }

    /// Header line (without terminator)
    pub fn header(&self) -> &str {
        &self.settings.header
    }

    /// Layout settings
    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    /// The underlying partition
    pub fn storage(&self) -> &dyn FlashStorage {
        self.storage.as_ref()
    }

    fn ensure_mounted(&mut self) -> Result<()> {
        if self.storage.is_mounted() {
            return Ok(());
        }
        self.storage.mount().map_err(|e| match e {
            NodeError::StorageUnavailable(_) => e,
            other => NodeError::StorageUnavailable(other.to_string()),
        })
    }

    fn header_line(&self) -> String {
        format!("{}\n", self.settings.header)
    }

    /// Make sure the log exists and starts with the header
    ///
    /// Only storage failures are reported as errors; a corrupt header is
    /// repaired (or, with `repair == false`, tolerated) and never surfaces.
    pub fn open(&mut self, repair: bool) -> Result<HeaderStatus> {
        self.ensure_mounted()?;
        let path = self.settings.path.clone();

        if !self.storage.exists(&path) {
            let header = self.header_line();
            self.storage
                .write(&path, header.as_bytes())
                .with_context(|| format!("Failed to create {}", path))?;
            tracing::info!("Created log {} with header", path);
            return Ok(HeaderStatus::Created);
        }

        let first_line = self
            .storage
            .read_first_line(&path)
            .with_context(|| format!("Failed to read header of {}", path))?;
        let first_line = first_line.trim();

        if first_line.is_empty() {
            self.rewrite_with_header()?;
            tracing::debug!("Wrote missing header into empty log {}", path);
            return Ok(HeaderStatus::Rewritten);
        }
        if first_line == self.settings.header.trim() {
            return Ok(HeaderStatus::Valid);
        }
        if !repair {
            tracing::debug!("Log {} has a foreign first line, repair not requested", path);
            return Ok(HeaderStatus::LeftAsIs);
        }

        let looks_like_data = first_line.starts_with(|c: char| c.is_ascii_digit());
        if looks_like_data {
            self.rewrite_with_header()?;
            tracing::warn!("Log {} lost its header; restored in front of existing rows", path);
            Ok(HeaderStatus::Rewritten)
        } else {
            self.quarantine()?;
            Ok(HeaderStatus::Quarantined)
        }
    }

    /// Write header + original content to a scratch file, then swap it in
    fn rewrite_with_header(&mut self) -> Result<()> {
        let path = self.settings.path.clone();
        let tmp = self.settings.temp_path();

        if self.storage.exists(&tmp) {
            self.storage.remove(&tmp)?;
        }

        let result = self.copy_with_header(&path, &tmp);
        if let Err(e) = result {
            if self.storage.exists(&tmp) {
                let _ = self.storage.remove(&tmp);
            }
            return Err(e.with_context(format!("Failed to rewrite {} with header", path)));
        }

        self.storage
            .rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {} with {}", path, tmp))
    }

    fn copy_with_header(&mut self, path: &str, tmp: &str) -> Result<()> {
        let header = self.header_line();
        self.storage.write(tmp, header.as_bytes())?;

        let mut reader = self.storage.open_reader(path)?;
        let mut buf = [0u8; COPY_CHUNK];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.storage.append(tmp, &buf[..n])?;
        }
        Ok(())
    }

    /// Move the current file aside and start a fresh one
    fn quarantine(&mut self) -> Result<()> {
        let path = self.settings.path.clone();
        let bad = self.settings.quarantine_path();

        self.storage
            .rename(&path, &bad)
            .with_context(|| format!("Failed to quarantine {} to {}", path, bad))?;

        let header = self.header_line();
        self.storage
            .write(&path, header.as_bytes())
            .with_context(|| format!("Failed to recreate {}", path))?;

        tracing::warn!("Log {} had a foreign header; quarantined to {}", path, bad);
        Ok(())
    }

    /// Append one row built from `fields`, returning the bytes written
    ///
    /// Fields are joined with commas as given; callers are responsible for
    /// keeping commas and line breaks out of them.
    pub fn append_row<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<usize> {
        let line = fields
            .iter()
            .map(|f| f.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        self.append_line(&line)
    }

    /// Append a pre-formatted line (a trailing newline is added if missing)
    pub fn append_line(&mut self, line: &str) -> Result<usize> {
        self.open(true)?;

        let mut data = line.trim_end_matches(['\r', '\n']).to_string();
        data.push('\n');

        let path = self.settings.path.clone();
        self.storage
            .append(&path, data.as_bytes())
            .with_context(|| format!("Failed to append to {}", path))?;
        tracing::trace!("Appended {} bytes to {}", data.len(), path);
        Ok(data.len())
    }

    /// Current log size in bytes (0 when missing or unreadable)
    pub fn size(&self) -> u64 {
        if !self.storage.is_mounted() {
            return 0;
        }
        self.storage.file_size(&self.settings.path).unwrap_or(0)
    }

    /// Read the whole log into memory
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.ensure_mounted()?;
        let path = self.settings.path.clone();
        self.storage
            .read(&path)
            .with_context(|| format!("Failed to read {}", path))
    }

    /// Open the log for sequential reading
    pub fn open_reader(&mut self) -> Result<Box<dyn Read + Send>> {
        self.ensure_mounted()?;
        let path = self.settings.path.clone();
        self.storage
            .open_reader(&path)
            .with_context(|| format!("Failed to open {} for reading", path))
    }

    /// Delete the log file, returning whether one existed
    pub fn clear(&mut self) -> Result<bool> {
        self.ensure_mounted()?;
        let path = self.settings.path.clone();
        if !self.storage.exists(&path) {
            tracing::debug!("Log {} not found, nothing to clear", path);
            return Ok(false);
        }
        self.storage
            .remove(&path)
            .with_context(|| format!("Failed to remove {}", path))?;
        tracing::info!("Log {} cleared", path);
        Ok(true)
    }

    /// Partition usage, optionally with projections for the given row size
    pub fn stats(&mut self, estimate: Option<LineEstimate>) -> Result<FlashStats> {
        self.ensure_mounted()?;

        let total = self.storage.total_bytes();
        let used = self.storage.used_bytes();
        let free = total.saturating_sub(used);
        let percent_used = if total > 0 { used * 100 / total } else { 0 };

        let (est_samples, est_seconds) = match estimate {
            Some(est) => {
                let samples = if est.line_bytes > 0 {
                    free / est.line_bytes
                } else {
                    0
                };
                let seconds = samples * est.frequency_ms as u64 / 1000;
                (Some(samples), Some(seconds))
            }
            None => (None, None),
        };

        Ok(FlashStats {
            total,
            used,
            free,
            percent_used,
            log_bytes: self.size(),
            est_samples,
            est_seconds,
        })
    }
}
