//! FlashStorage trait for a unified filesystem interface
//!
//! This module provides the small set of filesystem operations the log store
//! needs from the flash partition, so both the directory-backed storage and
//! the in-memory mock used in tests can sit behind the same interface.

use crate::error::Result;
use std::io::{BufRead, BufReader, Read};

/// Upper bound on the first line read while checking the header
const MAX_FIRST_LINE: u64 = 512;

/// Unified interface for the flash partition
///
/// Paths are relative to the partition root. All operations are synchronous
/// and bounded; implementations must be `Send` so the node can run on its own
/// thread.
///
/// # Example
///
/// ```ignore
/// fn log_size(storage: &dyn FlashStorage) -> u64 {
///     storage.file_size("log.csv").unwrap_or(0)
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait FlashStorage: Send {
    /// Mount the partition, creating it if needed
    fn mount(&mut self) -> Result<()>;

    /// Check whether the partition is mounted
    fn is_mounted(&self) -> bool;

    /// Check whether a file exists
    fn exists(&self, path: &str) -> bool;

    /// Size of a file in bytes
    fn file_size(&self, path: &str) -> Result<u64>;

    /// Open a file for sequential reading
    fn open_reader(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Create or truncate a file with the given content
    fn write(&mut self, path: &str, data: &[u8]) -> Result<()>;

    /// Append to a file, creating it if missing
    fn append(&mut self, path: &str, data: &[u8]) -> Result<()>;

    /// Rename a file, replacing any existing file at `to`
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Remove a file
    fn remove(&mut self, path: &str) -> Result<()>;

    /// Total partition size in bytes
    fn total_bytes(&self) -> u64;

    /// Bytes currently used on the partition
    fn used_bytes(&self) -> u64;

    /// Successful writes, appends, renames and removals so far
    fn mutation_count(&self) -> u64;

    /// Read the whole file into memory
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.open_reader(path)?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Read the first line of a file, without its terminator
    ///
    /// Reads at most a few hundred bytes so a file with no newline does not
    /// get pulled into memory.
    fn read_first_line(&self, path: &str) -> Result<String> {
        let reader = self.open_reader(path)?;
        let mut reader = BufReader::new(reader.take(MAX_FIRST_LINE));
        let mut raw = Vec::new();
        reader.read_until(b'\n', &mut raw)?;
        Ok(String::from_utf8_lossy(&raw)
            .trim_end_matches(['\n', '\r'])
            .to_string())
    }
}
