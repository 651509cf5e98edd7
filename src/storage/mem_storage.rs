//! In-memory flash storage for testing
//!
//! This module provides a flash partition that lives entirely in memory,
//! with switchable fault injection so storage failures can be exercised
//! without a real filesystem.
//!
//! # Faults
//!
//! - [`StorageFault::Mount`] - the partition refuses to mount
//! - [`StorageFault::Write`] - `write` and `append` fail
//! - [`StorageFault::Rename`] - `rename` fails
//! - [`StorageFault::Read`] - `open_reader` fails
//!
//! # Example
//!
//! ```ignore
//! use flashlog_rs::storage::{MemStorage, StorageFault};
//!
//! let storage = MemStorage::new(64 * 1024)
//!     .with_file("log.csv", b"garbage\n1,2,3\n")
//!     .with_fault(StorageFault::Rename);
//! ```

use crate::error::{NodeError, Result};
use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};

use super::flash_trait::FlashStorage;

/// Failure modes that can be injected into [`MemStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageFault {
    /// Mounting fails
    Mount,
    /// Writes and appends fail
    Write,
    /// Renames fail
    Rename,
    /// Opening a file for reading fails
    Read,
}

/// In-memory flash partition
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    /// File contents by path
    files: BTreeMap<String, Vec<u8>>,
    /// Partition size in bytes
    capacity: u64,
    /// Whether `mount` succeeded
    mounted: bool,
    /// Active faults
    faults: HashSet<StorageFault>,
    /// Number of mutating operations performed (write/append/rename/remove)
    mutations: u64,
}

impl MemStorage {
    /// Create an empty partition with the given capacity
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Pre-populate a file
    pub fn with_file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.insert(normalize(path), data.to_vec());
        self
    }

    /// Enable a fault
    pub fn with_fault(mut self, fault: StorageFault) -> Self {
        self.faults.insert(fault);
        self
    }

    /// Enable a fault on an existing partition
    pub fn set_fault(&mut self, fault: StorageFault) {
        self.faults.insert(fault);
    }

    /// Remove all faults
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Get a file's bytes without going through the trait
    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(&normalize(path)).map(|v| v.as_slice())
    }

    /// Get a file's content as a string
    pub fn contents_str(&self, path: &str) -> Option<String> {
        self.contents(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// List file paths on the partition
    pub fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn check(&self, fault: StorageFault, op: &str, path: &str) -> Result<()> {
        if !self.mounted {
            return Err(NodeError::StorageUnavailable(format!(
                "{} {}: partition not mounted",
                op, path
            )));
        }
        if self.faults.contains(&fault) {
            return Err(NodeError::Io(std::io::Error::other(format!(
                "{} {}: injected fault",
                op, path
            ))));
        }
        Ok(())
    }

    fn not_found(path: &str) -> NodeError {
        NodeError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{}: no such file", path),
        ))
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

impl FlashStorage for MemStorage {
    fn mount(&mut self) -> Result<()> {
        if self.faults.contains(&StorageFault::Mount) {
            return Err(NodeError::StorageUnavailable(
                "mount failed: injected fault".to_string(),
            ));
        }
        self.mounted = true;
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn exists(&self, path: &str) -> bool {
        self.mounted && self.files.contains_key(&normalize(path))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.check(StorageFault::Read, "stat", path)?;
        self.files
            .get(&normalize(path))
            .map(|data| data.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    fn open_reader(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.check(StorageFault::Read, "open", path)?;
        let data = self
            .files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| Self::not_found(path))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.check(StorageFault::Write, "write", path)?;
        self.files.insert(normalize(path), data.to_vec());
        self.mutations += 1;
        Ok(())
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.check(StorageFault::Write, "append", path)?;
        self.files
            .entry(normalize(path))
            .or_default()
            .extend_from_slice(data);
        self.mutations += 1;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.check(StorageFault::Rename, "rename", from)?;
        let data = self
            .files
            .remove(&normalize(from))
            .ok_or_else(|| Self::not_found(from))?;
        self.files.insert(normalize(to), data);
        self.mutations += 1;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.check(StorageFault::Write, "remove", path)?;
        self.files
            .remove(&normalize(path))
            .ok_or_else(|| Self::not_found(path))?;
        self.mutations += 1;
        Ok(())
    }

    fn total_bytes(&self) -> u64 {
        self.capacity
    }

    fn used_bytes(&self) -> u64 {
        self.files.values().map(|data| data.len() as u64).sum()
    }

    fn mutation_count(&self) -> u64 {
        self.mutations
    }
}
