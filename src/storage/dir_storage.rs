//! Directory-backed flash storage
//!
//! This module maps the flash partition onto a directory of the host
//! filesystem. It is what the `flashlog-node` binary runs on, and what the
//! integration tests use together with `tempfile`.
//!
//! # Example
//!
//! ```ignore
//! use flashlog_rs::storage::{DirStorage, FlashStorage};
//!
//! let mut storage = DirStorage::new("/tmp/flash", 1_441_792);
//! storage.mount()?;
//! storage.append("log.csv", b"date_time,value1,value2\n")?;
//! ```

use crate::error::{NodeError, Result, ResultExt};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::flash_trait::FlashStorage;

/// Flash partition stored in a host directory
#[derive(Debug)]
pub struct DirStorage {
    /// Partition root
    root: PathBuf,
    /// Simulated partition size in bytes
    capacity: u64,
    /// Whether the root directory has been created
    mounted: bool,
    /// Successful mutating operations
    mutations: u64,
}

impl DirStorage {
    /// Create storage rooted at `root` with the given capacity
    pub fn new(root: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            root: root.into(),
            capacity,
            mounted: false,
            mutations: 0,
        }
    }

    /// Partition root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl FlashStorage for DirStorage {
    fn mount(&mut self) -> Result<()> {
        if self.mounted {
            return Ok(());
        }
        fs::create_dir_all(&self.root).map_err(|e| {
            NodeError::StorageUnavailable(format!("Failed to mount {:?}: {}", self.root, e))
        })?;
        self.mounted = true;
        tracing::debug!(
            "Flash mounted at {:?} (used {} of {} bytes)",
            self.root,
            self.used_bytes(),
            self.capacity
        );
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        let full = self.resolve(path);
        fs::metadata(&full)
            .map(|m| m.len())
            .with_context(|| format!("Failed to stat {:?}", full))
    }

    fn open_reader(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let full = self.resolve(path);
        let file = fs::File::open(&full).with_context(|| format!("Failed to open {:?}", full))?;
        Ok(Box::new(file))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        let mut file =
            fs::File::create(&full).with_context(|| format!("Failed to create {:?}", full))?;
        file.write_all(data)
            .and_then(|_| file.flush())
            .with_context(|| format!("Failed to write {:?}", full))?;
        self.mutations += 1;
        Ok(())
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .with_context(|| format!("Failed to open {:?} for append", full))?;
        file.write_all(data)
            .and_then(|_| file.flush())
            .with_context(|| format!("Failed to append to {:?}", full))?;
        self.mutations += 1;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (self.resolve(from), self.resolve(to));
        fs::rename(&from, &to)
            .with_context(|| format!("Failed to rename {:?} to {:?}", from, to))?;
        self.mutations += 1;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        fs::remove_file(&full).with_context(|| format!("Failed to remove {:?}", full))?;
        self.mutations += 1;
        Ok(())
    }

    fn total_bytes(&self) -> u64 {
        self.capacity
    }

    fn mutation_count(&self) -> u64 {
        self.mutations
    }

    fn used_bytes(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }
}
