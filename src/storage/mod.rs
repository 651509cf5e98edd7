//! Flash storage and the CSV log store
//!
//! This module contains everything that touches the flash partition:
//!
//! - [`FlashStorage`] - minimal filesystem interface over the partition
//! - [`DirStorage`] - partition backed by a host directory
//! - [`MemStorage`] - in-memory partition with fault injection
//! - [`LogStore`] - the append-only CSV log and its header repair logic

pub mod dir_storage;
pub mod flash_trait;
pub mod log_store;
pub mod mem_storage;

pub use dir_storage::DirStorage;
pub use flash_trait::FlashStorage;
pub use log_store::{FlashStats, HeaderStatus, LineEstimate, LogStore};
pub use mem_storage::{MemStorage, StorageFault};

#[cfg(test)]
pub use flash_trait::MockFlashStorage;
