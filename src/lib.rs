//! # flashlog-rs: Sensor Node Flash Log
//!
//! A host-runnable sensor node that persists readings to an append-only CSV
//! file on a small flash partition and exports that file to a paired
//! application over a notify-only wireless link.
//!
//! ## Architecture
//!
//! - **Storage**: [`storage::FlashStorage`] over a directory or memory, and the
//!   [`storage::LogStore`] that keeps the log header intact (repairing or
//!   quarantining damaged files)
//! - **Ingest**: [`ingest::IngestPipeline`] formats samples as CSV rows
//! - **Export**: [`export::ExportEngine`] sends small logs inline and streams
//!   larger ones in line-aligned blocks with strict stop-and-wait flow control
//! - **Node**: [`node::Node`] runs everything from one loop fed by a crossbeam
//!   channel of [`node::NodeEvent`]s
//!
//! ## Configuration
//!
//! Node settings are stored in the platform-appropriate data directory under
//! `dev.flashlog.node`:
//!
//! - **Linux**: `~/.local/share/dev.flashlog.node/`
//! - **macOS**: `~/Library/Application Support/dev.flashlog.node/`
//! - **Windows**: `%APPDATA%\dev.flashlog.node\`
//!
//! ## Example
//!
//! ```ignore
//! use flashlog_rs::{
//!     config::NodeConfig,
//!     link::ChannelLink,
//!     node::{Node, NodeEvent},
//!     protocol::Command,
//!     storage::{DirStorage, LogStore},
//! };
//!
//! let config = NodeConfig::load_or_default();
//! let storage = DirStorage::new("/tmp/flash", config.log.capacity_bytes);
//! let store = LogStore::new(Box::new(storage), config.log.clone());
//! let (link, peer_rx) = ChannelLink::new();
//! let (events_tx, events_rx) = crossbeam_channel::unbounded();
//!
//! let mut node = Node::new(config, store, Box::new(link), events_rx, running);
//! std::thread::spawn(move || node.run());
//!
//! events_tx.send(NodeEvent::PeerConnected { mtu: 185 })?;
//! events_tx.send(NodeEvent::Command(Command::FlashExport))?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod link;
pub mod node;
pub mod protocol;
pub mod receiver;
pub mod sensor;
pub mod storage;

// Re-export commonly used types
pub use config::{ConfigUpdate, NodeConfig};
pub use error::{NodeError, Result};
pub use export::ExportEngine;
pub use node::{Node, NodeEvent};
pub use protocol::{Command, Message};
pub use receiver::{ExportReceiver, ReceiverEvent};
pub use storage::LogStore;
