//! Test data builders for creating test objects

use crossbeam_channel::{unbounded, Receiver, Sender};
use flashlog_rs::config::{ExportSettings, LogSettings, NodeConfig};
use flashlog_rs::link::{ChannelLink, NotifyLink};
use flashlog_rs::node::{Node, NodeEvent};
use flashlog_rs::storage::{FlashStorage, LogStore, MemStorage};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::HEADER;

/// A node wired to an in-process peer
pub struct TestNode {
    pub node: Node,
    pub peer_rx: Receiver<Vec<u8>>,
    pub events_tx: Sender<NodeEvent>,
    pub running: Arc<AtomicBool>,
}

/// Builder for creating test nodes
pub struct NodeBuilder {
    storage: Box<dyn FlashStorage>,
    store_flash: bool,
    mtu: Option<u16>,
    export: ExportSettings,
    config_path: Option<PathBuf>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            storage: Box::new(MemStorage::new(1 << 20)),
            store_flash: true,
            mtu: Some(185),
            export: ExportSettings::default(),
            config_path: None,
        }
    }

    pub fn storage(mut self, storage: impl FlashStorage + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }

    /// Start with a log already holding `content`
    pub fn log_content(self, content: &str) -> Self {
        self.storage(MemStorage::new(1 << 20).with_file("log.csv", content.as_bytes()))
    }

    pub fn store_flash(mut self, store_flash: bool) -> Self {
        self.store_flash = store_flash;
        self
    }

    /// Connect a peer at this MTU (`None` leaves the link without peers)
    pub fn mtu(mut self, mtu: Option<u16>) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn inline_threshold(mut self, bytes: u64) -> Self {
        self.export.inline_threshold = bytes;
        self
    }

    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.export.idle_timeout_ms = ms;
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn build(self) -> TestNode {
        let (mut link, peer_rx) = ChannelLink::new();
        if let Some(mtu) = self.mtu {
            link.peer_connected(mtu);
        }
        let (events_tx, events_rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let log = LogSettings::new("log.csv", HEADER);
        let config = NodeConfig {
            store_flash: self.store_flash,
            log: log.clone(),
            export: self.export,
            ..Default::default()
        };
        let store = LogStore::new(self.storage, log);

        let mut node = Node::new(config, store, Box::new(link), events_rx, running.clone());
        if let Some(path) = self.config_path {
            node = node.with_config_path(path);
        }

        TestNode {
            node,
            peer_rx,
            events_tx,
            running,
        }
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let t = NodeBuilder::new().mtu(Some(50)).store_flash(false).build();

        assert_eq!(t.node.link().max_payload(), 47);
        assert_eq!(t.node.link().connected_peers(), 1);
        assert!(!t.node.config().store_flash);
    }
}
