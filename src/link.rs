//! Notify-only wireless link
//!
//! The node talks to its peer through a single notify characteristic: it can
//! push messages up to the negotiated payload size, and it can see how many
//! peers are connected. Acknowledgments come back as commands through the
//! node's event channel, not through this trait.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::{max_payload_for_mtu, DEFAULT_MTU};
use crate::error::{NodeError, Result};
use crate::protocol::Message;

/// Outbound side of the wireless link
#[cfg_attr(test, mockall::automock)]
pub trait NotifyLink: Send {
    /// Largest payload one notification can carry
    fn max_payload(&self) -> usize;

    /// Number of connected peers
    fn connected_peers(&self) -> usize;

    /// Push one payload to the peer
    fn notify(&mut self, payload: &[u8]) -> Result<()>;

    /// A peer connected with the given ATT MTU
    fn peer_connected(&mut self, mtu: u16);

    /// A peer disconnected
    fn peer_disconnected(&mut self);

    /// The MTU was renegotiated
    fn set_mtu(&mut self, mtu: u16);
}

/// Serialize `message` and notify it
pub fn send_message(link: &mut dyn NotifyLink, message: &Message) -> Result<()> {
    let payload = message.encode()?;
    tracing::trace!("TX {} bytes", payload.len());
    link.notify(&payload)
}

/// Link that delivers notifications to an in-process peer over a channel
#[derive(Debug)]
pub struct ChannelLink {
    tx: Sender<Vec<u8>>,
    mtu: u16,
    peers: usize,
}

impl ChannelLink {
    /// Create a link and the receiver the peer reads from
    pub fn new() -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        let link = Self {
            tx,
            mtu: DEFAULT_MTU,
            peers: 0,
        };
        (link, rx)
    }

    /// Current ATT MTU
    pub fn mtu(&self) -> u16 {
        self.mtu
    }
}

impl NotifyLink for ChannelLink {
    fn max_payload(&self) -> usize {
        max_payload_for_mtu(self.mtu)
    }

    fn connected_peers(&self) -> usize {
        self.peers
    }

    fn notify(&mut self, payload: &[u8]) -> Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| NodeError::Link("peer channel closed".to_string()))
    }

    fn peer_connected(&mut self, mtu: u16) {
        self.peers += 1;
        self.set_mtu(mtu);
    }

    /// The MTU falls back to the default once no peer remains
    fn peer_disconnected(&mut self) {
        self.peers = self.peers.saturating_sub(1);
        if self.peers == 0 {
            self.mtu = DEFAULT_MTU;
        }
    }

    fn set_mtu(&mut self, mtu: u16) {
        tracing::debug!("MTU set to {} (payload {})", mtu, max_payload_for_mtu(mtu));
        self.mtu = mtu;
    }
}
