//! Peer-side export reassembly
//!
//! [`ExportReceiver`] plays the paired application's part of an export: it
//! parses each notification, checks that streamed blocks arrive in order for
//! one session, rebuilds the CSV and produces the `CsvAck` the node waits for.
//! The demo binary and the integration tests use it as the far end of a
//! [`ChannelLink`](crate::link::ChannelLink).

use crate::error::{NodeError, Result};
use crate::protocol::{Command, CsvBlock, Message};

/// What a notification meant to the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// A whole log arrived inline
    Complete(String),
    /// A streamed block was accepted; send `ack` back to the node
    Block {
        ack: Command,
        /// Reassembled log when this was the last block
        finished: Option<String>,
    },
    /// Any other message (command status, flash usage, configuration)
    Status(Message),
}

/// Reassembles streamed exports
#[derive(Debug, Default)]
pub struct ExportReceiver {
    session: Option<u32>,
    expected_seq: u32,
    lines: Vec<String>,
    exports_completed: u32,
}

impl ExportReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session currently being reassembled
    pub fn session(&self) -> Option<u32> {
        self.session
    }

    /// Lines received so far in the current session
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of exports fully received
    pub fn exports_completed(&self) -> u32 {
        self.exports_completed
    }

    /// Process one notification payload
    pub fn accept(&mut self, payload: &[u8]) -> Result<ReceiverEvent> {
        match Message::decode(payload)? {
            Message::Inline { csv } => {
                self.reset();
                self.exports_completed += 1;
                tracing::debug!("Inline export received ({} bytes)", csv.len());
                Ok(ReceiverEvent::Complete(csv))
            }
            Message::Block { csv_block } => self.accept_block(csv_block),
            other => Ok(ReceiverEvent::Status(other)),
        }
    }

    fn accept_block(&mut self, block: CsvBlock) -> Result<ReceiverEvent> {
        if self.session != Some(block.id) {
            if block.seq != 0 {
                return Err(NodeError::Link(format!(
                    "block {} of unknown session {}",
                    block.seq, block.id
                )));
            }
            tracing::debug!("Receiving export session {}", block.id);
            self.reset();
            self.session = Some(block.id);
        }

        if block.seq != self.expected_seq {
            return Err(NodeError::Link(format!(
                "session {}: expected block {}, got {}",
                block.id, self.expected_seq, block.seq
            )));
        }

        self.lines
            .extend(block.data.split('\n').map(str::to_string));
        self.expected_seq += 1;

        let ack = Command::CsvAck {
            id: block.id,
            seq: block.seq,
        };
        let finished = if block.last {
            let mut csv = self.lines.join("\n");
            csv.push('\n');
            self.reset();
            self.exports_completed += 1;
            Some(csv)
        } else {
            None
        };
        Ok(ReceiverEvent::Block { ack, finished })
    }

    fn reset(&mut self) {
        self.session = None;
        self.expected_seq = 0;
        self.lines.clear();
    }
}
