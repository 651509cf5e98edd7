//! Export session state machine
//!
//! ```text
//!            start()                       fits inline
//!   Idle ──────────────┬─────────────────────────────────▶ InlineSent ──▶ Idle
//!                      │ otherwise
//!                      ▼
//!               AwaitingData ──send block──▶ AwaitingAck
//!                      ▲                          │
//!                      └──── matching ack ◀───────┤
//!                                                 │ ack of last block,
//!                                                 │ stop(), timeout,
//!                                                 ▼ link failure
//!                                              Closed ──▶ Idle
//! ```
//!
//! Exactly one block is in flight at a time. Acknowledgments that do not
//! name the current session and the last block sent are dropped without
//! touching any state. A session that sees no send or ack activity for the
//! idle timeout is abandoned; the peer restarts the export from scratch.

use std::borrow::Cow;
use std::time::Instant;

use crate::config::{ExportSettings, ACK_WINDOW};
use crate::error::{NodeError, Result};
use crate::link::{send_message, NotifyLink};
use crate::protocol::{framed_len, Message};
use crate::storage::LogStore;

use super::block::BlockBuilder;

/// Export engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportState {
    /// No session
    #[default]
    Idle,
    /// The whole log went out as one message (transient)
    InlineSent,
    /// Streaming; the next block may be built and sent
    AwaitingData,
    /// Streaming; blocked until the peer acknowledges the last block
    AwaitingAck,
    /// Session torn down (transient)
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Inline export sent
    Inline,
    /// Last block acknowledged
    Completed,
    /// Nothing left to send
    Exhausted,
    /// Explicit stop
    Stopped,
    /// No send or ack activity within the idle timeout
    IdleTimeout,
    /// No peer connected within the idle timeout
    NoPeer,
    /// The link rejected a notification
    LinkFailure,
    /// The log could not be opened or read
    StorageFailure,
}

/// What `start` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Whole log sent in one message; the session is already closed
    ///
    /// JSON carries text only, so byte sequences that are not valid UTF-8
    /// are replaced with U+FFFD and `lossy` is set. Streamed blocks do the
    /// same per line.
    Inline {
        session_id: u32,
        bytes: u64,
        lossy: bool,
    },
    /// Streaming started; the first block is in flight
    Streaming { session_id: u32, total_bytes: u64 },
}

/// What `on_ack` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Stale, duplicate or unexpected; nothing changed
    Ignored,
    /// Accepted and the next block was sent
    NextBlockSent,
    /// Accepted and the export is finished
    Completed,
}

#[derive(Debug)]
struct ExportSession {
    id: u32,
    /// Sequence number of the next block
    seq: u32,
    last_sent: Option<u32>,
    last_acked: Option<u32>,
    all_sent: bool,
    blocks: BlockBuilder,
    last_activity: Instant,
    /// When the last peer went away, while none is connected
    peerless_since: Option<Instant>,
    blocks_sent: u32,
    bytes_sent: u64,
}

impl ExportSession {
    fn in_flight(&self) -> u32 {
        let acked = self.last_acked.map_or(0, |s| s + 1);
        self.seq.saturating_sub(acked)
    }
}

/// Drives inline and streamed exports of the log
#[derive(Debug, Default)]
pub struct ExportEngine {
    settings: ExportSettings,
    state: ExportState,
    last_session_id: u32,
    session: Option<ExportSession>,
    last_close: Option<CloseReason>,
}

impl ExportEngine {
    pub fn new(settings: ExportSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    /// Whether a streaming session exists
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Id of the running session
    pub fn session_id(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Why the most recent session ended
    pub fn last_close(&self) -> Option<CloseReason> {
        self.last_close
    }

    fn transition(&mut self, to: ExportState) {
        if self.state != to {
            tracing::trace!("Export state {:?} -> {:?}", self.state, to);
            self.state = to;
        }
    }

    fn close(&mut self, reason: CloseReason) {
        self.transition(ExportState::Closed);
        if let Some(session) = self.session.take() {
            match reason {
                CloseReason::Completed | CloseReason::Exhausted => {
                    tracing::info!(
                        "Export {} finished: {} blocks, {} bytes",
                        session.id,
                        session.blocks_sent,
                        session.bytes_sent
                    );
                    let lossy = session.blocks.lossy_lines();
                    if lossy > 0 {
                        tracing::warn!(
                            "Export {} sent {} lines with invalid UTF-8 replaced",
                            session.id,
                            lossy
                        );
                    }
                }
                CloseReason::IdleTimeout | CloseReason::NoPeer => tracing::warn!(
                    "Export {} abandoned ({:?}) after {} blocks",
                    session.id,
                    reason,
                    session.blocks_sent
                ),
                _ => tracing::info!("Export {} closed: {:?}", session.id, reason),
            }
        }
        self.last_close = Some(reason);
        self.transition(ExportState::Idle);
    }

    /// Begin exporting the log
    pub fn start(
        &mut self,
        store: &mut LogStore,
        link: &mut dyn NotifyLink,
        now: Instant,
    ) -> Result<StartOutcome> {
        if self.is_active() {
            return Err(NodeError::ExportBusy);
        }

        if let Err(e) = store.open(true) {
            tracing::error!("Export aborted, log unavailable: {}", e);
            self.close(CloseReason::StorageFailure);
            return Err(e);
        }

        let total = store.size();
        self.last_session_id = self.last_session_id.wrapping_add(1);
        let id = self.last_session_id;
        let max_payload = link.max_payload();

        if total > 0 && total <= self.settings.inline_threshold {
            let content = match store.read_all() {
                Ok(content) => content,
                Err(e) => {
                    self.close(CloseReason::StorageFailure);
                    return Err(e);
                }
            };
            let text = String::from_utf8_lossy(&content);
            let lossy = matches!(text, Cow::Owned(_));
            let message = Message::inline(text);
            if framed_len(&message) <= max_payload {
                if lossy {
                    tracing::warn!(
                        "Export {}: log is not valid UTF-8, invalid bytes sent as U+FFFD",
                        id
                    );
                }
                self.transition(ExportState::InlineSent);
                if let Err(e) = send_message(link, &message) {
                    self.close(CloseReason::LinkFailure);
                    return Err(e);
                }
                self.close(CloseReason::Inline);
                tracing::info!("Export {} sent inline ({} bytes)", id, total);
                return Ok(StartOutcome::Inline {
                    session_id: id,
                    bytes: total,
                    lossy,
                });
            }
            tracing::debug!(
                "Log of {} bytes does not fit a {}-byte payload, streaming",
                total,
                max_payload
            );
        }

        let reader = match store.open_reader() {
            Ok(reader) => reader,
            Err(e) => {
                self.close(CloseReason::StorageFailure);
                return Err(e);
            }
        };

        tracing::info!(
            "Export {} streaming {} bytes, payload {}",
            id,
            total,
            max_payload
        );
        self.session = Some(ExportSession {
            id,
            seq: 0,
            last_sent: None,
            last_acked: None,
            all_sent: false,
            blocks: BlockBuilder::new(reader),
            last_activity: now,
            peerless_since: (link.connected_peers() == 0).then_some(now),
            blocks_sent: 0,
            bytes_sent: 0,
        });
        self.last_close = None;
        self.transition(ExportState::AwaitingData);
        self.pump(link, now)?;

        Ok(StartOutcome::Streaming {
            session_id: id,
            total_bytes: total,
        })
    }

    /// Send blocks until the ack window is full or everything is out
    fn pump(&mut self, link: &mut dyn NotifyLink, now: Instant) -> Result<()> {
        while self.state == ExportState::AwaitingData {
            let max_payload = link.max_payload();
            let Some(session) = self.session.as_mut() else {
                self.transition(ExportState::Idle);
                return Ok(());
            };

            let block = match session.blocks.next_block(session.id, session.seq, max_payload) {
                Ok(Some(block)) => block,
                Ok(None) => {
                    self.close(CloseReason::Exhausted);
                    return Ok(());
                }
                Err(e) => {
                    self.close(CloseReason::StorageFailure);
                    return Err(e.with_context("Failed to read log during export"));
                }
            };

            let message = Message::block(session.id, session.seq, block.last, block.data);
            if block.oversized {
                tracing::warn!(
                    "Export {} block {} carries an oversized line ({} bytes framed, limit {})",
                    session.id,
                    session.seq,
                    framed_len(&message),
                    max_payload
                );
            }
            let payload = match message.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    self.close(CloseReason::LinkFailure);
                    return Err(e);
                }
            };
            if let Err(e) = link.notify(&payload) {
                tracing::error!("Export {} block {} not delivered: {}", session.id, session.seq, e);
                self.close(CloseReason::LinkFailure);
                return Err(e);
            }

            tracing::debug!(
                "Export {} sent block {} ({} lines, {} bytes{})",
                session.id,
                session.seq,
                block.lines,
                payload.len(),
                if block.last { ", last" } else { "" }
            );
            session.last_sent = Some(session.seq);
            session.seq += 1;
            session.last_activity = now;
            session.blocks_sent += 1;
            session.bytes_sent += payload.len() as u64;
            if block.last {
                session.all_sent = true;
            }

            if session.all_sent || session.in_flight() >= ACK_WINDOW {
                self.transition(ExportState::AwaitingAck);
            }
        }
        Ok(())
    }

    /// Handle a `CsvAck` from the peer
    pub fn on_ack(
        &mut self,
        id: u32,
        seq: u32,
        link: &mut dyn NotifyLink,
        now: Instant,
    ) -> Result<AckOutcome> {
        if self.state != ExportState::AwaitingAck {
            tracing::trace!("Ack {}/{} ignored: not awaiting an ack", id, seq);
            return Ok(AckOutcome::Ignored);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(AckOutcome::Ignored);
        };
        if id != session.id || Some(seq) != session.last_sent {
            tracing::debug!(
                "Stale ack {}/{} ignored (session {}, last sent {:?})",
                id,
                seq,
                session.id,
                session.last_sent
            );
            return Ok(AckOutcome::Ignored);
        }

        if session.last_acked.map_or(true, |acked| seq >= acked) {
            session.last_acked = Some(seq);
        }
        session.last_activity = now;

        if session.all_sent && session.last_acked >= session.last_sent {
            self.close(CloseReason::Completed);
            return Ok(AckOutcome::Completed);
        }

        self.transition(ExportState::AwaitingData);
        self.pump(link, now)?;
        if self.is_active() {
            Ok(AckOutcome::NextBlockSent)
        } else {
            Ok(AckOutcome::Completed)
        }
    }

    /// Track the connected peer count for the no-peer timeout
    ///
    /// The grace interval starts when the count drops to zero and is
    /// cancelled by a reconnect.
    pub fn peers_changed(&mut self, connected_peers: usize, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if connected_peers == 0 {
            if session.peerless_since.is_none() {
                tracing::debug!("Export {} has no peer", session.id);
                session.peerless_since = Some(now);
            }
        } else {
            session.peerless_since = None;
        }
    }

    /// Enforce the idle and no-peer timeouts
    ///
    /// A zero peer count not yet reported through
    /// [`peers_changed`](Self::peers_changed) starts the grace interval here.
    pub fn poll(&mut self, now: Instant, connected_peers: usize) -> Option<CloseReason> {
        self.peers_changed(connected_peers, now);
        let session = self.session.as_ref()?;
        let timeout = self.settings.idle_timeout();

        let peerless_for = session
            .peerless_since
            .map(|since| now.saturating_duration_since(since));
        let reason = if peerless_for.is_some_and(|d| d > timeout) {
            CloseReason::NoPeer
        } else if now.saturating_duration_since(session.last_activity) > timeout {
            CloseReason::IdleTimeout
        } else {
            return None;
        };

        self.close(reason);
        Some(reason)
    }

    /// Abort the running session, returning whether there was one
    pub fn stop(&mut self) -> bool {
        if self.session.is_none() && self.state == ExportState::Idle {
            return false;
        }
        self.close(CloseReason::Stopped);
        true
    }
}
