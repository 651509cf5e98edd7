//! Peer-side helpers for driving a node without threads

use crossbeam_channel::Receiver;
use flashlog_rs::node::Node;
use flashlog_rs::protocol::{Command, Message};
use flashlog_rs::receiver::{ExportReceiver, ReceiverEvent};
use std::time::Instant;

/// What a peer saw during one export
#[derive(Debug, Default)]
pub struct PeerTranscript {
    /// Reassembled CSV, if the export finished
    pub csv: Option<String>,
    /// Number of streamed blocks received
    pub blocks: usize,
    /// Whether the log arrived as one inline message
    pub inline: bool,
    /// Every non-export message, in order
    pub status: Vec<Message>,
    /// Largest notification seen
    pub largest_payload: usize,
}

/// Decode everything currently queued on the peer side
pub fn drain_messages(peer_rx: &Receiver<Vec<u8>>) -> Vec<Message> {
    peer_rx
        .try_iter()
        .map(|payload| Message::decode(&payload).unwrap())
        .collect()
}

/// Ack messages among `messages`, as `(action, is_ok, message)`
pub fn acks(messages: &[Message]) -> Vec<(String, bool, Option<String>)> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Ack(ack) => Some((
                ack.ack.clone(),
                ack.status == flashlog_rs::protocol::AckStatus::Ok,
                ack.message.clone(),
            )),
            _ => None,
        })
        .collect()
}

/// Issue `command` and play the peer until the export finishes or stalls
///
/// Every streamed block is acknowledged straight back into the node, so the
/// whole exchange runs on the calling thread.
pub fn run_export(
    node: &mut Node,
    peer_rx: &Receiver<Vec<u8>>,
    command: Command,
    now: Instant,
) -> PeerTranscript {
    let mut receiver = ExportReceiver::new();
    let mut transcript = PeerTranscript::default();
    node.handle_command(command, now);

    while let Ok(payload) = peer_rx.try_recv() {
        transcript.largest_payload = transcript.largest_payload.max(payload.len());
        match receiver.accept(&payload).unwrap() {
            ReceiverEvent::Complete(csv) => {
                transcript.inline = true;
                transcript.csv = Some(csv);
            }
            ReceiverEvent::Block { ack, finished } => {
                transcript.blocks += 1;
                node.handle_command(ack, now);
                if finished.is_some() {
                    transcript.csv = finished;
                }
            }
            ReceiverEvent::Status(message) => transcript.status.push(message),
        }
    }

    transcript
}
