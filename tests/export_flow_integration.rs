//! End-to-end export tests: node, channel link and peer-side receiver

mod common;

use common::builders::NodeBuilder;
use common::mock_helpers::{acks, drain_messages, run_export};
use common::{csv_with_rows, row, HEADER};
use flashlog_rs::export::{CloseReason, ExportState};
use flashlog_rs::ingest::Sample;
use flashlog_rs::node::NodeEvent;
use flashlog_rs::protocol::{Command, Message};
use flashlog_rs::receiver::{ExportReceiver, ReceiverEvent};
use flashlog_rs::storage::DirStorage;
use std::time::{Duration, Instant};

fn block_ids(messages: &[Message]) -> Vec<(u32, u32)> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Block { csv_block } => Some((csv_block.id, csv_block.seq)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_small_log_goes_inline() {
    let content = csv_with_rows(3);
    let mut t = NodeBuilder::new().log_content(&content).build();

    let transcript = run_export(&mut t.node, &t.peer_rx, Command::FlashExport, Instant::now());

    assert!(transcript.inline);
    assert_eq!(transcript.blocks, 0);
    assert_eq!(transcript.csv.as_deref(), Some(content.as_str()));
    assert_eq!(
        acks(&transcript.status),
        vec![("flash_export".to_string(), true, Some("CSV export".to_string()))]
    );
    assert!(matches!(transcript.status[1], Message::Flash { .. }));
    assert_eq!(t.node.engine().last_close(), Some(CloseReason::Inline));
}

#[test]
fn test_large_log_streams_in_order() {
    let content = csv_with_rows(200);
    let mut t = NodeBuilder::new().log_content(&content).build();

    let transcript = run_export(&mut t.node, &t.peer_rx, Command::FlashStream, Instant::now());

    assert!(!transcript.inline);
    assert!(transcript.blocks > 1);
    assert!(transcript.largest_payload <= 182);
    assert_eq!(transcript.csv.as_deref(), Some(content.as_str()));
    assert_eq!(t.node.engine().state(), ExportState::Idle);
    assert_eq!(t.node.engine().last_close(), Some(CloseReason::Completed));
}

#[test]
fn test_small_log_streams_when_payload_too_small() {
    let content = csv_with_rows(10);
    let mut t = NodeBuilder::new().log_content(&content).mtu(Some(100)).build();

    let transcript = run_export(&mut t.node, &t.peer_rx, Command::FlashExport, Instant::now());

    // 53 bytes of framing leave room for exactly one 29-byte row per block
    assert_eq!(transcript.blocks, 11);
    assert!(transcript.largest_payload <= 97);
    assert_eq!(transcript.csv.as_deref(), Some(content.as_str()));
}

#[test]
fn test_oversized_lines_sent_alone() {
    let long = format!("{},{}", row(0), "9".repeat(200));
    let content = format!("{}\n{}\n{}\n", HEADER, long, row(1));
    let mut t = NodeBuilder::new().log_content(&content).mtu(Some(50)).build();

    let transcript = run_export(&mut t.node, &t.peer_rx, Command::FlashStream, Instant::now());

    assert_eq!(transcript.blocks, 3);
    assert!(transcript.largest_payload > 47);
    assert_eq!(transcript.csv.as_deref(), Some(content.as_str()));
}

#[test]
fn test_ingested_rows_export_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = NodeBuilder::new()
        .storage(DirStorage::new(dir.path(), 1 << 20))
        .inline_threshold(0)
        .build();
    let now = Instant::now();

    for i in 0..40u64 {
        let sample = Sample::new(i * 1000).with(21.0 + i as f64).with("ok");
        t.node.handle_event(NodeEvent::Sample(sample), now);
    }
    assert_eq!(t.node.ingest().stats().rows_stored, 40);

    let transcript = run_export(&mut t.node, &t.peer_rx, Command::FlashExport, now);
    let on_disk = std::fs::read_to_string(dir.path().join("log.csv")).unwrap();

    assert_eq!(transcript.csv.as_deref(), Some(on_disk.as_str()));
    let lines: Vec<&str> = on_disk.lines().collect();
    assert_eq!(lines.len(), 41);
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "01/01/70 00:00:00,21.00,ok");
}

#[test]
fn test_samples_skipped_while_streaming() {
    let mut t = NodeBuilder::new().log_content(&csv_with_rows(100)).build();
    let now = Instant::now();

    t.node.handle_command(Command::FlashStream, now);
    assert!(t.node.export_gate());
    t.node
        .handle_event(NodeEvent::Sample(Sample::new(0).with(1.0).with(2.0)), now);
    assert_eq!(t.node.ingest().stats().skipped_export, 1);
    assert_eq!(t.node.ingest().stats().rows_stored, 0);

    t.node.handle_command(Command::FlashStreamStop, now);
    assert!(!t.node.export_gate());
    t.node
        .handle_event(NodeEvent::Sample(Sample::new(0).with(1.0).with(2.0)), now);
    assert_eq!(t.node.ingest().stats().rows_stored, 1);
}

#[test]
fn test_second_export_rejected_while_busy() {
    let mut t = NodeBuilder::new().log_content(&csv_with_rows(100)).build();
    let now = Instant::now();

    t.node.handle_command(Command::FlashStream, now);
    let first = drain_messages(&t.peer_rx);
    assert_eq!(block_ids(&first), vec![(1, 0)]);

    t.node.handle_command(Command::FlashExport, now);
    let second = drain_messages(&t.peer_rx);
    assert_eq!(
        acks(&second),
        vec![(
            "flash_export".to_string(),
            false,
            Some("Export in progress".to_string())
        )]
    );
    assert!(block_ids(&second).is_empty());
    assert_eq!(t.node.engine().session_id(), Some(1));
}

#[test]
fn test_stale_ack_does_not_advance() {
    let mut t = NodeBuilder::new().log_content(&csv_with_rows(100)).build();
    let now = Instant::now();

    t.node.handle_command(Command::FlashStream, now);
    drain_messages(&t.peer_rx);

    t.node.handle_command(Command::CsvAck { id: 99, seq: 0 }, now);
    t.node.handle_command(Command::CsvAck { id: 1, seq: 5 }, now);
    assert!(drain_messages(&t.peer_rx).is_empty());
    assert_eq!(t.node.engine().state(), ExportState::AwaitingAck);

    t.node.handle_command(Command::CsvAck { id: 1, seq: 0 }, now);
    assert_eq!(block_ids(&drain_messages(&t.peer_rx)), vec![(1, 1)]);
}

#[test]
fn test_idle_timeout_then_new_session() {
    let content = csv_with_rows(100);
    let mut t = NodeBuilder::new()
        .log_content(&content)
        .idle_timeout_ms(50)
        .build();
    let t0 = Instant::now();

    t.node.handle_command(Command::FlashStream, t0);
    drain_messages(&t.peer_rx);

    t.node.poll(t0 + Duration::from_millis(50));
    assert!(t.node.engine().is_active());
    t.node.poll(t0 + Duration::from_millis(51));
    assert!(!t.node.engine().is_active());
    assert_eq!(t.node.engine().last_close(), Some(CloseReason::IdleTimeout));

    // A late ack for the dead session is ignored
    t.node
        .handle_command(Command::CsvAck { id: 1, seq: 0 }, t0 + Duration::from_millis(60));
    assert!(drain_messages(&t.peer_rx).is_empty());

    let later = t0 + Duration::from_millis(100);
    t.node.handle_command(Command::FlashStream, later);
    let messages = drain_messages(&t.peer_rx);
    assert_eq!(block_ids(&messages), vec![(2, 0)]);
    t.node.handle_command(Command::FlashStreamStop, later);

    let transcript = run_export(&mut t.node, &t.peer_rx, Command::FlashStream, later);
    assert_eq!(transcript.csv.as_deref(), Some(content.as_str()));
}

#[test]
fn test_no_peer_timeout() {
    let mut t = NodeBuilder::new()
        .log_content(&csv_with_rows(100))
        .idle_timeout_ms(50)
        .build();
    let t0 = Instant::now();

    t.node.handle_command(Command::FlashStream, t0);
    t.node.handle_event(NodeEvent::PeerDisconnected, t0);
    assert!(t.node.engine().is_active());

    t.node.poll(t0 + Duration::from_millis(51));
    assert_eq!(t.node.engine().last_close(), Some(CloseReason::NoPeer));
}

#[test]
fn test_reconnect_within_grace_finishes_export() {
    let content = csv_with_rows(100);
    let mut t = NodeBuilder::new()
        .log_content(&content)
        .idle_timeout_ms(50)
        .build();
    let mut receiver = ExportReceiver::new();
    let t0 = Instant::now();
    t.node.handle_command(Command::FlashStream, t0);

    let mut now = t0;
    let mut acks_sent = 0;
    let mut csv = None;
    while csv.is_none() {
        let payload = t.peer_rx.try_recv().expect("export stalled");
        if let ReceiverEvent::Block { ack, finished } = receiver.accept(&payload).unwrap() {
            if acks_sent < 3 {
                now += Duration::from_millis(40);
            } else if acks_sent == 3 {
                // Session is well past the timeout by now; only the gap counts
                t.node.handle_event(NodeEvent::PeerDisconnected, now);
                t.node.poll(now + Duration::from_millis(10));
                assert!(t.node.engine().is_active());
                t.node.handle_event(
                    NodeEvent::PeerConnected { mtu: 185 },
                    now + Duration::from_millis(20),
                );
                now += Duration::from_millis(30);
            }
            t.node.handle_command(ack, now);
            acks_sent += 1;
            csv = finished;
        }
    }

    assert_eq!(csv.as_deref(), Some(content.as_str()));
    assert_eq!(t.node.engine().last_close(), Some(CloseReason::Completed));
}

#[test]
fn test_flash_clear_aborts_export() {
    let mut t = NodeBuilder::new().log_content(&csv_with_rows(100)).build();
    let now = Instant::now();

    t.node.handle_command(Command::FlashStream, now);
    drain_messages(&t.peer_rx);
    t.node.handle_command(Command::FlashClear, now);

    assert!(!t.node.engine().is_active());
    assert_eq!(t.node.engine().last_close(), Some(CloseReason::Stopped));
    let messages = drain_messages(&t.peer_rx);
    assert_eq!(
        acks(&messages),
        vec![("flash_clear".to_string(), true, Some("Flash cleared".to_string()))]
    );
    match messages.last() {
        Some(Message::Flash { flash }) => assert_eq!(flash.log_bytes, 0),
        other => panic!("expected flash status, got {:?}", other),
    }
}
