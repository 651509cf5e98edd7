//! Flashlog Node - Main Entry Point
//!
//! Runs a simulated sensor node on a directory-backed flash partition and
//! drives it from an in-process peer: the peer connects, syncs the clock,
//! enables flash logging, feeds a batch of readings and then exports the log
//! back, acknowledging every streamed block.
//!
//! Pass `--dump` to also print the log framed for a serial console.

use anyhow::{bail, Context};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use flashlog_rs::{
    config::{ensure_app_data_dir, format_file_size, ConfigUpdate, NodeConfig, CONFIG_FILE, FLASH_DIR},
    link::ChannelLink,
    node::{Node, NodeEvent},
    protocol::{Command, Message},
    receiver::{ExportReceiver, ReceiverEvent},
    sensor::SimulatedSensor,
    storage::{DirStorage, LogStore},
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Readings fed by the demo peer before exporting
const DEMO_SAMPLES: u64 = 120;

/// Negotiated MTU used by the demo peer
const DEMO_MTU: u16 = 185;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,flashlog_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting flashlog node");

    let data_dir = ensure_app_data_dir().context("Failed to prepare data directory")?;
    let config = NodeConfig::load_or_default();
    let storage = DirStorage::new(data_dir.join(FLASH_DIR), config.log.capacity_bytes);
    let store = LogStore::new(Box::new(storage), config.log.clone());

    let (link, peer_rx) = ChannelLink::new();
    let (events_tx, events_rx) = unbounded();
    let running = Arc::new(AtomicBool::new(true));
    let mut sensor = SimulatedSensor::for_kind(config.sensor);
    let frequency_ms = config.frequency_ms as u64;

    let mut node = Node::new(config, store, Box::new(link), events_rx, running)
        .with_config_path(data_dir.join(CONFIG_FILE));
    let node_handle = std::thread::spawn(move || {
        node.run();
        node
    });

    // Peer side
    let send = |event: NodeEvent| {
        events_tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("Node event channel closed"))
    };

    send(NodeEvent::PeerConnected { mtu: DEMO_MTU })?;
    send(NodeEvent::Command(Command::TimeSync {
        epoch_ms: Some(chrono::Utc::now().timestamp_millis().max(0) as u64),
        tz_offset_min: Some(0),
    }))?;
    send(NodeEvent::Command(Command::ConfigUpdate(ConfigUpdate {
        store_flash: Some(true),
        ..Default::default()
    })))?;

    let base_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    for i in 0..DEMO_SAMPLES {
        let elapsed_ms = i * frequency_ms;
        let sample = sensor.sample(base_ms + elapsed_ms, elapsed_ms as f64 / 1000.0);
        send(NodeEvent::Sample(sample))?;
    }
    send(NodeEvent::Command(Command::FlashExport))?;

    let mut receiver = ExportReceiver::new();
    let started = Instant::now();
    let exported = loop {
        let payload = match peer_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(payload) => payload,
            Err(RecvTimeoutError::Timeout) => bail!("Export did not complete in time"),
            Err(RecvTimeoutError::Disconnected) => bail!("Node link closed"),
        };

        match receiver.accept(&payload)? {
            ReceiverEvent::Complete(csv) => break csv,
            ReceiverEvent::Block { ack, finished } => {
                send(NodeEvent::Command(ack))?;
                if let Some(csv) = finished {
                    break csv;
                }
            }
            ReceiverEvent::Status(Message::Ack(ack)) => {
                tracing::info!("Peer got ack {}: {:?} {:?}", ack.ack, ack.status, ack.message);
            }
            ReceiverEvent::Status(Message::Flash { flash }) => {
                tracing::info!(
                    "Peer got flash status: {} of {} used, log {}",
                    format_file_size(flash.used),
                    format_file_size(flash.total),
                    format_file_size(flash.log_bytes)
                );
            }
            ReceiverEvent::Status(other) => tracing::debug!("Peer got {:?}", other),
        }
    };

    tracing::info!(
        "Peer received {} lines ({}) in {:?}",
        exported.lines().count(),
        format_file_size(exported.len() as u64),
        started.elapsed()
    );

    send(NodeEvent::Shutdown)?;
    let mut node = node_handle
        .join()
        .map_err(|_| anyhow::anyhow!("Node thread panicked"))?;

    if std::env::args().any(|arg| arg == "--dump") {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        node.dump_to(&mut out).context("Serial dump failed")?;
    }

    tracing::info!("Shutting down...");
    Ok(())
}
