//! Node run loop
//!
//! The node owns every subsystem and runs them from a single loop. Wireless
//! callbacks, samples and shutdown requests all arrive as [`NodeEvent`]s on a
//! crossbeam channel and are handled to completion one at a time, so no
//! subsystem needs a lock.
//!
//! # Loop
//!
//! Each iteration:
//!
//! 1. Drains pending events (commands, peer changes, samples)
//! 2. Enforces the export timeouts
//! 3. Takes a reading from the simulated sensor when one is due
//! 4. Sleeps for one tick
//!
//! # Command replies
//!
//! | Command              | Reply                                                |
//! |----------------------|------------------------------------------------------|
//! | `TimeSync`           | `time_sync` ack                                      |
//! | `ConfigGet`          | configuration payload                                |
//! | `ConfigUpdate`       | `config` ack                                         |
//! | `FlashClear`         | `flash_clear` ack, then flash usage                  |
//! | `FlashStatus`        | flash usage, then configuration payload              |
//! | `FlashExport/Stream` | ack, flash usage, then the export itself             |
//! | `FlashStreamStop`    | `flash_stream_stop` ack                              |
//! | `CsvAck`             | next block, or nothing                               |

use crossbeam_channel::{Receiver, TryRecvError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::DeviceClock;
use crate::config::{ConfigUpdate, NodeConfig};
use crate::error::{NodeError, Result};
use crate::export::{ExportEngine, StartOutcome};
use crate::ingest::{IngestOutcome, IngestPipeline, Sample};
use crate::link::{send_message, NotifyLink};
use crate::protocol::{Command, ConfigPayload, Message};
use crate::sensor::SimulatedSensor;
use crate::storage::{FlashStats, LineEstimate, LogStore};

/// Default loop period
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Events delivered to the node loop
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Command from the paired application
    Command(Command),
    /// A peer connected with the given ATT MTU
    PeerConnected { mtu: u16 },
    /// A peer disconnected
    PeerDisconnected,
    /// The MTU was renegotiated
    MtuChanged(u16),
    /// A reading to persist
    Sample(Sample),
    /// Stop the loop
    Shutdown,
}

/// The sensor node
pub struct Node {
    /// Persisted configuration
    config: NodeConfig,
    /// Where configuration updates are saved (not saved when `None`)
    config_path: Option<PathBuf>,
    /// Wall clock
    clock: DeviceClock,
    /// Flash log
    store: LogStore,
    /// Export state machine
    engine: ExportEngine,
    /// Sample gatekeeper
    ingest: IngestPipeline,
    /// Wireless notify transport
    link: Box<dyn NotifyLink>,
    /// Inbound events
    events: Receiver<NodeEvent>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Loop period
    tick: Duration,
    /// Optional reading source
    sensor: Option<SimulatedSensor>,
    /// Start time for sensor patterns
    started_at: Instant,
    /// Last sensor reading
    last_sample_at: Option<Instant>,
    /// A serial dump is reading the log
    dump_in_progress: bool,
}

impl Node {
    /// Create a node from its configuration and collaborators
    pub fn new(
        config: NodeConfig,
        store: LogStore,
        link: Box<dyn NotifyLink>,
        events: Receiver<NodeEvent>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let engine = ExportEngine::new(config.export);
        let ingest = IngestPipeline::new(config.store_flash);
        Self {
            config,
            config_path: None,
            clock: DeviceClock::new(),
            store,
            engine,
            ingest,
            link,
            events,
            running,
            tick: DEFAULT_TICK,
            sensor: None,
            started_at: Instant::now(),
            last_sample_at: None,
            dump_in_progress: false,
        }
    }

    /// Persist configuration updates to `path`
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Sample a simulated sensor every `frequency_ms`
    pub fn with_sensor(mut self, sensor: SimulatedSensor) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Override the loop period
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn clock(&self) -> &DeviceClock {
        &self.clock
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LogStore {
        &mut self.store
    }

    pub fn engine(&self) -> &ExportEngine {
        &self.engine
    }

    pub fn ingest(&self) -> &IngestPipeline {
        &self.ingest
    }

    pub fn link(&self) -> &dyn NotifyLink {
        self.link.as_ref()
    }

    /// Whether ingestion is currently held off
    pub fn export_gate(&self) -> bool {
        self.engine.is_active() || self.dump_in_progress
    }

    /// Prepare the log when flash logging is enabled
    pub fn boot(&mut self) {
        if !self.config.store_flash {
            return;
        }
        match self.store.open(true) {
            Ok(status) => tracing::info!(
                "Log ready: {} ({:?}, {} bytes)",
                self.store.path(),
                status,
                self.store.size()
            ),
            Err(e) => tracing::error!("Log unavailable at boot: {}", e),
        }
    }

    /// Run the main loop until shutdown
    pub fn run(&mut self) {
        tracing::info!(
            "Node '{}' started ({} sensor, every {} ms)",
            self.config.name,
            self.config.sensor,
            self.config.frequency_ms
        );
        self.boot();

        while self.running.load(Ordering::SeqCst) {
            self.process_events();

            let now = Instant::now();
            self.poll(now);

            std::thread::sleep(self.tick);
        }

        if self.engine.stop() {
            tracing::info!("Export aborted by shutdown");
        }
        tracing::info!("Node stopped");
    }

    /// Handle every pending event
    pub fn process_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event, Instant::now()),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Timers: export timeouts and sensor sampling
    pub fn poll(&mut self, now: Instant) {
        let peers = self.link.connected_peers();
        if let Some(reason) = self.engine.poll(now, peers) {
            tracing::warn!("Export closed by timeout: {:?}", reason);
        }

        let period = Duration::from_millis(self.config.frequency_ms as u64);
        let due = match self.last_sample_at {
            Some(last) => now.saturating_duration_since(last) >= period,
            None => true,
        };
        if !due {
            return;
        }
        let gate = self.export_gate();
        let Some(sensor) = self.sensor.as_mut() else {
            return;
        };
        self.last_sample_at = Some(now);
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let sample = sensor.sample(self.clock.local_ms_at(now), elapsed);
        self.ingest.submit(&mut self.store, &sample, gate);
    }

    /// Dispatch one event
    pub fn handle_event(&mut self, event: NodeEvent, now: Instant) {
        match event {
            NodeEvent::Command(command) => self.handle_command(command, now),
            NodeEvent::PeerConnected { mtu } => {
                self.link.peer_connected(mtu);
                self.engine.peers_changed(self.link.connected_peers(), now);
                tracing::info!(
                    "Peer connected (mtu {}, {} connected)",
                    mtu,
                    self.link.connected_peers()
                );
            }
            NodeEvent::PeerDisconnected => {
                self.link.peer_disconnected();
                let peers = self.link.connected_peers();
                tracing::info!("Peer disconnected ({} connected)", peers);
                self.engine.peers_changed(peers, now);
            }
            NodeEvent::MtuChanged(mtu) => self.link.set_mtu(mtu),
            NodeEvent::Sample(sample) => {
                let gate = self.export_gate();
                if let IngestOutcome::Stored { bytes } =
                    self.ingest.submit(&mut self.store, &sample, gate)
                {
                    tracing::trace!("Sample stored ({} bytes)", bytes);
                }
            }
            NodeEvent::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Dispatch one command
    pub fn handle_command(&mut self, command: Command, now: Instant) {
        tracing::debug!("Command: {:?}", command);
        let action = command.action();

        match command {
            Command::TimeSync {
                epoch_ms,
                tz_offset_min,
            } => {
                if let Some(offset) = tz_offset_min {
                    self.clock.set_tz_offset(offset);
                }
                match epoch_ms {
                    Some(epoch_ms) => {
                        self.clock.sync_at(epoch_ms, now);
                        self.send(Message::ok(action, "Clock synchronized"));
                    }
                    None => self.send(Message::error(action, "Missing timestamp")),
                }
            }
            Command::ConfigGet => self.send_config(),
            Command::ConfigUpdate(update) => self.update_config(&update),
            Command::FlashClear => {
                if self.engine.stop() {
                    tracing::info!("Export aborted by flash clear");
                }
                match self.store.clear() {
                    Ok(_) => self.send(Message::ok(action, "Flash cleared")),
                    Err(e) => {
                        tracing::error!("Failed to clear log: {}", e);
                        self.send(Message::error(action, "Flash unavailable"));
                    }
                }
                self.send_flash_status();
            }
            Command::FlashStatus => {
                self.send_flash_status();
                self.send_config();
            }
            Command::FlashExport | Command::FlashStream => self.start_export(action, now),
            Command::FlashStreamStop => {
                self.engine.stop();
                self.send(Message::ok(action, "Stream stopped"));
            }
            Command::CsvAck { id, seq } => {
                if let Err(e) = self.engine.on_ack(id, seq, self.link.as_mut(), now) {
                    tracing::warn!("Export failed after ack {}/{}: {}", id, seq, e);
                }
            }
        }
    }

    fn start_export(&mut self, action: &str, now: Instant) {
        if self.engine.is_active() {
            self.send(Message::error(action, "Export in progress"));
            return;
        }

        let label = if action == "flash_stream" {
            "CSV stream"
        } else {
            "CSV export"
        };
        self.send(Message::ok(action, label));
        self.send_flash_status();

        match self.engine.start(&mut self.store, self.link.as_mut(), now) {
            Ok(StartOutcome::Inline { bytes, .. }) => {
                tracing::debug!("Inline export of {} bytes", bytes)
            }
            Ok(StartOutcome::Streaming { session_id, .. }) => {
                tracing::debug!("Streaming export {} started", session_id)
            }
            Err(NodeError::ExportBusy) => self.send(Message::error(action, "Export in progress")),
            Err(e) if e.is_storage_unavailable() => {
                self.send(Message::error(action, "Flash unavailable"))
            }
            Err(e) => tracing::warn!("Export failed: {}", e),
        }
    }

    fn update_config(&mut self, update: &ConfigUpdate) {
        if !self.config.apply(update) {
            self.send(Message::error("config", "Config ignored"));
            return;
        }

        self.ingest.set_enabled(self.config.store_flash);
        if self.config.store_flash {
            if let Err(e) = self.store.open(true) {
                tracing::error!("Log unavailable after enabling flash logging: {}", e);
            }
        }
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save_to(path) {
                tracing::warn!("Failed to persist config: {}", e);
            }
        }
        self.send(Message::ok("config", "Config updated"));
    }

    fn flash_stats(&mut self, with_estimates: bool) -> Result<FlashStats> {
        let estimate = with_estimates.then(|| LineEstimate {
            line_bytes: self.config.sensor.estimated_line_bytes(),
            frequency_ms: self.config.frequency_ms,
        });
        self.store.stats(estimate)
    }

    fn send_flash_status(&mut self) {
        match self.flash_stats(false) {
            Ok(flash) => self.send(Message::Flash { flash }),
            Err(e) => {
                tracing::error!("Flash status unavailable: {}", e);
                self.send(Message::error("flash_status", "Flash unavailable"));
            }
        }
    }

    fn send_config(&mut self) {
        let flash = self.flash_stats(true).ok();
        let config = ConfigPayload::new(&self.config, flash);
        self.send(Message::Config { config });
    }

    fn send(&mut self, message: Message) {
        if let Err(e) = send_message(self.link.as_mut(), &message) {
            tracing::warn!("Failed to notify peer: {}", e);
        }
    }

    /// Write the log framed for a serial console
    ///
    /// ```text
    /// CSV_BEGIN
    /// CSV_SIZE:<bytes>
    /// <file bytes>
    /// CSV_END
    /// ```
    ///
    /// `CSV_ERROR` is written instead when the log cannot be opened.
    /// Ingestion is held off while the dump runs.
    pub fn dump_to<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<u64> {
        self.dump_in_progress = true;
        let result = self.write_dump(out);
        self.dump_in_progress = false;
        result
    }

    fn write_dump<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<u64> {
        let opened = self.store.open(true).and_then(|_| self.store.open_reader());
        let mut reader = match opened {
            Ok(reader) => reader,
            Err(e) => {
                writeln!(out, "CSV_ERROR")?;
                return Err(e);
            }
        };

        writeln!(out, "CSV_BEGIN")?;
        writeln!(out, "CSV_SIZE:{}", self.store.size())?;
        let copied = std::io::copy(&mut reader, out)?;
        writeln!(out)?;
        writeln!(out, "CSV_END")?;
        out.flush()?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogSettings;
    use crate::link::ChannelLink;
    use crate::protocol::AckStatus;
    use crate::sensor::SignalPattern;
    use crate::storage::{MemStorage, StorageFault};
    use crossbeam_channel::{unbounded, Sender};

    const HEADER: &str = "date_time,value1,value2";

    struct Harness {
        node: Node,
        peer_rx: Receiver<Vec<u8>>,
        _events_tx: Sender<NodeEvent>,
    }

    fn harness(storage: MemStorage, store_flash: bool) -> Harness {
        let (mut link, peer_rx) = ChannelLink::new();
        link.peer_connected(100);
        let (events_tx, events_rx) = unbounded();
        let config = NodeConfig {
            store_flash,
            ..Default::default()
        };
        let store = LogStore::new(Box::new(storage), LogSettings::new("log.csv", HEADER));
        let node = Node::new(
            config,
            store,
            Box::new(link),
            events_rx,
            Arc::new(AtomicBool::new(true)),
        );
        Harness {
            node,
            peer_rx,
            _events_tx: events_tx,
        }
    }

    fn big_log() -> MemStorage {
        let mut content = format!("{}\n", HEADER);
        for i in 0..80 {
            content.push_str(&format!("01/01/70 00:01:{:02},{}.00,1.00\n", i % 60, i));
        }
        MemStorage::new(1 << 20).with_file("log.csv", content.as_bytes())
    }

    fn drain(rx: &Receiver<Vec<u8>>) -> Vec<Message> {
        rx.try_iter().map(|p| Message::decode(&p).unwrap()).collect()
    }

    fn acks(messages: &[Message]) -> Vec<(String, AckStatus, Option<String>)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Ack(ack) => Some((ack.ack.clone(), ack.status, ack.message.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_busy_export_rejected() {
        let mut h = harness(big_log(), true);
        let now = Instant::now();

        h.node.handle_command(Command::FlashStream, now);
        let first = drain(&h.peer_rx);
        assert_eq!(
            acks(&first),
            vec![("flash_stream".to_string(), AckStatus::Ok, Some("CSV stream".to_string()))]
        );
        assert!(first.iter().any(|m| matches!(m, Message::Flash { .. })));
        assert!(first.iter().any(|m| matches!(m, Message::Block { .. })));
        let session = h.node.engine().session_id();

        h.node.handle_command(Command::FlashExport, now);
        let second = drain(&h.peer_rx);
        assert_eq!(
            acks(&second),
            vec![(
                "flash_export".to_string(),
                AckStatus::Error,
                Some("Export in progress".to_string())
            )]
        );
        assert_eq!(second.len(), 1);
        assert_eq!(h.node.engine().session_id(), session);

        h.node.handle_command(Command::FlashStreamStop, now);
        assert!(!h.node.engine().is_active());
        assert_eq!(acks(&drain(&h.peer_rx))[0].0, "flash_stream_stop");
    }

    #[test]
    fn test_time_sync() {
        let mut h = harness(MemStorage::new(4096), false);
        let now = Instant::now();

        h.node.handle_command(
            Command::TimeSync {
                epoch_ms: None,
                tz_offset_min: Some(-60),
            },
            now,
        );
        assert_eq!(acks(&drain(&h.peer_rx))[0].1, AckStatus::Error);
        assert_eq!(h.node.clock().tz_offset_min(), -60);

        h.node.handle_command(
            Command::TimeSync {
                epoch_ms: Some(1_700_000_000_000),
                tz_offset_min: None,
            },
            now,
        );
        assert_eq!(acks(&drain(&h.peer_rx))[0].1, AckStatus::Ok);
        assert!(h.node.clock().is_synced());
    }

    #[test]
    fn test_config_update_enables_logging() {
        let mut h = harness(MemStorage::new(4096), false);
        let now = Instant::now();

        h.node
            .handle_command(Command::ConfigUpdate(ConfigUpdate::default()), now);
        assert_eq!(
            acks(&drain(&h.peer_rx)),
            vec![("config".to_string(), AckStatus::Error, Some("Config ignored".to_string()))]
        );

        let update = ConfigUpdate {
            store_flash: Some(true),
            ..Default::default()
        };
        h.node.handle_command(Command::ConfigUpdate(update), now);
        assert_eq!(acks(&drain(&h.peer_rx))[0].1, AckStatus::Ok);
        assert!(h.node.ingest().is_enabled());
        assert_eq!(h.node.store().size(), HEADER.len() as u64 + 1);
    }

    #[test]
    fn test_flash_clear_reports_status() {
        let mut h = harness(big_log(), true);
        h.node.handle_command(Command::FlashClear, Instant::now());

        let messages = drain(&h.peer_rx);
        assert_eq!(acks(&messages)[0].1, AckStatus::Ok);
        match messages.last() {
            Some(Message::Flash { flash }) => assert_eq!(flash.log_bytes, 0),
            other => panic!("expected flash status, got {:?}", other),
        }
    }

    #[test]
    fn test_flash_status_with_storage_down() {
        let mut h = harness(MemStorage::new(4096).with_fault(StorageFault::Mount), true);
        h.node.handle_command(Command::FlashStatus, Instant::now());

        let messages = drain(&h.peer_rx);
        assert_eq!(
            acks(&messages),
            vec![(
                "flash_status".to_string(),
                AckStatus::Error,
                Some("Flash unavailable".to_string())
            )]
        );
        match messages.last() {
            Some(Message::Config { config }) => assert!(config.flash.is_none()),
            other => panic!("expected config payload, got {:?}", other),
        }
    }

    #[test]
    fn test_samples_gated_during_export() {
        let mut h = harness(big_log(), true);
        let now = Instant::now();
        let before = h.node.store().size();

        h.node.handle_command(Command::FlashStream, now);
        h.node
            .handle_event(NodeEvent::Sample(Sample::new(0).with(1.0).with(2.0)), now);
        assert_eq!(h.node.store().size(), before);

        h.node.handle_command(Command::FlashStreamStop, now);
        h.node
            .handle_event(NodeEvent::Sample(Sample::new(0).with(1.0).with(2.0)), now);
        assert!(h.node.store().size() > before);
    }

    #[test]
    fn test_dump_frames_file() {
        let mut h = harness(
            MemStorage::new(4096).with_file("log.csv", b"date_time,value1,value2\n1,2,3\n"),
            true,
        );
        let mut out = Vec::new();
        let copied = h.node.dump_to(&mut out).unwrap();

        assert_eq!(copied, 30);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "CSV_BEGIN\nCSV_SIZE:30\ndate_time,value1,value2\n1,2,3\n\nCSV_END\n"
        );
        assert!(!h.node.export_gate());
    }

    #[test]
    fn test_dump_reports_error() {
        let mut h = harness(MemStorage::new(4096).with_fault(StorageFault::Mount), true);
        let mut out = Vec::new();
        assert!(h.node.dump_to(&mut out).is_err());
        assert_eq!(out, b"CSV_ERROR\n");
    }

    #[test]
    fn test_peer_events_update_link() {
        let mut h = harness(MemStorage::new(4096), false);
        let now = Instant::now();

        h.node.handle_event(NodeEvent::MtuChanged(247), now);
        assert_eq!(h.node.link().max_payload(), 244);
        h.node.handle_event(NodeEvent::PeerDisconnected, now);
        assert_eq!(h.node.link().connected_peers(), 0);
        h.node.handle_event(NodeEvent::PeerConnected { mtu: 50 }, now);
        assert_eq!(h.node.link().max_payload(), 47);
    }

    #[test]
    fn test_shutdown_and_closed_channel_stop_loop() {
        let mut h = harness(MemStorage::new(4096), false);
        h.node.handle_event(NodeEvent::Shutdown, Instant::now());
        assert!(!h.node.running.load(Ordering::SeqCst));

        let mut h = harness(MemStorage::new(4096), false);
        drop(h._events_tx);
        h.node.process_events();
        assert!(!h.node.running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sensor_sampling_follows_frequency() {
        let Harness {
            node,
            peer_rx: _peer_rx,
            _events_tx,
        } = harness(MemStorage::new(1 << 16), true);
        let mut node = node.with_sensor(SimulatedSensor::new(SignalPattern::Constant(1.0)));
        let t0 = Instant::now();

        node.poll(t0);
        node.poll(t0 + Duration::from_millis(500));
        node.poll(t0 + Duration::from_millis(1000));
        assert_eq!(node.ingest().stats().rows_stored, 2);
    }
}
