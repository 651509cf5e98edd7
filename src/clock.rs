//! Node wall clock
//!
//! The node has no real-time clock. It counts milliseconds since boot and
//! learns the wall-clock time from a `time_sync` command sent by the paired
//! application. Until then, timestamps are simply the uptime.
//!
//! Row timestamps are rendered in local time as `dd/mm/yy HH:MM:SS`. The
//! timezone offset follows the browser convention: minutes to *add* to local
//! time to get UTC, so UTC+2 is sent as `-120`.

use chrono::DateTime;
use std::time::Instant;

/// Format used for timestamps in the CSV log
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%y %H:%M:%S";

/// Uptime-based clock with optional wall-clock synchronization
#[derive(Debug, Clone)]
pub struct DeviceClock {
    /// Boot instant
    boot: Instant,
    /// Wall-clock epoch minus uptime, once synchronized
    epoch_offset_ms: Option<i64>,
    /// Minutes to add to local time to get UTC
    tz_offset_min: i32,
}

impl Default for DeviceClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceClock {
    /// Start a clock at the current instant
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start a clock with an explicit boot instant
    pub fn starting_at(boot: Instant) -> Self {
        Self {
            boot,
            epoch_offset_ms: None,
            tz_offset_min: 0,
        }
    }

    /// Milliseconds since boot at `now`
    pub fn uptime_ms_at(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.boot).as_millis() as u64
    }

    /// Whether a time sync has been received
    pub fn is_synced(&self) -> bool {
        self.epoch_offset_ms.is_some()
    }

    /// Timezone offset in minutes
    pub fn tz_offset_min(&self) -> i32 {
        self.tz_offset_min
    }

    /// Synchronize to a wall-clock epoch observed at `now`
    pub fn sync_at(&mut self, epoch_ms: u64, now: Instant) {
        let offset = epoch_ms as i64 - self.uptime_ms_at(now) as i64;
        self.epoch_offset_ms = Some(offset);
        tracing::debug!("Clock synced: epoch_ms={} offset={}", epoch_ms, offset);
    }

    /// Synchronize to a wall-clock epoch observed now
    pub fn sync(&mut self, epoch_ms: u64) {
        self.sync_at(epoch_ms, Instant::now());
    }

    /// Set the timezone offset
    pub fn set_tz_offset(&mut self, offset_min: i32) {
        self.tz_offset_min = offset_min;
        tracing::debug!("Clock timezone offset set to {} min", offset_min);
    }

    /// UTC epoch milliseconds at `now` (uptime when not synced)
    pub fn epoch_ms_at(&self, now: Instant) -> u64 {
        let uptime = self.uptime_ms_at(now);
        match self.epoch_offset_ms {
            Some(offset) => (offset + uptime as i64).max(0) as u64,
            None => uptime,
        }
    }

    /// Local-time milliseconds at `now`
    pub fn local_ms_at(&self, now: Instant) -> u64 {
        let local = self.epoch_ms_at(now) as i64 - self.tz_offset_min as i64 * 60_000;
        local.max(0) as u64
    }

    /// Local-time milliseconds now
    pub fn local_ms(&self) -> u64 {
        self.local_ms_at(Instant::now())
    }
}

/// Render local-time milliseconds as `dd/mm/yy HH:MM:SS`
pub fn format_timestamp(local_ms: u64) -> String {
    DateTime::from_timestamp_millis(local_ms as i64)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}
