//! Sample ingestion into the flash log
//!
//! Turns a [`Sample`] into one CSV row and appends it through the
//! [`LogStore`]. Ingestion is skipped, never queued, when persistence is
//! disabled, while an export is reading the log, or when storage is down.

use crate::clock::format_timestamp;
use crate::storage::LogStore;

/// One value of a sample
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Numeric reading, rendered with two decimals
    Number(f64),
    /// Free text, sanitized before writing
    Text(String),
}

impl Field {
    /// Render the field as it appears in the CSV row
    pub fn render(&self) -> String {
        match self {
            Field::Number(v) => format_number(*v),
            Field::Text(s) => sanitize_field(s),
        }
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Number(v)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Text(s.to_string())
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Text(s)
    }
}

/// A timestamped measurement destined to become one CSV row
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Local-time milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Values in column order
    pub fields: Vec<Field>,
}

impl Sample {
    /// Create a sample with no fields
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            fields: Vec::new(),
        }
    }

    /// Append a field
    pub fn with(mut self, field: impl Into<Field>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Render the row: timestamp first, then each field
    pub fn to_row(&self) -> Vec<String> {
        std::iter::once(format_timestamp(self.timestamp_ms))
            .chain(self.fields.iter().map(Field::render))
            .collect()
    }
}

/// Fixed two-decimal rendering; non-finite values become an empty field
pub fn format_number(v: f64) -> String {
    if v.is_finite() {
        format!("{:.2}", v)
    } else {
        String::new()
    }
}

/// Drop characters that would break the row grammar
pub fn sanitize_field(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ',' | '\r' | '\n'))
        .collect()
}

/// Result of a [`IngestPipeline::submit`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Row appended
    Stored { bytes: usize },
    /// Persistence is turned off
    Disabled,
    /// An export is reading the log
    ExportActive,
    /// The log could not be opened or written
    StorageUnavailable,
}

/// Counters kept by the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Rows appended
    pub rows_stored: u64,
    /// Bytes appended
    pub bytes_stored: u64,
    /// Samples dropped because of the export gate
    pub skipped_export: u64,
    /// Samples dropped because of storage failures
    pub storage_failures: u64,
}

/// Gatekeeper between the sampler and the log
#[derive(Debug, Clone, Default)]
pub struct IngestPipeline {
    enabled: bool,
    stats: IngestStats,
}

impl IngestPipeline {
    /// Create a pipeline, initially enabled or not
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stats: IngestStats::default(),
        }
    }

    /// Whether persistence is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn persistence on or off
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            tracing::info!("Flash logging {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    /// Counters
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Append `sample` to the log unless a gate is closed
    pub fn submit(
        &mut self,
        store: &mut LogStore,
        sample: &Sample,
        export_active: bool,
    ) -> IngestOutcome {
        if !self.enabled {
            return IngestOutcome::Disabled;
        }
        if export_active {
            self.stats.skipped_export += 1;
            tracing::trace!("Sample skipped: export in progress");
            return IngestOutcome::ExportActive;
        }

        match store.append_row(&sample.to_row()) {
            Ok(bytes) => {
                self.stats.rows_stored += 1;
                self.stats.bytes_stored += bytes as u64;
                IngestOutcome::Stored { bytes }
            }
            Err(e) => {
                self.stats.storage_failures += 1;
                tracing::error!("Failed to log sample: {}", e);
                IngestOutcome::StorageUnavailable
            }
        }
    }
}
