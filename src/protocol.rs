//! Wire messages exchanged with the paired application
//!
//! Inbound commands arrive already parsed as [`Command`] values; turning the
//! raw envelope into a command is done upstream of this crate.
//!
//! Outbound messages are JSON objects, one per notification:
//!
//! ```text
//! {"csv":"date_time,value1,value2\n..."}
//! {"csv_block":{"id":3,"seq":0,"last":false,"data":"...\n..."}}
//! {"ack":"flash_export","status":"ok","message":"CSV export"}
//! {"flash":{"total":1441792,"used":4096,"free":1437696,"percent_used":0,"log_bytes":512}}
//! {"config":{"name":"...","sensor":"i2c","frequency":1000,"store_flash":true,"flash":{...}}}
//! ```
//!
//! All escaping is done by `serde_json`, and the framed size of a message is
//! the length of its serialized form.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigUpdate, NodeConfig, SensorKind};
use crate::error::Result;
use crate::storage::FlashStats;

/// Command received from the paired application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set the wall clock and/or timezone
    TimeSync {
        epoch_ms: Option<u64>,
        tz_offset_min: Option<i32>,
    },
    /// Request the configuration payload
    ConfigGet,
    /// Apply a partial configuration update
    ConfigUpdate(ConfigUpdate),
    /// Delete the log file
    FlashClear,
    /// Request flash usage
    FlashStatus,
    /// Start an export
    FlashExport,
    /// Start an export (streaming request; same behavior as `FlashExport`)
    FlashStream,
    /// Abort the running export
    FlashStreamStop,
    /// Acknowledge a streamed block
    CsvAck { id: u32, seq: u32 },
}

impl Command {
    /// Action name used in the `ack` field of replies
    pub fn action(&self) -> &'static str {
        match self {
            Command::TimeSync { .. } => "time_sync",
            Command::ConfigGet => "config_get",
            Command::ConfigUpdate(_) => "config",
            Command::FlashClear => "flash_clear",
            Command::FlashStatus => "flash_status",
            Command::FlashExport => "flash_export",
            Command::FlashStream => "flash_stream",
            Command::FlashStreamStop => "flash_stream_stop",
            Command::CsvAck { .. } => "csv_ack",
        }
    }
}

/// Outcome carried by an [`AckMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Status reply to a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    /// Action being acknowledged
    pub ack: String,
    /// Outcome
    pub status: AckStatus,
    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One streamed slice of the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvBlock {
    /// Export session id
    pub id: u32,
    /// Sequence number within the session, from 0
    pub seq: u32,
    /// Whether this is the final block
    pub last: bool,
    /// Whole log lines joined with `\n` (no trailing newline)
    pub data: String,
}

/// Configuration as reported to the paired application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPayload {
    pub name: String,
    pub sensor: SensorKind,
    pub frequency: u32,
    pub store_flash: bool,
    /// Flash usage with projections, absent when storage is down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash: Option<FlashStats>,
}

impl ConfigPayload {
    /// Build the payload from the node configuration
    pub fn new(config: &NodeConfig, flash: Option<FlashStats>) -> Self {
        Self {
            name: config.name.clone(),
            sensor: config.sensor,
            frequency: config.frequency_ms,
            store_flash: config.store_flash,
            flash,
        }
    }
}

/// Any message the node notifies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Command status
    Ack(AckMessage),
    /// Whole log in one message
    Inline { csv: String },
    /// Streamed block
    Block { csv_block: CsvBlock },
    /// Flash usage
    Flash { flash: FlashStats },
    /// Configuration
    Config { config: ConfigPayload },
}

impl Message {
    /// Successful command status
    pub fn ok(action: &str, message: impl Into<String>) -> Self {
        Message::Ack(AckMessage {
            ack: action.to_string(),
            status: AckStatus::Ok,
            message: Some(message.into()),
        })
    }

    /// Failed command status
    pub fn error(action: &str, message: impl Into<String>) -> Self {
        Message::Ack(AckMessage {
            ack: action.to_string(),
            status: AckStatus::Error,
            message: Some(message.into()),
        })
    }

    /// Inline export
    pub fn inline(csv: impl Into<String>) -> Self {
        Message::Inline { csv: csv.into() }
    }

    /// Streamed block
    pub fn block(id: u32, seq: u32, last: bool, data: impl Into<String>) -> Self {
        Message::Block {
            csv_block: CsvBlock {
                id,
                seq,
                last,
                data: data.into(),
            },
        }
    }

    /// Serialize to the bytes sent over the link
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a notification payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Serialized size of a message, or `usize::MAX` if it cannot be serialized
pub fn framed_len(message: &Message) -> usize {
    serde_json::to_vec(message)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}
