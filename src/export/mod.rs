//! Log export over the notify link
//!
//! Small logs go out as a single inline message. Larger ones are streamed as
//! line-aligned blocks, one at a time, each waiting for the peer's `CsvAck`
//! before the next is sent.
//!
//! - [`ExportEngine`] - session state machine (start, ack, poll, stop)
//! - [`BlockBuilder`] - greedy line packing under the payload limit

pub mod block;
pub mod engine;

pub use block::{BlockBuilder, BuiltBlock, LineReader};
pub use engine::{AckOutcome, CloseReason, ExportEngine, ExportState, StartOutcome};
