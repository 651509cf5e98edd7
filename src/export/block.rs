//! Line-safe block construction
//!
//! Blocks are built greedily from whole log lines. A line that would push
//! the framed block past the payload limit is held back as the pending line
//! and opens the next block. A line too long to fit even on its own is sent
//! alone so the export can never stall on it.

use std::borrow::Cow;
use std::io::{BufRead, BufReader, Read};

use crate::error::Result;
use crate::protocol::{framed_len, Message};

/// Reads non-blank lines, without terminators, with one line of lookahead
pub struct LineReader {
    inner: BufReader<Box<dyn Read + Send>>,
    peeked: Option<String>,
    lossy_lines: u64,
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("peeked", &self.peeked)
            .field("lossy_lines", &self.lossy_lines)
            .finish_non_exhaustive()
    }
}

impl LineReader {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            inner: BufReader::new(reader),
            peeked: None,
            lossy_lines: 0,
        }
    }

    fn read_raw(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if self.inner.read_until(b'\n', &mut buf)? == 0 {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }
            if matches!(text, Cow::Owned(_)) {
                self.lossy_lines += 1;
                tracing::warn!("Log line is not valid UTF-8, invalid bytes replaced with U+FFFD");
            }
            return Ok(Some(line.to_string()));
        }
    }

    /// Lines so far whose invalid UTF-8 was replaced with U+FFFD
    pub fn lossy_lines(&self) -> u64 {
        self.lossy_lines
    }

    /// Next non-blank line
    pub fn next_line(&mut self) -> Result<Option<String>> {
        match self.peeked.take() {
            Some(line) => Ok(Some(line)),
            None => self.read_raw(),
        }
    }

    /// Whether another non-blank line follows
    pub fn has_more(&mut self) -> Result<bool> {
        if self.peeked.is_none() {
            self.peeked = self.read_raw()?;
        }
        Ok(self.peeked.is_some())
    }
}

/// A finalized block, ready to be framed and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltBlock {
    /// Lines joined with `\n`
    pub data: String,
    /// No lines remain after this block
    pub last: bool,
    /// Number of lines in the block
    pub lines: usize,
    /// A single line that exceeds the payload limit on its own
    pub oversized: bool,
}

/// Splits the log into blocks that fit the link payload
#[derive(Debug)]
pub struct BlockBuilder {
    lines: LineReader,
    pending: Option<String>,
}

impl BlockBuilder {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            lines: LineReader::new(reader),
            pending: None,
        }
    }

    /// Lines so far whose invalid UTF-8 was replaced with U+FFFD
    pub fn lossy_lines(&self) -> u64 {
        self.lines.lossy_lines()
    }

    /// Build the block for `(id, seq)` under `max_payload` framed bytes
    ///
    /// Returns `None` when there is nothing left to send. The fit check frames
    /// the candidate with `last: false`, the longer spelling, so flipping the
    /// flag afterwards never grows the message.
    pub fn next_block(&mut self, id: u32, seq: u32, max_payload: usize) -> Result<Option<BuiltBlock>> {
        let mut data = String::new();
        let mut lines = 0usize;

        loop {
            let line = match self.pending.take() {
                Some(line) => line,
                None => match self.lines.next_line()? {
                    Some(line) => line,
                    None => break,
                },
            };

            let candidate = if lines == 0 {
                line.clone()
            } else {
                format!("{}\n{}", data, line)
            };

            if framed_len(&Message::block(id, seq, false, candidate.as_str())) <= max_payload {
                data = candidate;
                lines += 1;
                continue;
            }

            if lines > 0 {
                self.pending = Some(line);
                return Ok(Some(BuiltBlock {
                    data,
                    last: false,
                    lines,
                    oversized: false,
                }));
            }

            let last = !self.lines.has_more()?;
            return Ok(Some(BuiltBlock {
                data: line,
                last,
                lines: 1,
                oversized: true,
            }));
        }

        if lines == 0 {
            return Ok(None);
        }
        Ok(Some(BuiltBlock {
            data,
            last: true,
            lines,
            oversized: false,
        }))
    }
}
