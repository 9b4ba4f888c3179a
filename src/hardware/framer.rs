//! Byte-stream framing and line classification
//!
//! Reads from the device arrive in arbitrary chunks. [`LineFramer`] buffers
//! them, cuts complete `\n`-terminated lines, and classifies each line only
//! once it is complete: a line is an event when its trimmed text starts with
//! `{` or `[` and parses as JSON, otherwise it is diagnostic output.

use crate::hardware::Event;
use serde_json::Value;

/// Longest partial line kept while waiting for a terminator
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Outcome of framing one complete line
#[derive(Debug, Clone, PartialEq)]
pub enum FramedLine {
    /// Well-formed structured record
    Event(Event),
    /// Firmware log output or malformed data
    Diagnostic(String),
}

/// Accumulates raw bytes and splits them into classified lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    overflowed: usize,
    /// Set after an overflow: bytes up to the next terminator belong to the
    /// discarded line
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            overflowed: 0,
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completed, in order
    pub fn push(&mut self, bytes: &[u8]) -> Vec<FramedLine> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if let Some(line) = classify_line(&raw[..end]) {
                lines.push(line);
            }
        }

        if self.discarding {
            self.buffer.clear();
        } else if self.buffer.len() > MAX_LINE_BYTES {
            // A device that never sends a terminator must not grow the buffer forever
            self.overflowed += 1;
            let dropped = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.discarding = true;
            lines.push(FramedLine::Diagnostic(dropped));
        }

        lines
    }

    /// Bytes held waiting for a line terminator
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Number of oversized partial lines that were discarded
    pub fn overflow_count(&self) -> usize {
        self.overflowed
    }
}

/// Classify one line (without its terminator). Blank lines yield nothing.
pub fn classify_line(raw: &[u8]) -> Option<FramedLine> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Some(FramedLine::Event(Event::new(value)));
        }
    }
    Some(FramedLine::Diagnostic(trimmed.to_string()))
}

/// Encode a command as exactly one device line
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = text
        .bytes()
        .filter(|&b| b != b'\n' && b != b'\r')
        .collect();
    bytes.push(b'\n');
    bytes
}
