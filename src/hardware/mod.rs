//! Hardware abstraction layer for the serial ranging bridge
//!
//! The bridge speaks newline-terminated ASCII commands and answers with
//! newline-terminated JSON objects, interleaved with free-form firmware
//! log lines. This module turns that byte stream into discrete [`Event`]s.

pub mod transceiver;
pub mod framer;
pub mod serial;
pub mod mock;
pub mod error;

pub use transceiver::{LineTransport, SerialConfig};
pub use framer::{LineFramer, FramedLine, encode_line};
pub use serial::SerialTransceiver;
pub use mock::MockTransceiver;
pub use error::{CommError, CommResult};

use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the discriminator field carried by every device event
pub const EVENT_KIND_FIELD: &str = "event";

/// A structured record received from the device
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub payload: Value,
    pub timestamp_ms: u64,
}

impl Event {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            timestamp_ms: now_ms(),
        }
    }

    /// Value of the `"event"` field, if the payload is an object carrying one
    pub fn kind(&self) -> Option<&str> {
        self.payload.get(EVENT_KIND_FIELD).and_then(Value::as_str)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
