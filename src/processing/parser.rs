use crate::hardware::Event;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Event kind of a ping response
pub const PING_RESPONSE_EVENT: &str = "ping_resp";

/// Event kind of an intermediate ranging report
pub const RANGE_REPORT_EVENT: &str = "range_report";

/// Event kind of a final ranging result
pub const RANGE_FINAL_EVENT: &str = "range_final";

/// Health report of one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PingSample {
    pub node_id: u16,
    /// Firmware state code
    pub system_state: u32,
    /// Supply voltage (millivolts)
    pub voltage_mv: u32,
}

/// Result of one ranging exchange between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSample {
    pub node_a_id: u16,
    pub node_b_id: u16,
    /// Measured distance (meters); zero or negative means no valid range
    pub distance_m: f64,
    /// Received signal strength (dBm)
    pub rssi_dbm: f64,
}

impl RangeSample {
    /// A usable range is strictly positive
    pub fn is_valid(&self) -> bool {
        self.distance_m > 0.0
    }
}

/// Typed view of an [`Event`]
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Ping(PingSample),
    Range(RangeSample),
    /// Structured but not a response this host understands
    Unrecognized(Option<String>),
}

impl fmt::Display for DeviceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMessage::Ping(p) => write!(
                f,
                "ping_resp node=0x{:04X} state={} voltage={}mV",
                p.node_id, p.system_state, p.voltage_mv
            ),
            DeviceMessage::Range(r) => write!(
                f,
                "range 0x{:04X}<->0x{:04X} {:.2}m rssi={:.1}dBm",
                r.node_a_id, r.node_b_id, r.distance_m, r.rssi_dbm
            ),
            DeviceMessage::Unrecognized(Some(kind)) => write!(f, "unrecognized event '{}'", kind),
            DeviceMessage::Unrecognized(None) => write!(f, "event without kind"),
        }
    }
}

/// Decodes device events into typed responses.
///
/// A payload with the right kind but missing or mistyped fields is treated
/// exactly like an unknown event: it is not a response.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageParser;

impl MessageParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, event: &Event) -> DeviceMessage {
        match event.kind() {
            Some(PING_RESPONSE_EVENT) => decode(event).map(DeviceMessage::Ping),
            Some(RANGE_REPORT_EVENT) | Some(RANGE_FINAL_EVENT) => decode(event).map(DeviceMessage::Range),
            _ => None,
        }
        .unwrap_or_else(|| DeviceMessage::Unrecognized(event.kind().map(str::to_string)))
    }

    pub fn parse_ping(&self, event: &Event) -> Option<PingSample> {
        match self.parse(event) {
            DeviceMessage::Ping(sample) => Some(sample),
            _ => None,
        }
    }

    pub fn parse_range(&self, event: &Event) -> Option<RangeSample> {
        match self.parse(event) {
            DeviceMessage::Range(sample) => Some(sample),
            _ => None,
        }
    }
}

fn decode<T: DeserializeOwned>(event: &Event) -> Option<T> {
    match T::deserialize(&event.payload) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, payload = %event.payload, "malformed response payload");
            None
        }
    }
}
