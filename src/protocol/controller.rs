//! Command/response correlation over a [`LineTransport`]
//!
//! Correlation is positional: whatever event arrives first after a command is
//! sent is taken as that command's response. This is only sound while a
//! single command is in flight, so every exchange holds the controller's
//! in-flight lock for the whole send-and-wait.
//!
//! Known limitation: a reply that arrives after its command timed out stays
//! queued and is read as the response to the next command. Callers that want
//! to bound this call [`UwbController::drain_stale`] between batches.

use crate::core::constants::DEFAULT_RESPONSE_TIMEOUT_MS;
use crate::core::NodeId;
use crate::hardware::{CommResult, LineTransport};
use crate::processing::parser::{DeviceMessage, MessageParser, PingSample, RangeSample};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

/// `ping <node_id>`
pub fn format_ping(node_id: u16) -> String {
    format!("ping {}", node_id)
}

/// `trigger <initiator_id> <responder_id>`
pub fn format_trigger(initiator_id: u16, responder_id: u16) -> String {
    format!("trigger {} {}", initiator_id, responder_id)
}

/// Issues ranging commands and waits for their responses.
///
/// Borrows the transport; the connection stays owned by whoever opened it.
pub struct UwbController<'a, T: LineTransport + ?Sized> {
    transport: &'a T,
    parser: MessageParser,
    timeout: Duration,
    in_flight: Mutex<()>,
}

impl<'a, T: LineTransport + ?Sized> UwbController<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            parser: MessageParser::new(),
            timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            in_flight: Mutex::new(()),
        }
    }

    /// Set the default response timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query a node's health using the default timeout
    pub fn ping(&self, node_id: u16) -> CommResult<Option<PingSample>> {
        self.ping_within(node_id, self.timeout)
    }

    /// Query a node's health. Ok(None) means no usable response in time.
    pub fn ping_within(&self, node_id: u16, timeout: Duration) -> CommResult<Option<PingSample>> {
        let message = self.exchange(&format_ping(node_id), timeout)?;
        Ok(match message {
            Some(DeviceMessage::Ping(sample)) => Some(sample),
            Some(other) => {
                debug!(node = %NodeId(node_id), response = %other, "ping answered with unexpected event");
                None
            }
            None => {
                debug!(node = %NodeId(node_id), "ping timeout");
                None
            }
        })
    }

    /// Range between two nodes using the default timeout
    pub fn trigger(&self, initiator_id: u16, responder_id: u16) -> CommResult<Option<RangeSample>> {
        self.trigger_within(initiator_id, responder_id, self.timeout)
    }

    /// Ask `initiator_id` to range against `responder_id`.
    /// Ok(None) means no usable response in time.
    pub fn trigger_within(
        &self,
        initiator_id: u16,
        responder_id: u16,
        timeout: Duration,
    ) -> CommResult<Option<RangeSample>> {
        let message = self.exchange(&format_trigger(initiator_id, responder_id), timeout)?;
        Ok(match message {
            Some(DeviceMessage::Range(sample)) => Some(sample),
            Some(other) => {
                debug!(
                    initiator = %NodeId(initiator_id),
                    responder = %NodeId(responder_id),
                    response = %other,
                    "trigger answered with unexpected event"
                );
                None
            }
            None => {
                debug!(initiator = %NodeId(initiator_id), responder = %NodeId(responder_id), "range timeout");
                None
            }
        })
    }

    /// Ping each node in order; one entry per node, `None` where it timed out
    pub fn ping_multiple(&self, node_ids: &[u16]) -> CommResult<Vec<Option<PingSample>>> {
        node_ids.iter().map(|&id| self.ping(id)).collect()
    }

    /// Range `initiator_id` against each responder in order
    pub fn trigger_multiple(
        &self,
        initiator_id: u16,
        responder_ids: &[u16],
    ) -> CommResult<Vec<Option<RangeSample>>> {
        responder_ids
            .iter()
            .map(|&responder| self.trigger(initiator_id, responder))
            .collect()
    }

    /// Drop events that arrived while no command was waiting
    pub fn drain_stale(&self) -> usize {
        let _guard = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let dropped = self.transport.drain_events();
        if dropped > 0 {
            debug!(dropped, "discarded unsolicited events");
        }
        dropped
    }

    fn exchange(&self, command: &str, timeout: Duration) -> CommResult<Option<DeviceMessage>> {
        let _guard = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        self.transport.send_line(command)?;
        trace!(command, "sent");

        let event = self.transport.try_take_event(timeout)?;
        Ok(event.map(|event| self.parser.parse(&event)))
    }
}
