//! Mock transceiver for testing and development
//!
//! Replays scripted device output. Replies can be queued up front, attached
//! to a specific command line, or produced by a responder closure that sees
//! every command sent.

use crate::hardware::framer::{FramedLine, LineFramer};
use crate::hardware::{encode_line, CommError, CommResult, Event, LineTransport};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn FnMut(&str) -> Option<Value> + Send>;

#[derive(Default)]
struct MockState {
    queue: VecDeque<Event>,
    scripted: HashMap<String, VecDeque<Value>>,
    responder: Option<Responder>,
    sent: Vec<String>,
    framer: LineFramer,
    diagnostics: Vec<String>,
    connected: bool,
    /// Sends left before an injected failure, and whether it drops the link
    fail_after: Option<(usize, bool)>,
}

/// In-memory [`LineTransport`]
pub struct MockTransceiver {
    state: Mutex<MockState>,
}

impl Default for MockTransceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransceiver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                connected: true,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an event as if the device had sent it unprompted
    pub fn push_event(&self, payload: Value) {
        self.state().queue.push_back(Event::new(payload));
    }

    /// Feed raw device bytes through the same framing the serial reader uses
    pub fn push_bytes(&self, bytes: &[u8]) {
        let mut state = self.state();
        for line in state.framer.push(bytes) {
            match line {
                FramedLine::Event(event) => state.queue.push_back(event),
                FramedLine::Diagnostic(text) => state.diagnostics.push(text),
            }
        }
    }

    /// Reply with `payload` the next time exactly `command` is sent
    pub fn respond_to(&self, command: &str, payload: Value) {
        self.state()
            .scripted
            .entry(command.to_string())
            .or_default()
            .push_back(payload);
    }

    /// Compute replies for commands that have no scripted reply
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&str) -> Option<Value> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }

    /// Every line sent so far, without terminators
    pub fn sent_lines(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Lines that were framed as diagnostic output
    pub fn diagnostics(&self) -> Vec<String> {
        self.state().diagnostics.clone()
    }

    /// Simulate connection loss
    pub fn disconnect(&self) {
        self.state().connected = false;
    }

    pub fn reconnect(&self) {
        self.state().connected = true;
    }

    /// Let `sends` more lines through, then fail the next one. A fatal
    /// failure drops the connection; otherwise only that write fails.
    pub fn fail_after(&self, sends: usize, fatal: bool) {
        self.state().fail_after = Some((sends, fatal));
    }
}

impl LineTransport for MockTransceiver {
    fn send_line(&self, text: &str) -> CommResult<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(CommError::NotConnected);
        }
        if let Some((remaining, fatal)) = state.fail_after {
            if remaining > 0 {
                state.fail_after = Some((remaining - 1, fatal));
            } else {
                state.fail_after = None;
                if fatal {
                    state.connected = false;
                    return Err(CommError::NotConnected);
                }
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed").into());
            }
        }

        let encoded = encode_line(text);
        let line = String::from_utf8_lossy(&encoded[..encoded.len() - 1]).into_owned();

        let scripted = state.scripted.get_mut(&line).and_then(VecDeque::pop_front);
        let reply = match scripted {
            Some(reply) => Some(reply),
            None => state.responder.as_mut().and_then(|respond| respond(&line)),
        };
        if let Some(payload) = reply {
            state.queue.push_back(Event::new(payload));
        }
        state.sent.push(line);
        Ok(())
    }

    fn try_take_event(&self, _timeout: Duration) -> CommResult<Option<Event>> {
        let mut state = self.state();
        match state.queue.pop_front() {
            Some(event) => Ok(Some(event)),
            None if !state.connected => Err(CommError::NotConnected),
            None => Ok(None),
        }
    }

    fn pending_events(&self) -> usize {
        self.state().queue.len()
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_are_fifo() {
        let mock = MockTransceiver::new();
        mock.push_event(json!({"event": "a"}));
        mock.push_event(json!({"event": "b"}));
        assert_eq!(mock.pending_events(), 2);

        let first = mock.try_take_event(Duration::ZERO).unwrap().unwrap();
        let second = mock.try_take_event(Duration::ZERO).unwrap().unwrap();
        assert_eq!(first.kind(), Some("a"));
        assert_eq!(second.kind(), Some("b"));
        assert!(mock.try_take_event(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_scripted_reply_and_sent_lines() {
        let mock = MockTransceiver::new();
        mock.respond_to("ping 5", json!({"event": "ping_resp"}));

        mock.send_line("ping 4").unwrap();
        assert_eq!(mock.pending_events(), 0);
        mock.send_line("ping\n 5").unwrap();
        assert_eq!(mock.pending_events(), 1);
        assert_eq!(mock.sent_lines(), vec!["ping 4".to_string(), "ping 5".to_string()]);
    }

    #[test]
    fn test_responder() {
        let mock = MockTransceiver::new();
        mock.set_responder(|line| line.starts_with("trigger").then(|| json!({"event": "range_final"})));
        mock.send_line("ping 1").unwrap();
        mock.send_line("trigger 1 2").unwrap();
        assert_eq!(mock.pending_events(), 1);
    }

    #[test]
    fn test_raw_bytes_are_framed() {
        let mock = MockTransceiver::new();
        mock.push_bytes(b"boot ok\n{\"event\":\"ping_resp\"");
        assert_eq!(mock.pending_events(), 0);
        mock.push_bytes(b"}\n");
        assert_eq!(mock.pending_events(), 1);
        assert_eq!(mock.diagnostics(), vec!["boot ok".to_string()]);
        assert_eq!(mock.drain_events(), 1);
    }

    #[test]
    fn test_connection_simulation() {
        let mock = MockTransceiver::new();
        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(matches!(mock.send_line("ping 0"), Err(CommError::NotConnected)));
        assert!(mock.try_take_event(Duration::ZERO).is_err());

        mock.reconnect();
        assert!(mock.try_take_event(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_injected_failures() {
        let mock = MockTransceiver::new();
        mock.fail_after(1, false);
        mock.send_line("ping 0").unwrap();
        let error = mock.send_line("ping 1").unwrap_err();
        assert!(!error.is_fatal());
        assert!(mock.is_connected());
        mock.send_line("ping 2").unwrap();

        mock.fail_after(0, true);
        assert!(mock.send_line("ping 3").unwrap_err().is_fatal());
        assert!(!mock.is_connected());
        assert_eq!(mock.sent_lines(), vec!["ping 0".to_string(), "ping 2".to_string()]);
    }
}
