//! Line transport trait and serial link configuration

use crate::core::constants::{DEFAULT_BAUD_RATE, DEFAULT_QUEUE_HIGH_WATER_MARK, DEFAULT_READ_TIMEOUT_MS};
use crate::hardware::{CommError, CommResult, Event};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Duplex line-oriented link to the ranging bridge.
///
/// Methods take `&self` so the protocol layer can borrow a transport that a
/// background reader is filling concurrently.
pub trait LineTransport {
    /// Write one command line.
    /// Embedded line terminators are stripped and exactly one `\n` is appended.
    /// Does not wait for any response.
    fn send_line(&self, text: &str) -> CommResult<()>;

    /// Take the next event, waiting at most `timeout`.
    /// Returns Ok(None) when nothing arrived in time.
    /// Events come out in arrival order.
    fn try_take_event(&self, timeout: Duration) -> CommResult<Option<Event>>;

    /// Discard every event currently queued and return how many were dropped
    fn drain_events(&self) -> usize {
        let mut dropped = 0;
        while let Ok(Some(_)) = self.try_take_event(Duration::ZERO) {
            dropped += 1;
        }
        dropped
    }

    /// Number of events waiting to be taken
    fn pending_events(&self) -> usize;

    /// Check if the link is open and its reader is alive
    fn is_connected(&self) -> bool;
}

/// Serial link parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM18`
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout of the background reader (milliseconds)
    pub read_timeout_ms: u64,
    /// Log non-JSON firmware output instead of silently dropping it
    pub log_diagnostics: bool,
    /// Queue length above which a warning is logged
    pub queue_high_water_mark: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            log_diagnostics: false,
            queue_high_water_mark: DEFAULT_QUEUE_HIGH_WATER_MARK,
        }
    }
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> CommResult<()> {
        if self.port.trim().is_empty() {
            return Err(CommError::ConfigurationError {
                parameter: "port".to_string(),
                value: self.port.clone(),
            });
        }
        if self.baud_rate == 0 {
            return Err(CommError::ConfigurationError {
                parameter: "baud_rate".to_string(),
                value: self.baud_rate.to_string(),
            });
        }
        // A zero timeout would turn the reader into a busy loop
        if self.read_timeout_ms == 0 {
            return Err(CommError::ConfigurationError {
                parameter: "read_timeout_ms".to_string(),
                value: self.read_timeout_ms.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = SerialConfig::new("/dev/ttyACM0", 0);
        assert!(matches!(
            config.validate(),
            Err(CommError::ConfigurationError { ref parameter, .. }) if parameter == "baud_rate"
        ));

        config.baud_rate = 115_200;
        config.read_timeout_ms = 0;
        assert!(config.validate().is_err());

        let config = SerialConfig::new("  ", 9600);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SerialConfig = serde_json::from_str(r#"{"port": "COM18"}"#).unwrap();
        assert_eq!(config.port, "COM18");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
    }
}
