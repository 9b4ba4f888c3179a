//! Communication error types

use thiserror::Error;

/// Failures of the serial link itself.
///
/// A missing response is not an error: transports report it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CommError {
    /// The device could not be opened
    #[error("failed to open {port}: {reason}")]
    ConnectionError { port: String, reason: String },
    /// Operation attempted without an open connection, or the reader has stopped
    #[error("transport is not connected")]
    NotConnected,
    /// Invalid transport configuration
    #[error("configuration error: invalid {parameter} = {value}")]
    ConfigurationError { parameter: String, value: String },
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Result type for communication operations
pub type CommResult<T> = Result<T, CommError>;

impl CommError {
    /// Errors that end the session; anything else only loses the current exchange
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CommError::ConnectionError { .. } | CommError::NotConnected | CommError::ConfigurationError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CommError::NotConnected.is_fatal());
        assert!(CommError::ConnectionError {
            port: "/dev/ttyUSB0".to_string(),
            reason: "busy".to_string(),
        }
        .is_fatal());
        let io = CommError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(!io.is_fatal());
        assert!(io.to_string().contains("gone"));
    }
}
