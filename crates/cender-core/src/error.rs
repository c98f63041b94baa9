//! Error handling for Cender
//!
//! Provides error types for every layer of the protocol engine:
//! - Connection errors (opening ports, handshake timeouts)
//! - Transport errors (line-level read/write failures)
//! - Protocol errors (malformed or unexpected board output)
//! - Configuration errors (invalid settings values)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents failures while establishing or holding a connection to a board.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The board did not echo the connect sentinel in time
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// No port is open
    #[error("Board not connected")]
    NotConnected,

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Transport error type
///
/// Raised by the line transport when the serial device misbehaves.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Writing a line failed
    #[error("Failed to write '{line}': {reason}")]
    WriteFailed {
        /// The line that could not be written.
        line: String,
        /// The underlying I/O error.
        reason: String,
    },

    /// Reading from the device failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The underlying I/O error.
        reason: String,
    },

    /// The port has been closed
    #[error("Port closed")]
    PortClosed,
}

/// Protocol error type
///
/// Represents board output or board selections the engine cannot interpret.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Unknown board type selector
    #[error("Unknown board type: {board_type}")]
    UnknownBoard {
        /// The unrecognised selector.
        board_type: String,
    },

    /// A structured report could not be interpreted
    #[error("Malformed report '{line}': {reason}")]
    MalformedReport {
        /// The raw line.
        line: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A required board configuration key is missing
    #[error("Board configuration key '{key}' not available")]
    MissingBoardSetting {
        /// The missing key.
        key: String,
    },
}

/// Configuration error type
///
/// Raised when settings cannot be read, written or validated.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// The settings file could not be read or written
    #[error("Settings file {path}: {reason}")]
    File {
        /// Path of the settings file.
        path: String,
        /// The underlying failure.
        reason: String,
    },

    /// The settings file could not be parsed or rendered
    #[error("Settings format error: {0}")]
    Format(String),

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Dotted name of the offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Main error type for Cender
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError::ConnectionTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a transport error
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err: Error = ConnectionError::ConnectionTimeout { timeout_ms: 10_000 }.into();
        assert!(err.is_timeout());
        assert!(err.is_connection_error());
        assert_eq!(err.to_string(), "Connection timeout after 10000ms");
    }

    #[test]
    fn test_transport_error_display() {
        let err: Error = TransportError::WriteFailed {
            line: "G0 X1".to_string(),
            reason: "broken pipe".to_string(),
        }
        .into();
        assert!(err.is_transport_error());
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "Failed to write 'G0 X1': broken pipe");
    }
}
