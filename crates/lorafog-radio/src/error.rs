//! Error types for radio links, vehicle agents and gateway relays

use lorafog_core::{CoreError, DecodeError};
use thiserror::Error;

/// Main error type for the radio side
#[derive(Error, Debug)]
pub enum RadioError {
    // ===== Link Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Link could not be opened
    #[error("Failed to open link {port}: {reason}")]
    PortOpenFailed {
        /// Port path or link name
        port: String,
        /// Failure reason
        reason: String,
    },

    /// Link read error
    #[error("Link read error: {0}")]
    ReadError(String),

    /// Link write error
    #[error("Link write error: {0}")]
    WriteError(String),

    /// Link is closed or the peer went away
    #[error("Link disconnected")]
    Disconnected,

    /// No complete line arrived in time
    #[error("Read timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// A framed line was unusable (too long or not UTF-8)
    #[error("Invalid line: {0}")]
    InvalidLine(String),

    // ===== Relay / Agent Errors =====
    /// Relay has no device attached
    #[error("No device attached (headless)")]
    Headless,

    /// Lifecycle method called in the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// HTTP request to the hub failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// HTTP server could not start
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed {
        /// Requested address
        addr: String,
        /// Failure reason
        reason: String,
    },

    /// Wire line could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error from the shared core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RadioError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RadioError::Timeout { .. }
                | RadioError::Disconnected
                | RadioError::ReadError(_)
                | RadioError::WriteError(_)
                | RadioError::InvalidLine(_)
                | RadioError::Http(_)
        )
    }

    /// Check if this is a read timeout rather than a real failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, RadioError::Timeout { .. })
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            RadioError::PortNotFound(_) => "PORT_NOT_FOUND",
            RadioError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            RadioError::ReadError(_) => "READ_ERROR",
            RadioError::WriteError(_) => "WRITE_ERROR",
            RadioError::Disconnected => "DISCONNECTED",
            RadioError::Timeout { .. } => "TIMEOUT",
            RadioError::InvalidLine(_) => "INVALID_LINE",
            RadioError::Headless => "HEADLESS",
            RadioError::InvalidState(_) => "INVALID_STATE",
            RadioError::Http(_) => "HTTP_ERROR",
            RadioError::BindFailed { .. } => "BIND_FAILED",
            RadioError::Decode(e) => e.error_code(),
            RadioError::Core(e) => e.error_code(),
            RadioError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<reqwest::Error> for RadioError {
    fn from(err: reqwest::Error) -> Self {
        RadioError::Http(err.to_string())
    }
}

/// Result type alias for radio operations
pub type Result<T> = std::result::Result<T, RadioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = RadioError::PortNotFound("/dev/ttyUSB0".to_string());
        assert_eq!(err.error_code(), "PORT_NOT_FOUND");
        let err = RadioError::from(DecodeError::MissingIdentifier);
        assert_eq!(err.error_code(), "MISSING_IDENTIFIER");
    }

    #[test]
    fn test_is_retriable() {
        assert!(RadioError::Disconnected.is_retriable());
        assert!(RadioError::Timeout { duration_ms: 200 }.is_retriable());
        assert!(!RadioError::Headless.is_retriable());
    }

    #[test]
    fn test_is_timeout() {
        assert!(RadioError::Timeout { duration_ms: 200 }.is_timeout());
        assert!(!RadioError::ReadError("eof".into()).is_timeout());
    }
}
