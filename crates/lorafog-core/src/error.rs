//! Error types shared across the LoraFog crates
//!
//! Decode failures are kept apart from the rest so callers can treat a bad
//! line as "drop and continue" without inspecting error strings.

use thiserror::Error;

use crate::codec::WireFormat;

/// Failure to turn a wire line into a record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Delimited line split into the wrong number of fields
    #[error("expected {expected} fields, got {actual}")]
    FieldCount {
        /// Fields required by the format
        expected: usize,
        /// Fields present in the line
        actual: usize,
    },

    /// A field did not parse as the expected type
    #[error("invalid value for field {field}: {value:?}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw text that failed to parse
        value: String,
    },

    /// Record decoded but its vehicle identifier is empty
    #[error("missing vehicle identifier")]
    MissingIdentifier,

    /// Vehicle identifier cannot be carried by every wire format
    #[error("invalid vehicle identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Structurally invalid structured document
    #[error("malformed structured record: {0}")]
    Malformed(String),

    /// Every format in a fallback attempt failed
    #[error("no wire format matched ({})", describe_attempts(.attempts))]
    NoFormatMatched {
        /// Each attempted format with the reason it failed
        attempts: Vec<(WireFormat, String)>,
    },
}

fn describe_attempts(attempts: &[(WireFormat, String)]) -> String {
    attempts
        .iter()
        .map(|(format, reason)| format!("{format}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DecodeError {
    /// Get an error code for logging and HTTP bodies
    pub fn error_code(&self) -> &'static str {
        match self {
            DecodeError::FieldCount { .. } => "FIELD_COUNT",
            DecodeError::InvalidField { .. } => "INVALID_FIELD",
            DecodeError::MissingIdentifier => "MISSING_IDENTIFIER",
            DecodeError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            DecodeError::Malformed(_) => "MALFORMED",
            DecodeError::NoFormatMatched { .. } => "NO_FORMAT_MATCHED",
        }
    }
}

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Line could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Record could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Background task did not finish within its grace period
    #[error("Task {task} did not stop within {duration_ms}ms")]
    ShutdownTimeout {
        /// Task name
        task: String,
        /// Grace period in milliseconds
        duration_ms: u64,
    },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Check if retrying the operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Io(_) | CoreError::ShutdownTimeout { .. })
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Decode(e) => e.error_code(),
            CoreError::Encode(_) => "ENCODE_ERROR",
            CoreError::InvalidConfig(_) => "INVALID_CONFIG",
            CoreError::ConfigParse(_) => "CONFIG_PARSE",
            CoreError::ShutdownTimeout { .. } => "SHUTDOWN_TIMEOUT",
            CoreError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Encode(err.to_string())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
