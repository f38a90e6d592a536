//! Hub error types and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lorafog_core::{CoreError, DecodeError};
use serde::Serialize;
use thiserror::Error;

/// Main error type for the hub
#[derive(Error, Debug)]
pub enum HubError {
    // ===== Request Errors =====
    /// Telemetry or control body matched no wire format
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Registration body was rejected
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    // ===== Routing Errors =====
    /// No relay is registered for the target vehicle
    #[error("No relay registered for vehicle {vehicle_id}")]
    NoRoute {
        /// Target vehicle identifier
        vehicle_id: String,
    },

    /// Outbound HTTP request failed
    #[error("HTTP error: {0}")]
    Http(String),

    // ===== Server Errors =====
    /// Listener could not be bound
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed {
        /// Requested address
        addr: String,
        /// Failure reason
        reason: String,
    },

    /// Error from the shared core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(self, HubError::Http(_))
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            HubError::Decode(e) => e.error_code(),
            HubError::InvalidRegistration(_) => "INVALID_REGISTRATION",
            HubError::NoRoute { .. } => "NO_ROUTE",
            HubError::Http(_) => "HTTP_ERROR",
            HubError::BindFailed { .. } => "BIND_FAILED",
            HubError::Core(e) => e.error_code(),
            HubError::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP status reported to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::Decode(_) | HubError::InvalidRegistration(_) => StatusCode::BAD_REQUEST,
            HubError::NoRoute { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for HubError {
    fn from(err: reqwest::Error) -> Self {
        HubError::Http(err.to_string())
    }
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = self.error_code(), message = %self, "Hub API error");
        } else {
            tracing::debug!(error = self.error_code(), message = %self, "Hub API client error");
        }

        let body = Json(ErrorResponse {
            error: self.error_code(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;
