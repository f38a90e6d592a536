//! Relay HTTP surface

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;

use lorafog_core::WireFormat;

use super::{RelayCore, RelayStats};
use crate::error::RadioError;

/// Create the relay router
pub fn router(core: Arc<RelayCore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/command", post(command))
        .with_state(core)
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for RadioError {
    fn into_response(self) -> Response {
        let status = match &self {
            RadioError::Decode(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = self.error_code(), message = %self, "Relay API error");
        } else {
            tracing::debug!(error = self.error_code(), message = %self, "Relay API client error");
        }

        let body = Json(ErrorResponse {
            error: self.error_code(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Content-type derived format hint for a request body
fn format_hint(headers: &HeaderMap) -> Option<WireFormat> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(WireFormat::from_content_type)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct RelayStatus {
    gateway_id: String,
    headless: bool,
    #[serde(flatten)]
    stats: RelayStats,
}

async fn stats(State(core): State<Arc<RelayCore>>) -> Json<RelayStatus> {
    Json(RelayStatus {
        gateway_id: core.id().to_string(),
        headless: core.is_headless(),
        stats: core.stats(),
    })
}

/// Accept a control command and write it to the radio link.
///
/// 202 once written, 400 for an undecodable body, 500 when the device write
/// fails or no device is attached.
async fn command(
    State(core): State<Arc<RelayCore>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, RadioError> {
    let vehicle_id = core.dispatch_command(&body, format_hint(&headers)).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "vehicle_id": vehicle_id })),
    ))
}
