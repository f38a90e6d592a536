//! REST API endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use lorafog_core::{Registration, WireFormat};

use crate::error::HubError;
use crate::registry::VehicleEntry;
use crate::service::{HubService, HubStats, Ingested};

/// Content-type derived format hint for a request body
fn format_hint(headers: &HeaderMap) -> Option<WireFormat> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(WireFormat::from_content_type)
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_stats(State(service): State<Arc<HubService>>) -> Json<HubStats> {
    Json(service.stats())
}

/// List every known vehicle
pub async fn list_vehicles(State(service): State<Arc<HubService>>) -> Json<Vec<VehicleEntry>> {
    Json(service.registry().list())
}

/// Get a specific vehicle
pub async fn get_vehicle(
    State(service): State<Arc<HubService>>,
    Path(id): Path<String>,
) -> Result<Json<VehicleEntry>, HubError> {
    service
        .registry()
        .get(&id)
        .map(Json)
        .ok_or(HubError::NoRoute { vehicle_id: id })
}

/// Relay self-registration
pub async fn register(
    State(service): State<Arc<HubService>>,
    body: String,
) -> Result<impl IntoResponse, HubError> {
    let registration: Registration = serde_json::from_str(&body)
        .map_err(|e| HubError::InvalidRegistration(e.to_string()))?;
    service.register(&registration)?;
    Ok(Json(json!({
        "status": "registered",
        "gateway_id": registration.gateway_id,
        "vehicles": registration.vehicles.len(),
    })))
}

/// Telemetry in either wire format
pub async fn ingest(
    State(service): State<Arc<HubService>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Ingested>, HubError> {
    Ok(Json(service.ingest(&body, format_hint(&headers))?))
}

/// Route a control command to the relay serving its vehicle
pub async fn control(
    State(service): State<Arc<HubService>>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, HubError> {
    let routed = service.route_control(&body, format_hint(&headers))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "vehicle_id": routed.vehicle_id,
            "relay_url": routed.relay_url,
        })),
    ))
}
