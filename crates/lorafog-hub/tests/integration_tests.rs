//! Integration tests for the hub HTTP and WebSocket surface
//!
//! The hub is served on a random local port. A stub relay (and stub
//! collector) records what the hub posts to it. Observers connect with
//! tokio-tungstenite.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{OriginalUri, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use futures::StreamExt;
use lorafog_core::{RegistryConfig, ServerConfig, WireFormat};
use lorafog_hub::{Broadcaster, HubServer, HubService, Registry};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const TELEMETRY_JSON: &str = r#"{"vehicle_id":"00001","lat":21.0285,"lon":105.8048,"head_current":10.0,"head_target":10.0,"left_speed":12.0,"right_speed":12.0,"pid":1.0}"#;
const TELEMETRY_LINE: &str = "00001,21.028500,105.804800,10.00,10.00,12.00,12.00,1.00";

// ============================================================================
// Test infrastructure
// ============================================================================

/// Records (path, content type, body) of every POST it receives
#[derive(Clone, Default)]
struct Recorder {
    requests: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl Recorder {
    fn requests(&self) -> Vec<(String, String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn record(
    State(recorder): State<Recorder>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    recorder
        .requests
        .lock()
        .unwrap()
        .push((uri.path().to_string(), content_type, body));
    StatusCode::ACCEPTED
}

async fn spawn_recorder() -> (String, Recorder) {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/command", post(record))
        .route("/api/telemetry", post(record))
        .with_state(recorder.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), recorder)
}

async fn start_hub(config: ServerConfig) -> (HubServer, String) {
    let service = HubService::new(
        &config,
        Arc::new(Registry::new()),
        Arc::new(Broadcaster::new()),
    )
    .unwrap();
    let mut hub = HubServer::new(Arc::new(service), "127.0.0.1:0");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    hub.start_with_listener(listener).unwrap();
    let url = format!("http://{}", hub.local_addr().unwrap());
    (hub, url)
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ============================================================================
// REST
// ============================================================================

#[tokio::test]
async fn test_health_and_stats() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{url}/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let stats: Value = client
        .get(format!("{url}/api/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["telemetry_ingested"], 0);
    assert_eq!(stats["observers_connected"], 0);

    hub.stop().await;
}

#[tokio::test]
async fn test_register_and_list_vehicles() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/register"))
        .json(&serde_json::json!({
            "gateway_id": "gw1",
            "url": "http://127.0.0.1:9001/",
            "vehicles": ["V1", "V2"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        hub.service().registry().lookup("V1").as_deref(),
        Some("http://127.0.0.1:9001")
    );

    let vehicles: Value = client
        .get(format!("{url}/api/vehicles"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(vehicles.as_array().unwrap().len(), 2);
    assert_eq!(vehicles[0]["vehicle_id"], "V1");
    assert_eq!(vehicles[0]["gateway_id"], "gw1");

    let one: Value = client
        .get(format!("{url}/api/vehicles/V2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one["relay_url"], "http://127.0.0.1:9001");

    let missing = client
        .get(format!("{url}/api/vehicles/V9"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "NO_ROUTE");

    hub.stop().await;
}

#[tokio::test]
async fn test_register_rejects_incomplete_body() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/register"))
        .body(r#"{"gateway_id":"","url":"http://r1","vehicles":["V1"]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "INVALID_REGISTRATION");

    let response = client
        .post(format!("{url}/register"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    hub.stop().await;
}

#[tokio::test]
async fn test_ingest_accepts_both_formats() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/api/telemetry"))
        .header(CONTENT_TYPE, "application/json")
        .body(TELEMETRY_JSON)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["vehicle_id"], "00001");
    assert_eq!(body["received_as"], "structured");

    // Mislabelled content type still decodes through the fallback
    let response = client
        .post(format!("{url}/ingest"))
        .header(CONTENT_TYPE, "application/json")
        .body(TELEMETRY_LINE)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["received_as"], "delimited");

    let response = client
        .post(format!("{url}/api/telemetry"))
        .body("00001,21.0,105.0")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "NO_FORMAT_MATCHED");

    let stats = hub.service().stats();
    assert_eq!(stats.telemetry_ingested, 2);
    assert_eq!(stats.decode_failures, 1);
    assert!(hub.service().registry().list().is_empty());

    hub.stop().await;
}

#[tokio::test]
async fn test_ingest_forwards_to_collector() {
    let (collector_url, collector) = spawn_recorder().await;
    let config = ServerConfig {
        app_addr: Some(collector_url),
        ..ServerConfig::default()
    };
    let (mut hub, url) = start_hub(config).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/telemetry"))
        .body(TELEMETRY_LINE)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(wait_until(|| collector.requests().len() == 1).await);
    let (path, content_type, body) = collector.requests().remove(0);
    assert_eq!(path, "/api/telemetry");
    assert_eq!(content_type, "application/json");
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["vehicle_id"], "00001");

    hub.stop().await;
}

#[tokio::test]
async fn test_collector_failure_is_invisible_to_caller() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("http://{}", unused.local_addr().unwrap());
    drop(unused);

    let config = ServerConfig {
        app_addr: Some(dead_url),
        ..ServerConfig::default()
    };
    let (mut hub, url) = start_hub(config).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/api/telemetry"))
        .body(TELEMETRY_LINE)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let service = Arc::clone(hub.service());
    assert!(wait_until(|| service.stats().forward_failures == 1).await);
    hub.stop().await;
}

// ============================================================================
// Control routing
// ============================================================================

#[tokio::test]
async fn test_control_routed_to_registered_relay() {
    let (relay_url, relay) = spawn_recorder().await;
    let mut config = ServerConfig::default();
    config.gateway_registry.push(RegistryConfig {
        id: "gw1".into(),
        url: relay_url.clone(),
        vehicles: vec!["00001".into()],
    });
    let (mut hub, url) = start_hub(config).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/control"))
        .body("00001,1,15.00,21.030000,105.810000,1.20,0.05,0.30")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["relay_url"], relay_url.as_str());

    assert!(wait_until(|| relay.requests().len() == 1).await);
    let (path, content_type, body) = relay.requests().remove(0);
    assert_eq!(path, "/command");
    assert_eq!(content_type, WireFormat::Structured.content_type());
    let command: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(command["vehicle_id"], "00001");
    assert_eq!(command["mode"], 1);
    assert_eq!(command["speed"], 15.0);

    hub.stop().await;
}

#[tokio::test]
async fn test_control_uses_relay_format() {
    let (relay_url, relay) = spawn_recorder().await;
    let mut config = ServerConfig {
        relay_format: WireFormat::Delimited,
        ..ServerConfig::default()
    };
    config.gateway_registry.push(RegistryConfig {
        id: "gw1".into(),
        url: relay_url,
        vehicles: vec!["00001".into()],
    });
    let (mut hub, url) = start_hub(config).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/control"))
        .header(CONTENT_TYPE, "application/json")
        .body(r#"{"vehicle_id":"00001","mode":2,"speed":10.0,"lat":21.0,"lon":105.0,"kp":1.0,"ki":0.1,"kd":0.01}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert!(wait_until(|| relay.requests().len() == 1).await);
    let (_, content_type, body) = relay.requests().remove(0);
    assert_eq!(content_type, "text/plain");
    assert_eq!(body, "00001,2,10.00,21.000000,105.000000,1.00,0.10,0.01");

    hub.stop().await;
}

#[tokio::test]
async fn test_control_errors() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/control"))
        .body("V9,1,15.00,21.030000,105.810000,1.20,0.05,0.30")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "NO_ROUTE");

    let response = client
        .post(format!("{url}/control"))
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(hub.service().stats().routing_misses, 1);
    hub.stop().await;
}

// ============================================================================
// Observers
// ============================================================================

#[tokio::test]
async fn test_observers_receive_broadcast_format() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let ws_url = url.replace("http://", "ws://") + "/ws";

    let (mut first, _) = connect_async(&ws_url).await.unwrap();
    let (mut second, _) = connect_async(&ws_url).await.unwrap();
    let service = Arc::clone(hub.service());
    assert!(wait_until(|| service.broadcaster().observer_count() == 2).await);

    reqwest::Client::new()
        .post(format!("{url}/api/telemetry"))
        .header(CONTENT_TYPE, "application/json")
        .body(TELEMETRY_JSON)
        .send()
        .await
        .unwrap();

    for observer in [&mut first, &mut second] {
        let msg = tokio::time::timeout(Duration::from_secs(2), observer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msg.into_text().unwrap(), TELEMETRY_LINE);
    }

    hub.stop().await;
}

#[tokio::test]
async fn test_identifier_with_delimiter_is_never_broadcast() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let ws_url = url.replace("http://", "ws://") + "/ws";

    let (mut observer, _) = connect_async(&ws_url).await.unwrap();
    let service = Arc::clone(hub.service());
    assert!(wait_until(|| service.broadcaster().observer_count() == 1).await);

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{url}/api/telemetry"))
        .header(CONTENT_TYPE, "application/json")
        .body(r#"{"vehicle_id":"V1,X","lat":1.0}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    client
        .post(format!("{url}/api/telemetry"))
        .header(CONTENT_TYPE, "application/json")
        .body(TELEMETRY_JSON)
        .send()
        .await
        .unwrap();

    // The first line the observer sees is the valid record
    let msg = tokio::time::timeout(Duration::from_secs(2), observer.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg.into_text().unwrap(), TELEMETRY_LINE);
    assert_eq!(service.stats().broadcasts, 1);

    hub.stop().await;
}

#[tokio::test]
async fn test_disconnected_observer_is_removed() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let ws_url = url.replace("http://", "ws://") + "/ws";

    let (mut live, _) = connect_async(&ws_url).await.unwrap();
    let (gone, _) = connect_async(&ws_url).await.unwrap();
    let service = Arc::clone(hub.service());
    assert!(wait_until(|| service.broadcaster().observer_count() == 2).await);

    drop(gone);
    assert!(wait_until(|| service.broadcaster().observer_count() == 1).await);

    let response = reqwest::Client::new()
        .post(format!("{url}/api/telemetry"))
        .body(TELEMETRY_LINE)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["observers"], 1);

    let msg = tokio::time::timeout(Duration::from_secs(2), live.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg.into_text().unwrap(), TELEMETRY_LINE);

    hub.stop().await;
}

#[tokio::test]
async fn test_stop_closes_observers() {
    let (mut hub, url) = start_hub(ServerConfig::default()).await;
    let ws_url = url.replace("http://", "ws://") + "/ws";

    let (mut observer, _) = connect_async(&ws_url).await.unwrap();
    let service = Arc::clone(hub.service());
    assert!(wait_until(|| service.broadcaster().observer_count() == 1).await);

    tokio::time::timeout(Duration::from_secs(5), hub.stop())
        .await
        .unwrap();
    hub.stop().await;

    let next = tokio::time::timeout(Duration::from_secs(2), observer.next())
        .await
        .unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    assert!(wait_until(|| service.broadcaster().observer_count() == 0).await);
}
