//! Hub service: telemetry ingestion, control routing and registration
//!
//! Both outbound paths (secondary collector and relay `/command`) run on
//! detached tasks. Their failures are counted and logged, never reported
//! to the caller, and never retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{debug, info, warn};

use lorafog_core::{
    decode_control_any, decode_telemetry_any, Registration, ServerConfig, StopListener,
    StopSignal, TelemetryRecord, WireFormat,
};

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::error::{HubError, Result};
use crate::registry::Registry;

/// Timeout for each outbound request
pub const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Hub statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub telemetry_ingested: u64,
    pub decode_failures: u64,
    pub broadcasts: u64,
    pub observers_connected: usize,
    pub observers_removed: u64,
    pub control_routed: u64,
    pub routing_misses: u64,
    pub forward_failures: u64,
    pub vehicles_routable: usize,
    pub uptime_seconds: u64,
}

#[derive(Debug, Default)]
struct HubCounters {
    telemetry_ingested: AtomicU64,
    decode_failures: AtomicU64,
    broadcasts: AtomicU64,
    control_routed: AtomicU64,
    routing_misses: AtomicU64,
    forward_failures: AtomicU64,
}

/// Result of one accepted telemetry line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingested {
    pub vehicle_id: String,
    pub received_as: WireFormat,
    pub observers: usize,
}

/// Result of one dispatched control command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Routed {
    pub vehicle_id: String,
    pub relay_url: String,
}

/// Hub state shared by every handler
pub struct HubService {
    broadcast_format: WireFormat,
    relay_format: WireFormat,
    app_addr: Option<String>,
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    client: reqwest::Client,
    counters: Arc<HubCounters>,
    closing: StopSignal,
    start_time: Instant,
}

impl HubService {
    /// Build the service around an externally owned registry and broadcaster
    pub fn new(
        config: &ServerConfig,
        registry: Arc<Registry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .connect_timeout(Duration::from_secs(2))
            .build()?;

        for entry in &config.gateway_registry {
            registry.register_gateway(&Registration {
                gateway_id: entry.id.clone(),
                url: entry.url.trim_end_matches('/').to_string(),
                vehicles: entry.vehicles.clone(),
            });
        }

        Ok(Self {
            broadcast_format: config.broadcast_format,
            relay_format: config.relay_format,
            app_addr: config
                .app_addr
                .as_deref()
                .map(|addr| addr.trim_end_matches('/').to_string())
                .filter(|addr| !addr.is_empty()),
            registry,
            broadcaster,
            client,
            counters: Arc::new(HubCounters::default()),
            closing: StopSignal::new(),
            start_time: Instant::now(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Listener fired when the hub shuts down; observer sessions end on it
    pub fn closing(&self) -> StopListener {
        self.closing.subscribe()
    }

    pub(crate) fn close(&self) {
        self.closing.trigger();
    }

    /// Validate and apply a relay self-registration
    pub fn register(&self, registration: &Registration) -> Result<()> {
        if registration.gateway_id.trim().is_empty() || registration.url.trim().is_empty() {
            return Err(HubError::InvalidRegistration(
                "gateway_id and url required".to_string(),
            ));
        }
        let registration = Registration {
            url: registration.url.trim_end_matches('/').to_string(),
            ..registration.clone()
        };
        self.registry.register_gateway(&registration);
        Ok(())
    }

    /// Decode one telemetry line, fan it out and forward it to the
    /// secondary collector.
    pub fn ingest(&self, body: &str, hint: Option<WireFormat>) -> Result<Ingested> {
        let (record, received_as) = decode_telemetry_any(body, hint).map_err(|e| {
            self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Rejected telemetry");
            e
        })?;
        self.counters
            .telemetry_ingested
            .fetch_add(1, Ordering::Relaxed);
        if !self.registry.touch(&record.vehicle_id) {
            debug!(vehicle_id = %record.vehicle_id, "Telemetry from unregistered vehicle");
        }

        let line = self.broadcast_format.encode_telemetry(&record)?;
        let report = self.fan_out(&line);
        debug!(
            vehicle_id = %record.vehicle_id,
            received_as = %received_as,
            observers = report.delivered,
            "Telemetry ingested"
        );

        self.forward_to_collector(&record);

        Ok(Ingested {
            vehicle_id: record.vehicle_id,
            received_as,
            observers: report.delivered,
        })
    }

    fn fan_out(&self, line: &str) -> BroadcastReport {
        let report = self.broadcaster.broadcast(line);
        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        report
    }

    fn forward_to_collector(&self, record: &TelemetryRecord) {
        let Some(app_addr) = &self.app_addr else {
            return;
        };
        match WireFormat::Structured.encode_telemetry(record) {
            Ok(body) => self.spawn_post(
                format!("{app_addr}/api/telemetry"),
                WireFormat::Structured,
                body,
            ),
            Err(e) => warn!(error = %e, "Failed to encode telemetry for collector"),
        }
    }

    /// Decode a control command, look up its relay and dispatch it.
    ///
    /// Returns as soon as the POST is spawned; a missing route is
    /// [`HubError::NoRoute`].
    pub fn route_control(&self, body: &str, hint: Option<WireFormat>) -> Result<Routed> {
        let (command, _) = decode_control_any(body, hint)?;

        let Some(relay_url) = self.registry.lookup(&command.vehicle_id) else {
            self.counters.routing_misses.fetch_add(1, Ordering::Relaxed);
            warn!(vehicle_id = %command.vehicle_id, "No relay registered for vehicle");
            return Err(HubError::NoRoute {
                vehicle_id: command.vehicle_id,
            });
        };

        let line = self.relay_format.encode_control(&command)?;
        self.spawn_post(format!("{relay_url}/command"), self.relay_format, line);
        self.counters.control_routed.fetch_add(1, Ordering::Relaxed);
        info!(vehicle_id = %command.vehicle_id, relay = %relay_url, "Control dispatched");

        Ok(Routed {
            vehicle_id: command.vehicle_id,
            relay_url,
        })
    }

    fn spawn_post(&self, url: String, format: WireFormat, body: String) {
        let client = self.client.clone();
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .header(CONTENT_TYPE, format.content_type())
                .body(body)
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match result {
                Ok(_) => debug!(url = %url, "Forwarded"),
                Err(e) => {
                    counters.forward_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(url = %url, error = %e, "Forward failed");
                }
            }
        });
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            telemetry_ingested: self.counters.telemetry_ingested.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            observers_connected: self.broadcaster.observer_count(),
            observers_removed: self.broadcaster.removed_total(),
            control_routed: self.counters.control_routed.load(Ordering::Relaxed),
            routing_misses: self.counters.routing_misses.load(Ordering::Relaxed),
            forward_failures: self.counters.forward_failures.load(Ordering::Relaxed),
            vehicles_routable: self.registry.routable_count(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorafog_core::RegistryConfig;

    fn service(config: &ServerConfig) -> HubService {
        HubService::new(
            config,
            Arc::new(Registry::new()),
            Arc::new(Broadcaster::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_static_registry_entries_loaded() {
        let mut config = ServerConfig::default();
        config.gateway_registry.push(RegistryConfig {
            id: "gw1".into(),
            url: "http://r1/".into(),
            vehicles: vec!["V1".into()],
        });
        let hub = service(&config);
        assert_eq!(hub.registry().lookup("V1").as_deref(), Some("http://r1"));
    }

    #[test]
    fn test_register_requires_id_and_url() {
        let hub = service(&ServerConfig::default());
        let err = hub
            .register(&Registration {
                gateway_id: "".into(),
                url: "http://r1".into(),
                vehicles: vec!["V1".into()],
            })
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidRegistration(_)));
        assert_eq!(hub.registry().lookup("V1"), None);
    }

    #[tokio::test]
    async fn test_ingest_reencodes_for_observers() {
        let hub = service(&ServerConfig::default());
        hub.registry().register("00001", "http://r1");
        let (_id, mut rx) = hub.broadcaster().subscribe();

        let ingested = hub
            .ingest(
                r#"{"vehicle_id":"00001","lat":21.0285,"lon":105.8048,"head_current":10,"head_target":10,"left_speed":12,"right_speed":12,"pid":1}"#,
                None,
            )
            .unwrap();
        assert_eq!(ingested.received_as, WireFormat::Structured);
        assert_eq!(ingested.observers, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            "00001,21.028500,105.804800,10.00,10.00,12.00,12.00,1.00"
        );
        assert!(hub.registry().list()[0].last_seen.is_some());
    }

    #[tokio::test]
    async fn test_ingest_rejects_garbage() {
        let hub = service(&ServerConfig::default());
        let err = hub.ingest("garbage", None).unwrap_err();
        assert!(matches!(err, HubError::Decode(_)));
        assert_eq!(hub.stats().decode_failures, 1);
        assert_eq!(hub.stats().telemetry_ingested, 0);
    }

    #[tokio::test]
    async fn test_ingest_from_unknown_vehicles_leaves_registry_alone() {
        let hub = service(&ServerConfig::default());
        for i in 0..50 {
            let line = format!("spoof-{i},1.0,2.0,0.00,0.00,0.00,0.00,0.00");
            hub.ingest(&line, None).unwrap();
        }
        assert!(hub.registry().list().is_empty());
        assert_eq!(hub.stats().telemetry_ingested, 50);
    }

    #[tokio::test]
    async fn test_ingest_refuses_identifier_with_delimiter() {
        let hub = service(&ServerConfig::default());
        let (_id, mut rx) = hub.broadcaster().subscribe();

        let err = hub
            .ingest(r#"{"vehicle_id":"V1,X","lat":1.0}"#, Some(WireFormat::Structured))
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.stats().broadcasts, 0);
        assert_eq!(hub.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_route_control_miss() {
        let hub = service(&ServerConfig::default());
        let err = hub
            .route_control("V9,1,10.00,0.000000,0.000000,1.00,0.00,0.00", None)
            .unwrap_err();
        assert!(matches!(err, HubError::NoRoute { ref vehicle_id } if vehicle_id == "V9"));
        assert_eq!(hub.stats().routing_misses, 1);
    }

    #[tokio::test]
    async fn test_route_control_hit_returns_immediately() {
        let hub = service(&ServerConfig::default());
        // Nothing listens here; the failure only shows up in the counters
        hub.registry().register("V1", "http://127.0.0.1:9");
        let routed = hub
            .route_control("V1,1,10.00,0.000000,0.000000,1.00,0.00,0.00", None)
            .unwrap();
        assert_eq!(routed.relay_url, "http://127.0.0.1:9");
        assert_eq!(hub.stats().control_routed, 1);
    }
}
