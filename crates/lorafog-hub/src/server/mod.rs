//! Hub HTTP server
//!
//! REST endpoints for relays and operators plus the `/ws` observer channel.

pub mod rest;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use lorafog_core::{join_with_timeout, StopSignal};

use crate::error::{HubError, Result};
use crate::service::HubService;

/// Grace period for in-flight requests on stop
pub const HTTP_GRACE: Duration = Duration::from_secs(3);

/// Create the hub router
pub fn create_router(service: Arc<HubService>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(rest::health))
        // Relay registration
        .route("/register", post(rest::register))
        // Telemetry ingestion
        .route("/api/telemetry", post(rest::ingest))
        .route("/ingest", post(rest::ingest))
        // Control routing
        .route("/control", post(rest::control))
        // Observer channel
        .route("/ws", get(websocket::ws_handler))
        // Inspection
        .route("/api/stats", get(rest::get_stats))
        .route("/api/vehicles", get(rest::list_vehicles))
        .route("/api/vehicles/:id", get(rest::get_vehicle))
        // CORS for dashboards
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(service)
}

/// Running hub HTTP server
pub struct HubServer {
    service: Arc<HubService>,
    bind_addr: String,
    stop: StopSignal,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl HubServer {
    pub fn new(service: Arc<HubService>, bind_addr: impl Into<String>) -> Self {
        Self {
            service,
            bind_addr: bind_addr.into(),
            stop: StopSignal::new(),
            local_addr: None,
            task: None,
        }
    }

    pub fn service(&self) -> &Arc<HubService> {
        &self.service
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Bind the configured address and start serving
    pub async fn start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| HubError::BindFailed {
                addr: self.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        self.start_with_listener(listener)
    }

    /// Serve on an already bound listener
    pub fn start_with_listener(&mut self, listener: TcpListener) -> Result<()> {
        if self.task.is_some() || self.stop.is_triggered() {
            return Err(HubError::BindFailed {
                addr: self.bind_addr.clone(),
                reason: "hub already started".to_string(),
            });
        }

        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let app = create_router(Arc::clone(&self.service));
        let mut stop = self.stop.subscribe();
        self.task = Some(tokio::spawn(async move {
            let shutdown = async move { stop.stopped().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "Hub HTTP server failed");
            }
        }));

        info!(addr = %local_addr, "Hub listening");
        Ok(())
    }

    /// Stop serving and disconnect observers. Idempotent.
    pub async fn stop(&mut self) {
        self.stop.trigger();
        self.service.close();
        if let Some(task) = self.task.take() {
            let _ = join_with_timeout("hub-http", task, HTTP_GRACE).await;
            info!(stats = ?self.service.stats(), "Hub stopped");
        }
    }
}

impl Drop for HubServer {
    fn drop(&mut self) {
        self.stop.trigger();
        self.service.close();
    }
}
