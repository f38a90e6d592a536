//! Gateway relay
//!
//! Bridges one radio link, shared by several vehicles, to the hub over HTTP.
//!
//! ```text
//!  radio link ──read──► uplink reader ──push──► DropOldestQueue ──pop──► forwarder
//!       ▲                (decode wire_in,                                  │
//!       │                 membership filter,                         POST (wire_out)
//!       │                 encode wire_out)                                 ▼
//!       └──write── POST /command ◄── hub                          hub /api/telemetry
//!                  (decode structured, then delimited; encode wire_in)
//! ```
//!
//! Delivery to the hub is at-most-once: a failed POST is logged and the
//! record is gone. When the forward queue is full the oldest pending record
//! is evicted.
//!
//! A relay whose device failed to open runs [`DeviceAttachment::Headless`]:
//! the HTTP surface still serves and `/command` answers 500.

mod http;

pub use http::router;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use lorafog_core::{
    decode_control_any, join_with_timeout, GatewayConfig, Registration, StopListener, StopSignal,
    WireFormat,
};

use crate::error::{RadioError, Result};
use crate::link::{close_shared, read_shared, write_shared, DeviceAttachment};
use crate::queue::{DropOldestQueue, PushOutcome};
use crate::vehicle::{AgentState, READ_POLL, RETRY_DELAY};

/// Grace period for the HTTP listener to drain on stop
pub const HTTP_GRACE: Duration = Duration::from_secs(3);

/// Bounded wait for the uplink and forwarder loops on stop
pub const UPLINK_GRACE: Duration = Duration::from_secs(2);

/// Timeout for each request to the hub
pub const HUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Relay statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Non-empty lines read from the radio link
    pub lines_read: u64,
    /// Lines that did not decode with the inbound format
    pub decode_failures: u64,
    /// Records dropped because the vehicle is not a member
    pub filtered: u64,
    /// Records queued for the hub
    pub queued: u64,
    /// Records evicted from a full queue
    pub queue_drops: u64,
    /// Records accepted by the hub
    pub forwarded: u64,
    /// POSTs that failed or were rejected
    pub forward_failures: u64,
    /// Control commands written to the radio link
    pub commands_written: u64,
}

#[derive(Default)]
struct RelayCounters {
    lines_read: AtomicU64,
    decode_failures: AtomicU64,
    filtered: AtomicU64,
    queued: AtomicU64,
    queue_drops: AtomicU64,
    forwarded: AtomicU64,
    forward_failures: AtomicU64,
    commands_written: AtomicU64,
}

impl RelayCounters {
    fn snapshot(&self) -> RelayStats {
        RelayStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            commands_written: self.commands_written.load(Ordering::Relaxed),
        }
    }
}

/// State shared by the relay's loops and HTTP handlers
pub struct RelayCore {
    id: String,
    callback_url: String,
    fog_url: String,
    wire_in: WireFormat,
    wire_out: WireFormat,
    members: HashSet<String>,
    device: DeviceAttachment,
    queue: DropOldestQueue<String>,
    client: reqwest::Client,
    counters: RelayCounters,
}

impl RelayCore {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_member(&self, vehicle_id: &str) -> bool {
        self.members.contains(vehicle_id)
    }

    pub fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }

    pub fn is_headless(&self) -> bool {
        self.device.is_headless()
    }

    /// Translate one radio line and queue it for the hub.
    ///
    /// Returns `true` when the line was queued.
    pub fn handle_uplink_line(&self, line: &str) -> bool {
        self.counters.lines_read.fetch_add(1, Ordering::Relaxed);

        let record = match self.wire_in.decode_telemetry(line) {
            Ok(record) => record,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(gateway_id = %self.id, error = %e, line = %line, "Dropping undecodable line");
                return false;
            }
        };

        if !self.is_member(&record.vehicle_id) {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            warn!(
                gateway_id = %self.id,
                vehicle_id = %record.vehicle_id,
                "Dropping telemetry for vehicle not served by this relay"
            );
            return false;
        }

        let encoded = match self.wire_out.encode_telemetry(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(gateway_id = %self.id, error = %e, "Failed to encode telemetry");
                return false;
            }
        };

        match self.queue.push(encoded) {
            PushOutcome::Queued => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            PushOutcome::EvictedOldest => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                self.counters.queue_drops.fetch_add(1, Ordering::Relaxed);
                warn!(gateway_id = %self.id, "Forward queue full, evicted oldest record");
                true
            }
            PushOutcome::Closed => false,
        }
    }

    /// POST one encoded record to the hub. Never retried.
    pub async fn forward(&self, body: String) -> Result<()> {
        let url = format!("{}/api/telemetry", self.fog_url);
        let result = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, self.wire_out.content_type())
            .body(body)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                debug!(gateway_id = %self.id, "Forwarded telemetry to hub");
                Ok(())
            }
            Err(e) => {
                self.counters.forward_failures.fetch_add(1, Ordering::Relaxed);
                warn!(gateway_id = %self.id, url = %url, error = %e, "Forward to hub failed");
                Err(e.into())
            }
        }
    }

    /// Decode a control body and write it to the radio link in the
    /// vehicles' own format.
    pub async fn dispatch_command(&self, body: &str, hint: Option<WireFormat>) -> Result<String> {
        let (command, format) = decode_control_any(body, hint)?;
        let link = self.device.link().ok_or(RadioError::Headless)?;
        let line = self.wire_in.encode_control(&command)?;

        write_shared(link, &line).await.map_err(|e| {
            warn!(
                gateway_id = %self.id,
                vehicle_id = %command.vehicle_id,
                error = %e,
                "Command write failed"
            );
            match e {
                RadioError::WriteError(_) => e,
                other => RadioError::WriteError(other.to_string()),
            }
        })?;

        self.counters.commands_written.fetch_add(1, Ordering::Relaxed);
        info!(
            gateway_id = %self.id,
            vehicle_id = %command.vehicle_id,
            received_as = %format,
            "Command written to radio link"
        );
        Ok(command.vehicle_id)
    }

    /// Announce this relay and its vehicles to the hub
    pub async fn register_with_hub(&self) -> Result<()> {
        let registration = Registration {
            gateway_id: self.id.clone(),
            url: self.callback_url.clone(),
            vehicles: self.members.iter().cloned().collect(),
        };
        self.client
            .post(format!("{}/register", self.fog_url))
            .json(&registration)
            .send()
            .await?
            .error_for_status()?;
        info!(gateway_id = %self.id, vehicles = registration.vehicles.len(), "Registered with hub");
        Ok(())
    }
}

/// Gateway relay service
pub struct GatewayRelay {
    core: Arc<RelayCore>,
    bind_addr: String,
    register: bool,
    state: AgentState,
    stop: StopSignal,
    local_addr: Option<SocketAddr>,
    http_task: Option<JoinHandle<()>>,
    loop_tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl GatewayRelay {
    /// Build a relay from its configuration. Formats left unset fall back
    /// to `global`.
    pub fn new(
        config: &GatewayConfig,
        global: WireFormat,
        device: DeviceAttachment,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HUB_REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(2))
            .build()?;

        let core = RelayCore {
            id: config.id.clone(),
            callback_url: config.url.trim_end_matches('/').to_string(),
            fog_url: config.fog_url.trim_end_matches('/').to_string(),
            wire_in: config.wire_in_or(global),
            wire_out: config.wire_out_or(global),
            members: config.vehicles.iter().cloned().collect(),
            device,
            queue: DropOldestQueue::new(config.queue_capacity),
            client,
            counters: RelayCounters::default(),
        };

        Ok(Self {
            core: Arc::new(core),
            bind_addr: config.bind_addr(),
            register: config.register,
            state: AgentState::Idle,
            stop: StopSignal::new(),
            local_addr: None,
            http_task: None,
            loop_tasks: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn core(&self) -> &Arc<RelayCore> {
        &self.core
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.core.stats()
    }

    /// Address the HTTP surface is listening on, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the configured address and start
    pub async fn start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| RadioError::BindFailed {
                addr: self.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        self.start_with_listener(listener).await
    }

    /// Start on an already bound listener
    pub async fn start_with_listener(&mut self, listener: TcpListener) -> Result<()> {
        if self.state != AgentState::Idle {
            return Err(RadioError::InvalidState(format!(
                "gateway {} cannot start while {}",
                self.core.id, self.state
            )));
        }

        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let app = router(Arc::clone(&self.core));
        let mut http_stop = self.stop.subscribe();
        let gateway_id = self.core.id.clone();
        self.http_task = Some(tokio::spawn(async move {
            let shutdown = async move { http_stop.stopped().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(gateway_id = %gateway_id, error = %e, "Relay HTTP server failed");
            }
        }));

        info!(
            gateway_id = %self.core.id,
            addr = %local_addr,
            wire_in = %self.core.wire_in,
            wire_out = %self.core.wire_out,
            vehicles = self.core.members.len(),
            "Gateway relay listening"
        );

        if self.register {
            if let Err(e) = self.core.register_with_hub().await {
                warn!(gateway_id = %self.core.id, error = %e, "Self-registration failed");
            }
        }

        match self.core.device.link() {
            Some(_) => {
                let uplink =
                    tokio::spawn(uplink_loop(Arc::clone(&self.core), self.stop.subscribe()));
                self.loop_tasks.push(("uplink", uplink));
                let forwarder =
                    tokio::spawn(forward_loop(Arc::clone(&self.core), self.stop.subscribe()));
                self.loop_tasks.push(("forwarder", forwarder));
            }
            None => {
                warn!(gateway_id = %self.core.id, "No device attached, running headless");
            }
        }

        self.state = AgentState::Running;
        Ok(())
    }

    /// Stop the relay: signal, drain HTTP, join loops, close the device.
    /// Idempotent.
    pub async fn stop(&mut self) {
        if self.state == AgentState::Stopped {
            return;
        }
        self.state = AgentState::Stopping;
        self.stop.trigger();
        self.core.queue.close();

        if let Some(http) = self.http_task.take() {
            let _ = join_with_timeout("relay-http", http, HTTP_GRACE).await;
        }
        for (name, handle) in self.loop_tasks.drain(..) {
            let _ = join_with_timeout(name, handle, UPLINK_GRACE).await;
        }
        if let Some(link) = self.core.device.link() {
            close_shared(link).await;
        }

        self.state = AgentState::Stopped;
        info!(gateway_id = %self.core.id, stats = ?self.core.stats(), "Gateway relay stopped");
    }
}

impl Drop for GatewayRelay {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

async fn uplink_loop(core: Arc<RelayCore>, mut stop: StopListener) {
    let Some(link) = core.device.link().cloned() else {
        return;
    };
    while !stop.is_stopped() {
        match read_shared(&link, READ_POLL).await {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    core.handle_uplink_line(line);
                }
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                debug!(gateway_id = %core.id, error = %e, "Device read failed, retrying");
                if stop.sleep(RETRY_DELAY).await {
                    break;
                }
            }
        }
    }
    debug!(gateway_id = %core.id, "Uplink loop stopped");
}

async fn forward_loop(core: Arc<RelayCore>, mut stop: StopListener) {
    loop {
        let body = tokio::select! {
            _ = stop.stopped() => break,
            next = core.queue.pop() => match next {
                Some(body) => body,
                None => break,
            },
        };
        let _ = core.forward(body).await;
    }
    debug!(gateway_id = %core.id, "Forwarder stopped");
}
