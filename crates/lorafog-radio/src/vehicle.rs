//! Vehicle agent
//!
//! Owns the radio link toward its relay plus optional local source and
//! actuator links, and runs up to three loops:
//!
//! - **source reader**: every parsed local reading is stored and telemetry
//!   is sent immediately
//! - **heartbeat**: on each tick, telemetry is re-sent from the last reading
//!   unless a fresh reading already went out during that interval
//! - **control listener**: control lines read back from the radio link are
//!   applied when addressed to this vehicle and discarded otherwise
//!
//! Link errors never end a loop; the loop sleeps for [`RETRY_DELAY`] and
//! tries again until the agent is stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lorafog_core::{
    decode_control_any, join_with_timeout, StopListener, StopSignal, TelemetryRecord, WireFormat,
};

use crate::error::{RadioError, Result};
use crate::link::{close_shared, read_shared, write_shared, SharedLink};
use crate::source::{parse_reading, LocalReading};

/// Position reported before any local fix has arrived
pub const FALLBACK_LAT: f64 = 21.0285;
/// Position reported before any local fix has arrived
pub const FALLBACK_LON: f64 = 105.8048;

/// Actuator speed reported when the local source gives none
pub const DEFAULT_SPEED: f64 = 12.0;
/// Control-loop output reported by the agent
pub const DEFAULT_PID: f64 = 1.0;

/// Delay before retrying after a link error
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Longest time a reader holds a shared link per poll
pub const READ_POLL: Duration = Duration::from_millis(200);

/// Grace period for each loop on stop
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Agent lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Running => write!(f, "running"),
            AgentState::Stopping => write!(f, "stopping"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Vehicle statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VehicleStats {
    /// Telemetry lines written to the relay link
    pub telemetry_sent: u64,
    /// Telemetry writes that failed
    pub write_failures: u64,
    /// Control commands addressed to this vehicle
    pub commands_applied: u64,
    /// Control commands for other vehicles or undecodable lines
    pub commands_discarded: u64,
}

#[derive(Default)]
struct Counters {
    telemetry_sent: AtomicU64,
    write_failures: AtomicU64,
    commands_applied: AtomicU64,
    commands_discarded: AtomicU64,
}

/// State shared by the agent's loops
struct AgentCore {
    id: String,
    format: WireFormat,
    relay: SharedLink,
    actuator: Option<SharedLink>,
    last_reading: Mutex<Option<LocalReading>>,
    fresh_reading: AtomicBool,
    counters: Arc<Counters>,
}

/// Vehicle-side relay agent
pub struct VehicleAgent {
    id: String,
    format: WireFormat,
    relay: SharedLink,
    source: Option<SharedLink>,
    actuator: Option<SharedLink>,
    interval: Duration,
    counters: Arc<Counters>,
    state: AgentState,
    stop: StopSignal,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl VehicleAgent {
    /// Create an idle agent talking to its relay over `relay`
    pub fn new(id: impl Into<String>, format: WireFormat, relay: SharedLink) -> Self {
        Self {
            id: id.into(),
            format,
            relay,
            source: None,
            actuator: None,
            interval: lorafog_core::config::DEFAULT_TELEMETRY_INTERVAL,
            counters: Arc::new(Counters::default()),
            state: AgentState::Idle,
            stop: StopSignal::new(),
            tasks: Vec::new(),
        }
    }

    /// Set the heartbeat interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Attach the local position source
    pub fn with_source(mut self, source: SharedLink) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach the local actuator controller
    pub fn with_actuator(mut self, actuator: SharedLink) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn stats(&self) -> VehicleStats {
        let c = &self.counters;
        VehicleStats {
            telemetry_sent: c.telemetry_sent.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            commands_applied: c.commands_applied.load(Ordering::Relaxed),
            commands_discarded: c.commands_discarded.load(Ordering::Relaxed),
        }
    }

    /// Spawn the agent's loops. Only valid from [`AgentState::Idle`].
    pub fn start(&mut self) -> Result<()> {
        if self.state != AgentState::Idle {
            return Err(RadioError::InvalidState(format!(
                "vehicle {} cannot start while {}",
                self.id, self.state
            )));
        }
        if self.interval.is_zero() {
            return Err(RadioError::InvalidState(format!(
                "vehicle {} has a zero heartbeat interval",
                self.id
            )));
        }

        info!(
            vehicle_id = %self.id,
            format = %self.format,
            interval_ms = self.interval.as_millis() as u64,
            has_source = self.source.is_some(),
            has_actuator = self.actuator.is_some(),
            "Starting vehicle agent"
        );

        let core = Arc::new(AgentCore {
            id: self.id.clone(),
            format: self.format,
            relay: self.relay.clone(),
            actuator: self.actuator.clone(),
            last_reading: Mutex::new(None),
            fresh_reading: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        });

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&core),
            self.interval,
            self.stop.subscribe(),
        ));
        self.tasks.push(("heartbeat", heartbeat));

        let control = tokio::spawn(control_loop(Arc::clone(&core), self.stop.subscribe()));
        self.tasks.push(("control", control));

        if let Some(source) = &self.source {
            let reader = tokio::spawn(source_loop(
                Arc::clone(&core),
                source.clone(),
                self.stop.subscribe(),
            ));
            self.tasks.push(("source", reader));
        }

        self.state = AgentState::Running;
        Ok(())
    }

    /// Signal every loop, join them and close the links. Idempotent.
    pub async fn stop(&mut self) {
        if self.state == AgentState::Stopped {
            return;
        }
        self.state = AgentState::Stopping;
        self.stop.trigger();

        for (name, handle) in self.tasks.drain(..) {
            let _ = join_with_timeout(name, handle, STOP_GRACE).await;
        }

        let mut links = vec![&self.relay];
        links.extend(self.source.as_ref());
        links.extend(self.actuator.as_ref());
        for link in links {
            close_shared(link).await;
        }

        self.state = AgentState::Stopped;
        info!(vehicle_id = %self.id, stats = ?self.stats(), "Vehicle agent stopped");
    }
}

impl Drop for VehicleAgent {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

/// Build a telemetry record from the latest reading.
///
/// Without a fix the fallback coordinate is used; without a reported heading
/// the heading is derived from the wall clock.
pub fn build_telemetry(id: &str, reading: Option<&LocalReading>, now_ms: i64) -> TelemetryRecord {
    let fix = reading.filter(|r| r.has_fix());
    let (lat, lon) = fix.map_or((FALLBACK_LAT, FALLBACK_LON), |r| (r.lat, r.lon));
    let heading = reading
        .and_then(|r| r.heading)
        .unwrap_or_else(|| (now_ms as f64 / 100.0) % 360.0);

    TelemetryRecord {
        vehicle_id: id.to_string(),
        lat,
        lon,
        head_current: heading,
        head_target: heading,
        left_speed: reading.and_then(|r| r.left_speed).unwrap_or(DEFAULT_SPEED),
        right_speed: reading.and_then(|r| r.right_speed).unwrap_or(DEFAULT_SPEED),
        pid: DEFAULT_PID,
    }
}

impl AgentCore {
    async fn send_telemetry(&self) {
        let reading = *self.last_reading.lock();
        let record = build_telemetry(
            &self.id,
            reading.as_ref(),
            chrono::Utc::now().timestamp_millis(),
        );
        let line = match self.format.encode_telemetry(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(vehicle_id = %self.id, error = %e, "Failed to encode telemetry");
                return;
            }
        };

        match write_shared(&self.relay, &line).await {
            Ok(()) => {
                self.counters.telemetry_sent.fetch_add(1, Ordering::Relaxed);
                debug!(vehicle_id = %self.id, line = %line, "Sent telemetry");
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(vehicle_id = %self.id, error = %e, "Telemetry write failed");
            }
        }
    }

    async fn handle_control_line(&self, line: &str) {
        let command = match decode_control_any(line, Some(self.format)) {
            Ok((command, _)) => command,
            Err(e) => {
                self.counters
                    .commands_discarded
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    vehicle_id = %self.id,
                    error = %e,
                    "Ignoring undecodable line on radio link"
                );
                return;
            }
        };

        if command.vehicle_id != self.id {
            self.counters
                .commands_discarded
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                vehicle_id = %self.id,
                target = %command.vehicle_id,
                "Discarding control command addressed to another vehicle"
            );
            return;
        }

        self.counters.commands_applied.fetch_add(1, Ordering::Relaxed);
        let Some(actuator) = &self.actuator else {
            info!(
                vehicle_id = %self.id,
                mode = command.mode,
                "Control command received, no actuator attached"
            );
            return;
        };
        let actuator_line = command.actuator_line();
        match write_shared(actuator, &actuator_line).await {
            Ok(()) => {
                info!(vehicle_id = %self.id, line = %actuator_line, "Applied control command")
            }
            Err(e) => warn!(vehicle_id = %self.id, error = %e, "Actuator write failed"),
        }
    }
}

async fn heartbeat_loop(core: Arc<AgentCore>, interval: Duration, mut stop: StopListener) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            _ = ticker.tick() => {
                if core.fresh_reading.swap(false, Ordering::AcqRel) {
                    continue;
                }
                core.send_telemetry().await;
            }
        }
    }
    debug!(vehicle_id = %core.id, "Heartbeat loop stopped");
}

async fn source_loop(core: Arc<AgentCore>, source: SharedLink, mut stop: StopListener) {
    while !stop.is_stopped() {
        match read_shared(&source, READ_POLL).await {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_reading(line) {
                    Some(reading) => {
                        *core.last_reading.lock() = Some(reading);
                        core.fresh_reading.store(true, Ordering::Release);
                        core.send_telemetry().await;
                    }
                    None => {
                        debug!(vehicle_id = %core.id, line = %line, "Ignoring local source line")
                    }
                }
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                debug!(vehicle_id = %core.id, error = %e, "Local source read failed, retrying");
                if stop.sleep(RETRY_DELAY).await {
                    break;
                }
            }
        }
    }
    debug!(vehicle_id = %core.id, "Source loop stopped");
}

async fn control_loop(core: Arc<AgentCore>, mut stop: StopListener) {
    while !stop.is_stopped() {
        match read_shared(&core.relay, READ_POLL).await {
            Ok(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    core.handle_control_line(line).await;
                }
            }
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                debug!(vehicle_id = %core.id, error = %e, "Radio read failed, retrying");
                if stop.sleep(RETRY_DELAY).await {
                    break;
                }
            }
        }
    }
    debug!(vehicle_id = %core.id, "Control loop stopped");
}
