//! Telemetry and control records exchanged between vehicles, relays and the hub

use serde::{Deserialize, Serialize};

/// One telemetry sample produced by a vehicle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryRecord {
    /// Vehicle identifier, never empty after a successful decode
    pub vehicle_id: String,
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Current heading in degrees
    pub head_current: f64,
    /// Target heading in degrees
    pub head_target: f64,
    /// Left actuator speed
    pub left_speed: f64,
    /// Right actuator speed
    pub right_speed: f64,
    /// Control-loop output
    pub pid: f64,
}

/// Command routed from an operator to exactly one vehicle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCommand {
    /// Target vehicle identifier
    pub vehicle_id: String,
    /// Mode selector
    pub mode: u8,
    /// Commanded speed
    pub speed: f64,
    /// Target latitude in decimal degrees
    pub lat: f64,
    /// Target longitude in decimal degrees
    pub lon: f64,
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
}

impl ControlCommand {
    /// Render the actuator line written to a vehicle's local controller:
    /// speed, target position and the three gains.
    pub fn actuator_line(&self) -> String {
        format!(
            "{:.2},{:.6},{:.6},{:.2},{:.2},{:.2}",
            self.speed, self.lat, self.lon, self.kp, self.ki, self.kd
        )
    }
}

/// Body of a gateway relay self-registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub gateway_id: String,
    /// Callback base URL the hub posts commands to
    pub url: String,
    #[serde(default)]
    pub vehicles: Vec<String>,
}
