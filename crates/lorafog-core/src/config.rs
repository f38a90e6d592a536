//! Configuration types for a LoraFog deployment
//!
//! One YAML document describes the hub, every gateway relay and every
//! vehicle agent. Fields left out fall back to the defaults below; gateway
//! and vehicle wire formats fall back to `global.wire_format`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{check_identifier, WireFormat};
use crate::error::{CoreError, Result};

/// Default hub listen address
pub const DEFAULT_FOG_ADDR: &str = "0.0.0.0:10000";

/// Default serial baud rate for radio and local devices
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default gateway forward queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default vehicle heartbeat interval
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Whole-system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub gateways: Vec<GatewayConfig>,

    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
}

/// Settings shared by every component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Format used wherever a component does not name its own
    #[serde(default)]
    pub wire_format: WireFormat,
}

/// Hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the hub HTTP surface
    #[serde(default = "default_fog_addr")]
    pub fog_addr: String,

    /// Base URL of the secondary collector (dashboard), if any
    #[serde(default)]
    pub app_addr: Option<String>,

    /// Format of lines pushed to observers
    #[serde(default)]
    pub broadcast_format: WireFormat,

    /// Format of control commands posted to relays
    #[serde(default = "default_relay_format")]
    pub relay_format: WireFormat,

    /// Static registry entries
    #[serde(default)]
    pub gateway_registry: Vec<RegistryConfig>,
}

fn default_fog_addr() -> String {
    DEFAULT_FOG_ADDR.to_string()
}

fn default_relay_format() -> WireFormat {
    WireFormat::Structured
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            fog_addr: default_fog_addr(),
            app_addr: None,
            broadcast_format: WireFormat::Delimited,
            relay_format: default_relay_format(),
            gateway_registry: Vec::new(),
        }
    }
}

/// Static registry entry: one relay and the vehicles it serves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub vehicles: Vec<String>,
}

/// Gateway relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub id: String,

    /// Base URL the hub uses to reach this relay's `/command` endpoint
    pub url: String,

    /// Bind address for the relay HTTP surface; derived from `url` if absent
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Base URL of the hub
    pub fog_url: String,

    /// Radio device path; a missing device runs the relay headless
    #[serde(default)]
    pub lora_device: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub lora_baud: u32,

    /// Format spoken by vehicles on the radio link
    #[serde(default)]
    pub wire_in: Option<WireFormat>,

    /// Format posted to the hub
    #[serde(default)]
    pub wire_out: Option<WireFormat>,

    /// Membership set
    #[serde(default)]
    pub vehicles: Vec<String>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Self-register with the hub on start
    #[serde(default)]
    pub register: bool,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl GatewayConfig {
    /// Minimal relay configuration, mostly useful in tests
    pub fn new(id: impl Into<String>, url: impl Into<String>, fog_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            listen_addr: None,
            fog_url: fog_url.into(),
            lora_device: None,
            lora_baud: DEFAULT_BAUD_RATE,
            wire_in: None,
            wire_out: None,
            vehicles: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            register: false,
        }
    }

    pub fn wire_in_or(&self, global: WireFormat) -> WireFormat {
        self.wire_in.unwrap_or(global)
    }

    pub fn wire_out_or(&self, global: WireFormat) -> WireFormat {
        self.wire_out.unwrap_or(global)
    }

    /// Address the relay HTTP server binds to
    pub fn bind_addr(&self) -> String {
        if let Some(addr) = &self.listen_addr {
            return addr.clone();
        }
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        without_scheme
            .split('/')
            .next()
            .unwrap_or(without_scheme)
            .to_string()
    }
}

/// Vehicle agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub id: String,

    #[serde(default)]
    pub wire_format: Option<WireFormat>,

    /// Heartbeat interval when the local source is silent
    #[serde(with = "humantime_serde", default = "default_telemetry_interval")]
    pub telemetry_interval: Duration,

    /// Radio device path toward the relay
    pub lora_device: String,

    #[serde(default = "default_baud_rate")]
    pub lora_baud: u32,

    /// Local position source (GPS receiver)
    #[serde(default)]
    pub gps_device: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub gps_baud: u32,

    /// Local actuator controller
    #[serde(default)]
    pub arduino_device: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub arduino_baud: u32,
}

fn default_telemetry_interval() -> Duration {
    DEFAULT_TELEMETRY_INTERVAL
}

impl VehicleConfig {
    pub fn wire_format_or(&self, global: WireFormat) -> WireFormat {
        self.wire_format.unwrap_or(global)
    }
}

impl SystemConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check cross-entry consistency
    pub fn validate(&self) -> Result<()> {
        for entry in &self.server.gateway_registry {
            if entry.id.trim().is_empty() || entry.url.trim().is_empty() {
                return Err(CoreError::InvalidConfig(
                    "gateway_registry entries need an id and a url".into(),
                ));
            }
        }

        let mut owner: HashMap<&str, &str> = HashMap::new();
        for gateway in &self.gateways {
            if gateway.id.trim().is_empty() {
                return Err(CoreError::InvalidConfig("gateway with empty id".into()));
            }
            if gateway.queue_capacity == 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "gateway {} has a zero queue_capacity",
                    gateway.id
                )));
            }
            for vehicle in &gateway.vehicles {
                if let Some(previous) = owner.insert(vehicle.as_str(), gateway.id.as_str()) {
                    if previous != gateway.id {
                        return Err(CoreError::InvalidConfig(format!(
                            "vehicle {vehicle} is served by both {previous} and {}",
                            gateway.id
                        )));
                    }
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        for vehicle in &self.vehicles {
            check_identifier(&vehicle.id)
                .map_err(|e| CoreError::InvalidConfig(format!("vehicle id: {e}")))?;
            if !seen.insert(vehicle.id.as_str()) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate vehicle id {}",
                    vehicle.id
                )));
            }
            if vehicle.telemetry_interval.is_zero() {
                return Err(CoreError::InvalidConfig(format!(
                    "vehicle {} has a zero telemetry_interval",
                    vehicle.id
                )));
            }
        }
        Ok(())
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
