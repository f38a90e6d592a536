//! Orchestration of the hub, gateway relays and vehicle agents
//!
//! Start order is hub, gateways, vehicles; stop runs in reverse. A
//! component that fails to come up is logged and left out, the rest keep
//! running.

use std::sync::Arc;

use anyhow::Context;
use clap::ValueEnum;
use tracing::{info, warn};

use lorafog_core::{Registration, SystemConfig, VehicleConfig};
use lorafog_hub::{Broadcaster, HubServer, HubService, Registry};
use lorafog_radio::{open_serial, DeviceAttachment, GatewayRelay, SharedLink, VehicleAgent};

/// Which components this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Role {
    #[default]
    All,
    Hub,
    Gateway,
    Vehicle,
}

impl Role {
    fn runs_hub(self) -> bool {
        matches!(self, Role::All | Role::Hub)
    }

    fn runs_gateways(self) -> bool {
        matches!(self, Role::All | Role::Gateway)
    }

    fn runs_vehicles(self) -> bool {
        matches!(self, Role::All | Role::Vehicle)
    }
}

pub struct System {
    config: SystemConfig,
    role: Role,
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    hub: Option<HubServer>,
    gateways: Vec<GatewayRelay>,
    vehicles: Vec<VehicleAgent>,
}

impl System {
    pub fn new(config: SystemConfig, role: Role) -> Self {
        Self {
            config,
            role,
            registry: Arc::new(Registry::new()),
            broadcaster: Arc::new(Broadcaster::new()),
            hub: None,
            gateways: Vec::new(),
            vehicles: Vec::new(),
        }
    }

    pub fn hub(&self) -> Option<&HubServer> {
        self.hub.as_ref()
    }

    pub fn gateways(&self) -> &[GatewayRelay] {
        &self.gateways
    }

    pub fn vehicles(&self) -> &[VehicleAgent] {
        &self.vehicles
    }

    /// Start every component of the configured role.
    ///
    /// Only a hub that cannot bind is fatal.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.role.runs_hub() {
            self.start_hub().await?;
        }
        if self.role.runs_gateways() {
            self.start_gateways().await;
        }
        if self.role.runs_vehicles() {
            self.start_vehicles().await;
        }
        info!(
            role = ?self.role,
            hub = self.hub.is_some(),
            gateways = self.gateways.len(),
            vehicles = self.vehicles.len(),
            "System started"
        );
        Ok(())
    }

    async fn start_hub(&mut self) -> anyhow::Result<()> {
        let service = HubService::new(
            &self.config.server,
            Arc::clone(&self.registry),
            Arc::clone(&self.broadcaster),
        )?;

        for gateway in &self.config.gateways {
            self.registry.register_gateway(&Registration {
                gateway_id: gateway.id.clone(),
                url: gateway.url.trim_end_matches('/').to_string(),
                vehicles: gateway.vehicles.clone(),
            });
        }

        let mut hub = HubServer::new(Arc::new(service), &self.config.server.fog_addr);
        hub.start()
            .await
            .with_context(|| format!("starting hub on {}", self.config.server.fog_addr))?;
        self.hub = Some(hub);
        Ok(())
    }

    async fn start_gateways(&mut self) {
        let global = self.config.global.wire_format;
        for config in &self.config.gateways {
            let device = match &config.lora_device {
                Some(path) => match open_serial(path, config.lora_baud).await {
                    Ok(link) => DeviceAttachment::Attached(link),
                    Err(e) => {
                        warn!(
                            gateway_id = %config.id,
                            device = %path,
                            error = %e,
                            "Radio unavailable, running headless"
                        );
                        DeviceAttachment::Headless
                    }
                },
                None => DeviceAttachment::Headless,
            };

            let mut relay = match GatewayRelay::new(config, global, device) {
                Ok(relay) => relay,
                Err(e) => {
                    warn!(gateway_id = %config.id, error = %e, "Failed to build gateway");
                    continue;
                }
            };
            match relay.start().await {
                Ok(()) => self.gateways.push(relay),
                Err(e) => warn!(gateway_id = %config.id, error = %e, "Failed to start gateway"),
            }
        }
    }

    async fn start_vehicles(&mut self) {
        let global = self.config.global.wire_format;
        for config in &self.config.vehicles {
            match build_vehicle(config, global).await {
                Ok(mut agent) => match agent.start() {
                    Ok(()) => self.vehicles.push(agent),
                    Err(e) => warn!(vehicle_id = %config.id, error = %e, "Failed to start vehicle"),
                },
                Err(e) => {
                    warn!(vehicle_id = %config.id, error = %e, "Skipping vehicle");
                }
            }
        }
    }

    /// Stop vehicles, then gateways, then the hub. Idempotent.
    pub async fn stop(&mut self) {
        for mut vehicle in self.vehicles.drain(..).rev() {
            vehicle.stop().await;
        }
        for mut gateway in self.gateways.drain(..).rev() {
            gateway.stop().await;
        }
        if let Some(mut hub) = self.hub.take() {
            hub.stop().await;
        }
        info!("System stopped");
    }
}

/// Open a vehicle's devices. The radio link is required; a missing local
/// source or actuator only narrows what the agent does.
async fn build_vehicle(
    config: &VehicleConfig,
    global: lorafog_core::WireFormat,
) -> lorafog_radio::Result<VehicleAgent> {
    let relay = open_serial(&config.lora_device, config.lora_baud).await?;
    let mut agent = VehicleAgent::new(&config.id, config.wire_format_or(global), relay)
        .with_interval(config.telemetry_interval);

    if let Some(source) =
        open_optional(&config.id, config.gps_device.as_deref(), config.gps_baud).await
    {
        agent = agent.with_source(source);
    }
    if let Some(actuator) =
        open_optional(&config.id, config.arduino_device.as_deref(), config.arduino_baud).await
    {
        agent = agent.with_actuator(actuator);
    }
    Ok(agent)
}

async fn open_optional(vehicle_id: &str, path: Option<&str>, baud: u32) -> Option<SharedLink> {
    let path = path?;
    match open_serial(path, baud).await {
        Ok(link) => Some(link),
        Err(e) => {
            warn!(vehicle_id = %vehicle_id, device = %path, error = %e, "Local device unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
global:
  wire_format: csv
server:
  fog_addr: "127.0.0.1:0"
gateways:
  - id: gw1
    url: "http://127.0.0.1:18081"
    listen_addr: "127.0.0.1:0"
    fog_url: "http://127.0.0.1:10000"
    lora_device: /nonexistent/ttyLORA0
    wire_out: json
    vehicles: ["00001", "00002"]
vehicles:
  - id: "00001"
    lora_device: /nonexistent/ttyLORA1
    telemetry_interval: 1s
"#;

    #[test]
    fn test_example_config_is_valid() {
        let config =
            SystemConfig::from_yaml_str(include_str!("../../../config.example.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.gateways[0].vehicles.len(), 2);
        assert_eq!(config.vehicles.len(), 2);
    }

    #[test]
    fn test_role_selection() {
        assert!(Role::All.runs_hub() && Role::All.runs_vehicles());
        assert!(Role::Hub.runs_hub() && !Role::Hub.runs_gateways());
        assert!(!Role::Vehicle.runs_gateways());
    }

    #[tokio::test]
    async fn test_start_degrades_missing_devices() {
        let config = SystemConfig::from_yaml_str(CONFIG).unwrap();
        let mut system = System::new(config, Role::All);
        system.start().await.unwrap();

        let hub = system.hub().unwrap();
        assert_eq!(
            hub.service().registry().lookup("00002").as_deref(),
            Some("http://127.0.0.1:18081")
        );
        assert_eq!(system.gateways().len(), 1);
        assert!(system.gateways()[0].core().is_headless());
        assert!(system.vehicles().is_empty());

        system.stop().await;
        system.stop().await;
        assert!(system.hub().is_none());
        assert!(system.gateways().is_empty());
    }

    #[tokio::test]
    async fn test_vehicle_role_skips_hub() {
        let config = SystemConfig::from_yaml_str(CONFIG).unwrap();
        let mut system = System::new(config, Role::Vehicle);
        system.start().await.unwrap();
        assert!(system.hub().is_none());
        assert!(system.gateways().is_empty());
        system.stop().await;
    }
}
