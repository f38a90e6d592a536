//! Vehicle to relay registry
//!
//! Maps each vehicle identifier to the callback URL of the relay serving
//! it. Registrations overwrite; lookups and last-seen updates take a read
//! lock only, so routing never waits behind telemetry. Only registrations
//! add vehicles; telemetry from an unknown identifier is not recorded.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::info;

use lorafog_core::Registration;

#[derive(Debug, Default)]
struct Entry {
    relay_url: Option<String>,
    gateway_id: Option<String>,
    last_seen: Mutex<Option<DateTime<Utc>>>,
}

impl Entry {
    fn row(&self, vehicle_id: &str) -> VehicleEntry {
        VehicleEntry {
            vehicle_id: vehicle_id.to_string(),
            relay_url: self.relay_url.clone(),
            gateway_id: self.gateway_id.clone(),
            last_seen: *self.last_seen.lock(),
        }
    }
}

/// One row of the registry listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleEntry {
    pub vehicle_id: String,
    pub relay_url: Option<String>,
    pub gateway_id: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Registry shared by the hub's handlers
#[derive(Debug, Default)]
pub struct Registry {
    vehicles: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a vehicle to a relay URL, replacing any previous mapping
    pub fn register(&self, vehicle_id: impl Into<String>, relay_url: impl Into<String>) {
        let mut vehicles = self.vehicles.write();
        let entry = vehicles.entry(vehicle_id.into()).or_default();
        entry.relay_url = Some(relay_url.into());
    }

    /// Relay URL serving `vehicle_id`, if any
    pub fn lookup(&self, vehicle_id: &str) -> Option<String> {
        self.vehicles
            .read()
            .get(vehicle_id)
            .and_then(|entry| entry.relay_url.clone())
    }

    /// Map every vehicle of a relay registration to its URL
    pub fn register_gateway(&self, registration: &Registration) {
        let mut vehicles = self.vehicles.write();
        for vehicle_id in &registration.vehicles {
            let entry = vehicles.entry(vehicle_id.clone()).or_default();
            entry.relay_url = Some(registration.url.clone());
            entry.gateway_id = Some(registration.gateway_id.clone());
        }
        info!(
            gateway_id = %registration.gateway_id,
            url = %registration.url,
            vehicles = registration.vehicles.len(),
            "Gateway registered"
        );
    }

    /// Record that telemetry from `vehicle_id` arrived now.
    ///
    /// Returns `false` and records nothing for unregistered vehicles.
    pub fn touch(&self, vehicle_id: &str) -> bool {
        self.touch_at(vehicle_id, Utc::now())
    }

    fn touch_at(&self, vehicle_id: &str, at: DateTime<Utc>) -> bool {
        match self.vehicles.read().get(vehicle_id) {
            Some(entry) => {
                *entry.last_seen.lock() = Some(at);
                true
            }
            None => false,
        }
    }

    /// Listing row for one vehicle
    pub fn get(&self, vehicle_id: &str) -> Option<VehicleEntry> {
        self.vehicles
            .read()
            .get(vehicle_id)
            .map(|entry| entry.row(vehicle_id))
    }

    /// Every known vehicle, sorted by identifier
    pub fn list(&self) -> Vec<VehicleEntry> {
        let mut entries: Vec<VehicleEntry> = self
            .vehicles
            .read()
            .iter()
            .map(|(id, entry)| entry.row(id))
            .collect();
        entries.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        entries
    }

    /// Number of vehicles with a relay mapping
    pub fn routable_count(&self) -> usize {
        self.vehicles
            .read()
            .values()
            .filter(|entry| entry.relay_url.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_then_lookup() {
        let registry = Registry::new();
        registry.register("V1", "http://r1");
        assert_eq!(registry.lookup("V1").as_deref(), Some("http://r1"));
        assert_eq!(registry.lookup("unknown"), None);
    }

    #[test]
    fn test_register_overwrites() {
        let registry = Registry::new();
        registry.register("V1", "http://r1");
        registry.register("V1", "http://r2");
        assert_eq!(registry.lookup("V1").as_deref(), Some("http://r2"));
    }

    #[test]
    fn test_register_gateway_maps_all_vehicles() {
        let registry = Registry::new();
        registry.register_gateway(&Registration {
            gateway_id: "gw1".into(),
            url: "http://r1".into(),
            vehicles: vec!["V1".into(), "V2".into()],
        });
        assert_eq!(registry.lookup("V2").as_deref(), Some("http://r1"));
        assert_eq!(registry.list()[0].gateway_id.as_deref(), Some("gw1"));
        assert_eq!(registry.get("V2").unwrap().relay_url.as_deref(), Some("http://r1"));
        assert_eq!(registry.get("V3"), None);
        assert_eq!(registry.routable_count(), 2);
    }

    #[test]
    fn test_touch_unregistered_is_not_recorded() {
        let registry = Registry::new();
        for i in 0..1000 {
            assert!(!registry.touch(&format!("spoof-{i}")));
        }
        assert!(registry.list().is_empty());
        assert_eq!(registry.lookup("spoof-0"), None);
        assert_eq!(registry.routable_count(), 0);
    }

    #[test]
    fn test_touch_keeps_mapping() {
        let registry = Registry::new();
        registry.register("V1", "http://r1");
        let at = Utc::now();
        assert!(registry.touch_at("V1", at));
        let listing = registry.list();
        assert_eq!(listing[0].last_seen, Some(at));
        assert_eq!(listing[0].relay_url.as_deref(), Some("http://r1"));
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for n in 0..100 {
                        let id = format!("V{i}-{n}");
                        registry.register(id.clone(), format!("http://r{i}"));
                        assert!(registry.lookup(&id).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.routable_count(), 800);
    }
}
