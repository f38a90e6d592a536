//! LoraFog Hub - registry, telemetry fan-out and control routing
//!
//! The hub is the fog server every gateway relay reports to:
//!
//! - [`registry`] - vehicle to relay URL mapping with last-seen times
//! - [`broadcast`] - observer set and non-blocking fan-out
//! - [`service`] - ingestion, control routing and registration
//! - [`server`] - axum router and server lifecycle
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lorafog_core::ServerConfig;
//! use lorafog_hub::{Broadcaster, HubServer, HubService, Registry};
//!
//! let config = ServerConfig::default();
//! let registry = Arc::new(Registry::new());
//! let service = HubService::new(&config, registry, Arc::new(Broadcaster::new()))?;
//! let mut hub = HubServer::new(Arc::new(service), &config.fog_addr);
//! hub.start().await?;
//! ```

pub mod broadcast;
pub mod error;
pub mod registry;
pub mod server;
pub mod service;

// Re-exports for convenience
pub use broadcast::{BroadcastReport, Broadcaster};
pub use error::{HubError, Result};
pub use registry::{Registry, VehicleEntry};
pub use server::{create_router, HubServer};
pub use service::{HubService, HubStats, Ingested, Routed};
