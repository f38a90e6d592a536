//! LoraFog Radio - the field side of the relay
//!
//! This crate connects vehicles to the hub:
//!
//! 1. **Links** ([`link`]) - line-oriented duplex channels over serial ports
//!    or in-memory pipes
//! 2. **Vehicle agents** ([`vehicle`]) - telemetry out, control in, one per
//!    vehicle
//! 3. **Gateway relays** ([`gateway`]) - one radio link shared by several
//!    vehicles, bridged to the hub over HTTP
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lorafog_core::{GatewayConfig, WireFormat};
//! use lorafog_radio::{open_serial, DeviceAttachment, GatewayRelay};
//!
//! let config = GatewayConfig::new("gw1", "http://10.0.0.2:9001", "http://10.0.0.1:10000");
//! let device = match open_serial("/dev/ttyUSB0", 9600).await {
//!     Ok(link) => DeviceAttachment::Attached(link),
//!     Err(_) => DeviceAttachment::Headless,
//! };
//! let mut relay = GatewayRelay::new(&config, WireFormat::Delimited, device)?;
//! relay.start().await?;
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port links (requires `libudev-dev` on Linux)

pub mod error;
pub mod gateway;
pub mod link;
pub mod queue;
pub mod source;
pub mod vehicle;

// Re-exports for convenience
pub use error::{RadioError, Result};
pub use gateway::{GatewayRelay, RelayStats};
pub use link::{
    open_serial, shared, DeviceAttachment, Link, LinkState, MemoryLink, SharedLink,
};
pub use queue::{DropOldestQueue, PushOutcome};
pub use source::{parse_reading, LocalReading};
pub use vehicle::{AgentState, VehicleAgent, VehicleStats};

#[cfg(feature = "serial")]
pub use link::SerialLink;
