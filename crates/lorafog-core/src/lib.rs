//! LoraFog Core - records, wire codecs and shared plumbing
//!
//! This crate holds everything the radio side and the hub agree on:
//!
//! - [`model`] - telemetry and control records
//! - [`codec`] - the delimited and structured wire codecs and decode fallback
//! - [`task`] - stop signals and bounded task joins
//! - [`config`] - deployment configuration loaded from YAML
//! - [`error`] - error types
//!
//! # Example
//!
//! ```rust
//! use lorafog_core::{decode_telemetry_any, WireFormat};
//!
//! let line = "00001,21.0285,105.8048,10.00,10.00,12.00,12.00,1.0";
//! let (record, format) = decode_telemetry_any(line, None).unwrap();
//! assert_eq!(format, WireFormat::Delimited);
//!
//! let json = WireFormat::Structured.encode_telemetry(&record).unwrap();
//! assert!(json.contains("\"vehicle_id\":\"00001\""));
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod task;

// Re-exports for convenience
pub use codec::{
    check_identifier, decode_control_any, decode_telemetry_any, DelimitedCodec, StructuredCodec,
    WireCodec, WireFormat, FALLBACK_ORDER,
};
pub use config::{GatewayConfig, RegistryConfig, ServerConfig, SystemConfig, VehicleConfig};
pub use error::{CoreError, DecodeError, Result};
pub use model::{ControlCommand, Registration, TelemetryRecord};
pub use task::{join_with_timeout, StopListener, StopSignal};
