//! Device domain layer for the Omega IoT platform.
//!
//! This crate glues the stores to the outside world: the device-type
//! registry, the two-phase provisioning protocol, MQTT telemetry
//! ingestion, ownership/sharing access control, and command dispatch.

pub mod commands;
pub mod ingest;
pub mod mqtt;
pub mod property;
pub mod provisioning;
pub mod sharing;
pub mod types;

pub use commands::{CommandSink, MqttCommandDispatcher, ENABLE_UPLOAD};
pub use ingest::{TelemetryIngest, TelemetryMessage};
pub use property::{coerce_value, PropertyFormat};
pub use provisioning::{ProvisioningService, RegistrationOutcome};
pub use sharing::{AccessibleDevices, ShareService};
pub use types::{DeviceType, TypeRegistry};
