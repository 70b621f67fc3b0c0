//! Shared foundation for the Omega IoT platform.
//!
//! This crate carries the pieces every other layer needs: the error
//! taxonomy, service configuration, credential generation/hashing, and
//! topic/path helpers for the MQTT and time-series naming schemes.

pub mod config;
pub mod credentials;
pub mod error;
pub mod topics;

pub use config::{MqttConfig, ServiceConfig, StorageConfig};
pub use error::{Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
