//! Service configuration.
//!
//! Loaded once at startup from a JSON file; every field has a default so
//! a minimal deployment can run with an empty document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_broker")]
    pub broker: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier; a random one is derived when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Username for authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Bounded timeout for publish acknowledgement, in seconds.
    #[serde(default = "default_op_timeout")]
    pub operation_timeout_secs: u64,
}

fn default_broker() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_keep_alive() -> u64 {
    60
}
fn default_op_timeout() -> u64 {
    10
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            operation_timeout_secs: default_op_timeout(),
        }
    }
}

/// Persistent storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the redb database files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    /// Declarative device-type catalog, JSON.
    pub device_types_file: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::InvalidInput(format!("cannot read config file: {}", e)))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg: ServiceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mqtt.broker, "localhost");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.storage.data_dir, PathBuf::from("data"));
        assert!(cfg.device_types_file.is_none());
    }

    #[test]
    fn test_partial_override() {
        let cfg: ServiceConfig = serde_json::from_str(
            r#"{"mqtt": {"broker": "broker.lan", "port": 8883}, "device_types_file": "types.json"}"#,
        )
        .unwrap();
        assert_eq!(cfg.mqtt.broker, "broker.lan");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.mqtt.keep_alive_secs, 60);
        assert_eq!(cfg.device_types_file, Some(PathBuf::from("types.json")));
    }
}
