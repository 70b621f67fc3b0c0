//! Device-type registry.
//!
//! The catalog is declarative JSON: `{"device_types": [...]}`. A reload
//! builds fresh lookup maps and swaps them under a write lock, so
//! readers never observe a half-updated catalog. Malformed entries are
//! skipped with a warning rather than failing the whole load; an empty
//! catalog is valid.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use omega_core::{Error, Result};
use omega_storage::PropertyMeta;

/// Schema for one kind of device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceType {
    /// Numeric id, positive and unique within the catalog.
    pub id: i32,
    /// Unique type name, e.g. `door_sensor`.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Property schema; instances copy this at creation.
    #[serde(default)]
    pub properties: HashMap<String, PropertyMeta>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    device_types: Vec<serde_json::Value>,
}

#[derive(Default)]
struct Maps {
    by_name: HashMap<String, Arc<DeviceType>>,
    by_id: HashMap<i32, Arc<DeviceType>>,
}

/// Concurrently-readable device-type catalog.
pub struct TypeRegistry {
    maps: RwLock<Maps>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Load (or reload) the catalog from a JSON file.
    pub async fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::InvalidInput(format!("cannot read type catalog: {}", e)))?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        self.load_from_value(value).await
    }

    /// Load (or reload) the catalog from an in-memory JSON document.
    ///
    /// Replaces the whole catalog atomically. Returns the number of
    /// types accepted; skipped entries are logged, not fatal.
    pub async fn load_from_value(&self, value: serde_json::Value) -> Result<usize> {
        let catalog: Catalog = serde_json::from_value(value)?;

        let mut maps = Maps::default();
        for entry in catalog.device_types {
            let device_type: DeviceType = match serde_json::from_value(entry) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("skipping malformed device type entry: {}", e);
                    continue;
                }
            };
            if device_type.name.is_empty() {
                tracing::warn!(id = device_type.id, "skipping device type with empty name");
                continue;
            }
            if device_type.id <= 0 {
                tracing::warn!(
                    name = %device_type.name,
                    id = device_type.id,
                    "skipping device type with non-positive id"
                );
                continue;
            }
            let device_type = Arc::new(device_type);
            if let Some(prev) = maps
                .by_name
                .insert(device_type.name.clone(), device_type.clone())
            {
                tracing::warn!(name = %prev.name, "duplicate device type name, keeping latest");
            }
            if let Some(prev) = maps.by_id.insert(device_type.id, device_type.clone()) {
                tracing::warn!(id = prev.id, "duplicate device type id, keeping latest");
            }
        }

        let count = maps.by_name.len();
        *self.maps.write().await = maps;
        tracing::info!(count, "device type catalog loaded");
        Ok(count)
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Arc<DeviceType>> {
        self.maps.read().await.by_name.get(name).cloned()
    }

    pub async fn get_by_id(&self, id: i32) -> Option<Arc<DeviceType>> {
        self.maps.read().await.by_id.get(&id).cloned()
    }

    pub async fn is_valid(&self, name: &str) -> bool {
        self.maps.read().await.by_name.contains_key(name)
    }

    /// Number of registered types.
    pub async fn len(&self) -> usize {
        self.maps.read().await.by_name.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> serde_json::Value {
        json!({
            "device_types": [
                {
                    "id": 1,
                    "name": "door_sensor",
                    "description": "Magnetic door sensor",
                    "properties": {
                        "battery_level": { "format": "integer", "unit": "%" },
                        "door_open": { "format": "boolean" }
                    }
                },
                { "id": 2, "name": "thermostat" }
            ]
        })
    }

    #[tokio::test]
    async fn test_load_and_lookup() {
        let registry = TypeRegistry::new();
        let count = registry.load_from_value(catalog()).await.unwrap();
        assert_eq!(count, 2);

        let t = registry.get_by_name("door_sensor").await.unwrap();
        assert_eq!(t.id, 1);
        assert_eq!(t.properties["battery_level"].format, "integer");

        assert_eq!(registry.get_by_id(2).await.unwrap().name, "thermostat");
        assert!(registry.is_valid("thermostat").await);
        assert!(!registry.is_valid("toaster").await);
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped() {
        let registry = TypeRegistry::new();
        let count = registry
            .load_from_value(json!({
                "device_types": [
                    { "id": 1, "name": "ok" },
                    { "name": "missing_id" },
                    { "id": 0, "name": "zero_id" },
                    { "id": 3, "name": "" },
                    "not an object"
                ]
            }))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(registry.is_valid("ok").await);
        assert!(!registry.is_valid("zero_id").await);
    }

    #[tokio::test]
    async fn test_reload_replaces_catalog() {
        let registry = TypeRegistry::new();
        registry.load_from_value(catalog()).await.unwrap();
        assert!(registry.is_valid("door_sensor").await);

        registry
            .load_from_value(json!({ "device_types": [{ "id": 9, "name": "camera" }] }))
            .await
            .unwrap();
        assert!(!registry.is_valid("door_sensor").await);
        assert!(registry.is_valid("camera").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_catalog_is_valid() {
        let registry = TypeRegistry::new();
        let count = registry
            .load_from_value(json!({ "device_types": [] }))
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(registry.is_empty().await);
    }
}
