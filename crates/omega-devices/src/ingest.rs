//! MQTT telemetry ingestion.
//!
//! Each inbound publish on `data/device/{id}/properties` authenticates
//! the sender, overwrites the matching property values on the Instance,
//! and re-derives one typed sample for the time-series store. Updates
//! for the same device are serialized through a per-device lock; no
//! error ever escapes to the subscriber loop.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;

use omega_core::{credentials, topics, Error, Result};
use omega_storage::{FieldValue, Instance, InstanceStore, Sample, TimeSeriesStore};

use crate::property::{coerce_value, PropertyFormat};

/// One reported property. Devices may echo their metadata; only the
/// value is trusted.
#[derive(Debug, Deserialize)]
pub struct IncomingProperty {
    pub value: String,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryData {
    #[serde(default)]
    pub properties: HashMap<String, IncomingProperty>,
}

/// Inbound telemetry payload.
#[derive(Debug, Deserialize)]
pub struct TelemetryMessage {
    pub verify_code: String,
    /// Unix milliseconds; zero or absent falls back to arrival time.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub data: TelemetryData,
}

/// Telemetry ingestion pipeline.
pub struct TelemetryIngest {
    instances: Arc<InstanceStore>,
    timeseries: Arc<TimeSeriesStore>,
    // Serializes read-modify-write per device; the transport does not.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TelemetryIngest {
    pub fn new(instances: Arc<InstanceStore>, timeseries: Arc<TimeSeriesStore>) -> Self {
        Self {
            instances,
            timeseries,
            locks: DashMap::new(),
        }
    }

    /// Entry point for the subscriber loop. Telemetry is fire-and-forget:
    /// every failure class is logged and the message dropped.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        match self.process(topic, payload).await {
            Ok(()) => {}
            Err(Error::Unauthorized(msg)) => {
                // Audit only; never acknowledge existence to the network.
                tracing::warn!(topic, "unauthorized telemetry dropped: {}", msg);
            }
            Err(Error::InvalidInput(msg)) => {
                tracing::warn!(topic, "malformed telemetry dropped: {}", msg);
            }
            Err(e) => {
                tracing::warn!(topic, "telemetry dropped: {}", e);
            }
        }
    }

    async fn process(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let device_id = topics::parse_telemetry_topic(topic)
            .ok_or_else(|| Error::InvalidInput(format!("unexpected topic: {}", topic)))?;

        let message: TelemetryMessage = serde_json::from_slice(payload)?;

        let lock = self
            .locks
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        let result = self.apply(device_id, &message).await;
        drop(guard);

        // The topic id is attacker-controlled, so entries must not
        // accumulate: an idle lock has no holder besides the table.
        self.locks
            .remove_if(device_id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn apply(&self, device_id: &str, message: &TelemetryMessage) -> Result<()> {
        let verify_hash = credentials::hash_verify_code(&message.verify_code);
        let mut instance = self
            .instances
            .get_authenticated(device_id, &verify_hash)
            .map_err(omega_core::Error::from)?
            .ok_or_else(|| Error::Unauthorized(format!("device {}", device_id)))?;

        // Validate before mutating: one unparseable value for a declared
        // format rejects the whole message, leaving stored state intact.
        for (name, incoming) in &message.data.properties {
            if let Some(item) = instance.properties.get(name) {
                let format = PropertyFormat::parse(&item.meta.format);
                coerce_value(&incoming.value, format)?;
            }
        }

        let mut updated = 0usize;
        for (name, incoming) in &message.data.properties {
            // Unknown property names are ignored, never inserted.
            if let Some(item) = instance.properties.get_mut(name) {
                item.value = incoming.value.clone();
                updated += 1;
            }
        }

        let now = chrono::Utc::now();
        instance.online = true;
        instance.last_seen = now.timestamp();
        self.instances
            .save(&instance)
            .map_err(omega_core::Error::from)?;
        tracing::debug!(device_id, updated, "instance state updated");

        // Losing the sample after the save is acceptable; the next
        // telemetry cycle recovers it. The reverse would not be.
        let timestamp = if message.timestamp > 0 {
            message.timestamp
        } else {
            now.timestamp_millis()
        };
        if let Some(sample) = derive_sample(&instance, timestamp) {
            self.timeseries
                .write_sample(&sample)
                .await
                .map_err(omega_core::Error::from)?;
        }

        Ok(())
    }
}

/// Coerce the Instance's full property set into one typed sample.
///
/// Never-reported properties (empty value) are omitted; a value that
/// fails coercion for its declared format aborts the whole sample, since
/// a sample must be internally consistent.
fn derive_sample(instance: &Instance, timestamp: i64) -> Option<Sample> {
    let mut fields: Vec<(String, FieldValue)> = Vec::new();
    for (name, item) in &instance.properties {
        if item.value.is_empty() {
            continue;
        }
        let format = PropertyFormat::parse(&item.meta.format);
        match coerce_value(&item.value, format) {
            Ok(value) => fields.push((name.clone(), value)),
            Err(e) => {
                tracing::warn!(
                    device_uuid = %instance.device_uuid,
                    property = %name,
                    "sample aborted: {}",
                    e
                );
                return None;
            }
        }
    }
    if fields.is_empty() {
        return None;
    }
    Some(
        fields.into_iter().fold(
            Sample::new(topics::measurement_path(&instance.device_uuid), timestamp),
            |sample, (name, value)| sample.with_field(name, value),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use omega_storage::{PropertyItem, PropertyMeta};

    fn instance_with(values: &[(&str, &str, &str)]) -> Instance {
        let properties = values
            .iter()
            .map(|(name, value, format)| {
                (
                    name.to_string(),
                    PropertyItem {
                        value: value.to_string(),
                        meta: PropertyMeta {
                            format: format.to_string(),
                            ..Default::default()
                        },
                    },
                )
            })
            .collect();
        Instance {
            device_uuid: "dev-1".to_string(),
            name: "Front Door".to_string(),
            device_type: "door_sensor".to_string(),
            owner_uuid: "alice".to_string(),
            description: String::new(),
            remark: String::new(),
            online: false,
            last_seen: 0,
            created_at: 0,
            verify_hash: String::new(),
            properties,
            is_shared: false,
            shared_count: 0,
        }
    }

    #[test]
    fn test_derive_sample_skips_never_reported() {
        let instance = instance_with(&[
            ("battery_level", "87", "integer"),
            ("door_open", "", "boolean"),
        ]);
        let sample = derive_sample(&instance, 1_000).unwrap();
        assert_eq!(sample.fields.len(), 1);
        assert_eq!(sample.fields[0].1, FieldValue::Integer(87));
        assert_eq!(sample.path, "root.omega.device_data.dev_1");
    }

    #[test]
    fn test_derive_sample_aborts_on_bad_value() {
        let instance = instance_with(&[
            ("battery_level", "abc", "integer"),
            ("door_open", "true", "boolean"),
        ]);
        assert!(derive_sample(&instance, 1_000).is_none());
    }

    #[test]
    fn test_derive_sample_all_empty_is_none() {
        let instance = instance_with(&[("battery_level", "", "integer")]);
        assert!(derive_sample(&instance, 1_000).is_none());
    }

    #[test]
    fn test_unrecognized_format_becomes_text() {
        let instance = instance_with(&[("mode", "eco", "blob")]);
        let sample = derive_sample(&instance, 1_000).unwrap();
        assert_eq!(sample.fields[0].1, FieldValue::Text("eco".to_string()));
    }

    #[tokio::test]
    async fn test_lock_table_sheds_idle_entries() {
        let instances = Arc::new(InstanceStore::memory().unwrap());
        let timeseries = Arc::new(TimeSeriesStore::memory().unwrap());
        let mut known = instance_with(&[("battery_level", "", "integer")]);
        known.verify_hash = credentials::hash_verify_code("secret");
        instances.insert(&known).unwrap();
        let ingest = TelemetryIngest::new(instances, timeseries);

        // Topic ids are attacker-controlled; unauthenticated senders
        // must not leave entries behind.
        for i in 0..32 {
            let topic = topics::telemetry_topic(&format!("ghost-{}", i));
            ingest
                .handle_message(&topic, br#"{"verify_code":"x"}"#)
                .await;
        }
        assert!(ingest.locks.is_empty());

        let payload = serde_json::to_vec(&serde_json::json!({
            "verify_code": "secret",
            "timestamp": 1_000,
            "data": { "properties": { "battery_level": { "value": "87" } } }
        }))
        .unwrap();
        ingest
            .handle_message(&topics::telemetry_topic("dev-1"), &payload)
            .await;
        assert!(ingest.locks.is_empty());
    }
}
