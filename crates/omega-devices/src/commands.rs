//! Outbound command dispatch.
//!
//! Commands go to `data/device/{id}/action` at QoS 1. The sink is a
//! trait so provisioning can be tested without a broker.

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use serde_json::json;

use omega_core::{topics, Error, Result};

/// Command instructing a freshly bound device to start reporting.
pub const ENABLE_UPLOAD: &str = "enable_upload";

/// Outbound command channel.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Publish a command to a device. At-least-once delivery; publish
    /// failure surfaces as `Transient` and the caller decides whether
    /// to retry.
    async fn publish_command(
        &self,
        device_id: &str,
        command: &str,
        params: serde_json::Value,
    ) -> Result<()>;
}

/// MQTT-backed command sink.
pub struct MqttCommandDispatcher {
    client: AsyncClient,
}

impl MqttCommandDispatcher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandSink for MqttCommandDispatcher {
    async fn publish_command(
        &self,
        device_id: &str,
        command: &str,
        params: serde_json::Value,
    ) -> Result<()> {
        let payload = serde_json::to_vec(&json!({
            "command": command,
            "params": params,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        }))?;

        let topic = topics::command_topic(device_id);
        self.client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Transient(format!("publish to {} failed: {}", topic, e)))?;

        tracing::debug!(device_id, command, "command published");
        Ok(())
    }
}
