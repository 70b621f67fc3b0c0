//! MQTT wiring for the telemetry pipeline.
//!
//! The event loop owns the connection; `rumqttc` reconnects on the next
//! poll after a failure, so the subscriber survives broker restarts.
//! Only the initial connection is allowed to be fatal.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use omega_core::config::MqttConfig;
use omega_core::{topics, Error, Result};

use crate::ingest::TelemetryIngest;

/// Build a client and its event loop from configuration.
pub fn build_client(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("omegad_{}", uuid::Uuid::new_v4()));

    let mut options = MqttOptions::new(client_id, &config.broker, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user, pass);
    }

    AsyncClient::new(options, 64)
}

/// Connect, subscribe the telemetry pattern, and spawn the ingest loop.
///
/// Waits for the broker acknowledgement before returning, so a dead
/// broker fails startup instead of silently dropping telemetry. Returns
/// the client for command dispatch.
pub async fn start(config: &MqttConfig, ingest: Arc<TelemetryIngest>) -> Result<AsyncClient> {
    let (client, mut eventloop) = build_client(config);

    client
        .subscribe(topics::TELEMETRY_TOPIC_PATTERN, QoS::AtLeastOnce)
        .await
        .map_err(|e| Error::Transient(format!("subscribe failed: {}", e)))?;

    // First acknowledgement validates the broker address/credentials.
    let deadline = Duration::from_secs(config.operation_timeout_secs);
    tokio::time::timeout(deadline, wait_for_connack(&mut eventloop, &ingest))
        .await
        .map_err(|_| {
            Error::Transient(format!(
                "broker {}:{} did not answer within {}s",
                config.broker, config.port, config.operation_timeout_secs
            ))
        })??;

    tracing::info!(
        broker = %config.broker,
        port = config.port,
        topic = topics::TELEMETRY_TOPIC_PATTERN,
        "mqtt connected, telemetry subscription active"
    );

    tokio::spawn(run_loop(client.clone(), eventloop, ingest));
    Ok(client)
}

/// A ConnAck after startup means the transport reconnected.
fn is_reconnect(event: &Event) -> bool {
    matches!(event, Event::Incoming(Packet::ConnAck(_)))
}

async fn wait_for_connack(eventloop: &mut EventLoop, ingest: &Arc<TelemetryIngest>) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(event) => handle_event(event, ingest),
            Err(e) => {
                return Err(Error::Transient(format!("mqtt connect failed: {}", e)));
            }
        }
    }
}

async fn run_loop(client: AsyncClient, mut eventloop: EventLoop, ingest: Arc<TelemetryIngest>) {
    let mut error_streak = 0u32;
    loop {
        match eventloop.poll().await {
            Ok(event) => {
                error_streak = 0;
                // The session is clean, so the broker forgets the
                // subscription across a reconnect; it must be re-issued.
                if is_reconnect(&event) {
                    if let Err(e) = client
                        .subscribe(topics::TELEMETRY_TOPIC_PATTERN, QoS::AtLeastOnce)
                        .await
                    {
                        tracing::error!("telemetry re-subscribe failed: {}", e);
                    } else {
                        tracing::info!("mqtt reconnected, telemetry subscription restored");
                    }
                }
                handle_event(event, &ingest);
            }
            Err(e) => {
                error_streak += 1;
                // Log the first few of a streak, then go quiet until the
                // connection recovers.
                if error_streak <= 3 {
                    tracing::error!("mqtt event loop error: {}", e);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn handle_event(event: Event, ingest: &Arc<TelemetryIngest>) {
    if let Event::Incoming(Packet::Publish(publish)) = event {
        let ingest = ingest.clone();
        // One task per message; ingest serializes per device internally.
        tokio::spawn(async move {
            ingest
                .handle_message(&publish.topic, &publish.payload)
                .await;
        });
    }
}
