//! MQTT topic and time-series path conventions.
//!
//! Inbound telemetry arrives on `data/device/{id}/properties`; outbound
//! commands are published to `data/device/{id}/action`. Historical
//! samples live under a hierarchical measurement path derived from the
//! device identifier.

/// Subscription pattern for inbound property telemetry.
pub const TELEMETRY_TOPIC_PATTERN: &str = "data/device/+/properties";

/// Root of the device time-series tree.
const MEASUREMENT_ROOT: &str = "root.omega.device_data";

/// Telemetry topic for a specific device.
pub fn telemetry_topic(device_id: &str) -> String {
    format!("data/device/{}/properties", device_id)
}

/// Command topic for a specific device.
pub fn command_topic(device_id: &str) -> String {
    format!("data/device/{}/action", device_id)
}

/// Extract the device identifier from a telemetry topic.
///
/// Returns `None` for topics that do not match the pattern.
pub fn parse_telemetry_topic(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["data", "device", id, "properties"] if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Measurement path for a device's historical samples.
///
/// Hyphens are not legal in path segments, so UUID hyphens become
/// underscores.
pub fn measurement_path(device_id: &str) -> String {
    format!("{}.{}", MEASUREMENT_ROOT, device_id.replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_round_trip() {
        let topic = telemetry_topic("abc-123");
        assert_eq!(parse_telemetry_topic(&topic), Some("abc-123"));
    }

    #[test]
    fn test_parse_rejects_foreign_topics() {
        assert_eq!(parse_telemetry_topic("data/device/abc/action"), None);
        assert_eq!(parse_telemetry_topic("data/device//properties"), None);
        assert_eq!(parse_telemetry_topic("other/abc/properties"), None);
        assert_eq!(parse_telemetry_topic("data/device/a/b/properties"), None);
    }

    #[test]
    fn test_measurement_path_sanitizes_hyphens() {
        assert_eq!(
            measurement_path("11f3-9a"),
            "root.omega.device_data.11f3_9a"
        );
    }
}
