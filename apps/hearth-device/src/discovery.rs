//! Hub auto-discovery announcements.
//!
//! Each entity gets a retained config payload under the hub's discovery
//! prefix; retracting an entity means publishing an empty retained payload
//! to the same topic.

use serde_json::{json, Value};

pub const DISCOVERY_PREFIX: &str = "homeassistant";

#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub device_id: String,
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
}

fn device_payload(info: &DeviceInfo) -> Value {
    json!({
        "identifiers": [info.device_id],
        "name": info.name,
        "model": info.model,
        "manufacturer": info.manufacturer,
        "sw_version": info.sw_version,
    })
}

fn sensor_discovery(
    prefix: &str,
    base_topic: &str,
    info: &DeviceInfo,
    sensor_type: &str,
    name: &str,
    unit: &str,
    icon: &str,
    device_class: Option<&str>,
    state_class: Option<&str>,
) -> (String, Value) {
    let unique_id = format!("{}_{sensor_type}", info.device_id);
    let mut payload = json!({
        "name": format!("{} {name}", info.name),
        "unique_id": unique_id,
        "object_id": unique_id,
        "state_topic": format!("{base_topic}/state"),
        "value_template": format!("{{{{ value_json.{sensor_type} }}}}"),
        "unit_of_measurement": unit,
        "icon": icon,
        "device": device_payload(info),
        "availability_topic": format!("{base_topic}/status"),
        "payload_available": "online",
        "payload_not_available": "offline",
    });
    if let Some(class) = device_class {
        payload["device_class"] = Value::from(class);
    }
    if let Some(class) = state_class {
        payload["state_class"] = Value::from(class);
    }
    (format!("{prefix}/sensor/{unique_id}/config"), payload)
}

fn light_discovery(prefix: &str, base_topic: &str, info: &DeviceInfo) -> (String, Value) {
    let unique_id = format!("{}_led", info.device_id);
    let payload = json!({
        "name": format!("{} LED", info.name),
        "unique_id": unique_id,
        "object_id": unique_id,
        "command_topic": format!("{base_topic}/led/command"),
        "state_topic": format!("{base_topic}/led/state"),
        "schema": "json",
        "brightness": true,
        "rgb": true,
        "effect": true,
        "effect_list": ["solid", "rainbow", "breathing", "humidity_gauge", "temperature_gauge"],
        "device": device_payload(info),
        "availability_topic": format!("{base_topic}/status"),
        "payload_available": "online",
        "payload_not_available": "offline",
    });
    (format!("{prefix}/light/{unique_id}/config"), payload)
}

/// Config topic and payload for every entity this node announces.
pub fn all_discoveries(prefix: &str, base_topic: &str, info: &DeviceInfo) -> Vec<(String, Value)> {
    vec![
        sensor_discovery(
            prefix,
            base_topic,
            info,
            "temperature",
            "Temperature",
            "\u{b0}C",
            "mdi:thermometer",
            Some("temperature"),
            Some("measurement"),
        ),
        sensor_discovery(
            prefix,
            base_topic,
            info,
            "humidity",
            "Humidity",
            "%",
            "mdi:water-percent",
            Some("humidity"),
            Some("measurement"),
        ),
        sensor_discovery(
            prefix,
            base_topic,
            info,
            "rssi",
            "Signal",
            "dBm",
            "mdi:wifi",
            Some("signal_strength"),
            Some("measurement"),
        ),
        sensor_discovery(
            prefix,
            base_topic,
            info,
            "uptime",
            "Uptime",
            "s",
            "mdi:timer-outline",
            Some("duration"),
            None,
        ),
        light_discovery(prefix, base_topic, info),
    ]
}

/// Topics to publish empty retained payloads to when going away for good.
pub fn retraction_topics(prefix: &str, info: &DeviceInfo) -> Vec<String> {
    all_discoveries(prefix, "unused", info)
        .into_iter()
        .map(|(topic, _)| topic)
        .collect()
}
