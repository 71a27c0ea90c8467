use std::collections::VecDeque;

use hearth_config::{ConfigStore, NodeConfig, Topics};
use hearth_net::LinkManager;
use serde_json::Value;

use crate::drivers::{FirmwareUpdater, SensorDriver, SensorReading, StatusLed};

/// A publish queued by a task or message handler, drained toward the bus by
/// the bus-poll task. Handlers never talk to the bus directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl OutboundPublish {
    pub fn json(topic: &str, value: &Value, retain: bool) -> Self {
        Self {
            topic: topic.to_owned(),
            payload: value.to_string().into_bytes(),
            retain,
        }
    }
}

/// Everything tasks and message handlers operate on. The bus client lives
/// outside this struct so a handler can never re-enter the session that is
/// dispatching it.
pub struct NodeCtx {
    pub device_id: String,
    pub started_ms: u64,
    /// Stamped by the controller at the top of every pass.
    pub now_ms: u64,
    pub store: ConfigStore,
    pub config: NodeConfig,
    pub topics: Topics,
    pub link: LinkManager,
    pub sensor: Box<dyn SensorDriver>,
    pub led: Box<dyn StatusLed>,
    pub updater: Box<dyn FirmwareUpdater>,
    pub last_reading: Option<SensorReading>,
    pub outbox: VecDeque<OutboundPublish>,
    pub restart_requested: bool,
}

impl NodeCtx {
    pub fn uptime_secs(&self) -> u64 {
        self.now_ms.saturating_sub(self.started_ms) / 1000
    }

    pub fn queue_json(&mut self, topic: &str, value: &Value, retain: bool) {
        self.outbox.push_back(OutboundPublish::json(topic, value, retain));
    }

    /// Current state payload for the state topic.
    pub fn state_payload(&self) -> Value {
        let (temperature, humidity) = match self.last_reading {
            Some(reading) => (
                Value::from(round2(reading.temperature)),
                Value::from(round2(reading.humidity)),
            ),
            None => (Value::Null, Value::Null),
        };
        let rssi = self
            .link
            .connection_info()
            .and_then(|info| info.rssi)
            .map(Value::from)
            .unwrap_or(Value::Null);
        serde_json::json!({
            "temperature": temperature,
            "humidity": humidity,
            "rssi": rssi,
            "uptime": self.uptime_secs(),
            "timestamp": self.now_ms / 1000,
        })
    }

    pub fn led_state_payload(&self) -> Value {
        let state = self.led.state();
        serde_json::json!({
            "state": if state.on { "ON" } else { "OFF" },
            "brightness": state.brightness,
            "color": { "r": state.color[0], "g": state.color[1], "b": state.color[2] },
            "effect": state.effect,
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
