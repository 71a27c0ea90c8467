//! Node configuration: the typed document, derived bus topics, and an
//! atomically persisted store with a backup copy.

mod store;

pub use store::{deep_merge, ConfigError, ConfigStore};

use hearth_net::LinkProfile;
use serde::{Deserialize, Serialize};

pub const FIRMWARE_VERSION: &str = "1.0.0";
pub const FIRMWARE_NAME: &str = "hearth-node";

/// The whole persisted configuration document. Every field carries a
/// default so a partial file (or a partial remote update) still loads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub wifi: WifiSection,
    #[serde(default)]
    pub bus: BusSection,
    #[serde(default)]
    pub sensor: SensorSection,
    #[serde(default)]
    pub led: LedSection,
    #[serde(default)]
    pub update: UpdateSection,
}

impl NodeConfig {
    /// Base topic for this node: the configured override, or
    /// `home/{location}/{device_id}` when none is set.
    pub fn base_topic(&self, device_id: &str) -> String {
        if self.bus.base_topic.is_empty() {
            format!("home/{}/{device_id}", self.device.location)
        } else {
            self.bus.base_topic.clone()
        }
    }

    pub fn topics(&self, device_id: &str) -> Topics {
        Topics::from_base(&self.base_topic(device_id))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            location: default_location(),
            firmware_version: default_firmware_version(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct WifiSection {
    #[serde(default)]
    pub profiles: Vec<LinkProfile>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub broker: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub client_id: String,
    /// Override for the derived `home/{location}/{device_id}` base topic.
    #[serde(default)]
    pub base_topic: String,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: String::new(),
            port: default_bus_port(),
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            base_topic: String::new(),
            discovery_enabled: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSection {
    #[serde(default = "default_read_interval")]
    pub read_interval_secs: u64,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    #[serde(default)]
    pub temp_offset: f64,
    #[serde(default)]
    pub humidity_offset: f64,
    /// Changes at least this large trigger an immediate publish.
    #[serde(default = "default_temp_threshold")]
    pub temp_change_threshold: f64,
    #[serde(default = "default_humidity_threshold")]
    pub humidity_change_threshold: f64,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            read_interval_secs: default_read_interval(),
            publish_interval_secs: default_publish_interval(),
            temp_offset: 0.0,
            humidity_offset: 0.0,
            temp_change_threshold: default_temp_threshold(),
            humidity_change_threshold: default_humidity_threshold(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default = "default_effect")]
    pub effect: String,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
}

impl Default for LedSection {
    fn default() -> Self {
        Self {
            enabled: true,
            brightness: default_brightness(),
            effect: default_effect(),
            color: default_color(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_update: bool,
}

impl Default for UpdateSection {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_update: false,
        }
    }
}

/// Bus topics derived from the base topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    pub status: String,
    pub state: String,
    pub command: String,
    pub config: String,
    pub led_command: String,
    pub led_state: String,
    pub update: String,
}

impl Topics {
    pub fn from_base(base: &str) -> Self {
        Self {
            base: base.to_owned(),
            status: format!("{base}/status"),
            state: format!("{base}/state"),
            command: format!("{base}/command"),
            config: format!("{base}/config"),
            led_command: format!("{base}/led/command"),
            led_state: format!("{base}/led/state"),
            update: format!("{base}/update"),
        }
    }
}

fn default_location() -> String {
    "living_room".to_owned()
}

fn default_firmware_version() -> String {
    FIRMWARE_VERSION.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_bus_port() -> u16 {
    1883
}

fn default_read_interval() -> u64 {
    10
}

fn default_publish_interval() -> u64 {
    30
}

fn default_temp_threshold() -> f64 {
    0.5
}

fn default_humidity_threshold() -> f64 {
    2.0
}

fn default_brightness() -> u8 {
    128
}

fn default_effect() -> String {
    "solid".to_owned()
}

fn default_color() -> [u8; 3] {
    [255, 255, 255]
}
