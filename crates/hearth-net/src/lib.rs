//! Wireless link management: profile rotation, association, scan.
//!
//! The manager owns the wireless interface exclusively; no other component
//! brings the interface up or down. Reconnection is never autonomous —
//! callers poll `is_connected()` and trigger `connect()` themselves.

mod fake;
mod manager;

pub use fake::{FakeInterface, FakeNetwork};
pub use manager::{LinkConfig, LinkManager, MAX_PROFILES};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One set of network credentials. Profiles are ordered by ascending
/// `priority` (ties keep insertion order).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkProfile {
    pub ssid: String,
    pub credential: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    999
}

/// A network seen during a scan, for display purposes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub ssid: String,
    pub rssi: i32,
    pub channel: u8,
    pub auth: String,
}

/// Details of the currently associated link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub ssid: String,
    pub ip: String,
    pub gateway: String,
    pub rssi: Option<i32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting { ssid: String, deadline_ms: u64 },
    Connected { profile: LinkProfile, info: LinkInfo },
    Failed,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no link profiles configured")]
    NoProfiles,
    #[error("no profile connected after {rotations} rotation(s)")]
    AllProfilesFailed { rotations: u32 },
    #[error("interface error: {0}")]
    Interface(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
}

/// Seam to the wireless hardware. `begin_connect` starts an association
/// attempt; the manager drives it by calling `poll` until `is_associated`
/// or its per-profile timeout expires.
pub trait NetworkInterface {
    fn set_active(&mut self, active: bool);
    fn is_active(&self) -> bool;
    fn begin_connect(&mut self, ssid: &str, credential: &str) -> Result<(), LinkError>;
    fn poll(&mut self);
    fn is_associated(&self) -> bool;
    fn disconnect(&mut self);
    fn scan(&mut self) -> Result<Vec<ScanRecord>, LinkError>;
    fn link_info(&self) -> Option<LinkInfo>;
}
