use std::thread;
use std::time::Duration;

use hearth_sched::{now_ms, Timer};
use log::{info, warn};

use crate::{ConnectionState, LinkError, LinkInfo, LinkProfile, NetworkInterface, ScanRecord};

/// Hard cap on stored profiles; extra entries are dropped by priority.
pub const MAX_PROFILES: usize = 2;

#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// How long to wait for association per profile attempt.
    pub connect_timeout: Duration,
    /// Sleep between association polls while waiting for link-up.
    pub poll_interval: Duration,
    /// Sleep between full profile rotations when retrying.
    pub rotation_delay: Duration,
    /// Full rotations attempted when `connect(retry = true)`.
    pub max_rotations: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            rotation_delay: Duration::from_secs(5),
            max_rotations: 3,
        }
    }
}

/// Brings up a wireless link from a prioritized profile list.
pub struct LinkManager {
    iface: Box<dyn NetworkInterface>,
    profiles: Vec<LinkProfile>,
    config: LinkConfig,
    state: ConnectionState,
}

impl LinkManager {
    pub fn new(iface: Box<dyn NetworkInterface>, config: LinkConfig) -> Self {
        Self {
            iface,
            profiles: Vec::new(),
            config,
            state: ConnectionState::Idle,
        }
    }

    /// Replace the profile list wholesale. Sorted by ascending priority
    /// (stable, so ties keep insertion order) and capped at `MAX_PROFILES`.
    /// Never called while a connection attempt is in flight — `connect`
    /// blocks its caller, so there is no in-flight window to race.
    pub fn set_profiles(&mut self, mut profiles: Vec<LinkProfile>) {
        profiles.sort_by_key(|profile| profile.priority);
        if profiles.len() > MAX_PROFILES {
            warn!(
                "link: {} profiles configured, keeping top {} by priority",
                profiles.len(),
                MAX_PROFILES
            );
            profiles.truncate(MAX_PROFILES);
        }
        self.profiles = profiles;
    }

    /// Profile names in rotation order, without credentials.
    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.ssid.clone()).collect()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn connected_profile(&self) -> Option<&LinkProfile> {
        match &self.state {
            ConnectionState::Connected { profile, .. } => Some(profile),
            _ => None,
        }
    }

    /// Cheap non-blocking status check: the interface must be active and
    /// associated for the link to count as up.
    pub fn is_connected(&self) -> bool {
        self.iface.is_active() && self.iface.is_associated()
    }

    /// Attempt to bring the link up. Idempotent when already connected.
    ///
    /// Tries every profile in priority order, blocking up to the per-profile
    /// timeout for each. With `retry` the whole rotation repeats up to
    /// `max_rotations` times with a fixed delay between rotations; a profile
    /// is never skipped in later rotations because it failed in an earlier
    /// one.
    pub fn connect(&mut self, retry: bool) -> Result<(), LinkError> {
        if self.profiles.is_empty() {
            warn!("link: no profiles configured");
            return Err(LinkError::NoProfiles);
        }

        if !self.iface.is_active() {
            self.iface.set_active(true);
        }

        if self.is_connected() {
            return Ok(());
        }

        let rotations = if retry { self.config.max_rotations } else { 1 };
        let profiles = self.profiles.clone();

        for rotation in 0..rotations {
            for profile in &profiles {
                info!(
                    "link: connecting to '{}' (rotation {}/{})",
                    profile.ssid,
                    rotation + 1,
                    rotations
                );
                if self.try_profile(profile) {
                    let info = self.iface.link_info().unwrap_or(LinkInfo {
                        ssid: profile.ssid.clone(),
                        ip: String::new(),
                        gateway: String::new(),
                        rssi: None,
                    });
                    info!("link: connected to '{}' ip={}", profile.ssid, info.ip);
                    self.state = ConnectionState::Connected {
                        profile: profile.clone(),
                        info,
                    };
                    return Ok(());
                }
                warn!("link: failed to connect to '{}'", profile.ssid);
            }

            if rotation + 1 < rotations {
                info!(
                    "link: retrying all profiles in {:?}",
                    self.config.rotation_delay
                );
                thread::sleep(self.config.rotation_delay);
            }
        }

        warn!("link: no profile connected after {rotations} rotation(s)");
        self.state = ConnectionState::Failed;
        Err(LinkError::AllProfilesFailed { rotations })
    }

    fn try_profile(&mut self, profile: &LinkProfile) -> bool {
        if self.iface.is_associated() {
            self.iface.disconnect();
        }

        let timeout_ms = self.config.connect_timeout.as_millis() as u64;
        self.state = ConnectionState::Connecting {
            ssid: profile.ssid.clone(),
            deadline_ms: now_ms().saturating_add(timeout_ms),
        };

        if let Err(err) = self.iface.begin_connect(&profile.ssid, &profile.credential) {
            warn!("link: association start failed: {err}");
            return false;
        }

        let timer = Timer::start(now_ms());
        while !self.iface.is_associated() && !timer.has_elapsed(now_ms(), timeout_ms) {
            self.iface.poll();
            thread::sleep(self.config.poll_interval);
        }

        self.iface.is_associated()
    }

    /// Tear the link down unconditionally.
    pub fn disconnect(&mut self) {
        if self.iface.is_associated() {
            self.iface.disconnect();
            info!("link: disconnected");
        }
        self.state = ConnectionState::Idle;
    }

    /// Disconnect and power the interface down.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.iface.set_active(false);
    }

    /// Visible networks sorted by descending signal strength, deduplicated
    /// by name (strongest kept) for display.
    pub fn scan(&mut self) -> Result<Vec<ScanRecord>, LinkError> {
        if !self.iface.is_active() {
            self.iface.set_active(true);
        }

        let mut records = self.iface.scan()?;
        records.sort_by(|a, b| b.rssi.cmp(&a.rssi));

        let mut seen = Vec::new();
        records.retain(|record| {
            if seen.contains(&record.ssid) {
                false
            } else {
                seen.push(record.ssid.clone());
                true
            }
        });

        info!("link: scan found {} network(s)", records.len());
        Ok(records)
    }

    /// Link details when connected: name, addresses, signal strength.
    pub fn connection_info(&self) -> Option<LinkInfo> {
        if self.is_connected() {
            self.iface.link_info()
        } else {
            None
        }
    }
}
