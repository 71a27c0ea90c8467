use std::cell::RefCell;
use std::rc::Rc;

use crate::{LinkError, LinkInfo, NetworkInterface, ScanRecord};

/// A network the fake radio can "see". Association succeeds only when the
/// credential matches.
#[derive(Clone, Debug)]
pub struct FakeNetwork {
    pub ssid: String,
    pub credential: String,
    pub rssi: i32,
    pub channel: u8,
    pub auth: String,
}

impl FakeNetwork {
    pub fn new(ssid: &str, credential: &str, rssi: i32) -> Self {
        Self {
            ssid: ssid.to_owned(),
            credential: credential.to_owned(),
            rssi,
            channel: 6,
            auth: "WPA2".to_owned(),
        }
    }
}

struct PendingConnect {
    ssid: String,
    credential: String,
    polls_remaining: u32,
}

struct Inner {
    active: bool,
    networks: Vec<FakeNetwork>,
    pending: Option<PendingConnect>,
    associated: Option<String>,
    associate_after_polls: u32,
    scan_fails: bool,
    attempt_log: Vec<String>,
}

impl Inner {
    fn credential_matches(&self, ssid: &str, credential: &str) -> bool {
        self.networks
            .iter()
            .any(|net| net.ssid == ssid && net.credential == credential)
    }
}

/// In-memory radio for tests. Clones share state, so a test can hand one
/// handle to the manager and keep another for fault injection and
/// inspection. Association completes after a configurable number of `poll`
/// calls when the credential matches a known network, and never completes
/// otherwise.
#[derive(Clone)]
pub struct FakeInterface {
    inner: Rc<RefCell<Inner>>,
}

impl FakeInterface {
    pub fn new(networks: Vec<FakeNetwork>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                active: false,
                networks,
                pending: None,
                associated: None,
                associate_after_polls: 1,
                scan_fails: false,
                attempt_log: Vec::new(),
            })),
        }
    }

    /// Number of `poll` calls before a matching attempt associates.
    pub fn set_associate_after_polls(&self, polls: u32) {
        self.inner.borrow_mut().associate_after_polls = polls;
    }

    pub fn set_scan_fails(&self, fails: bool) {
        self.inner.borrow_mut().scan_fails = fails;
    }

    /// SSIDs passed to `begin_connect`, in order.
    pub fn attempt_log(&self) -> Vec<String> {
        self.inner.borrow().attempt_log.clone()
    }

    /// Simulate the access point going away mid-session.
    pub fn drop_link(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.associated = None;
        inner.pending = None;
    }
}

impl NetworkInterface for FakeInterface {
    fn set_active(&mut self, active: bool) {
        let mut inner = self.inner.borrow_mut();
        inner.active = active;
        if !active {
            inner.associated = None;
            inner.pending = None;
        }
    }

    fn is_active(&self) -> bool {
        self.inner.borrow().active
    }

    fn begin_connect(&mut self, ssid: &str, credential: &str) -> Result<(), LinkError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.active {
            return Err(LinkError::Interface("interface inactive".to_owned()));
        }
        inner.attempt_log.push(ssid.to_owned());
        inner.pending = Some(PendingConnect {
            ssid: ssid.to_owned(),
            credential: credential.to_owned(),
            polls_remaining: inner.associate_after_polls,
        });
        Ok(())
    }

    fn poll(&mut self) {
        let mut inner = self.inner.borrow_mut();
        let Some(pending) = inner.pending.as_mut() else {
            return;
        };
        pending.polls_remaining = pending.polls_remaining.saturating_sub(1);
        if pending.polls_remaining > 0 {
            return;
        }
        if let Some(pending) = inner.pending.take() {
            if inner.credential_matches(&pending.ssid, &pending.credential) {
                inner.associated = Some(pending.ssid);
            }
            // Wrong credentials: the attempt quietly dies and the caller
            // times out, like a real radio.
        }
    }

    fn is_associated(&self) -> bool {
        self.inner.borrow().associated.is_some()
    }

    fn disconnect(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.associated = None;
        inner.pending = None;
    }

    fn scan(&mut self) -> Result<Vec<ScanRecord>, LinkError> {
        let inner = self.inner.borrow();
        if inner.scan_fails {
            return Err(LinkError::ScanFailed("radio busy".to_owned()));
        }
        Ok(inner
            .networks
            .iter()
            .map(|net| ScanRecord {
                ssid: net.ssid.clone(),
                rssi: net.rssi,
                channel: net.channel,
                auth: net.auth.clone(),
            })
            .collect())
    }

    fn link_info(&self) -> Option<LinkInfo> {
        let inner = self.inner.borrow();
        let ssid = inner.associated.clone()?;
        let rssi = inner
            .networks
            .iter()
            .find(|net| net.ssid == ssid)
            .map(|net| net.rssi);
        Some(LinkInfo {
            ssid,
            ip: "192.168.1.50".to_owned(),
            gateway: "192.168.1.1".to_owned(),
            rssi,
        })
    }
}
