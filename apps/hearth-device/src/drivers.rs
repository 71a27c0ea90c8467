//! Hardware seams and the simulated implementations the host binary and
//! tests run against.

use std::cell::RefCell;
use std::rc::Rc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl From<String> for DriverError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for DriverError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// Environmental sensor. A read is allowed to fail transiently; the caller
/// keeps the previous reading.
pub trait SensorDriver {
    fn read(&mut self) -> Result<SensorReading, DriverError>;
}

/// Status patterns shown while the node is not in its configured idle look.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusPattern {
    Startup,
    Disconnected,
    Connecting,
    Recovery,
    Idle,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedState {
    pub on: bool,
    pub brightness: u8,
    pub color: [u8; 3],
    pub effect: String,
}

impl Default for LedState {
    fn default() -> Self {
        Self {
            on: true,
            brightness: 128,
            color: [255, 255, 255],
            effect: "solid".to_owned(),
        }
    }
}

/// Status light. `tick` advances animations and is called on a fast cadence.
pub trait StatusLed {
    fn set_status(&mut self, pattern: StatusPattern);
    fn apply(&mut self, state: &LedState);
    fn state(&self) -> LedState;
    fn tick(&mut self, now_ms: u64);
    fn clear(&mut self);
}

/// Hardware watchdog. Fed once per main-loop pass.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Finds a broker on the local network when none is configured.
pub trait BrokerLocator {
    fn locate(&mut self) -> Option<(String, u16)>;
}

/// Interactive provisioning fallback (captive portal or similar) used when
/// the node cannot associate with any configured network. Returns a config
/// patch to persist, or `None` on timeout.
pub trait Provisioner {
    fn provision(&mut self) -> Option<serde_json::Value>;
}

/// Applies a firmware image fetched from a URL.
pub trait FirmwareUpdater {
    fn apply(&mut self, url: &str, sha256: Option<&str>) -> Result<(), DriverError>;
}

// --- simulated implementations -----------------------------------------

/// Simulated sensor with shared state: tests keep one handle to steer the
/// readings while the controller owns another.
#[derive(Clone)]
pub struct SimSensor {
    inner: Rc<RefCell<SimSensorState>>,
}

struct SimSensorState {
    reading: SensorReading,
    drift: bool,
    fail_reads_remaining: u32,
}

impl SimSensor {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimSensorState {
                reading: SensorReading {
                    temperature,
                    humidity,
                },
                drift: false,
                fail_reads_remaining: 0,
            })),
        }
    }

    pub fn set_reading(&self, temperature: f64, humidity: f64) {
        self.inner.borrow_mut().reading = SensorReading {
            temperature,
            humidity,
        };
    }

    /// Add a small random walk to each read, for the host demo.
    pub fn set_drift(&self, drift: bool) {
        self.inner.borrow_mut().drift = drift;
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.inner.borrow_mut().fail_reads_remaining = count;
    }
}

impl SensorDriver for SimSensor {
    fn read(&mut self) -> Result<SensorReading, DriverError> {
        let mut state = self.inner.borrow_mut();
        if state.fail_reads_remaining > 0 {
            state.fail_reads_remaining -= 1;
            return Err("sensor read timeout".into());
        }
        if state.drift {
            let mut rng = rand::thread_rng();
            state.reading.temperature += rng.gen_range(-0.1..=0.1);
            state.reading.humidity =
                (state.reading.humidity + rng.gen_range(-0.5..=0.5)).clamp(0.0, 100.0);
        }
        Ok(state.reading)
    }
}

/// Simulated status light that records what it was told to show.
#[derive(Clone)]
pub struct SimLed {
    inner: Rc<RefCell<SimLedState>>,
}

#[derive(Default)]
struct SimLedState {
    state: LedState,
    pattern: Option<StatusPattern>,
    pattern_history: Vec<StatusPattern>,
    ticks: u64,
}

impl SimLed {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimLedState {
                state: LedState::default(),
                ..Default::default()
            })),
        }
    }

    pub fn pattern(&self) -> Option<StatusPattern> {
        self.inner.borrow().pattern
    }

    pub fn pattern_history(&self) -> Vec<StatusPattern> {
        self.inner.borrow().pattern_history.clone()
    }

    pub fn ticks(&self) -> u64 {
        self.inner.borrow().ticks
    }

    pub fn current_state(&self) -> LedState {
        self.inner.borrow().state.clone()
    }
}

impl Default for SimLed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLed for SimLed {
    fn set_status(&mut self, pattern: StatusPattern) {
        let mut inner = self.inner.borrow_mut();
        inner.pattern = Some(pattern);
        inner.pattern_history.push(pattern);
    }

    fn apply(&mut self, state: &LedState) {
        let mut inner = self.inner.borrow_mut();
        inner.state = state.clone();
        inner.pattern = Some(StatusPattern::Idle);
    }

    fn state(&self) -> LedState {
        self.inner.borrow().state.clone()
    }

    fn tick(&mut self, _now_ms: u64) {
        self.inner.borrow_mut().ticks += 1;
    }

    fn clear(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.state.on = false;
        inner.pattern = None;
    }
}

/// Watchdog stand-in that just counts feeds.
#[derive(Clone, Default)]
pub struct SimWatchdog {
    feeds: Rc<RefCell<u64>>,
}

impl SimWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> u64 {
        *self.feeds.borrow()
    }
}

impl Watchdog for SimWatchdog {
    fn feed(&mut self) {
        *self.feeds.borrow_mut() += 1;
    }
}

/// Locator used when no discovery mechanism is wired up: never finds one.
#[derive(Default)]
pub struct NullLocator;

impl BrokerLocator for NullLocator {
    fn locate(&mut self) -> Option<(String, u16)> {
        None
    }
}

/// Provisioner used when no portal is wired up: always times out.
#[derive(Default)]
pub struct NullProvisioner;

impl Provisioner for NullProvisioner {
    fn provision(&mut self) -> Option<serde_json::Value> {
        None
    }
}

/// Scripted provisioner for tests: hands out a fixed config patch once.
pub struct FixedProvisioner {
    patch: Option<serde_json::Value>,
}

impl FixedProvisioner {
    pub fn new(patch: serde_json::Value) -> Self {
        Self { patch: Some(patch) }
    }
}

impl Provisioner for FixedProvisioner {
    fn provision(&mut self) -> Option<serde_json::Value> {
        self.patch.take()
    }
}

/// Scripted locator for tests and demos.
pub struct FixedLocator {
    result: Option<(String, u16)>,
}

impl FixedLocator {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            result: Some((host.to_owned(), port)),
        }
    }
}

impl BrokerLocator for FixedLocator {
    fn locate(&mut self) -> Option<(String, u16)> {
        self.result.clone()
    }
}

/// Simulated updater with a scripted outcome, recording requested URLs.
#[derive(Clone)]
pub struct SimUpdater {
    inner: Rc<RefCell<SimUpdaterState>>,
}

#[derive(Default)]
struct SimUpdaterState {
    fail: bool,
    applied: Vec<String>,
}

impl SimUpdater {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimUpdaterState::default())),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.inner.borrow_mut().fail = fail;
    }

    pub fn applied(&self) -> Vec<String> {
        self.inner.borrow().applied.clone()
    }
}

impl Default for SimUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmwareUpdater for SimUpdater {
    fn apply(&mut self, url: &str, _sha256: Option<&str>) -> Result<(), DriverError> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail {
            return Err("image verification failed".into());
        }
        inner.applied.push(url.to_owned());
        Ok(())
    }
}
