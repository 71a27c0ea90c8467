use std::sync::atomic::AtomicBool;
use std::time::Duration;

use hearth_bus::{MemoryTransport, SessionState};
use hearth_config::{ConfigStore, NodeConfig};
use hearth_device::controller::{Controller, ControllerParts, RunOutcome};
use hearth_device::drivers::{
    FixedProvisioner, LedState, NullLocator, NullProvisioner, SimLed, SimSensor, SimUpdater,
    SimWatchdog, StatusLed, StatusPattern,
};
use hearth_device::failsafe::BootGuard;
use hearth_net::{FakeInterface, FakeNetwork, LinkConfig, LinkManager, LinkProfile};
use hearth_sched::ExponentialBackoff;
use serde_json::{json, Value};
use tempfile::TempDir;

const BASE: &str = "home/office/a1b2c3d4";

struct Harness {
    controller: Controller,
    transport: MemoryTransport,
    radio: FakeInterface,
    sensor: SimSensor,
    led: SimLed,
    updater: SimUpdater,
    watchdog: SimWatchdog,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(dir.path().join("config.json"));

    let mut config = NodeConfig::default();
    config.device.name = "office-node".to_owned();
    config.device.location = "office".to_owned();
    config.wifi.profiles = vec![LinkProfile {
        ssid: "home".to_owned(),
        credential: "pw".to_owned(),
        priority: 1,
    }];
    config.bus.broker = "broker.local".to_owned();
    store.save(&config).unwrap();

    let radio = FakeInterface::new(vec![FakeNetwork::new("home", "pw", -45)]);
    let link = LinkManager::new(
        Box::new(radio.clone()),
        LinkConfig {
            connect_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            rotation_delay: Duration::from_millis(1),
            max_rotations: 3,
        },
    );

    let transport = MemoryTransport::new();
    let sensor = SimSensor::new(21.0, 50.0);
    let led = SimLed::new();
    let updater = SimUpdater::new();
    let watchdog = SimWatchdog::new();

    let parts = ControllerParts {
        device_id: "a1b2c3d4".to_owned(),
        store,
        link,
        transport: Some(Box::new(transport.clone())),
        sensor: Box::new(sensor.clone()),
        led: Box::new(led.clone()),
        updater: Box::new(updater.clone()),
        watchdog: Box::new(watchdog.clone()),
        locator: Box::new(NullLocator),
        provisioner: Box::new(NullProvisioner),
        bus_backoff: ExponentialBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            2.0,
            0.0,
        ),
        tick_interval: Duration::from_millis(1),
    };

    let mut controller = Controller::new(parts, 0);
    controller.init().unwrap();
    Harness {
        controller,
        transport,
        radio,
        sensor,
        led,
        updater,
        watchdog,
        _dir: dir,
    }
}

fn topics_published(transport: &MemoryTransport, topic: &str) -> Vec<Value> {
    transport
        .published()
        .iter()
        .filter(|record| record.topic == topic)
        .map(|record| serde_json::from_slice(&record.payload).unwrap())
        .collect()
}

#[test]
fn init_brings_up_link_session_and_discovery() {
    let mut h = harness();

    assert_eq!(h.radio.attempt_log(), vec!["home"]);
    assert_eq!(h.controller.bus_state(), Some(SessionState::Connected));

    let will = h.transport.last_options().unwrap().will.unwrap();
    assert_eq!(will.topic, format!("{BASE}/status"));
    assert_eq!(will.payload, b"offline");

    // First pass: sensor read, state publish, discovery drain.
    h.controller.tick(0);

    let states = topics_published(&h.transport, &format!("{BASE}/state"));
    assert_eq!(states.len(), 1);
    assert_eq!(states[0]["temperature"], 21.0);
    assert_eq!(states[0]["humidity"], 50.0);
    assert_eq!(states[0]["rssi"], -45);

    let discovery: Vec<_> = h
        .transport
        .published()
        .into_iter()
        .filter(|record| record.topic.starts_with("homeassistant/"))
        .collect();
    assert_eq!(discovery.len(), 5);
    assert!(discovery.iter().all(|record| record.retain));
}

#[test]
fn significant_change_publishes_between_intervals() {
    let mut h = harness();
    h.controller.tick(0);
    h.transport.clear_published();

    // 0.8 degrees is over the 0.5 threshold: publish immediately even
    // though the periodic publish is not due until 30s.
    h.sensor.set_reading(21.8, 50.0);
    h.controller.tick(10_000);
    assert_eq!(
        topics_published(&h.transport, &format!("{BASE}/state")).len(),
        1
    );

    // A 0.1 degree wiggle is not significant; nothing new at 20s.
    h.sensor.set_reading(21.9, 50.0);
    h.controller.tick(20_000);
    assert_eq!(
        topics_published(&h.transport, &format!("{BASE}/state")).len(),
        1
    );

    // The periodic publish fires at 30s regardless of change size.
    h.controller.tick(30_000);
    assert_eq!(
        topics_published(&h.transport, &format!("{BASE}/state")).len(),
        2
    );
}

#[test]
fn restart_command_sets_the_flag() {
    let mut h = harness();
    h.controller.tick(0);

    h.transport
        .push_inbound(&format!("{BASE}/command"), br#"{"action":"restart"}"#);
    h.controller.tick(100);

    assert!(h.controller.node().restart_requested);
}

#[test]
fn scan_command_replies_on_the_response_topic() {
    let mut h = harness();
    h.controller.tick(0);

    h.transport
        .push_inbound(&format!("{BASE}/command"), br#"{"action":"scan_wifi"}"#);
    h.controller.tick(100);
    // The reply is queued by the handler and drained on the next poll.
    h.controller.tick(200);

    let replies = topics_published(&h.transport, &format!("{BASE}/command/response"));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["networks"][0]["ssid"], "home");
}

#[test]
fn config_update_merges_and_persists() {
    let mut h = harness();
    h.controller.tick(0);

    h.transport.push_inbound(
        &format!("{BASE}/config"),
        br#"{"sensor":{"read_interval_secs":5}}"#,
    );
    h.controller.tick(100);

    let node = h.controller.node();
    assert_eq!(node.config.sensor.read_interval_secs, 5);
    // Untouched fields survived the merge, and the store has the result.
    assert_eq!(node.config.device.name, "office-node");
    assert_eq!(node.store.load().sensor.read_interval_secs, 5);
}

#[test]
fn led_command_applies_state_and_reports_it() {
    let mut h = harness();
    h.controller.tick(0);

    h.transport.push_inbound(
        &format!("{BASE}/led/command"),
        br#"{"state":"ON","brightness":200,"color":{"r":10,"g":20,"b":30},"effect":"breathing"}"#,
    );
    h.controller.tick(100);
    h.controller.tick(200);

    let state = h.led.current_state();
    assert!(state.on);
    assert_eq!(state.brightness, 200);
    assert_eq!(state.color, [10, 20, 30]);
    assert_eq!(state.effect, "breathing");

    let reports = topics_published(&h.transport, &format!("{BASE}/led/state"));
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["brightness"], 200);
    assert_eq!(reports[0]["color"], json!({"r": 10, "g": 20, "b": 30}));
}

#[test]
fn update_command_reports_progress_and_requests_restart() {
    let mut h = harness();
    h.controller.tick(0);

    h.transport.push_inbound(
        &format!("{BASE}/update"),
        br#"{"url":"http://hub.local/fw.bin","sha256":"abc123"}"#,
    );
    h.controller.tick(100);
    h.controller.tick(200);

    assert_eq!(h.updater.applied(), vec!["http://hub.local/fw.bin"]);
    let statuses = topics_published(&h.transport, &format!("{BASE}/update/status"));
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0]["status"], "downloading");
    assert_eq!(statuses[1]["status"], "success");
    assert!(h.controller.node().restart_requested);
}

#[test]
fn failed_update_reports_failure_without_restart() {
    let mut h = harness();
    h.controller.tick(0);
    h.updater.set_fail(true);

    h.transport
        .push_inbound(&format!("{BASE}/update"), br#"{"url":"http://hub.local/fw.bin"}"#);
    h.controller.tick(100);
    h.controller.tick(200);

    let statuses = topics_published(&h.transport, &format!("{BASE}/update/status"));
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[1]["status"], "failed");
    assert!(!h.controller.node().restart_requested);
}

#[test]
fn monitor_restores_a_dropped_bus_session() {
    let mut h = harness();
    h.controller.tick(0);
    assert_eq!(h.transport.open_count(), 1);

    h.transport.drop_session();
    // Monitor ran at 0, so it is due again at 5s.
    h.controller.tick(5_000);

    assert_eq!(h.transport.open_count(), 2);
    assert_eq!(h.controller.bus_state(), Some(SessionState::Connected));
    // Subscriptions were replayed into the fresh session.
    assert_eq!(h.transport.subscriptions().len(), 4);
}

#[test]
fn monitor_reconnects_a_dropped_link() {
    let mut h = harness();
    h.controller.tick(0);

    h.radio.drop_link();
    h.controller.tick(5_000);

    assert_eq!(h.radio.attempt_log(), vec!["home", "home"]);
    let history = h.led.pattern_history();
    assert!(history.contains(&StatusPattern::Disconnected));
    assert_eq!(history.last(), Some(&StatusPattern::Idle));
}

#[test]
fn watchdog_is_fed_every_pass() {
    let mut h = harness();
    for i in 0..10 {
        h.controller.tick(i * 10);
    }
    assert_eq!(h.watchdog.feeds(), 10);
}

#[test]
fn sensor_failure_is_counted_and_keeps_the_last_reading() {
    let mut h = harness();
    h.controller.tick(0);
    assert!(h.controller.node().last_reading.is_some());

    h.sensor.fail_next_reads(1);
    h.controller.tick(10_000);

    let stats = h.controller.task_stats();
    let read = stats.iter().find(|s| s.name == "read_sensor").unwrap();
    assert_eq!(read.error_count, 1);
    assert_eq!(read.run_count, 1);
    let reading = h.controller.node().last_reading.unwrap();
    assert_eq!(reading.temperature, 21.0);
}

#[test]
fn failed_link_falls_back_to_provisioning_and_restarts() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(dir.path().join("config.json"));
    let mut config = NodeConfig::default();
    // Wrong credentials: association never completes.
    config.wifi.profiles = vec![LinkProfile {
        ssid: "home".to_owned(),
        credential: "stale-pw".to_owned(),
        priority: 1,
    }];
    store.save(&config).unwrap();

    let radio = FakeInterface::new(vec![FakeNetwork::new("home", "new-pw", -45)]);
    let link = LinkManager::new(
        Box::new(radio),
        LinkConfig {
            connect_timeout: Duration::from_millis(10),
            poll_interval: Duration::from_millis(1),
            rotation_delay: Duration::from_millis(1),
            max_rotations: 2,
        },
    );

    let parts = ControllerParts {
        device_id: "a1b2c3d4".to_owned(),
        store,
        link,
        transport: Some(Box::new(MemoryTransport::new())),
        sensor: Box::new(SimSensor::new(21.0, 50.0)),
        led: Box::new(SimLed::new()),
        updater: Box::new(SimUpdater::new()),
        watchdog: Box::new(SimWatchdog::new()),
        locator: Box::new(NullLocator),
        provisioner: Box::new(FixedProvisioner::new(json!({
            "wifi": { "profiles": [{ "ssid": "home", "credential": "new-pw", "priority": 1 }] }
        }))),
        bus_backoff: ExponentialBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            2.0,
            0.0,
        ),
        tick_interval: Duration::from_millis(1),
    };

    let mut controller = Controller::new(parts, 0);
    controller.init().unwrap();

    // The patch was persisted and a restart requested to apply it.
    assert!(controller.node().restart_requested);
    let reloaded = controller.node().store.load();
    assert_eq!(reloaded.wifi.profiles[0].credential, "new-pw");
}

/// LED driver that wedges once the loop starts ticking it.
struct WedgedLed;

impl StatusLed for WedgedLed {
    fn set_status(&mut self, _pattern: StatusPattern) {}
    fn apply(&mut self, _state: &LedState) {}
    fn state(&self) -> LedState {
        LedState::default()
    }
    fn tick(&mut self, _now_ms: u64) {
        panic!("led driver wedged");
    }
    fn clear(&mut self) {}
}

#[test]
fn panic_in_the_loop_lands_in_the_crash_log() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::new(dir.path().join("config.json"));
    let mut config = NodeConfig::default();
    config.wifi.profiles = vec![LinkProfile {
        ssid: "home".to_owned(),
        credential: "pw".to_owned(),
        priority: 1,
    }];
    config.bus.enabled = false;
    store.save(&config).unwrap();

    let radio = FakeInterface::new(vec![FakeNetwork::new("home", "pw", -45)]);
    let link = LinkManager::new(
        Box::new(radio),
        LinkConfig {
            connect_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            rotation_delay: Duration::from_millis(1),
            max_rotations: 1,
        },
    );

    let parts = ControllerParts {
        device_id: "a1b2c3d4".to_owned(),
        store,
        link,
        transport: None,
        sensor: Box::new(SimSensor::new(21.0, 50.0)),
        led: Box::new(WedgedLed),
        updater: Box::new(SimUpdater::new()),
        watchdog: Box::new(SimWatchdog::new()),
        locator: Box::new(NullLocator),
        provisioner: Box::new(NullProvisioner),
        bus_backoff: ExponentialBackoff::default(),
        tick_interval: Duration::from_millis(1),
    };

    let mut controller = Controller::new(parts, 0);
    controller.init().unwrap();

    let guard = BootGuard::new(dir.path());
    let running = AtomicBool::new(true);
    let outcome = controller.run_guarded(&running, &guard);

    assert_eq!(outcome, RunOutcome::Crashed);
    let log = guard.crash_log();
    assert!(log.contains("main loop panicked"));
    assert!(log.contains("led driver wedged"));
}

#[test]
fn retract_discovery_clears_retained_entities() {
    let mut h = harness();
    h.controller.tick(0);
    h.transport.clear_published();

    h.controller.retract_discovery().unwrap();

    let retracted: Vec<_> = h
        .transport
        .published()
        .into_iter()
        .filter(|record| record.topic.starts_with("homeassistant/"))
        .collect();
    assert_eq!(retracted.len(), 5);
    assert!(retracted.iter().all(|r| r.retain && r.payload.is_empty()));
}
