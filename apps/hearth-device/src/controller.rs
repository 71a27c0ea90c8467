//! Device orchestration: wires the link, bus session, drivers, and the
//! task schedule together and drives them from a single-threaded loop.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use hearth_bus::{BusClient, BusError, BusTransport, SessionOptions, SessionState};
use hearth_config::{ConfigError, ConfigStore, Topics, FIRMWARE_NAME};
use hearth_net::{LinkError, LinkManager};
use hearth_sched::{now_ms, ExponentialBackoff, Scheduler, TaskError, TaskStats};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use thiserror::Error;

use crate::context::NodeCtx;
use crate::discovery::{self, DeviceInfo, DISCOVERY_PREFIX};
use crate::failsafe::BootGuard;
use crate::drivers::{
    BrokerLocator, FirmwareUpdater, Provisioner, SensorDriver, StatusLed, StatusPattern, Watchdog,
};
use crate::BootPhase;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stopped on external request (signal).
    Shutdown,
    /// A restart was commanded; the supervisor should start us again.
    RestartRequested,
    /// The loop died on a panic; the crash log has the details and the
    /// supervisor should restart after a pause.
    Crashed,
}

/// Scheduler context: the node state plus the bus session. Kept as two
/// fields so a task can poll the session while handlers mutate the node.
pub struct DeviceCtx {
    pub node: NodeCtx,
    pub bus: Option<BusClient<NodeCtx>>,
}

/// Everything the controller needs injected, so tests and the host binary
/// can assemble it from simulated parts.
pub struct ControllerParts {
    pub device_id: String,
    pub store: ConfigStore,
    pub link: LinkManager,
    pub transport: Option<Box<dyn BusTransport>>,
    pub sensor: Box<dyn SensorDriver>,
    pub led: Box<dyn StatusLed>,
    pub updater: Box<dyn FirmwareUpdater>,
    pub watchdog: Box<dyn Watchdog>,
    pub locator: Box<dyn BrokerLocator>,
    pub provisioner: Box<dyn Provisioner>,
    pub bus_backoff: ExponentialBackoff,
    pub tick_interval: Duration,
}

pub struct Controller {
    ctx: DeviceCtx,
    scheduler: Scheduler<DeviceCtx>,
    watchdog: Box<dyn Watchdog>,
    transport: Option<Box<dyn BusTransport>>,
    locator: Box<dyn BrokerLocator>,
    provisioner: Box<dyn Provisioner>,
    bus_backoff: ExponentialBackoff,
    tick_interval: Duration,
}

impl Controller {
    pub fn new(parts: ControllerParts, now: u64) -> Self {
        let config = parts.store.load();
        let topics = config.topics(&parts.device_id);
        let node = NodeCtx {
            device_id: parts.device_id,
            started_ms: now,
            now_ms: now,
            store: parts.store,
            config,
            topics,
            link: parts.link,
            sensor: parts.sensor,
            led: parts.led,
            updater: parts.updater,
            last_reading: None,
            outbox: VecDeque::new(),
            restart_requested: false,
        };

        let mut controller = Self {
            ctx: DeviceCtx { node, bus: None },
            scheduler: Scheduler::new(),
            watchdog: parts.watchdog,
            transport: parts.transport,
            locator: parts.locator,
            provisioner: parts.provisioner,
            bus_backoff: parts.bus_backoff,
            tick_interval: parts.tick_interval,
        };
        controller.register_tasks();
        controller
    }

    fn register_tasks(&mut self) {
        let read_ms = self.ctx.node.config.sensor.read_interval_secs * 1000;
        let publish_ms = self.ctx.node.config.sensor.publish_interval_secs * 1000;

        self.scheduler.add_task("read_sensor", read_ms, read_sensor);
        self.scheduler
            .add_task("publish_state", publish_ms, publish_state);
        self.scheduler.add_task("bus_poll", 100, bus_poll);
        self.scheduler.add_task("led_tick", 50, |ctx: &mut DeviceCtx| {
            let now = ctx.node.now_ms;
            ctx.node.led.tick(now);
            Ok(())
        });
        self.scheduler.add_task("housekeeping", 60_000, housekeeping);
        self.scheduler
            .add_task("connection_monitor", 5_000, connection_monitor);
    }

    /// Bring everything up: link first, then the bus session and discovery
    /// announcements. A node that cannot reach the network still finishes
    /// init and runs offline; the connection monitor keeps trying.
    pub fn init(&mut self) -> Result<(), DeviceError> {
        BootPhase::ConfigLoaded.log();
        let link_up = {
            let node = &mut self.ctx.node;
            node.led.set_status(StatusPattern::Startup);

            BootPhase::LinkInit.log();
            node.link.set_profiles(node.config.wifi.profiles.clone());
            node.led.set_status(StatusPattern::Connecting);
            match node.link.connect(true) {
                Ok(()) => {
                    BootPhase::LinkReady.log();
                    true
                }
                Err(err) => {
                    BootPhase::Failed("link_connect").log();
                    warn!("link did not come up: {err}");
                    false
                }
            }
        };

        if !link_up {
            // Last resort before running offline: ask the provisioning
            // collaborator for fresh settings, persist them, and restart.
            if let Some(patch) = self.provisioner.provision() {
                info!("provisioning produced a config patch, restarting to apply");
                self.ctx.node.config = self.ctx.node.store.update(&patch)?;
                self.ctx.node.restart_requested = true;
                return Ok(());
            }
            warn!("no provisioning response, continuing without network");
        }

        if self.ctx.node.link.is_connected() && self.ctx.node.config.bus.enabled {
            self.init_bus()?;
        }

        let node = &mut self.ctx.node;
        if node.link.is_connected() {
            node.led.set_status(StatusPattern::Idle);
        } else {
            node.led.set_status(StatusPattern::Disconnected);
        }
        BootPhase::BootComplete.log();
        Ok(())
    }

    fn init_bus(&mut self) -> Result<(), DeviceError> {
        BootPhase::BusInit.log();

        if self.ctx.node.config.bus.broker.is_empty() {
            match self.locator.locate() {
                Some((host, port)) => {
                    info!("located broker at {host}:{port}");
                    let patch = json!({ "bus": { "broker": host, "port": port } });
                    self.ctx.node.config = self.ctx.node.store.update(&patch)?;
                }
                None => {
                    info!("no broker configured or locatable, running without bus");
                    return Ok(());
                }
            }
        }

        let Some(transport) = self.transport.take() else {
            return Ok(());
        };

        let node = &self.ctx.node;
        let client_id = if node.config.bus.client_id.is_empty() {
            node.device_id.clone()
        } else {
            node.config.bus.client_id.clone()
        };
        let options = SessionOptions {
            client_id,
            host: node.config.bus.broker.clone(),
            port: node.config.bus.port,
            keepalive_secs: 60,
            username: (!node.config.bus.username.is_empty())
                .then(|| node.config.bus.username.clone()),
            password: (!node.config.bus.password.is_empty())
                .then(|| node.config.bus.password.clone()),
            will: None,
        };

        let mut bus = BusClient::new(
            transport,
            options,
            &node.topics.status,
            self.bus_backoff.clone(),
        );
        register_handlers(&mut bus, &node.topics)?;

        match bus.connect() {
            Ok(()) => {
                BootPhase::BusReady.log();
                if self.ctx.node.config.bus.discovery_enabled {
                    let info = device_info(&self.ctx.node);
                    let base = self.ctx.node.topics.base.clone();
                    for (topic, payload) in
                        discovery::all_discoveries(DISCOVERY_PREFIX, &base, &info)
                    {
                        self.ctx.node.queue_json(&topic, &payload, true);
                    }
                    BootPhase::DiscoveryPublished.log();
                }
            }
            Err(err) => {
                BootPhase::Failed("bus_connect").log();
                warn!("bus connect failed, monitor will retry: {err}");
            }
        }
        self.ctx.bus = Some(bus);
        Ok(())
    }

    /// One main-loop pass: feed the watchdog, stamp the time, run due tasks.
    pub fn tick(&mut self, now: u64) {
        self.watchdog.feed();
        self.ctx.node.now_ms = now;
        self.scheduler.run_once(&mut self.ctx, now);
    }

    pub fn run(&mut self, running: &AtomicBool) -> RunOutcome {
        info!("entering main loop");
        while running.load(Ordering::SeqCst) && !self.ctx.node.restart_requested {
            self.tick(now_ms());
            thread::sleep(self.tick_interval);
        }
        let outcome = if self.ctx.node.restart_requested {
            RunOutcome::RestartRequested
        } else {
            RunOutcome::Shutdown
        };
        self.shutdown();
        outcome
    }

    /// Drive the loop with a panic net: anything unwinding out of a task or
    /// handler is appended to the crash log so the restart that follows has
    /// a diagnostic trail.
    pub fn run_guarded(&mut self, running: &AtomicBool, guard: &BootGuard) -> RunOutcome {
        match catch_unwind(AssertUnwindSafe(|| self.run(running))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_text(panic.as_ref());
                error!("main loop panicked: {message}");
                guard.log_crash(&format!("main loop panicked: {message}"), now_ms() / 1000);
                RunOutcome::Crashed
            }
        }
    }

    /// Clean teardown: offline presence, link down, light off. Retained
    /// discovery entries stay put so the node reappears after a reboot.
    pub fn shutdown(&mut self) {
        info!("shutting down");
        if let Some(bus) = &mut self.ctx.bus {
            bus.disconnect();
        }
        self.ctx.node.link.disconnect();
        self.ctx.node.led.clear();
    }

    /// Remove this node's entities from the hub for good by publishing
    /// empty retained payloads over the announced discovery topics.
    pub fn retract_discovery(&mut self) -> Result<(), DeviceError> {
        let DeviceCtx { node, bus } = &mut self.ctx;
        let Some(bus) = bus else {
            return Ok(());
        };
        let info = device_info(node);
        for topic in discovery::retraction_topics(DISCOVERY_PREFIX, &info) {
            bus.publish(&topic, b"", true)?;
        }
        Ok(())
    }

    pub fn node(&self) -> &NodeCtx {
        &self.ctx.node
    }

    pub fn node_mut(&mut self) -> &mut NodeCtx {
        &mut self.ctx.node
    }

    pub fn bus_state(&self) -> Option<SessionState> {
        self.ctx.bus.as_ref().map(|bus| bus.state())
    }

    pub fn task_stats(&self) -> Vec<TaskStats> {
        self.scheduler.stats()
    }
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

fn device_info(node: &NodeCtx) -> DeviceInfo {
    let name = if node.config.device.name.is_empty() {
        format!("hearth-{}", node.device_id)
    } else {
        node.config.device.name.clone()
    };
    DeviceInfo {
        device_id: node.device_id.clone(),
        name,
        model: FIRMWARE_NAME.to_owned(),
        manufacturer: "Hearth".to_owned(),
        sw_version: node.config.device.firmware_version.clone(),
    }
}

// --- scheduled tasks ----------------------------------------------------

fn read_sensor(ctx: &mut DeviceCtx) -> Result<(), TaskError> {
    let node = &mut ctx.node;
    let mut reading = node
        .sensor
        .read()
        .map_err(|err| TaskError(err.to_string()))?;
    reading.temperature += node.config.sensor.temp_offset;
    reading.humidity += node.config.sensor.humidity_offset;

    let significant = match node.last_reading {
        Some(prev) => {
            (reading.temperature - prev.temperature).abs()
                >= node.config.sensor.temp_change_threshold
                || (reading.humidity - prev.humidity).abs()
                    >= node.config.sensor.humidity_change_threshold
        }
        None => false,
    };
    node.last_reading = Some(reading);

    if significant {
        debug!("significant reading change, publishing immediately");
        publish_state(ctx)?;
    }
    Ok(())
}

fn publish_state(ctx: &mut DeviceCtx) -> Result<(), TaskError> {
    let DeviceCtx { node, bus } = ctx;
    let Some(bus) = bus else {
        return Ok(());
    };
    if !bus.is_connected() || node.last_reading.is_none() {
        return Ok(());
    }
    let payload = node.state_payload();
    bus.publish(&node.topics.state, payload.to_string().as_bytes(), false)
        .map_err(|err| TaskError(err.to_string()))?;
    debug!("published state: {payload}");
    Ok(())
}

fn bus_poll(ctx: &mut DeviceCtx) -> Result<(), TaskError> {
    let DeviceCtx { node, bus } = ctx;
    let Some(bus) = bus else {
        return Ok(());
    };
    if !bus.is_connected() {
        return Ok(());
    }

    bus.check_msg(node)
        .map_err(|err| TaskError(err.to_string()))?;

    while let Some(message) = node.outbox.pop_front() {
        if let Err(err) = bus.publish(&message.topic, &message.payload, message.retain) {
            // Keep the message for after the session comes back.
            node.outbox.push_front(message);
            return Err(TaskError(err.to_string()));
        }
    }
    Ok(())
}

fn housekeeping(ctx: &mut DeviceCtx) -> Result<(), TaskError> {
    let node = &ctx.node;
    let bus = match &ctx.bus {
        Some(bus) => format!("{:?}", bus.state()),
        None => "disabled".to_owned(),
    };
    info!(
        "uptime={}s link_up={} bus={bus} outbox={}",
        node.uptime_secs(),
        node.link.is_connected(),
        node.outbox.len()
    );
    Ok(())
}

fn connection_monitor(ctx: &mut DeviceCtx) -> Result<(), TaskError> {
    let DeviceCtx { node, bus } = ctx;

    if !node.link.is_connected() {
        warn!("link down, reconnecting");
        node.led.set_status(StatusPattern::Disconnected);
        match node.link.connect(false) {
            Ok(()) => node.led.set_status(StatusPattern::Idle),
            Err(err) => return Err(TaskError(err.to_string())),
        }
    }

    if let Some(bus) = bus {
        if node.link.is_connected() && !bus.is_connected() {
            warn!("bus session down, reconnecting");
            bus.reconnect().map_err(|err| TaskError(err.to_string()))?;
        }
    }
    Ok(())
}

// --- message handlers ---------------------------------------------------

fn register_handlers(bus: &mut BusClient<NodeCtx>, topics: &Topics) -> Result<(), BusError> {
    let response_topic = format!("{}/response", topics.command);
    bus.subscribe(&topics.command, move |_, payload, node: &mut NodeCtx| {
        handle_command(node, payload, &response_topic)
    })?;
    bus.subscribe(&topics.config, |_, payload, node: &mut NodeCtx| {
        handle_config(node, payload)
    })?;
    bus.subscribe(&topics.led_command, |_, payload, node: &mut NodeCtx| {
        handle_led_command(node, payload)
    })?;
    let update_status_topic = format!("{}/status", topics.update);
    bus.subscribe(&topics.update, move |_, payload, node: &mut NodeCtx| {
        handle_update(node, payload, &update_status_topic)
    })?;
    bus.set_catch_all(|topic, _, _: &mut NodeCtx| {
        debug!("bus message on '{topic}'");
        Ok(())
    });
    Ok(())
}

fn parse(payload: &[u8]) -> Result<Value, BusError> {
    serde_json::from_slice(payload).map_err(|err| BusError::Handler(err.to_string()))
}

fn handle_command(node: &mut NodeCtx, payload: &[u8], response_topic: &str) -> Result<(), BusError> {
    let command = parse(payload)?;
    match command.get("action").and_then(Value::as_str) {
        Some("restart") => {
            info!("restart commanded over the bus");
            node.restart_requested = true;
        }
        Some("scan_wifi") => {
            let networks = node
                .link
                .scan()
                .map_err(|err| BusError::Handler(err.to_string()))?;
            let networks = serde_json::to_value(&networks)
                .map_err(|err| BusError::Handler(err.to_string()))?;
            node.queue_json(response_topic, &json!({ "networks": networks }), false);
        }
        Some(other) => return Err(BusError::Handler(format!("unknown action '{other}'"))),
        None => return Err(BusError::Handler("command missing 'action'".to_owned())),
    }
    Ok(())
}

fn handle_config(node: &mut NodeCtx, payload: &[u8]) -> Result<(), BusError> {
    let patch = parse(payload)?;
    let merged = node
        .store
        .update(&patch)
        .map_err(|err| BusError::Handler(err.to_string()))?;
    node.config = merged;
    // Interval and topic changes take effect on the next restart.
    info!("configuration updated over the bus");
    Ok(())
}

fn handle_led_command(node: &mut NodeCtx, payload: &[u8]) -> Result<(), BusError> {
    let command = parse(payload)?;
    let mut state = node.led.state();

    if let Some(value) = command.get("state").and_then(Value::as_str) {
        state.on = value.eq_ignore_ascii_case("ON");
    }
    if let Some(value) = command.get("brightness").and_then(Value::as_u64) {
        state.brightness = value.min(255) as u8;
    }
    if let Some(color) = command.get("color") {
        for (i, key) in ["r", "g", "b"].iter().enumerate() {
            if let Some(value) = color.get(key).and_then(Value::as_u64) {
                state.color[i] = value.min(255) as u8;
            }
        }
    }
    if let Some(value) = command.get("effect").and_then(Value::as_str) {
        state.effect = value.to_owned();
    }

    node.led.apply(&state);
    let led_state_topic = node.topics.led_state.clone();
    let payload = node.led_state_payload();
    node.queue_json(&led_state_topic, &payload, false);
    Ok(())
}

fn handle_update(node: &mut NodeCtx, payload: &[u8], status_topic: &str) -> Result<(), BusError> {
    if !node.config.update.enabled {
        node.queue_json(status_topic, &json!({ "status": "disabled" }), false);
        return Ok(());
    }

    let command = parse(payload)?;
    let Some(url) = command.get("url").and_then(Value::as_str) else {
        return Err(BusError::Handler("update missing 'url'".to_owned()));
    };
    let sha256 = command.get("sha256").and_then(Value::as_str);
    info!("firmware update requested: {url}");
    node.queue_json(status_topic, &json!({ "status": "downloading" }), false);

    let url = url.to_owned();
    let sha256 = sha256.map(str::to_owned);
    match node.updater.apply(&url, sha256.as_deref()) {
        Ok(()) => {
            node.queue_json(status_topic, &json!({ "status": "success" }), false);
            node.restart_requested = true;
        }
        Err(err) => {
            warn!("firmware update failed: {err}");
            node.queue_json(
                status_topic,
                &json!({ "status": "failed", "message": err.to_string() }),
                false,
            );
        }
    }
    Ok(())
}
