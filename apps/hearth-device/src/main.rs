use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use hearth_bus::MemoryTransport;
use hearth_config::ConfigStore;
use hearth_device::controller::{Controller, ControllerParts, RunOutcome};
use hearth_device::drivers::{
    FixedLocator, NullProvisioner, SimLed, SimSensor, SimUpdater, SimWatchdog,
};
use hearth_device::failsafe::{BootDecision, BootGuard};
use hearth_device::BootPhase;
use hearth_net::{FakeInterface, FakeNetwork, LinkConfig, LinkManager, LinkProfile};
use hearth_sched::{now_ms, ExponentialBackoff};
use log::{error, info};

/// Environmental sensor node running against simulated hardware.
#[derive(Parser, Debug)]
#[command(name = "hearth-device", version)]
struct Args {
    /// Directory for config, boot record, and crash log files.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Device identifier used in topics and discovery payloads.
    #[arg(long, default_value = "hearthsim1")]
    device_id: String,

    /// Clear the boot counter and recovery flag, then exit.
    #[arg(long)]
    clear_recovery: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = std::fs::create_dir_all(&args.data_dir) {
        error!("cannot create data dir {}: {err}", args.data_dir.display());
        return ExitCode::FAILURE;
    }

    let guard = BootGuard::new(&args.data_dir);
    if args.clear_recovery {
        guard.clear();
        info!("boot counter and recovery flag cleared");
        return ExitCode::SUCCESS;
    }

    BootPhase::Start.log();
    BootPhase::RecoveryCheck.log();
    let now_secs = now_ms() / 1000;
    if let Some(flag) = guard.recovery_flag() {
        error!(
            "recovery mode: reason={} timestamp={}",
            flag.reason, flag.timestamp
        );
        let crash_log = guard.crash_log();
        if !crash_log.is_empty() {
            error!("crash log:\n{crash_log}");
        }
        error!("fix the cause, then run with --clear-recovery to re-arm");
        return ExitCode::from(2);
    }
    if guard.check_and_record_boot(now_secs) == BootDecision::Recovery {
        error!("boot loop detected, entering recovery on next start");
        return ExitCode::from(2);
    }

    let store = ConfigStore::new(args.data_dir.join("config.json"));
    let mut config = store.load();
    if config.wifi.profiles.is_empty() {
        // Nothing provisioned yet: give the simulated radio something to
        // associate with so the demo comes up end to end.
        config.wifi.profiles.push(LinkProfile {
            ssid: "sim".to_owned(),
            credential: "sim".to_owned(),
            priority: 1,
        });
        if let Err(err) = store.save(&config) {
            error!("cannot seed config: {err}");
            return ExitCode::FAILURE;
        }
    }

    let networks = config
        .wifi
        .profiles
        .iter()
        .enumerate()
        .map(|(i, profile)| FakeNetwork::new(&profile.ssid, &profile.credential, -45 - i as i32 * 10))
        .collect();
    let radio = FakeInterface::new(networks);
    let link = LinkManager::new(
        Box::new(radio),
        LinkConfig {
            connect_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            rotation_delay: Duration::from_millis(200),
            max_rotations: 3,
        },
    );

    let sensor = SimSensor::new(21.5, 45.0);
    sensor.set_drift(true);

    let parts = ControllerParts {
        device_id: args.device_id,
        store,
        link,
        transport: Some(Box::new(MemoryTransport::new())),
        sensor: Box::new(sensor),
        led: Box::new(SimLed::new()),
        updater: Box::new(SimUpdater::new()),
        watchdog: Box::new(SimWatchdog::new()),
        locator: Box::new(FixedLocator::new("sim-broker", 1883)),
        provisioner: Box::new(NullProvisioner),
        bus_backoff: ExponentialBackoff::default(),
        tick_interval: Duration::from_millis(10),
    };

    let mut controller = Controller::new(parts, now_ms());
    if let Err(err) = controller.init() {
        error!("init failed: {err}");
        guard.log_crash(&format!("init failed: {err}"), now_secs);
        return ExitCode::FAILURE;
    }

    let running = Arc::new(AtomicBool::new(true));
    let ctrlc_flag = running.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        ctrlc_flag.store(false, Ordering::SeqCst);
    }) {
        error!("cannot install signal handler: {err}");
        return ExitCode::FAILURE;
    }

    match controller.run_guarded(&running, &guard) {
        RunOutcome::Shutdown => ExitCode::SUCCESS,
        RunOutcome::RestartRequested => {
            info!("exiting for restart");
            // Distinct code so a supervisor can restart instead of stop.
            ExitCode::from(3)
        }
        RunOutcome::Crashed => {
            // Pause so a persistent crash does not spin the supervisor; the
            // boot guard catches the loop if it keeps happening.
            error!("restarting after crash");
            thread::sleep(Duration::from_secs(5));
            ExitCode::from(3)
        }
    }
}
