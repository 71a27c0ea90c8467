pub mod context;
pub mod controller;
pub mod discovery;
pub mod drivers;
pub mod failsafe;

pub use context::{NodeCtx, OutboundPublish};
pub use controller::{Controller, ControllerParts, DeviceError, RunOutcome};

use hearth_sched::now_ms;
use log::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootPhase {
    Start,
    RecoveryCheck,
    ConfigLoaded,
    LinkInit,
    LinkReady,
    BusInit,
    BusReady,
    DiscoveryPublished,
    BootComplete,
    Failed(&'static str),
}

impl BootPhase {
    pub fn log(self) {
        let label = match self {
            BootPhase::Start => "boot_start",
            BootPhase::RecoveryCheck => "boot_recovery_check",
            BootPhase::ConfigLoaded => "boot_config_loaded",
            BootPhase::LinkInit => "boot_link_init",
            BootPhase::LinkReady => "boot_link_ready",
            BootPhase::BusInit => "boot_bus_init",
            BootPhase::BusReady => "boot_bus_ready",
            BootPhase::DiscoveryPublished => "boot_discovery_published",
            BootPhase::BootComplete => "boot_complete",
            BootPhase::Failed(reason) => {
                info!("boot_failed: {reason} t={}", now_ms());
                return;
            }
        };
        info!("{label} t={}", now_ms());
    }
}
