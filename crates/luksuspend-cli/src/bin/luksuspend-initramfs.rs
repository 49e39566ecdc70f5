//! Runs chrooted inside the initramfs: reads the device list on fd 3, locks
//! everything, sleeps and unlocks the root device.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, warn};
use luksuspend_cli::{load_config, InnerOverrides, SuspendArgs};
use luksuspend_core::config::DEFAULT_CONFIG_PATH;
use luksuspend_core::crypttab::CrypttabFile;
use luksuspend_core::error::{LuksError, LuksResult};
use luksuspend_core::provider::DeviceEventDaemon;
use luksuspend_core::{
    logging, DeviceRegistry, FailurePolicy, InnerCollaborators, InnerOrchestrator, InnerSettings,
};
use luksuspend_sys::{Cryptsetup, HandoffReceiver, SysfsPower, SystemEscalation, Udev};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "luksuspend-initramfs",
    version,
    about = "Initramfs half of luksuspend; started by luksuspend, not by hand"
)]
struct Cli {
    /// Path to the configuration file inside the initramfs.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(flatten)]
    suspend: SuspendArgs,

    #[command(flatten)]
    overrides: InnerOverrides,
}

/// Stands in for udev when its binaries are missing from the initramfs.
/// Only a root keyfile needs udev, so the lookup error surfaces then.
struct MissingUdev(String);

impl DeviceEventDaemon for MissingUdev {
    fn start(&self) -> LuksResult<()> {
        Err(LuksError::InvalidConfig(self.0.clone()))
    }

    fn stop(&self) -> LuksResult<()> {
        Ok(())
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.suspend.log_level());

    let channel = HandoffReceiver::inherited().context("no handoff channel on fd 3")?;
    let mut config = load_config(&cli.config)?;
    cli.overrides.apply(&mut config)?;

    let registry = DeviceRegistry::new(
        &config.registry.sysfs_root,
        &config.registry.mountinfo_path,
        CrypttabFile::new(&config.initramfs.crypttab),
    );
    let crypt = Cryptsetup::from_config(&config)?;
    let power = SysfsPower::from_config(&config);
    let escalation = SystemEscalation::new(power.clone());

    let located = Udev::from_config(&config);
    let missing;
    let udev: &dyn DeviceEventDaemon = match &located {
        Ok(udev) => udev,
        Err(err) => {
            warn!("udev unavailable: {err}");
            missing = MissingUdev(err.to_string());
            &missing
        }
    };

    let report = InnerOrchestrator::new(
        InnerCollaborators {
            registry: &registry,
            udev,
            crypt: &crypt,
            power: &power,
        },
        InnerSettings {
            mode: cli.suspend.mode(),
            freeze_timeout: config.freeze_timeout_bytes(),
            attempts_per_round: config.unlock.attempts_per_round,
        },
        FailurePolicy::new(cli.suspend.failure_context(), &escalation),
    )
    .run(channel)?;

    debug!(
        "locked {} device(s); root unlocked after {} attempt(s)",
        report.locked.len(),
        report.unlock_attempts
    );
    Ok(())
}
