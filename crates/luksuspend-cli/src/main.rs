use anyhow::Result;
use clap::Parser;
use log::{debug, info};
use luksuspend_cli::{load_config, print_config_schema, InnerOverrides, SuspendArgs};
use luksuspend_core::config::DEFAULT_CONFIG_PATH;
use luksuspend_core::{
    logging, DeviceRegistry, FailurePolicy, OuterCollaborators, OuterOrchestrator, OuterSettings,
};
use luksuspend_sys::{
    ChrootLauncher, Cryptsetup, HookDirs, HostFilesystems, SysfsPower, SystemEscalation,
    SystemdServices, TtyTerminal,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "luksuspend",
    version,
    about = "Suspend with LUKS keys wiped from memory"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print the configuration JSON schema and exit.
    #[arg(long)]
    print_config_schema: bool,

    #[command(flatten)]
    suspend: SuspendArgs,
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

    if cli.print_config_schema {
        return print_config_schema();
    }

    let config = load_config(&cli.config)?;
    debug!("configuration loaded from {}", cli.config.display());

    let terminal = TtyTerminal::stdin();
    let registry = DeviceRegistry::from_config(&config);
    let hooks = HookDirs::from_config(&config);
    let services = SystemdServices::from_config(&config)?;
    let filesystems = HostFilesystems::from_config(&config)?;
    let mut inner_args = cli.suspend.forwarded();
    inner_args.extend(InnerOverrides::from_config(&config).to_args());
    let launcher = ChrootLauncher::from_config(&config).with_args(inner_args);
    let crypt = Cryptsetup::from_config(&config)?;
    let power = SysfsPower::from_config(&config);
    let escalation = SystemEscalation::new(power.clone());

    let report = OuterOrchestrator::new(
        OuterCollaborators {
            terminal: &terminal,
            registry: &registry,
            hooks: &hooks,
            services: &services,
            filesystems: &filesystems,
            launcher: &launcher,
            crypt: &crypt,
            power: &power,
        },
        OuterSettings {
            mode: cli.suspend.mode(),
            services: config.services.units.clone(),
            initramfs_dir: config.initramfs_dir(),
            binds: config.initramfs.binds.clone(),
        },
        FailurePolicy::new(cli.suspend.failure_context(), &escalation),
    )
    .run()?;

    if report.direct_suspend {
        info!("no encrypted devices found; suspended directly");
    } else {
        info!(
            "resumed {} device(s); restarted {} service(s)",
            report.devices.len(),
            report.stopped_services.len()
        );
    }
    Ok(())
}
