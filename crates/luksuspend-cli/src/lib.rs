//! Flag handling shared by the `luksuspend` and `luksuspend-initramfs`
//! binaries.

use anyhow::{bail, Context, Result};
use clap::Args;
use luksuspend_core::{FailureContext, LuksuspendConfig, SuspendMode};
use std::path::Path;

/// Sleep mode and failure handling. The outer binary forwards these to the
/// inner one so both halves of the transaction agree.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspendArgs {
    /// Suspend to RAM (default).
    #[arg(long, conflicts_with_all = ["disk", "hybrid", "no_suspend"])]
    pub ram: bool,

    /// Hibernate to disk.
    #[arg(long, conflicts_with_all = ["hybrid", "no_suspend"])]
    pub disk: bool,

    /// Hybrid sleep: hibernate image plus suspend to RAM.
    #[arg(long, conflicts_with = "no_suspend")]
    pub hybrid: bool,

    /// Run the whole transaction without sleeping.
    #[arg(long = "no-suspend")]
    pub no_suspend: bool,

    /// Verbose logging and a recovery shell on failure.
    #[arg(long, conflicts_with = "no_debug")]
    pub debug: bool,

    #[arg(long = "no-debug")]
    pub no_debug: bool,

    /// Power off when a step fails instead of aborting.
    #[arg(long, conflicts_with = "no_poweroff")]
    pub poweroff: bool,

    #[arg(long = "no-poweroff")]
    pub no_poweroff: bool,
}

impl SuspendArgs {
    pub fn mode(&self) -> SuspendMode {
        if self.disk {
            SuspendMode::Disk
        } else if self.hybrid {
            SuspendMode::Both
        } else if self.no_suspend {
            SuspendMode::None
        } else {
            SuspendMode::Ram
        }
    }

    pub fn failure_context(&self) -> FailureContext {
        FailureContext {
            ignore_errors: false,
            poweroff_on_error: self.poweroff,
            debug_mode: self.debug,
        }
    }

    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "warn"
        }
    }

    /// Flags for the inner binary. Only the effective settings are passed.
    pub fn forwarded(&self) -> Vec<String> {
        let mode = match self.mode() {
            SuspendMode::Ram => "--ram",
            SuspendMode::Disk => "--disk",
            SuspendMode::Both => "--hybrid",
            SuspendMode::None => "--no-suspend",
        };
        let mut args = vec![mode.to_string()];
        if self.debug {
            args.push("--debug".into());
        }
        if self.poweroff {
            args.push("--poweroff".into());
        }
        args
    }
}

/// Host settings the initramfs half needs. The chroot cannot see the host's
/// configuration file, so the outer binary passes these as flags. Binary
/// paths stay with the initramfs image and are not forwarded.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct InnerOverrides {
    /// Root unlock attempts before the failure policy is consulted.
    #[arg(long, value_name = "N")]
    pub attempts_per_round: Option<u32>,

    /// Task freeze timeout written to sysfs while sleeping.
    #[arg(long, value_name = "MS")]
    pub freeze_timeout_ms: Option<u64>,

    #[arg(long, value_name = "N")]
    pub power_retries: Option<u32>,

    #[arg(long, value_name = "MS")]
    pub power_retry_delay_ms: Option<u64>,

    #[arg(long, value_name = "SECS")]
    pub command_timeout_secs: Option<u64>,
}

impl InnerOverrides {
    pub fn from_config(config: &LuksuspendConfig) -> Self {
        Self {
            attempts_per_round: Some(config.unlock.attempts_per_round),
            freeze_timeout_ms: Some(config.power.freeze_timeout_ms),
            power_retries: Some(config.power.retries),
            power_retry_delay_ms: Some(config.power.retry_delay_ms),
            command_timeout_secs: Some(config.commands.timeout_secs),
        }
    }

    pub fn to_args(&self) -> Vec<String> {
        let flags = [
            ("--attempts-per-round", self.attempts_per_round.map(u64::from)),
            ("--freeze-timeout-ms", self.freeze_timeout_ms),
            ("--power-retries", self.power_retries.map(u64::from)),
            ("--power-retry-delay-ms", self.power_retry_delay_ms),
            ("--command-timeout-secs", self.command_timeout_secs),
        ];
        flags
            .into_iter()
            .filter_map(|(flag, value)| value.map(|v| [flag.to_string(), v.to_string()]))
            .flatten()
            .collect()
    }

    /// Overlay the forwarded values onto `config` and re-check it.
    pub fn apply(&self, config: &mut LuksuspendConfig) -> Result<()> {
        if let Some(value) = self.attempts_per_round {
            config.unlock.attempts_per_round = value;
        }
        if let Some(value) = self.freeze_timeout_ms {
            config.power.freeze_timeout_ms = value;
        }
        if let Some(value) = self.power_retries {
            config.power.retries = value;
        }
        if let Some(value) = self.power_retry_delay_ms {
            config.power.retry_delay_ms = value;
        }
        if let Some(value) = self.command_timeout_secs {
            config.commands.timeout_secs = value;
        }

        let issues = config.validate();
        if !issues.is_empty() {
            bail!("invalid forwarded settings: {}", issues.join("; "));
        }
        Ok(())
    }
}

/// Load the configuration; a missing file at the default location yields
/// the built-in defaults.
pub fn load_config(path: &Path) -> Result<LuksuspendConfig> {
    LuksuspendConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Print the JSON schema of the configuration file.
pub fn print_config_schema() -> Result<()> {
    let schema = schemars::schema_for!(LuksuspendConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        suspend: SuspendArgs,

        #[command(flatten)]
        overrides: InnerOverrides,
    }

    fn parse_all(args: &[&str]) -> Result<Harness, clap::Error> {
        Harness::try_parse_from(std::iter::once("luksuspend").chain(args.iter().copied()))
    }

    fn parse(args: &[&str]) -> Result<SuspendArgs, clap::Error> {
        parse_all(args).map(|h| h.suspend)
    }

    #[test]
    fn defaults_to_ram_with_strict_errors() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.mode(), SuspendMode::Ram);
        assert_eq!(args.failure_context(), FailureContext::default());
        assert_eq!(args.log_level(), "warn");
        assert_eq!(args.forwarded(), vec!["--ram".to_string()]);
    }

    #[test]
    fn modes_are_mutually_exclusive() {
        for pair in [
            ["--ram", "--disk"],
            ["--disk", "--hybrid"],
            ["--hybrid", "--no-suspend"],
            ["--ram", "--no-suspend"],
        ] {
            let err = parse(&pair).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict, "{pair:?}");
        }
    }

    #[test]
    fn on_off_pairs_conflict() {
        assert!(parse(&["--debug", "--no-debug"]).is_err());
        assert!(parse(&["--poweroff", "--no-poweroff"]).is_err());
        assert!(parse(&["--no-debug", "--no-poweroff"]).is_ok());
    }

    #[test]
    fn forwarded_flags_reproduce_the_selection() {
        let args = parse(&["--hybrid", "--debug", "--poweroff"]).unwrap();
        assert_eq!(args.mode(), SuspendMode::Both);
        assert_eq!(args.log_level(), "debug");
        assert_eq!(args.forwarded(), vec!["--hybrid", "--debug", "--poweroff"]);

        let owned = args.forwarded();
        let forwarded: Vec<&str> = owned.iter().map(String::as_str).collect();
        let reparsed = parse(&forwarded).unwrap();
        assert_eq!(reparsed.mode(), args.mode());
        assert_eq!(reparsed.failure_context(), args.failure_context());
    }

    #[test]
    fn host_settings_reach_the_inner_binary() {
        let mut host = LuksuspendConfig::default();
        host.unlock.attempts_per_round = 5;
        host.power.freeze_timeout_ms = 4000;
        host.power.retries = 2;
        host.power.retry_delay_ms = 10;
        host.commands.timeout_secs = 30;

        let args = InnerOverrides::from_config(&host).to_args();
        assert_eq!(
            args,
            vec![
                "--attempts-per-round",
                "5",
                "--freeze-timeout-ms",
                "4000",
                "--power-retries",
                "2",
                "--power-retry-delay-ms",
                "10",
                "--command-timeout-secs",
                "30",
            ]
        );

        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let parsed = parse_all(&argv).unwrap();
        let mut inner = LuksuspendConfig::default();
        parsed.overrides.apply(&mut inner).unwrap();

        assert_eq!(inner.unlock.attempts_per_round, 5);
        assert_eq!(inner.freeze_timeout_bytes(), b"4000".to_vec());
        assert_eq!(inner.power.retries, 2);
        assert_eq!(inner.power.retry_delay_ms, 10);
        assert_eq!(inner.commands.timeout_secs, 30);
    }

    #[test]
    fn no_forwarded_settings_keeps_the_loaded_config() {
        let parsed = parse_all(&["--ram"]).unwrap();
        assert_eq!(parsed.overrides, InnerOverrides::default());
        assert!(parsed.overrides.to_args().is_empty());

        let mut inner = LuksuspendConfig::default();
        parsed.overrides.apply(&mut inner).unwrap();
        assert_eq!(inner.unlock.attempts_per_round, 3);
    }

    #[test]
    fn forwarded_zero_attempts_is_rejected() {
        let parsed = parse_all(&["--attempts-per-round", "0"]).unwrap();
        let mut inner = LuksuspendConfig::default();
        let err = parsed.overrides.apply(&mut inner).unwrap_err().to_string();
        assert!(err.contains("attempts_per_round"), "{err}");
    }

    #[test]
    fn invalid_config_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("luksuspend.toml");
        fs::write(&path, "[unlock]\nattempts_per_round = 0\n").unwrap();

        let err = format!("{:#}", load_config(&path).unwrap_err());
        assert!(err.contains("luksuspend.toml"), "{err}");
        assert!(err.contains("attempts_per_round"), "{err}");
    }
}
