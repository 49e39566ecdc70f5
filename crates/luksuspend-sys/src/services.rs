use crate::command::CommandRunner;
use log::debug;
use luksuspend_core::config::LuksuspendConfig;
use luksuspend_core::error::LuksResult;
use luksuspend_core::provider::ServiceController;
use luksuspend_core::retry::with_retries;
use std::time::Duration;

pub const DEFAULT_SYSTEMCTL_PATHS: &[&str] = &["/usr/bin/systemctl", "/bin/systemctl"];

/// Delay between `systemctl` retries.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// `systemctl` backed service control.
#[derive(Debug, Clone)]
pub struct SystemdServices {
    systemctl: CommandRunner,
    retries: u32,
    retry_delay: Duration,
}

impl SystemdServices {
    pub fn new(systemctl: CommandRunner, retries: u32) -> Self {
        Self {
            systemctl,
            retries,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn from_config(config: &LuksuspendConfig) -> LuksResult<Self> {
        let systemctl = CommandRunner::locate(
            "systemctl",
            config.commands.systemctl_path.as_deref(),
            DEFAULT_SYSTEMCTL_PATHS,
            config.command_timeout(),
        )?;
        Ok(Self::new(systemctl, config.commands.retries))
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn is_active(&self, unit: &str) -> LuksResult<bool> {
        let out = self.systemctl.run(&["is-active", unit])?;
        Ok(out.status == 0 && out.stdout.trim() == "active")
    }

    fn invoke(&self, verb: &str, units: &[String]) -> LuksResult<()> {
        let mut args = vec![verb];
        args.extend(units.iter().map(String::as_str));
        let what = format!("systemctl {verb}");
        with_retries(&what, self.retries, self.retry_delay, || {
            self.systemctl.run_checked(&args).map(|_| ())
        })
    }
}

impl ServiceController for SystemdServices {
    fn stop(&self, units: &[String], stopped: &mut Vec<String>) -> LuksResult<()> {
        let mut running = Vec::new();
        for unit in units {
            if self.is_active(unit)? {
                running.push(unit.clone());
            } else {
                debug!("{unit} is not active");
            }
        }
        // one unit per call so a failure leaves an exact record of what is down
        for unit in running {
            self.invoke("stop", std::slice::from_ref(&unit))?;
            stopped.push(unit);
        }
        Ok(())
    }

    fn start(&self, units: &[String]) -> LuksResult<()> {
        if units.is_empty() {
            return Ok(());
        }
        self.invoke("start", units)
    }
}
