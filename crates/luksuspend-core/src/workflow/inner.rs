//! Initramfs side of the transaction.
//!
//! Everything here runs with the root filesystem's device locked, so nothing
//! may be read from the host tree: the working set arrives on the handoff
//! channel and key files come from the initramfs crypttab.

use super::log_working_set;
use crate::device::{CryptDevice, SuspendMode};
use crate::error::{LuksError, LuksResult};
use crate::handoff;
use crate::policy::FailurePolicy;
use crate::provider::{CryptController, DeviceEventDaemon, PowerController};
use crate::registry::DeviceSource;
use crate::rollback::RollbackStack;
use log::{debug, info, warn};
use std::io::Read;

#[derive(Clone, Copy)]
pub struct InnerCollaborators<'a> {
    /// Only used for key file lookups; discovery already happened outside.
    pub registry: &'a dyn DeviceSource,
    pub udev: &'a dyn DeviceEventDaemon,
    pub crypt: &'a dyn CryptController,
    pub power: &'a dyn PowerController,
}

#[derive(Debug, Clone)]
pub struct InnerSettings {
    pub mode: SuspendMode,
    /// Raw bytes written to `pm_freeze_timeout` for the duration of the sleep.
    pub freeze_timeout: Vec<u8>,
    pub attempts_per_round: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InnerReport {
    pub devices: Vec<CryptDevice>,
    pub locked: Vec<String>,
    /// Root unlock attempts, successful one included.
    pub unlock_attempts: u32,
    pub direct_suspend: bool,
}

pub struct InnerOrchestrator<'a> {
    parts: InnerCollaborators<'a>,
    settings: InnerSettings,
    policy: FailurePolicy<'a>,
}

impl<'a> InnerOrchestrator<'a> {
    pub fn new(
        parts: InnerCollaborators<'a>,
        settings: InnerSettings,
        policy: FailurePolicy<'a>,
    ) -> Self {
        Self {
            parts,
            settings,
            policy,
        }
    }

    /// Read the working set from `channel`, lock, sleep and unlock root.
    /// The channel is closed once the payload has been read.
    pub fn run<R: Read>(mut self, channel: R) -> LuksResult<InnerReport> {
        let mut stack = RollbackStack::new();
        let mut report = InnerReport::default();

        let outcome = self.advance(channel, &mut stack, &mut report);
        if let Err(err) = &outcome {
            warn!("initramfs suspend aborted: {err}");
        }
        let unwound = stack.unwind_all(&self.policy);

        outcome?;
        unwound?;
        Ok(report)
    }

    fn advance<R: Read>(
        &mut self,
        channel: R,
        stack: &mut RollbackStack<'a>,
        report: &mut InnerReport,
    ) -> LuksResult<()> {
        let parts = self.parts;

        let mut devices = self
            .policy
            .require("receive cryptdevices", receive(channel))?
            .unwrap_or_default();

        if devices.is_empty() {
            warn!("no cryptdevices received, doing normal suspend");
            self.policy.relax();
            self.policy
                .require("suspend", parts.power.suspend(self.settings.mode))?;
            report.direct_suspend = true;
            return Ok(());
        }

        debug!("gathering keyfiles from initramfs crypttab");
        self.policy.require(
            "gather keyfiles",
            parts.registry.enrich_keyfiles(&mut devices),
        )?;
        log_working_set(&devices);

        if devices[0].keyfile.is_some() {
            debug!("root keyfile present, starting udevd");
            if self
                .policy
                .require("start udevd", parts.udev.start())?
                .is_some()
            {
                stack.push("stop udevd", move || parts.udev.stop());
            }
        }

        // slot 0 is root and goes last
        for device in devices[1..].iter().chain(std::iter::once(&devices[0])) {
            debug!("suspending cryptdevice {}", device.name);
            let step = format!("lock {}", device.name);
            if self
                .policy
                .require(&step, parts.crypt.suspend(&device.name))?
                .is_some()
            {
                report.locked.push(device.name.clone());
            }
        }

        // keys are purged, there is nothing left to protect
        self.policy.relax();

        debug!("shortening task freeze timeout");
        let previous = self.policy.require(
            "set freeze timeout",
            parts.power.set_freeze_timeout(&self.settings.freeze_timeout),
        )?;
        if let Some(previous) = previous {
            stack.push("restore freeze timeout", move || {
                parts.power.set_freeze_timeout(&previous).map(|_| ())
            });
        }

        info!("entering {}", self.settings.mode.verb());
        self.policy
            .require("suspend", parts.power.suspend(self.settings.mode))?;

        report.unlock_attempts = self.resume_root(&devices[0])?;
        report.devices = devices;
        Ok(())
    }

    /// Unlock root in rounds of `attempts_per_round`. Returns the number of
    /// attempts it took.
    fn resume_root(&mut self, root: &CryptDevice) -> LuksResult<u32> {
        let per_round = self.settings.attempts_per_round.max(1);
        let mut attempts = 0;

        loop {
            let mut last_error = None;
            for _ in 0..per_round {
                attempts += 1;
                debug!("resuming root cryptdevice {} (attempt {attempts})", root.name);
                match self.parts.crypt.resume(root) {
                    Ok(()) => return Ok(attempts),
                    Err(err) => {
                        warn!("unlock {}: {err}", root.name);
                        last_error = Some(err);
                    }
                }
            }

            if !self.policy.context().poweroff_on_error {
                continue;
            }

            let err = LuksError::RetryExhausted {
                attempts: per_round,
                last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
            };
            self.policy.tighten();
            self.policy.require::<()>("resume root", Err(err))?;
            self.policy.relax();
        }
    }
}

fn receive<R: Read>(mut channel: R) -> LuksResult<Vec<CryptDevice>> {
    let mut payload = Vec::new();
    channel.read_to_end(&mut payload)?;
    drop(channel);
    handoff::decode(&payload)
}
