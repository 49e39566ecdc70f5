//! Full-system side of the transaction.

use super::log_working_set;
use crate::device::{CryptDevice, SuspendMode};
use crate::error::LuksResult;
use crate::handoff;
use crate::policy::FailurePolicy;
use crate::provider::{
    ContextLauncher, CryptController, FilesystemController, HookPhase, HookRunner,
    PowerController, ServiceController, Terminal,
};
use crate::registry::DeviceSource;
use crate::rollback::{ActionId, RollbackStack};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Everything the outer orchestrator talks to.
#[derive(Clone, Copy)]
pub struct OuterCollaborators<'a> {
    pub terminal: &'a dyn Terminal,
    pub registry: &'a dyn DeviceSource,
    pub hooks: &'a dyn HookRunner,
    pub services: &'a dyn ServiceController,
    pub filesystems: &'a dyn FilesystemController,
    pub launcher: &'a dyn ContextLauncher,
    pub crypt: &'a dyn CryptController,
    pub power: &'a dyn PowerController,
}

#[derive(Debug, Clone)]
pub struct OuterSettings {
    pub mode: SuspendMode,
    /// Units stopped for the duration of the transaction.
    pub services: Vec<String>,
    pub initramfs_dir: PathBuf,
    /// Top-level host directories bound into the initramfs.
    pub binds: Vec<String>,
}

/// What the transaction actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionReport {
    pub devices: Vec<CryptDevice>,
    pub direct_suspend: bool,
    pub stopped_services: Vec<String>,
    pub barriers_disabled: Vec<String>,
    pub handed_off: bool,
    pub unlocked: Vec<String>,
}

pub struct OuterOrchestrator<'a> {
    parts: OuterCollaborators<'a>,
    settings: OuterSettings,
    policy: FailurePolicy<'a>,
    hooks_armed: bool,
}

impl<'a> OuterOrchestrator<'a> {
    pub fn new(
        parts: OuterCollaborators<'a>,
        settings: OuterSettings,
        policy: FailurePolicy<'a>,
    ) -> Self {
        Self {
            parts,
            settings,
            policy,
            hooks_armed: false,
        }
    }

    /// Run the whole transaction. Every recorded reversal runs before this
    /// returns, whether the forward steps completed or not.
    pub fn run(mut self) -> LuksResult<TransactionReport> {
        let mut stack = RollbackStack::new();
        let mut report = TransactionReport::default();

        let outcome = self.advance(&mut stack, &mut report);
        if let Err(err) = &outcome {
            warn!("suspend transaction aborted: {err}");
        }

        if self.hooks_armed {
            debug!("running post-suspend hooks");
            if let Err(err) = self.parts.hooks.run(HookPhase::Post, self.settings.mode) {
                warn!("post-suspend hooks: {err}");
            }
        }

        let unwound = stack.unwind_all(&self.policy);

        outcome?;
        unwound?;
        Ok(report)
    }

    fn advance(
        &mut self,
        stack: &mut RollbackStack<'a>,
        report: &mut TransactionReport,
    ) -> LuksResult<()> {
        let parts = self.parts;
        let mode = self.settings.mode;

        debug!("disabling ISIG in TTY");
        match parts.terminal.suppress_interrupts() {
            Ok(()) => {
                stack.push("restore tty", move || parts.terminal.restore());
            }
            Err(err) => warn!("unable to suppress terminal interrupts: {err}"),
        }

        debug!("gathering cryptdevices");
        let devices = self
            .policy
            .require("discover cryptdevices", parts.registry.discover())?
            .unwrap_or_default();
        log_working_set(&devices);

        if devices.is_empty() {
            self.policy.relax();
            warn!("no cryptdevices found, doing normal suspend");
            self.policy.require("suspend", parts.power.suspend(mode))?;
            report.direct_suspend = true;
            return Ok(());
        }

        debug!("checking suspend program in initramfs");
        self.policy
            .require("check initramfs", parts.launcher.preflight())?;

        debug!("running pre-suspend hooks");
        self.policy
            .require("pre-suspend hooks", parts.hooks.run(HookPhase::Pre, mode))?;
        self.hooks_armed = true;

        let restart = self.quiesce_services(stack, report)?;
        self.disable_barriers(stack, report)?;
        self.enter_initramfs(&devices, stack, report)?;

        // udevd must be back before resumed devices show up
        if let Some(id) = restart {
            debug!("starting previously stopped services");
            stack.fire(id, &self.policy)?;
        }

        // root is unlocked again, remaining failures are lower stakes
        self.policy.relax();
        report.devices = devices;
        self.unlock_remaining(report)
    }

    fn quiesce_services(
        &mut self,
        stack: &mut RollbackStack<'a>,
        report: &mut TransactionReport,
    ) -> LuksResult<Option<ActionId>> {
        let services = self.parts.services;
        debug!("stopping selected system services");
        let mut stopped = Vec::new();
        let result = services.stop(&self.settings.services, &mut stopped);

        // whatever went down comes back up, even if a later unit failed
        let restart = if stopped.is_empty() {
            None
        } else {
            report.stopped_services = stopped.clone();
            Some(stack.push("restart services", move || services.start(&stopped)))
        };

        self.policy.require("stop services", result)?;
        Ok(restart)
    }

    fn disable_barriers(
        &mut self,
        stack: &mut RollbackStack<'a>,
        report: &mut TransactionReport,
    ) -> LuksResult<()> {
        let filesystems = self.parts.filesystems;

        debug!("flushing pending writes");
        filesystems.sync();

        let mounts = self
            .policy
            .require("list filesystems", filesystems.mounted())?
            .unwrap_or_default();

        let mut seen = HashSet::new();
        for mount in mounts.into_iter().filter(|m| m.barrier_enabled()) {
            if !seen.insert(mount.mountpoint.clone()) {
                continue;
            }
            let mountpoint = mount.mountpoint;
            debug!("disabling write barrier on {mountpoint}");
            let step = format!("disable write barrier on {mountpoint}");
            let disabled = self
                .policy
                .require(&step, filesystems.set_barrier(&mountpoint, false))?;
            if disabled.is_some() {
                report.barriers_disabled.push(mountpoint.clone());
                stack.push(format!("re-enable write barrier on {mountpoint}"), move || {
                    filesystems.set_barrier(&mountpoint, true)
                });
            }
        }
        Ok(())
    }

    fn enter_initramfs(
        &mut self,
        devices: &[CryptDevice],
        stack: &mut RollbackStack<'a>,
        report: &mut TransactionReport,
    ) -> LuksResult<()> {
        let filesystems = self.parts.filesystems;

        debug!("preparing initramfs chroot");
        for name in &self.settings.binds {
            let source = Path::new("/").join(name);
            let target = self.settings.initramfs_dir.join(name);
            let step = format!("bind {} to {}", source.display(), target.display());
            if self
                .policy
                .require(&step, filesystems.bind(&source, &target))?
                .is_some()
            {
                stack.push(format!("unmount {}", target.display()), move || {
                    filesystems.unbind(&target)
                });
            }
        }

        let payload = self
            .policy
            .require("encode cryptdevices", handoff::encode(devices))?
            .unwrap_or_default();

        info!("suspending in initramfs chroot");
        let launched = self
            .policy
            .require("suspend in initramfs", self.parts.launcher.launch(&payload))?;
        report.handed_off = launched.is_some();
        Ok(())
    }

    fn unlock_remaining(&mut self, report: &mut TransactionReport) -> LuksResult<()> {
        debug!("gathering keyfiles from crypttab");
        self.policy.require(
            "gather keyfiles",
            self.parts.registry.enrich_keyfiles(&mut report.devices),
        )?;
        log_working_set(&report.devices);

        for device in report.devices.iter().filter(|d| !d.is_root_device) {
            debug!("resuming cryptdevice {}", device.name);
            let step = format!("unlock {}", device.name);
            if self
                .policy
                .require(&step, self.parts.crypt.resume(device))?
                .is_some()
            {
                report.unlocked.push(device.name.clone());
            }
        }
        Ok(())
    }
}
