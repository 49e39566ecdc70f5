//! Failure policy consulted by every step of both orchestrators.

use crate::error::{LuksError, LuksResult};
use log::{error, warn};

/// Flags that decide what a failed step does to the transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureContext {
    /// Log and continue. Relaxed to true once the remaining steps are low risk.
    pub ignore_errors: bool,
    /// Power off instead of leaving the machine half locked.
    pub poweroff_on_error: bool,
    /// Drop into a recovery shell instead of aborting.
    pub debug_mode: bool,
}

/// Last-resort actions the policy can take.
pub trait Escalation {
    /// Run an interactive shell; `true` when the operator asks to proceed.
    fn recovery_shell(&self, step: &str, err: &LuksError) -> bool;

    /// Take the machine offline. Does not return on real hardware.
    fn power_off(&self);
}

pub struct FailurePolicy<'a> {
    context: FailureContext,
    escalation: &'a dyn Escalation,
}

impl<'a> FailurePolicy<'a> {
    pub fn new(context: FailureContext, escalation: &'a dyn Escalation) -> Self {
        Self {
            context,
            escalation,
        }
    }

    pub fn context(&self) -> FailureContext {
        self.context
    }

    /// Treat subsequent failures as warnings.
    pub fn relax(&mut self) {
        self.context.ignore_errors = true;
    }

    /// Make subsequent failures fatal again.
    pub fn tighten(&mut self) {
        self.context.ignore_errors = false;
    }

    /// Pass `result` through the policy.
    ///
    /// `Ok(Some(v))` when the step succeeded, `Ok(None)` when it failed but the
    /// transaction may continue, `Err` when the caller must abort. Handoff and
    /// discovery errors are never ignored.
    pub fn require<T>(&self, step: &str, result: LuksResult<T>) -> LuksResult<Option<T>> {
        let err = match result {
            Ok(value) => return Ok(Some(value)),
            Err(err) => err,
        };

        let structural = err.is_structural();
        if self.context.ignore_errors && !structural {
            warn!("{step}: {err}");
            return Ok(None);
        }

        error!("{step}: {err}");

        if self.context.debug_mode {
            if self.escalation.recovery_shell(step, &err) && !structural {
                warn!("{step}: continuing after recovery shell");
                return Ok(None);
            }
            return Err(LuksError::Aborted {
                step: step.to_string(),
                reason: err.to_string(),
            });
        }

        if self.context.poweroff_on_error {
            self.escalation.power_off();
        }

        Err(err)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingEscalation;
    use super::*;

    fn failure() -> LuksResult<()> {
        Err(LuksError::InvalidConfig("boom".into()))
    }

    #[test]
    fn success_passes_value_through() {
        let esc = RecordingEscalation::default();
        let policy = FailurePolicy::new(FailureContext::default(), &esc);
        assert_eq!(policy.require("step", Ok(7)).unwrap(), Some(7));
    }

    #[test]
    fn ignored_failure_continues() {
        let esc = RecordingEscalation::default();
        let mut policy = FailurePolicy::new(FailureContext::default(), &esc);
        policy.relax();
        assert_eq!(policy.require("step", failure()).unwrap(), None);
        assert_eq!(esc.poweroffs.get(), 0);
    }

    #[test]
    fn protocol_errors_are_never_ignored() {
        let esc = RecordingEscalation::default();
        let mut policy = FailurePolicy::new(FailureContext::default(), &esc);
        policy.relax();
        let err = policy
            .require::<()>("receive", Err(LuksError::Protocol("empty name".into())))
            .unwrap_err();
        assert!(matches!(err, LuksError::Protocol(_)));
    }

    #[test]
    fn debug_shell_can_resume_the_caller() {
        let esc = RecordingEscalation::default();
        esc.proceed.set(true);
        let ctx = FailureContext {
            debug_mode: true,
            poweroff_on_error: true,
            ..FailureContext::default()
        };
        let policy = FailurePolicy::new(ctx, &esc);
        assert_eq!(policy.require("lock", failure()).unwrap(), None);
        assert_eq!(*esc.shells.borrow(), vec!["lock".to_string()]);
        assert_eq!(esc.poweroffs.get(), 0);
    }

    #[test]
    fn debug_shell_without_proceed_aborts() {
        let esc = RecordingEscalation::default();
        let ctx = FailureContext {
            debug_mode: true,
            ..FailureContext::default()
        };
        let policy = FailurePolicy::new(ctx, &esc);
        match policy.require("lock", failure()).unwrap_err() {
            LuksError::Aborted { step, .. } => assert_eq!(step, "lock"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn poweroff_on_error_escalates() {
        let esc = RecordingEscalation::default();
        let ctx = FailureContext {
            poweroff_on_error: true,
            ..FailureContext::default()
        };
        let policy = FailurePolicy::new(ctx, &esc);
        assert!(policy.require("lock", failure()).is_err());
        assert_eq!(esc.poweroffs.get(), 1);
    }

    #[test]
    fn plain_failure_aborts_without_escalation() {
        let esc = RecordingEscalation::default();
        let policy = FailurePolicy::new(FailureContext::default(), &esc);
        assert!(policy.require("lock", failure()).is_err());
        assert_eq!(esc.poweroffs.get(), 0);
        assert!(esc.shells.borrow().is_empty());
    }
}
