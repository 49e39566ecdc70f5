//! Reversal actions recorded as forward steps succeed.

use crate::error::{LuksError, LuksResult};
use crate::policy::FailurePolicy;
use log::{debug, warn};

type Action<'a> = Box<dyn FnOnce() -> LuksResult<()> + 'a>;

/// Handle for firing one recorded action ahead of the final unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionId(u64);

struct Entry<'a> {
    id: u64,
    label: String,
    action: Action<'a>,
}

/// LIFO stack of reversal actions. Every action runs exactly once: through
/// `fire`, through `unwind_all`, or, as a last resort, on drop.
#[derive(Default)]
pub struct RollbackStack<'a> {
    entries: Vec<Entry<'a>>,
    next_id: u64,
}

impl<'a> RollbackStack<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Record the reversal of a forward step that has already succeeded.
    pub fn push<F>(&mut self, label: impl Into<String>, action: F) -> ActionId
    where
        F: FnOnce() -> LuksResult<()> + 'a,
    {
        let id = self.next_id;
        self.next_id += 1;
        let label = label.into();
        debug!("rollback: recorded `{label}`");
        self.entries.push(Entry {
            id,
            label,
            action: Box::new(action),
        });
        ActionId(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of pending actions, oldest first.
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    /// Run one recorded action now and forget it. A no-op if it already ran.
    pub fn fire(&mut self, id: ActionId, policy: &FailurePolicy<'_>) -> LuksResult<()> {
        let Some(pos) = self.entries.iter().position(|e| e.id == id.0) else {
            debug!("rollback: action {} already ran", id.0);
            return Ok(());
        };
        let entry = self.entries.remove(pos);
        debug!("rollback: running `{}` early", entry.label);
        policy.require(&entry.label, (entry.action)()).map(|_| ())
    }

    /// Run every pending action, most recent first.
    ///
    /// Failures go through the policy and never stop the unwind; the first
    /// one the policy refused to tolerate is returned once all actions ran.
    pub fn unwind_all(&mut self, policy: &FailurePolicy<'_>) -> LuksResult<()> {
        let mut first: Option<LuksError> = None;
        while let Some(entry) = self.entries.pop() {
            debug!("rollback: running `{}`", entry.label);
            if let Err(err) = policy.require(&entry.label, (entry.action)()) {
                warn!("rollback: continuing past failed `{}`", entry.label);
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for RollbackStack<'_> {
    fn drop(&mut self) {
        while let Some(entry) = self.entries.pop() {
            warn!("rollback: running `{}` during drop", entry.label);
            if let Err(err) = (entry.action)() {
                warn!("rollback: `{}` failed: {err}", entry.label);
            }
        }
    }
}
