//! The suspend transaction, split across the two execution contexts.
//!
//! [`outer`] runs on the full system: it quiesces the root device, hands the
//! working set to the initramfs and cleans up after resume. [`inner`] runs
//! chrooted in the initramfs: it locks the devices, sleeps and unlocks root.

mod inner;
mod outer;

pub use inner::{InnerCollaborators, InnerOrchestrator, InnerReport, InnerSettings};
pub use outer::{OuterCollaborators, OuterOrchestrator, OuterSettings, TransactionReport};

use crate::device::CryptDevice;
use log::debug;

/// Dump the working set when running with debug logging.
fn log_working_set(devices: &[CryptDevice]) {
    for device in devices {
        debug!("cryptdevice: {device}");
    }
}
