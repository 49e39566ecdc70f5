pub mod config;
pub mod crypttab;
pub mod device;
pub mod error;
pub mod handoff;
pub mod logging;
pub mod mounts;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod rollback;
pub mod workflow;

pub use config::LuksuspendConfig;
pub use device::{CryptDevice, Keyfile, SuspendMode};
pub use error::{DiscoveryError, LuksError, LuksResult};
pub use policy::{Escalation, FailureContext, FailurePolicy};
pub use registry::{DeviceRegistry, DeviceSource};
pub use rollback::{ActionId, RollbackStack};
pub use workflow::{
    InnerCollaborators, InnerOrchestrator, InnerReport, InnerSettings, OuterCollaborators,
    OuterOrchestrator, OuterSettings, TransactionReport,
};
