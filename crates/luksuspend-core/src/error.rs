use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type LuksResult<T> = Result<T, LuksError>;

/// Reasons the registry (or the handoff encoder) refuses to name a root device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("multiple encrypted devices back the root filesystem: {}", .0.join(", "))]
    AmbiguousRootDevice(Vec<String>),

    #[error("no encrypted device backs the root filesystem")]
    NoRootDevice,
}

#[derive(Error, Debug)]
pub enum LuksError {
    #[error("[LS1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[LS1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[LS1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[LS1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[{}] {0}", discovery_code(.0))]
    Discovery(#[from] DiscoveryError),

    #[error("[LS1300] unreadable file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("[LS2000] {command} exited with code {status}: {diagnostic}")]
    ExternalCommand {
        command: String,
        status: i32,
        diagnostic: String,
    },

    #[error("[LS2100] unable to unlock {device}: {reason}")]
    Unlock { device: String, reason: String },

    #[error("[LS3000] malformed handoff payload: {0}")]
    Protocol(String),

    #[error("[LS3100] retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("[LS4000] aborted during {step}: {reason}")]
    Aborted { step: String, reason: String },
}

fn discovery_code(err: &DiscoveryError) -> &'static str {
    match err {
        DiscoveryError::AmbiguousRootDevice(_) => "LS1200",
        DiscoveryError::NoRootDevice => "LS1201",
    }
}

impl LuksError {
    pub fn code(&self) -> &'static str {
        match self {
            LuksError::Io(_) => "LS1000",
            LuksError::Toml(_) => "LS1001",
            LuksError::Yaml(_) => "LS1002",
            LuksError::InvalidConfig(_) => "LS1100",
            LuksError::Discovery(inner) => discovery_code(inner),
            LuksError::Unreadable { .. } => "LS1300",
            LuksError::ExternalCommand { .. } => "LS2000",
            LuksError::Unlock { .. } => "LS2100",
            LuksError::Protocol(_) => "LS3000",
            LuksError::RetryExhausted { .. } => "LS3100",
            LuksError::Aborted { .. } => "LS4000",
        }
    }

    /// Handoff and discovery errors describe a state no retry or shell can fix.
    pub fn is_structural(&self) -> bool {
        matches!(self, LuksError::Protocol(_) | LuksError::Discovery(_))
    }
}
