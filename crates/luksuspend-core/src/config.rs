use crate::error::{LuksError, LuksResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Location consulted when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/luksuspend.toml";

/// Units that touch the root device during suspend/resume.
pub const DEFAULT_SERVICES: &[&str] = &[
    // journald may attempt to write to the root device
    "syslog.socket",
    "systemd-journald.socket",
    "systemd-journald-dev-log.socket",
    "systemd-journald-audit.socket",
    "systemd-journald.service",
    // udevd often attempts to read from the root device
    "systemd-udevd-control.socket",
    "systemd-udevd-kernel.socket",
    "systemd-udevd.service",
];

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Services {
    #[serde(default = "default_units")]
    pub units: Vec<String>,
}

fn default_units() -> Vec<String> {
    DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect()
}

impl Default for Services {
    fn default() -> Self {
        Self {
            units: default_units(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Initramfs {
    /// Unpacked initramfs image the inner binary is chrooted into.
    #[serde(default = "default_initramfs_dir")]
    pub dir: String,

    /// Path of the inner binary, relative to the initramfs root.
    #[serde(default = "default_initramfs_binary")]
    pub binary: String,

    /// Host directories bind-mounted into the initramfs before the handoff.
    #[serde(default = "default_binds")]
    pub binds: Vec<String>,

    /// crypttab consulted by the inner binary, inside the initramfs.
    #[serde(default = "default_crypttab")]
    pub crypttab: String,
}

fn default_initramfs_dir() -> String {
    "/run/initramfs".to_string()
}

fn default_initramfs_binary() -> String {
    "/suspend".to_string()
}

fn default_binds() -> Vec<String> {
    ["dev", "proc", "run", "sys"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_crypttab() -> String {
    "/etc/crypttab".to_string()
}

impl Default for Initramfs {
    fn default() -> Self {
        Self {
            dir: default_initramfs_dir(),
            binary: default_initramfs_binary(),
            binds: default_binds(),
            crypttab: default_crypttab(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Hooks {
    #[serde(default = "default_pre_dir")]
    pub pre_dir: String,

    #[serde(default = "default_post_dir")]
    pub post_dir: String,
}

fn default_pre_dir() -> String {
    "/etc/luksuspend/pre.d".to_string()
}

fn default_post_dir() -> String {
    "/etc/luksuspend/post.d".to_string()
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            pre_dir: default_pre_dir(),
            post_dir: default_post_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Power {
    #[serde(default = "default_power_retries")]
    pub retries: u32,

    #[serde(default = "default_power_delay_ms")]
    pub retry_delay_ms: u64,

    /// Task freeze timeout written while the machine sleeps.
    #[serde(default = "default_freeze_timeout_ms")]
    pub freeze_timeout_ms: u64,
}

fn default_power_retries() -> u32 {
    5
}

fn default_power_delay_ms() -> u64 {
    100
}

fn default_freeze_timeout_ms() -> u64 {
    1000
}

impl Default for Power {
    fn default() -> Self {
        Self {
            retries: default_power_retries(),
            retry_delay_ms: default_power_delay_ms(),
            freeze_timeout_ms: default_freeze_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Unlock {
    #[serde(default = "default_attempts_per_round")]
    pub attempts_per_round: u32,
}

fn default_attempts_per_round() -> u32 {
    3
}

impl Default for Unlock {
    fn default() -> Self {
        Self {
            attempts_per_round: default_attempts_per_round(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Commands {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_command_retries")]
    pub retries: u32,

    #[serde(default)]
    pub cryptsetup_path: Option<String>,

    #[serde(default)]
    pub systemctl_path: Option<String>,

    #[serde(default)]
    pub mount_path: Option<String>,

    #[serde(default)]
    pub umount_path: Option<String>,

    #[serde(default)]
    pub udevd_path: Option<String>,

    #[serde(default)]
    pub udevadm_path: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_command_retries() -> u32 {
    3
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_command_retries(),
            cryptsetup_path: None,
            systemctl_path: None,
            mount_path: None,
            umount_path: None,
            udevd_path: None,
            udevadm_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Registry {
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,

    #[serde(default = "default_mountinfo_path")]
    pub mountinfo_path: String,

    #[serde(default = "default_crypttab")]
    pub crypttab_path: String,
}

fn default_sysfs_root() -> String {
    "/sys".to_string()
}

fn default_mountinfo_path() -> String {
    "/proc/self/mountinfo".to_string()
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            mountinfo_path: default_mountinfo_path(),
            crypttab_path: default_crypttab(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LuksuspendConfig {
    #[serde(default)]
    pub services: Services,

    #[serde(default)]
    pub initramfs: Initramfs,

    #[serde(default)]
    pub hooks: Hooks,

    #[serde(default)]
    pub power: Power,

    #[serde(default)]
    pub unlock: Unlock,

    #[serde(default)]
    pub commands: Commands,

    #[serde(default)]
    pub registry: Registry,

    #[serde(skip)]
    pub path: PathBuf,
}

impl LuksuspendConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> LuksResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let mut cfg = if is_toml {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();

        let issues = cfg.validate();
        if let Some(first) = issues.into_iter().next() {
            return Err(LuksError::InvalidConfig(first));
        }

        Ok(cfg)
    }

    /// Load `path`, falling back to defaults when the default location is absent.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> LuksResult<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(LuksError::Io(err))
                if err.kind() == ErrorKind::NotFound && path == Path::new(DEFAULT_CONFIG_PATH) =>
            {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Collect human-readable problems with the configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.unlock.attempts_per_round == 0 {
            issues.push("unlock.attempts_per_round must be at least 1".to_string());
        }
        if self.power.retries == 0 {
            issues.push("power.retries must be at least 1".to_string());
        }
        if self.commands.timeout_secs == 0 {
            issues.push("commands.timeout_secs must be greater than zero".to_string());
        }
        if !self.initramfs.binary.starts_with('/') {
            issues.push(format!(
                "initramfs.binary must be an absolute path inside the initramfs (got `{}`)",
                self.initramfs.binary
            ));
        }
        for bind in &self.initramfs.binds {
            if bind.is_empty() || bind.contains('/') || bind == ".." {
                issues.push(format!(
                    "initramfs.binds entries must be top-level directory names (got `{bind}`)"
                ));
            }
        }
        issues
    }

    pub fn initramfs_dir(&self) -> PathBuf {
        PathBuf::from(&self.initramfs.dir)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs)
    }

    pub fn power_retry_delay(&self) -> Duration {
        Duration::from_millis(self.power.retry_delay_ms)
    }

    /// The freeze timeout as the bytes written to sysfs.
    pub fn freeze_timeout_bytes(&self) -> Vec<u8> {
        self.power.freeze_timeout_ms.to_string().into_bytes()
    }
}
