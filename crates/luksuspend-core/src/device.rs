use std::fmt;
use std::path::PathBuf;

/// Key file declared for a mapping in crypttab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyfile {
    pub path: PathBuf,
    pub offset: Option<u64>,
}

impl Keyfile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A mapped LUKS device taking part in the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptDevice {
    pub name: String,
    pub is_root_device: bool,
    pub keyfile: Option<Keyfile>,
}

impl CryptDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_root_device: false,
            keyfile: None,
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self {
            is_root_device: true,
            ..Self::new(name)
        }
    }

    pub fn with_keyfile(mut self, keyfile: Keyfile) -> Self {
        self.keyfile = Some(keyfile);
        self
    }
}

impl fmt::Display for CryptDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.is_root_device {
            write!(f, " (root)")?;
        }
        if let Some(keyfile) = &self.keyfile {
            write!(f, " keyfile={}", keyfile.path.display())?;
            if let Some(offset) = keyfile.offset {
                write!(f, "@{offset}")?;
            }
        }
        Ok(())
    }
}

/// Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspendMode {
    #[default]
    Ram,
    Disk,
    /// Hybrid sleep: write the image to disk, then suspend to RAM.
    Both,
    /// Run the whole transaction without sleeping.
    None,
}

impl SuspendMode {
    /// Verb handed to hook scripts, following systemd-sleep naming.
    pub fn verb(self) -> &'static str {
        match self {
            SuspendMode::Ram => "suspend",
            SuspendMode::Disk => "hibernate",
            SuspendMode::Both => "hybrid-sleep",
            SuspendMode::None => "none",
        }
    }
}
