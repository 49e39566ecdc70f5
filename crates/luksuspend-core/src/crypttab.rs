//! `/etc/crypttab` parsing. Only the fields needed to unlock a mapping are
//! retained: name, source, key file and its offset.

use crate::device::Keyfile;
use crate::error::LuksResult;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One line of `/etc/crypttab`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrypttabEntry {
    pub name: String,
    pub source: String,
    pub key: Option<String>,
    pub options: Vec<String>,
}

impl CrypttabEntry {
    /// Key file usable with `cryptsetup --key-file`, if the entry declares one.
    pub fn keyfile(&self) -> Option<Keyfile> {
        let key = self.key.as_deref()?;
        if matches!(key, "" | "-" | "none") || (key.starts_with("/dev/") && key.ends_with("random"))
        {
            return None;
        }
        // systemd allows `path:device`; only the path half is reachable here
        let path = key.split_once(':').map(|(p, _)| p).unwrap_or(key);
        if !path.starts_with('/') {
            return None;
        }

        let offset = self
            .options
            .iter()
            .find_map(|opt| opt.strip_prefix("keyfile-offset="))
            .and_then(|value| value.parse::<u64>().ok());

        Some(Keyfile {
            path: PathBuf::from(path),
            offset,
        })
    }
}

/// Parse a crypttab document, skipping comments and malformed lines.
pub fn parse_crypttab(contents: &str) -> Vec<CrypttabEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let source = fields.next()?.to_string();
            let key = fields.next().map(str::to_string);
            let options = fields
                .next()
                .map(|opts| opts.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            Some(CrypttabEntry {
                name,
                source,
                key,
                options,
            })
        })
        .collect()
}

/// Maps device names to declared key files.
pub trait KeyfileSource {
    fn keyfile_for(&self, name: &str) -> LuksResult<Option<Keyfile>>;
}

/// Crypttab read from disk on every lookup; a missing file is an empty table.
#[derive(Debug, Clone)]
pub struct CrypttabFile {
    path: PathBuf,
}

impl CrypttabFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> LuksResult<Vec<CrypttabEntry>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(parse_crypttab(&contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl KeyfileSource for CrypttabFile {
    fn keyfile_for(&self, name: &str) -> LuksResult<Option<Keyfile>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| entry.name == name)
            .and_then(|entry| entry.keyfile()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "\
# <name> <device> <password> <options>
cryptroot UUID=1111 none luks,discard
data      UUID=2222 /etc/keys/data luks
swap      /dev/sda3 /dev/urandom swap
usbkey    UUID=3333 /keys/usb.bin:UUID=4444 luks,keyfile-offset=4096
bare      UUID=5555
";

    #[test]
    fn parse_skips_comments_and_keeps_order() {
        let entries = parse_crypttab(SAMPLE);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["cryptroot", "data", "swap", "usbkey", "bare"]);
        assert_eq!(entries[0].options, vec!["luks", "discard"]);
        assert_eq!(entries[4].key, None);
    }

    #[test]
    fn keyfile_ignores_none_and_random_sources() {
        let entries = parse_crypttab(SAMPLE);
        assert_eq!(entries[0].keyfile(), None);
        assert_eq!(entries[2].keyfile(), None);
        assert_eq!(entries[4].keyfile(), None);
        assert_eq!(entries[1].keyfile(), Some(Keyfile::new("/etc/keys/data")));
    }

    #[test]
    fn keyfile_honours_offset_and_device_suffix() {
        let entries = parse_crypttab(SAMPLE);
        assert_eq!(
            entries[3].keyfile(),
            Some(Keyfile::new("/keys/usb.bin").with_offset(4096))
        );
    }

    #[test]
    fn crypttab_file_treats_missing_file_as_empty() {
        let dir = tempdir().unwrap();
        let table = CrypttabFile::new(dir.path().join("crypttab"));
        assert!(table.entries().unwrap().is_empty());
        assert_eq!(table.keyfile_for("data").unwrap(), None);
    }

    #[test]
    fn crypttab_file_looks_up_by_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crypttab");
        fs::write(&path, SAMPLE).unwrap();
        let table = CrypttabFile::new(&path);
        assert_eq!(
            table.keyfile_for("data").unwrap(),
            Some(Keyfile::new("/etc/keys/data"))
        );
        assert_eq!(table.keyfile_for("missing").unwrap(), None);
    }
}
