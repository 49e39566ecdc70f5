//! Helpers for turning `/proc/mounts` and `/proc/self/mountinfo` into data
//! structures the registry and the barrier step can reason about.

/// One line of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub mountpoint: String,
    pub fstype: String,
    pub options: Vec<String>,
}

/// Filesystems whose mount options expose a write barrier toggle.
const BARRIER_FILESYSTEMS: &[&str] = &["ext3", "ext4", "btrfs"];

impl MountEntry {
    /// Whether barriers are currently on for this mount.
    ///
    /// Only filesystems with a `nobarrier` remount option are considered; the
    /// default for those is barriers on.
    pub fn barrier_enabled(&self) -> bool {
        if !BARRIER_FILESYSTEMS.contains(&self.fstype.as_str()) {
            return false;
        }
        let mut enabled = true;
        for opt in &self.options {
            match opt.as_str() {
                "nobarrier" | "barrier=0" => enabled = false,
                "barrier" | "barrier=1" => enabled = true,
                _ => {}
            }
        }
        enabled
    }
}

/// The subset of a mountinfo line needed to find the device behind `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfoEntry {
    /// `major:minor` as reported by the kernel.
    pub devnum: String,
    pub mountpoint: String,
    pub fstype: String,
    pub source: String,
}

/// Parse `/proc/mounts`.
pub fn parse_proc_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = unescape_mount_field(parts.next()?);
            let mountpoint = unescape_mount_field(parts.next()?);
            let fstype = parts.next()?.to_string();
            let options = parts
                .next()
                .map(|opts| opts.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            Some(MountEntry {
                source,
                mountpoint,
                fstype,
                options,
            })
        })
        .collect()
}

/// Parse `/proc/self/mountinfo`.
///
/// Optional fields between the mount options and the `-` separator vary in
/// number, so the fs type and source are read relative to the separator.
pub fn parse_mountinfo(contents: &str) -> Vec<MountInfoEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let sep = fields.iter().position(|f| *f == "-")?;
            if sep < 5 || fields.len() < sep + 3 {
                return None;
            }
            Some(MountInfoEntry {
                devnum: fields[2].to_string(),
                mountpoint: unescape_mount_field(fields[4]),
                fstype: fields[sep + 1].to_string(),
                source: unescape_mount_field(fields[sep + 2]),
            })
        })
        .collect()
}

/// The entry currently visible at `/`; later mounts shadow earlier ones.
pub fn root_mount(entries: &[MountInfoEntry]) -> Option<&MountInfoEntry> {
    entries.iter().rev().find(|entry| entry.mountpoint == "/")
}

/// Decode the octal escapes (`\040` and friends) the kernel uses in mount
/// tables. Escaped bytes are reassembled before UTF-8 decoding, so multi-byte
/// names survive.
pub fn unescape_mount_field(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] == b'\\' {
            let digits = bytes[idx + 1..]
                .iter()
                .take(3)
                .take_while(|&&b| (b'0'..=b'7').contains(&b))
                .count();
            if digits == 3 {
                let oct = &input[idx + 1..idx + 4];
                if let Ok(value) = u8::from_str_radix(oct, 8) {
                    output.push(value);
                    idx += 4;
                    continue;
                }
            }
        }
        output.push(bytes[idx]);
        idx += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
/dev/mapper/cryptroot / ext4 rw,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
/dev/mapper/data /data ext4 rw,relatime,nobarrier 0 0
/dev/mapper/data /srv/my\\040files btrfs rw,barrier=1 0 0
tmpfs /tmp tmpfs rw 0 0
";

    const MOUNTINFO: &str = "\
22 1 0:21 / /proc rw,nosuid shared:12 - proc proc rw
1 0 254:0 / / rw,relatime shared:1 - ext4 /dev/mapper/cryptroot rw
40 1 254:1 / /data rw,relatime shared:30 master:2 - ext4 /dev/mapper/data rw
";

    #[test]
    fn parse_proc_mounts_unescapes_fields() {
        let entries = parse_proc_mounts(MOUNTS);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[3].mountpoint, "/srv/my files");
        assert_eq!(entries[0].options, vec!["rw", "relatime"]);
    }

    #[test]
    fn barrier_detection_follows_options() {
        let entries = parse_proc_mounts(MOUNTS);
        assert!(entries[0].barrier_enabled());
        assert!(!entries[1].barrier_enabled());
        assert!(!entries[2].barrier_enabled());
        assert!(entries[3].barrier_enabled());
        assert!(!entries[4].barrier_enabled());
    }

    #[test]
    fn parse_mountinfo_handles_optional_fields() {
        let entries = parse_mountinfo(MOUNTINFO);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].source, "/dev/mapper/data");
        assert_eq!(entries[2].fstype, "ext4");
        let root = root_mount(&entries).unwrap();
        assert_eq!(root.devnum, "254:0");
        assert_eq!(root.source, "/dev/mapper/cryptroot");
    }

    #[test]
    fn unescape_mount_field_decodes_octals() {
        assert_eq!(unescape_mount_field("/media/LOCK\\040KEY"), "/media/LOCK KEY");
        assert_eq!(unescape_mount_field("/mnt/keys"), "/mnt/keys");
        assert_eq!(unescape_mount_field("a\\x"), "a\\x");
        assert_eq!(
            unescape_mount_field("/media/caf\\303\\251"),
            "/media/caf\u{e9}"
        );
        assert_eq!(unescape_mount_field("/a\\08"), "/a\\08");
    }
}
