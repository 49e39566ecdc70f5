use crate::command::CommandRunner;
use luksuspend_core::config::LuksuspendConfig;
use luksuspend_core::error::LuksResult;
use luksuspend_core::mounts::{parse_proc_mounts, MountEntry};
use luksuspend_core::provider::FilesystemController;
use std::fs;
use std::path::{Path, PathBuf};

pub const PROC_MOUNTS: &str = "/proc/mounts";

pub const DEFAULT_MOUNT_PATHS: &[&str] = &["/usr/bin/mount", "/bin/mount", "/sbin/mount"];

pub const DEFAULT_UMOUNT_PATHS: &[&str] = &["/usr/bin/umount", "/bin/umount", "/sbin/umount"];

/// Mount table reads plus `mount`/`umount` for remounts and bind mounts.
#[derive(Debug, Clone)]
pub struct HostFilesystems {
    mount: CommandRunner,
    umount: CommandRunner,
    mounts_path: PathBuf,
}

impl HostFilesystems {
    pub fn new(mount: CommandRunner, umount: CommandRunner) -> Self {
        Self {
            mount,
            umount,
            mounts_path: PathBuf::from(PROC_MOUNTS),
        }
    }

    pub fn from_config(config: &LuksuspendConfig) -> LuksResult<Self> {
        let timeout = config.command_timeout();
        let mount = CommandRunner::locate(
            "mount",
            config.commands.mount_path.as_deref(),
            DEFAULT_MOUNT_PATHS,
            timeout,
        )?;
        let umount = CommandRunner::locate(
            "umount",
            config.commands.umount_path.as_deref(),
            DEFAULT_UMOUNT_PATHS,
            timeout,
        )?;
        Ok(Self::new(mount, umount))
    }

    /// Read the mount table from `path` instead of `/proc/mounts`.
    pub fn with_mounts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_path = path.into();
        self
    }
}

impl FilesystemController for HostFilesystems {
    fn sync(&self) {
        unsafe { libc::sync() };
    }

    fn mounted(&self) -> LuksResult<Vec<MountEntry>> {
        let contents = fs::read_to_string(&self.mounts_path)?;
        Ok(parse_proc_mounts(&contents))
    }

    fn set_barrier(&self, mountpoint: &str, enabled: bool) -> LuksResult<()> {
        let options = if enabled {
            "remount,barrier"
        } else {
            "remount,nobarrier"
        };
        self.mount
            .run_checked(&["-o", options, mountpoint])
            .map(|_| ())
    }

    fn bind(&self, source: &Path, target: &Path) -> LuksResult<()> {
        let source = source.to_string_lossy();
        let target = target.to_string_lossy();
        self.mount
            .run_checked(&["--bind", &*source, &*target])
            .map(|_| ())
    }

    fn unbind(&self, target: &Path) -> LuksResult<()> {
        let target = target.to_string_lossy();
        self.umount.run_checked(&[&*target]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_binary, test_lock};
    use std::time::Duration;
    use tempfile::tempdir;

    const RECORDER: &str = "echo \"$(basename \"$0\") $*\" >> \"$(dirname \"$0\")/calls\"\n";

    #[test]
    fn remounts_and_binds_through_mount() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let timeout = Duration::from_secs(5);
        let fs_ctl = HostFilesystems::new(
            CommandRunner::new(fake_binary(dir.path(), "mount", RECORDER), timeout),
            CommandRunner::new(fake_binary(dir.path(), "umount", RECORDER), timeout),
        );

        fs_ctl.set_barrier("/data", false).unwrap();
        fs_ctl.set_barrier("/data", true).unwrap();
        fs_ctl
            .bind(Path::new("/dev"), Path::new("/run/initramfs/dev"))
            .unwrap();
        fs_ctl.unbind(Path::new("/run/initramfs/dev")).unwrap();

        let calls = fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(
            calls,
            "mount -o remount,nobarrier /data\n\
             mount -o remount,barrier /data\n\
             mount --bind /dev /run/initramfs/dev\n\
             umount /run/initramfs/dev\n"
        );
    }

    #[test]
    fn mounted_reads_the_configured_table() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("mounts");
        fs::write(
            &table,
            "/dev/mapper/root / ext4 rw,relatime 0 0\n/dev/sda1 /boot vfat rw 0 0\n",
        )
        .unwrap();
        let timeout = Duration::from_secs(1);
        let fs_ctl = HostFilesystems::new(
            CommandRunner::new(PathBuf::from("/bin/true"), timeout),
            CommandRunner::new(PathBuf::from("/bin/true"), timeout),
        )
        .with_mounts_path(&table);

        let mounts = fs_ctl.mounted().unwrap();
        assert_eq!(mounts.len(), 2);
        assert!(mounts[0].barrier_enabled());
        assert!(!mounts[1].barrier_enabled());
    }
}
