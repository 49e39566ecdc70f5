//! Discovery of mapped LUKS devices and identification of the one backing `/`.

use crate::crypttab::{CrypttabFile, KeyfileSource};
use crate::device::CryptDevice;
use crate::error::{DiscoveryError, LuksError, LuksResult};
use crate::mounts::{parse_mountinfo, root_mount, MountInfoEntry};
use log::debug;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// dm uuid prefix cryptsetup gives LUKS mappings.
const LUKS_UUID_PREFIX: &str = "CRYPT-LUKS";

/// Source of the device working set.
pub trait DeviceSource {
    /// Enumerate mapped LUKS devices, root first.
    ///
    /// Returns an empty set when nothing is mapped. Fails when more than one
    /// mapping backs `/`, or when none does while other mappings exist.
    fn discover(&self) -> LuksResult<Vec<CryptDevice>>;

    /// Attach declared key files to devices that lack one. Never unlocks.
    fn enrich_keyfiles(&self, devices: &mut [CryptDevice]) -> LuksResult<()>;
}

/// A block device as seen through sysfs.
#[derive(Debug, Clone)]
struct BlockDevice {
    /// Kernel name, e.g. `dm-0`.
    kernel_name: String,
    devnum: Option<String>,
    /// Mapper name for device-mapper nodes.
    dm_name: Option<String>,
    is_luks: bool,
}

/// sysfs/mountinfo backed registry.
#[derive(Debug, Clone)]
pub struct DeviceRegistry<K: KeyfileSource = CrypttabFile> {
    sysfs_root: PathBuf,
    mountinfo_path: PathBuf,
    keyfiles: K,
}

impl DeviceRegistry<CrypttabFile> {
    pub fn from_config(config: &crate::config::LuksuspendConfig) -> Self {
        Self::new(
            &config.registry.sysfs_root,
            &config.registry.mountinfo_path,
            CrypttabFile::new(&config.registry.crypttab_path),
        )
    }
}

impl<K: KeyfileSource> DeviceRegistry<K> {
    pub fn new(
        sysfs_root: impl Into<PathBuf>,
        mountinfo_path: impl Into<PathBuf>,
        keyfiles: K,
    ) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            mountinfo_path: mountinfo_path.into(),
            keyfiles,
        }
    }

    fn block_dir(&self) -> PathBuf {
        self.sysfs_root.join("block")
    }

    /// Every block device under `<sysfs>/block`, in natural name order.
    fn block_devices(&self) -> LuksResult<Vec<BlockDevice>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.block_dir())? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));

        let mut devices = Vec::with_capacity(names.len());
        for kernel_name in names {
            let base = self.block_dir().join(&kernel_name);
            let uuid = read_attr(&base.join("dm/uuid"))?;
            let dm_name = read_attr(&base.join("dm/name"))?;
            let devnum = read_attr(&base.join("dev"))?;
            let is_luks = uuid
                .as_deref()
                .map(|u| u.starts_with(LUKS_UUID_PREFIX))
                .unwrap_or(false);
            if is_luks && dm_name.is_none() {
                return Err(LuksError::Unreadable {
                    path: base.join("dm/name"),
                    reason: "LUKS mapping without a dm name".into(),
                });
            }
            devices.push(BlockDevice {
                kernel_name,
                devnum,
                dm_name,
                is_luks,
            });
        }
        Ok(devices)
    }

    fn root_mount(&self) -> LuksResult<Option<MountInfoEntry>> {
        let contents = fs::read_to_string(&self.mountinfo_path)?;
        Ok(root_mount(&parse_mountinfo(&contents)).cloned())
    }

    /// Kernel names of every block device stacked beneath `top`, `top` included.
    fn lower_devices(&self, top: &str) -> LuksResult<HashSet<String>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([top.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let slaves = self.block_dir().join(&name).join("slaves");
            let entries = match fs::read_dir(&slaves) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for entry in entries {
                queue.push_back(entry?.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(seen)
    }
}

/// Match the root mount to a block device by device number, then by source path.
fn resolve_root_block<'a>(
    mount: &MountInfoEntry,
    devices: &'a [BlockDevice],
) -> Option<&'a BlockDevice> {
    if let Some(dev) = devices
        .iter()
        .find(|dev| dev.devnum.as_deref() == Some(mount.devnum.as_str()))
    {
        return Some(dev);
    }

    if let Some(mapper) = mount.source.strip_prefix("/dev/mapper/") {
        return devices
            .iter()
            .find(|dev| dev.dm_name.as_deref() == Some(mapper));
    }

    let node = mount.source.strip_prefix("/dev/")?;
    devices.iter().find(|dev| dev.kernel_name == node)
}

impl<K: KeyfileSource> DeviceSource for DeviceRegistry<K> {
    fn discover(&self) -> LuksResult<Vec<CryptDevice>> {
        let devices = self.block_devices()?;
        let luks: Vec<&BlockDevice> = devices.iter().filter(|dev| dev.is_luks).collect();
        if luks.is_empty() {
            debug!("no LUKS mappings under {}", self.block_dir().display());
            return Ok(Vec::new());
        }

        let lower = match self.root_mount()? {
            Some(mount) => match resolve_root_block(&mount, &devices) {
                Some(root_block) => {
                    debug!(
                        "root filesystem {} ({}) is on {}",
                        mount.source, mount.devnum, root_block.kernel_name
                    );
                    self.lower_devices(&root_block.kernel_name)?
                }
                None => HashSet::new(),
            },
            None => HashSet::new(),
        };

        let (roots, others): (Vec<&BlockDevice>, Vec<&BlockDevice>) = luks
            .into_iter()
            .partition(|dev| lower.contains(&dev.kernel_name));

        let mapper_name = |dev: &BlockDevice| dev.dm_name.clone().unwrap_or_default();
        match roots.as_slice() {
            [] => Err(DiscoveryError::NoRootDevice.into()),
            [root] => {
                let mut set = Vec::with_capacity(others.len() + 1);
                set.push(CryptDevice::root(mapper_name(root)));
                set.extend(others.into_iter().map(|dev| CryptDevice::new(mapper_name(dev))));
                Ok(set)
            }
            many => Err(DiscoveryError::AmbiguousRootDevice(
                many.iter().map(|dev| mapper_name(dev)).collect(),
            )
            .into()),
        }
    }

    fn enrich_keyfiles(&self, devices: &mut [CryptDevice]) -> LuksResult<()> {
        for device in devices.iter_mut().filter(|dev| dev.keyfile.is_none()) {
            device.keyfile = self.keyfiles.keyfile_for(&device.name)?;
        }
        Ok(())
    }
}

/// Read a sysfs attribute, treating a missing file as absent.
fn read_attr(path: &Path) -> LuksResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Sort key that orders `dm-2` before `dm-10`.
fn natural_key(name: &str) -> (String, u64) {
    let split = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(name.len());
    let (prefix, digits) = name.split_at(split);
    (prefix.to_string(), digits.parse().unwrap_or(0))
}
