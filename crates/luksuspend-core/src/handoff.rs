//! Wire format for moving the working set into the initramfs context.
//!
//! The payload is the device names joined by single NUL bytes, root device
//! first, the rest in enumeration order. There is no length prefix and no
//! other metadata; the receiver treats slot 0 as the root device without
//! re-checking.

use crate::device::CryptDevice;
use crate::error::{DiscoveryError, LuksError, LuksResult};

const SEPARATOR: u8 = 0;

/// Serialize `devices` with the root device first.
pub fn encode(devices: &[CryptDevice]) -> LuksResult<Vec<u8>> {
    let roots: Vec<&CryptDevice> = devices.iter().filter(|d| d.is_root_device).collect();
    let root = match roots.as_slice() {
        [] if devices.is_empty() => return Ok(Vec::new()),
        [] => return Err(DiscoveryError::NoRootDevice.into()),
        [root] => *root,
        many => {
            return Err(DiscoveryError::AmbiguousRootDevice(
                many.iter().map(|d| d.name.clone()).collect(),
            )
            .into())
        }
    };

    let ordered = std::iter::once(root).chain(devices.iter().filter(|d| !d.is_root_device));
    let mut names = Vec::with_capacity(devices.len());
    for device in ordered {
        if device.name.is_empty() || device.name.as_bytes().contains(&SEPARATOR) {
            return Err(LuksError::Protocol(format!(
                "device name {:?} cannot be encoded",
                device.name
            )));
        }
        names.push(device.name.as_bytes());
    }

    Ok(names.join(&SEPARATOR))
}

/// Parse a payload produced by [`encode`]. Slot 0 becomes the root device.
pub fn decode(payload: &[u8]) -> LuksResult<Vec<CryptDevice>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    payload
        .split(|b| *b == SEPARATOR)
        .enumerate()
        .map(|(idx, raw)| {
            if raw.is_empty() {
                return Err(LuksError::Protocol(format!("empty device name in slot {idx}")));
            }
            let name = std::str::from_utf8(raw).map_err(|err| {
                LuksError::Protocol(format!("device name in slot {idx} is not UTF-8: {err}"))
            })?;
            Ok(if idx == 0 {
                CryptDevice::root(name)
            } else {
                CryptDevice::new(name)
            })
        })
        .collect()
}
