//! Device filtering for containers that do not declare `ASCEND_VISIBLE_DEVICES`.

use std::sync::LazyLock;

use regex::Regex;

use crate::discovery::descriptor::{DeviceMapping, LinuxDeviceCgroup};

use super::MajorIdRegistry;

const CHAR_DEVICE: &str = "c";

static DAVINCI_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/dev/davinci(\d+)$").expect("valid davinci path pattern"));

/// Selects NPU devices from the device cgroup entries of an OCI spec.
///
/// An entry is kept if it is a character device whose major was registered by the NPU driver.
/// Its minor number is the device index. Entries without major or minor (as found in
/// privileged containers) are not attributable to a device and are skipped.
///
/// # Arguments
///
/// * `devices` - The `linux.resources.devices` list of the spec.
/// * `majors` - Registry of NPU device majors.
/// * `container_id` - Used for diagnostics only.
pub fn filter_cgroup_devices(
    devices: &[LinuxDeviceCgroup],
    majors: &MajorIdRegistry,
    container_id: &str,
) -> Vec<u32> {
    let mut ids = Vec::with_capacity(8);
    for device in devices {
        let (Some(major), Some(minor)) = (device.major, device.minor) else {
            continue;
        };
        if device.kind.as_deref() != Some(CHAR_DEVICE) || !majors.contains(major) {
            continue;
        }
        match u32::try_from(minor) {
            Ok(id) => ids.push(id),
            Err(_) => log::warn!(
                "container `{}` has a device with an invalid minor number {}",
                container_id,
                minor
            ),
        }
    }

    ids
}

/// Selects NPU devices from the host config device mappings of an iSula container.
///
/// The index is taken from the in-container path `/dev/davinci<N>`. Other paths and indices
/// above `i32::MAX` are skipped.
pub fn filter_isula_devices(devices: &[DeviceMapping], container_id: &str) -> Vec<u32> {
    let mut ids = Vec::with_capacity(8);
    for device in devices {
        match device_id_from_path(&device.path_in_container) {
            Some(id) => ids.push(id),
            None => log::warn!(
                "container `{}` has an unexpected device path `{}`",
                container_id,
                device.path_in_container
            ),
        }
    }

    ids
}

fn device_id_from_path(path: &str) -> Option<u32> {
    let digits = DAVINCI_PATH.captures(path)?.get(1)?.as_str();
    let id = digits.parse::<u32>().ok()?;
    if id > i32::MAX as u32 {
        return None;
    }
    Some(id)
}
