//! NPU device identification.
//!
//! Containers started through the Ascend runtime declare their devices in the
//! [`VISIBLE_DEVICES_ENV`] variable; [`decode_visible_devices`] turns its value into device
//! indices. Other containers are attributed through their device lists instead, using
//! [`filter_cgroup_devices`] for OCI specs and [`filter_isula_devices`] for iSula.
mod decode;
mod filter;
mod major;

pub use decode::{MAX_ENV_VALUE_LEN, decode_visible_devices};
pub use filter::{filter_cgroup_devices, filter_isula_devices};
pub use major::{MajorIdRegistry, PROC_DEVICES_PATH};

/// Environment variable listing the NPUs a container may use.
pub const VISIBLE_DEVICES_ENV: &str = "ASCEND_VISIBLE_DEVICES";
