//! Container descriptors as returned by the runtimes.
//!
//! Only the fields needed to attribute devices are modelled; everything else in the JSON
//! documents is ignored.

use serde::{Deserialize, Deserializer};

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Subset of the OCI runtime spec stored by containerd for each container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub process: Option<Process>,
    #[serde(default)]
    pub linux: Option<Linux>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Process {
    /// `KEY=VALUE` entries in declaration order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Linux {
    #[serde(default)]
    pub resources: Option<LinuxResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LinuxResources {
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<LinuxDeviceCgroup>,
}

/// A device cgroup rule. Missing major or minor numbers act as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LinuxDeviceCgroup {
    #[serde(default)]
    pub allow: bool,
    /// `a` (all), `c` (char) or `b` (block).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub major: Option<i64>,
    #[serde(default)]
    pub minor: Option<i64>,
    #[serde(default)]
    pub access: Option<String>,
}

/// Subset of the container document returned by iSulad's inspect call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IsulaContainer {
    #[serde(default)]
    pub host_config: Option<HostConfig>,
    #[serde(default)]
    pub config: Option<ContainerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<DeviceMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMapping {
    #[serde(default)]
    pub path_on_host: String,
    #[serde(default)]
    pub path_in_container: String,
    #[serde(default)]
    pub cgroup_permissions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_oci_spec() {
        let raw = r#"{
            "ociVersion": "1.1.0",
            "process": {"user": {"uid": 0, "gid": 0}, "env": ["PATH=/usr/bin", "ASCEND_VISIBLE_DEVICES=0,1"]},
            "linux": {
                "resources": {
                    "devices": [
                        {"allow": false, "access": "rwm"},
                        {"allow": true, "type": "c", "major": 236, "minor": 1, "access": "rwm"}
                    ]
                },
                "namespaces": [{"type": "pid"}]
            }
        }"#;

        let spec: Spec = serde_json::from_str(raw).unwrap();
        let env = &spec.process.as_ref().unwrap().env;
        assert_eq!(env.len(), 2);
        let devices = &spec.linux.unwrap().resources.unwrap().devices;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].major, None);
        assert_eq!(devices[1].kind.as_deref(), Some("c"));
        assert_eq!(devices[1].minor, Some(1));
    }

    #[test]
    fn test_deserialize_null_lists() {
        let spec: Spec =
            serde_json::from_str(r#"{"process": {"env": null}, "linux": {"resources": {"devices": null}}}"#)
                .unwrap();
        assert!(spec.process.unwrap().env.is_empty());
        assert!(spec.linux.unwrap().resources.unwrap().devices.is_empty());
    }

    #[test]
    fn test_deserialize_isula_container() {
        let raw = r#"{
            "Id": "abc",
            "HostConfig": {
                "Privileged": false,
                "Devices": [{"PathOnHost": "/dev/davinci2", "PathInContainer": "/dev/davinci2", "CgroupPermissions": "rwm"}]
            },
            "Config": {"Env": ["A=B"]}
        }"#;

        let container: IsulaContainer = serde_json::from_str(raw).unwrap();
        let host_config = container.host_config.unwrap();
        assert!(!host_config.privileged);
        assert_eq!(host_config.devices[0].path_in_container, "/dev/davinci2");
        assert_eq!(container.config.unwrap().env, vec!["A=B".to_owned()]);
    }
}
