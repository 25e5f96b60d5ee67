use crate::container::{ContainerID, DeviceAssignment};
use crate::devices::{self, MajorIdRegistry, VISIBLE_DEVICES_ENV, decode_visible_devices};
use crate::discovery::descriptor::{IsulaContainer, Spec};
use crate::discovery::{ContainerKind, ContainerRef, RuntimeOperator};

use super::error::{Error, MalformedInput, Result};

/// Descriptors with more device entries than this are rejected.
pub const MAX_DEVICES: usize = 1024;
/// Descriptors with more environment entries than this are rejected.
pub const MAX_ENVS: usize = 2048;

/// Fetches the descriptor of `container` and resolves its devices.
///
/// Returns `Ok(None)` when the container has no attributable devices.
pub(super) async fn inspect_container<R: RuntimeOperator>(
    runtime: &R,
    container: &ContainerRef,
    majors: &MajorIdRegistry,
) -> Result<Option<DeviceAssignment>> {
    let id = container.id();
    let devices = match runtime.container_kind() {
        ContainerKind::Oci => {
            let spec = runtime.container_spec(id).await?;
            parse_oci_spec(&spec, majors, id)
        }
        ContainerKind::Isula => {
            let descriptor = runtime.isula_container(id).await?;
            parse_isula_container(&descriptor, id)
        }
    }
    .map_err(|source| Error::Malformed {
        id: id.clone(),
        source,
    })?;

    if devices.is_empty() {
        log::trace!("No NPUs attributed to container `{}`", id);
        return Ok(None);
    }
    let name = container
        .display_name()
        .ok_or_else(|| Error::MissingName(id.clone()))?;

    Ok(Some(DeviceAssignment::new(id.clone(), name, devices)))
}

/// Resolves the devices of a container described by an OCI runtime spec.
pub fn parse_oci_spec(
    spec: &Spec,
    majors: &MajorIdRegistry,
    id: &ContainerID,
) -> std::result::Result<Vec<u32>, MalformedInput> {
    let cgroup_devices = &spec
        .linux
        .as_ref()
        .and_then(|linux| linux.resources.as_ref())
        .ok_or(MalformedInput::MissingSection("linux.resources"))?
        .devices;
    let env = &spec
        .process
        .as_ref()
        .ok_or(MalformedInput::MissingSection("process"))?
        .env;
    check_limits(cgroup_devices.len(), env.len())?;

    match find_visible_devices(env, id)? {
        Some(devices) => Ok(devices),
        None => Ok(devices::filter_cgroup_devices(cgroup_devices, majors, id.as_str())),
    }
}

/// Resolves the devices of an iSulad container. Privileged containers yield no devices.
pub fn parse_isula_container(
    container: &IsulaContainer,
    id: &ContainerID,
) -> std::result::Result<Vec<u32>, MalformedInput> {
    let host_config = container
        .host_config
        .as_ref()
        .ok_or(MalformedInput::MissingSection("HostConfig"))?;
    if host_config.privileged {
        log::debug!("Skipping privileged container `{}`", id);
        return Ok(Vec::new());
    }
    let env = &container
        .config
        .as_ref()
        .ok_or(MalformedInput::MissingSection("Config"))?
        .env;
    check_limits(host_config.devices.len(), env.len())?;

    match find_visible_devices(env, id)? {
        Some(devices) => Ok(devices),
        None => Ok(devices::filter_isula_devices(&host_config.devices, id.as_str())),
    }
}

fn check_limits(devices: usize, envs: usize) -> std::result::Result<(), MalformedInput> {
    if devices > MAX_DEVICES {
        return Err(MalformedInput::TooManyDevices {
            count: devices,
            max: MAX_DEVICES,
        });
    }
    if envs > MAX_ENVS {
        return Err(MalformedInput::TooManyEnvs {
            count: envs,
            max: MAX_ENVS,
        });
    }
    Ok(())
}

/// Decodes the last [`VISIBLE_DEVICES_ENV`] entry of `env`, if there is one.
fn find_visible_devices(
    env: &[String],
    id: &ContainerID,
) -> std::result::Result<Option<Vec<u32>>, MalformedInput> {
    let Some(entry) = env
        .iter()
        .rev()
        .find(|entry| entry.split('=').next() == Some(VISIBLE_DEVICES_ENV))
    else {
        return Ok(None);
    };

    let parts: Vec<&str> = entry.split('=').collect();
    if parts.len() != 2 {
        return Err(MalformedInput::InvalidEnv(entry.clone()));
    }

    Ok(Some(decode_visible_devices(parts[1], id.as_str())))
}
