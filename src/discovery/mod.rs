//! Container discovery through the container runtime's gRPC APIs.
//!
//! [`RuntimeOperator`] is the capability set the device resolver needs from a runtime:
//! enumerate running containers and fetch the descriptor of one container. It is implemented
//! by [`ContainerdOperator`] (containerd, and Docker through its embedded containerd) and
//! [`IsulaOperator`]. [`Runtime`] selects one of them from the [`MonitorOptions`].
//!
//! Running containers are always listed through the CRI. Descriptors come in two shapes,
//! reported by [`RuntimeOperator::container_kind`]: OCI runtime specs from containerd, or
//! iSulad's own container document.
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tonic::transport::Channel;

use crate::config::{MonitorOptions, RuntimeKind};
use crate::container::ContainerID;

mod containerd;
mod cri;
pub mod descriptor;
mod error;
mod isula;
pub mod proto;

pub use containerd::ContainerdOperator;
pub use descriptor::{IsulaContainer, Spec};
pub use error::{Error, Result};
pub use isula::IsulaOperator;

/// More running containers than this are treated as an overload and yield an empty list.
pub const MAX_CONTAINERS: usize = 1024;

const LABEL_POD_NAMESPACE: &str = "io.kubernetes.pod.namespace";
const LABEL_POD_NAME: &str = "io.kubernetes.pod.name";
const LABEL_CONTAINER_NAME: &str = "io.kubernetes.container.name";

/// The descriptor shape a runtime returns for its containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// OCI runtime spec, fetched with [`RuntimeOperator::container_spec`].
    Oci,
    /// iSulad container document, fetched with [`RuntimeOperator::isula_container`].
    Isula,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Oci => f.write_str("OCI"),
            ContainerKind::Isula => f.write_str("iSula"),
        }
    }
}

/// A running container as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    id: ContainerID,
    name: String,
    labels: HashMap<String, String>,
}

impl ContainerRef {
    /// Constructs a [`ContainerRef`].
    ///
    /// # Arguments
    ///
    /// * `id` - The container id.
    /// * `name` - The runtime's name for the container, may be empty.
    /// * `labels` - The container labels.
    pub fn new(id: ContainerID, name: impl Into<String>, labels: HashMap<String, String>) -> Self {
        Self {
            id,
            name: name.into(),
            labels,
        }
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    /// Returns a human-readable name for the container.
    ///
    /// Kubernetes containers are named `<pod namespace>_<pod name>_<container name>`. Other
    /// containers use the runtime's name. Returns `None` if neither is available.
    pub fn display_name(&self) -> Option<String> {
        let label = |key: &str| self.labels.get(key).filter(|v| !v.is_empty());
        if let (Some(namespace), Some(pod), Some(container)) = (
            label(LABEL_POD_NAMESPACE),
            label(LABEL_POD_NAME),
            label(LABEL_CONTAINER_NAME),
        ) {
            return Some(format!("{namespace}_{pod}_{container}"));
        }

        (!self.name.is_empty()).then(|| self.name.clone())
    }
}

/// Access to the containers of a container runtime.
///
/// All operations take `&self` and may be called concurrently once [`init`](Self::init)
/// succeeded.
pub trait RuntimeOperator: Send + Sync + 'static {
    /// Connects to the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if no configured endpoint is reachable.
    fn init(&self) -> impl Future<Output = Result<()>> + Send;

    /// Drops all connections. Calling it more than once is harmless.
    fn close(&self);

    /// Lists the running containers.
    ///
    /// More than [`MAX_CONTAINERS`] containers yield an empty list.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<ContainerRef>>> + Send;

    /// Fetches the OCI runtime spec of a container.
    fn container_spec(&self, id: &ContainerID) -> impl Future<Output = Result<Spec>> + Send;

    /// Fetches the iSulad container document of a container.
    fn isula_container(
        &self,
        id: &ContainerID,
    ) -> impl Future<Output = Result<IsulaContainer>> + Send;

    /// Reports which descriptor shape this runtime provides.
    fn container_kind(&self) -> ContainerKind;
}

/// The runtime backends, selected by [`RuntimeKind`].
#[derive(Debug)]
pub enum Runtime {
    Containerd(ContainerdOperator),
    Docker(ContainerdOperator),
    Isula(IsulaOperator),
}

impl Runtime {
    /// Creates the operator for `options.kind`. No connection is made until
    /// [`RuntimeOperator::init`].
    pub fn from_options(options: &MonitorOptions) -> Self {
        match options.kind {
            RuntimeKind::Containerd => Runtime::Containerd(ContainerdOperator::containerd(options)),
            RuntimeKind::Docker => Runtime::Docker(ContainerdOperator::docker(options)),
            RuntimeKind::Isula => Runtime::Isula(IsulaOperator::new(options)),
        }
    }
}

impl RuntimeOperator for Runtime {
    async fn init(&self) -> Result<()> {
        match self {
            Runtime::Containerd(op) | Runtime::Docker(op) => op.init().await,
            Runtime::Isula(op) => op.init().await,
        }
    }

    fn close(&self) {
        match self {
            Runtime::Containerd(op) | Runtime::Docker(op) => op.close(),
            Runtime::Isula(op) => op.close(),
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRef>> {
        match self {
            Runtime::Containerd(op) | Runtime::Docker(op) => op.list_containers().await,
            Runtime::Isula(op) => op.list_containers().await,
        }
    }

    async fn container_spec(&self, id: &ContainerID) -> Result<Spec> {
        match self {
            Runtime::Containerd(op) | Runtime::Docker(op) => op.container_spec(id).await,
            Runtime::Isula(op) => op.container_spec(id).await,
        }
    }

    async fn isula_container(&self, id: &ContainerID) -> Result<IsulaContainer> {
        match self {
            Runtime::Containerd(op) | Runtime::Docker(op) => op.isula_container(id).await,
            Runtime::Isula(op) => op.isula_container(id).await,
        }
    }

    fn container_kind(&self) -> ContainerKind {
        match self {
            Runtime::Containerd(op) | Runtime::Docker(op) => op.container_kind(),
            Runtime::Isula(op) => op.container_kind(),
        }
    }
}

/// Connects to the first reachable endpoint, in order.
async fn connect_any(role: &'static str, endpoints: &[PathBuf]) -> Result<Channel> {
    let mut last_err = None;
    for path in endpoints {
        match crate::grpc::channel_for_unix_socket(path).await {
            Ok(channel) => {
                log::info!("Connected to {} endpoint `{}`", role, path.display());
                return Ok(channel);
            }
            Err(err) => {
                log::warn!(
                    "failed to connect to {} endpoint `{}`: {}",
                    role,
                    path.display(),
                    err
                );
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(source) => Err(Error::Connect {
            role,
            endpoints: endpoints.to_vec(),
            source,
        }),
        None => Err(Error::NoEndpoint(role)),
    }
}

/// Connects the CRI and descriptor endpoints, sharing one channel when both resolve to the same
/// socket.
async fn connect_pair(cri: &[PathBuf], oci: &[PathBuf]) -> Result<(Channel, Channel)> {
    let cri_channel = connect_any("CRI", cri).await?;
    let oci_channel = if cri == oci {
        cri_channel.clone()
    } else {
        connect_any("runtime", oci).await?
    };

    Ok((cri_channel, oci_channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_display_name_from_kubernetes_labels() {
        let container = ContainerRef::new(
            ContainerID::new("c1").unwrap(),
            "trainer",
            labels(&[
                (LABEL_POD_NAMESPACE, "default"),
                (LABEL_POD_NAME, "job-0"),
                (LABEL_CONTAINER_NAME, "trainer"),
            ]),
        );
        assert_eq!(
            container.display_name().as_deref(),
            Some("default_job-0_trainer")
        );
    }

    #[test]
    fn test_display_name_falls_back_to_runtime_name() {
        let container = ContainerRef::new(
            ContainerID::new("c1").unwrap(),
            "trainer",
            labels(&[(LABEL_POD_NAMESPACE, "default")]),
        );
        assert_eq!(container.display_name().as_deref(), Some("trainer"));

        let unnamed = ContainerRef::new(ContainerID::new("c2").unwrap(), "", HashMap::new());
        assert_eq!(unnamed.display_name(), None);
    }

    #[test]
    fn test_runtime_from_options() {
        let runtime = Runtime::from_options(&MonitorOptions::new(RuntimeKind::Isula));
        assert!(matches!(runtime, Runtime::Isula(_)));
        assert_eq!(runtime.container_kind(), ContainerKind::Isula);

        let runtime = Runtime::from_options(&MonitorOptions::new(RuntimeKind::Docker));
        assert!(matches!(runtime, Runtime::Docker(_)));
        assert_eq!(runtime.container_kind(), ContainerKind::Oci);
    }

    #[tokio::test]
    async fn test_init_fails_without_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = MonitorOptions::new(RuntimeKind::Containerd);
        options.cri_endpoint = dir.path().join("containerd.sock");
        options.oci_endpoint = dir.path().join("containerd.sock");
        options.use_backup = false;

        let runtime = Runtime::from_options(&options);
        assert!(matches!(
            runtime.init().await,
            Err(Error::Connect { role: "CRI", .. })
        ));
        assert!(matches!(
            runtime.list_containers().await,
            Err(Error::NotConnected)
        ));
        runtime.close();
        runtime.close();
    }
}
