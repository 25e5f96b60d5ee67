use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use tonic::metadata::MetadataValue;
use tonic::transport::Channel;

use crate::config::MonitorOptions;
use crate::container::ContainerID;

use super::proto::containerd::{
    GET_CONTAINER, GetContainerRequest, GetContainerResponse, NAMESPACE_HEADER,
};
use super::{
    ContainerKind, ContainerRef, Error, IsulaContainer, Result, RuntimeOperator, Spec, cri,
};

/// containerd namespace of Kubernetes (CRI) containers.
const NAMESPACE_K8S: &str = "k8s.io";
/// containerd namespace of Docker containers.
const NAMESPACE_MOBY: &str = "moby";

#[derive(Debug, Clone)]
struct Connections {
    cri: Channel,
    containerd: Channel,
}

/// Runtime operator for containerd, also used for Docker through its embedded containerd.
///
/// Containers are listed through the CRI endpoint, their OCI specs are read from the
/// containerd containers service in the operator's namespace.
#[derive(Debug)]
pub struct ContainerdOperator {
    namespace: &'static str,
    cri_endpoints: Vec<PathBuf>,
    containerd_endpoints: Vec<PathBuf>,
    connections: RwLock<Option<Connections>>,
}

impl ContainerdOperator {
    /// Creates an operator for Kubernetes with containerd.
    pub fn containerd(options: &MonitorOptions) -> Self {
        Self::with_namespace(NAMESPACE_K8S, options)
    }

    /// Creates an operator for Docker.
    pub fn docker(options: &MonitorOptions) -> Self {
        Self::with_namespace(NAMESPACE_MOBY, options)
    }

    fn with_namespace(namespace: &'static str, options: &MonitorOptions) -> Self {
        Self {
            namespace,
            cri_endpoints: options.cri_endpoints(),
            containerd_endpoints: options.oci_endpoints(),
            connections: RwLock::new(None),
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    fn connections(&self) -> Result<Connections> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotConnected)
    }
}

impl RuntimeOperator for ContainerdOperator {
    async fn init(&self) -> Result<()> {
        let (cri, containerd) =
            super::connect_pair(&self.cri_endpoints, &self.containerd_endpoints).await?;
        *self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Connections { cri, containerd });
        Ok(())
    }

    fn close(&self) {
        if self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            log::debug!("Closed containerd connections");
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRef>> {
        let Connections { cri, .. } = self.connections()?;
        cri::list_running_containers(cri).await
    }

    async fn container_spec(&self, id: &ContainerID) -> Result<Spec> {
        let Connections { containerd, .. } = self.connections()?;
        let mut request = tonic::Request::new(GetContainerRequest { id: id.to_string() });
        request
            .metadata_mut()
            .insert(NAMESPACE_HEADER, MetadataValue::from_static(self.namespace));

        let response: GetContainerResponse =
            crate::grpc::unary(containerd, GET_CONTAINER, request)
                .await
                .map_err(Error::rpc(GET_CONTAINER))?
                .into_inner();

        let spec = response
            .container
            .and_then(|container| container.spec)
            .ok_or_else(|| Error::MissingSpec(id.clone()))?;
        log::trace!("Decoding spec `{}` of container `{}`", spec.type_url, id);

        serde_json::from_slice(&spec.value).map_err(|source| Error::DecodeSpec {
            id: id.clone(),
            source,
        })
    }

    async fn isula_container(&self, _id: &ContainerID) -> Result<IsulaContainer> {
        Err(Error::Unsupported {
            operation: "isula_container",
            kind: ContainerKind::Oci,
        })
    }

    fn container_kind(&self) -> ContainerKind {
        ContainerKind::Oci
    }
}
