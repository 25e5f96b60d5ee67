use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;
use tonic::transport::Channel;

use crate::config::MonitorOptions;
use crate::container::ContainerID;

use super::proto::isula::{INSPECT, InspectContainerRequest, InspectContainerResponse};
use super::{
    ContainerKind, ContainerRef, Error, IsulaContainer, Result, RuntimeOperator, Spec, cri,
};

/// Seconds iSulad may spend on one inspect request.
const INSPECT_TIMEOUT_SECS: i32 = 5;

#[derive(Debug, Clone)]
struct Connections {
    cri: Channel,
    isulad: Channel,
}

/// Runtime operator for iSulad.
///
/// iSulad serves the CRI and its own container service, usually on the same socket.
#[derive(Debug)]
pub struct IsulaOperator {
    cri_endpoints: Vec<PathBuf>,
    isulad_endpoints: Vec<PathBuf>,
    connections: RwLock<Option<Connections>>,
}

impl IsulaOperator {
    pub fn new(options: &MonitorOptions) -> Self {
        Self {
            cri_endpoints: options.cri_endpoints(),
            isulad_endpoints: options.oci_endpoints(),
            connections: RwLock::new(None),
        }
    }

    fn connections(&self) -> Result<Connections> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotConnected)
    }
}

impl RuntimeOperator for IsulaOperator {
    async fn init(&self) -> Result<()> {
        let (cri, isulad) =
            super::connect_pair(&self.cri_endpoints, &self.isulad_endpoints).await?;
        *self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Connections { cri, isulad });
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
            log::debug!("Closed iSulad connections");
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRef>> {
        let Connections { cri, .. } = self.connections()?;
        cri::list_running_containers(cri).await
    }

    async fn container_spec(&self, _id: &ContainerID) -> Result<Spec> {
        Err(Error::Unsupported {
            operation: "container_spec",
            kind: ContainerKind::Isula,
        })
    }

    async fn isula_container(&self, id: &ContainerID) -> Result<IsulaContainer> {
        let Connections { isulad, .. } = self.connections()?;
        let request = tonic::Request::new(InspectContainerRequest {
            id: id.to_string(),
            bformat: false,
            timeout: INSPECT_TIMEOUT_SECS,
        });

        let response: InspectContainerResponse = crate::grpc::unary(isulad, INSPECT, request)
            .await
            .map_err(Error::rpc(INSPECT))?
            .into_inner();
        if response.cc != 0 {
            return Err(Error::Inspect {
                id: id.clone(),
                code: response.cc,
                message: response.errmsg,
            });
        }

        decode_inspect_output(&response.container_json).map_err(|source| Error::DecodeInspect {
            id: id.clone(),
            source,
        })
    }

    fn container_kind(&self) -> ContainerKind {
        ContainerKind::Isula
    }
}

/// iSulad may return the document on its own or wrapped in a one-element array.
#[derive(Deserialize)]
#[serde(untagged)]
enum InspectOutput {
    Single(IsulaContainer),
    Many(Vec<IsulaContainer>),
}

fn decode_inspect_output(raw: &str) -> serde_json::Result<IsulaContainer> {
    Ok(match serde_json::from_str(raw)? {
        InspectOutput::Single(container) => container,
        InspectOutput::Many(containers) => containers.into_iter().next().unwrap_or_default(),
    })
}
