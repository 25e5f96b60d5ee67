use std::path::PathBuf;

use crate::container::ContainerID;

use super::ContainerKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to {role} endpoint (tried {endpoints:?}): {source}")]
    Connect {
        role: &'static str,
        endpoints: Vec<PathBuf>,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("no {0} endpoint configured")]
    NoEndpoint(&'static str),
    #[error("runtime client is not connected")]
    NotConnected,
    #[error("request `{method}` failed: {source}")]
    Rpc {
        method: &'static str,
        #[source]
        source: Box<tonic::Status>,
    },
    #[error("container `{0}` has no runtime spec")]
    MissingSpec(ContainerID),
    #[error("failed to decode runtime spec of container `{id}`: {source}")]
    DecodeSpec {
        id: ContainerID,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to inspect container `{id}`: {message} (cc={code})")]
    Inspect {
        id: ContainerID,
        code: u32,
        message: String,
    },
    #[error("failed to decode inspect output of container `{id}`: {source}")]
    DecodeInspect {
        id: ContainerID,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{operation}` is not supported for {kind} containers")]
    Unsupported {
        operation: &'static str,
        kind: ContainerKind,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(super) fn rpc(method: &'static str) -> impl FnOnce(tonic::Status) -> Self {
        move |status| Error::Rpc {
            method,
            source: Box::new(status),
        }
    }
}
