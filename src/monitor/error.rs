use std::time::Duration;

use crate::container::ContainerID;
use crate::discovery;

/// Problems with a container descriptor that prevent attribution of that container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedInput {
    #[error("descriptor has no `{0}` section")]
    MissingSection(&'static str),
    #[error("descriptor lists {count} devices (max {max})")]
    TooManyDevices { count: usize, max: usize },
    #[error("descriptor lists {count} environment entries (max {max})")]
    TooManyEnvs { count: usize, max: usize },
    #[error("invalid environment entry {0:?}")]
    InvalidEnv(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Discovery(#[from] discovery::Error),
    #[error("malformed descriptor of container `{id}`: {source}")]
    Malformed {
        id: ContainerID,
        #[source]
        source: MalformedInput,
    },
    #[error("container `{0}` has devices but no name")]
    MissingName(ContainerID),
    #[error(
        "timed out after {timeout:?} waiting for {pending} of {dispatched} container inspections"
    )]
    AggregationTimeout {
        timeout: Duration,
        pending: usize,
        dispatched: usize,
    },
    #[error("container inspection task panicked: {0}")]
    WorkerPanicked(#[source] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
