use tonic::transport::Channel;

use crate::container::ContainerID;

use super::proto::cri::{
    ContainerFilter, ContainerState, ContainerStateValue, LIST_CONTAINERS, ListContainersRequest,
    ListContainersResponse,
};
use super::{ContainerRef, Error, MAX_CONTAINERS, Result};

/// Lists the running containers known to the CRI server behind `channel`.
pub(super) async fn list_running_containers(channel: Channel) -> Result<Vec<ContainerRef>> {
    let request = tonic::Request::new(ListContainersRequest {
        filter: Some(ContainerFilter {
            state: Some(ContainerStateValue {
                state: ContainerState::ContainerRunning as i32,
            }),
            ..Default::default()
        }),
    });

    let response: ListContainersResponse =
        crate::grpc::unary(channel, LIST_CONTAINERS, request)
            .await
            .map_err(Error::rpc(LIST_CONTAINERS))?
            .into_inner();

    Ok(into_container_refs(response))
}

fn into_container_refs(response: ListContainersResponse) -> Vec<ContainerRef> {
    let count = response.containers.len();
    if count > MAX_CONTAINERS {
        log::warn!(
            "CRI reported {} containers (max {}), returning empty list",
            count,
            MAX_CONTAINERS
        );
        return Vec::new();
    }
    log::debug!("Found {} running containers", count);

    let mut containers = Vec::with_capacity(count);
    for container in response.containers {
        let id = match ContainerID::new(&container.id) {
            Ok(id) => id,
            Err(err) => {
                log::error!("failed to parse ContainerID: {}", err);
                continue;
            }
        };
        let name = container.metadata.map(|m| m.name).unwrap_or_default();
        containers.push(ContainerRef::new(id, name, container.labels));
    }

    containers
}
