//! Protobuf messages of the runtime APIs used for discovery.
//!
//! These mirror the upstream `.proto` definitions but only carry the fields that are read.
//! Unknown fields on the wire are skipped by prost, so the trimmed messages stay compatible.

/// Kubernetes CRI, `runtime.v1`.
pub mod cri {
    use std::collections::HashMap;

    pub const LIST_CONTAINERS: &str = "/runtime.v1.RuntimeService/ListContainers";

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum ContainerState {
        ContainerCreated = 0,
        ContainerRunning = 1,
        ContainerExited = 2,
        ContainerUnknown = 3,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ContainerStateValue {
        #[prost(enumeration = "ContainerState", tag = "1")]
        pub state: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ContainerFilter {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(message, optional, tag = "2")]
        pub state: Option<ContainerStateValue>,
        #[prost(string, tag = "3")]
        pub pod_sandbox_id: String,
        #[prost(map = "string, string", tag = "4")]
        pub label_selector: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ListContainersRequest {
        #[prost(message, optional, tag = "1")]
        pub filter: Option<ContainerFilter>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ContainerMetadata {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(uint32, tag = "2")]
        pub attempt: u32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Container {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub pod_sandbox_id: String,
        #[prost(message, optional, tag = "3")]
        pub metadata: Option<ContainerMetadata>,
        #[prost(enumeration = "ContainerState", tag = "6")]
        pub state: i32,
        #[prost(map = "string, string", tag = "8")]
        pub labels: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ListContainersResponse {
        #[prost(message, repeated, tag = "1")]
        pub containers: Vec<Container>,
    }
}

/// containerd containers service, `containerd.services.containers.v1`.
pub mod containerd {
    use std::collections::HashMap;

    pub const GET_CONTAINER: &str = "/containerd.services.containers.v1.Containers/Get";
    /// gRPC metadata key selecting the containerd namespace of a request.
    pub const NAMESPACE_HEADER: &str = "containerd-namespace";

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct GetContainerRequest {
        #[prost(string, tag = "1")]
        pub id: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Container {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(map = "string, string", tag = "2")]
        pub labels: HashMap<String, String>,
        #[prost(string, tag = "3")]
        pub image: String,
        /// The OCI runtime spec, JSON encoded.
        #[prost(message, optional, tag = "5")]
        pub spec: Option<prost_types::Any>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct GetContainerResponse {
        #[prost(message, optional, tag = "1")]
        pub container: Option<Container>,
    }
}

/// iSulad container service, `containers`.
pub mod isula {
    pub const INSPECT: &str = "/containers.ContainerService/Inspect";

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InspectContainerRequest {
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(bool, tag = "2")]
        pub bformat: bool,
        /// Seconds iSulad may spend on the request.
        #[prost(int32, tag = "3")]
        pub timeout: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct InspectContainerResponse {
        #[prost(string, tag = "1")]
        pub container_json: String,
        /// Non-zero on failure.
        #[prost(uint32, tag = "2")]
        pub cc: u32,
        #[prost(string, tag = "3")]
        pub errmsg: String,
    }
}
