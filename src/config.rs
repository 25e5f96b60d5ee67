//! Monitor configuration loaded from environment variables.
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `NPU_MONITOR_CONTAINER_MODE` | `docker`, `containerd` or `isula` | `docker` |
//! | `NPU_MONITOR_CONTAINERD_ENDPOINT` | socket used to fetch container specs | per mode |
//! | `NPU_MONITOR_CRI_ENDPOINT` | socket of the CRI server used to list containers | per mode |
//! | `NPU_MONITOR_USE_BACKUP` | also try well-known backup sockets | `true` |
//! | `NPU_MONITOR_PARSE_TIMEOUT_MS` | deadline for one resolution cycle | 3000 |
//! | `NPU_MONITOR_POLL_INTERVAL_SECS` | time between resolution cycles | 5 |
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_CONTAINER_MODE: &str = "NPU_MONITOR_CONTAINER_MODE";
pub const ENV_CONTAINERD_ENDPOINT: &str = "NPU_MONITOR_CONTAINERD_ENDPOINT";
pub const ENV_CRI_ENDPOINT: &str = "NPU_MONITOR_CRI_ENDPOINT";
pub const ENV_USE_BACKUP: &str = "NPU_MONITOR_USE_BACKUP";
pub const ENV_PARSE_TIMEOUT_MS: &str = "NPU_MONITOR_PARSE_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_SECS: &str = "NPU_MONITOR_POLL_INTERVAL_SECS";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const UNIX_SCHEME: &str = "unix://";
const SOCKET_SUFFIX: &str = ".sock";

const DOCKER_CRI_ADDR: &str = "/run/dockershim.sock";
const DOCKER_OCI_ADDR: &str = "/run/docker/containerd/docker-containerd.sock";
const DOCKER_CRI_BACKUP_ADDRS: &[&str] = &["/run/cri-dockerd.sock"];
const DOCKER_OCI_BACKUP_ADDRS: &[&str] = &["/run/containerd/containerd.sock"];
const CONTAINERD_ADDR: &str = "/run/containerd/containerd.sock";
const CONTAINERD_BACKUP_ADDRS: &[&str] = &["/var/run/containerd/containerd.sock"];
const ISULAD_ADDR: &str = "/run/isulad.sock";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid endpoint `{0}`: expected the path of a `.sock` file")]
    InvalidEndpoint(String),
    #[error("invalid value `{value}` for `{var}`")]
    InvalidValue { var: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The container engine whose containers are monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeKind {
    /// Docker, with or without Kubernetes.
    #[default]
    Docker,
    /// Kubernetes with containerd.
    Containerd,
    /// Kubernetes with iSulad.
    Isula,
}

impl RuntimeKind {
    fn default_cri_endpoint(self) -> &'static str {
        match self {
            RuntimeKind::Docker => DOCKER_CRI_ADDR,
            RuntimeKind::Containerd => CONTAINERD_ADDR,
            RuntimeKind::Isula => ISULAD_ADDR,
        }
    }

    fn default_oci_endpoint(self) -> &'static str {
        match self {
            RuntimeKind::Docker => DOCKER_OCI_ADDR,
            RuntimeKind::Containerd => CONTAINERD_ADDR,
            RuntimeKind::Isula => ISULAD_ADDR,
        }
    }

    fn cri_backups(self) -> &'static [&'static str] {
        match self {
            RuntimeKind::Docker => DOCKER_CRI_BACKUP_ADDRS,
            RuntimeKind::Containerd => CONTAINERD_BACKUP_ADDRS,
            RuntimeKind::Isula => &[],
        }
    }

    fn oci_backups(self) -> &'static [&'static str] {
        match self {
            RuntimeKind::Docker => DOCKER_OCI_BACKUP_ADDRS,
            RuntimeKind::Containerd => CONTAINERD_BACKUP_ADDRS,
            RuntimeKind::Isula => &[],
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(RuntimeKind::Docker),
            "containerd" => Ok(RuntimeKind::Containerd),
            "isula" => Ok(RuntimeKind::Isula),
            other => Err(Error::InvalidValue {
                var: ENV_CONTAINER_MODE,
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Containerd => "containerd",
            RuntimeKind::Isula => "isula",
        };
        f.write_str(name)
    }
}

/// Connection and timing settings for the device resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    pub kind: RuntimeKind,
    /// Socket of the CRI server used to list containers.
    pub cri_endpoint: PathBuf,
    /// Socket used to fetch container specs (containerd, or iSulad).
    pub oci_endpoint: PathBuf,
    /// Whether the well-known backup sockets of `kind` are tried when an endpoint is unreachable.
    pub use_backup: bool,
    /// Deadline for one resolution cycle; `None` selects the resolver default.
    pub parse_timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl MonitorOptions {
    /// Creates options with the default endpoints of `kind`.
    pub fn new(kind: RuntimeKind) -> Self {
        Self {
            kind,
            cri_endpoint: PathBuf::from(kind.default_cri_endpoint()),
            oci_endpoint: PathBuf::from(kind.default_oci_endpoint()),
            use_backup: true,
            parse_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Loads the options from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint override is not a socket path or a numeric or boolean
    /// variable cannot be parsed. An unknown container mode is logged and replaced by `docker`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let kind = match lookup(ENV_CONTAINER_MODE) {
            Some(mode) => mode.parse().unwrap_or_else(|err| {
                log::error!("{}, falling back to `{}`", err, RuntimeKind::Docker);
                RuntimeKind::Docker
            }),
            None => RuntimeKind::default(),
        };
        let mut options = Self::new(kind);

        if let Some(raw) = lookup(ENV_CONTAINERD_ENDPOINT).filter(|v| !v.is_empty()) {
            options.oci_endpoint = parse_socket_endpoint(&raw)?;
        }
        if let Some(raw) = lookup(ENV_CRI_ENDPOINT).filter(|v| !v.is_empty()) {
            options.cri_endpoint = parse_socket_endpoint(&raw)?;
        }
        if let Some(raw) = lookup(ENV_USE_BACKUP) {
            options.use_backup = raw.parse().map_err(|_| Error::InvalidValue {
                var: ENV_USE_BACKUP,
                value: raw,
            })?;
        }
        if let Some(raw) = lookup(ENV_PARSE_TIMEOUT_MS) {
            let millis = raw.parse::<u64>().map_err(|_| Error::InvalidValue {
                var: ENV_PARSE_TIMEOUT_MS,
                value: raw,
            })?;
            // Zero selects the resolver default, like an unset variable.
            options.parse_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_SECS) {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| Error::InvalidValue {
                    var: ENV_POLL_INTERVAL_SECS,
                    value: raw,
                })?;
            options.poll_interval = Duration::from_secs(secs);
        }

        Ok(options)
    }

    /// Returns the CRI endpoint followed by its backups, if enabled.
    pub fn cri_endpoints(&self) -> Vec<PathBuf> {
        with_backups(&self.cri_endpoint, self.kind.cri_backups(), self.use_backup)
    }

    /// Returns the OCI endpoint followed by its backups, if enabled.
    pub fn oci_endpoints(&self) -> Vec<PathBuf> {
        with_backups(&self.oci_endpoint, self.kind.oci_backups(), self.use_backup)
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::new(RuntimeKind::default())
    }
}

fn with_backups(primary: &Path, backups: &[&str], use_backup: bool) -> Vec<PathBuf> {
    let mut endpoints = vec![primary.to_path_buf()];
    if use_backup {
        for backup in backups {
            let backup = PathBuf::from(backup);
            if !endpoints.contains(&backup) {
                endpoints.push(backup);
            }
        }
    }
    endpoints
}

/// Parses a socket endpoint given either as a path or as a `unix://` URI.
///
/// # Errors
///
/// Returns [`Error::InvalidEndpoint`] if the endpoint does not name a `.sock` file.
///
/// # Examples
///
/// ```
/// # use npu_monitor::config::parse_socket_endpoint;
/// # use std::path::PathBuf;
/// let path = parse_socket_endpoint("unix:///run/containerd/containerd.sock").unwrap();
/// assert_eq!(path, PathBuf::from("/run/containerd/containerd.sock"));
/// ```
pub fn parse_socket_endpoint(raw: &str) -> Result<PathBuf> {
    let path = raw.strip_prefix(UNIX_SCHEME).unwrap_or(raw);
    if path.is_empty() || !path.ends_with(SOCKET_SUFFIX) {
        return Err(Error::InvalidEndpoint(raw.to_owned()));
    }
    Ok(PathBuf::from(path))
}
