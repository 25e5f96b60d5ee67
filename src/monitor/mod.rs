//! Periodic resolution of container NPU assignments.
//!
//! A [`DevicesParser`] runs one poll cycle per [`DevicesParser::fetch_and_parse`] call: it lists
//! the running containers, inspects each of them concurrently and assembles a [`Snapshot`].
//! Snapshots and errors are delivered on separate channels, read with
//! [`DevicesParser::recv_result`] and [`DevicesParser::recv_err`].
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::MonitorOptions;
use crate::container::Snapshot;
use crate::devices::MajorIdRegistry;
use crate::discovery::{self, MAX_CONTAINERS, RuntimeOperator};

mod collect;
mod error;
pub mod parse;

pub use error::{Error, MalformedInput, Result};

use collect::{ResultGuard, collect};

/// Deadline of one poll cycle when none is configured.
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(3);
/// Upper bound of container inspections in flight at once.
pub const MAX_CONCURRENT_INSPECTIONS: usize = 64;
/// Errors not yet received are dropped beyond this count.
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Resolves which NPUs each running container uses.
#[derive(Debug)]
pub struct DevicesParser<R> {
    runtime: Arc<R>,
    majors: Arc<MajorIdRegistry>,
    parse_timeout: Duration,
    results_tx: mpsc::Sender<Snapshot>,
    results_rx: Mutex<mpsc::Receiver<Snapshot>>,
    errors_tx: mpsc::Sender<Error>,
    errors_rx: Mutex<mpsc::Receiver<Error>>,
}

impl<R: RuntimeOperator> DevicesParser<R> {
    /// Creates a parser on top of `runtime`. The runtime is not connected until
    /// [`init`](Self::init).
    pub fn new(runtime: R, options: &MonitorOptions) -> Self {
        let (results_tx, results_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            runtime: Arc::new(runtime),
            majors: MajorIdRegistry::system(),
            parse_timeout: options.parse_timeout.unwrap_or(DEFAULT_PARSE_TIMEOUT),
            results_tx,
            results_rx: Mutex::new(results_rx),
            errors_tx,
            errors_rx: Mutex::new(errors_rx),
        }
    }

    /// Replaces the registry of NPU device majors, [`MajorIdRegistry::system`] by default.
    pub fn with_major_ids(mut self, majors: Arc<MajorIdRegistry>) -> Self {
        self.majors = majors;
        self
    }

    /// Connects to the container runtime and loads the NPU device majors.
    ///
    /// # Errors
    ///
    /// Returns the runtime's connection error. The parser cannot be used without a connection.
    pub async fn init(&self) -> discovery::Result<()> {
        self.runtime.init().await?;

        let majors = Arc::clone(&self.majors);
        match tokio::task::spawn_blocking(move || majors.major_ids().len()).await {
            Ok(count) => log::debug!("Loaded {} NPU device majors", count),
            Err(err) => log::warn!("failed to load NPU device majors: {}", err),
        }
        Ok(())
    }

    /// Drops the runtime connections. Calling it more than once is harmless.
    pub fn close(&self) {
        self.runtime.close();
    }

    /// Starts one poll cycle in the background.
    ///
    /// The snapshot, if the cycle completes, is delivered to [`recv_result`](Self::recv_result)
    /// and every error encountered to [`recv_err`](Self::recv_err). The returned handle may be
    /// ignored.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn fetch_and_parse(&self) -> JoinHandle<()> {
        let cycle = Cycle {
            runtime: Arc::clone(&self.runtime),
            majors: Arc::clone(&self.majors),
            timeout: self.parse_timeout,
            results: self.results_tx.clone(),
            errors: self.errors_tx.clone(),
        };
        tokio::spawn(cycle.run())
    }

    /// Waits for the next snapshot.
    pub async fn recv_result(&self) -> Option<Snapshot> {
        self.results_rx.lock().await.recv().await
    }

    /// Waits for the next error.
    pub async fn recv_err(&self) -> Option<Error> {
        self.errors_rx.lock().await.recv().await
    }
}

/// State shared by the tasks of one poll cycle.
struct Cycle<R> {
    runtime: Arc<R>,
    majors: Arc<MajorIdRegistry>,
    timeout: Duration,
    results: mpsc::Sender<Snapshot>,
    errors: mpsc::Sender<Error>,
}

impl<R: RuntimeOperator> Cycle<R> {
    async fn run(self) {
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(err) => {
                report_error(&self.errors, err.into());
                return;
            }
        };
        if containers.is_empty() {
            log::debug!("No running containers");
            self.deliver(Snapshot::new()).await;
            return;
        }
        if containers.len() > MAX_CONTAINERS {
            log::warn!(
                "Too many containers to inspect ({}, max {}), skipping cycle",
                containers.len(),
                MAX_CONTAINERS
            );
            self.deliver(Snapshot::new()).await;
            return;
        }

        let dispatched = containers.len();
        let (tx, mut rx) = mpsc::channel(dispatched);
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_INSPECTIONS));
        let mut workers = JoinSet::new();
        for container in containers {
            let mut guard = ResultGuard::new(tx.clone());
            let runtime = Arc::clone(&self.runtime);
            let majors = Arc::clone(&self.majors);
            let semaphore = Arc::clone(&semaphore);
            let errors = self.errors.clone();
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                match parse::inspect_container(&*runtime, &container, &majors).await {
                    Ok(Some(assignment)) => guard.set(assignment),
                    Ok(None) => {}
                    Err(err) => report_error(&errors, err),
                }
            });
        }
        drop(tx);
        log::trace!("Dispatched {} container inspections", dispatched);

        match collect(&mut rx, dispatched, self.timeout).await {
            Ok(snapshot) => self.deliver(snapshot).await,
            Err(err) => report_error(&self.errors, err),
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                report_error(&self.errors, Error::WorkerPanicked(err));
            }
        }
    }

    async fn deliver(&self, snapshot: Snapshot) {
        log::debug!("Resolved NPUs of {} containers", snapshot.len());
        if self.results.send(snapshot).await.is_err() {
            log::debug!("Snapshot receiver is gone");
        }
    }
}

fn report_error(errors: &mpsc::Sender<Error>, err: Error) {
    if let Err(TrySendError::Full(err)) = errors.try_send(err) {
        log::error!("Error channel is full, dropping: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::container::ContainerID;
    use crate::discovery::descriptor::{
        ContainerConfig, DeviceMapping, HostConfig, Linux, LinuxDeviceCgroup, LinuxResources,
        Process,
    };
    use crate::discovery::{ContainerKind, ContainerRef, IsulaContainer, Spec};

    use super::*;

    struct MockRuntime {
        kind: ContainerKind,
        containers: Vec<ContainerRef>,
        specs: HashMap<String, Spec>,
        isula: HashMap<String, IsulaContainer>,
        delays: HashMap<String, Duration>,
        fail_list: bool,
        inspected: AtomicUsize,
    }

    impl MockRuntime {
        fn new(kind: ContainerKind) -> Self {
            Self {
                kind,
                containers: Vec::new(),
                specs: HashMap::new(),
                isula: HashMap::new(),
                delays: HashMap::new(),
                fail_list: false,
                inspected: AtomicUsize::new(0),
            }
        }

        fn with_spec(mut self, container: ContainerRef, spec: Spec) -> Self {
            self.specs.insert(container.id().to_string(), spec);
            self.containers.push(container);
            self
        }

        fn with_isula(mut self, container: ContainerRef, descriptor: IsulaContainer) -> Self {
            self.isula.insert(container.id().to_string(), descriptor);
            self.containers.push(container);
            self
        }

        async fn delay(&self, id: &ContainerID) {
            self.inspected.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(id.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
    }

    impl RuntimeOperator for MockRuntime {
        async fn init(&self) -> discovery::Result<()> {
            Ok(())
        }

        fn close(&self) {}

        async fn list_containers(&self) -> discovery::Result<Vec<ContainerRef>> {
            if self.fail_list {
                return Err(discovery::Error::NotConnected);
            }
            Ok(self.containers.clone())
        }

        async fn container_spec(&self, id: &ContainerID) -> discovery::Result<Spec> {
            self.delay(id).await;
            self.specs
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| discovery::Error::MissingSpec(id.clone()))
        }

        async fn isula_container(&self, id: &ContainerID) -> discovery::Result<IsulaContainer> {
            self.delay(id).await;
            Ok(self.isula.get(id.as_str()).cloned().unwrap_or_default())
        }

        fn container_kind(&self) -> ContainerKind {
            self.kind
        }
    }

    fn pod_container(id: &str) -> ContainerRef {
        let labels = [
            ("io.kubernetes.pod.namespace", "default"),
            ("io.kubernetes.pod.name", "job-0"),
            ("io.kubernetes.container.name", id),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        ContainerRef::new(ContainerID::new(id).unwrap(), id, labels)
    }

    fn oci_spec(env: &[&str], devices: Vec<LinuxDeviceCgroup>) -> Spec {
        Spec {
            process: Some(Process {
                env: env.iter().map(|e| e.to_string()).collect(),
            }),
            linux: Some(Linux {
                resources: Some(LinuxResources { devices }),
            }),
        }
    }

    fn npu_cgroup(minor: i64) -> LinuxDeviceCgroup {
        LinuxDeviceCgroup {
            allow: true,
            kind: Some("c".to_owned()),
            major: Some(236),
            minor: Some(minor),
            access: Some("rwm".to_owned()),
        }
    }

    fn parser(runtime: MockRuntime, parse_timeout: Option<Duration>) -> DevicesParser<MockRuntime> {
        let options = MonitorOptions {
            parse_timeout,
            ..MonitorOptions::default()
        };
        DevicesParser::new(runtime, &options)
            .with_major_ids(Arc::new(MajorIdRegistry::with_ids(vec![236])))
    }

    async fn drain_errors(parser: &DevicesParser<MockRuntime>) -> Vec<Error> {
        let mut rx = parser.errors_rx.lock().await;
        let mut errors = Vec::new();
        while let Ok(err) = rx.try_recv() {
            errors.push(err);
        }
        errors
    }

    async fn has_snapshot(parser: &DevicesParser<MockRuntime>) -> bool {
        parser.results_rx.lock().await.try_recv().is_ok()
    }

    #[tokio::test]
    async fn test_no_containers_yield_empty_snapshot() {
        let parser = parser(MockRuntime::new(ContainerKind::Oci), None);
        parser.init().await.unwrap();
        parser.fetch_and_parse().await.unwrap();

        assert!(parser.recv_result().await.unwrap().is_empty());
        assert_eq!(parser.runtime.inspected.load(Ordering::SeqCst), 0);
        assert!(drain_errors(&parser).await.is_empty());
    }

    #[tokio::test]
    async fn test_init_loads_major_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Character devices:\n  1 mem\n236 devdrv-cdev").unwrap();
        let majors = Arc::new(MajorIdRegistry::new(file.path()));
        let runtime = MockRuntime::new(ContainerKind::Oci);
        let parser = DevicesParser::new(runtime, &MonitorOptions::default())
            .with_major_ids(Arc::clone(&majors));

        parser.init().await.unwrap();
        file.close().unwrap();

        assert_eq!(majors.major_ids(), &[236]);
        parser.close();
        parser.close();
    }

    #[tokio::test]
    async fn test_too_many_containers_yield_empty_snapshot() {
        let mut runtime = MockRuntime::new(ContainerKind::Oci);
        for i in 0..=MAX_CONTAINERS {
            runtime = runtime.with_spec(pod_container(&format!("c{i}")), oci_spec(&[], vec![]));
        }
        let parser = parser(runtime, None);
        parser.fetch_and_parse().await.unwrap();

        assert!(parser.recv_result().await.unwrap().is_empty());
        assert_eq!(parser.runtime.inspected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_containers_do_not_fail_the_cycle() {
        let mut runtime = MockRuntime::new(ContainerKind::Oci)
            .with_spec(
                pod_container("env"),
                oci_spec(&["ASCEND_VISIBLE_DEVICES=Ascend910-0,Ascend910-1"], vec![]),
            )
            .with_spec(
                pod_container("cgroup"),
                oci_spec(&["PATH=/usr/bin"], vec![npu_cgroup(3)]),
            )
            .with_spec(pod_container("cpu-only"), oci_spec(&["PATH=/usr/bin"], vec![]))
            .with_spec(
                ContainerRef::new(ContainerID::new("unnamed").unwrap(), "", HashMap::new()),
                oci_spec(&["ASCEND_VISIBLE_DEVICES=5"], vec![]),
            );
        runtime.containers.push(pod_container("gone"));
        let parser = parser(runtime, None);
        parser.fetch_and_parse().await.unwrap();

        let snapshot = parser.recv_result().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        let env = snapshot.get("env").unwrap();
        assert_eq!(env.name(), "default_job-0_env");
        assert_eq!(env.devices(), &[0, 1]);
        assert_eq!(snapshot.get("cgroup").unwrap().devices(), &[3]);

        let errors = drain_errors(&parser).await;
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .any(|err| matches!(err, Error::MissingName(id) if id.as_str() == "unnamed"))
        );
        assert!(errors.iter().any(|err| matches!(
            err,
            Error::Discovery(discovery::Error::MissingSpec(id)) if id.as_str() == "gone"
        )));
    }

    #[tokio::test]
    async fn test_privileged_isula_containers_are_skipped() {
        let descriptor = |privileged| IsulaContainer {
            host_config: Some(HostConfig {
                privileged,
                devices: vec![DeviceMapping {
                    path_on_host: "/dev/davinci2".to_owned(),
                    path_in_container: "/dev/davinci2".to_owned(),
                    cgroup_permissions: "rwm".to_owned(),
                }],
            }),
            config: Some(ContainerConfig { env: Vec::new() }),
        };
        let runtime = MockRuntime::new(ContainerKind::Isula)
            .with_isula(pod_container("privileged"), descriptor(true))
            .with_isula(pod_container("regular"), descriptor(false));
        let parser = parser(runtime, None);
        parser.fetch_and_parse().await.unwrap();

        let snapshot = parser.recv_result().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("regular").unwrap().devices(), &[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_container_times_out_the_cycle() {
        let mut runtime = MockRuntime::new(ContainerKind::Oci)
            .with_spec(pod_container("fast"), oci_spec(&["ASCEND_VISIBLE_DEVICES=0"], vec![]))
            .with_spec(pod_container("slow"), oci_spec(&["ASCEND_VISIBLE_DEVICES=1"], vec![]));
        runtime
            .delays
            .insert("slow".to_owned(), Duration::from_secs(10));
        let parser = parser(runtime, Some(Duration::from_secs(1)));
        parser.fetch_and_parse().await.unwrap();

        assert!(!has_snapshot(&parser).await);
        let errors = drain_errors(&parser).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            Error::AggregationTimeout {
                pending: 1,
                dispatched: 2,
                ..
            }
        ));
        assert_eq!(parser.runtime.inspected.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_timeout_reports_without_waiting() {
        let runtime = MockRuntime::new(ContainerKind::Oci)
            .with_spec(pod_container("c1"), oci_spec(&["ASCEND_VISIBLE_DEVICES=0"], vec![]));
        let parser = parser(runtime, Some(Duration::ZERO));
        parser.fetch_and_parse().await.unwrap();

        assert!(!has_snapshot(&parser).await);
        assert!(matches!(
            drain_errors(&parser).await.as_slice(),
            [Error::AggregationTimeout { .. }]
        ));
    }

    #[tokio::test]
    async fn test_repeated_cycles_yield_same_snapshot() {
        let runtime = MockRuntime::new(ContainerKind::Oci)
            .with_spec(pod_container("c1"), oci_spec(&["ASCEND_VISIBLE_DEVICES=0-3"], vec![]))
            .with_spec(
                pod_container("c2"),
                oci_spec(&[], vec![npu_cgroup(4), npu_cgroup(6)]),
            );
        let parser = parser(runtime, None);

        parser.fetch_and_parse().await.unwrap();
        let first = parser.recv_result().await.unwrap();
        parser.fetch_and_parse().await.unwrap();
        let second = parser.recv_result().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let mut runtime = MockRuntime::new(ContainerKind::Oci);
        runtime.fail_list = true;
        let parser = parser(runtime, None);
        parser.fetch_and_parse().await.unwrap();

        assert!(!has_snapshot(&parser).await);
        assert!(matches!(
            drain_errors(&parser).await.as_slice(),
            [Error::Discovery(discovery::Error::NotConnected)]
        ));
    }
}
