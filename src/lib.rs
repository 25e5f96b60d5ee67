//! NPU monitor: attributes the NPUs of a host to the containers using them.
//!
//! The [`monitor::DevicesParser`] periodically lists the running containers of a container
//! runtime (Docker, containerd or iSulad, see [`discovery`]), reads each container's descriptor
//! and resolves its NPUs from the `ASCEND_VISIBLE_DEVICES` variable or, failing that, from its
//! device list (see [`devices`]). The result of one poll is a [`container::Snapshot`].
use tokio::time::MissedTickBehavior;

pub mod config;
pub mod container;
pub mod devices;
pub mod discovery;
pub mod error;
pub mod grpc;
pub mod monitor;

pub use error::{Error, Result};

use config::MonitorOptions;
use container::Snapshot;
use discovery::Runtime;
use monitor::DevicesParser;

/// Runs the monitor until interrupted with Ctrl-C.
///
/// Every poll interval a resolution cycle is started and the resulting snapshots are logged.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the container runtime cannot be
/// reached at startup. Failures during polling are logged and do not stop the monitor.
pub async fn run() -> Result<()> {
    let options = MonitorOptions::from_env()?;
    log::info!(
        "Starting NPU monitor for {} (CRI `{}`, runtime `{}`)",
        options.kind,
        options.cri_endpoint.display(),
        options.oci_endpoint.display()
    );

    let parser = DevicesParser::new(Runtime::from_options(&options), &options);
    parser.init().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(options.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                parser.close();
                signal.map_err(Error::Signal)?;
                log::info!("Shutting down");
                return Ok(());
            }
            _ = interval.tick() => {
                log::trace!("Starting poll cycle");
                parser.fetch_and_parse();
            }
            Some(snapshot) = parser.recv_result() => log_snapshot(&snapshot),
            Some(err) = parser.recv_err() => log::error!("{}", err),
        }
    }
}

fn log_snapshot(snapshot: &Snapshot) {
    log::info!("{} containers use NPUs", snapshot.len());
    let mut assignments: Vec<_> = snapshot.values().collect();
    assignments.sort_by(|a, b| a.name().cmp(b.name()));
    for assignment in assignments {
        log::debug!(
            "container `{}` ({}) uses NPUs {:?}",
            assignment.name(),
            assignment.id(),
            assignment.devices()
        );
    }
}
