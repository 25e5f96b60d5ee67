use std::time::Duration;

use tokio::sync::mpsc;

use crate::container::{DeviceAssignment, Snapshot};

use super::error::{Error, Result};

/// Delivers the outcome of one worker exactly once, when dropped.
///
/// The guard is created before the worker is spawned, so a worker that panics or is never
/// polled still counts as finished.
pub(super) struct ResultGuard {
    tx: mpsc::Sender<Option<DeviceAssignment>>,
    result: Option<DeviceAssignment>,
}

impl ResultGuard {
    pub(super) fn new(tx: mpsc::Sender<Option<DeviceAssignment>>) -> Self {
        Self { tx, result: None }
    }

    pub(super) fn set(&mut self, assignment: DeviceAssignment) {
        self.result = Some(assignment);
    }
}

impl Drop for ResultGuard {
    fn drop(&mut self) {
        // The channel holds one slot per worker, so this only fails once the collector is gone.
        if self.tx.try_send(self.result.take()).is_err() {
            log::trace!("Result collector is gone, dropping worker result");
        }
    }
}

/// Waits for `dispatched` worker results or until `timeout` elapses.
///
/// # Errors
///
/// Returns [`Error::AggregationTimeout`] if the deadline passes first; results received so far
/// are discarded. A zero `timeout` fails without waiting.
pub(super) async fn collect(
    results: &mut mpsc::Receiver<Option<DeviceAssignment>>,
    dispatched: usize,
    timeout: Duration,
) -> Result<Snapshot> {
    let timed_out = |pending| Error::AggregationTimeout {
        timeout,
        pending,
        dispatched,
    };
    if timeout.is_zero() {
        return Err(timed_out(dispatched));
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut snapshot = Snapshot::with_capacity(dispatched);
    let mut pending = dispatched;
    while pending > 0 {
        tokio::select! {
            biased;
            _ = &mut deadline => return Err(timed_out(pending)),
            result = results.recv() => match result {
                Some(Some(assignment)) => {
                    pending -= 1;
                    snapshot.insert(assignment.id().clone(), assignment);
                }
                Some(None) => pending -= 1,
                None => {
                    log::warn!("{} container inspections never reported", pending);
                    break;
                }
            },
        }
    }

    Ok(snapshot)
}
