//! Connection establishment and the cancellation-driven disconnect watcher.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::ProvisionError;
use crate::cancel::CancelSignal;
use crate::communicator::{CommError, Communicator};
use crate::progress::ProgressSink;

/// Connects, retrying transient failures with backoff until the
/// communicator's timeout elapses.
pub(super) async fn connect_with_retry(
    comm: &dyn Communicator,
    progress: &dyn ProgressSink,
) -> Result<(), ProvisionError> {
    let budget = comm.timeout();
    let policy = comm.retry_policy();
    let mut last_error: Option<CommError> = None;

    let attempts = async {
        let mut delay = policy.initial_delay;
        loop {
            match comm.connect().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => {
                    tracing::warn!(error = %err, ?delay, "connection attempt failed; retrying");
                    progress.output(&format!(
                        "Connection attempt failed: {err}. Retrying in {}s",
                        delay.as_secs()
                    ));
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                    delay = policy.next_delay(delay);
                }
                Err(err) => return Err(err),
            }
        }
    };

    let outcome = tokio::time::timeout(budget, attempts).await;
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ProvisionError::Connection {
            message: err.to_string(),
            source: Some(err),
        }),
        Err(_) => Err(ProvisionError::Connection {
            message: format!("timed out after {}s", budget.as_secs()),
            source: last_error,
        }),
    }
}

/// Background task that disconnects the communicator exactly once: as soon
/// as cancellation fires, or when the apply finishes.
pub(super) struct DisconnectWatcher {
    done: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl DisconnectWatcher {
    pub(super) fn spawn(comm: Arc<dyn Communicator>, cancel: CancelSignal) -> Self {
        let (done, finished) = oneshot::channel();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("cancellation requested; disconnecting");
                }
                _ = finished => {}
            }
            comm.disconnect().await;
        });
        Self { done, task }
    }

    /// Signals completion and waits until the disconnect has happened.
    pub(super) async fn finish(self) {
        // Already gone when cancellation fired first.
        self.done.send(()).ok();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "disconnect watcher failed");
        }
    }
}
