//! Transport interface consumed by the provisioning pipeline.
//!
//! The pipeline never speaks SSH itself. It drives a [`Communicator`] that
//! owns the connection to the target host: connecting, starting remote
//! commands, uploading files and directories, and disconnecting. The trait
//! is object safe so the orchestrator can share one instance between the
//! pipeline and the disconnect watcher behind an `Arc`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch};

/// Future returned by fallible communicator operations.
pub type CommFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CommError>> + Send + 'a>>;

/// Future returned by [`Communicator::disconnect`].
pub type DisconnectFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Byte sink receiving one output stream of a remote command.
pub type OutputPipe = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors surfaced by a communicator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommError {
    /// Raised when a connection attempt fails.
    #[error("connection attempt failed: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
        /// Whether retrying may succeed (for example, the host is still
        /// booting).
        transient: bool,
    },
    /// Raised when an operation observes a closed connection.
    #[error("connection closed")]
    Disconnected,
    /// Raised when a transfer or command fails at the transport level.
    #[error("{operation} failed: {message}")]
    Transport {
        /// Operation that was attempted.
        operation: String,
        /// Description of the failure.
        message: String,
    },
}

impl CommError {
    /// Returns `true` when a connect attempt is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect {
                transient: true,
                ..
            }
        )
    }
}

/// Backoff applied between connection attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay following `current`: doubled, capped at
    /// [`RetryPolicy::max_delay`].
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

/// A command to start on the remote host.
#[derive(Default)]
pub struct RemoteCmd {
    /// Shell command text, passed to the remote shell verbatim.
    pub command: String,
    /// Receives the remote standard output, if wired.
    pub stdout: Option<OutputPipe>,
    /// Receives the remote standard error, if wired.
    pub stderr: Option<OutputPipe>,
}

impl RemoteCmd {
    /// Creates a command without output sinks.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdout: None,
            stderr: None,
        }
    }

    /// Wires the standard output sink.
    #[must_use]
    pub fn with_stdout(mut self, pipe: OutputPipe) -> Self {
        self.stdout = Some(pipe);
        self
    }

    /// Wires the standard error sink.
    #[must_use]
    pub fn with_stderr(mut self, pipe: OutputPipe) -> Self {
        self.stderr = Some(pipe);
        self
    }
}

impl fmt::Debug for RemoteCmd {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteCmd")
            .field("command", &self.command)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Completion handle for a started remote command.
#[derive(Debug)]
pub struct RemoteProcess {
    exit: oneshot::Receiver<Result<i32, CommError>>,
}

/// Communicator side of a [`RemoteProcess`]; reports how the command ended.
///
/// Dropping the notifier without reporting makes the process resolve to
/// [`CommError::Disconnected`].
#[derive(Debug)]
pub struct ExitNotifier {
    sender: oneshot::Sender<Result<i32, CommError>>,
}

impl RemoteProcess {
    /// Creates a pending process and the notifier that completes it.
    #[must_use]
    pub fn channel() -> (ExitNotifier, Self) {
        let (sender, exit) = oneshot::channel();
        (ExitNotifier { sender }, Self { exit })
    }

    /// Blocks until the remote command exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns the transport error reported by the communicator, or
    /// [`CommError::Disconnected`] when the connection went away first.
    pub async fn wait(self) -> Result<i32, CommError> {
        self.exit.await.unwrap_or(Err(CommError::Disconnected))
    }
}

impl ExitNotifier {
    /// Reports the exit code, or the transport failure that ended the command.
    pub fn finish(self, outcome: Result<i32, CommError>) {
        // The waiting side may have been dropped by cancellation.
        self.sender.send(outcome).ok();
    }
}

/// Connection to a remote host able to run commands and receive files.
///
/// Implementations must tolerate [`Communicator::disconnect`] being called
/// while other operations are in flight; those operations then fail with
/// [`CommError::Disconnected`] (or a transport error) instead of blocking.
pub trait Communicator: Send + Sync {
    /// Performs one connection attempt.
    fn connect(&self) -> CommFuture<'_, ()>;

    /// Closes the connection and aborts in-flight operations.
    fn disconnect(&self) -> DisconnectFuture<'_>;

    /// Overall budget for establishing the connection.
    fn timeout(&self) -> Duration;

    /// Backoff between connection attempts.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Starts `cmd` on the remote host.
    ///
    /// The communicator owns the output pipes for the lifetime of the
    /// command and must drop them once the remote process has finished.
    fn start(&self, cmd: RemoteCmd) -> CommFuture<'_, RemoteProcess>;

    /// Streams `source` into the remote file `dst`.
    fn upload<'a>(
        &'a self,
        dst: &'a str,
        source: &'a mut (dyn AsyncRead + Send + Unpin),
    ) -> CommFuture<'a, ()>;

    /// Recursively copies the local directory `src` into the remote `dst`,
    /// skipping entries matching any of `exclude`.
    fn upload_dir<'a>(
        &'a self,
        dst: &'a str,
        src: &'a Utf8Path,
        exclude: &'a [&'a str],
    ) -> CommFuture<'a, ()>;
}

/// Resolves once `closed` reads `true` or its sender is gone.
pub(crate) async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}
