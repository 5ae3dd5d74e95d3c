//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use crate::cancel::CancelHandle;
use crate::communicator::{
    CommError, CommFuture, Communicator, DisconnectFuture, OutputPipe, RemoteCmd, RemoteProcess,
    RetryPolicy, wait_closed,
};
use crate::progress::ProgressSink;

/// One call observed by [`ScriptedCommunicator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordedOp {
    /// A connection attempt.
    Connect,
    /// A disconnect request.
    Disconnect,
    /// A started command, exactly as sent over the wire.
    Start(String),
    /// A file upload.
    Upload {
        /// Remote destination.
        dst: String,
    },
    /// A directory upload.
    UploadDir {
        /// Remote destination.
        dst: String,
        /// Local source as passed by the caller.
        src: String,
        /// Exclusion patterns.
        exclude: Vec<String>,
    },
}

#[derive(Debug)]
struct ScriptedResponse {
    code: i32,
    stdout: String,
    stderr: String,
}

#[derive(Debug)]
struct Blocker {
    pattern: String,
    cancel: Option<CancelHandle>,
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<ScriptedResponse>,
    connect_failures: VecDeque<CommError>,
    operations: Vec<RecordedOp>,
    uploads: BTreeMap<String, String>,
    blocker: Option<Blocker>,
}

/// Communicator double that replays scripted command outcomes in FIFO order.
///
/// Commands without a scripted response exit with status 0 and no output.
/// Every call is recorded for later assertions.
#[derive(Debug)]
pub struct ScriptedCommunicator {
    state: Mutex<ScriptState>,
    closed: watch::Sender<bool>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Default for ScriptedCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCommunicator {
    /// Creates a communicator with a 60 second timeout and the default retry
    /// policy.
    #[must_use]
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            state: Mutex::new(ScriptState::default()),
            closed,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the connect timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the connect retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Queues an exit status for the next started command.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(code, "", "");
    }

    /// Queues an exit status and output for the next started command.
    pub fn push_output(&self, code: i32, stdout: impl Into<String>, stderr: impl Into<String>) {
        self.lock().responses.push_back(ScriptedResponse {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    /// Queues a failure for the next connection attempt.
    pub fn push_connect_failure(&self, error: CommError) {
        self.lock().connect_failures.push_back(error);
    }

    /// Makes commands containing `pattern` run until the connection is
    /// closed.
    pub fn block_on(&self, pattern: impl Into<String>) {
        self.lock().blocker = Some(Blocker {
            pattern: pattern.into(),
            cancel: None,
        });
    }

    /// Like [`ScriptedCommunicator::block_on`], additionally firing `handle`
    /// as soon as a matching command starts.
    pub fn cancel_on(&self, pattern: impl Into<String>, handle: CancelHandle) {
        self.lock().blocker = Some(Blocker {
            pattern: pattern.into(),
            cancel: Some(handle),
        });
    }

    /// Returns a snapshot of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<RecordedOp> {
        self.lock().operations.clone()
    }

    /// Returns the started commands in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Start(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the bytes uploaded to `dst`, decoded as UTF-8.
    #[must_use]
    pub fn uploaded(&self, dst: &str) -> Option<String> {
        self.lock().uploads.get(dst).cloned()
    }

    /// Counts disconnect requests.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.count(&RecordedOp::Disconnect)
    }

    /// Counts connection attempts.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.count(&RecordedOp::Connect)
    }

    fn count(&self, wanted: &RecordedOp) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| *op == wanted)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn start_blocked(&self, cmd: RemoteCmd) -> RemoteProcess {
        let (notifier, process) = RemoteProcess::channel();
        let closed = self.closed.subscribe();
        tokio::spawn(async move {
            let pipes = (cmd.stdout, cmd.stderr);
            wait_closed(closed).await;
            drop(pipes);
            notifier.finish(Err(CommError::Disconnected));
        });
        process
    }
}

impl Communicator for ScriptedCommunicator {
    fn connect(&self) -> CommFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.operations.push(RecordedOp::Connect);
            state.connect_failures.pop_front().map_or(Ok(()), Err)
        })
    }

    fn disconnect(&self) -> DisconnectFuture<'_> {
        Box::pin(async move {
            self.lock().operations.push(RecordedOp::Disconnect);
            self.closed.send_replace(true);
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn start(&self, cmd: RemoteCmd) -> CommFuture<'_, RemoteProcess> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(CommError::Disconnected);
            }

            let (blocked, response) = {
                let mut state = self.lock();
                state.operations.push(RecordedOp::Start(cmd.command.clone()));
                let blocker = state
                    .blocker
                    .as_ref()
                    .filter(|blocker| cmd.command.contains(&blocker.pattern));
                if let Some(handle) = blocker.and_then(|blocker| blocker.cancel.as_ref()) {
                    handle.cancel();
                }
                if blocker.is_some() {
                    (true, None)
                } else {
                    (false, state.responses.pop_front())
                }
            };

            if blocked {
                return Ok(self.start_blocked(cmd));
            }

            let response = response.unwrap_or(ScriptedResponse {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
            let (notifier, process) = RemoteProcess::channel();
            tokio::spawn(async move {
                write_output(cmd.stdout, &response.stdout).await;
                write_output(cmd.stderr, &response.stderr).await;
                notifier.finish(Ok(response.code));
            });
            Ok(process)
        })
    }

    fn upload<'a>(
        &'a self,
        dst: &'a str,
        source: &'a mut (dyn AsyncRead + Send + Unpin),
    ) -> CommFuture<'a, ()> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(CommError::Disconnected);
            }
            let mut contents = Vec::new();
            source
                .read_to_end(&mut contents)
                .await
                .map_err(|err| CommError::Transport {
                    operation: format!("upload to {dst}"),
                    message: err.to_string(),
                })?;
            let mut state = self.lock();
            state.operations.push(RecordedOp::Upload {
                dst: dst.to_owned(),
            });
            state.uploads.insert(
                dst.to_owned(),
                String::from_utf8_lossy(&contents).into_owned(),
            );
            Ok(())
        })
    }

    fn upload_dir<'a>(
        &'a self,
        dst: &'a str,
        src: &'a Utf8Path,
        exclude: &'a [&'a str],
    ) -> CommFuture<'a, ()> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(CommError::Disconnected);
            }
            self.lock().operations.push(RecordedOp::UploadDir {
                dst: dst.to_owned(),
                src: src.to_string(),
                exclude: exclude.iter().map(|pattern| (*pattern).to_owned()).collect(),
            });
            Ok(())
        })
    }
}

async fn write_output(pipe: Option<OutputPipe>, text: &str) {
    let Some(mut pipe) = pipe else {
        return;
    };
    if let Err(err) = pipe.write_all(text.as_bytes()).await {
        tracing::debug!(error = %err, "scripted output dropped");
    }
}

/// Progress sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
}

impl RecordingProgress {
    /// Returns a snapshot of the recorded lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn output(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_owned());
    }
}
