//! [`Communicator`] backed by the system `ssh` and `rsync` binaries.
//!
//! Every remote command runs in its own `ssh` process, so there is no
//! long-lived session to keep alive. [`SshCommunicator::disconnect`] marks the
//! communicator closed, which kills in-flight child processes and makes
//! blocked operations fail with [`CommError::Disconnected`].

use std::ffi::OsString;
use std::future::Future;
use std::process::{Output, Stdio};
use std::time::Duration;

use camino::Utf8Path;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::communicator::{
    CommError, CommFuture, Communicator, DisconnectFuture, OutputPipe, RemoteCmd, RemoteProcess,
    RetryPolicy, wait_closed,
};
use args::{rsync_args, ssh_args, upload_command};

mod args;
mod config;

pub use args::expand_tilde;
pub use config::{SshConfig, SshConfigError};

/// Exit status `ssh` reports for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// Connection to one host through the system `ssh` client.
#[derive(Debug)]
pub struct SshCommunicator {
    config: SshConfig,
    host: String,
    closed: watch::Sender<bool>,
}

impl SshCommunicator {
    /// Creates a communicator for `host`.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Invalid`] when `config` fails validation.
    pub fn new(config: SshConfig, host: impl Into<String>) -> Result<Self, SshConfigError> {
        config.validate()?;
        let (closed, _) = watch::channel(false);
        Ok(Self {
            config,
            host: host.into(),
            closed,
        })
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    fn ssh(&self, remote_command: &str) -> Command {
        let mut command = Command::new(&self.config.ssh_bin);
        command
            .args(ssh_args(&self.config, &self.host, remote_command))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn ensure_open(&self) -> Result<(), CommError> {
        if *self.closed.borrow() {
            return Err(CommError::Disconnected);
        }
        Ok(())
    }

    async fn unless_closed<T>(
        &self,
        operation: impl Future<Output = Result<T, CommError>>,
    ) -> Result<T, CommError> {
        let closed = self.closed.subscribe();
        tokio::select! {
            result = operation => result,
            () = wait_closed(closed) => Err(CommError::Disconnected),
        }
    }
}

impl Communicator for SshCommunicator {
    fn connect(&self) -> CommFuture<'_, ()> {
        Box::pin(async move {
            self.closed.send_replace(false);
            let output = self
                .ssh("true")
                .output()
                .await
                .map_err(|err| CommError::Connect {
                    message: format!("failed to spawn {}: {err}", self.config.ssh_bin),
                    transient: false,
                })?;
            match output.status.code() {
                Some(0) => Ok(()),
                Some(SSH_FAILURE_STATUS) => Err(CommError::Connect {
                    message: stderr_text(&output),
                    transient: true,
                }),
                _ => Err(CommError::Connect {
                    message: format!(
                        "connection check exited with {}: {}",
                        output.status,
                        stderr_text(&output)
                    ),
                    transient: false,
                }),
            }
        })
    }

    fn disconnect(&self) -> DisconnectFuture<'_> {
        Box::pin(async move {
            tracing::debug!(host = %self.host, "closing ssh communicator");
            self.closed.send_replace(true);
        })
    }

    fn timeout(&self) -> Duration {
        self.config.connect_timeout()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    fn start(&self, cmd: RemoteCmd) -> CommFuture<'_, RemoteProcess> {
        Box::pin(async move {
            self.ensure_open()?;
            let RemoteCmd {
                command,
                stdout,
                stderr,
            } = cmd;
            let mut child = self
                .ssh(&command)
                .stdout(Stdio::piped())
                .spawn()
                .map_err(|err| CommError::Transport {
                    operation: format!("spawn {}", self.config.ssh_bin),
                    message: err.to_string(),
                })?;
            let child_stdout = child.stdout.take();
            let child_stderr = child.stderr.take();
            let (notifier, process) = RemoteProcess::channel();
            let closed = self.closed.subscribe();

            tokio::spawn(async move {
                let (outcome, (), ()) = tokio::join!(
                    wait_or_kill(&mut child, closed.clone()),
                    forward(child_stdout, stdout, closed.clone()),
                    forward(child_stderr, stderr, closed),
                );
                notifier.finish(outcome);
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
            self.ensure_open()?;
            let operation = format!("upload to {dst}");
            let transfer = async {
                let mut child = self
                    .ssh(&upload_command(dst))
                    .stdin(Stdio::piped())
                    .spawn()
                    .map_err(|err| transport(&operation, &err))?;
                let mut stdin = child.stdin.take().ok_or_else(|| CommError::Transport {
                    operation: operation.clone(),
                    message: String::from("stdin unavailable"),
                })?;
                tokio::io::copy(source, &mut stdin)
                    .await
                    .map_err(|err| transport(&operation, &err))?;
                stdin
                    .shutdown()
                    .await
                    .map_err(|err| transport(&operation, &err))?;
                drop(stdin);
                let output = child
                    .wait_with_output()
                    .await
                    .map_err(|err| transport(&operation, &err))?;
                check_status(&operation, &output)
            };
            self.unless_closed(transfer).await
        })
    }

    fn upload_dir<'a>(
        &'a self,
        dst: &'a str,
        src: &'a Utf8Path,
        exclude: &'a [&'a str],
    ) -> CommFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let operation = format!("rsync {src} to {dst}");
            let args: Vec<OsString> = rsync_args(&self.config, &self.host, src, dst, exclude);
            let transfer = async {
                let output = Command::new(&self.config.rsync_bin)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .output()
                    .await
                    .map_err(|err| transport(&operation, &err))?;
                check_status(&operation, &output)
            };
            self.unless_closed(transfer).await
        })
    }
}

async fn wait_or_kill(child: &mut Child, closed: watch::Receiver<bool>) -> Result<i32, CommError> {
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        () = wait_closed(closed) => None,
    };

    match waited {
        Some(Ok(status)) => status.code().ok_or_else(|| CommError::Transport {
            operation: String::from("remote command"),
            message: format!("ssh terminated without an exit status: {status}"),
        }),
        Some(Err(err)) => Err(transport("wait for remote command", &err)),
        None => {
            if let Err(err) = child.kill().await {
                tracing::warn!(error = %err, "failed to kill ssh process");
            }
            Err(CommError::Disconnected)
        }
    }
}

async fn forward<R>(source: Option<R>, sink: Option<OutputPipe>, closed: watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = source else {
        return;
    };
    let mut writer: OutputPipe = sink.unwrap_or_else(|| Box::new(tokio::io::sink()));
    tokio::select! {
        copied = tokio::io::copy(&mut reader, &mut writer) => {
            if let Err(err) = copied {
                tracing::debug!(error = %err, "remote output forwarding stopped");
            }
        }
        () = wait_closed(closed) => {}
    }
    writer.shutdown().await.ok();
}

fn check_status(operation: &str, output: &Output) -> Result<(), CommError> {
    if output.status.success() {
        return Ok(());
    }
    Err(CommError::Transport {
        operation: operation.to_owned(),
        message: format!("exited with {}: {}", output.status, stderr_text(output)),
    })
}

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}

fn transport(operation: &str, err: &std::io::Error) -> CommError {
    CommError::Transport {
        operation: operation.to_owned(),
        message: err.to_string(),
    }
}
