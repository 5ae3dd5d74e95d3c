//! Remote operation primitives built on a [`Communicator`].
//!
//! Every primitive blocks until the remote side reports completion. Commands
//! stream their standard output and error into the progress sink line by line
//! while the exit status is awaited.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::command::Elevation;
use crate::communicator::{CommError, Communicator, RemoteCmd};
use crate::progress::ProgressSink;

const PIPE_CAPACITY: usize = 8 * 1024;

/// Errors raised by remote primitives.
///
/// Commands are reported without their elevation prefix so a configured sudo
/// password never reaches error messages or logs.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Raised when the communicator fails to run or transfer.
    #[error("{command}: {source}")]
    Transport {
        /// Command or transfer that was attempted.
        command: String,
        /// Transport failure.
        #[source]
        source: CommError,
    },
    /// Raised when a remote command exits with a non-zero status.
    #[error("{command} exited with status {status}")]
    Exit {
        /// Command that failed.
        command: String,
        /// Remote exit status.
        status: i32,
    },
    /// Raised when a local file cannot be opened for upload.
    #[error("failed to open {path}: {source}")]
    LocalIo {
        /// Local file that was requested.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl RemoteError {
    /// Returns the remote exit status for [`RemoteError::Exit`].
    #[must_use]
    pub const fn exit_status(&self) -> Option<i32> {
        match self {
            Self::Exit { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Whether a command runs as the connecting user or with elevation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Privilege {
    /// Run unmodified.
    User,
    /// Wrap with the configured [`Elevation`].
    Elevated,
}

/// Remote primitives bound to one connection, progress sink and elevation
/// mode.
#[derive(Clone, Copy)]
pub struct RemoteOps<'a> {
    comm: &'a dyn Communicator,
    progress: &'a dyn ProgressSink,
    elevation: &'a Elevation,
}

impl<'a> RemoteOps<'a> {
    /// Binds the primitives to a connection.
    #[must_use]
    pub const fn new(
        comm: &'a dyn Communicator,
        progress: &'a dyn ProgressSink,
        elevation: &'a Elevation,
    ) -> Self {
        Self {
            comm,
            progress,
            elevation,
        }
    }

    /// Idempotently creates `path` and its parents.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the command cannot run or fails.
    pub async fn create_dir(&self, path: &str, privilege: Privilege) -> Result<(), RemoteError> {
        self.progress.output(&format!("Creating directory: {path}"));
        self.run_command(&format!("mkdir -p {}", quote(path)), privilege)
            .await
    }

    /// Recursively removes `path`. Succeeds when the path is absent.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the command cannot run or fails.
    pub async fn remove_dir(&self, path: &str) -> Result<(), RemoteError> {
        self.progress.output(&format!("Removing directory: {path}"));
        self.run_command(&format!("rm -rf {}", quote(path)), Privilege::Elevated)
            .await
    }

    /// Moves `src` to `dst` on the remote host.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the command cannot run or fails.
    pub async fn move_file(&self, dst: &str, src: &str) -> Result<(), RemoteError> {
        self.progress.output(&format!("Moving {src} to {dst}"));
        self.run_command(
            &format!("mv {} {}", quote(src), quote(dst)),
            Privilege::Elevated,
        )
        .await
    }

    /// Streams the local file `src` into the remote file `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::LocalIo`] when `src` cannot be opened and
    /// [`RemoteError::Transport`] when the transfer fails.
    pub async fn upload_file(&self, dst: &str, src: &Utf8Path) -> Result<(), RemoteError> {
        let mut file = tokio::fs::File::open(src)
            .await
            .map_err(|source| RemoteError::LocalIo {
                path: src.to_path_buf(),
                source,
            })?;
        self.comm
            .upload(dst, &mut file)
            .await
            .map_err(|source| RemoteError::Transport {
                command: format!("upload {src} to {dst}"),
                source,
            })
    }

    /// Copies the contents of the local directory `src` into `dst`, skipping
    /// entries matching `exclude`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when `dst` cannot be created or the transfer
    /// fails.
    pub async fn upload_dir(
        &self,
        dst: &str,
        src: &Utf8Path,
        exclude: &[&str],
    ) -> Result<(), RemoteError> {
        self.create_dir(dst, Privilege::User).await?;
        let contents = with_trailing_separator(src);
        self.progress
            .output(&format!("Uploading {contents} to {dst}"));
        self.comm
            .upload_dir(dst, &contents, exclude)
            .await
            .map_err(|source| RemoteError::Transport {
                command: format!("upload {contents} to {dst}"),
                source,
            })
    }

    /// Runs `command` and relays its output until it exits.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Exit`] on a non-zero exit status and
    /// [`RemoteError::Transport`] when the command cannot be started or the
    /// connection drops.
    pub async fn run_command(&self, command: &str, privilege: Privilege) -> Result<(), RemoteError> {
        let wire = match privilege {
            Privilege::User => command.to_owned(),
            Privilege::Elevated => self.elevation.wrap(command),
        };
        tracing::debug!(command, ?privilege, "running remote command");

        let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let cmd = RemoteCmd::new(wire)
            .with_stdout(Box::new(stdout_writer))
            .with_stderr(Box::new(stderr_writer));

        let process = self
            .comm
            .start(cmd)
            .await
            .map_err(|source| RemoteError::Transport {
                command: command.to_owned(),
                source,
            })?;

        let (status, (), ()) = tokio::join!(
            process.wait(),
            relay_lines(stdout_reader, self.progress),
            relay_lines(stderr_reader, self.progress),
        );

        match status {
            Ok(0) => Ok(()),
            Ok(status) => Err(RemoteError::Exit {
                command: command.to_owned(),
                status,
            }),
            Err(source) => Err(RemoteError::Transport {
                command: command.to_owned(),
                source,
            }),
        }
    }
}

async fn relay_lines<R>(reader: R, progress: &dyn ProgressSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                progress.output(line.trim_end_matches(['\r', '\n']));
            }
            Err(err) => {
                tracing::debug!(error = %err, "output relay stopped");
                break;
            }
        }
    }
}

fn quote(path: &str) -> String {
    escape(path.into()).into_owned()
}

fn with_trailing_separator(src: &Utf8Path) -> Utf8PathBuf {
    let text = src.as_str();
    if text.ends_with('/') {
        src.to_path_buf()
    } else {
        Utf8PathBuf::from(format!("{text}/"))
    }
}
