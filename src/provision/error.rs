//! Error types for the provisioning pipeline.

use thiserror::Error;

use crate::communicator::CommError;
use crate::config::ValidationErrors;
use crate::grains::FactsError;
use crate::remote::RemoteError;

/// Errors raised while applying a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Raised when the connection could not be established in time.
    #[error("failed to connect: {message}")]
    Connection {
        /// Human-readable description of the failure.
        message: String,
        /// Last communicator error observed, if any.
        #[source]
        source: Option<CommError>,
    },
    /// Raised when downloading or running the salt bootstrap script fails.
    #[error("salt bootstrap {step} failed: {source}")]
    Bootstrap {
        /// Bootstrap step that failed (`download` or `install`).
        step: &'static str,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when creating, uploading, moving or removing staged content
    /// fails.
    #[error("failed to {action} {path}: {source}")]
    Staging {
        /// Operation that was attempted.
        action: &'static str,
        /// Remote path involved.
        path: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when the final salt invocation exits non-zero.
    #[error("{command} exited with status {status}")]
    RemoteCommand {
        /// Command that was run, without its elevation prefix.
        command: String,
        /// Remote exit status.
        status: i32,
    },
    /// Raised when the final salt invocation cannot be run to completion.
    #[error("failed to run {command}: {source}")]
    Execution {
        /// Command that was attempted.
        command: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },
    /// Raised when the grains file cannot be built.
    #[error("failed to build grains: {0}")]
    Facts(#[from] FactsError),
    /// Raised when the configuration is rejected.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
    /// Raised when the run was cancelled.
    #[error("provisioning cancelled")]
    Cancelled,
}

impl ProvisionError {
    pub(super) fn staging(action: &'static str, path: &str, source: RemoteError) -> Self {
        Self::Staging {
            action,
            path: path.to_owned(),
            source,
        }
    }

    /// Exit status of a failed salt invocation, if that is what failed.
    #[must_use]
    pub const fn remote_status(&self) -> Option<i32> {
        match self {
            Self::RemoteCommand { status, .. } => Some(*status),
            _ => None,
        }
    }
}
