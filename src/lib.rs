//! Remote provisioning with masterless Salt.
//!
//! The crate connects to a freshly created host, optionally installs Salt
//! with the bootstrap script, uploads grains, a minion config, the local
//! state tree and pillar roots, then runs `salt-call --local`. Transport is
//! abstracted behind [`Communicator`]; [`SshCommunicator`] drives the system
//! `ssh` and `rsync` binaries.

pub mod cancel;
pub mod command;
pub mod communicator;
pub mod config;
pub mod grains;
pub mod progress;
pub mod provision;
pub mod remote;
pub mod ssh;
#[cfg(test)]
mod test_helpers;
pub mod test_support;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use command::{Elevation, build_command};
pub use communicator::{CommError, Communicator, RemoteCmd, RemoteProcess, RetryPolicy};
pub use config::{
    ProvisionSettings, ProvisioningConfig, SettingsLoadError, ValidationError, ValidationErrors,
};
pub use grains::{FactsError, FactsFile, build_facts};
pub use progress::{ProgressSink, TracingProgress, WriterProgress};
pub use provision::{ApplyReport, ApplyRequest, ProvisionError, Provisioner, Stage};
pub use remote::{Privilege, RemoteError, RemoteOps};
pub use ssh::{SshCommunicator, SshConfig, SshConfigError};
