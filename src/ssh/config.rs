//! SSH transport settings loaded via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::communicator::RetryPolicy;

/// SSH and rsync settings for [`super::SshCommunicator`].
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SALT_PROVISIONER_SSH",
    discovery(
        app_name = "salt-provisioner",
        env_var = "SALT_PROVISIONER_CONFIG_PATH",
        config_file_name = "salt-provisioner.toml",
        dotfile_name = ".salt-provisioner.toml",
        project_file_name = "salt-provisioner.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `rsync` executable.
    #[ortho_config(default = "rsync".to_owned())]
    pub rsync_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub user: String,
    /// Remote SSH port.
    #[ortho_config(default = 22)]
    pub port: u16,
    /// Whether to force batch mode to avoid password prompts.
    #[ortho_config(default = true, skip_cli)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking. Freshly created machines have
    /// unknown keys, so this defaults to off.
    #[ortho_config(default = false, skip_cli)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Private key used for authentication. Supports `~/` expansion.
    pub identity_file: Option<String>,
    /// Overall budget for establishing the connection, in seconds.
    #[ortho_config(default = 300)]
    pub connect_timeout_secs: u64,
    /// Delay before the second connection attempt, in seconds.
    #[ortho_config(default = 1)]
    pub retry_initial_secs: u64,
    /// Upper bound for the delay between connection attempts, in seconds.
    #[ortho_config(default = 30)]
    pub retry_max_secs: u64,
}

/// Errors raised by the SSH transport configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshConfigError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a required value is missing or out of range.
    #[error(
        "invalid {field}: set SALT_PROVISIONER_SSH_{} or add {field} to salt-provisioner.toml",
        .field.to_uppercase()
    )]
    Invalid {
        /// Configuration field that failed validation.
        field: String,
    },
}

impl SshConfig {
    /// Loads settings from defaults, configuration files, and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigError> {
        Self::load_from_iter([OsString::from("salt-provisioner")])
            .map_err(|err| SshConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present and numeric limits are sane.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SshConfigError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.rsync_bin, "rsync_bin")?;
        Self::require_value(&self.user, "user")?;
        if let Some(identity) = self.identity_file.as_deref() {
            Self::require_value(identity, "identity_file")?;
        }
        Self::require_positive(u64::from(self.port), "port")?;
        Self::require_positive(self.connect_timeout_secs, "connect_timeout_secs")?;
        Self::require_positive(self.retry_initial_secs, "retry_initial_secs")?;
        if self.retry_max_secs < self.retry_initial_secs {
            return Err(SshConfigError::Invalid {
                field: String::from("retry_max_secs"),
            });
        }
        Ok(())
    }

    /// Connection budget as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Backoff between connection attempts.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(self.retry_initial_secs),
            max_delay: Duration::from_secs(self.retry_max_secs),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), SshConfigError> {
        if value.trim().is_empty() {
            return Err(SshConfigError::Invalid {
                field: field.to_owned(),
            });
        }
        Ok(())
    }

    fn require_positive(value: u64, field: &str) -> Result<(), SshConfigError> {
        if value == 0 {
            return Err(SshConfigError::Invalid {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}
