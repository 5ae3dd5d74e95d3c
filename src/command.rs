//! Builds the `salt-call` invocation and wraps commands for privilege
//! elevation.

use std::fmt;

use crate::config::ProvisioningConfig;

/// Default remote state tree used when no override is configured.
pub const DEFAULT_STATE_TREE_DIR: &str = "/srv/salt";
/// Default remote pillar root used when no override is configured.
pub const DEFAULT_PILLAR_ROOT_DIR: &str = "/srv/pillar";
/// Log level passed to `salt-call` when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const SALT_CALL: &str = "salt-call --local";

/// Builds the command line that runs salt in masterless mode.
///
/// The result is a pure function of `config`. In minion-config mode the
/// `--file-root`/`--pillar-root` flags are omitted even when remote overrides
/// are set, because the uploaded minion config owns those paths.
#[must_use]
pub fn build_command(config: &ProvisioningConfig) -> String {
    let file_root;
    let pillar_root;
    let mut tokens: Vec<&str> = Vec::new();

    if config.custom_state.is_empty() {
        tokens.push("state.highstate");
    } else {
        tokens.push("state.sls");
        tokens.push(&config.custom_state);
    }

    if config.minion_config.is_none() {
        file_root = format!(
            "--file-root={}",
            non_empty_or(config.remote_state_tree.as_deref(), DEFAULT_STATE_TREE_DIR)
        );
        pillar_root = format!(
            "--pillar-root={}",
            non_empty_or(config.remote_pillar_roots.as_deref(), DEFAULT_PILLAR_ROOT_DIR)
        );
        tokens.push(&file_root);
        tokens.push(&pillar_root);
    }

    if !config.no_exit_on_failure {
        tokens.push("--retcode-passthrough");
    }

    tokens.push("-l");
    tokens.push(non_empty_or(Some(config.log_level.as_str()), DEFAULT_LOG_LEVEL));

    for extra in [&config.salt_call_args, &config.cmd_args] {
        if !extra.trim().is_empty() {
            tokens.push(extra);
        }
    }

    format!("{SALT_CALL} {}", tokens.join(" "))
}

fn non_empty_or<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    match value {
        Some(text) if !text.is_empty() => text,
        _ => fallback,
    }
}

/// How privileged remote commands are wrapped.
///
/// # Security
///
/// [`Elevation::SudoWithPassword`] pipes the password through `echo` on the
/// remote shell without escaping. The password is visible in the remote
/// process list and a password containing `'` breaks out of the quoting.
/// The format is kept because existing hosts and tests depend on the exact
/// command text.
#[derive(Clone, Default, Eq, PartialEq)]
pub enum Elevation {
    /// Commands run as the connecting user.
    Disabled,
    /// Commands are prefixed with `sudo`.
    #[default]
    Sudo,
    /// Commands are prefixed with `echo '<password>' | sudo -S`.
    SudoWithPassword(String),
}

impl Elevation {
    /// Chooses the elevation mode from the user-facing settings.
    #[must_use]
    pub fn from_settings(disable_sudo: bool, sudo_password: &str) -> Self {
        if disable_sudo {
            Self::Disabled
        } else if sudo_password.is_empty() {
            Self::Sudo
        } else {
            Self::SudoWithPassword(sudo_password.to_owned())
        }
    }

    /// Wraps `command` according to the elevation mode.
    #[must_use]
    pub fn wrap(&self, command: &str) -> String {
        match self {
            Self::Disabled => command.to_owned(),
            Self::Sudo => format!("sudo {command}"),
            Self::SudoWithPassword(password) => {
                format!("echo '{password}' | sudo -S {command}")
            }
        }
    }
}

impl fmt::Debug for Elevation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => formatter.write_str("Disabled"),
            Self::Sudo => formatter.write_str("Sudo"),
            Self::SudoWithPassword(_) => formatter.write_str("SudoWithPassword(<redacted>)"),
        }
    }
}
