//! Command-line interface definitions for the `salt-provisioner` binary.
//!
//! The clap structures live here so both the binary and the build script can
//! use them; the build script renders the manual page from them.

use clap::Parser;

/// Top-level CLI for the `salt-provisioner` binary.
///
/// Provisioner options come from `salt-provisioner.toml` and
/// `SALT_PROVISIONER_*` environment variables; SSH transport options from the
/// same file and `SALT_PROVISIONER_SSH_*` variables.
#[derive(Debug, Parser)]
#[command(
    name = "salt-provisioner",
    about = "Install Salt on a remote host and apply a masterless state run",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Upload states, pillar data and grains, then run `salt-call`.
    #[command(
        name = "apply",
        about = "Upload states, pillar data and grains, then run salt-call"
    )]
    Apply(ApplyCommand),
    /// Print the `salt-call` invocation the current configuration produces.
    #[command(
        name = "command",
        about = "Print the salt-call invocation for the current configuration"
    )]
    Command(ShowCommand),
}

/// Arguments for the `salt-provisioner apply` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ApplyCommand {
    /// Address of the host to provision.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: String,
    /// JSON document with the provider-reported machine attributes, merged
    /// into the grains.
    #[arg(long, value_name = "PATH")]
    pub(crate) provider_state: Option<String>,
    /// Log pipeline diagnostics at debug level.
    #[arg(long, short)]
    pub(crate) verbose: bool,
}

/// Arguments for the `salt-provisioner command` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ShowCommand {
    /// Print the command with the configured privilege elevation applied.
    #[arg(long)]
    pub(crate) elevated: bool,
}
