//! Binary entry point for the `salt-provisioner` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;

use salt_provisioner::{
    ApplyRequest, FactsError, ProvisionError, ProvisionSettings, Provisioner, SshCommunicator,
    SshConfig, SshConfigError, ValidationErrors, WriterProgress, build_command, cancel_pair,
    grains::load_provider_state,
};

mod cli;

use cli::{ApplyCommand, Cli, ShowCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("ssh configuration error: {0}")]
    Ssh(#[from] SshConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("provider state error: {0}")]
    ProviderState(#[from] FactsError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl CliError {
    /// Process exit code for this error: the remote status when `salt-call`
    /// itself failed, `1` otherwise.
    fn exit_code(&self) -> i32 {
        match self {
            Self::Provision(err) => err.remote_status().filter(|status| *status != 0).unwrap_or(1),
            _ => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(matches!(&cli, Cli::Apply(command) if command.verbose));

    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SALT_PROVISIONER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Apply(command) => run_apply(command).await,
        Cli::Command(command) => show_command(&command),
    }
}

async fn run_apply(args: ApplyCommand) -> Result<(), CliError> {
    let settings = ProvisionSettings::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let config = settings.to_config()?;

    let ssh_config = SshConfig::load_without_cli_args()?;
    let communicator = SshCommunicator::new(ssh_config, args.host.as_str())?;

    let provider_state = args
        .provider_state
        .as_deref()
        .map(|path| load_provider_state(Utf8Path::new(path)))
        .transpose()?
        .unwrap_or_default();

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            handle.cancel();
        }
    });

    let provisioner = Provisioner::new(ApplyRequest {
        config,
        provider_state,
        communicator: Arc::new(communicator),
        progress: Arc::new(WriterProgress::new(io::stdout())),
        cancel,
    });
    let report = provisioner.apply().await?;
    tracing::info!(host = %args.host, stages = report.stages.len(), "provisioning finished");
    Ok(())
}

fn show_command(args: &ShowCommand) -> Result<(), CliError> {
    let settings = ProvisionSettings::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let config = settings.to_config()?;
    let command = build_command(&config);
    let rendered = if args.elevated {
        config.elevation.wrap(&command)
    } else {
        command
    };
    writeln!(io::stdout(), "{rendered}").ok();
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
