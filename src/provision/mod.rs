//! Provisioning pipeline: connects to the host, installs salt, stages grains,
//! minion config, state tree and pillar roots, then runs `salt-call`.
//!
//! Stages run strictly in order and the first failure aborts the run. No
//! staged content is rolled back. Cancellation is observed at any point: a
//! watcher task disconnects the communicator, which unblocks whichever remote
//! call is in flight, and the run reports [`ProvisionError::Cancelled`].

use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;
use serde_json::Value;

use crate::cancel::CancelSignal;
use crate::command::build_command;
use crate::communicator::Communicator;
use crate::config::ProvisioningConfig;
use crate::grains::{FactsFile, REMOTE_GRAINS_FILE, build_facts};
use crate::progress::ProgressSink;
use crate::remote::{Privilege, RemoteError, RemoteOps};
use connect::{DisconnectWatcher, connect_with_retry};

mod connect;
mod error;

pub use error::ProvisionError;

/// Remote path the bootstrap script is downloaded to.
pub const BOOTSTRAP_SCRIPT: &str = "/tmp/install_salt.sh";
/// Directory holding the minion config on the remote host.
pub const REMOTE_SALT_CONFIG_DIR: &str = "/etc/salt";
/// Remote minion config path.
pub const REMOTE_MINION_CONFIG: &str = "/etc/salt/minion";

const BOOTSTRAP_URL: &str = "https://bootstrap.saltstack.com";
const IGNORED_ENTRIES: &[&str] = &[".git"];

/// Pipeline stage, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Establishing the connection.
    Connecting,
    /// Installing salt with the bootstrap script.
    Bootstrapping,
    /// Uploading the grains file.
    StagingGrains,
    /// Uploading the minion config.
    StagingAgentConfig,
    /// Uploading the state tree.
    StagingStateTree,
    /// Uploading the pillar roots.
    StagingPillarRoots,
    /// Running `salt-call`.
    Executing,
}

impl fmt::Display for Stage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Bootstrapping => "bootstrapping",
            Self::StagingGrains => "staging grains",
            Self::StagingAgentConfig => "staging minion config",
            Self::StagingStateTree => "staging state tree",
            Self::StagingPillarRoots => "staging pillar roots",
            Self::Executing => "executing",
        };
        formatter.write_str(name)
    }
}

/// Everything one apply needs.
pub struct ApplyRequest {
    /// Validated options.
    pub config: ProvisioningConfig,
    /// Provider-reported attributes of the target machine.
    pub provider_state: Value,
    /// Connection to the target host.
    pub communicator: Arc<dyn Communicator>,
    /// Receives status lines and remote output.
    pub progress: Arc<dyn ProgressSink>,
    /// Cancels the apply when fired.
    pub cancel: CancelSignal,
}

impl fmt::Debug for ApplyRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApplyRequest")
            .field("config", &self.config)
            .field("provider_state", &self.provider_state)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful apply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApplyReport {
    /// Stages entered, in order.
    pub stages: Vec<Stage>,
    /// Salt invocation that was run, without its elevation prefix.
    pub command: String,
}

/// Runs the provisioning pipeline for one host.
#[derive(Debug)]
pub struct Provisioner {
    request: ApplyRequest,
}

impl Provisioner {
    /// Creates a provisioner for `request`.
    #[must_use]
    pub const fn new(request: ApplyRequest) -> Self {
        Self { request }
    }

    /// Runs every applicable stage and disconnects before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Cancelled`] when the cancel signal fires,
    /// and the error of the first failing stage otherwise.
    pub async fn apply(&self) -> Result<ApplyReport, ProvisionError> {
        let cancel = &self.request.cancel;
        let watcher =
            DisconnectWatcher::spawn(Arc::clone(&self.request.communicator), cancel.clone());
        let mut stages = Vec::new();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ProvisionError::Cancelled),
            result = self.run_pipeline(&mut stages) => result,
        };
        watcher.finish().await;

        match outcome {
            Ok(command) => Ok(ApplyReport { stages, command }),
            Err(err) if cancel.is_cancelled() => {
                tracing::debug!(error = %err, "stage aborted by cancellation");
                Err(ProvisionError::Cancelled)
            }
            Err(err) => Err(err),
        }
    }

    async fn run_pipeline(&self, stages: &mut Vec<Stage>) -> Result<String, ProvisionError> {
        let config = &self.request.config;
        let comm = self.request.communicator.as_ref();
        let progress = self.request.progress.as_ref();
        let ops = RemoteOps::new(comm, progress, &config.elevation);

        enter(stages, Stage::Connecting);
        connect_with_retry(comm, progress).await?;

        if !config.skip_bootstrap {
            enter(stages, Stage::Bootstrapping);
            self.bootstrap(&ops).await?;
        }

        if config.grains {
            enter(stages, Stage::StagingGrains);
            self.stage_grains(&ops).await?;
        }

        if let Some(minion_config) = &config.minion_config {
            enter(stages, Stage::StagingAgentConfig);
            self.stage_minion_config(&ops, minion_config).await?;
        }

        enter(stages, Stage::StagingStateTree);
        progress.output("Uploading local state tree");
        self.stage_tree(
            &ops,
            &config.local_state_tree,
            "states",
            config.remote_state_tree_dir(),
        )
        .await?;

        if let Some(pillar_roots) = &config.local_pillar_roots {
            enter(stages, Stage::StagingPillarRoots);
            progress.output("Uploading local pillar roots");
            self.stage_tree(&ops, pillar_roots, "pillar", config.remote_pillar_roots_dir())
                .await?;
        }

        enter(stages, Stage::Executing);
        let command = build_command(config);
        self.execute(&ops, &command).await?;
        Ok(command)
    }

    async fn bootstrap(&self, ops: &RemoteOps<'_>) -> Result<(), ProvisionError> {
        self.request.progress.output("Installing Salt");
        let download = format!(
            "curl -L {BOOTSTRAP_URL} -o {BOOTSTRAP_SCRIPT} || wget -O {BOOTSTRAP_SCRIPT} {BOOTSTRAP_URL}"
        );
        ops.run_command(&download, Privilege::User)
            .await
            .map_err(|source| ProvisionError::Bootstrap {
                step: "download",
                source,
            })?;

        let args = self.request.config.bootstrap_args.trim();
        let install = if args.is_empty() {
            format!("sh {BOOTSTRAP_SCRIPT}")
        } else {
            format!("sh {BOOTSTRAP_SCRIPT} {args}")
        };
        ops.run_command(&install, Privilege::Elevated)
            .await
            .map_err(|source| ProvisionError::Bootstrap {
                step: "install",
                source,
            })
    }

    async fn stage_grains(&self, ops: &RemoteOps<'_>) -> Result<(), ProvisionError> {
        let config = &self.request.config;
        self.request.progress.output("Uploading grains file");
        create_staging_dir(ops, config).await?;

        let facts = config.local_grains_file.clone().map_or_else(
            || build_facts(&self.request.provider_state, &config.tfvars),
            |path| Ok(FactsFile::Provided(path)),
        )?;

        let staged = config.staging_path("grains");
        let outcome = upload_and_move(ops, facts.path(), &staged, REMOTE_GRAINS_FILE).await;
        if let FactsFile::Generated { file, path } = facts
            && let Err(err) = file.close()
        {
            tracing::warn!(%path, error = %err, "failed to remove temporary grains file");
        }
        outcome
    }

    async fn stage_minion_config(
        &self,
        ops: &RemoteOps<'_>,
        minion_config: &Utf8Path,
    ) -> Result<(), ProvisionError> {
        let config = &self.request.config;
        self.request.progress.output("Uploading minion config");
        create_staging_dir(ops, config).await?;

        let staged = config.staging_path("minion");
        ops.upload_file(&staged, minion_config)
            .await
            .map_err(|source| ProvisionError::staging("upload", &staged, source))?;
        ops.create_dir(REMOTE_SALT_CONFIG_DIR, Privilege::Elevated)
            .await
            .map_err(|source| ProvisionError::staging("create", REMOTE_SALT_CONFIG_DIR, source))?;
        ops.move_file(REMOTE_MINION_CONFIG, &staged)
            .await
            .map_err(|source| ProvisionError::staging("move into", REMOTE_MINION_CONFIG, source))
    }

    async fn stage_tree(
        &self,
        ops: &RemoteOps<'_>,
        local: &Utf8Path,
        name: &str,
        destination: &str,
    ) -> Result<(), ProvisionError> {
        let staged = self.request.config.staging_path(name);
        ops.upload_dir(&staged, local, IGNORED_ENTRIES)
            .await
            .map_err(|source| ProvisionError::staging("upload", &staged, source))?;
        ops.remove_dir(destination)
            .await
            .map_err(|source| ProvisionError::staging("clear", destination, source))?;
        ops.move_file(destination, &staged)
            .await
            .map_err(|source| ProvisionError::staging("move into", destination, source))
    }

    async fn execute(&self, ops: &RemoteOps<'_>, command: &str) -> Result<(), ProvisionError> {
        self.request.progress.output(&format!("Running: {command}"));
        ops.run_command(command, Privilege::Elevated)
            .await
            .map_err(|source| match source {
                RemoteError::Exit { status, .. } => ProvisionError::RemoteCommand {
                    command: command.to_owned(),
                    status,
                },
                other => ProvisionError::Execution {
                    command: command.to_owned(),
                    source: other,
                },
            })
    }
}

fn enter(stages: &mut Vec<Stage>, stage: Stage) {
    tracing::info!(%stage, "entering stage");
    stages.push(stage);
}

async fn create_staging_dir(
    ops: &RemoteOps<'_>,
    config: &ProvisioningConfig,
) -> Result<(), ProvisionError> {
    ops.create_dir(&config.temp_config_dir, Privilege::User)
        .await
        .map_err(|source| ProvisionError::staging("create", &config.temp_config_dir, source))
}

async fn upload_and_move(
    ops: &RemoteOps<'_>,
    local: &Utf8Path,
    staged: &str,
    destination: &str,
) -> Result<(), ProvisionError> {
    ops.upload_file(staged, local)
        .await
        .map_err(|source| ProvisionError::staging("upload", staged, source))?;
    ops.move_file(destination, staged)
        .await
        .map_err(|source| ProvisionError::staging("move into", destination, source))
}
