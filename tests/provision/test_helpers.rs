//! Shared fixtures for provisioning BDD scenarios.

use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use salt_provisioner::test_support::ScriptedCommunicator;
use salt_provisioner::{ApplyReport, CancelSignal, ProvisioningConfig};
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub communicator: Arc<ScriptedCommunicator>,
    pub config: ProvisioningConfig,
    pub cancel: Option<CancelSignal>,
    pub outcome: Option<ProvisionResult>,
    _state_root: Arc<TempDir>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionFailureKind {
    Connection,
    Bootstrap,
    Staging,
    RemoteCommand,
    Execution,
    Facts,
    Validation,
    Cancelled,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionFailure {
    pub kind: ProvisionFailureKind,
    pub status: Option<i32>,
    pub message: String,
}

#[derive(Clone, Debug)]
pub enum ProvisionResult {
    Success(ApplyReport),
    Failure(ProvisionFailure),
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create state tree tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("tempdir {} is not UTF-8", path.display()));
    let states = root.join("states");
    fs::create_dir(&states).unwrap_or_else(|err| panic!("create {states}: {err}"));
    fs::write(states.join("top.sls"), "base:\n  '*':\n    - web\n")
        .unwrap_or_else(|err| panic!("write top.sls: {err}"));

    ProvisionContext {
        communicator: Arc::new(ScriptedCommunicator::new()),
        config: ProvisioningConfig::for_state_tree(states),
        cancel: None,
        outcome: None,
        _state_root: Arc::new(tmp),
    }
}
