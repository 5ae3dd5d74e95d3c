//! BDD step definitions for the provisioning pipeline.

use std::sync::Arc;
use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use salt_provisioner::test_support::RecordingProgress;
use salt_provisioner::{
    ApplyReport, ApplyRequest, CancelSignal, Elevation, ProvisionError, Provisioner, cancel_pair,
};
use serde_json::Value;
use tokio::runtime::Runtime;

use super::test_helpers::{
    ProvisionContext, ProvisionFailure, ProvisionFailureKind, ProvisionResult,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a state tree with bootstrap and grains disabled")]
fn minimal_state_tree(mut provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.config.skip_bootstrap = true;
    provision_context.config.grains = false;
    provision_context
}

#[given("the remote commands exit with \"{codes}\"")]
fn remote_commands_exit_with(
    provision_context: ProvisionContext,
    codes: String,
) -> Result<ProvisionContext, StepError> {
    for code in codes.split(',') {
        let parsed = code
            .trim()
            .parse::<i32>()
            .map_err(|err| StepError::Assertion(format!("exit code {code:?}: {err}")))?;
        provision_context.communicator.push_exit_code(parsed);
    }
    Ok(provision_context)
}

#[given("the custom state \"{state}\"")]
fn custom_state(mut provision_context: ProvisionContext, state: String) -> ProvisionContext {
    provision_context.config.custom_state = state;
    provision_context
}

#[given("the sudo password \"{password}\"")]
fn sudo_password(mut provision_context: ProvisionContext, password: String) -> ProvisionContext {
    provision_context.config.elevation = Elevation::SudoWithPassword(password);
    provision_context
}

#[given("cancellation is requested once salt-call starts")]
fn cancel_when_salt_starts(mut provision_context: ProvisionContext) -> ProvisionContext {
    let (handle, signal) = cancel_pair();
    provision_context.communicator.cancel_on("salt-call", handle);
    provision_context.cancel = Some(signal);
    provision_context
}

#[given("cancellation was requested before the apply")]
fn cancelled_up_front(mut provision_context: ProvisionContext) -> ProvisionContext {
    let (handle, signal) = cancel_pair();
    handle.cancel();
    provision_context.cancel = Some(signal);
    provision_context
}

#[when("I apply the state tree")]
fn apply_state_tree(
    mut provision_context: ProvisionContext,
) -> Result<ProvisionContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let provisioner = Provisioner::new(ApplyRequest {
        config: provision_context.config.clone(),
        provider_state: Value::Null,
        communicator: provision_context.communicator.clone(),
        progress: Arc::new(RecordingProgress::default()),
        cancel: provision_context
            .cancel
            .clone()
            .unwrap_or_else(CancelSignal::never),
    });

    let result = runtime
        .block_on(async move {
            tokio::time::timeout(Duration::from_secs(10), provisioner.apply()).await
        })
        .map_err(|_| StepError::Assertion(String::from("apply did not finish in time")))?;
    provision_context.outcome = Some(match result {
        Ok(report) => ProvisionResult::Success(report),
        Err(err) => ProvisionResult::Failure(ProvisionFailure {
            kind: failure_kind(&err),
            status: match &err {
                ProvisionError::RemoteCommand { status, .. } => Some(*status),
                _ => None,
            },
            message: err.to_string(),
        }),
    });
    Ok(provision_context)
}

const fn failure_kind(err: &ProvisionError) -> ProvisionFailureKind {
    match err {
        ProvisionError::Connection { .. } => ProvisionFailureKind::Connection,
        ProvisionError::Bootstrap { .. } => ProvisionFailureKind::Bootstrap,
        ProvisionError::Staging { .. } => ProvisionFailureKind::Staging,
        ProvisionError::RemoteCommand { .. } => ProvisionFailureKind::RemoteCommand,
        ProvisionError::Execution { .. } => ProvisionFailureKind::Execution,
        ProvisionError::Facts(_) => ProvisionFailureKind::Facts,
        ProvisionError::Validation(_) => ProvisionFailureKind::Validation,
        ProvisionError::Cancelled => ProvisionFailureKind::Cancelled,
    }
}

fn parse_failure_kind(kind: &str) -> Result<ProvisionFailureKind, StepError> {
    match kind {
        "connection" => Ok(ProvisionFailureKind::Connection),
        "bootstrap" => Ok(ProvisionFailureKind::Bootstrap),
        "staging" => Ok(ProvisionFailureKind::Staging),
        "remote command" => Ok(ProvisionFailureKind::RemoteCommand),
        "execution" => Ok(ProvisionFailureKind::Execution),
        "facts" => Ok(ProvisionFailureKind::Facts),
        "validation" => Ok(ProvisionFailureKind::Validation),
        "cancelled" => Ok(ProvisionFailureKind::Cancelled),
        other => Err(StepError::Assertion(format!("unknown failure kind {other}"))),
    }
}

fn success(provision_context: &ProvisionContext) -> Result<&ApplyReport, StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Success(report)) => Ok(report),
        Some(ProvisionResult::Failure(failure)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {}",
            failure.message
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn failure(provision_context: &ProvisionContext) -> Result<&ProvisionFailure, StepError> {
    match &provision_context.outcome {
        Some(ProvisionResult::Failure(failure)) => Ok(failure),
        Some(ProvisionResult::Success(report)) => Err(StepError::Assertion(format!(
            "expected failure, got success running {}",
            report.command
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn expect_eq<T>(label: &str, actual: &T, expected: &T) -> Result<(), StepError>
where
    T: PartialEq + std::fmt::Debug + ?Sized,
{
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{label}: expected {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the apply succeeds")]
fn apply_succeeds(provision_context: &ProvisionContext) -> Result<(), StepError> {
    success(provision_context).map(|_| ())
}

#[then("the apply fails with a \"{kind}\" error")]
fn apply_fails_with(provision_context: &ProvisionContext, kind: String) -> Result<(), StepError> {
    let expected = parse_failure_kind(&kind)?;
    let observed = failure(provision_context)?;
    expect_eq("failure kind", &observed.kind, &expected)
}

#[then("the stages are \"{stages}\"")]
fn stages_are(provision_context: &ProvisionContext, stages: String) -> Result<(), StepError> {
    let report = success(provision_context)?;
    let actual: Vec<String> = report.stages.iter().map(ToString::to_string).collect();
    let expected: Vec<String> = stages.split(',').map(|stage| stage.trim().to_owned()).collect();
    expect_eq("stages", &actual, &expected)
}

#[then("the remote commands are \"{commands}\"")]
fn remote_commands_are(
    provision_context: &ProvisionContext,
    commands: String,
) -> Result<(), StepError> {
    let expected: Vec<String> = commands
        .split(';')
        .map(|command| command.trim().to_owned())
        .collect();
    expect_eq(
        "remote commands",
        &provision_context.communicator.commands(),
        &expected,
    )
}

#[then("the last remote command is \"{command}\"")]
fn last_remote_command(
    provision_context: &ProvisionContext,
    command: String,
) -> Result<(), StepError> {
    let commands = provision_context.communicator.commands();
    expect_eq("last remote command", &commands.last(), &Some(&command))
}

#[then("the reported command is \"{command}\"")]
fn reported_command(provision_context: &ProvisionContext, command: String) -> Result<(), StepError> {
    let report = success(provision_context)?;
    expect_eq("reported command", &report.command, &command)
}

#[then("the remote exit status is \"{status}\"")]
fn remote_exit_status(provision_context: &ProvisionContext, status: i32) -> Result<(), StepError> {
    let observed = failure(provision_context)?;
    expect_eq("remote exit status", &observed.status, &Some(status))
}

#[then("salt-call is never run")]
fn salt_call_never_runs(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let commands = provision_context.communicator.commands();
    match commands.iter().find(|command| command.contains("salt-call")) {
        Some(command) => Err(StepError::Assertion(format!("unexpected salt run: {command}"))),
        None => Ok(()),
    }
}

#[then("no remote command is run")]
fn no_remote_command(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let commands = provision_context.communicator.commands();
    expect_eq("remote commands", &commands, &Vec::new())
}

#[then("the connection is closed once")]
fn closed_once(provision_context: &ProvisionContext) -> Result<(), StepError> {
    expect_eq(
        "disconnects",
        &provision_context.communicator.disconnects(),
        &1,
    )
}
