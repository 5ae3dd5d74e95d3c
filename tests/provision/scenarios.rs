//! BDD scenarios for the provisioning pipeline.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContext, provision_context};

#[scenario(
    path = "tests/features/provision.feature",
    name = "Stage the state tree and run highstate when every optional stage is off"
)]
fn scenario_minimal_apply(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Stop before salt runs when clearing the destination fails"
)]
fn scenario_failed_cleanup(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Run a custom state behind a sudo password"
)]
fn scenario_custom_state_with_password(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Propagate the salt exit status"
)]
fn scenario_salt_exit_status(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Cancel while salt-call is running"
)]
fn scenario_cancel_mid_run(provision_context: ProvisionContext) {
    let _ = provision_context;
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Cancel before the apply starts"
)]
fn scenario_cancel_before_start(provision_context: ProvisionContext) {
    let _ = provision_context;
}
