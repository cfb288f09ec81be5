//! BDD scenarios for harness runs.

use rstest_bdd_macros::scenario;

use super::test_helpers::{HarnessContext, harness_context};

#[scenario(
    path = "tests/features/harness.feature",
    name = "One failing test fails the whole run"
)]
fn scenario_one_failure_fails_the_run(harness_context: HarnessContext) {
    let _ = harness_context;
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "Machines are kept when removal is disabled"
)]
fn scenario_machines_kept_without_removal(harness_context: HarnessContext) {
    let _ = harness_context;
}

#[scenario(
    path = "tests/features/harness.feature",
    name = "An invalid pattern aborts before provisioning"
)]
fn scenario_invalid_pattern_aborts(harness_context: HarnessContext) {
    let _ = harness_context;
}
