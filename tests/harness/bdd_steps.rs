//! BDD step definitions for harness runs.

use std::sync::Arc;

use chrono::{Local, TimeZone};
use rstest_bdd_macros::{given, then, when};
use sortie::output::prepare_run_dir;
use sortie::report::{JsonReporter, Reporter};
use sortie::{Harness, HarnessError, RunReport, TestStatus};
use tokio::runtime::Runtime;

use super::test_helpers::{HarnessContext, RunOutcome, criteria, two_passing_one_failing};

const RUN_PID: u32 = 4242;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn finished(harness_context: &HarnessContext) -> Result<&RunReport, StepError> {
    match &harness_context.outcome {
        Some(RunOutcome::Finished { report, .. }) => Ok(report),
        Some(RunOutcome::Rejected { message, .. }) => Err(StepError::Assertion(format!(
            "run was rejected unexpectedly: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[given("a registry with two passing tests and one failing test")]
fn registry_with_one_failure(mut harness_context: HarnessContext) -> HarnessContext {
    harness_context.registry = Some(two_passing_one_failing());
    harness_context
}

#[given("the harness runs {parallel:u32} tests in parallel")]
fn parallelism(mut harness_context: HarnessContext, parallel: u32) -> HarnessContext {
    harness_context.options.parallel = parallel as usize;
    harness_context
}

#[given("machine removal is disabled")]
fn removal_disabled(mut harness_context: HarnessContext) -> HarnessContext {
    harness_context.options.remove = false;
    harness_context
}

#[when("I run the tests matching \"{pattern}\"")]
fn run_matching(
    harness_context: HarnessContext,
    pattern: String,
) -> Result<HarnessContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let HarnessContext {
        root,
        flight,
        options,
        registry,
        workspace,
        ..
    } = harness_context;
    let Some(suite) = registry.clone() else {
        return Err(StepError::Assertion(String::from("missing registry")));
    };
    let started = Local
        .with_ymd_and_hms(2026, 10, 15, 9, 30, 0)
        .single()
        .ok_or_else(|| StepError::Assertion(String::from("ambiguous start time")))?;
    let run_dir = prepare_run_dir(&root, "qemu", &started, RUN_PID)
        .map_err(|err| StepError::Assertion(err.to_string()))?;

    let harness = Harness::new(
        Arc::new(flight.clone()),
        run_dir.path.clone(),
        options.clone(),
    );
    let result = runtime.block_on(async move {
        harness
            .run_suite(&suite, criteria(pattern.as_str()))
            .await
    });

    let outcome = match result {
        Ok(report) => {
            let written = JsonReporter
                .write(&report, &run_dir.path)
                .map_err(|err| StepError::Assertion(err.to_string()))?;
            RunOutcome::Finished {
                report,
                run_dir,
                written,
            }
        }
        Err(err) => RunOutcome::Rejected {
            pattern_error: matches!(err, HarnessError::Filter(_)),
            message: err.to_string(),
        },
    };

    Ok(HarnessContext {
        root,
        flight,
        options,
        registry,
        outcome: Some(outcome),
        workspace,
    })
}

#[then("the aggregate result is \"{result}\"")]
fn aggregate_result(harness_context: &HarnessContext, result: String) -> Result<(), StepError> {
    let expected = match result.as_str() {
        "PASS" => TestStatus::Pass,
        "FAIL" => TestStatus::Fail,
        other => {
            return Err(StepError::Assertion(format!(
                "unknown aggregate result '{other}'"
            )));
        }
    };
    let report = finished(harness_context)?;
    if report.result == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, got {:?}",
            report.result
        )))
    }
}

#[then("the report lists {count:u32} tests")]
fn report_lists(harness_context: &HarnessContext, count: u32) -> Result<(), StepError> {
    let report = finished(harness_context)?;
    if report.tests.len() == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} entries, got {}",
            report.tests.len()
        )))
    }
}

#[then("{count:u32} tests passed")]
fn tests_passed(harness_context: &HarnessContext, count: u32) -> Result<(), StepError> {
    let passed = finished(harness_context)?.count(TestStatus::Pass);
    if passed == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} passing tests, got {passed}"
        )))
    }
}

#[then("the exit code is {code:i32}")]
fn exit_code(harness_context: &HarnessContext, code: i32) -> Result<(), StepError> {
    let actual = finished(harness_context)?.exit_code();
    if actual == code {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected exit code {code}, got {actual}"
        )))
    }
}

#[then("every cluster and machine is destroyed")]
fn everything_destroyed(harness_context: &HarnessContext) -> Result<(), StepError> {
    let ledger = harness_context.flight.ledger();
    let created = ledger.clusters_created();
    if created == 0 {
        return Err(StepError::Assertion(String::from("no cluster was created")));
    }
    if ledger.clusters_destroyed() != created {
        return Err(StepError::Assertion(format!(
            "{created} clusters created but {} destroyed",
            ledger.clusters_destroyed()
        )));
    }
    if ledger.machines_destroyed() != created {
        return Err(StepError::Assertion(format!(
            "expected {created} single-machine clusters torn down, got {} machines",
            ledger.machines_destroyed()
        )));
    }
    if ledger.flight_destroyed() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "flight should be destroyed",
        )))
    }
}

#[then("no machine is destroyed")]
fn nothing_destroyed(harness_context: &HarnessContext) -> Result<(), StepError> {
    let ledger = harness_context.flight.ledger();
    if ledger.machines_destroyed() == 0 && !ledger.flight_destroyed() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{} machines destroyed, flight destroyed: {}",
            ledger.machines_destroyed(),
            ledger.flight_destroyed()
        )))
    }
}

#[then("the written report reads back unchanged")]
fn report_reads_back(harness_context: &HarnessContext) -> Result<(), StepError> {
    let Some(RunOutcome::Finished {
        report, written, ..
    }) = &harness_context.outcome
    else {
        return Err(StepError::Assertion(String::from("missing report")));
    };
    let raw = std::fs::read_to_string(written)
        .map_err(|err| StepError::Assertion(format!("read {written}: {err}")))?;
    let reread: RunReport = serde_json::from_str(&raw)
        .map_err(|err| StepError::Assertion(format!("parse {written}: {err}")))?;
    if &reread == report {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "report on disk differs from the returned report",
        )))
    }
}

#[then("the latest link points at the run directory")]
fn latest_link(harness_context: &HarnessContext) -> Result<(), StepError> {
    let Some(RunOutcome::Finished { run_dir, .. }) = &harness_context.outcome else {
        return Err(StepError::Assertion(String::from("missing run directory")));
    };
    let expected = harness_context.root.join("qemu-20261015-093000-4242");
    if run_dir.path != expected {
        return Err(StepError::Assertion(format!(
            "expected run directory {expected}, got {}",
            run_dir.path
        )));
    }
    let latest = harness_context.root.join("qemu-latest");
    if latest.is_symlink() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{latest} should be a symlink")))
    }
}

#[then("the run is rejected for its test pattern")]
fn rejected_for_pattern(harness_context: &HarnessContext) -> Result<(), StepError> {
    match &harness_context.outcome {
        Some(RunOutcome::Rejected {
            pattern_error: true,
            ..
        }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a pattern error, got {other:?}"
        ))),
    }
}

#[then("no cluster is created")]
fn no_cluster(harness_context: &HarnessContext) -> Result<(), StepError> {
    let created = harness_context.flight.ledger().clusters_created();
    if created == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no clusters, got {created}"
        )))
    }
}
