//! Tests for the built-in suite, run against the in-memory platform.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use semver::Version;
use tempfile::TempDir;

use super::*;
use crate::filter::FilterCriteria;
use crate::harness::native::HELPER_BINARY;
use crate::harness::{Harness, HarnessOptions};
use crate::platform::Platform;
use crate::report::{RunReport, TestStatus};
use crate::test_support::{FakeBehaviour, FakeFlight};

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
    helper_dir: Utf8PathBuf,
}

#[fixture]
fn workspace() -> Workspace {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    let helper_dir = root.join("helpers");
    std::fs::create_dir_all(&helper_dir).expect("helper dir");
    std::fs::write(helper_dir.join(HELPER_BINARY), b"#!/bin/sh\n").expect("helper");
    Workspace {
        _dir: dir,
        root,
        helper_dir,
    }
}

fn criteria(pattern: &str) -> FilterCriteria {
    FilterCriteria {
        patterns: vec![pattern.to_owned()],
        platform: String::from("qemu"),
        board: None,
        distribution: String::from("cl"),
        channel: String::from("stable"),
        offering: String::from("basic"),
        version: Version::new(0, 0, 0),
    }
}

async fn run(workspace: &Workspace, flight: &FakeFlight, pattern: &str) -> RunReport {
    let options = HarnessOptions {
        parallel: 2,
        remove: true,
        log_flush_delay: Duration::ZERO,
        helper_dirs: vec![workspace.helper_dir.clone()],
    };
    Harness::new(Arc::new(flight.clone()), workspace.root.join("run"), options)
        .run_suite(&registry().expect("registry"), criteria(pattern))
        .await
        .expect("run")
}

#[test]
fn registry_contains_built_in_tests() {
    let registry = registry().expect("registry");
    let names: Vec<&str> = registry.iter().map(|test| test.name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "cl.basic.failed-units",
            "cl.basic.os-release",
            "cl.basic.reboot",
            "cl.basic.ssh",
            "cl.cluster.discovery",
            "cl.native.smoke",
        ]
    );
}

#[test]
fn discovery_test_requests_url_for_whole_cluster() {
    let registry = registry().expect("registry");
    let test = registry.get("cl.cluster.discovery").expect("discovery test");

    assert_eq!(test.cluster_size, DISCOVERY_CLUSTER_SIZE);
    assert!(
        test.user_data
            .as_deref()
            .is_some_and(|data| data.contains(DISCOVERY_PLACEHOLDER))
    );
}

#[rstest]
#[tokio::test]
async fn whole_suite_passes_on_healthy_machines(workspace: Workspace) {
    let flight = FakeFlight::new(Platform::Qemu, FakeBehaviour::default());

    let report = run(&workspace, &flight, "cl.*").await;

    assert!(report.passed(), "unexpected failures: {:?}", report.tests);
    assert_eq!(report.tests.len(), 6);
    let ledger = flight.ledger();
    assert_eq!(ledger.clusters_created(), ledger.clusters_destroyed());
    assert_eq!(ledger.machines_created(), 8);
    assert!(
        ledger
            .user_data()
            .iter()
            .any(|data| data.contains("https://discovery.invalid/"))
    );
    assert_eq!(ledger.dropped_files().len(), 1);
}

#[rstest]
#[tokio::test]
async fn failed_units_command_failure_fails_test(workspace: Workspace) {
    let behaviour = FakeBehaviour {
        failing_commands: BTreeSet::from([String::from(FAILED_UNITS_COMMAND)]),
        ..FakeBehaviour::default()
    };
    let flight = FakeFlight::new(Platform::Qemu, behaviour);

    let report = run(&workspace, &flight, "cl.basic.failed-units").await;

    let [result] = report.tests.as_slice() else {
        panic!("expected one result, got {:?}", report.tests);
    };
    assert_eq!(result.result, TestStatus::Fail);
    assert!(result.output.contains(FAILED_UNITS_COMMAND));
}

#[rstest]
#[tokio::test]
async fn os_release_without_version_fails(workspace: Workspace) {
    let behaviour = FakeBehaviour {
        os_release: String::from("ID=flatcar\n"),
        ..FakeBehaviour::default()
    };
    let flight = FakeFlight::new(Platform::Qemu, behaviour);

    let report = run(&workspace, &flight, "cl.basic.os-release").await;

    assert!(!report.passed());
    assert!(
        report
            .tests
            .iter()
            .all(|test| test.output.contains("VERSION_ID"))
    );
}

#[rstest]
#[tokio::test]
async fn reboot_is_requested_before_reconnecting(workspace: Workspace) {
    let flight = FakeFlight::new(Platform::Qemu, FakeBehaviour::default());

    let report = run(&workspace, &flight, "cl.basic.reboot").await;

    assert!(report.passed());
    let commands: Vec<String> = flight
        .ledger()
        .commands()
        .into_iter()
        .map(|(_, command)| command)
        .collect();
    assert_eq!(commands, vec![String::from("<reboot>"), String::from("true")]);
}

#[rstest]
#[tokio::test]
async fn discovery_test_skips_without_discovery_service(workspace: Workspace) {
    let behaviour = FakeBehaviour {
        fail_discovery: true,
        ..FakeBehaviour::default()
    };
    let flight = FakeFlight::new(Platform::Qemu, behaviour);

    let report = run(&workspace, &flight, "cl.cluster.discovery").await;

    assert_eq!(report.count(TestStatus::Skip), 1);
    assert_eq!(flight.ledger().machines_created(), 0);
}

#[rstest]
#[tokio::test]
async fn discovery_peers_ping_each_other(workspace: Workspace) {
    let flight = FakeFlight::new(Platform::Qemu, FakeBehaviour::default());

    let report = run(&workspace, &flight, "cl.cluster.discovery").await;

    assert!(report.passed());
    let pings = flight
        .ledger()
        .commands()
        .iter()
        .filter(|(_, command)| command.starts_with("ping "))
        .count();
    assert_eq!(pings, 6);
}
