//! Shared fixtures for harness BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use semver::Version;
use sortie::output::RunDirectory;
use sortie::test_support::{FakeBehaviour, FakeFlight};
use sortie::{
    FilterCriteria, HarnessOptions, Platform, RunReport, TestCluster, TestDescriptor, TestError,
    TestRegistry,
};
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Finished {
        report: RunReport,
        run_dir: RunDirectory,
        written: Utf8PathBuf,
    },
    Rejected {
        pattern_error: bool,
        message: String,
    },
}

#[derive(Clone, Debug)]
pub struct HarnessContext {
    pub root: Utf8PathBuf,
    pub flight: FakeFlight,
    pub options: HarnessOptions,
    pub registry: Option<TestRegistry>,
    pub outcome: Option<RunOutcome>,
    pub(crate) workspace: Arc<TempDir>,
}

#[fixture]
pub fn harness_context() -> HarnessContext {
    let workspace =
        TempDir::new().unwrap_or_else(|err| panic!("workspace tempdir should exist: {err}"));
    let root = Utf8PathBuf::from_path_buf(workspace.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-utf8 tempdir path: {}", path.display()));

    HarnessContext {
        root,
        flight: FakeFlight::new(Platform::Qemu, FakeBehaviour::default()),
        options: HarnessOptions {
            parallel: 1,
            remove: true,
            log_flush_delay: Duration::ZERO,
            helper_dirs: Vec::new(),
        },
        registry: None,
        outcome: None,
        workspace: Arc::new(workspace),
    }
}

pub fn criteria(pattern: &str) -> FilterCriteria {
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

fn passing(name: &str) -> TestDescriptor {
    TestDescriptor::builder(name, |cluster: TestCluster| async move {
        let machine = cluster.machine(0)?;
        cluster.ssh(machine.as_ref(), "true").await?;
        Ok(())
    })
    .cluster_size(1)
    .build()
    .unwrap_or_else(|err| panic!("passing descriptor should build: {err}"))
}

pub fn two_passing_one_failing() -> TestRegistry {
    let failing = TestDescriptor::builder("e2e.broken", |_| async {
        Err(TestError::failed("assertion failed: service inactive"))
    })
    .cluster_size(1)
    .build()
    .unwrap_or_else(|err| panic!("failing descriptor should build: {err}"));

    TestRegistry::new([passing("e2e.first"), passing("e2e.second"), failing])
        .unwrap_or_else(|err| panic!("registry should accept unique names: {err}"))
}
