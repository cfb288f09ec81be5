//! Parallel execution of selected tests with per-test provisioning and
//! guaranteed teardown.
//!
//! The controller feeds tests into a bounded queue drained by a fixed pool of
//! worker tasks. Each worker creates a cluster for its test, provisions the
//! requested machines, runs the body, then collects and classifies console
//! and journal output before destroying the cluster. Results flow back to the
//! controller over a channel and become the [`RunReport`].

mod cluster;
mod error;
mod guard;
pub mod native;
pub mod probe;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::console::check_console;
use crate::filter::{FilterCriteria, filter_tests, needs_version_probe};
use crate::output::{ensure_dir, write_artifact};
use crate::platform::{Cluster, Flight, PlatformError, RuntimeConfig};
use crate::registry::{DISCOVERY_PLACEHOLDER, TestDescriptor, TestFlag, TestRegistry};
use crate::report::{RunReport, TestResult, TestStatus};

pub use cluster::TestCluster;
pub use error::{HarnessError, TestError};
pub use guard::ClusterGuard;

/// Default pause between the end of a test and log collection.
pub const DEFAULT_LOG_FLUSH_DELAY: Duration = Duration::from_secs(10);

/// Lifecycle of a single test, reported through tracing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestState {
    /// Queued for a worker.
    Pending,
    /// Cluster and machines are being created.
    Provisioning,
    /// The body is executing.
    Running,
    /// Logs are being collected and the cluster destroyed.
    TearingDown,
    /// Finished successfully.
    Passed,
    /// Finished with a failure.
    Failed,
    /// Not applicable in this environment.
    Skipped,
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::TearingDown => "tearing-down",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

impl From<TestStatus> for TestState {
    fn from(value: TestStatus) -> Self {
        match value {
            TestStatus::Pass => Self::Passed,
            TestStatus::Fail => Self::Failed,
            TestStatus::Skip => Self::Skipped,
        }
    }
}

/// Tuning for a harness run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HarnessOptions {
    /// Number of tests executed concurrently.
    pub parallel: usize,
    /// Destroy clusters and the flight once tests finish.
    pub remove: bool,
    /// Pause before collecting logs so guests can flush them.
    pub log_flush_delay: Duration,
    /// Directories searched for the native helper binary, in order.
    pub helper_dirs: Vec<Utf8PathBuf>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            remove: true,
            log_flush_delay: DEFAULT_LOG_FLUSH_DELAY,
            helper_dirs: native::default_search_dirs(crate::filter::NATIVE_ARCH),
        }
    }
}

/// Runs tests against one flight.
#[derive(Clone)]
pub struct Harness {
    flight: Arc<dyn Flight>,
    run_dir: Utf8PathBuf,
    options: HarnessOptions,
}

impl Harness {
    /// Creates a harness writing artefacts below `run_dir`.
    #[must_use]
    pub fn new(
        flight: Arc<dyn Flight>,
        run_dir: impl Into<Utf8PathBuf>,
        options: HarnessOptions,
    ) -> Self {
        Self {
            flight,
            run_dir: run_dir.into(),
            options,
        }
    }

    /// Selects the tests in `registry` matching `criteria`, runs them, and
    /// destroys the flight when removal is enabled.
    ///
    /// When any selected test carries version bounds and was matched by a
    /// glob, a probe machine determines the OS version first and selection is
    /// repeated with it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] for setup failures: an invalid pattern, a
    /// failed version probe, or an empty selection. Individual test failures
    /// are reported in the [`RunReport`] instead.
    pub async fn run_suite(
        &self,
        registry: &TestRegistry,
        criteria: FilterCriteria,
    ) -> Result<RunReport, HarnessError> {
        let outcome = self.select_and_run(registry, criteria).await;
        if self.options.remove
            && let Err(err) = self.flight.destroy().await
        {
            warn!(platform = %self.flight.platform(), error = %err, "flight teardown failed");
        }
        outcome
    }

    async fn select_and_run(
        &self,
        registry: &TestRegistry,
        criteria: FilterCriteria,
    ) -> Result<RunReport, HarnessError> {
        let initial = filter_tests(registry.iter(), &criteria)?;
        let (selected, version) = if needs_version_probe(initial.values(), &criteria) {
            let probed = probe::probe_version(self.flight.as_ref(), &self.run_dir).await?;
            let refined = filter_tests(registry.iter(), &criteria.with_version(probed.clone()))?;
            (refined, probed.to_string())
        } else {
            (initial, String::new())
        };

        if selected.is_empty() {
            return Err(HarnessError::NoTestsMatched);
        }
        info!(
            platform = %self.flight.platform(),
            tests = selected.len(),
            parallel = self.options.parallel,
            "starting run"
        );

        let results = self.run_tests(selected).await;
        Ok(RunReport::new(
            results,
            self.flight.platform().as_str(),
            version,
        ))
    }

    /// Runs `tests` on the worker pool and returns their results in
    /// completion order.
    ///
    /// When a test declaring [`TestFlag::FailFast`] fails, no further tests
    /// are started; tests that never started are absent from the results.
    pub async fn run_tests(
        &self,
        tests: BTreeMap<String, Arc<TestDescriptor>>,
    ) -> Vec<TestResult> {
        let workers = self.options.parallel.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Arc<TestDescriptor>>(workers);
        let jobs = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let halted = Arc::new(AtomicBool::new(false));
        let harness = Arc::new(self.clone());

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    harness: Arc::clone(&harness),
                    jobs: Arc::clone(&jobs),
                    results: result_tx.clone(),
                    halted: Arc::clone(&halted),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        drop(jobs);
        drop(result_tx);

        for test in tests.into_values() {
            if halted.load(Ordering::SeqCst) {
                break;
            }
            info!(test = %test.name, state = %TestState::Pending, "queued");
            if job_tx.send(test).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        results
    }

    async fn run_test(&self, test: &Arc<TestDescriptor>) -> TestResult {
        let started = Instant::now();
        let (result, lines) = self.execute(test).await;
        let duration = started.elapsed();
        info!(
            test = %test.name,
            state = %TestState::from(result),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "finished"
        );
        TestResult {
            name: test.name.clone(),
            result,
            duration,
            output: lines.join("\n"),
        }
    }

    async fn execute(&self, test: &Arc<TestDescriptor>) -> (TestStatus, Vec<String>) {
        let test_dir = self.run_dir.join(&test.name);
        let helper = if test.native_funcs.is_empty() {
            None
        } else {
            match native::locate_helper(&self.options.helper_dirs) {
                Some(path) => Some(path),
                None => {
                    return (
                        TestStatus::Fail,
                        vec![format!(
                            "helper binary {} not found in {:?}",
                            native::HELPER_BINARY,
                            self.options.helper_dirs
                        )],
                    );
                }
            }
        };
        if let Err(err) = ensure_dir(&test_dir) {
            return (TestStatus::Fail, vec![err.to_string()]);
        }

        info!(test = %test.name, state = %TestState::Provisioning, "creating cluster");
        let runtime = RuntimeConfig {
            output_dir: test_dir.clone(),
            no_ssh_key_in_user_data: test.has_flag(TestFlag::NoSshKeyInUserData),
            no_ssh_key_in_metadata: test.has_flag(TestFlag::NoSshKeyInMetadata),
        };
        let cluster = match self.flight.new_cluster(&runtime).await {
            Ok(cluster) => cluster,
            Err(err) => {
                return (
                    TestStatus::Fail,
                    vec![format!("cluster creation failed: {err}")],
                );
            }
        };
        let guard = ClusterGuard::new(Arc::clone(&cluster), self.options.remove);
        let handle = TestCluster::new(
            Arc::clone(&cluster),
            test,
            helper.clone(),
            test_dir.clone(),
        );

        let outcome = self
            .provision_and_run(test, &handle, helper.as_deref())
            .await;

        info!(test = %test.name, state = %TestState::TearingDown, "collecting logs");
        let findings = self.collect_diagnostics(test, &cluster, &test_dir).await;
        if let Err(err) = guard.release().await {
            warn!(
                test = %test.name,
                cluster = cluster.name(),
                error = %err,
                "cluster teardown failed"
            );
        }

        let mut lines = Vec::new();
        let mut status = match outcome {
            Ok(()) => TestStatus::Pass,
            Err(TestError::Failed(message)) => {
                lines.push(message);
                TestStatus::Fail
            }
            Err(TestError::Skipped(reason)) => {
                lines.push(reason);
                TestStatus::Skip
            }
        };
        lines.extend(handle.log_lines());
        if !findings.is_empty() {
            status = TestStatus::Fail;
            lines.extend(findings);
        }
        (status, lines)
    }

    async fn provision_and_run(
        &self,
        test: &TestDescriptor,
        handle: &TestCluster,
        helper: Option<&Utf8Path>,
    ) -> Result<(), TestError> {
        if test.cluster_size > 0 {
            let template = test.user_data.clone().unwrap_or_default();
            let user_data = if template.contains(DISCOVERY_PLACEHOLDER) {
                let url = handle.discovery_url(test.cluster_size).await?;
                template.replace(DISCOVERY_PLACEHOLDER, &url)
            } else {
                template
            };
            for _ in 0..test.cluster_size {
                handle
                    .inner()
                    .new_machine(&user_data)
                    .await
                    .map_err(|err| TestError::Failed(format!("machine creation failed: {err}")))?;
            }
            if let Some(path) = helper {
                handle.inner().drop_file(path).await?;
            }
        }

        info!(test = %test.name, state = %TestState::Running, "running body");
        let body = test.body();
        match tokio::spawn(body(handle.clone())).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(TestError::Failed(format!(
                "test body panicked: {}",
                panic_message(err.into_panic().as_ref())
            ))),
            Err(err) => Err(TestError::Failed(format!("test body was cancelled: {err}"))),
        }
    }

    async fn collect_diagnostics(
        &self,
        test: &TestDescriptor,
        cluster: &Arc<dyn Cluster>,
        test_dir: &Utf8Path,
    ) -> Vec<String> {
        if cluster.machines().is_empty() {
            return Vec::new();
        }
        if !self.options.log_flush_delay.is_zero() {
            sleep(self.options.log_flush_delay).await;
        }
        let mut findings =
            record_output(test, test_dir, "console", cluster.console_output().await);
        findings.extend(record_output(
            test,
            test_dir,
            "journal",
            cluster.journal_output().await,
        ));
        findings
    }
}

/// Writes each machine's captured `kind` text and classifies it.
fn record_output(
    test: &TestDescriptor,
    test_dir: &Utf8Path,
    kind: &str,
    captured: Result<BTreeMap<String, String>, PlatformError>,
) -> Vec<String> {
    let outputs = match captured {
        Ok(outputs) => outputs,
        Err(err) => {
            warn!(test = %test.name, kind, error = %err, "log collection failed");
            return Vec::new();
        }
    };
    let mut findings = Vec::new();
    for (machine_id, text) in &outputs {
        if let Err(err) = write_artifact(test_dir, &format!("{kind}-{machine_id}.txt"), text) {
            warn!(
                test = %test.name,
                kind,
                machine = %machine_id,
                error = %err,
                "failed to save log"
            );
        }
        findings.extend(
            check_console(text, test)
                .into_iter()
                .map(|finding| format!("{kind} of {machine_id}: {finding}")),
        );
    }
    findings
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}

struct Worker {
    id: usize,
    harness: Arc<Harness>,
    jobs: Arc<Mutex<mpsc::Receiver<Arc<TestDescriptor>>>>,
    results: mpsc::UnboundedSender<TestResult>,
    halted: Arc<AtomicBool>,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.halted.load(Ordering::SeqCst) {
                break;
            }
            let next = self.jobs.lock().await.recv().await;
            let Some(test) = next else {
                break;
            };
            if self.halted.load(Ordering::SeqCst) {
                debug!(worker = self.id, test = %test.name, "fail-fast halt; dropping test");
                break;
            }

            let result = self.harness.run_test(&test).await;
            if result.result == TestStatus::Fail && test.has_flag(TestFlag::FailFast) {
                warn!(test = %test.name, "fail-fast test failed; halting scheduling");
                self.halted.store(true, Ordering::SeqCst);
            }
            if self.results.send(result).is_err() {
                break;
            }
        }
        debug!(worker = self.id, "worker exiting");
    }
}
