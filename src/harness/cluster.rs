//! The cluster handle passed to test bodies.

use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use super::TestError;
use super::native::native_command;
use crate::platform::{Cluster, Machine};
use crate::registry::TestDescriptor;

/// A test's view of its cluster.
///
/// Cloning is cheap; every clone shares the underlying cluster and log.
#[derive(Clone)]
pub struct TestCluster {
    cluster: Arc<dyn Cluster>,
    test_name: String,
    native_funcs: Arc<[String]>,
    helper: Option<Utf8PathBuf>,
    output_dir: Utf8PathBuf,
    log: Arc<Mutex<Vec<String>>>,
}

impl TestCluster {
    /// Wraps `cluster` for `test`.
    ///
    /// When `helper` is set it is copied onto every machine the body creates.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn Cluster>,
        test: &TestDescriptor,
        helper: Option<Utf8PathBuf>,
        output_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            cluster,
            test_name: test.name.clone(),
            native_funcs: test.native_funcs.iter().cloned().collect(),
            helper,
            output_dir: output_dir.into(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Name of the underlying cluster.
    #[must_use]
    pub fn name(&self) -> &str {
        self.cluster.name()
    }

    /// Name of the test owning this cluster.
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Directory for artefacts produced by the test.
    #[must_use]
    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    /// Machines created so far.
    #[must_use]
    pub fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.cluster.machines()
    }

    /// Returns machine `index`, failing the test when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Failed`] when fewer machines exist.
    pub fn machine(&self, index: usize) -> Result<Arc<dyn Machine>, TestError> {
        self.machines()
            .get(index)
            .cloned()
            .ok_or_else(|| TestError::Failed(format!("cluster has no machine {index}")))
    }

    /// Creates another machine booted with `user_data`.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Failed`] when provisioning or the helper copy
    /// fails.
    pub async fn new_machine(&self, user_data: &str) -> Result<Arc<dyn Machine>, TestError> {
        let machine = self.cluster.new_machine(user_data).await?;
        if let Some(helper) = &self.helper {
            self.cluster.drop_file(helper).await?;
        }
        Ok(machine)
    }

    /// Mints a discovery URL for `size` members.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Skipped`] when the discovery service is
    /// unavailable.
    pub async fn discovery_url(&self, size: usize) -> Result<String, TestError> {
        self.cluster
            .get_discovery_url(size)
            .await
            .map_err(TestError::skipped)
    }

    /// Runs `command` on `machine` and returns its trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Failed`] when the command cannot be run or exits
    /// non-zero.
    pub async fn ssh(&self, machine: &dyn Machine, command: &str) -> Result<String, TestError> {
        debug!(test = %self.test_name, machine = machine.id(), command, "ssh");
        let output = machine.ssh(command).await?;
        if output.is_success() {
            return Ok(output.stdout.trim().to_owned());
        }
        let status = output
            .exit_code
            .map_or_else(|| String::from("signal"), |code| code.to_string());
        Err(TestError::Failed(format!(
            "`{command}` on {} exited with {status}: {}",
            machine.id(),
            output.stderr.trim()
        )))
    }

    /// Runs native function `func` of this test on `machine` through the
    /// helper binary.
    ///
    /// # Errors
    ///
    /// Returns [`TestError::Failed`] when the test does not declare `func` or
    /// the helper reports failure.
    pub async fn run_native(&self, func: &str, machine: &dyn Machine) -> Result<String, TestError> {
        if !self.native_funcs.iter().any(|declared| declared == func) {
            return Err(TestError::Failed(format!(
                "native function '{func}' is not declared by {}",
                self.test_name
            )));
        }
        self.ssh(machine, &native_command(&self.test_name, func)).await
    }

    /// Appends a line to the test's report output.
    pub fn log(&self, line: impl Into<String>) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.into());
    }

    pub(crate) fn log_lines(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn inner(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }
}
