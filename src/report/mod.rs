//! Run results and the reporters that persist them.

mod tap;

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::output::{OutputError, write_artifact};

pub use tap::render_tap;

/// Subdirectory of the run directory holding report files.
pub const REPORTS_DIR: &str = "reports";

/// Outcome of a single test, or of the whole run.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    /// The test passed.
    Pass,
    /// The test failed.
    Fail,
    /// The test was not applicable in this environment.
    Skip,
}

impl TestStatus {
    /// Returns the wire label (`PASS`, `FAIL`, `SKIP`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result recorded for one test.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestResult {
    /// Test name.
    pub name: String,
    /// Outcome.
    pub result: TestStatus,
    /// Wall-clock time from provisioning to the end of teardown, serialised
    /// in nanoseconds.
    #[serde(
        serialize_with = "serialize_nanos",
        deserialize_with = "deserialize_nanos"
    )]
    pub duration: Duration,
    /// Failure text, skip reason, and any log lines the test emitted.
    pub output: String,
}

/// Aggregate report for a run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunReport {
    /// Per-test results in completion order.
    pub tests: Vec<TestResult>,
    /// `FAIL` when any test failed, `PASS` otherwise.
    pub result: TestStatus,
    /// Platform the run targeted.
    pub platform: String,
    /// OS version reported by the version probe, or empty when not probed.
    pub version: String,
}

impl RunReport {
    /// Builds a report, deriving the aggregate result from `tests`.
    ///
    /// Skipped tests count as passing.
    #[must_use]
    pub fn new(
        tests: Vec<TestResult>,
        platform: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let result = if tests.iter().any(|test| test.result == TestStatus::Fail) {
            TestStatus::Fail
        } else {
            TestStatus::Pass
        };
        Self {
            tests,
            result,
            platform: platform.into(),
            version: version.into(),
        }
    }

    /// Returns `true` when no test failed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.result != TestStatus::Fail
    }

    /// Process exit code for this report.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.passed())
    }

    /// Counts the tests with `status`.
    #[must_use]
    pub fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|test| test.result == status).count()
    }
}

/// Errors raised while writing reports.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Raised when a report file cannot be written.
    #[error(transparent)]
    Output(#[from] OutputError),
    /// Raised when a report path names a directory rather than a file.
    #[error("report path {0} is missing a filename")]
    MissingFileName(Utf8PathBuf),
    /// Raised when the report cannot be serialised.
    #[error("failed to serialise report: {0}")]
    Serialise(#[from] serde_json::Error),
}

/// Persists a [`RunReport`] in one format.
pub trait Reporter {
    /// Writes `report` below `run_dir` and returns the written path.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] when the report cannot be rendered or written.
    fn write(&self, report: &RunReport, run_dir: &Utf8Path) -> Result<Utf8PathBuf, ReportError>;
}

/// Writes `reports/report.json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn write(&self, report: &RunReport, run_dir: &Utf8Path) -> Result<Utf8PathBuf, ReportError> {
        let rendered = serde_json::to_string_pretty(report)?;
        write_report(run_dir, "report.json", &rendered)
    }
}

/// Writes `reports/report.tap`, optionally copying it to a caller-chosen
/// path.
#[derive(Clone, Debug, Default)]
pub struct TapReporter {
    copy_to: Option<Utf8PathBuf>,
}

impl TapReporter {
    /// Creates a reporter that also writes the TAP stream to `copy_to`.
    #[must_use]
    pub const fn new(copy_to: Option<Utf8PathBuf>) -> Self {
        Self { copy_to }
    }
}

impl Reporter for TapReporter {
    fn write(&self, report: &RunReport, run_dir: &Utf8Path) -> Result<Utf8PathBuf, ReportError> {
        let rendered = render_tap(report);
        let written = write_report(run_dir, "report.tap", &rendered)?;
        if let Some(copy) = &self.copy_to {
            write_file(copy, &rendered)?;
        }
        Ok(written)
    }
}

fn write_report(
    run_dir: &Utf8Path,
    file_name: &str,
    contents: &str,
) -> Result<Utf8PathBuf, ReportError> {
    let path = run_dir.join(REPORTS_DIR).join(file_name);
    write_file(&path, contents)?;
    Ok(path)
}

fn write_file(path: &Utf8Path, contents: &str) -> Result<(), ReportError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| ReportError::MissingFileName(path.to_path_buf()))?;
    write_artifact(parent, file_name, contents)?;
    Ok(())
}

fn serialize_nanos<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    serializer.serialize_u64(nanos)
}

fn deserialize_nanos<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_nanos)
}

#[cfg(test)]
mod tests;
