//! Errors raised by the harness and by test bodies.

use std::fmt;

use thiserror::Error;

use crate::filter::FilterError;
use crate::platform::PlatformError;

/// Setup failures that abort a run before any test executes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HarnessError {
    /// Raised when test selection fails.
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// Raised when no registered test survives filtering.
    #[error("no tests matched the requested patterns")]
    NoTestsMatched,
    /// Raised when the OS version cannot be determined.
    #[error("version probe failed: {0}")]
    VersionProbe(String),
}

/// Early exit from a test body.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TestError {
    /// The test failed with the given message.
    #[error("{0}")]
    Failed(String),
    /// The test could not run in this environment.
    #[error("{0}")]
    Skipped(String),
}

impl TestError {
    /// Builds a [`TestError::Failed`] from any displayable message.
    #[must_use]
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// Builds a [`TestError::Skipped`] from any displayable reason.
    #[must_use]
    pub fn skipped(reason: impl fmt::Display) -> Self {
        Self::Skipped(reason.to_string())
    }
}

impl From<PlatformError> for TestError {
    fn from(value: PlatformError) -> Self {
        Self::Failed(value.to_string())
    }
}
