//! Error type shared by every platform backend.

use thiserror::Error;

use super::Platform;

/// Errors raised by flights, clusters, and machines.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PlatformError {
    /// Raised when a platform name is not recognised.
    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),
    /// Raised when the provider client for a platform is not built in.
    #[error("platform '{0}' is not supported by this build")]
    Unsupported(Platform),
    /// Raised when a flight cannot be constructed.
    #[error("platform setup failed: {0}")]
    Setup(String),
    /// Raised when the provider rejects or fails a lifecycle call.
    #[error("provider error: {0}")]
    Provider(String),
    /// Raised when a machine does not reach the expected state in time.
    #[error("timeout waiting for {action} on machine {machine_id}")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Provider identifier of the machine.
        machine_id: String,
    },
    /// Raised when an SSH or SCP invocation cannot be performed.
    #[error("ssh to machine {machine_id} failed: {message}")]
    Ssh {
        /// Provider identifier of the machine.
        machine_id: String,
        /// Underlying failure.
        message: String,
    },
    /// Raised when a discovery URL cannot be allocated.
    #[error("discovery service unavailable: {0}")]
    Discovery(String),
}
