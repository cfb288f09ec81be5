//! Failures of the Scaleway backend and their platform-level meaning.

use scaleway_rs::ScalewayError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::platform::PlatformError;

use super::types::InstanceId;

/// Errors raised while provisioning or tearing down Scaleway machines.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// The `SCW_*` settings are incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// No image matches the configured label and architecture.
    #[error("no {arch} image labelled '{label}' in zone {zone}")]
    ImageNotFound {
        /// Image label from the configuration.
        label: String,
        /// Architecture from the configuration.
        arch: String,
        /// Zone searched.
        zone: String,
    },
    /// The zone does not offer the configured commercial type.
    #[error("zone {zone} does not offer instance type '{instance_type}'")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// A freshly created machine refused the `poweron` action.
    #[error("machine {instance_id} cannot be powered on from state {state}")]
    PowerOnNotAllowed {
        /// Server identifier.
        instance_id: String,
        /// State reported by the API.
        state: String,
    },
    /// A machine reached `running` without a public address.
    #[error("machine {instance_id} is running without a public IPv4 address")]
    MissingPublicIp {
        /// Server identifier.
        instance_id: String,
    },
    /// A wait on a machine ran out of time.
    #[error("machine {instance_id} timed out during {action}")]
    Timeout {
        /// The wait that expired.
        action: String,
        /// Server identifier.
        instance_id: String,
    },
    /// A deleted machine is still listed by the API.
    #[error("machine {instance_id} is still listed after teardown")]
    ResidualResource {
        /// Server identifier.
        instance_id: String,
    },
    /// The API rejected a request.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the API or its client.
        message: String,
    },
}

impl ScalewayBackendError {
    pub(crate) fn timeout(action: &str, id: &InstanceId) -> Self {
        Self::Timeout {
            action: action.to_owned(),
            instance_id: id.as_str().to_owned(),
        }
    }
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<ScalewayBackendError> for PlatformError {
    fn from(value: ScalewayBackendError) -> Self {
        match value {
            ScalewayBackendError::Config(message) => Self::Setup(message),
            ScalewayBackendError::Timeout {
                action,
                instance_id,
            } => Self::Timeout {
                action,
                machine_id: instance_id,
            },
            other => Self::Provider(other.to_string()),
        }
    }
}
