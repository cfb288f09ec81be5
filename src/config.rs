//! Configuration loading via `ortho-config`.
//!
//! Settings merge defaults, `sortie.toml` (or `.sortie.toml`), environment
//! variables, and CLI flags, in increasing order of precedence.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Scaleway specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "sortie",
        env_var = "SORTIE_CONFIG_PATH",
        config_file_name = "sortie.toml",
        dotfile_name = ".sortie.toml",
        project_file_name = "sortie.toml"
    )
)]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; accepted so a shared Scaleway profile loads unchanged.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Availability zone for test machines. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for test machines. Defaults to `DEV1-S`.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Image label of the operating system under test.
    #[ortho_config(default = "Flatcar Container Linux Stable".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in sortie.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sortie")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                &self.secret_key,
                FieldMetadata::new(
                    "Scaleway API secret key",
                    "SCW_SECRET_KEY",
                    "secret_key",
                    "scaleway",
                ),
            ),
            (
                &self.default_project_id,
                FieldMetadata::new(
                    "Scaleway project ID",
                    "SCW_DEFAULT_PROJECT_ID",
                    "default_project_id",
                    "scaleway",
                ),
            ),
            (
                &self.default_image,
                FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway"),
            ),
            (
                &self.default_instance_type,
                FieldMetadata::new(
                    "instance type",
                    "SCW_DEFAULT_INSTANCE_TYPE",
                    "default_instance_type",
                    "scaleway",
                ),
            ),
            (
                &self.default_zone,
                FieldMetadata::new(
                    "availability zone",
                    "SCW_DEFAULT_ZONE",
                    "default_zone",
                    "scaleway",
                ),
            ),
            (
                &self.default_architecture,
                FieldMetadata::new(
                    "CPU architecture",
                    "SCW_DEFAULT_ARCHITECTURE",
                    "default_architecture",
                    "scaleway",
                ),
            ),
        ];
        fields
            .iter()
            .try_for_each(|(value, metadata)| require_field(value, metadata))
    }
}

/// Run-wide harness settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SORTIE",
    discovery(
        app_name = "sortie",
        env_var = "SORTIE_CONFIG_PATH",
        config_file_name = "sortie.toml",
        dotfile_name = ".sortie.toml",
        project_file_name = "sortie.toml"
    )
)]
pub struct HarnessConfig {
    /// Number of tests run concurrently.
    #[ortho_config(default = 1)]
    pub parallel: usize,
    /// Base directory receiving run directories.
    #[ortho_config(default = "_sortie_temp".to_owned())]
    pub output_dir: String,
    /// Destroy machines once their test finishes. Unset means remove.
    pub remove: Option<bool>,
    /// Distribution under test.
    #[ortho_config(default = "cl".to_owned())]
    pub distribution: String,
    /// Release channel under test.
    #[ortho_config(default = "stable".to_owned())]
    pub channel: String,
    /// Product offering under test.
    #[ortho_config(default = "basic".to_owned())]
    pub offering: String,
    /// Board name, for example `arm64-usr`. Determines the architecture.
    pub board: Option<String>,
    /// Seconds to wait before collecting console and journal output.
    #[ortho_config(default = 10)]
    pub log_flush_delay_secs: u64,
    /// Service minting cluster discovery URLs.
    #[ortho_config(default = "https://discovery.etcd.io/new".to_owned())]
    pub discovery_endpoint: String,
}

impl HarnessConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sortie")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Whether clusters and the flight are destroyed after the run.
    #[must_use]
    pub const fn removes_machines(&self) -> bool {
        matches!(self.remove, None | Some(true))
    }

    /// Pause before log collection.
    #[must_use]
    pub const fn log_flush_delay(&self) -> Duration {
        Duration::from_secs(self.log_flush_delay_secs)
    }

    /// Checks values the harness cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for empty required strings and
    /// [`ConfigError::Invalid`] for a zero parallelism.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::Invalid(String::from(
                "parallel must be at least 1: set SORTIE_PARALLEL or pass --parallel",
            )));
        }
        require_field(
            &self.output_dir,
            &FieldMetadata::new("output directory", "SORTIE_OUTPUT_DIR", "output_dir", "sortie"),
        )?;
        require_field(
            &self.discovery_endpoint,
            &FieldMetadata::new(
                "discovery endpoint",
                "SORTIE_DISCOVERY_ENDPOINT",
                "discovery_endpoint",
                "sortie",
            ),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
