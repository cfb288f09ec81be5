//! SSH client settings loaded via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use super::SshError;

/// Default login user on test machines.
pub const DEFAULT_SSH_USER: &str = "core";

/// SSH and SCP settings merged from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SORTIE_SSH",
    discovery(
        app_name = "sortie",
        env_var = "SORTIE_CONFIG_PATH",
        config_file_name = "sortie.toml",
        dotfile_name = ".sortie.toml",
        project_file_name = "sortie.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub user: String,
    /// Whether to force batch mode to avoid password prompts. Unset means
    /// batch mode.
    pub batch_mode: Option<bool>,
    /// Whether to enforce host key checking. Test machines are ephemeral, so
    /// this defaults to off.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Private key used for authentication. Supports `~/` expansion.
    pub identity_file: Option<String>,
    /// Seconds to wait for the TCP connection before giving up.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
}

/// Errors raised when loading the SSH configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl SshConfig {
    /// Whether `BatchMode=yes` is passed to `ssh` and `scp`.
    #[must_use]
    pub const fn uses_batch_mode(&self) -> bool {
        matches!(self.batch_mode, None | Some(true))
    }

    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when any required field is empty.
    pub fn validate(&self) -> Result<(), SshError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.user, "user")?;
        Self::require_optional_value(self.identity_file.as_deref(), "identity_file")?;
        if self.connect_timeout_secs == 0 {
            return Err(SshError::InvalidConfig {
                field: String::from("connect_timeout_secs"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("sortie")])
            .map_err(|err| SshConfigLoadError::Parse(err.to_string()))
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), SshError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(SshError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), SshError> {
        Self::require_optional_value(Some(value), field)
    }
}
