//! Garbage collection of abandoned test instances.
//!
//! Runs that crash or are killed can leave `sortie`-tagged servers behind.
//! The collector lists every server in a project through the `scw` CLI,
//! deletes tagged servers created before the grace period, and fails if a
//! deleted server still shows up afterwards.

use std::ffi::OsString;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::scaleway::{RESOURCE_TAG, run_tag};
use crate::ssh::{CommandOutput, CommandRunner, ProcessCommandRunner, SshError};

/// Default Scaleway CLI binary name.
pub const DEFAULT_SCW_BIN: &str = "scw";

/// Default age, in hours, after which a tagged server counts as abandoned.
pub const DEFAULT_GRACE_PERIOD_HOURS: i64 = 4;

/// Configuration for a collection pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcConfig {
    /// Project id scoping server discovery.
    pub project_id: String,
    /// Minimum age of a server before it is deleted.
    pub grace_period: Duration,
    /// Restricts collection to one run when set.
    pub run_id: Option<String>,
    /// Path to the `scw` CLI binary.
    pub scw_bin: String,
}

impl GcConfig {
    /// Constructs a config, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::InvalidConfig`] when a required field is blank or
    /// the grace period is negative.
    pub fn new(
        project_id: impl Into<String>,
        grace_period_hours: i64,
        scw_bin: impl Into<String>,
    ) -> Result<Self, GcError> {
        let trimmed_project_id = project_id.into().trim().to_owned();
        let trimmed_scw_bin = scw_bin.into().trim().to_owned();
        if trimmed_project_id.is_empty() {
            return Err(GcError::InvalidConfig {
                field: String::from("project_id"),
            });
        }
        if trimmed_scw_bin.is_empty() {
            return Err(GcError::InvalidConfig {
                field: String::from("scw_bin"),
            });
        }
        let grace_period = Duration::try_hours(grace_period_hours)
            .filter(|period| *period >= Duration::zero())
            .ok_or_else(|| GcError::InvalidConfig {
                field: String::from("grace_period_hours"),
            })?;
        Ok(Self {
            project_id: trimmed_project_id,
            grace_period,
            run_id: None,
            scw_bin: trimmed_scw_bin,
        })
    }

    /// Limits collection to servers carrying the tag of `run_id`.
    #[must_use]
    pub fn for_run(self, run_id: Option<String>) -> Self {
        Self {
            run_id: run_id
                .map(|id| id.trim().to_owned())
                .filter(|id| !id.is_empty()),
            ..self
        }
    }

    /// Tag a server must carry to be collected.
    #[must_use]
    pub fn required_tag(&self) -> String {
        self.run_id
            .as_deref()
            .map_or_else(|| String::from(RESOURCE_TAG), run_tag)
    }
}

/// Summary of a collection pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcSummary {
    /// Servers deleted during the pass.
    pub deleted: Vec<String>,
    /// Tagged servers left alone because they are younger than the grace period.
    pub retained: usize,
}

/// Errors returned by the collector.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GcError {
    /// Raised when configuration is missing required values.
    #[error("missing or invalid {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
    /// Raised when `scw` returns a non-zero exit status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed (typically `scw`).
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when `scw` output cannot be parsed.
    #[error("failed to parse {resource}: {message}")]
    Parse {
        /// What was being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when deleted servers are still listed after the pass.
    #[error("servers remain after garbage collection: {}", ids.join(", "))]
    NotClean {
        /// Identifiers of the servers that survived deletion.
        ids: Vec<String>,
    },
    /// Raised when command execution fails.
    #[error(transparent)]
    Runner(#[from] SshError),
}

/// Deletes abandoned `sortie` servers by shelling out to `scw`.
#[derive(Clone, Debug)]
pub struct Gc<R: CommandRunner> {
    config: GcConfig,
    runner: R,
}

impl Gc<ProcessCommandRunner> {
    /// Creates a collector wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(config: GcConfig) -> Self {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> Gc<R> {
    /// Creates a collector using the provided configuration and runner.
    #[must_use]
    pub const fn new(config: GcConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Runs a pass against the current wall-clock time.
    ///
    /// # Errors
    ///
    /// See [`Gc::sweep_at`].
    pub fn sweep(&self) -> Result<GcSummary, GcError> {
        self.sweep_at(Utc::now())
    }

    /// Deletes tagged servers created before `now - grace_period`, then
    /// checks that none of them are still listed.
    ///
    /// # Errors
    ///
    /// Returns [`GcError`] when `scw` fails, its output cannot be parsed, or
    /// deleted servers remain.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<GcSummary, GcError> {
        let tag = self.config.required_tag();
        let cutoff = now - self.config.grace_period;

        let mut deleted = Vec::new();
        let mut retained = 0;
        for server in self.list_servers()?.iter().filter(|srv| srv.has_tag(&tag)) {
            if server.created_at()? > cutoff {
                debug!(server = %server.id, created = %server.creation_date, "within grace period");
                retained += 1;
                continue;
            }
            info!(server = %server.id, zone = %server.zone, "deleting abandoned server");
            self.delete_server(server)?;
            deleted.push(server.id.clone());
        }

        if !deleted.is_empty() {
            let remaining: Vec<String> = self
                .list_servers()?
                .into_iter()
                .filter(|srv| deleted.contains(&srv.id))
                .map(|srv| srv.id)
                .collect();
            if !remaining.is_empty() {
                return Err(GcError::NotClean { ids: remaining });
            }
        }

        Ok(GcSummary { deleted, retained })
    }

    fn check_scw_output(
        &self,
        output: CommandOutput,
        resource: &str,
    ) -> Result<CommandOutput, GcError> {
        if output.is_success() {
            return Ok(output);
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(GcError::CommandFailure {
            program: self.config.scw_bin.clone(),
            status: output.code,
            status_text,
            stderr: format!("{resource}: {}", output.stderr),
        })
    }

    fn run_scw(&self, args: &[OsString], resource: &str) -> Result<CommandOutput, GcError> {
        let output = self.runner.run(&self.config.scw_bin, args)?;
        self.check_scw_output(output, resource)
    }

    fn list_args(&self) -> Vec<OsString> {
        [
            String::from("instance"),
            String::from("server"),
            String::from("list"),
            format!("project-id={}", self.config.project_id),
            String::from("zone=all"),
            format!("tags.0={RESOURCE_TAG}"),
            String::from("-o"),
            String::from("json"),
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }

    fn list_servers(&self) -> Result<Vec<ScwServer>, GcError> {
        let output = self.run_scw(&self.list_args(), "servers")?;
        serde_json::from_str::<Vec<ScwServer>>(&output.stdout).map_err(|err| GcError::Parse {
            resource: String::from("servers"),
            message: err.to_string(),
        })
    }

    fn delete_server(&self, server: &ScwServer) -> Result<CommandOutput, GcError> {
        let args = vec![
            OsString::from("instance"),
            OsString::from("server"),
            OsString::from("delete"),
            OsString::from(&server.id),
            OsString::from(format!("zone={}", server.zone)),
            OsString::from("with-ip=true"),
            OsString::from("with-volumes=all"),
            OsString::from("force-shutdown=true"),
            OsString::from("--wait"),
        ];
        self.run_scw(&args, "server delete")
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
struct ScwServer {
    id: String,
    zone: String,
    creation_date: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl ScwServer {
    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }

    fn created_at(&self) -> Result<DateTime<Utc>, GcError> {
        DateTime::parse_from_rfc3339(&self.creation_date)
            .map(|date| date.with_timezone(&Utc))
            .map_err(|err| GcError::Parse {
                resource: format!("creation_date of {}", self.id),
                message: err.to_string(),
            })
    }
}
