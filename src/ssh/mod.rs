//! SSH and SCP access to provisioned machines through the system clients.
//!
//! Commands are executed through a [`CommandRunner`] so tests can replace the
//! real process spawner with a scripted double.

mod config;
mod runner;

use std::ffi::OsString;
use std::net::IpAddr;

use camino::Utf8Path;

use crate::platform::SshOutput;

pub use config::{DEFAULT_SSH_USER, SshConfig, SshConfigLoadError};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, SshError};

/// Address of an SSH endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Host address.
    pub ip: IpAddr,
    /// TCP port of the SSH daemon.
    pub port: u16,
}

/// Runs commands and copies files over SSH.
#[derive(Clone, Debug)]
pub struct SshClient<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl SshClient<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: SshConfig) -> Result<Self, SshError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshClient<R> {
    /// Creates a new client using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, SshError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Executes `command` on `target` and returns its output.
    ///
    /// A non-zero remote exit status is reported through
    /// [`SshOutput::exit_code`], not as an error.
    ///
    /// # Errors
    ///
    /// Propagates any failure to spawn the SSH client.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell. Quote untrusted
    /// arguments before calling.
    pub fn run(&self, target: SshTarget, command: &str) -> Result<SshOutput, SshError> {
        let mut args = self.common_options(target.port, "-p");
        args.push(OsString::from(format!("{}@{}", self.config.user, target.ip)));
        args.push(OsString::from(command));
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        Ok(SshOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Copies `local` into the login directory on `target`, preserving the
    /// file mode.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::CommandFailure`] when `scp` exits non-zero, or a
    /// spawn error from the runner.
    pub fn copy_to(&self, target: SshTarget, local: &Utf8Path) -> Result<(), SshError> {
        let mut args = self.common_options(target.port, "-P");
        args.push(OsString::from("-p"));
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(format!(
            "{}@{}:",
            self.config.user,
            scp_host(target.ip)
        )));
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(SshError::CommandFailure {
            program: self.config.scp_bin.clone(),
            status: output.code,
            status_text,
            stderr: output.stderr,
        })
    }

    fn common_options(&self, port: u16, port_flag: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from(port_flag), OsString::from(port.to_string())];

        if let Some(ref identity_file) = self.config.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.uses_batch_mode() {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.config.connect_timeout_secs
        )));

        args
    }
}

fn scp_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

/// Expands a leading `~/` using `HOME`. Other paths are returned unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}/{rest}"),
        _ => path.to_owned(),
    }
}

#[cfg(test)]
mod tests;
