//! Native functions executed inside test machines by `sortie-agent`.
//!
//! Some checks are easier to express as Rust running in the guest than as
//! shell over SSH. The harness copies the agent onto every machine of a test
//! that declares native functions and invokes `sortie-agent run <test>
//! <func>`; the agent looks the pair up in [`FUNCTIONS`] and prints the
//! function's report on success.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Signature of a native function.
pub type NativeFn = fn(&GuestRoot) -> Result<String, AgentError>;

/// A native function registered for one test.
#[derive(Clone, Copy, Debug)]
pub struct NativeFunction {
    /// Test that declares the function.
    pub test: &'static str,
    /// Function name as declared by the test.
    pub name: &'static str,
    /// Implementation.
    pub run: NativeFn,
}

/// Every native function the agent can run.
pub const FUNCTIONS: &[NativeFunction] = &[NativeFunction {
    test: "cl.native.smoke",
    name: "Smoke",
    run: smoke,
}];

/// Errors raised by the agent.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AgentError {
    /// No function is registered under the requested name.
    #[error("test {test} has no native function '{func}'")]
    UnknownFunction {
        /// Requested test.
        test: String,
        /// Requested function.
        func: String,
    },
    /// A guest file could not be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// Path relative to the guest root.
        path: String,
        /// Underlying I/O error.
        message: String,
    },
    /// A check inside the function failed.
    #[error("{0}")]
    Check(String),
}

/// Filesystem root the functions inspect; `/` inside a guest.
#[derive(Debug)]
pub struct GuestRoot {
    path: Utf8PathBuf,
}

impl GuestRoot {
    /// Wraps `path` as the guest root.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads `relative` below the root.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Read`] when the file cannot be opened or read.
    pub fn read(&self, relative: &str) -> Result<String, AgentError> {
        let to_error = |err: std::io::Error| AgentError::Read {
            path: relative.to_owned(),
            message: err.to_string(),
        };
        Dir::open_ambient_dir(&self.path, ambient_authority())
            .map_err(to_error)?
            .read_to_string(relative)
            .map_err(to_error)
    }
}

/// Finds the function `func` declared by `test`.
///
/// # Errors
///
/// Returns [`AgentError::UnknownFunction`] when nothing is registered.
pub fn lookup(test: &str, func: &str) -> Result<&'static NativeFunction, AgentError> {
    FUNCTIONS
        .iter()
        .find(|native| native.test == test && native.name == func)
        .ok_or_else(|| AgentError::UnknownFunction {
            test: test.to_owned(),
            func: func.to_owned(),
        })
}

/// Runs `func` of `test` against `root`.
///
/// # Errors
///
/// Returns the lookup failure or the function's own error.
pub fn run(test: &str, func: &str, root: &GuestRoot) -> Result<String, AgentError> {
    (lookup(test, func)?.run)(root)
}

/// Checks that systemd is PID 1, the OS identifies itself, and the machine
/// id was initialised.
fn smoke(root: &GuestRoot) -> Result<String, AgentError> {
    let init = root.read("proc/1/comm")?;
    if init.trim() != "systemd" {
        return Err(AgentError::Check(format!(
            "PID 1 is '{}', expected systemd",
            init.trim()
        )));
    }

    let os_release = root.read("etc/os-release")?;
    let os_id = os_release
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|value| value.trim_matches('"').to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AgentError::Check(String::from("os-release has no ID")))?;

    if root.read("etc/machine-id")?.trim().is_empty() {
        return Err(AgentError::Check(String::from("machine-id is empty")));
    }

    Ok(format!("init=systemd os={os_id} machine-id=set"))
}

#[cfg(test)]
mod tests;
