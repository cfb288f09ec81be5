//! On-disk layout of a run's artefacts.
//!
//! Each run writes into `<base>/<platform>-<YYYYmmdd-HHMMSS>-<pid>/` and
//! repoints `<base>/<platform>-latest` at it. The link is swapped by renaming
//! a freshly created temporary link over it, so readers never observe a
//! missing or half-written link.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, TimeZone};
use thiserror::Error;

/// Errors raised while preparing output directories.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Raised when a directory, file, or link cannot be created.
    #[error("failed to prepare {path}: {message}")]
    Io {
        /// Path being prepared.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

impl OutputError {
    fn io(path: &Utf8Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// The directory prepared for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunDirectory {
    /// Absolute or base-relative path of the run directory.
    pub path: Utf8PathBuf,
    /// Path of the `<platform>-latest` link.
    pub latest: Utf8PathBuf,
}

impl RunDirectory {
    /// Directory holding the artefacts of `test`.
    #[must_use]
    pub fn test_dir(&self, test: &str) -> Utf8PathBuf {
        self.path.join(test)
    }
}

/// Name of the run directory for `platform` started at `started` by process
/// `pid`.
#[must_use]
pub fn run_dir_name<Tz>(platform: &str, started: &DateTime<Tz>, pid: u32) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{platform}-{}-{pid}", started.format("%Y%m%d-%H%M%S"))
}

/// Creates the run directory below `base` and repoints the latest link.
///
/// # Errors
///
/// Returns [`OutputError::Io`] when the directory or link cannot be created.
pub fn prepare_run_dir<Tz>(
    base: &Utf8Path,
    platform: &str,
    started: &DateTime<Tz>,
    pid: u32,
) -> Result<RunDirectory, OutputError>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let name = run_dir_name(platform, started, pid);
    Dir::create_ambient_dir_all(base, ambient_authority())
        .map_err(|err| OutputError::io(base, &err))?;
    let dir = Dir::open_ambient_dir(base, ambient_authority())
        .map_err(|err| OutputError::io(base, &err))?;
    dir.create_dir_all(&name)
        .map_err(|err| OutputError::io(&base.join(&name), &err))?;

    let latest_name = format!("{platform}-latest");
    let temp_name = format!(".{latest_name}.{pid}.tmp");
    replace_link(&dir, &name, &temp_name, &latest_name)
        .map_err(|err| OutputError::io(&base.join(&latest_name), &err))?;

    Ok(RunDirectory {
        path: base.join(name),
        latest: base.join(latest_name),
    })
}

fn replace_link(dir: &Dir, target: &str, temp_name: &str, link_name: &str) -> io::Result<()> {
    match dir.remove_file(temp_name) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    dir.symlink(target, temp_name)?;
    dir.rename(temp_name, dir, link_name)
}

/// Creates `path` and any missing parents.
///
/// # Errors
///
/// Returns [`OutputError::Io`] when creation fails.
pub fn ensure_dir(path: &Utf8Path) -> Result<(), OutputError> {
    Dir::create_ambient_dir_all(path, ambient_authority())
        .map_err(|err| OutputError::io(path, &err))
}

/// Writes `contents` to `dir/file_name`, creating `dir` when needed.
///
/// # Errors
///
/// Returns [`OutputError::Io`] when the directory or file cannot be written.
pub fn write_artifact(dir: &Utf8Path, file_name: &str, contents: &str) -> Result<(), OutputError> {
    ensure_dir(dir)?;
    let handle =
        Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| OutputError::io(dir, &err))?;
    handle
        .write(file_name, contents)
        .map_err(|err| OutputError::io(&dir.join(file_name), &err))
}

#[cfg(test)]
mod tests;
