//! Location and invocation of the in-guest helper binary.

use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;

/// File name of the helper copied onto machines for native functions.
pub const HELPER_BINARY: &str = "sortie-agent";

/// System-wide install root, searched last.
pub const SYSTEM_HELPER_ROOT: &str = "/usr/lib/sortie";

/// Directories searched for the helper, in order: the working directory, the
/// directory of the running executable, its `<arch>` subdirectory, and
/// `/usr/lib/sortie/<arch>`.
#[must_use]
pub fn default_search_dirs(arch: &str) -> Vec<Utf8PathBuf> {
    let cwd = env::current_dir()
        .ok()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok());
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| Utf8PathBuf::from_path_buf(exe).ok())
        .and_then(|exe| exe.parent().map(Utf8Path::to_path_buf));
    search_dirs(cwd.as_deref(), exe_dir.as_deref(), arch)
}

/// Builds the search order from explicit starting points.
#[must_use]
pub fn search_dirs(
    cwd: Option<&Utf8Path>,
    exe_dir: Option<&Utf8Path>,
    arch: &str,
) -> Vec<Utf8PathBuf> {
    let mut dirs = Vec::with_capacity(4);
    dirs.extend(cwd.map(Utf8Path::to_path_buf));
    if let Some(dir) = exe_dir {
        dirs.push(dir.to_path_buf());
        dirs.push(dir.join(arch));
    }
    dirs.push(Utf8Path::new(SYSTEM_HELPER_ROOT).join(arch));
    dirs
}

/// Returns the first existing helper binary in `dirs`.
#[must_use]
pub fn locate_helper(dirs: &[Utf8PathBuf]) -> Option<Utf8PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(HELPER_BINARY))
        .find(|candidate| candidate.is_file())
}

/// Remote command running native function `func` of `test`.
#[must_use]
pub fn native_command(test: &str, func: &str) -> String {
    format!(
        "./{HELPER_BINARY} run {} {}",
        escape(test.into()),
        escape(func.into())
    )
}
