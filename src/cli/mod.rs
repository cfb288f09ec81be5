//! Command-line interface definitions for the `sortie` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Platform used when neither `--platform` nor `SORTIE_PLATFORM` is given.
pub(crate) const DEFAULT_PLATFORM: &str = "scaleway";

/// Top-level CLI for the `sortie` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sortie",
    about = "Boot throwaway VMs, run OS acceptance tests on them, and tear them down",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the selected tests.
    #[command(name = "run", about = "Run registered tests on ephemeral machines")]
    Run(RunCommand),
    /// List the registered tests.
    #[command(name = "list", about = "List registered tests and their platform constraints")]
    List(ListCommand),
}

/// Arguments for the `sortie run` subcommand.
///
/// Options left unset fall back to `sortie.toml` and `SORTIE_*` environment
/// variables.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Glob patterns selecting tests by name (`*` matches everything).
    #[arg(value_name = "PATTERN", default_value = "*")]
    pub(crate) patterns: Vec<String>,
    /// Platform to provision machines on.
    #[arg(long, env = "SORTIE_PLATFORM", default_value = DEFAULT_PLATFORM)]
    pub(crate) platform: String,
    /// Release channel under test.
    #[arg(long)]
    pub(crate) channel: Option<String>,
    /// Product offering under test.
    #[arg(long)]
    pub(crate) offering: Option<String>,
    /// Distribution under test.
    #[arg(long)]
    pub(crate) distribution: Option<String>,
    /// Board name, used to derive the architecture on local platforms.
    #[arg(long)]
    pub(crate) board: Option<String>,
    /// Number of tests run concurrently.
    #[arg(long, value_name = "N")]
    pub(crate) parallel: Option<usize>,
    /// Base directory receiving run directories.
    #[arg(long, value_name = "DIR")]
    pub(crate) output_dir: Option<String>,
    /// Destroy machines once tests finish (`--remove=false` keeps them).
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub(crate) remove: Option<bool>,
    /// Private key used for SSH and SCP.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_identity_file: Option<String>,
    /// Public key authorised on every machine.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_public_key: Option<String>,
    /// Copy the TAP report to this path as well.
    #[arg(long, value_name = "PATH")]
    pub(crate) tap_file: Option<String>,
}

/// Arguments for the `sortie list` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ListCommand {
    /// Glob patterns selecting tests by name.
    #[arg(value_name = "PATTERN", default_value = "*")]
    pub(crate) patterns: Vec<String>,
    /// Only list tests allowed on this platform.
    #[arg(long)]
    pub(crate) platform: Option<String>,
}
