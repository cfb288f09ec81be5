//! Garbage collector for abandoned `sortie` test servers.
//!
//! Deletes every Scaleway server tagged `sortie` (or `sortie-run-<id>` when
//! `--run-id` is given) that is older than the grace period, then verifies
//! the deleted servers are gone.

use clap::Parser;
use sortie::gc::{DEFAULT_GRACE_PERIOD_HOURS, DEFAULT_SCW_BIN, Gc, GcConfig};
use std::io::Write as _;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sortie-gc",
    about = "Delete abandoned Scaleway servers left behind by sortie runs"
)]
struct Cli {
    /// Scaleway project id used to scope discovery.
    #[arg(long, env = "SCW_DEFAULT_PROJECT_ID")]
    project_id: String,
    /// Minimum server age, in hours, before deletion.
    #[arg(long, default_value_t = DEFAULT_GRACE_PERIOD_HOURS)]
    grace_period_hours: i64,
    /// Only collect servers of this run.
    #[arg(long)]
    run_id: Option<String>,
    /// Path to the Scaleway CLI binary.
    #[arg(long, default_value = DEFAULT_SCW_BIN)]
    scw_bin: String,
}

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = GcConfig::new(cli.project_id, cli.grace_period_hours, cli.scw_bin)
        .map_err(|err| err.to_string())?
        .for_run(cli.run_id);
    let summary = Gc::with_process_runner(config)
        .sweep()
        .map_err(|err| err.to_string())?;
    writeln!(
        std::io::stdout(),
        "gc complete: deleted={}, retained={}",
        summary.deleted.len(),
        summary.retained
    )
    .map_err(|err| err.to_string())?;
    Ok(())
}
