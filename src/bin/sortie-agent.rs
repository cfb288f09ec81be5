//! In-guest helper that runs native test functions.
//!
//! The harness copies this binary onto test machines and invokes
//! `./sortie-agent run <test> <func>` over SSH. The function's report is
//! written to stdout; failures go to stderr with a non-zero exit status.

use std::io::Write as _;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use sortie::agent::{self, GuestRoot};

#[derive(Debug, Parser)]
#[command(
    name = "sortie-agent",
    about = "Run sortie native test functions inside a test machine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one native function of a test.
    Run {
        /// Test declaring the function.
        test: String,
        /// Function name.
        func: String,
        /// Filesystem root inspected by the function.
        #[arg(long, default_value = "/")]
        root: Utf8PathBuf,
    },
}

fn main() -> ExitCode {
    let Command::Run { test, func, root } = Cli::parse().command;
    match agent::run(&test, &func, &GuestRoot::new(root)) {
        Ok(report) => {
            writeln!(std::io::stdout(), "{report}").ok();
            ExitCode::SUCCESS
        }
        Err(err) => {
            writeln!(std::io::stderr(), "{test}/{func}: {err}").ok();
            ExitCode::FAILURE
        }
    }
}
