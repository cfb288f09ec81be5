//! Binary entry point for the `sortie` CLI.

use std::env;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::Local;
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sortie::config::{ConfigError, HarnessConfig, ScalewayConfig};
use sortie::filter::{FilterCriteria, FilterError, is_allowed, matching_names};
use sortie::harness::{Harness, HarnessError, HarnessOptions, native};
use sortie::output::{OutputError, prepare_run_dir};
use sortie::platform::{Flight, FlightOptions, Platform, PlatformError, new_flight};
use sortie::registry::{RegistryError, zero_version};
use sortie::report::{JsonReporter, ReportError, Reporter, TapReporter, TestStatus};
use sortie::ssh::{SshConfig, expand_tilde};
use sortie::suite;
use sortie::test_support::{FakeBehaviour, FakeFlight};

mod cli;

use cli::{Cli, ListCommand, RunCommand};

/// Selects the in-memory platform instead of a real backend. `failing`
/// makes every `true` probe fail; any other value keeps machines healthy.
const FAKE_PLATFORM_ENV: &str = "SORTIE_FAKE_PLATFORM";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Harness(#[from] HarnessError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("failed to read {path}: {message}")]
    Read { path: Utf8PathBuf, message: String },
    #[error("failed to write output: {0}")]
    Write(String),
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
        Cli::List(command) => list_command(&command, io::stdout()).map(|()| 0),
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let config = apply_overrides(HarnessConfig::load_without_cli_args()?, &args);
    config.validate()?;
    let platform: Platform = args.platform.parse()?;
    let registry = suite::registry()?;

    let started = Local::now();
    let run_id = format!(
        "{}-{}",
        started.format("%Y%m%d%H%M%S"),
        Uuid::new_v4().simple().to_string().chars().take(8).collect::<String>()
    );
    let flight = build_flight(platform, &config, &args, run_id)?;

    let criteria = FilterCriteria {
        patterns: args.patterns.clone(),
        platform: platform.as_str().to_owned(),
        board: config.board.clone(),
        distribution: config.distribution.clone(),
        channel: config.channel.clone(),
        offering: config.offering.clone(),
        version: zero_version(),
    };
    let options = HarnessOptions {
        parallel: config.parallel,
        remove: config.removes_machines(),
        log_flush_delay: config.log_flush_delay(),
        helper_dirs: native::default_search_dirs(&criteria.architecture()),
    };
    let run_dir = prepare_run_dir(
        Utf8Path::new(&config.output_dir),
        platform.as_str(),
        &started,
        process::id(),
    )?;

    let report = Harness::new(flight, run_dir.path.clone(), options)
        .run_suite(&registry, criteria)
        .await?;

    let json = JsonReporter.write(&report, &run_dir.path)?;
    TapReporter::new(args.tap_file.map(Utf8PathBuf::from)).write(&report, &run_dir.path)?;
    info!(
        result = %report.result,
        passed = report.count(TestStatus::Pass),
        failed = report.count(TestStatus::Fail),
        skipped = report.count(TestStatus::Skip),
        report = %json,
        "run complete"
    );
    Ok(report.exit_code())
}

fn apply_overrides(config: HarnessConfig, args: &RunCommand) -> HarnessConfig {
    HarnessConfig {
        parallel: args.parallel.unwrap_or(config.parallel),
        output_dir: args.output_dir.clone().unwrap_or(config.output_dir),
        remove: args.remove.or(config.remove),
        distribution: args.distribution.clone().unwrap_or(config.distribution),
        channel: args.channel.clone().unwrap_or(config.channel),
        offering: args.offering.clone().unwrap_or(config.offering),
        board: args.board.clone().or(config.board),
        ..config
    }
}

fn build_flight(
    platform: Platform,
    config: &HarnessConfig,
    args: &RunCommand,
    run_id: String,
) -> Result<Arc<dyn Flight>, CliError> {
    if let Ok(mode) = env::var(FAKE_PLATFORM_ENV) {
        info!(platform = %platform, mode = %mode, "using in-memory platform");
        return Ok(Arc::new(FakeFlight::new(platform, fake_behaviour(&mode))));
    }

    let base_ssh =
        SshConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let ssh = SshConfig {
        identity_file: args.ssh_identity_file.clone().or(base_ssh.identity_file),
        ..base_ssh
    };
    let key_path = public_key_path(args.ssh_public_key.as_deref(), ssh.identity_file.as_deref());
    let authorized_key = key_path.as_deref().map(read_text).transpose()?;
    let scaleway = if platform == Platform::Scaleway {
        Some(ScalewayConfig::load_without_cli_args()?)
    } else {
        None
    };

    let flight = new_flight(
        platform,
        FlightOptions {
            run_id,
            ssh,
            authorized_key,
            discovery_endpoint: config.discovery_endpoint.clone(),
            scaleway,
        },
    )?;
    Ok(flight)
}

fn fake_behaviour(mode: &str) -> FakeBehaviour {
    if mode == "failing" {
        FakeBehaviour {
            failing_commands: [String::from("true")].into_iter().collect(),
            ..FakeBehaviour::default()
        }
    } else {
        FakeBehaviour::default()
    }
}

/// Public key to authorise: the explicit path, else `<identity>.pub` when it
/// exists.
fn public_key_path(explicit: Option<&str>, identity: Option<&str>) -> Option<Utf8PathBuf> {
    explicit.map(Utf8PathBuf::from).or_else(|| {
        identity
            .map(|path| Utf8PathBuf::from(format!("{}.pub", expand_tilde(path))))
            .filter(|candidate| candidate.is_file())
    })
}

fn read_text(path: &Utf8Path) -> Result<String, CliError> {
    let read_error = |message: String| CliError::Read {
        path: path.to_path_buf(),
        message,
    };
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| read_error(String::from("not a file")))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| read_error(err.to_string()))?;
    dir.read_to_string(file_name)
        .map(|text| text.trim().to_owned())
        .map_err(|err| read_error(err.to_string()))
}

fn list_command(args: &ListCommand, mut out: impl Write) -> Result<(), CliError> {
    let registry = suite::registry()?;
    let platform = args
        .platform
        .as_deref()
        .map(str::parse::<Platform>)
        .transpose()?;
    let matched = matching_names(registry.iter(), &args.patterns)?;

    let write_err = |err: io::Error| CliError::Write(err.to_string());
    writeln!(out, "{:<28} {:<24} EXCLUDED", "NAME", "PLATFORMS").map_err(write_err)?;
    for test in matched.iter().filter(|test| {
        platform.is_none_or(|name| {
            is_allowed(name.as_str(), &test.platforms, &test.exclude_platforms).passes()
        })
    }) {
        writeln!(
            out,
            "{:<28} {:<24} {}",
            test.name,
            join_or(&test.platforms, "all"),
            join_or(&test.exclude_platforms, "-")
        )
        .map_err(write_err)?;
    }
    Ok(())
}

fn join_or(values: &[String], empty: &str) -> String {
    if values.is_empty() {
        empty.to_owned()
    } else {
        values.join(",")
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
