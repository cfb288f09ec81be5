//! Unit tests for the `sortie` CLI binary implementation.

use super::*;
use rstest::rstest;

fn run_args(argv: &[&str]) -> RunCommand {
    let Cli::Run(command) = Cli::parse_from(argv) else {
        panic!("expected run subcommand");
    };
    command
}

fn listing(args: &[&str]) -> Result<String, CliError> {
    let Cli::List(command) = Cli::parse_from(args) else {
        panic!("expected list subcommand");
    };
    let mut buffer = Vec::new();
    list_command(&command, &mut buffer)?;
    Ok(String::from_utf8(buffer).expect("utf8"))
}

fn harness_defaults() -> HarnessConfig {
    HarnessConfig {
        parallel: 1,
        output_dir: String::from("_sortie_temp"),
        remove: None,
        distribution: String::from("cl"),
        channel: String::from("stable"),
        offering: String::from("basic"),
        board: None,
        log_flush_delay_secs: 10,
        discovery_endpoint: String::from("https://discovery.etcd.io/new"),
    }
}

#[test]
fn run_defaults_select_everything_on_scaleway() {
    let command = run_args(&["sortie", "run"]);

    assert_eq!(command.patterns, vec![String::from("*")]);
    assert_eq!(command.platform, cli::DEFAULT_PLATFORM);
    assert_eq!(command.remove, None);
}

#[rstest]
#[case(&["sortie", "run", "--remove"], Some(true))]
#[case(&["sortie", "run", "--remove=false"], Some(false))]
#[case(&["sortie", "run", "--remove=true"], Some(true))]
fn remove_flag_accepts_optional_value(#[case] argv: &[&str], #[case] expected: Option<bool>) {
    assert_eq!(run_args(argv).remove, expected);
}

#[test]
fn cli_flags_override_configuration() {
    let command = run_args(&[
        "sortie",
        "run",
        "--parallel",
        "4",
        "--channel",
        "beta",
        "--board",
        "arm64-usr",
        "--remove=false",
        "--output-dir",
        "/tmp/out",
    ]);

    let merged = apply_overrides(harness_defaults(), &command);

    assert_eq!(merged.parallel, 4);
    assert_eq!(merged.channel, "beta");
    assert_eq!(merged.board.as_deref(), Some("arm64-usr"));
    assert!(!merged.removes_machines());
    assert_eq!(merged.output_dir, "/tmp/out");
    assert_eq!(merged.offering, "basic");
    assert_eq!(merged.log_flush_delay_secs, 10);
}

#[test]
fn explicit_public_key_wins() {
    let path = public_key_path(Some("/keys/ci.pub"), Some("/keys/id_ed25519"));

    assert_eq!(path, Some(Utf8PathBuf::from("/keys/ci.pub")));
}

#[test]
fn public_key_is_derived_from_identity_when_present() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
    let identity = root.join("id_ed25519");
    std::fs::write(root.join("id_ed25519.pub"), "ssh-ed25519 AAAA ci\n").expect("key");

    let path = public_key_path(None, Some(identity.as_str())).expect("derived key");

    assert_eq!(read_text(&path).expect("read"), "ssh-ed25519 AAAA ci");
    assert_eq!(public_key_path(None, Some("/missing/id_rsa")), None);
}

#[test]
fn reading_missing_key_names_the_path() {
    let err = read_text(Utf8Path::new("/nonexistent/key.pub")).expect_err("missing");

    assert!(err.to_string().starts_with("failed to read /nonexistent/key.pub"));
}

#[test]
fn list_prints_platform_constraints() {
    let output = listing(&["sortie", "list", "cl.basic.*"]).expect("list");

    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines.first().is_some_and(|line| line.starts_with("NAME")));
    assert!(
        lines
            .iter()
            .any(|line| line.starts_with("cl.basic.reboot") && line.ends_with("esx"))
    );
}

#[test]
fn list_honours_platform_exclusions() {
    let output = listing(&["sortie", "list", "--platform", "esx"]).expect("list");

    assert!(!output.contains("cl.basic.reboot"));
    assert!(output.contains("cl.basic.ssh"));
}

#[test]
fn list_rejects_unknown_platform() {
    let err = listing(&["sortie", "list", "--platform", "vax"]).expect_err("unknown");

    assert!(matches!(err, CliError::Platform(PlatformError::UnknownPlatform(_))));
}

#[test]
fn fake_behaviour_modes() {
    assert!(fake_behaviour("healthy").failing_commands.is_empty());
    assert!(fake_behaviour("failing").failing_commands.contains("true"));
}

#[test]
fn write_error_writes_cli_error() {
    let mut buf = Vec::new();
    let err = CliError::Config(String::from("missing secret"));
    write_error(&mut buf, &err);
    let rendered = String::from_utf8(buf).expect("utf8");
    assert_eq!(rendered, "configuration error: missing secret\n");
}
