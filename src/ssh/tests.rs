//! Unit tests for SSH argument construction.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use camino::Utf8Path;
use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{CommandInvocation, ScriptedRunner, ssh_config};

#[fixture]
fn target() -> SshTarget {
    SshTarget {
        ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        port: 2222,
    }
}

#[rstest]
fn run_builds_ssh_invocation(target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(0), "hello\n", "");
    let client = SshClient::new(ssh_config(), runner.clone()).expect("valid config");

    let output = client.run(target, "echo hello").expect("ssh should run");

    assert!(output.is_success());
    assert_eq!(output.stdout, "hello\n");
    let invocations = runner.invocations();
    let [call] = invocations.as_slice() else {
        panic!("expected exactly one invocation, got {invocations:?}");
    };
    assert_eq!(call.program, "ssh");
    let rendered = call.command_string();
    assert!(rendered.starts_with("ssh -p 2222"), "rendered: {rendered}");
    assert!(rendered.contains("BatchMode=yes"), "rendered: {rendered}");
    assert!(rendered.contains("StrictHostKeyChecking=no"), "rendered: {rendered}");
    assert!(rendered.contains("ConnectTimeout=10"), "rendered: {rendered}");
    assert!(
        rendered.ends_with("core@192.0.2.10 echo hello"),
        "rendered: {rendered}"
    );
}

#[rstest]
fn batch_mode_can_be_switched_off(target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let config = SshConfig {
        batch_mode: Some(false),
        ..ssh_config()
    };
    let client = SshClient::new(config, runner.clone()).expect("valid config");

    client.run(target, "true").expect("ssh should run");

    let rendered = runner
        .invocations()
        .first()
        .map(CommandInvocation::command_string)
        .expect("one invocation");
    assert!(!rendered.contains("BatchMode"), "rendered: {rendered}");
}

#[rstest]
fn run_reports_remote_exit_status_without_error(target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(3), "", "boom");
    let client = SshClient::new(ssh_config(), runner).expect("valid config");

    let output = client.run(target, "false").expect("ssh should run");

    assert_eq!(output.exit_code, Some(3));
    assert_eq!(output.stderr, "boom");
}

#[rstest]
fn copy_to_uses_scp_port_flag_and_home_directory(target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let client = SshClient::new(ssh_config(), runner.clone()).expect("valid config");

    client
        .copy_to(target, Utf8Path::new("/opt/bin/sortie-agent"))
        .expect("copy should succeed");

    let invocations = runner.invocations();
    let [call] = invocations.as_slice() else {
        panic!("expected exactly one invocation, got {invocations:?}");
    };
    let rendered = call.command_string();
    assert!(rendered.starts_with("scp -P 2222"), "rendered: {rendered}");
    assert!(
        rendered.ends_with("-p /opt/bin/sortie-agent core@192.0.2.10:"),
        "rendered: {rendered}"
    );
}

#[test]
fn copy_to_brackets_ipv6_hosts() {
    let runner = ScriptedRunner::new();
    runner.push_success();
    let client = SshClient::new(ssh_config(), runner.clone()).expect("valid config");
    let v6 = SshTarget {
        ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
        port: 22,
    };

    client
        .copy_to(v6, Utf8Path::new("agent"))
        .expect("copy should succeed");

    let rendered = runner
        .invocations()
        .first()
        .map(CommandInvocation::command_string)
        .unwrap_or_default();
    assert!(rendered.ends_with("core@[::1]:"), "rendered: {rendered}");
}

#[rstest]
fn copy_to_surfaces_scp_failures(target: SshTarget) {
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    let client = SshClient::new(ssh_config(), runner).expect("valid config");

    let err = client
        .copy_to(target, Utf8Path::new("agent"))
        .expect_err("scp failure should surface");

    assert!(
        matches!(err, SshError::CommandFailure { ref program, status: Some(1), .. } if program == "scp"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[case("ssh_bin")]
#[case("user")]
#[case("identity_file")]
fn validation_rejects_blank_fields(#[case] field: &str) {
    let mut config = ssh_config();
    match field {
        "ssh_bin" => config.ssh_bin = String::from(" "),
        "user" => config.user = String::new(),
        _ => config.identity_file = Some(String::from("  ")),
    }

    let err = config.validate().expect_err("blank field should fail");

    assert_eq!(
        err,
        SshError::InvalidConfig {
            field: field.to_owned()
        }
    );
    assert!(err.to_string().contains("sortie.toml"));
}

#[test]
fn expand_tilde_leaves_absolute_paths_alone() {
    assert_eq!(expand_tilde("/etc/ssh/key"), "/etc/ssh/key");
}
