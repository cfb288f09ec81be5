//! Unit tests for the in-guest native functions.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

struct Guest {
    _dir: TempDir,
    root: GuestRoot,
}

impl Guest {
    fn write(&self, relative: &str, contents: &str) {
        let path = self.root.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir");
        }
        std::fs::write(path, contents).expect("guest file");
    }
}

#[fixture]
fn guest() -> Guest {
    let dir = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    let guest = Guest {
        _dir: dir,
        root: GuestRoot::new(path),
    };
    guest.write("proc/1/comm", "systemd\n");
    guest.write("etc/os-release", "NAME=\"Flatcar\"\nID=flatcar\n");
    guest.write("etc/machine-id", "0123456789abcdef\n");
    guest
}

#[rstest]
fn smoke_reports_healthy_guest(guest: Guest) {
    let report = run("cl.native.smoke", "Smoke", &guest.root).expect("smoke");

    assert_eq!(report, "init=systemd os=flatcar machine-id=set");
}

#[rstest]
#[case::foreign_init("proc/1/comm", "init\n", "PID 1 is 'init', expected systemd")]
#[case::no_os_id("etc/os-release", "NAME=Linux\n", "os-release has no ID")]
#[case::blank_machine_id("etc/machine-id", "\n", "machine-id is empty")]
fn smoke_rejects_unhealthy_guest(
    guest: Guest,
    #[case] file: &str,
    #[case] contents: &str,
    #[case] message: &str,
) {
    guest.write(file, contents);

    let err = run("cl.native.smoke", "Smoke", &guest.root).expect_err("unhealthy");

    assert_eq!(err, AgentError::Check(message.to_owned()));
}

#[rstest]
fn missing_guest_file_names_the_path(guest: Guest) {
    std::fs::remove_file(guest.root.path().join("etc/machine-id")).expect("remove");

    let err = run("cl.native.smoke", "Smoke", &guest.root).expect_err("missing");

    assert!(matches!(err, AgentError::Read { ref path, .. } if path == "etc/machine-id"));
}

#[rstest]
#[case("cl.native.smoke", "Other")]
#[case("cl.basic.ssh", "Smoke")]
fn unknown_functions_are_rejected(#[case] test: &str, #[case] func: &str) {
    let err = lookup(test, func).expect_err("unknown");

    assert_eq!(
        err,
        AgentError::UnknownFunction {
            test: test.to_owned(),
            func: func.to_owned(),
        }
    );
}

#[test]
fn every_declared_native_function_is_registered() {
    let registry = crate::suite::registry().expect("suite");

    for test in registry.iter() {
        for func in &test.native_funcs {
            assert!(
                lookup(&test.name, func).is_ok(),
                "{} declares unregistered native function {func}",
                test.name
            );
        }
    }
}
