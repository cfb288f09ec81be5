//! Unit tests for the run-directory layout.

use camino::Utf8PathBuf;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use super::*;

fn base(tmp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp path")
}

#[test]
fn run_dir_name_encodes_platform_time_and_pid() {
    let started = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().expect("valid time");

    assert_eq!(run_dir_name("qemu", &started, 4242), "qemu-20240309-070501-4242");
}

#[test]
fn prepare_creates_run_dir_and_latest_link() {
    let tmp = TempDir::new().expect("temp dir");
    let started = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().expect("valid time");

    let run = prepare_run_dir(&base(&tmp), "scaleway", &started, 7).expect("prepare");

    assert!(run.path.is_dir());
    let target = std::fs::read_link(&run.latest).expect("latest is a link");
    assert_eq!(target, std::path::Path::new("scaleway-20240309-070501-7"));
    assert_eq!(run.test_dir("cl.basic"), run.path.join("cl.basic"));
}

#[test]
fn latest_link_moves_to_the_newest_run() {
    let tmp = TempDir::new().expect("temp dir");
    let first = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).single().expect("valid time");
    let second = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).single().expect("valid time");

    prepare_run_dir(&base(&tmp), "qemu", &first, 1).expect("first run");
    let run = prepare_run_dir(&base(&tmp), "qemu", &second, 2).expect("second run");

    let target = std::fs::read_link(&run.latest).expect("latest is a link");
    assert_eq!(target, std::path::Path::new("qemu-20240309-080000-2"));
    assert!(!base(&tmp).join(".qemu-latest.2.tmp").exists());
}

#[test]
fn write_artifact_creates_missing_directories() {
    let tmp = TempDir::new().expect("temp dir");
    let dir = base(&tmp).join("run/cl.basic");

    write_artifact(&dir, "console-m1.txt", "hello").expect("write");

    let contents = std::fs::read_to_string(dir.join("console-m1.txt")).expect("read");
    assert_eq!(contents, "hello");
}
