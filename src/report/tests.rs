//! Unit tests for run reports and reporters.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

fn result(name: &str, status: TestStatus, output: &str) -> TestResult {
    TestResult {
        name: name.to_owned(),
        result: status,
        duration: Duration::from_millis(1500),
        output: output.to_owned(),
    }
}

#[fixture]
fn mixed_report() -> RunReport {
    RunReport::new(
        vec![
            result("cl.a", TestStatus::Pass, ""),
            result("cl.b", TestStatus::Fail, "boom\nkernel panic (oops)"),
            result("cl.c", TestStatus::Skip, "discovery service unavailable"),
        ],
        "scaleway",
        "4081.2.0",
    )
}

fn utf8_dir(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp path")
}

#[rstest]
#[case(&[TestStatus::Pass, TestStatus::Skip], TestStatus::Pass, 0)]
#[case(&[TestStatus::Skip], TestStatus::Pass, 0)]
#[case(&[], TestStatus::Pass, 0)]
#[case(&[TestStatus::Pass, TestStatus::Fail], TestStatus::Fail, 1)]
fn aggregate_result_fails_only_on_failures(
    #[case] statuses: &[TestStatus],
    #[case] expected: TestStatus,
    #[case] exit_code: i32,
) {
    let tests = statuses
        .iter()
        .enumerate()
        .map(|(n, status)| result(&format!("t{n}"), *status, ""))
        .collect();

    let report = RunReport::new(tests, "qemu", "");

    assert_eq!(report.result, expected);
    assert_eq!(report.exit_code(), exit_code);
}

#[rstest]
fn json_shape_matches_report_format(mixed_report: RunReport) {
    let value = serde_json::to_value(&mixed_report).expect("serialise");

    assert_eq!(value["result"], "FAIL");
    assert_eq!(value["platform"], "scaleway");
    assert_eq!(value["version"], "4081.2.0");
    assert_eq!(value["tests"][0]["name"], "cl.a");
    assert_eq!(value["tests"][1]["result"], "FAIL");
    assert_eq!(value["tests"][2]["result"], "SKIP");
    assert_eq!(value["tests"][0]["duration"], 1_500_000_000_u64);
}

#[rstest]
fn json_reporter_writes_into_reports_dir(mixed_report: RunReport) {
    let tmp = TempDir::new().expect("temp dir");
    let run_dir = utf8_dir(&tmp);

    let path = JsonReporter
        .write(&mixed_report, &run_dir)
        .expect("report should be written");

    assert_eq!(path, run_dir.join("reports/report.json"));
    let contents = std::fs::read_to_string(&path).expect("read report");
    let parsed: RunReport = serde_json::from_str(&contents).expect("parse report");
    assert_eq!(parsed, mixed_report);
}

#[rstest]
fn tap_stream_lists_every_test(mixed_report: RunReport) {
    let tap = render_tap(&mixed_report);

    assert!(tap.starts_with("TAP version 13\n1..3\n"), "tap: {tap}");
    assert!(tap.contains("ok 1 - cl.a\n"));
    assert!(tap.contains("not ok 2 - cl.b\n"));
    assert!(tap.contains("    kernel panic (oops)\n"));
    assert!(tap.contains("ok 3 - cl.c # SKIP discovery service unavailable\n"));
}

#[rstest]
fn tap_reporter_copies_to_requested_path(mixed_report: RunReport) {
    let tmp = TempDir::new().expect("temp dir");
    let run_dir = utf8_dir(&tmp);
    let copy = run_dir.join("elsewhere/run.tap");

    let written = TapReporter::new(Some(copy.clone()))
        .write(&mixed_report, &run_dir)
        .expect("tap should be written");

    let primary = std::fs::read_to_string(&written).expect("read primary");
    let copied = std::fs::read_to_string(&copy).expect("read copy");
    assert_eq!(written, run_dir.join("reports/report.tap"));
    assert_eq!(primary, copied);
}
