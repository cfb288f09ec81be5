//! Test Anything Protocol rendering.

use std::fmt::Write as _;

use super::{RunReport, TestStatus};

/// Renders `report` as a TAP version 13 stream.
///
/// Skipped tests are emitted as `ok` with a `# SKIP` directive, and the
/// output of failed tests is attached as a YAML diagnostic block.
#[must_use]
pub fn render_tap(report: &RunReport) -> String {
    let mut out = String::from("TAP version 13\n");
    writeln!(out, "1..{}", report.tests.len()).ok();
    for (index, test) in report.tests.iter().enumerate() {
        let number = index + 1;
        match test.result {
            TestStatus::Pass => {
                writeln!(out, "ok {number} - {}", test.name).ok();
            }
            TestStatus::Skip => {
                let reason = test.output.lines().next().unwrap_or_default();
                writeln!(out, "ok {number} - {} # SKIP {reason}", test.name).ok();
            }
            TestStatus::Fail => {
                writeln!(out, "not ok {number} - {}", test.name).ok();
                if !test.output.trim().is_empty() {
                    out.push_str("  ---\n  output: |\n");
                    for line in test.output.lines() {
                        writeln!(out, "    {line}").ok();
                    }
                    out.push_str("  ...\n");
                }
            }
        }
    }
    out
}
