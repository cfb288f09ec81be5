//! Detection of known-bad boot and runtime conditions in console and journal
//! text.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::registry::{TestDescriptor, TestFlag};

/// A single classifier rule.
#[derive(Debug)]
pub struct ConsoleCheck {
    /// Finding reported when the rule fires.
    pub desc: &'static str,
    /// Primary pattern.
    pub pattern: Regex,
    /// Pattern whose presence anywhere in the text cancels the finding.
    pub suppression: Option<Regex>,
    /// Flag that disables the rule for a test.
    pub skip_flag: Option<TestFlag>,
}

/// A classifier rule whose pattern does not compile.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("console rule '{rule}' does not compile: {message}")]
pub struct RuleError {
    /// Description of the broken rule.
    pub rule: &'static str,
    /// Message from the regex compiler.
    pub message: String,
}

struct RuleSource {
    desc: &'static str,
    pattern: &'static str,
    suppression: Option<&'static str>,
    skip_flag: Option<TestFlag>,
}

impl RuleSource {
    const fn new(desc: &'static str, pattern: &'static str) -> Self {
        Self {
            desc,
            pattern,
            suppression: None,
            skip_flag: None,
        }
    }

    const fn suppressed_by(mut self, pattern: &'static str) -> Self {
        self.suppression = Some(pattern);
        self
    }

    const fn gated_by(mut self, flag: TestFlag) -> Self {
        self.skip_flag = Some(flag);
        self
    }

    fn compile(&self) -> Result<ConsoleCheck, RuleError> {
        let broken = |err: regex::Error| RuleError {
            rule: self.desc,
            message: err.to_string(),
        };
        Ok(ConsoleCheck {
            desc: self.desc,
            pattern: Regex::new(self.pattern).map_err(broken)?,
            suppression: self
                .suppression
                .map(Regex::new)
                .transpose()
                .map_err(broken)?,
            skip_flag: self.skip_flag,
        })
    }
}

const RULES: &[RuleSource] = &[
    RuleSource::new(
        "emergency shell",
        r"You are in emergency mode|Give root password for maintenance|Press Enter for maintenance|Press Control-D to continue",
    )
    .gated_by(TestFlag::NoEmergencyShellCheck),
    RuleSource::new("dracut fatal", r"dracut: FATAL:"),
    RuleSource::new("kernel panic", r"Kernel panic - not syncing: (.*)")
        .gated_by(TestFlag::NoKernelPanicCheck),
    RuleSource::new("kernel oops", r"Oops:"),
    RuleSource::new("kernel warning", r"WARNING: CPU: \d+ PID: \d+ at (.+)"),
    RuleSource::new("kernel BUG", r"kernel BUG at (.+)"),
    RuleSource::new(
        "disk I/O failure",
        r"(?:Buffer I/O error on dev|I/O error, dev) ([^\s,]+)",
    ),
    RuleSource::new(
        "systemd ordering cycle",
        r"Ordering cycle found, skipping (\S+)",
    ),
    RuleSource::new("OOM killer", r"invoked oom-killer"),
    RuleSource::new(
        "excessive bonding link status messages",
        r"(?s)(?:link status up for interface [^,]+, enabling it in \d+ ms.*?){3}",
    )
    .suppressed_by(r"Gained carrier|link becomes ready"),
    RuleSource::new("Go panic", r"panic: (.*)"),
    RuleSource::new("segmentation fault", r"segfault at"),
    RuleSource::new("core dump", r"[Cc]ore dump(?:ed)?"),
];

static CHECKS: LazyLock<Result<Vec<ConsoleCheck>, RuleError>> =
    LazyLock::new(|| compile_rules(RULES));

fn compile_rules(rules: &[RuleSource]) -> Result<Vec<ConsoleCheck>, RuleError> {
    rules.iter().map(RuleSource::compile).collect()
}

/// Compiled classifier rules in evaluation order.
///
/// # Errors
///
/// Returns the first [`RuleError`] when any rule fails to compile.
pub fn checks() -> Result<&'static [ConsoleCheck], RuleError> {
    CHECKS.as_ref().map(Vec::as_slice).map_err(Clone::clone)
}

/// Classifies `output` for `test`, returning one description per rule that
/// fired.
///
/// A rule is skipped when the test declares its gating flag, and a match is
/// discarded when the rule's suppression pattern also matches. When the
/// primary pattern captures text, the first capture is appended in
/// parentheses. A rule table that fails to compile is itself reported as a
/// finding.
#[must_use]
pub fn check_console(output: &str, test: &TestDescriptor) -> Vec<String> {
    findings(checks(), output, test)
}

fn findings(
    table: Result<&[ConsoleCheck], RuleError>,
    output: &str,
    test: &TestDescriptor,
) -> Vec<String> {
    table.map_or_else(
        |err| vec![err.to_string()],
        |checks| {
            checks
                .iter()
                .filter(|check| check.skip_flag.is_none_or(|flag| !test.has_flag(flag)))
                .filter_map(|check| classify(check, output))
                .collect()
        },
    )
}

fn classify(check: &ConsoleCheck, output: &str) -> Option<String> {
    let captures = check.pattern.captures(output)?;
    if check
        .suppression
        .as_ref()
        .is_some_and(|suppression| suppression.is_match(output))
    {
        return None;
    }
    Some(match captures.get(1) {
        Some(detail) => format!("{} ({})", check.desc, detail.as_str().trim()),
        None => check.desc.to_owned(),
    })
}
