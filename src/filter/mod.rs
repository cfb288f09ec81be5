//! Selection of the registered tests that apply to a run.
//!
//! A test survives filtering when its name matches one of the requested glob
//! patterns, the probed OS version falls inside its version range, and every
//! applicability axis (platform and architecture, distribution, channel, and
//! offering) admits the run's values. Patterns use shell-glob syntax with
//! `[^...]` negation and backslash escapes.

use std::collections::BTreeMap;
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use semver::Version;
use thiserror::Error;

use crate::registry::{TestDescriptor, zero_version};

mod pattern;

/// Architecture assumed when no board is given.
pub const NATIVE_ARCH: &str = "amd64";

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Run parameters used to select tests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterCriteria {
    /// Glob patterns matched against test names.
    pub patterns: Vec<String>,
    /// Platform name, for example `aws` or `qemu-unpriv`.
    pub platform: String,
    /// Board used to derive the architecture on local and bare-metal
    /// platforms, for example `arm64-usr`.
    pub board: Option<String>,
    /// Distribution name.
    pub distribution: String,
    /// Release channel.
    pub channel: String,
    /// Product offering.
    pub offering: String,
    /// Probed OS version; `0.0.0` disables version-range filtering.
    pub version: Version,
}

impl FilterCriteria {
    /// Returns the criteria with `version` replaced.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Architecture the run targets.
    #[must_use]
    pub fn architecture(&self) -> String {
        architecture(&self.platform, self.board.as_deref())
    }

    /// Returns `true` when `name` was requested verbatim.
    #[must_use]
    pub fn names_exactly(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern == name)
    }
}

/// Errors raised while filtering.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FilterError {
    /// Raised when a pattern is not a valid glob.
    #[error("invalid test pattern '{pattern}': {message}")]
    Pattern {
        /// Offending pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },
}

/// Outcome of evaluating one axis.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Admission {
    /// The value is admitted by the include list.
    pub allowed: bool,
    /// The value appears in the exclude list.
    pub excluded: bool,
}

impl Admission {
    /// Returns `true` when the value is admitted and not excluded.
    #[must_use]
    pub const fn passes(self) -> bool {
        self.allowed && !self.excluded
    }
}

/// Evaluates `item` against an include list and an exclude list.
///
/// An empty include list admits everything. Membership in the exclude list
/// always wins over the include list.
#[must_use]
pub fn is_allowed(item: &str, include: &[String], exclude: &[String]) -> Admission {
    let allowed = include.is_empty() || include.iter().any(|candidate| candidate == item);
    if exclude.iter().any(|candidate| candidate == item) {
        return Admission {
            allowed: false,
            excluded: true,
        };
    }
    Admission {
        allowed,
        excluded: false,
    }
}

/// Derives the architecture for `platform`.
///
/// Local and bare-metal platforms take it from the board prefix
/// (`arm64-usr` → `arm64`); cloud platforms are always [`NATIVE_ARCH`].
#[must_use]
pub fn architecture(platform: &str, board: Option<&str>) -> String {
    let board_driven = matches!(platform, "qemu" | "qemu-unpriv" | "packet");
    match board.filter(|_| board_driven).map(str::trim) {
        Some(value) if !value.is_empty() => value
            .split_once('-')
            .map_or(value, |(arch, _)| arch)
            .to_owned(),
        _ => NATIVE_ARCH.to_owned(),
    }
}

/// Returns `true` when `version` lies outside `[min, end)`.
///
/// A zero `version` never excludes, and a zero `end` is unbounded.
#[must_use]
pub fn version_outside_range(version: &Version, min: &Version, end: &Version) -> bool {
    if *version == zero_version() {
        return false;
    }
    if version < min {
        return true;
    }
    *end != zero_version() && version >= end
}

/// Returns `true` when re-filtering with a probed version could change the
/// selection: some test carries version bounds and was matched by a glob
/// rather than by its exact name.
pub fn needs_version_probe<'a>(
    tests: impl IntoIterator<Item = &'a Arc<TestDescriptor>>,
    criteria: &FilterCriteria,
) -> bool {
    tests
        .into_iter()
        .any(|test| test.has_version_bounds() && !criteria.names_exactly(&test.name))
}

/// Selects the tests from `tests` that apply to `criteria`.
///
/// # Errors
///
/// Returns [`FilterError::Pattern`] when a pattern cannot be compiled.
pub fn filter_tests<'a>(
    tests: impl IntoIterator<Item = &'a Arc<TestDescriptor>>,
    criteria: &FilterCriteria,
) -> Result<BTreeMap<String, Arc<TestDescriptor>>, FilterError> {
    let patterns = compile_patterns(&criteria.patterns)?;
    let mut selected = BTreeMap::new();

    for test in tests {
        if !patterns
            .iter()
            .any(|pattern| pattern.matches_with(&test.name, GLOB_OPTIONS))
        {
            continue;
        }

        if !criteria.names_exactly(&test.name)
            && version_outside_range(&criteria.version, &test.min_version, &test.end_version)
        {
            continue;
        }

        if !platform_admits(test, criteria) {
            continue;
        }

        let axes = [
            is_allowed(&criteria.distribution, &test.distros, &test.exclude_distros),
            is_allowed(&criteria.channel, &test.channels, &test.exclude_channels),
            is_allowed(&criteria.offering, &test.offerings, &test.exclude_offerings),
        ];
        if axes.iter().all(|admission| admission.passes()) {
            selected.insert(test.name.clone(), Arc::clone(test));
        }
    }

    Ok(selected)
}

/// Returns the tests whose names match any of `patterns`, in input order,
/// ignoring every other axis.
///
/// # Errors
///
/// Returns [`FilterError::Pattern`] when a pattern cannot be compiled.
pub fn matching_names<'a>(
    tests: impl IntoIterator<Item = &'a Arc<TestDescriptor>>,
    patterns: &[String],
) -> Result<Vec<Arc<TestDescriptor>>, FilterError> {
    let compiled = compile_patterns(patterns)?;
    Ok(tests
        .into_iter()
        .filter(|test| {
            compiled
                .iter()
                .any(|pattern| pattern.matches_with(&test.name, GLOB_OPTIONS))
        })
        .cloned()
        .collect())
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, FilterError> {
    patterns
        .iter()
        .map(|pattern| {
            pattern::compile(pattern).map_err(|message| FilterError::Pattern {
                pattern: pattern.clone(),
                message,
            })
        })
        .collect()
}

/// Evaluates the platform axis, including the base platform that
/// `qemu-unpriv` inherits from.
///
/// Candidates are evaluated in order and the first excluded candidate ends
/// the evaluation, even if a later one would have been allowed.
fn platform_admits(test: &TestDescriptor, criteria: &FilterCriteria) -> bool {
    let mut candidates = vec![criteria.platform.as_str()];
    if criteria.platform == "qemu-unpriv" {
        candidates.push("qemu");
    }

    let mut allowed = false;
    for candidate in candidates {
        let platform = is_allowed(candidate, &test.platforms, &test.exclude_platforms);
        if platform.excluded {
            return false;
        }
        let arch = architecture(candidate, criteria.board.as_deref());
        let arch_admission = is_allowed(&arch, &test.architectures, &[]);
        allowed = allowed || (platform.allowed && arch_admission.allowed);
    }
    allowed
}
