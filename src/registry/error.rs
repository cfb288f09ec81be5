//! Errors raised while building the test registry.

use thiserror::Error;

/// Errors raised by descriptor validation and registry construction.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when a descriptor has a blank name.
    #[error("test name must not be empty")]
    EmptyName,
    /// Raised when two descriptors share a name.
    #[error("test '{0}' is registered more than once")]
    Duplicate(String),
    /// Raised when the end version does not follow the minimum version.
    #[error("test '{name}' has an empty version range [{min}, {end})")]
    InvalidVersionRange {
        /// Test name.
        name: String,
        /// Declared minimum version.
        min: String,
        /// Declared end version.
        end: String,
    },
    /// Raised when a native function name is blank.
    #[error("test '{name}' declares an invalid native function '{func}'")]
    InvalidNativeFunc {
        /// Test name.
        name: String,
        /// Offending function name.
        func: String,
    },
}
