//! Core library for the `sortie` integration-test orchestrator.
//!
//! The crate provisions ephemeral virtual machines through a platform
//! abstraction (flight → cluster → machine), selects registered acceptance
//! tests with a multi-axis filter, runs them on a bounded worker pool,
//! classifies console and journal output, and reports results. A Scaleway
//! backend implements the platform contract, and the [`agent`] module holds
//! the native functions run inside machines by the `sortie-agent` helper.

pub mod agent;
pub mod config;
pub mod console;
pub mod discovery;
pub mod filter;
pub mod gc;
pub mod harness;
pub mod output;
pub mod platform;
pub mod registry;
pub mod report;
pub mod scaleway;
pub mod ssh;
pub mod suite;
pub mod test_support;

pub use config::{ConfigError, HarnessConfig, ScalewayConfig};
pub use filter::{FilterCriteria, FilterError, filter_tests};
pub use gc::{Gc, GcConfig, GcError, GcSummary};
pub use harness::{Harness, HarnessError, HarnessOptions, TestCluster, TestError};
pub use platform::{Cluster, Flight, Machine, Platform, PlatformError, new_flight};
pub use registry::{RegistryError, TestDescriptor, TestFlag, TestRegistry};
pub use report::{RunReport, TestResult, TestStatus};
pub use scaleway::{ScalewayBackendError, ScalewayFlight};
