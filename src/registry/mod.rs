//! Registered acceptance tests and the applicability data used to select
//! them.
//!
//! Tests are described once at startup with [`TestDescriptor::builder`] and
//! collected into an immutable [`TestRegistry`]. The registry is shared by the
//! filter and the harness; nothing mutates it after construction.

mod error;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use semver::Version;

use crate::harness::{TestCluster, TestError};

pub use error::RegistryError;

/// Placeholder replaced with a freshly minted discovery URL in user-data.
pub const DISCOVERY_PLACEHOLDER: &str = "$discovery";

/// Future returned by a test body.
pub type TestFuture = Pin<Box<dyn Future<Output = Result<(), TestError>> + Send>>;

/// Test body invoked with the cluster provisioned for the test.
pub type TestFn = Arc<dyn Fn(TestCluster) -> TestFuture + Send + Sync>;

/// Behaviour switches a test may declare.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TestFlag {
    /// Do not flag an emergency shell on the console.
    NoEmergencyShellCheck,
    /// Do not flag a kernel panic on the console.
    NoKernelPanicCheck,
    /// Do not inject the flight's SSH key into user-data.
    NoSshKeyInUserData,
    /// Do not inject the flight's SSH key through provider metadata.
    NoSshKeyInMetadata,
    /// Stop scheduling further tests when this one fails.
    FailFast,
}

/// Immutable description of a registered test.
#[derive(Clone)]
pub struct TestDescriptor {
    /// Unique test name.
    pub name: String,
    /// Platforms the test may run on; empty means all.
    pub platforms: Vec<String>,
    /// Platforms the test must never run on.
    pub exclude_platforms: Vec<String>,
    /// Architectures the test may run on; empty means all.
    pub architectures: Vec<String>,
    /// Distributions the test may run on; empty means all.
    pub distros: Vec<String>,
    /// Distributions the test must never run on.
    pub exclude_distros: Vec<String>,
    /// Release channels the test may run on; empty means all.
    pub channels: Vec<String>,
    /// Release channels the test must never run on.
    pub exclude_channels: Vec<String>,
    /// Product offerings the test may run on; empty means all.
    pub offerings: Vec<String>,
    /// Product offerings the test must never run on.
    pub exclude_offerings: Vec<String>,
    /// First OS version the test applies to; `0.0.0` means unbounded.
    pub min_version: Version,
    /// First OS version the test no longer applies to; `0.0.0` means
    /// unbounded.
    pub end_version: Version,
    /// Machines created before the body runs.
    pub cluster_size: usize,
    /// User-data for auto-provisioned machines.
    pub user_data: Option<String>,
    /// In-guest functions executed through the helper binary.
    pub native_funcs: Vec<String>,
    /// Declared behaviour switches.
    pub flags: BTreeSet<TestFlag>,
    run: TestFn,
}

impl TestDescriptor {
    /// Starts a builder for a test called `name` with body `run`.
    #[must_use]
    pub fn builder<F, Fut>(name: impl Into<String>, run: F) -> TestDescriptorBuilder
    where
        F: Fn(TestCluster) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        TestDescriptorBuilder::new(name, run)
    }

    /// Returns `true` when the test declares `flag`.
    #[must_use]
    pub fn has_flag(&self, flag: TestFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Returns `true` when either version bound is set.
    #[must_use]
    pub fn has_version_bounds(&self) -> bool {
        self.min_version != zero_version() || self.end_version != zero_version()
    }

    /// Returns a handle to the test body.
    #[must_use]
    pub fn body(&self) -> TestFn {
        Arc::clone(&self.run)
    }
}

impl fmt::Debug for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("name", &self.name)
            .field("platforms", &self.platforms)
            .field("exclude_platforms", &self.exclude_platforms)
            .field("min_version", &self.min_version)
            .field("end_version", &self.end_version)
            .field("cluster_size", &self.cluster_size)
            .field("native_funcs", &self.native_funcs)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// The unbounded version marker.
#[must_use]
pub const fn zero_version() -> Version {
    Version::new(0, 0, 0)
}

/// Builder for [`TestDescriptor`].
pub struct TestDescriptorBuilder {
    descriptor: TestDescriptor,
}

macro_rules! list_setter {
    ($(#[$doc:meta] $method:ident => $field:ident),+ $(,)?) => {
        $(
            #[$doc]
            #[must_use]
            pub fn $method<I, S>(mut self, values: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.descriptor.$field = values.into_iter().map(Into::into).collect();
                self
            }
        )+
    };
}

impl TestDescriptorBuilder {
    fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(TestCluster) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestError>> + Send + 'static,
    {
        let body: TestFn = Arc::new(move |cluster| Box::pin(run(cluster)));
        Self {
            descriptor: TestDescriptor {
                name: name.into().trim().to_owned(),
                platforms: Vec::new(),
                exclude_platforms: Vec::new(),
                architectures: Vec::new(),
                distros: Vec::new(),
                exclude_distros: Vec::new(),
                channels: Vec::new(),
                exclude_channels: Vec::new(),
                offerings: Vec::new(),
                exclude_offerings: Vec::new(),
                min_version: zero_version(),
                end_version: zero_version(),
                cluster_size: 0,
                user_data: None,
                native_funcs: Vec::new(),
                flags: BTreeSet::new(),
                run: body,
            },
        }
    }

    list_setter!(
        /// Restricts the test to these platforms.
        platforms => platforms,
        /// Excludes these platforms.
        exclude_platforms => exclude_platforms,
        /// Restricts the test to these architectures.
        architectures => architectures,
        /// Restricts the test to these distributions.
        distros => distros,
        /// Excludes these distributions.
        exclude_distros => exclude_distros,
        /// Restricts the test to these channels.
        channels => channels,
        /// Excludes these channels.
        exclude_channels => exclude_channels,
        /// Restricts the test to these offerings.
        offerings => offerings,
        /// Excludes these offerings.
        exclude_offerings => exclude_offerings,
        /// Declares in-guest functions run through the helper binary.
        native_funcs => native_funcs,
    );

    /// Sets the inclusive lower version bound.
    #[must_use]
    pub fn min_version(mut self, version: Version) -> Self {
        self.descriptor.min_version = version;
        self
    }

    /// Sets the exclusive upper version bound.
    #[must_use]
    pub fn end_version(mut self, version: Version) -> Self {
        self.descriptor.end_version = version;
        self
    }

    /// Sets how many machines to create before the body runs.
    #[must_use]
    pub const fn cluster_size(mut self, size: usize) -> Self {
        self.descriptor.cluster_size = size;
        self
    }

    /// Sets the user-data for auto-provisioned machines.
    #[must_use]
    pub fn user_data(mut self, user_data: impl Into<String>) -> Self {
        self.descriptor.user_data = Some(user_data.into());
        self
    }

    /// Declares a behaviour flag.
    #[must_use]
    pub fn flag(mut self, flag: TestFlag) -> Self {
        self.descriptor.flags.insert(flag);
        self
    }

    /// Validates and returns the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyName`] for a blank name, and
    /// [`RegistryError::InvalidVersionRange`] when both bounds are set and the
    /// end does not follow the start.
    pub fn build(self) -> Result<TestDescriptor, RegistryError> {
        let descriptor = self.descriptor;
        if descriptor.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let bounded_end = descriptor.end_version != zero_version();
        if bounded_end && descriptor.end_version <= descriptor.min_version {
            return Err(RegistryError::InvalidVersionRange {
                name: descriptor.name,
                min: descriptor.min_version.to_string(),
                end: descriptor.end_version.to_string(),
            });
        }
        if let Some(func) = descriptor.native_funcs.iter().find(|f| f.trim().is_empty()) {
            return Err(RegistryError::InvalidNativeFunc {
                name: descriptor.name.clone(),
                func: func.clone(),
            });
        }
        Ok(descriptor)
    }
}

/// Immutable table of registered tests keyed by name.
#[derive(Clone, Debug, Default)]
pub struct TestRegistry {
    tests: BTreeMap<String, Arc<TestDescriptor>>,
}

impl TestRegistry {
    /// Builds a registry from `tests`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when two descriptors share a name.
    pub fn new(tests: impl IntoIterator<Item = TestDescriptor>) -> Result<Self, RegistryError> {
        let mut table = BTreeMap::new();
        for test in tests {
            let name = test.name.clone();
            if table.insert(name.clone(), Arc::new(test)).is_some() {
                return Err(RegistryError::Duplicate(name));
            }
        }
        Ok(Self { tests: table })
    }

    /// Looks up a test by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<TestDescriptor>> {
        self.tests.get(name)
    }

    /// Iterates over every registered test in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TestDescriptor>> {
        self.tests.values()
    }

    /// Number of registered tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns `true` when no tests are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}
