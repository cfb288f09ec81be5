//! Platform abstraction for provisioning disposable test machines.
//!
//! Every backend exposes the same three-level lifecycle: a [`Flight`] owns the
//! provider session for a whole run, a [`Cluster`] groups the machines created
//! for one test and shares their teardown scope, and a [`Machine`] is a single
//! addressable instance reachable over SSH.

mod error;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::ScalewayConfig;
use crate::scaleway::ScalewayFlight;
use crate::ssh::SshConfig;

pub use error::PlatformError;

/// Future returned by platform operations.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PlatformError>> + Send + 'a>>;

/// Backends known to the harness.
///
/// Names are matched against the applicability lists of registered tests, so
/// every backend appears here even when its provider client lives outside this
/// crate.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Platform {
    /// Amazon EC2.
    Aws,
    /// Microsoft Azure.
    Azure,
    /// DigitalOcean droplets.
    Do,
    /// VMware ESXi.
    Esx,
    /// Google Compute Engine.
    Gce,
    /// OpenStack Nova.
    Openstack,
    /// Equinix Metal (Packet) bare metal.
    Packet,
    /// Local QEMU with privileged networking.
    Qemu,
    /// Local QEMU in user-mode networking. Inherits the `qemu` constraints.
    QemuUnpriv,
    /// Scaleway Instances.
    Scaleway,
}

impl Platform {
    /// Every known platform, in display order.
    pub const ALL: [Self; 10] = [
        Self::Aws,
        Self::Azure,
        Self::Do,
        Self::Esx,
        Self::Gce,
        Self::Openstack,
        Self::Packet,
        Self::Qemu,
        Self::QemuUnpriv,
        Self::Scaleway,
    ];

    /// Returns the canonical lowercase name used by filters and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Do => "do",
            Self::Esx => "esx",
            Self::Gce => "gce",
            Self::Openstack => "openstack",
            Self::Packet => "packet",
            Self::Qemu => "qemu",
            Self::QemuUnpriv => "qemu-unpriv",
            Self::Scaleway => "scaleway",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let needle = value.trim();
        Self::ALL
            .into_iter()
            .find(|platform| platform.as_str() == needle)
            .ok_or_else(|| PlatformError::UnknownPlatform(needle.to_owned()))
    }
}

/// Per-cluster settings derived from the test being run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RuntimeConfig {
    /// Directory receiving console and journal captures for this cluster.
    pub output_dir: Utf8PathBuf,
    /// Do not inject the flight's SSH key into machine user-data.
    pub no_ssh_key_in_user_data: bool,
    /// Do not inject the flight's SSH key through provider metadata.
    pub no_ssh_key_in_metadata: bool,
}

/// Output of a command executed on a machine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SshOutput {
    /// Exit code reported by the remote shell, if any.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl SshOutput {
    /// Returns `true` when the remote command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Backend session shared by every test in a run.
pub trait Flight: Send + Sync {
    /// Platform this flight provisions on.
    fn platform(&self) -> Platform;

    /// Creates a new, empty cluster.
    fn new_cluster<'a>(&'a self, config: &'a RuntimeConfig) -> PlatformFuture<'a, Arc<dyn Cluster>>;

    /// Releases any shared provider state created for the run.
    fn destroy(&self) -> PlatformFuture<'_, ()>;
}

/// Teardown-scoped group of machines created for a single test.
pub trait Cluster: Send + Sync {
    /// Unique cluster name, used for tagging and logging.
    fn name(&self) -> &str;

    /// Provisions a machine booted with `user_data` and waits until it
    /// answers SSH.
    fn new_machine<'a>(&'a self, user_data: &'a str) -> PlatformFuture<'a, Arc<dyn Machine>>;

    /// Machines created so far, in creation order.
    fn machines(&self) -> Vec<Arc<dyn Machine>>;

    /// Destroys every machine in the cluster. Safe to call repeatedly.
    fn destroy(&self) -> PlatformFuture<'_, ()>;

    /// Boot console text keyed by machine id.
    fn console_output(&self) -> PlatformFuture<'_, BTreeMap<String, String>>;

    /// System journal text keyed by machine id.
    fn journal_output(&self) -> PlatformFuture<'_, BTreeMap<String, String>>;

    /// Copies a local file into the login directory of every machine.
    fn drop_file<'a>(&'a self, local: &'a Utf8Path) -> PlatformFuture<'a, ()>;

    /// Allocates a discovery URL for a cluster of `size` members.
    fn get_discovery_url(&self, size: usize) -> PlatformFuture<'_, String>;
}

/// A single provisioned instance.
pub trait Machine: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;

    /// Address used for SSH.
    fn ip(&self) -> IpAddr;

    /// Runs `command` through the login shell.
    fn ssh<'a>(&'a self, command: &'a str) -> PlatformFuture<'a, SshOutput>;

    /// Reboots the machine and waits for SSH to return.
    fn reboot(&self) -> PlatformFuture<'_, ()>;

    /// Destroys the instance. Later calls are no-ops.
    fn destroy(&self) -> PlatformFuture<'_, ()>;
}

/// Inputs required to construct a flight.
#[derive(Clone, Debug)]
pub struct FlightOptions {
    /// Identifier shared by every resource of this run.
    pub run_id: String,
    /// SSH client settings.
    pub ssh: SshConfig,
    /// Public key authorised on every machine, when available.
    pub authorized_key: Option<String>,
    /// Endpoint used to mint discovery URLs.
    pub discovery_endpoint: String,
    /// Scaleway settings, required for [`Platform::Scaleway`].
    pub scaleway: Option<ScalewayConfig>,
}

/// Constructs the flight for `platform`.
///
/// # Errors
///
/// Returns [`PlatformError::Unsupported`] for platforms whose provider client
/// is not built into this binary, [`PlatformError::Setup`] when the selected
/// backend is missing its configuration, or any error raised by the backend
/// while preparing the flight.
pub fn new_flight(
    platform: Platform,
    options: FlightOptions,
) -> Result<Arc<dyn Flight>, PlatformError> {
    match platform {
        Platform::Scaleway => {
            let FlightOptions {
                run_id,
                ssh,
                authorized_key,
                discovery_endpoint,
                scaleway,
            } = options;
            let config = scaleway.ok_or_else(|| {
                PlatformError::Setup(String::from("scaleway configuration is required"))
            })?;
            let flight =
                ScalewayFlight::new(config, ssh, run_id, authorized_key, discovery_endpoint)?;
            Ok(Arc::new(flight))
        }
        other => Err(PlatformError::Unsupported(other)),
    }
}
