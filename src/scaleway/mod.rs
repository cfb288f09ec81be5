//! Scaleway backend for the platform abstraction.
//!
//! A [`ScalewayFlight`] resolves the configured image once and hands out
//! [`ScalewayCluster`]s. Each machine is created stopped with its user-data,
//! powered on, and awaited until it has a public address and answers on the
//! SSH port. Console and journal text are read over SSH.

mod cluster;
mod error;
mod lifecycle;
mod machine;
mod types;
mod user_data;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use scaleway_rs::ScalewayApi;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ScalewayConfig;
use crate::discovery::DiscoveryClient;
use crate::platform::{Cluster, Flight, Platform, PlatformError, PlatformFuture, RuntimeConfig};
use crate::ssh::{CommandRunner, ProcessCommandRunner, SshClient, SshConfig};
use lifecycle::ServerRemover;
use types::Zone;

pub use cluster::ScalewayCluster;
pub use error::ScalewayBackendError;
pub use machine::ScalewayMachine;

const DEFAULT_SSH_PORT: u16 = 22;
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Tag carried by every resource this crate creates.
pub const RESOURCE_TAG: &str = "sortie";

/// Tag identifying the resources of one run.
#[must_use]
pub fn run_tag(run_id: &str) -> String {
    format!("{RESOURCE_TAG}-run-{run_id}")
}

/// Authenticated access to the Scaleway Instances API with polling settings.
pub(crate) struct ScalewayBackend {
    api: ScalewayApi,
    config: ScalewayConfig,
    ssh_port: u16,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl ScalewayBackend {
    fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            ssh_port: DEFAULT_SSH_PORT,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        })
    }

    fn zone(&self) -> Zone {
        Zone::from(self.config.default_zone.as_str())
    }
}

/// State shared by a flight and every cluster and machine it creates.
pub(crate) struct FlightContext<R: CommandRunner> {
    backend: Arc<ScalewayBackend>,
    remover: Arc<dyn ServerRemover>,
    ssh: SshClient<R>,
    run_id: String,
    authorized_key: Option<String>,
    discovery: DiscoveryClient,
}

/// Scaleway session shared by every test in a run.
pub struct ScalewayFlight<R: CommandRunner = ProcessCommandRunner> {
    context: Arc<FlightContext<R>>,
    image_id: OnceCell<String>,
    clusters: Mutex<Vec<Arc<ScalewayCluster<R>>>>,
    sequence: AtomicUsize,
}

impl ScalewayFlight<ProcessCommandRunner> {
    /// Creates a flight that reaches machines through the system SSH client.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Setup`] when the Scaleway or SSH settings fail
    /// validation.
    pub fn new(
        config: ScalewayConfig,
        ssh: SshConfig,
        run_id: String,
        authorized_key: Option<String>,
        discovery_endpoint: String,
    ) -> Result<Self, PlatformError> {
        let client = SshClient::with_process_runner(ssh)
            .map_err(|err| PlatformError::Setup(err.to_string()))?;
        Self::with_ssh_client(config, client, run_id, authorized_key, discovery_endpoint)
    }
}

impl<R: CommandRunner> ScalewayFlight<R> {
    /// Creates a flight using an already constructed SSH client.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Setup`] when the Scaleway settings fail
    /// validation.
    pub fn with_ssh_client(
        config: ScalewayConfig,
        ssh: SshClient<R>,
        run_id: String,
        authorized_key: Option<String>,
        discovery_endpoint: String,
    ) -> Result<Self, PlatformError> {
        let backend = Arc::new(ScalewayBackend::new(config)?);
        let remover: Arc<dyn ServerRemover> = Arc::<ScalewayBackend>::clone(&backend);
        Ok(Self {
            context: Arc::new(FlightContext {
                backend,
                remover,
                ssh,
                run_id,
                authorized_key: authorized_key.filter(|key| !key.trim().is_empty()),
                discovery: DiscoveryClient::new(discovery_endpoint),
            }),
            image_id: OnceCell::new(),
            clusters: Mutex::new(Vec::new()),
            sequence: AtomicUsize::new(0),
        })
    }

    fn cluster_name(&self) -> String {
        let index = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{RESOURCE_TAG}-{}-{index}", self.context.run_id)
    }

    fn clusters(&self) -> Vec<Arc<ScalewayCluster<R>>> {
        self.clusters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<R: CommandRunner> Flight for ScalewayFlight<R> {
    fn platform(&self) -> Platform {
        Platform::Scaleway
    }

    fn new_cluster<'a>(
        &'a self,
        config: &'a RuntimeConfig,
    ) -> PlatformFuture<'a, Arc<dyn Cluster>> {
        Box::pin(async move {
            let image_id = self
                .image_id
                .get_or_try_init(|| self.context.backend.resolve_image_id())
                .await?
                .clone();
            let cluster = Arc::new(ScalewayCluster::new(
                Arc::clone(&self.context),
                self.cluster_name(),
                image_id,
                config.clone(),
            ));
            self.clusters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&cluster));
            info!(cluster = cluster.name(), "created cluster");
            let handle: Arc<dyn Cluster> = cluster;
            Ok(handle)
        })
    }

    fn destroy(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            let mut first_error = None;
            for cluster in self.clusters() {
                if let Err(err) = cluster.destroy().await {
                    warn!(cluster = cluster.name(), error = %err, "cluster teardown failed");
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}

#[cfg(test)]
impl<R: CommandRunner> ScalewayFlight<R> {
    /// Routes server deletion through `remover`. Only valid before any
    /// cluster is created.
    pub(crate) fn with_remover(mut self, remover: Arc<dyn ServerRemover>) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.remover = remover;
        }
        self
    }
}
