//! Teardown-scoped machine groups on Scaleway.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use tracing::{info, warn};

use crate::platform::{Cluster, Machine, PlatformError, PlatformFuture, RuntimeConfig};
use crate::ssh::CommandRunner;

use super::lifecycle::ServerSpec;
use super::machine::ScalewayMachine;
use super::types::InstanceId;
use super::user_data::{authorized_key_tag, with_authorized_key};
use super::{FlightContext, RESOURCE_TAG, run_tag};

const CONSOLE_COMMAND: &str = "sudo dmesg";
const JOURNAL_COMMAND: &str = "journalctl --no-pager";

/// Machines created for one test.
pub struct ScalewayCluster<R: CommandRunner> {
    context: Arc<FlightContext<R>>,
    name: String,
    image_id: String,
    runtime: RuntimeConfig,
    pending: Mutex<Vec<InstanceId>>,
    machines: Mutex<Vec<Arc<ScalewayMachine<R>>>>,
}

impl<R: CommandRunner> ScalewayCluster<R> {
    pub(crate) const fn new(
        context: Arc<FlightContext<R>>,
        name: String,
        image_id: String,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            context,
            name,
            image_id,
            runtime,
            pending: Mutex::new(Vec::new()),
            machines: Mutex::new(Vec::new()),
        }
    }

    /// Tags applied to each server of this cluster.
    pub(crate) fn server_tags(&self) -> Vec<String> {
        let mut tags = vec![
            RESOURCE_TAG.to_owned(),
            run_tag(&self.context.run_id),
            format!("{RESOURCE_TAG}-cluster-{}", self.name),
        ];
        if !self.runtime.no_ssh_key_in_metadata
            && let Some(key) = &self.context.authorized_key
        {
            tags.push(authorized_key_tag(key));
        }
        tags
    }

    /// User-data sent to the server, with the flight's key added unless the
    /// test opted out.
    pub(crate) fn server_user_data(&self, user_data: &str) -> Option<String> {
        let rendered = match &self.context.authorized_key {
            Some(key) if !self.runtime.no_ssh_key_in_user_data => {
                with_authorized_key(user_data, key)
            }
            _ => user_data.to_owned(),
        };
        (!rendered.trim().is_empty()).then_some(rendered)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<InstanceId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ready_machines(&self) -> Vec<Arc<ScalewayMachine<R>>> {
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn provision(&self, user_data: &str) -> Result<Arc<ScalewayMachine<R>>, PlatformError> {
        let backend = &self.context.backend;
        let index = self.ready_machines().len() + self.pending().len();
        let spec = ServerSpec {
            name: format!("{}-m{index}", self.name),
            image_id: self.image_id.clone(),
            tags: self.server_tags(),
            cloud_init: self.server_user_data(user_data),
        };

        let snapshot = backend.create_server_stopped(&spec).await?;
        let id = snapshot.id.clone();
        self.pending().push(id.clone());
        info!(cluster = %self.name, instance = %id, "server created");

        backend.power_on_if_needed(&snapshot).await?;
        let ip = backend.wait_for_public_ip(&id).await?;
        backend.wait_for_ssh_ready(&id, ip).await?;

        let machine = Arc::new(ScalewayMachine::new(
            Arc::clone(&self.context),
            id.clone(),
            ip,
        ));
        self.pending().retain(|pending| pending != &id);
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&machine));
        Ok(machine)
    }

    async fn capture(&self, command: &'static str) -> BTreeMap<String, String> {
        let mut captured = BTreeMap::new();
        for machine in self.ready_machines() {
            match machine.ssh(command).await {
                Ok(output) => {
                    captured.insert(machine.id().to_owned(), output.stdout);
                }
                Err(err) => {
                    warn!(machine = machine.id(), command, error = %err, "capture failed");
                }
            }
        }
        captured
    }
}

impl<R: CommandRunner> Cluster for ScalewayCluster<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_machine<'a>(&'a self, user_data: &'a str) -> PlatformFuture<'a, Arc<dyn Machine>> {
        Box::pin(async move {
            let machine = self.provision(user_data).await?;
            let handle: Arc<dyn Machine> = machine;
            Ok(handle)
        })
    }

    fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.ready_machines()
            .into_iter()
            .map(|machine| {
                let handle: Arc<dyn Machine> = machine;
                handle
            })
            .collect()
    }

    fn destroy(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            let mut first_error = None;
            let unready: Vec<InstanceId> = self.pending().drain(..).collect();
            for id in unready {
                if let Err(err) = self.context.remover.remove_server(&id).await {
                    warn!(cluster = %self.name, instance = %id, error = %err, "delete failed");
                    self.pending().push(id);
                    first_error.get_or_insert(PlatformError::from(err));
                }
            }
            for machine in self.ready_machines() {
                if let Err(err) = machine.destroy().await {
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }

    fn console_output(&self) -> PlatformFuture<'_, BTreeMap<String, String>> {
        Box::pin(async move { Ok(self.capture(CONSOLE_COMMAND).await) })
    }

    fn journal_output(&self) -> PlatformFuture<'_, BTreeMap<String, String>> {
        Box::pin(async move { Ok(self.capture(JOURNAL_COMMAND).await) })
    }

    fn drop_file<'a>(&'a self, local: &'a Utf8Path) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            for machine in self.ready_machines() {
                machine.copy_file(local).await?;
            }
            Ok(())
        })
    }

    fn get_discovery_url(&self, size: usize) -> PlatformFuture<'_, String> {
        Box::pin(async move {
            self.context
                .discovery
                .new_url(size)
                .await
                .map_err(|err| PlatformError::Discovery(err.to_string()))
        })
    }
}

#[cfg(test)]
impl<R: CommandRunner> ScalewayCluster<R> {
    pub(crate) fn track_pending(&self, id: &str) {
        self.pending().push(InstanceId::from(id));
    }

    pub(crate) fn pending_ids(&self) -> Vec<String> {
        self.pending().iter().map(|id| id.as_str().to_owned()).collect()
    }

    pub(crate) fn adopt(&self, machine: Arc<ScalewayMachine<R>>) {
        self.machines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(machine);
    }
}
