//! Single Scaleway instances reachable over SSH.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::task;
use tracing::{debug, info};

use crate::platform::{Machine, PlatformError, PlatformFuture, SshOutput};
use crate::ssh::{CommandRunner, SshClient, SshError, SshTarget};

use super::FlightContext;
use super::types::{Action, InstanceId};

const BOOT_ID_COMMAND: &str = "cat /proc/sys/kernel/random/boot_id";

/// A provisioned Scaleway server.
pub struct ScalewayMachine<R: CommandRunner> {
    context: Arc<FlightContext<R>>,
    id: InstanceId,
    ip: IpAddr,
    destroyed: AtomicBool,
}

impl<R: CommandRunner> ScalewayMachine<R> {
    pub(crate) const fn new(context: Arc<FlightContext<R>>, id: InstanceId, ip: IpAddr) -> Self {
        Self {
            context,
            id,
            ip,
            destroyed: AtomicBool::new(false),
        }
    }

    fn target(&self) -> SshTarget {
        SshTarget {
            ip: self.ip,
            port: self.context.backend.ssh_port,
        }
    }

    fn ssh_error(&self, message: String) -> PlatformError {
        PlatformError::Ssh {
            machine_id: self.id.as_str().to_owned(),
            message,
        }
    }

    /// Runs `operation` with the SSH client on a blocking worker thread.
    async fn with_ssh<T, F>(&self, operation: F) -> Result<T, PlatformError>
    where
        T: Send + 'static,
        F: FnOnce(&SshClient<R>, SshTarget) -> Result<T, SshError> + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        let target = self.target();
        task::spawn_blocking(move || operation(&context.ssh, target))
            .await
            .map_err(|err| self.ssh_error(err.to_string()))?
            .map_err(|err| self.ssh_error(err.to_string()))
    }

    /// Copies `local` into the login directory of this machine.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Ssh`] when `scp` fails.
    pub async fn copy_file(&self, local: &Utf8Path) -> Result<(), PlatformError> {
        let path: Utf8PathBuf = local.to_path_buf();
        debug!(machine = %self.id, file = %path, "copying file");
        self.with_ssh(move |client, target| client.copy_to(target, &path))
            .await
    }

    async fn boot_id(&self) -> Result<String, PlatformError> {
        let output = self.ssh(BOOT_ID_COMMAND).await?;
        if output.is_success() {
            return Ok(output.stdout.trim().to_owned());
        }
        Err(self.ssh_error(format!("reading boot id failed: {}", output.stderr.trim())))
    }

    /// Polls until the machine answers SSH with a boot id other than
    /// `previous`.
    async fn wait_for_new_boot(&self, previous: &str) -> Result<(), PlatformError> {
        let deadline = self.context.backend.deadline();
        while !deadline.expired() {
            deadline.pause().await;
            if let Ok(current) = self.boot_id().await
                && current != previous
            {
                return Ok(());
            }
        }
        Err(PlatformError::Timeout {
            action: String::from("reboot"),
            machine_id: self.id.as_str().to_owned(),
        })
    }
}

impl<R: CommandRunner> Machine for ScalewayMachine<R> {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn ip(&self) -> IpAddr {
        self.ip
    }

    fn ssh<'a>(&'a self, command: &'a str) -> PlatformFuture<'a, SshOutput> {
        Box::pin(async move {
            let owned = command.to_owned();
            self.with_ssh(move |client, target| client.run(target, &owned))
                .await
        })
    }

    fn reboot(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            let previous = self.boot_id().await?;
            self.context
                .backend
                .perform_action(&self.id, Action::REBOOT)
                .await?;
            self.wait_for_new_boot(&previous).await?;
            info!(machine = %self.id, "machine rebooted");
            Ok(())
        })
    }

    fn destroy(&self) -> PlatformFuture<'_, ()> {
        Box::pin(async move {
            if self.destroyed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            if let Err(err) = self.context.remover.remove_server(&self.id).await {
                self.destroyed.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
            info!(machine = %self.id, "machine destroyed");
            Ok(())
        })
    }
}
