//! Polling until a server is reachable or gone.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::scaleway::types::{InstanceId, InstanceState};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// The time budget for one wait, and the pause between attempts.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Deadline {
    until: Instant,
    interval: Duration,
}

impl Deadline {
    pub(crate) fn after(budget: Duration, interval: Duration) -> Self {
        Self {
            until: Instant::now() + budget,
            interval,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        Instant::now() > self.until
    }

    pub(crate) async fn pause(&self) {
        sleep(self.interval).await;
    }
}

impl ScalewayBackend {
    pub(in crate::scaleway) fn deadline(&self) -> Deadline {
        Deadline::after(self.wait_timeout, self.poll_interval)
    }

    pub(in crate::scaleway) async fn fetch_instance(
        &self,
        id: &InstanceId,
    ) -> Result<Option<InstanceSnapshot>, ScalewayBackendError> {
        let mut servers = self
            .api
            .list_instances(self.zone().as_str())
            .servers(id.as_str())
            .per_page(1)
            .run_async()
            .await?;

        Ok(servers.pop().map(InstanceSnapshot::from))
    }

    /// Waits for a freshly powered-on machine to report a public address.
    ///
    /// A machine that reaches `running` without one is a
    /// [`ScalewayBackendError::MissingPublicIp`]; one that never gets there
    /// is a [`ScalewayBackendError::Timeout`].
    pub(in crate::scaleway) async fn wait_for_public_ip(
        &self,
        id: &InstanceId,
    ) -> Result<IpAddr, ScalewayBackendError> {
        let deadline = self.deadline();
        let mut last_state: Option<InstanceState> = None;
        while !deadline.expired() {
            if let Some(server) = self.fetch_instance(id).await? {
                if let Some(address) = server.running_address() {
                    return Ok(address);
                }
                last_state = Some(server.state);
            }
            deadline.pause().await;
        }

        if last_state.as_ref().is_some_and(InstanceState::is_running) {
            return Err(ScalewayBackendError::MissingPublicIp {
                instance_id: id.as_str().to_owned(),
            });
        }
        Err(ScalewayBackendError::timeout("wait_for_public_ip", id))
    }

    /// Waits until the machine accepts TCP connections on the SSH port.
    pub(in crate::scaleway) async fn wait_for_ssh_ready(
        &self,
        id: &InstanceId,
        ip: IpAddr,
    ) -> Result<(), ScalewayBackendError> {
        let deadline = self.deadline();
        while !deadline.expired() {
            let connect = timeout(SSH_CONNECT_TIMEOUT, TcpStream::connect((ip, self.ssh_port))).await;
            if matches!(connect, Ok(Ok(_))) {
                return Ok(());
            }
            deadline.pause().await;
        }
        Err(ScalewayBackendError::timeout("wait_for_ssh_ready", id))
    }

    /// Waits until the API stops listing the server.
    pub(in crate::scaleway) async fn wait_until_gone(
        &self,
        id: &InstanceId,
    ) -> Result<(), ScalewayBackendError> {
        let deadline = self.deadline();
        while !deadline.expired() {
            if self.fetch_instance(id).await?.is_none() {
                return Ok(());
            }
            deadline.pause().await;
        }
        Err(ScalewayBackendError::ResidualResource {
            instance_id: id.as_str().to_owned(),
        })
    }
}
