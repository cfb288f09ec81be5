//! Power actions and teardown.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::scaleway::types::{Action, InstanceId};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

/// Future returned by [`ServerRemover::remove_server`].
pub(crate) type RemovalFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), ScalewayBackendError>> + Send + 'a>>;

/// Deletes servers by id. A server that is already gone counts as deleted.
pub(crate) trait ServerRemover: Send + Sync {
    fn remove_server<'a>(&'a self, id: &'a InstanceId) -> RemovalFuture<'a>;
}

/// How a server in its current state is taken down.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Teardown {
    /// Running servers are terminated, which also deletes local volumes.
    Terminate,
    /// Stopped servers are deleted directly.
    Delete,
    /// The server is between states; poll again.
    Settle,
}

impl Teardown {
    pub(crate) fn for_server(server: &InstanceSnapshot) -> Self {
        let terminable = server
            .allowed_actions
            .iter()
            .any(|action| action.as_str() == Action::TERMINATE);
        if server.state.is_running() && terminable {
            Self::Terminate
        } else if server.state.is_stopped() {
            Self::Delete
        } else {
            Self::Settle
        }
    }
}

impl ScalewayBackend {
    pub(in crate::scaleway) async fn perform_action(
        &self,
        id: &InstanceId,
        action: &str,
    ) -> Result<(), ScalewayBackendError> {
        debug!(instance = %id, action, "performing server action");
        self.api
            .perform_instance_action_async(self.zone().as_str(), id.as_str(), action)
            .await?;
        Ok(())
    }

    /// Takes the server down according to its state and waits until the API
    /// no longer lists it. Servers still starting or stopping are polled
    /// until they settle.
    pub(in crate::scaleway) async fn delete_server(
        &self,
        id: &InstanceId,
    ) -> Result<(), ScalewayBackendError> {
        let deadline = self.deadline();
        while !deadline.expired() {
            let Some(server) = self.fetch_instance(id).await? else {
                return Ok(());
            };
            match Teardown::for_server(&server) {
                Teardown::Terminate => {
                    self.perform_action(id, Action::TERMINATE).await?;
                    return self.wait_until_gone(id).await;
                }
                Teardown::Delete => {
                    debug!(instance = %id, state = %server.state, "deleting stopped server");
                    self.api
                        .delete_instance_async(self.zone().as_str(), id.as_str())
                        .await?;
                    return self.wait_until_gone(id).await;
                }
                Teardown::Settle => deadline.pause().await,
            }
        }

        Err(ScalewayBackendError::timeout("delete_server", id))
    }
}

impl ServerRemover for ScalewayBackend {
    fn remove_server<'a>(&'a self, id: &'a InstanceId) -> RemovalFuture<'a> {
        Box::pin(self.delete_server(id))
    }
}
