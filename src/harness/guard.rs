//! Scoped ownership of a cluster's teardown.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use crate::platform::{Cluster, PlatformError};

/// Destroys a cluster when released, or from `Drop` if the owning task is
/// cancelled first.
///
/// With removal disabled the guard only forgets the cluster, leaving its
/// machines running for inspection.
pub struct ClusterGuard {
    cluster: Option<Arc<dyn Cluster>>,
    remove: bool,
}

impl ClusterGuard {
    /// Takes teardown responsibility for `cluster`.
    #[must_use]
    pub fn new(cluster: Arc<dyn Cluster>, remove: bool) -> Self {
        Self {
            cluster: Some(cluster),
            remove,
        }
    }

    /// Destroys the cluster now.
    ///
    /// # Errors
    ///
    /// Propagates the backend's teardown error.
    pub async fn release(mut self) -> Result<(), PlatformError> {
        match self.cluster.take() {
            Some(cluster) if self.remove => cluster.destroy().await,
            _ => Ok(()),
        }
    }
}

impl Drop for ClusterGuard {
    fn drop(&mut self) {
        let Some(cluster) = self.cluster.take() else {
            return;
        };
        if !self.remove {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(cluster = cluster.name(), "no runtime available; cluster leaked");
            return;
        };
        warn!(cluster = cluster.name(), "cluster released without teardown; destroying");
        handle.spawn(async move {
            if let Err(err) = cluster.destroy().await {
                warn!(cluster = cluster.name(), error = %err, "fallback teardown failed");
            }
        });
    }
}
