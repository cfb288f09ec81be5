//! Allocation of cluster discovery URLs.
//!
//! Tests that form multi-machine clusters embed a discovery URL in their
//! user-data. A fresh URL is minted per cluster by requesting
//! `<endpoint>?size=<n>` from the discovery service, which replies with the
//! URL as plain text.

use std::sync::LazyLock;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Errors raised while minting a discovery URL.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DiscoveryError {
    /// Raised when the service cannot be reached.
    #[error("discovery request to {endpoint} failed: {message}")]
    Request {
        /// Endpoint contacted.
        endpoint: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the service answers with a non-success status.
    #[error("discovery service {endpoint} returned status {status}")]
    Status {
        /// Endpoint contacted.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },
    /// Raised when the response body is not a URL.
    #[error("discovery service {endpoint} returned an invalid URL: {body:?}")]
    InvalidBody {
        /// Endpoint contacted.
        endpoint: String,
        /// Body received.
        body: String,
    },
}

/// Client for a discovery service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveryClient {
    endpoint: String,
}

impl DiscoveryClient {
    /// Creates a client for `endpoint`, for example
    /// `https://discovery.etcd.io/new`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Endpoint the client requests URLs from.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Mints a discovery URL for a cluster of `size` members.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the service is unreachable, answers
    /// with an error status, or returns something other than a URL.
    pub async fn new_url(&self, size: usize) -> Result<String, DiscoveryError> {
        debug!(endpoint = %self.endpoint, size, "requesting discovery url");
        let response = HTTP_CLIENT
            .get(&self.endpoint)
            .query(&[("size", size)])
            .send()
            .await
            .map_err(|err| self.request_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|err| self.request_error(&err))?;
        let url = body.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DiscoveryError::InvalidBody {
                endpoint: self.endpoint.clone(),
                body: body.clone(),
            });
        }
        Ok(url.to_owned())
    }

    fn request_error(&self, err: &reqwest::Error) -> DiscoveryError {
        DiscoveryError::Request {
            endpoint: self.endpoint.clone(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests;
