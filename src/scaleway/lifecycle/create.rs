//! Instance creation helpers for the Scaleway backend.
//!
//! Scaleway instances must receive cloud-init user-data before first boot.
//! The creation request sets `stopped: true` so the payload is available when
//! the instance is powered on.

use serde::{Deserialize, Serialize};

use crate::scaleway::types::{Action, Zone};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::InstanceSnapshot;

/// Per-machine inputs for a server creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ServerSpec {
    pub(crate) name: String,
    pub(crate) image_id: String,
    pub(crate) tags: Vec<String>,
    pub(crate) cloud_init: Option<String>,
}

#[derive(Serialize)]
pub(in crate::scaleway) struct CreateServerRequest<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: &'a [String],
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_init: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: scaleway_rs::ScalewayInstance,
}

impl ScalewayBackend {
    pub(in crate::scaleway) fn is_instance_type_error(
        &self,
        api_err: &scaleway_rs::ScalewayApiError,
    ) -> bool {
        let commercial_type = self.config.default_instance_type.as_str();
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == commercial_type)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    }

    pub(in crate::scaleway) fn create_payload<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> CreateServerRequest<'a> {
        CreateServerRequest {
            name: &spec.name,
            commercial_type: &self.config.default_instance_type,
            image: &spec.image_id,
            project: &self.config.default_project_id,
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: &spec.tags,
            stopped: true,
            cloud_init: spec.cloud_init.as_deref(),
            organization: self.config.default_organization_id.as_deref(),
        }
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        if snapshot.state.is_running() {
            return Ok(());
        }

        if snapshot
            .allowed_actions
            .iter()
            .any(|action| action.as_str() == Action::POWER_ON)
        {
            self.perform_action(&snapshot.id, Action::POWER_ON).await?;
            return Ok(());
        }

        Err(ScalewayBackendError::PowerOnNotAllowed {
            instance_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.as_str().to_owned(),
        })
    }

    /// Creates a Scaleway instance in a stopped state.
    ///
    /// The instance is created with `stopped: true` so that cloud-init
    /// user-data is in place for the first boot after power-on.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError`] when the Scaleway API request fails or
    /// the provider rejects the configured instance type.
    pub(in crate::scaleway) async fn create_server_stopped(
        &self,
        spec: &ServerSpec,
    ) -> Result<InstanceSnapshot, ScalewayBackendError> {
        let zone = self.zone();
        let url = format!("{}/zones/{zone}/servers", super::SCALEWAY_INSTANCE_API_BASE);

        let response = super::HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .json(&self.create_payload(spec))
            .send()
            .await
            .map_err(|err| ScalewayBackendError::Provider {
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ScalewayBackendError::Provider {
                message: err.to_string(),
            })?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(|err| ScalewayBackendError::Provider {
                    message: err.to_string(),
                })?;
            return Ok(InstanceSnapshot::from(parsed.server));
        }

        Err(self.creation_error(&zone, &body))
    }

    pub(in crate::scaleway) fn creation_error(
        &self,
        zone: &Zone,
        body: &[u8],
    ) -> ScalewayBackendError {
        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(body)
            && self.is_instance_type_error(&api_err)
        {
            return ScalewayBackendError::InstanceTypeUnavailable {
                instance_type: self.config.default_instance_type.clone(),
                zone: zone.as_str().to_owned(),
            };
        }
        ScalewayBackendError::Provider {
            message: String::from_utf8_lossy(body).into_owned(),
        }
    }
}
