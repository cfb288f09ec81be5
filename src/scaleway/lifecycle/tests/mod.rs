//! Unit tests for Scaleway lifecycle helpers.

mod wait;

use std::collections::HashMap;
use std::time::Duration;

use rstest::rstest;
use scaleway_rs::{ScalewayApi, ScalewayImage};
use serde_json::json;

use super::action::Teardown;
use super::image::ImageQuery;
use super::{InstanceSnapshot, ServerSpec};
use crate::config::ScalewayConfig;
use crate::scaleway::DEFAULT_SSH_PORT;
use crate::scaleway::types::{Action, InstanceId, InstanceState, Zone};
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};

fn snapshot(
    id: impl Into<InstanceId>,
    state: impl Into<InstanceState>,
    allowed: impl IntoIterator<Item = impl Into<Action>>,
    public_ip: Option<&str>,
) -> InstanceSnapshot {
    InstanceSnapshot {
        id: id.into(),
        state: state.into(),
        allowed_actions: allowed.into_iter().map(Into::into).collect(),
        public_ip: public_ip.map(str::to_owned),
    }
}

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

impl ImageSpec {
    const fn available(id: &'static str, creation_date: &'static str) -> Self {
        Self {
            id,
            arch: "x86_64",
            state: "available",
            creation_date,
        }
    }
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn dummy_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: None,
        secret_key: String::from("dummy"),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("fr-par-1"),
        default_instance_type: String::from("DEV1-S"),
        default_image: String::from("Flatcar Stable"),
        default_architecture: String::from("x86_64"),
    }
}

fn query() -> ImageQuery {
    ImageQuery::from(&dummy_config())
}

fn backend_fixture(ssh_port: u16) -> ScalewayBackend {
    ScalewayBackend {
        api: ScalewayApi::new("dummy"),
        config: dummy_config(),
        ssh_port,
        poll_interval: Duration::from_millis(1),
        wait_timeout: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn power_on_if_needed_returns_ok_for_running() {
    let snap = snapshot("id", "running", [Action::POWER_ON], Some("192.0.2.1"));
    let result = backend_fixture(DEFAULT_SSH_PORT)
        .power_on_if_needed(&snap)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn power_on_if_needed_errors_when_not_allowed() {
    let snap = snapshot("id", "stopped", Vec::<Action>::new(), None);
    let result = backend_fixture(DEFAULT_SSH_PORT)
        .power_on_if_needed(&snap)
        .await;
    assert_eq!(
        result,
        Err(ScalewayBackendError::PowerOnNotAllowed {
            instance_id: String::from("id"),
            state: String::from("stopped"),
        })
    );
}

#[rstest]
#[case::running("running", &["poweroff", Action::TERMINATE], Teardown::Terminate)]
#[case::running_without_terminate("running", &["poweroff"], Teardown::Settle)]
#[case::stopped("stopped", &[Action::POWER_ON], Teardown::Delete)]
#[case::stopped_in_place("stopped in place", &[Action::POWER_ON], Teardown::Delete)]
#[case::starting("starting", &[], Teardown::Settle)]
#[case::stopping("stopping", &[], Teardown::Settle)]
fn teardown_follows_server_state(
    #[case] state: &str,
    #[case] allowed: &[&str],
    #[case] expected: Teardown,
) {
    let snap = snapshot("id", state, allowed.iter().copied(), None);

    assert_eq!(Teardown::for_server(&snap), expected);
}

#[rstest]
#[case::running("running", Some("192.0.2.4"), Some("192.0.2.4"))]
#[case::still_starting("starting", Some("192.0.2.4"), None)]
#[case::no_address("running", None, None)]
#[case::unparseable("running", Some("pending"), None)]
fn address_is_reported_once_running(
    #[case] state: &str,
    #[case] public_ip: Option<&str>,
    #[case] expected: Option<&str>,
) {
    let snap = snapshot("id", state, Vec::<Action>::new(), public_ip);

    assert_eq!(
        snap.running_address().map(|ip| ip.to_string()).as_deref(),
        expected
    );
}

#[test]
fn create_payload_carries_configuration_and_user_data() {
    let backend = backend_fixture(DEFAULT_SSH_PORT);
    let spec = ServerSpec {
        name: String::from("sortie-run-0-m0"),
        image_id: String::from("img-1"),
        tags: vec![String::from("sortie"), String::from("sortie-run-run")],
        cloud_init: Some(String::from("#cloud-config\n")),
    };

    let payload = serde_json::to_value(backend.create_payload(&spec)).expect("serialise");

    assert_eq!(
        payload,
        json!({
            "name": "sortie-run-0-m0",
            "commercial_type": "DEV1-S",
            "image": "img-1",
            "project": "proj",
            "routed_ip_enabled": true,
            "dynamic_ip_required": true,
            "tags": ["sortie", "sortie-run-run"],
            "stopped": true,
            "cloud_init": "#cloud-config\n",
        })
    );
}

#[test]
fn create_payload_omits_empty_user_data() {
    let backend = backend_fixture(DEFAULT_SSH_PORT);
    let spec = ServerSpec {
        name: String::from("n"),
        image_id: String::from("i"),
        tags: Vec::new(),
        cloud_init: None,
    };

    let payload = serde_json::to_value(backend.create_payload(&spec)).expect("serialise");

    assert!(payload.get("cloud_init").is_none());
}

#[test]
fn creation_error_keeps_unparsed_body() {
    let backend = backend_fixture(DEFAULT_SSH_PORT);

    let err = backend.creation_error(&Zone::from("fr-par-1"), b"quota exceeded");

    assert_eq!(
        err,
        ScalewayBackendError::Provider {
            message: String::from("quota exceeded"),
        }
    );
}
