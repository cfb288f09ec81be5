//! Tests for the wait loops and their deadlines.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::net::TcpListener;

use super::super::wait::Deadline;
use super::backend_fixture;
use crate::platform::PlatformError;
use crate::scaleway::ScalewayBackendError;
use crate::scaleway::types::InstanceId;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[tokio::test]
async fn wait_for_ssh_ready_succeeds_once_port_accepts() {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let backend = backend_fixture(port);

    let result = backend
        .wait_for_ssh_ready(&InstanceId::from("srv-1"), LOOPBACK)
        .await;

    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn wait_for_ssh_ready_times_out_on_closed_port() {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    let backend = backend_fixture(port);

    let result = backend
        .wait_for_ssh_ready(&InstanceId::from("srv-1"), LOOPBACK)
        .await;

    assert_eq!(
        result,
        Err(ScalewayBackendError::Timeout {
            action: String::from("wait_for_ssh_ready"),
            instance_id: String::from("srv-1"),
        })
    );
}

#[tokio::test]
async fn deadline_runs_out_after_its_budget() {
    let deadline = Deadline::after(Duration::ZERO, Duration::from_millis(2));
    let generous = Deadline::after(Duration::from_secs(60), Duration::ZERO);

    deadline.pause().await;

    assert!(deadline.expired());
    assert!(!generous.expired());
}

#[test]
fn machine_timeout_surfaces_as_platform_timeout() {
    let err = ScalewayBackendError::timeout("wait_until_gone", &InstanceId::from("srv-9"));

    assert_eq!(
        PlatformError::from(err),
        PlatformError::Timeout {
            action: String::from("wait_until_gone"),
            machine_id: String::from("srv-9"),
        }
    );
}
