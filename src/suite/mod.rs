//! Built-in acceptance tests.
//!
//! Each test checks one property of a freshly booted machine. They assume a
//! systemd-based guest reachable as the configured SSH user with
//! passwordless `sudo`.

use crate::harness::probe::parse_os_release;
use crate::harness::{TestCluster, TestError};
use crate::registry::{DISCOVERY_PLACEHOLDER, RegistryError, TestDescriptor, TestRegistry};

/// Lists failed units, one per line, without decoration.
pub const FAILED_UNITS_COMMAND: &str = "systemctl --failed --no-legend --plain";

/// Machines booted by the discovery test.
pub const DISCOVERY_CLUSTER_SIZE: usize = 3;

/// Builds the registry of built-in tests.
///
/// # Errors
///
/// Returns [`RegistryError`] when a descriptor is invalid or two tests share
/// a name.
pub fn registry() -> Result<TestRegistry, RegistryError> {
    TestRegistry::new(descriptors()?)
}

fn descriptors() -> Result<Vec<TestDescriptor>, RegistryError> {
    Ok(vec![
        TestDescriptor::builder("cl.basic.ssh", ssh_round_trip)
            .cluster_size(1)
            .build()?,
        TestDescriptor::builder("cl.basic.os-release", os_release_has_version)
            .cluster_size(1)
            .build()?,
        TestDescriptor::builder("cl.basic.failed-units", no_failed_units)
            .cluster_size(1)
            .build()?,
        TestDescriptor::builder("cl.basic.reboot", survives_reboot)
            .cluster_size(1)
            .exclude_platforms(["esx"])
            .build()?,
        TestDescriptor::builder("cl.cluster.discovery", discovery_peers_reachable)
            .cluster_size(DISCOVERY_CLUSTER_SIZE)
            .user_data(discovery_user_data())
            .exclude_platforms(["qemu-unpriv"])
            .build()?,
        TestDescriptor::builder("cl.native.smoke", native_smoke)
            .cluster_size(1)
            .native_funcs(["Smoke"])
            .build()?,
    ])
}

fn discovery_user_data() -> String {
    format!(
        "#cloud-config\n\
         write_files:\n  \
           - path: /etc/sortie/discovery\n    \
             content: {DISCOVERY_PLACEHOLDER}\n"
    )
}

async fn ssh_round_trip(cluster: TestCluster) -> Result<(), TestError> {
    let machine = cluster.machine(0)?;
    cluster.ssh(machine.as_ref(), "true").await?;
    Ok(())
}

async fn os_release_has_version(cluster: TestCluster) -> Result<(), TestError> {
    let machine = cluster.machine(0)?;
    let text = cluster.ssh(machine.as_ref(), "cat /etc/os-release").await?;
    let version = parse_os_release(&text)
        .ok_or_else(|| TestError::failed("/etc/os-release has no usable VERSION_ID"))?;
    cluster.log(format!("os version {version}"));
    Ok(())
}

async fn no_failed_units(cluster: TestCluster) -> Result<(), TestError> {
    let machine = cluster.machine(0)?;
    let listing = cluster.ssh(machine.as_ref(), FAILED_UNITS_COMMAND).await?;
    let failed: Vec<&str> = listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    if failed.is_empty() {
        return Ok(());
    }
    Err(TestError::Failed(format!(
        "failed units: {}",
        failed.join(", ")
    )))
}

async fn survives_reboot(cluster: TestCluster) -> Result<(), TestError> {
    let machine = cluster.machine(0)?;
    machine.reboot().await?;
    cluster.ssh(machine.as_ref(), "true").await?;
    Ok(())
}

async fn discovery_peers_reachable(cluster: TestCluster) -> Result<(), TestError> {
    let machines = cluster.machines();
    if machines.len() != DISCOVERY_CLUSTER_SIZE {
        return Err(TestError::Failed(format!(
            "expected {DISCOVERY_CLUSTER_SIZE} machines, found {}",
            machines.len()
        )));
    }
    for machine in &machines {
        cluster
            .ssh(machine.as_ref(), "test -s /etc/sortie/discovery")
            .await?;
        for peer in machines.iter().filter(|peer| peer.id() != machine.id()) {
            cluster
                .ssh(machine.as_ref(), &format!("ping -c 1 -W 5 {}", peer.ip()))
                .await?;
        }
    }
    Ok(())
}

async fn native_smoke(cluster: TestCluster) -> Result<(), TestError> {
    let machine = cluster.machine(0)?;
    let output = cluster.run_native("Smoke", machine.as_ref()).await?;
    if !output.is_empty() {
        cluster.log(output);
    }
    Ok(())
}

#[cfg(test)]
mod tests;
