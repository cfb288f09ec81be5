//! OS version probing on a throwaway machine.

use std::sync::Arc;

use camino::Utf8Path;
use semver::Version;
use tracing::{info, warn};

use super::{ClusterGuard, HarnessError};
use crate::platform::{Cluster, Flight, RuntimeConfig};

/// Subdirectory of the run directory used by the probe cluster.
pub const PROBE_DIR: &str = "version-probe";

/// Boots one machine, reads its OS version, and destroys it again.
///
/// The probe cluster is always destroyed, whatever the removal setting.
///
/// # Errors
///
/// Returns [`HarnessError::VersionProbe`] when the machine cannot be created
/// or its version cannot be read.
pub async fn probe_version(
    flight: &dyn Flight,
    run_dir: &Utf8Path,
) -> Result<Version, HarnessError> {
    let runtime = RuntimeConfig {
        output_dir: run_dir.join(PROBE_DIR),
        ..RuntimeConfig::default()
    };
    let cluster = flight
        .new_cluster(&runtime)
        .await
        .map_err(|err| HarnessError::VersionProbe(err.to_string()))?;
    let guard = ClusterGuard::new(Arc::clone(&cluster), true);

    let version = read_version(cluster.as_ref()).await;

    if let Err(err) = guard.release().await {
        warn!(cluster = cluster.name(), error = %err, "probe teardown failed");
    }
    if let Ok(found) = &version {
        info!(version = %found, "probed OS version");
    }
    version
}

async fn read_version(cluster: &dyn Cluster) -> Result<Version, HarnessError> {
    let machine = cluster
        .new_machine("")
        .await
        .map_err(|err| HarnessError::VersionProbe(err.to_string()))?;
    let output = machine
        .ssh("cat /etc/os-release")
        .await
        .map_err(|err| HarnessError::VersionProbe(err.to_string()))?;
    if !output.is_success() {
        return Err(HarnessError::VersionProbe(format!(
            "reading /etc/os-release on {} failed: {}",
            machine.id(),
            output.stderr.trim()
        )));
    }
    parse_os_release(&output.stdout).ok_or_else(|| {
        HarnessError::VersionProbe(String::from("VERSION_ID missing from /etc/os-release"))
    })
}

/// Extracts `VERSION_ID` from os-release text as a semantic version.
///
/// Leading numeric components are kept and padded to three, so `2512.3`
/// becomes `2512.3.0` and `39` becomes `39.0.0`.
#[must_use]
pub fn parse_os_release(text: &str) -> Option<Version> {
    let raw = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("VERSION_ID="))?;
    let value = raw.trim().trim_matches(|ch| ch == '"' || ch == '\'');
    let mut components = value
        .split('.')
        .map_while(|part| part.parse::<u64>().ok())
        .take(3);
    let major = components.next()?;
    Some(Version::new(
        major,
        components.next().unwrap_or(0),
        components.next().unwrap_or(0),
    ))
}
