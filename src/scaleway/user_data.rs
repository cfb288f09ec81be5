//! SSH key injection for Scaleway machines.
//!
//! Keys reach a machine two ways: appended to `#cloud-config` user-data, and
//! as `AUTHORIZED_KEY` server tags that the Scaleway image agent installs on
//! boot. Tests opt out of either through their flags.

/// Header identifying cloud-config user-data.
pub(crate) const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

const AUTHORIZED_KEYS_FIELD: &str = "ssh_authorized_keys:";

/// Adds `key` to the authorised keys of cloud-config `user_data`.
///
/// Empty user-data becomes a minimal cloud-config document. Any other format
/// (scripts, Ignition) is returned unchanged.
pub(crate) fn with_authorized_key(user_data: &str, key: &str) -> String {
    let trimmed = key.trim();
    if user_data.trim().is_empty() {
        return format!("{CLOUD_CONFIG_HEADER}\n{AUTHORIZED_KEYS_FIELD}\n  - {trimmed}\n");
    }
    if !user_data.trim_start().starts_with(CLOUD_CONFIG_HEADER) {
        return user_data.to_owned();
    }

    let mut lines: Vec<String> = user_data.lines().map(str::to_owned).collect();
    let entry = format!("  - {trimmed}");
    let existing = lines
        .iter()
        .position(|line| line.trim_end() == AUTHORIZED_KEYS_FIELD);
    if existing.is_none() {
        lines.push(AUTHORIZED_KEYS_FIELD.to_owned());
    }
    let insert_at = existing.map_or(lines.len(), |index| index + 1);
    lines.insert(insert_at, entry);
    let mut document = lines.join("\n");
    document.push('\n');
    document
}

/// Server tag that installs `key` for the default user.
///
/// The tag format replaces spaces with underscores.
pub(crate) fn authorized_key_tag(key: &str) -> String {
    format!("AUTHORIZED_KEY={}", key.trim().replace(' ', "_"))
}
