//! Data volume resolution.

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::config::ConfigSet;
use crate::env::Env;
use crate::error::SessionError;
use crate::naming::is_valid_volume_name;

/// Volume used when no flag, variable or config names one.
pub(crate) const DEFAULT_DATA_VOLUME: &str = "containai-data";

/// Environment override for the data volume.
pub(crate) const DATA_VOLUME_ENV: &str = "CONTAINAI_DATA_VOLUME";

/// Picks the data volume for `workspace`.
///
/// Priority: `--data-volume`, `CONTAINAI_DATA_VOLUME`, the user config's
/// entry for this workspace, the workspace-local config's entry, that
/// config's `agent.data_volume`, then the built-in default. Invalid values
/// from the flag or the variable are errors; invalid config values are
/// skipped.
pub(crate) fn resolve_volume(
    workspace: &Path,
    explicit: Option<&str>,
    env: &dyn Env,
    configs: &ConfigSet,
) -> Result<String> {
    if let Some(volume) = explicit {
        return checked(volume, "--data-volume");
    }

    if let Some(volume) = env.var(DATA_VOLUME_ENV) {
        return checked(&volume, DATA_VOLUME_ENV);
    }

    let config_candidates = [
        (
            "user config workspace entry",
            configs
                .user
                .workspace_state(workspace)
                .and_then(|s| s.data_volume.as_deref()),
        ),
        (
            "workspace config entry",
            configs
                .local
                .as_ref()
                .and_then(|c| c.workspace_state(workspace))
                .and_then(|s| s.data_volume.as_deref()),
        ),
        (
            "agent.data_volume",
            configs.nearest().agent.data_volume.as_deref(),
        ),
    ];

    for (source, candidate) in config_candidates {
        let Some(volume) = candidate else {
            continue;
        };
        if is_valid_volume_name(volume) {
            debug!("Data volume '{volume}' from {source}");
            return Ok(volume.to_string());
        }
        debug!("Skipping invalid data volume '{volume}' from {source}");
    }

    Ok(DEFAULT_DATA_VOLUME.to_string())
}

fn checked(volume: &str, source: &str) -> Result<String> {
    if is_valid_volume_name(volume) {
        Ok(volume.to_string())
    } else {
        Err(SessionError::invalid_input(format!(
            "Invalid data volume name '{volume}' from {source}: \
             must match [A-Za-z0-9][A-Za-z0-9._-]* and be at most 255 characters"
        ))
        .into())
    }
}
