use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::env::Env;
use crate::error::SessionError;
use crate::report::warn_user;

const CONFIG_DIR: &str = "containai";
const CONFIG_FILE: &str = "config.toml";
const WORKSPACE_CONFIG: &str = ".containai/config.toml";

/// Contents of a cai config file. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub secure_engine: SecureEngineConfig,
    #[serde(default)]
    pub image: ImageConfig,
    /// Per-workspace state keyed by absolute workspace path.
    #[serde(default)]
    pub workspace: BTreeMap<String, WorkspaceState>,
}

/// Agent defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AgentConfig {
    /// Data volume used when nothing more specific applies.
    #[serde(default)]
    pub data_volume: Option<String>,
}

/// Isolation context settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SecureEngineConfig {
    /// Docker context to prefer over the built-in fallback list.
    #[serde(default)]
    pub context_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ImageConfig {
    /// Release channel: "stable" or "nightly".
    #[serde(default)]
    pub channel: Option<String>,
}

/// What cai remembers about a workspace between invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WorkspaceState {
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub data_volume: Option<String>,
}

impl Config {
    /// Load configuration from file, using defaults if it is missing or malformed.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn_user(&format!("Ignoring unreadable config {}: {e}", path.display()));
                return Self::default();
            }
        };

        let table = match content.parse::<toml::Table>() {
            Ok(table) => table,
            Err(e) => {
                let reason = e.message().to_string();
                warn_user(&format!(
                    "Ignoring malformed config {}: {reason}",
                    path.display()
                ));
                return Self::default();
            }
        };
        debug!("Loaded config {}", path.display());
        Self::from_table(table, path)
    }

    /// Builds a config section by section so one bad key only drops its own section.
    fn from_table(mut table: toml::Table, path: &Path) -> Self {
        let mut config = Self::default();
        if let Some(value) = table.remove("agent") {
            config.agent = section(value, "agent", path).unwrap_or_default();
        }
        if let Some(value) = table.remove("secure_engine") {
            config.secure_engine = section(value, "secure_engine", path).unwrap_or_default();
        }
        if let Some(value) = table.remove("image") {
            config.image = section(value, "image", path).unwrap_or_default();
        }
        match table.remove("workspace") {
            Some(toml::Value::Table(entries)) => {
                for (workspace, value) in entries {
                    let name = format!("workspace.\"{workspace}\"");
                    if let Some(state) = section(value, &name, path) {
                        config.workspace.insert(workspace, state);
                    }
                }
            }
            Some(_) => warn_user(&format!(
                "Ignoring [workspace] in {}: not a table",
                path.display()
            )),
            None => {}
        }
        config
    }

    /// State recorded for `workspace`, if any.
    pub fn workspace_state(&self, workspace: &Path) -> Option<&WorkspaceState> {
        self.workspace.get(workspace.to_string_lossy().as_ref())
    }
}

fn section<T: DeserializeOwned>(value: toml::Value, name: &str, path: &Path) -> Option<T> {
    match value.try_into() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn_user(&format!(
                "Ignoring [{name}] in {}: {}",
                path.display(),
                e.message()
            ));
            None
        }
    }
}

/// `CONTAINAI_CONFIG`, else `<config home>/containai/config.toml`.
pub(crate) fn user_config_path(env: &dyn Env) -> Option<PathBuf> {
    if let Some(explicit) = env.var("CONTAINAI_CONFIG") {
        return Some(PathBuf::from(explicit));
    }
    env.config_home()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Walks up from `workspace` for `.containai/config.toml`.
///
/// The walk stops after the first directory containing `.git`, so a
/// repository never picks up config from outside itself.
pub(crate) fn find_workspace_config(workspace: &Path) -> Option<PathBuf> {
    for dir in workspace.ancestors() {
        let candidate = dir.join(WORKSPACE_CONFIG);
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir.join(".git").exists() {
            break;
        }
    }
    None
}

/// The config files consulted for one workspace.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigSet {
    /// The user's global config.
    pub user: Config,
    /// Explicit `--config` file, else the nearest workspace-local file.
    pub local: Option<Config>,
}

impl ConfigSet {
    /// Loads the user config and the workspace-local (or explicit) config.
    pub fn load(env: &dyn Env, workspace: &Path, explicit: Option<&Path>) -> Result<Self> {
        let user = user_config_path(env)
            .map(|p| Config::load(&p))
            .unwrap_or_default();

        let local_path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(SessionError::invalid_input(format!(
                        "Config file not found: {}",
                        path.display()
                    ))
                    .into());
                }
                Some(path.to_path_buf())
            }
            None => find_workspace_config(workspace),
        };
        let local = local_path.map(|p| Config::load(&p));

        Ok(Self { user, local })
    }

    /// Configured context name, workspace-local first.
    pub fn context_name(&self) -> Option<&str> {
        self.local
            .as_ref()
            .and_then(|c| c.secure_engine.context_name.as_deref())
            .or(self.user.secure_engine.context_name.as_deref())
    }

    /// Configured image channel, workspace-local first.
    pub fn channel(&self) -> Option<&str> {
        self.local
            .as_ref()
            .and_then(|c| c.image.channel.as_deref())
            .or(self.user.image.channel.as_deref())
    }

    /// The file that answers workspace-local and `agent.*` lookups.
    pub fn nearest(&self) -> &Config {
        self.local.as_ref().unwrap_or(&self.user)
    }
}

/// Records `state` for `workspace` in the config at `path`.
///
/// Edits the parsed table in place so unrelated keys survive. An existing
/// file that does not parse is left untouched and reported as an error.
pub(crate) fn save_workspace_state(
    path: &Path,
    workspace: &Path,
    state: &WorkspaceState,
) -> Result<()> {
    let mut table = match fs::read_to_string(path) {
        Ok(content) => content
            .parse::<toml::Table>()
            .with_context(|| format!("Refusing to rewrite malformed config: {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read config file: {}", path.display()))
        }
    };

    let workspaces = table
        .entry("workspace")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    let toml::Value::Table(workspaces) = workspaces else {
        anyhow::bail!(
            "Refusing to rewrite config {}: 'workspace' is not a table",
            path.display()
        );
    };

    let entry = toml::Value::try_from(state).context("Failed to serialize workspace state")?;
    workspaces.insert(workspace.to_string_lossy().into_owned(), entry);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let content = toml::to_string_pretty(&table).context("Failed to serialize config")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    debug!(
        "Persisted workspace state for {} in {}",
        workspace.display(),
        path.display()
    );
    Ok(())
}
