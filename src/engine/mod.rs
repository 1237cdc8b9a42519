//! Container engine capability.
//!
//! Everything cai needs from Docker goes through the narrow
//! `ContainerEngine` trait, so resolution and provisioning can run against
//! an in-memory fake in tests.

mod docker;
#[cfg(test)]
pub(crate) mod fake;

pub(crate) use docker::DockerCli;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Marks a container as created by cai.
pub(crate) const LABEL_MANAGED: &str = "containai.managed";
/// Absolute host path of the bound workspace.
pub(crate) const LABEL_WORKSPACE: &str = "containai.workspace";
/// Name of the bound data volume.
pub(crate) const LABEL_DATA_VOLUME: &str = "containai.data-volume";
/// Host port forwarded to the container's sshd.
pub(crate) const LABEL_SSH_PORT: &str = "containai.ssh-port";
/// Template the container was created from.
pub(crate) const LABEL_TEMPLATE: &str = "containai.template";

/// Image prefixes that identify cai containers created before labels existed.
pub(crate) const OWNED_IMAGE_PREFIXES: &[&str] =
    &["ghcr.io/containai/", "containai:", "containai-template-"];

/// Context that always exists and is never probed.
pub(crate) const DEFAULT_CONTEXT: &str = "default";

/// Output of a captured subprocess.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Snapshot of a container's cai labels and lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ContainerLabelState {
    pub exists: bool,
    pub owned: bool,
    pub workspace: Option<String>,
    pub data_volume: Option<String>,
    pub ssh_port: Option<u16>,
    pub state: String,
}

impl ContainerLabelState {
    /// A container that does not exist.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Parses `managed|workspace|data-volume|ssh-port|state|image`.
    ///
    /// Any other field count means the output cannot be trusted and the
    /// container is reported as absent.
    pub fn from_inspect_line(line: &str) -> Self {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('|').collect();
        let [managed, workspace, volume, port, state, image] = fields.as_slice() else {
            return Self::absent();
        };

        let owned = label_value(managed).as_deref() == Some("true")
            || OWNED_IMAGE_PREFIXES.iter().any(|p| image.starts_with(*p));

        Self {
            exists: true,
            owned,
            workspace: label_value(workspace),
            data_volume: label_value(volume),
            ssh_port: label_value(port).and_then(|p| p.parse().ok()),
            state: state.trim().to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Go templates print `<no value>` for missing map keys on some engines.
fn label_value(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "<no value>" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Everything needed for one `docker run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunSpec {
    pub name: String,
    pub image: String,
    pub runtime: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub ssh_port: u16,
    /// `(source, target)` pairs; source is a volume name or host path.
    pub mounts: Vec<(String, String)>,
    pub env: BTreeMap<String, String>,
    pub memory: Option<String>,
    pub cpus: Option<String>,
}

/// Narrow view of a docker-compatible engine, addressed per context.
#[async_trait]
pub(crate) trait ContainerEngine: Send + Sync {
    /// Reads labels and state; a missing container yields `exists == false`.
    async fn inspect(&self, context: &str, name: &str) -> Result<ContainerLabelState>;

    /// Names of all containers (any state) carrying `label=value`.
    async fn list_by_label(&self, context: &str, label: &str, value: &str)
        -> Result<Vec<String>>;

    /// Values of `label` across all containers that carry it.
    async fn label_values(&self, context: &str, label: &str) -> Result<Vec<String>>;

    /// Whether the named docker context is configured.
    async fn context_exists(&self, context: &str) -> Result<bool>;

    /// Creates a named volume; succeeds if it already exists.
    async fn create_volume(&self, context: &str, name: &str) -> Result<()>;

    /// Creates and starts a detached container.
    async fn run(&self, context: &str, spec: &RunSpec) -> Result<()>;

    async fn start(&self, context: &str, name: &str) -> Result<()>;

    async fn stop(&self, context: &str, name: &str) -> Result<()>;

    async fn remove(&self, context: &str, name: &str) -> Result<()>;

    /// Runs `sh -c script` inside the container as `user`.
    async fn exec(
        &self,
        context: &str,
        name: &str,
        user: &str,
        script: &str,
    ) -> Result<CommandOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_managed_container() {
        let state = ContainerLabelState::from_inspect_line(
            "true|/home/u/proj|containai-data|2300|running|ghcr.io/containai/agents:latest\n",
        );
        assert!(state.exists);
        assert!(state.owned);
        assert_eq!(state.workspace.as_deref(), Some("/home/u/proj"));
        assert_eq!(state.data_volume.as_deref(), Some("containai-data"));
        assert_eq!(state.ssh_port, Some(2300));
        assert!(state.is_running());
    }

    #[test]
    fn test_parse_ownership_from_image_prefix() {
        let state = ContainerLabelState::from_inspect_line(
            "<no value>|<no value>|<no value>|<no value>|exited|containai:legacy",
        );
        assert!(state.exists);
        assert!(state.owned);
        assert_eq!(state.workspace, None);
        assert_eq!(state.ssh_port, None);
        assert!(!state.is_running());
    }

    #[test]
    fn test_parse_foreign_container() {
        let state = ContainerLabelState::from_inspect_line("||||running|nginx:latest");
        assert!(state.exists);
        assert!(!state.owned);
    }

    #[test]
    fn test_parse_wrong_field_count_fails_closed() {
        assert_eq!(
            ContainerLabelState::from_inspect_line("true|/ws|vol|2300|running"),
            ContainerLabelState::absent()
        );
        assert_eq!(
            ContainerLabelState::from_inspect_line("true|/a|b|/ws|vol|2300|running|img"),
            ContainerLabelState::absent()
        );
        assert!(!ContainerLabelState::from_inspect_line("").exists);
    }

    #[test]
    fn test_parse_bad_port_is_none() {
        let state = ContainerLabelState::from_inspect_line("true|/ws|vol|abc|running|img");
        assert_eq!(state.ssh_port, None);
    }
}
