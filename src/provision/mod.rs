//! Container provisioning.
//!
//! Takes a resolved target and guarantees a running, SSH-reachable
//! container for it: removes it first on `--fresh`, creates it when
//! missing, starts it when stopped, then hands off to SSH bootstrap.

pub(crate) mod image;
pub(crate) mod ports;

pub(crate) use ports::{HostPorts, SocketTable};

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::engine::{
    ContainerEngine, ContainerLabelState, RunSpec, LABEL_DATA_VOLUME, LABEL_MANAGED,
    LABEL_SSH_PORT, LABEL_TEMPLATE, LABEL_WORKSPACE,
};
use crate::env::Env;
use crate::error::SessionError;
use crate::options::SessionCommandOptions;
use crate::poll::Poll;
use crate::report::progress;
use crate::resolve::ResolvedTarget;
use crate::ssh::SshBootstrap;
use ports::allocate_ssh_port;

/// Where the workspace is bind-mounted inside the container.
pub(crate) const WORKSPACE_MOUNT: &str = "/home/agent/workspace";

/// Where the data volume is mounted inside the container.
pub(crate) const DATA_MOUNT: &str = "/mnt/agent-data";

/// OCI runtime for system containers.
pub(crate) const RUNTIME: &str = "sysbox-runc";

/// Env var carrying the host-side workspace path into the container.
pub(crate) const HOST_WORKSPACE_ENV: &str = "CAI_HOST_WORKSPACE";

/// A resolved target that is running and accepts SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnsuredSession {
    pub container_name: String,
    pub workspace: PathBuf,
    pub data_volume: String,
    pub context: String,
    pub ssh_port: u16,
}

/// Host timezone for the container's `TZ`.
pub(crate) fn host_timezone(env: &dyn Env) -> String {
    timezone_from(env, Path::new("/etc"))
}

fn timezone_from(env: &dyn Env, etc: &Path) -> String {
    if let Some(tz) = env.var("TZ") {
        return tz.trim_start_matches(':').to_string();
    }

    if let Ok(contents) = std::fs::read_to_string(etc.join("timezone")) {
        let tz = contents.trim();
        if !tz.is_empty() {
            return tz.to_string();
        }
    }

    if let Ok(target) = std::fs::read_link(etc.join("localtime")) {
        let target = target.to_string_lossy();
        if let Some((_, zone)) = target.split_once("zoneinfo/") {
            if !zone.is_empty() {
                return zone.to_string();
            }
        }
    }

    "UTC".to_string()
}

/// Brings resolved targets up.
pub(crate) struct Provisioner<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub host_ports: &'a dyn HostPorts,
    pub bootstrap: &'a SshBootstrap<'a>,
    pub image: String,
    pub timezone: String,
    pub running_poll: Poll,
}

impl Provisioner<'_> {
    /// Makes `target` a running container with SSH trust established.
    pub async fn ensure(
        &self,
        opts: &SessionCommandOptions,
        target: &ResolvedTarget,
    ) -> Result<EnsuredSession> {
        let name = &target.container_name;
        let context = &target.context;

        let mut state = self.engine.inspect(context, name).await?;
        if state.exists && target.created_by_this_invocation {
            debug!("'{name}' appeared after resolution, treating it as existing");
        }

        if state.exists && !state.owned {
            return Err(SessionError::not_owned(name.as_str(), opts.mode).into());
        }

        if state.exists && opts.fresh {
            progress(opts.quiet, &format!("Removing container {name}"));
            if let Err(e) = self.engine.stop(context, name).await {
                debug!("Stopping '{name}' before removal failed: {e:#}");
            }
            self.engine.remove(context, name).await?;
            state = ContainerLabelState::absent();
        }

        if state.exists {
            if let (Some(requested), Some(bound)) =
                (opts.data_volume.as_deref(), state.data_volume.as_deref())
            {
                if requested != bound {
                    return Err(SessionError::conflict(format!(
                        "Container '{name}' uses data volume '{bound}', not '{requested}'; \
                         pass --fresh to recreate it with the new volume"
                    ))
                    .into());
                }
            }
        }

        let (ssh_port, data_volume) = if state.exists {
            self.reuse(opts, target, &state).await?
        } else {
            (self.create(opts, target).await?, target.data_volume.clone())
        };

        self.bootstrap.ensure_trust(name, context, ssh_port).await?;

        Ok(EnsuredSession {
            container_name: name.clone(),
            workspace: target.workspace.clone(),
            data_volume,
            context: context.clone(),
            ssh_port,
        })
    }

    async fn create(&self, opts: &SessionCommandOptions, target: &ResolvedTarget) -> Result<u16> {
        let name = &target.container_name;
        let context = &target.context;

        self.engine.create_volume(context, &target.data_volume).await?;
        let ssh_port = allocate_ssh_port(self.engine, context, self.host_ports).await?;

        let spec = self.run_spec(opts, target, ssh_port);
        progress(
            opts.quiet,
            &format!("Creating container {name} from {} (ssh port {ssh_port})", spec.image),
        );
        self.engine.run(context, &spec).await?;

        self.wait_until_running(context, name).await?;
        info!("Created container '{name}' in context '{context}'");
        Ok(ssh_port)
    }

    async fn reuse(
        &self,
        opts: &SessionCommandOptions,
        target: &ResolvedTarget,
        state: &ContainerLabelState,
    ) -> Result<(u16, String)> {
        let name = &target.container_name;
        let context = &target.context;

        let ssh_port = match state.ssh_port {
            Some(port) => port,
            None => {
                warn!("Container '{name}' has no ssh-port label, allocating one");
                allocate_ssh_port(self.engine, context, self.host_ports).await?
            }
        };

        if !state.is_running() {
            progress(opts.quiet, &format!("Starting container {name}"));
            self.engine.start(context, name).await?;
        }

        let data_volume = state
            .data_volume
            .clone()
            .unwrap_or_else(|| target.data_volume.clone());
        debug!("Reusing '{name}' (port {ssh_port}, volume {data_volume})");
        Ok((ssh_port, data_volume))
    }

    fn run_spec(
        &self,
        opts: &SessionCommandOptions,
        target: &ResolvedTarget,
        ssh_port: u16,
    ) -> RunSpec {
        let workspace = target.workspace.to_string_lossy().into_owned();

        let mut labels = BTreeMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_WORKSPACE.to_string(), workspace.clone()),
            (LABEL_DATA_VOLUME.to_string(), target.data_volume.clone()),
            (LABEL_SSH_PORT.to_string(), ssh_port.to_string()),
        ]);
        if let Some(template) = &opts.template {
            labels.insert(LABEL_TEMPLATE.to_string(), template.clone());
        }

        RunSpec {
            name: target.container_name.clone(),
            image: self.image.clone(),
            runtime: Some(RUNTIME.to_string()),
            labels,
            ssh_port,
            mounts: vec![
                (target.data_volume.clone(), DATA_MOUNT.to_string()),
                (workspace.clone(), WORKSPACE_MOUNT.to_string()),
            ],
            env: BTreeMap::from([
                (HOST_WORKSPACE_ENV.to_string(), workspace),
                ("TZ".to_string(), self.timezone.clone()),
            ]),
            memory: opts.memory.clone(),
            cpus: opts.cpus.clone(),
        }
    }

    async fn wait_until_running(&self, context: &str, name: &str) -> Result<()> {
        let mut last_state = String::new();
        for attempt in 1..=self.running_poll.attempts {
            let state = self.engine.inspect(context, name).await?;
            if state.is_running() {
                return Ok(());
            }
            last_state = state.state;
            if attempt < self.running_poll.attempts {
                tokio::time::sleep(self.running_poll.interval).await;
            }
        }
        Err(SessionError::timeout(format!(
            "Container '{name}' did not reach running state within {}s (last state: {})",
            self.running_poll.budget().as_secs(),
            if last_state.is_empty() { "unknown" } else { last_state.as_str() }
        ))
        .into())
    }
}
