//! `cai run`, `cai shell` and `cai exec`.
//!
//! Input is validated first, then the target is resolved, provisioned and
//! bootstrapped (the prepare phase, which Ctrl-C aborts), and finally the
//! SSH session runs in the foreground.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{save_workspace_state, user_config_path, ConfigSet, WorkspaceState};
use crate::engine::{ContainerEngine, DockerCli};
use crate::env::{Env, ProcessEnv};
use crate::error::SessionError;
use crate::git::{BranchSource, GitCli};
use crate::options::{Mode, SessionCommandOptions};
use crate::poll::Poll;
use crate::provision::image::{image_reference, resolve_channel};
use crate::provision::{host_timezone, EnsuredSession, HostPorts, Provisioner, SocketTable};
use crate::report::{progress, warn_user};
use crate::resolve::{validate_options, Resolution, Resolver};
use crate::session::{
    parse_env_assignments, plan_remote, stdin_is_tty, RemotePlan, SessionOutcome, SessionRunner,
};
use crate::shell::display_command;
use crate::ssh::{OpenSsh, SshBootstrap, SshClient, SshPaths};

/// Container must report `running` within 30 × 500 ms.
pub(crate) const RUNNING_POLL: Poll = Poll::new(30, Duration::from_millis(500));

/// sshd must answer keyscan within 60 × 500 ms.
pub(crate) const SSH_READY_POLL: Poll = Poll::new(60, Duration::from_millis(500));

/// Everything a session talks to outside this process.
pub(crate) struct Capabilities<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub git: &'a dyn BranchSource,
    pub env: &'a dyn Env,
    pub host_ports: &'a dyn HostPorts,
    pub ssh: &'a dyn SshClient,
    /// Derived from the environment on first use when `None`.
    pub ssh_paths: Option<SshPaths>,
    pub timezone: String,
    pub running_poll: Poll,
    pub ssh_poll: Poll,
}

impl Capabilities<'_> {
    fn ssh_paths(&self) -> Result<SshPaths> {
        match &self.ssh_paths {
            Some(paths) => Ok(paths.clone()),
            None => SshPaths::from_env(self.env),
        }
    }
}

/// Result of the prepare phase.
#[derive(Debug)]
pub(crate) enum Prepared {
    /// `--dry-run`: the report to print, nothing was changed.
    DryRun(String),
    Ready(EnsuredSession),
}

/// Runs one session command against the real engine and OpenSSH.
///
/// Returns the process exit code.
pub async fn run(opts: SessionCommandOptions) -> Result<i32> {
    let env = ProcessEnv;
    let engine = DockerCli::default();
    let ssh = OpenSsh;
    let caps = Capabilities {
        engine: &engine,
        git: &GitCli,
        env: &env,
        host_ports: &SocketTable,
        ssh: &ssh,
        ssh_paths: None,
        timezone: host_timezone(&env),
        running_poll: RUNNING_POLL,
        ssh_poll: SSH_READY_POLL,
    };
    execute(&opts, &caps, stdin_is_tty(), tokio::signal::ctrl_c()).await
}

/// Full command flow with injected capabilities and interrupt signal.
pub(crate) async fn execute<I>(
    opts: &SessionCommandOptions,
    caps: &Capabilities<'_>,
    stdin_tty: bool,
    interrupt: I,
) -> Result<i32>
where
    I: Future<Output = std::io::Result<()>>,
{
    validate_options(opts)?;
    let vars = parse_env_assignments(&opts.env, caps.env)?;
    let plan = plan_remote(opts, &vars, stdin_tty)?;

    let prepared = tokio::select! {
        biased;
        _ = interrupt => return Err(SessionError::Interrupted.into()),
        prepared = prepare(opts, &plan, caps) => prepared?,
    };

    let session = match prepared {
        Prepared::DryRun(report) => {
            print!("{report}");
            return Ok(0);
        }
        Prepared::Ready(session) => session,
    };

    let ssh_paths = caps.ssh_paths()?;
    let runner = SessionRunner {
        ssh: caps.ssh,
        paths: &ssh_paths,
    };
    let outcome = runner.run(&session, &plan).await?;
    if let SessionOutcome::Detached { pid } = outcome {
        progress(
            opts.quiet,
            &format!("Running in background in {} (pid {pid})", session.container_name),
        );
        println!("{pid}");
    }
    Ok(outcome.exit_code())
}

/// Resolves, provisions and bootstraps; or describes that for `--dry-run`.
pub(crate) async fn prepare(
    opts: &SessionCommandOptions,
    plan: &RemotePlan,
    caps: &Capabilities<'_>,
) -> Result<Prepared> {
    let resolver = Resolver {
        engine: caps.engine,
        git: caps.git,
        env: caps.env,
    };
    let resolution = resolver.resolve(opts).await?;

    if opts.dry_run {
        return Ok(Prepared::DryRun(format_dry_run(&resolution, plan)));
    }

    let target = &resolution.target;
    if target.generated_from_reset {
        progress(
            opts.quiet,
            &format!("Resetting with new data volume {}", target.data_volume),
        );
    }

    let configs = ConfigSet::load(caps.env, &target.workspace, opts.config.as_deref())?;
    let channel = resolve_channel(opts.channel.as_deref(), caps.env, configs.channel());
    let image = image_reference(opts.image_tag.as_deref(), channel);

    let bootstrap = SshBootstrap {
        client: caps.ssh,
        engine: caps.engine,
        paths: caps.ssh_paths()?,
        ready_poll: caps.ssh_poll,
    };
    let provisioner = Provisioner {
        engine: caps.engine,
        host_ports: caps.host_ports,
        bootstrap: &bootstrap,
        image,
        timezone: caps.timezone.clone(),
        running_poll: caps.running_poll,
    };
    let session = provisioner.ensure(&resolution.options, target).await?;

    if target.should_persist_state {
        persist(caps.env, &session);
    }

    info!(
        "Session ready: {} on port {} (context {})",
        session.container_name, session.ssh_port, session.context
    );
    Ok(Prepared::Ready(session))
}

/// Records the container and volume for the workspace; failures only warn.
fn persist(env: &dyn Env, session: &EnsuredSession) {
    let Some(path) = user_config_path(env) else {
        debug!("No user config location, not persisting workspace state");
        return;
    };
    let state = WorkspaceState {
        container_name: Some(session.container_name.clone()),
        data_volume: Some(session.data_volume.clone()),
    };
    if let Err(e) = save_workspace_state(&path, &session.workspace, &state) {
        warn_user(&format!("Could not save workspace state: {e:#}"));
    }
}

/// `KEY=value` lines describing what a real run would do.
pub(crate) fn format_dry_run(resolution: &Resolution, plan: &RemotePlan) -> String {
    let target = &resolution.target;
    let opts = &resolution.options;

    let mut lines = vec![
        "DRY_RUN=true".to_string(),
        format!("MODE={}", opts.mode),
        format!("CONTAINER={}", target.container_name),
        format!("WORKSPACE={}", target.workspace.display()),
        format!("DATA_VOLUME={}", target.data_volume),
        format!("DOCKER_CONTEXT={}", target.context),
        format!("FRESH={}", opts.fresh),
        format!("RESET={}", opts.reset),
    ];
    match opts.mode {
        Mode::Run => {
            lines.push(format!("COMMAND={}", display_command(&plan.command)));
            lines.push(format!("DETACHED={}", opts.detached));
        }
        Mode::Exec => lines.push(format!("COMMAND={}", display_command(&plan.command))),
        Mode::Shell => {}
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
