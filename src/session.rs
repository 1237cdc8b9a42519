//! Remote command construction and the SSH session itself.
//!
//! Every argument is single-quoted on the way out because it passes
//! through ssh, the login shell and, for `exec`, `bash -lc`.

use anyhow::Result;
use std::io::IsTerminal;
use tracing::debug;

use crate::env::Env;
use crate::error::{trimmed_stderr, SessionError};
use crate::options::{Mode, SessionCommandOptions};
use crate::provision::{EnsuredSession, WORKSPACE_MOUNT};
use crate::report::warn_user;
use crate::shell::{quote_all, shell_quote};
use crate::ssh::{SshClient, SshPaths};

/// Agent started by `cai run` when no command is given.
pub(crate) const DEFAULT_AGENT_COMMAND: &str = "claude";

/// Whether ssh allocates a pseudo-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tty {
    /// `-tt`
    Force,
    /// `-T`
    Disable,
}

impl Tty {
    fn flag(self) -> &'static str {
        match self {
            Self::Force => "-tt",
            Self::Disable => "-T",
        }
    }
}

/// What will run on the far side of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemotePlan {
    /// Shell text handed to ssh as the remote command.
    pub script: String,
    pub tty: Tty,
    /// Backgrounded with `nohup`; stdout carries the PID.
    pub detached: bool,
    /// The user-visible command, for dry-run output.
    pub command: Vec<String>,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    /// The remote command finished with this status.
    Exited(i32),
    /// The command keeps running in the container under this PID.
    Detached { pid: u32 },
}

impl SessionOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Detached { .. } => 0,
        }
    }
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses `-e KEY=VALUE` / `-e KEY` flags.
///
/// A bare `KEY` takes its value from the host environment and is skipped
/// with a warning when unset there.
pub(crate) fn parse_env_assignments(
    raw: &[String],
    env: &dyn Env,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for item in raw {
        let (key, value) = match item.split_once('=') {
            Some((k, v)) => (k, Some(v.to_string())),
            None => (item.as_str(), None),
        };
        if !is_env_key(key) {
            return Err(SessionError::invalid_input(format!(
                "Invalid environment variable name '{key}' in -e {item}"
            ))
            .into());
        }
        match value.or_else(|| env.var(key)) {
            Some(value) => out.push((key.to_string(), value)),
            None => warn_user(&format!("{key} is not set on the host, not forwarding it")),
        }
    }
    Ok(out)
}

fn env_prefix(vars: &[(String, String)]) -> String {
    if vars.is_empty() {
        return String::new();
    }
    let assignments: Vec<String> = vars
        .iter()
        .map(|(k, v)| format!("{k}={}", shell_quote(v)))
        .collect();
    format!("env {} ", assignments.join(" "))
}

/// Builds the remote command for `opts.mode`.
///
/// Pure: runs before any I/O so bad input fails fast.
pub(crate) fn plan_remote(
    opts: &SessionCommandOptions,
    vars: &[(String, String)],
    stdin_is_tty: bool,
) -> Result<RemotePlan> {
    let cd = format!("cd {}", shell_quote(WORKSPACE_MOUNT));
    let interactive_tty = if stdin_is_tty { Tty::Force } else { Tty::Disable };

    match opts.mode {
        Mode::Run => {
            let command = if opts.command.is_empty() {
                vec![DEFAULT_AGENT_COMMAND.to_string()]
            } else {
                opts.command.clone()
            };
            let invocation = format!("{}{}", env_prefix(vars), quote_all(&command));
            if opts.detached {
                Ok(RemotePlan {
                    script: format!(
                        "{cd} || exit 1; nohup {invocation} >/dev/null 2>&1 </dev/null & echo $!"
                    ),
                    tty: Tty::Disable,
                    detached: true,
                    command,
                })
            } else {
                Ok(RemotePlan {
                    script: format!("{cd} && {invocation}"),
                    tty: interactive_tty,
                    detached: false,
                    command,
                })
            }
        }
        Mode::Shell => {
            let exports: String = vars
                .iter()
                .map(|(k, v)| format!("export {k}={}; ", shell_quote(v)))
                .collect();
            Ok(RemotePlan {
                script: format!("{cd} && {exports}exec $SHELL -l"),
                tty: Tty::Force,
                detached: false,
                command: Vec::new(),
            })
        }
        Mode::Exec => {
            if opts.command.is_empty() {
                return Err(SessionError::invalid_input(
                    "cai exec requires a command, e.g. cai exec -- ls -la",
                )
                .into());
            }
            let inner = quote_all(&opts.command);
            Ok(RemotePlan {
                script: format!(
                    "{cd} && {}bash -lc {}",
                    env_prefix(vars),
                    shell_quote(&inner)
                ),
                tty: interactive_tty,
                detached: false,
                command: opts.command.clone(),
            })
        }
    }
}

/// Reads the PID echoed by a detached launch.
pub(crate) fn parse_detached_pid(stdout: &str) -> Result<u32> {
    let last = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last();
    last.and_then(|l| l.parse().ok()).ok_or_else(|| {
        SessionError::infrastructure(format!(
            "Detached command did not report a PID (got '{}')",
            last.unwrap_or("")
        ))
        .into()
    })
}

/// Whether this process's stdin is an interactive terminal.
pub(crate) fn stdin_is_tty() -> bool {
    std::io::stdin().is_terminal()
}

/// Connects to an ensured container and runs a plan.
pub(crate) struct SessionRunner<'a> {
    pub ssh: &'a dyn SshClient,
    pub paths: &'a SshPaths,
}

impl SessionRunner<'_> {
    fn ssh_args(&self, session: &EnsuredSession, plan: &RemotePlan) -> Vec<String> {
        vec![
            "-F".to_string(),
            self.paths
                .fragment(&session.container_name)
                .to_string_lossy()
                .into_owned(),
            plan.tty.flag().to_string(),
            session.container_name.clone(),
            plan.script.clone(),
        ]
    }

    pub async fn run(&self, session: &EnsuredSession, plan: &RemotePlan) -> Result<SessionOutcome> {
        let args = self.ssh_args(session, plan);
        debug!("Remote command: {}", plan.script);

        if !plan.detached {
            let code = self.ssh.interactive(&args).await?;
            return Ok(SessionOutcome::Exited(code));
        }

        let output = self.ssh.capture(&args).await?;
        if !output.success() {
            return Err(SessionError::ssh(format!(
                "Failed to start detached command in '{}': {}",
                session.container_name,
                trimmed_stderr(&output.stderr)
            ))
            .into());
        }
        let pid = parse_detached_pid(&output.stdout_text())?;
        Ok(SessionOutcome::Detached { pid })
    }
}
