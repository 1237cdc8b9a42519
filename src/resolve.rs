//! Target resolution.
//!
//! Turns a `SessionCommandOptions` into the one container, workspace,
//! volume and context the session will use. Only reads happen here: engine
//! inspect/ps, config files and git. Nothing is created or changed.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::ConfigSet;
use crate::context::{candidate_contexts, resolve_context};
use crate::engine::{ContainerEngine, ContainerLabelState, DEFAULT_CONTEXT};
use crate::env::Env;
use crate::error::SessionError;
use crate::git::BranchSource;
use crate::lookup::{find_workspace_container, resolve_container_name_for_creation};
use crate::naming::{generate_container_name, generate_reset_volume_name};
use crate::options::{Mode, SessionCommandOptions};
use crate::volume::resolve_volume;

/// The fully determined session target, before anything is mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedTarget {
    pub container_name: String,
    pub workspace: PathBuf,
    pub data_volume: String,
    pub context: String,
    /// Record container and volume for this workspace after provisioning.
    pub should_persist_state: bool,
    /// No container exists yet; provisioning will create it.
    pub created_by_this_invocation: bool,
    /// The volume is a fresh `--reset` volume.
    pub generated_from_reset: bool,
}

/// A target plus the options provisioning should honor.
///
/// `options` differs from the request only when a flag implies another
/// (`--reset` turns on `--fresh`).
#[derive(Debug, Clone)]
pub(crate) struct Resolution {
    pub target: ResolvedTarget,
    pub options: SessionCommandOptions,
}

/// Rejects flag combinations that can never be satisfied.
///
/// Runs before any I/O.
pub(crate) fn validate_options(opts: &SessionCommandOptions) -> Result<()> {
    let conflict = |a: &str, b: &str| -> anyhow::Error {
        SessionError::invalid_input(format!("{a} and {b} are mutually exclusive")).into()
    };

    if opts.container.is_some() && opts.workspace.is_some() {
        return Err(conflict("--container", "--workspace"));
    }
    if opts.container.is_some() && opts.data_volume.is_some() {
        return Err(conflict("--container", "--data-volume"));
    }
    if opts.mode == Mode::Shell && opts.reset {
        if opts.fresh {
            return Err(conflict("--reset", "--fresh"));
        }
        if opts.container.is_some() {
            return Err(conflict("--reset", "--container"));
        }
        if opts.data_volume.is_some() {
            return Err(conflict("--reset", "--data-volume"));
        }
    }
    Ok(())
}

/// Expands `~`, makes the path absolute and requires it to exist.
pub(crate) fn normalize_workspace(raw: Option<&Path>, env: &dyn Env) -> Result<PathBuf> {
    let path = match raw {
        None => std::env::current_dir()
            .map_err(|e| SessionError::invalid_input(format!("Cannot read current directory: {e}")))?,
        Some(p) => expand_tilde(p, env)?,
    };

    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(|e| SessionError::invalid_input(format!("Cannot read current directory: {e}")))?
            .join(path)
    };

    if !absolute.is_dir() {
        return Err(SessionError::invalid_input(format!(
            "Workspace does not exist: {}",
            absolute.display()
        ))
        .into());
    }

    absolute.canonicalize().map_err(|e| {
        SessionError::invalid_input(format!(
            "Cannot resolve workspace {}: {e}",
            absolute.display()
        ))
        .into()
    })
}

fn expand_tilde(path: &Path, env: &dyn Env) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = env
        .home_dir()
        .ok_or_else(|| SessionError::invalid_input("Cannot expand ~: HOME is not set"))?;
    Ok(home.join(rest))
}

/// Resolves session targets against one engine.
pub(crate) struct Resolver<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub git: &'a dyn BranchSource,
    pub env: &'a dyn Env,
}

impl Resolver<'_> {
    /// Resolves `opts` to a single target or a structured error.
    pub async fn resolve(&self, opts: &SessionCommandOptions) -> Result<Resolution> {
        validate_options(opts)?;

        match &opts.container {
            Some(name) => self.resolve_by_name(opts, name).await,
            None => self.resolve_by_workspace(opts).await,
        }
    }

    async fn resolve_by_name(&self, opts: &SessionCommandOptions, name: &str) -> Result<Resolution> {
        let cwd = normalize_workspace(None, self.env)?;
        let configs = ConfigSet::load(self.env, &cwd, opts.config.as_deref())?;

        let mut found: Vec<(String, ContainerLabelState)> = Vec::new();
        for context in candidate_contexts(configs.context_name()) {
            if context != DEFAULT_CONTEXT && !self.engine.context_exists(&context).await? {
                continue;
            }
            match self.engine.inspect(&context, name).await {
                Ok(state) if state.exists => found.push((context, state)),
                Ok(_) => {}
                Err(e) => debug!("Skipping context '{context}': {e:#}"),
            }
        }

        if found.len() > 1 {
            let contexts: Vec<&str> = found.iter().map(|(c, _)| c.as_str()).collect();
            return Err(SessionError::conflict(format!(
                "Container '{name}' exists in multiple contexts: {}",
                contexts.join(", ")
            ))
            .into());
        }

        if let Some((context, state)) = found.pop() {
            if !state.owned {
                return Err(SessionError::not_owned(name, opts.mode).into());
            }
            let workspace = state.workspace.ok_or_else(|| {
                SessionError::conflict(format!(
                    "Container '{name}' is missing workspace label; remove it and retry"
                ))
            })?;
            let data_volume = state.data_volume.ok_or_else(|| {
                SessionError::conflict(format!(
                    "Container '{name}' is missing data-volume label; remove it and retry"
                ))
            })?;
            info!("Using existing container '{name}' in context '{context}'");
            return Ok(Resolution {
                target: ResolvedTarget {
                    container_name: name.to_string(),
                    workspace: PathBuf::from(workspace),
                    data_volume,
                    context,
                    should_persist_state: false,
                    created_by_this_invocation: false,
                    generated_from_reset: false,
                },
                options: opts.clone(),
            });
        }

        let context = resolve_context(self.engine, configs.context_name(), opts.force).await?;
        let data_volume = resolve_volume(&cwd, None, self.env, &configs)?;
        info!("Container '{name}' not found, will create it in context '{context}'");
        Ok(Resolution {
            target: ResolvedTarget {
                container_name: name.to_string(),
                workspace: cwd,
                data_volume,
                context,
                should_persist_state: true,
                created_by_this_invocation: true,
                generated_from_reset: false,
            },
            options: opts.clone(),
        })
    }

    async fn resolve_by_workspace(&self, opts: &SessionCommandOptions) -> Result<Resolution> {
        let workspace = normalize_workspace(opts.workspace.as_deref(), self.env)?;
        let configs = ConfigSet::load(self.env, &workspace, opts.config.as_deref())?;

        let mut data_volume =
            resolve_volume(&workspace, opts.data_volume.as_deref(), self.env, &configs)?;

        let repo = workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let branch = self.git.current_branch(&workspace).await;
        let generated = generate_container_name(&repo, branch.as_deref());

        let mut options = opts.clone();
        let generated_from_reset = opts.mode == Mode::Shell && opts.reset;
        if generated_from_reset {
            data_volume = generate_reset_volume_name(
                &repo,
                branch.as_deref(),
                chrono::Local::now().naive_local(),
            );
            options = opts.with_fresh();
            info!("Reset: using new data volume '{data_volume}'");
        }

        let context = resolve_context(self.engine, configs.context_name(), opts.force).await?;

        let existing =
            find_workspace_container(self.engine, &context, &workspace, &configs.user, &generated)
                .await?;

        let (container_name, created) = match existing {
            Some(name) => (name, false),
            None => {
                let name = resolve_container_name_for_creation(
                    self.engine,
                    &context,
                    &workspace,
                    &generated,
                )
                .await?;
                (name, true)
            }
        };

        debug!(
            "Resolved {} -> {container_name} (volume {data_volume}, context {context})",
            workspace.display()
        );

        Ok(Resolution {
            target: ResolvedTarget {
                container_name,
                workspace,
                data_volume,
                context,
                should_persist_state: true,
                created_by_this_invocation: created,
                generated_from_reset,
            },
            options,
        })
    }
}
