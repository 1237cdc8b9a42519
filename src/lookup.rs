//! Finding the container bound to a workspace, and naming new ones.

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::config::Config;
use crate::engine::{ContainerEngine, LABEL_WORKSPACE};
use crate::error::SessionError;
use crate::naming::with_collision_suffix;

/// Highest numeric suffix tried before giving up on a name.
pub(crate) const MAX_NAME_ATTEMPTS: u32 = 99;

/// Finds the existing container for `workspace` in `context`.
///
/// Checks, in order: the name persisted in the user config (only if the
/// container still exists and is still bound to this workspace), the
/// engine's workspace label index, then the generated name itself.
pub(crate) async fn find_workspace_container(
    engine: &dyn ContainerEngine,
    context: &str,
    workspace: &Path,
    user_config: &Config,
    generated_name: &str,
) -> Result<Option<String>> {
    let ws = workspace.to_string_lossy();

    if let Some(name) = user_config
        .workspace_state(workspace)
        .and_then(|s| s.container_name.as_deref())
    {
        let state = engine.inspect(context, name).await?;
        if state.exists && state.workspace.as_deref() == Some(ws.as_ref()) {
            debug!("Found persisted container '{name}'");
            return Ok(Some(name.to_string()));
        }
        debug!("Persisted container '{name}' is stale, ignoring");
    }

    let mut labelled = engine.list_by_label(context, LABEL_WORKSPACE, &ws).await?;
    match labelled.len() {
        0 => {}
        1 => {
            let name = labelled.remove(0);
            debug!("Found container '{name}' by workspace label");
            return Ok(Some(name));
        }
        _ => {
            return Err(SessionError::conflict(format!(
                "Multiple containers for workspace {ws}: {}. Remove the extras or pass --container.",
                labelled.join(", ")
            ))
            .into());
        }
    }

    let state = engine.inspect(context, generated_name).await?;
    if state.exists
        && state.owned
        && state.workspace.as_deref().map_or(true, |w| w == ws.as_ref())
    {
        debug!("Found container '{generated_name}' by generated name");
        return Ok(Some(generated_name.to_string()));
    }

    Ok(None)
}

/// Picks a free name for a new container, starting from `base`.
///
/// A container already bound to this workspace counts as a match. Any
/// other container under the name is a collision and the next suffix
/// (`-2` through `-99`) is tried.
pub(crate) async fn resolve_container_name_for_creation(
    engine: &dyn ContainerEngine,
    context: &str,
    workspace: &Path,
    base: &str,
) -> Result<String> {
    let ws = workspace.to_string_lossy();

    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let name = if attempt == 1 {
            base.to_string()
        } else {
            with_collision_suffix(base, attempt)
        };

        let state = engine.inspect(context, &name).await?;
        if !state.exists || state.workspace.as_deref() == Some(ws.as_ref()) {
            return Ok(name);
        }
        debug!("Name '{name}' is taken by another workspace");
    }

    Err(SessionError::conflict(format!(
        "Could not find a free container name based on '{base}' after {MAX_NAME_ATTEMPTS} attempts"
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceState;
    use crate::engine::fake::{FakeContainer, FakeEngine};

    const CTX: &str = "containai-docker";
    const WS: &str = "/home/u/proj";

    fn persisted(name: &str) -> Config {
        let mut config = Config::default();
        config.workspace.insert(
            WS.to_string(),
            WorkspaceState {
                container_name: Some(name.to_string()),
                data_volume: None,
            },
        );
        config
    }

    #[tokio::test]
    async fn test_persisted_name_short_circuits() {
        let engine = FakeEngine::new().with_container(
            CTX,
            "custom",
            FakeContainer::managed(WS, "vol", 2300),
        );
        let found = find_workspace_container(&engine, CTX, Path::new(WS), &persisted("custom"), "proj-main")
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("custom"));
        assert_eq!(engine.count("ps"), 0);
    }

    #[tokio::test]
    async fn test_stale_persisted_name_is_ignored() {
        let engine = FakeEngine::new().with_container(
            CTX,
            "custom",
            FakeContainer::managed("/somewhere/else", "vol", 2300),
        );
        let found = find_workspace_container(&engine, CTX, Path::new(WS), &persisted("custom"), "proj-main")
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_found_by_label() {
        let engine = FakeEngine::new().with_container(
            CTX,
            "renamed",
            FakeContainer::managed(WS, "vol", 2300),
        );
        let found =
            find_workspace_container(&engine, CTX, Path::new(WS), &Config::default(), "proj-main")
                .await
                .unwrap();
        assert_eq!(found.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn test_multiple_by_label_is_error() {
        let engine = FakeEngine::new()
            .with_container(CTX, "a", FakeContainer::managed(WS, "vol", 2300))
            .with_container(CTX, "b", FakeContainer::managed(WS, "vol", 2301));
        let err =
            find_workspace_container(&engine, CTX, Path::new(WS), &Config::default(), "proj-main")
                .await
                .unwrap_err();
        assert!(err.to_string().contains("Multiple containers"));
    }

    #[tokio::test]
    async fn test_generated_name_without_workspace_label() {
        let engine = FakeEngine::new().with_container(
            CTX,
            "proj-main",
            FakeContainer::managed(WS, "vol", 2300).without_label(LABEL_WORKSPACE),
        );
        let found =
            find_workspace_container(&engine, CTX, Path::new(WS), &Config::default(), "proj-main")
                .await
                .unwrap();
        assert_eq!(found.as_deref(), Some("proj-main"));
    }

    #[tokio::test]
    async fn test_none_found() {
        let engine = FakeEngine::new();
        let found =
            find_workspace_container(&engine, CTX, Path::new(WS), &Config::default(), "proj-main")
                .await
                .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_collision_suffixing() {
        let engine = FakeEngine::new().with_container(
            CTX,
            "myrepo-main",
            FakeContainer::managed("/other", "vol", 2300),
        );
        let name = resolve_container_name_for_creation(&engine, CTX, Path::new(WS), "myrepo-main")
            .await
            .unwrap();
        assert_eq!(name, "myrepo-main-2");

        let engine = engine.with_container(
            CTX,
            "myrepo-main-2",
            FakeContainer::managed("/other2", "vol", 2301),
        );
        let name = resolve_container_name_for_creation(&engine, CTX, Path::new(WS), "myrepo-main")
            .await
            .unwrap();
        assert_eq!(name, "myrepo-main-3");
    }

    #[tokio::test]
    async fn test_own_container_is_not_a_collision() {
        let engine = FakeEngine::new().with_container(
            CTX,
            "myrepo-main",
            FakeContainer::managed(WS, "vol", 2300),
        );
        let name = resolve_container_name_for_creation(&engine, CTX, Path::new(WS), "myrepo-main")
            .await
            .unwrap();
        assert_eq!(name, "myrepo-main");
    }

    #[tokio::test]
    async fn test_foreign_container_is_a_collision() {
        let engine = FakeEngine::new().with_container(
            CTX,
            "myrepo-main",
            FakeContainer::foreign("nginx:latest"),
        );
        let name = resolve_container_name_for_creation(&engine, CTX, Path::new(WS), "myrepo-main")
            .await
            .unwrap();
        assert_eq!(name, "myrepo-main-2");
    }

    #[tokio::test]
    async fn test_exhausted_names_is_error() {
        let mut engine = FakeEngine::new().with_container(
            CTX,
            "myrepo-main",
            FakeContainer::managed("/other", "vol", 2300),
        );
        for n in 2..=MAX_NAME_ATTEMPTS {
            engine = engine.with_container(
                CTX,
                &with_collision_suffix("myrepo-main", n),
                FakeContainer::managed("/other", "vol", 2300),
            );
        }
        let err = resolve_container_name_for_creation(&engine, CTX, Path::new(WS), "myrepo-main")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("99 attempts"));
        assert_eq!(engine.count("inspect"), 99);
    }
}
