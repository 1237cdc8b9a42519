//! Isolation context discovery.

use anyhow::Result;
use tracing::{debug, info};

use crate::engine::{ContainerEngine, DEFAULT_CONTEXT};
use crate::error::SessionError;

/// Contexts tried, in order, when none is configured or the configured one is missing.
pub(crate) const FALLBACK_CONTEXTS: &[&str] = &["containai-docker", "containai-secure"];

/// Picks the docker context for a workspace.
///
/// The configured context wins if the engine knows it, then the first
/// fallback that exists. `default` is only used with `force`.
pub(crate) async fn resolve_context(
    engine: &dyn ContainerEngine,
    configured: Option<&str>,
    force: bool,
) -> Result<String> {
    if let Some(name) = configured {
        if engine.context_exists(name).await? {
            debug!("Using configured context '{name}'");
            return Ok(name.to_string());
        }
        debug!("Configured context '{name}' not found, trying fallbacks");
    }

    for name in FALLBACK_CONTEXTS {
        if engine.context_exists(name).await? {
            debug!("Using fallback context '{name}'");
            return Ok((*name).to_string());
        }
    }

    if force {
        info!("No isolation context found, using '{DEFAULT_CONTEXT}' (--force)");
        return Ok(DEFAULT_CONTEXT.to_string());
    }

    Err(SessionError::infrastructure(
        "No isolation context available. Run 'cai setup' to create one, \
         or pass --force to use the default Docker context.",
    )
    .into())
}

/// Every context a named container might live in, without duplicates.
pub(crate) fn candidate_contexts(configured: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let all = configured
        .into_iter()
        .chain(FALLBACK_CONTEXTS.iter().copied())
        .chain(std::iter::once(DEFAULT_CONTEXT));
    for name in all {
        if !out.iter().any(|c| c == name) {
            out.push(name.to_string());
        }
    }
    out
}
