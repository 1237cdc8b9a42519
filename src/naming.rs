//! Deterministic container and volume names.
//!
//! Names are derived from the workspace directory name and its git branch,
//! so the same checkout always maps to the same container.

use chrono::NaiveDateTime;

/// Character budget for generated container names, suffix included.
pub(crate) const MAX_CONTAINER_NAME_LEN: usize = 24;

/// Upper bound on volume name length accepted by the engine.
pub(crate) const MAX_VOLUME_NAME_LEN: usize = 255;

const FALLBACK_REPO: &str = "workspace";
const FALLBACK_BRANCH: &str = "nogit";

/// Lowercases and replaces every run of non-alphanumerics with a single `-`.
pub(crate) fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn truncate(name: &str, max: usize) -> String {
    let cut: String = name.chars().take(max).collect();
    cut.trim_end_matches('-').to_string()
}

fn base_parts(repo: &str, branch: Option<&str>) -> (String, String) {
    let repo = Some(sanitize(repo))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_REPO.to_string());
    let branch = branch
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_BRANCH.to_string());
    (repo, branch)
}

/// `repo-branch`, sanitized and truncated to the container name budget.
pub(crate) fn generate_container_name(repo: &str, branch: Option<&str>) -> String {
    let (repo, branch) = base_parts(repo, branch);
    truncate(&format!("{repo}-{branch}"), MAX_CONTAINER_NAME_LEN)
}

/// `base-N`, with `base` shortened so the whole name fits the budget.
pub(crate) fn with_collision_suffix(base: &str, n: u32) -> String {
    let suffix = format!("-{n}");
    let room = MAX_CONTAINER_NAME_LEN.saturating_sub(suffix.len());
    format!("{}{suffix}", truncate(base, room))
}

/// `repo-branch-YYYYMMDDHHMMSS`, a volume name that has never been used.
pub(crate) fn generate_reset_volume_name(
    repo: &str,
    branch: Option<&str>,
    now: NaiveDateTime,
) -> String {
    let (repo, branch) = base_parts(repo, branch);
    let stamp = now.format("%Y%m%d%H%M%S").to_string();
    let room = MAX_VOLUME_NAME_LEN - stamp.len() - 1;
    format!("{}-{stamp}", truncate(&format!("{repo}-{branch}"), room))
}

/// Checks `^[A-Za-z0-9][A-Za-z0-9._-]*$` with at most 255 characters.
pub(crate) fn is_valid_volume_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_VOLUME_NAME_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
