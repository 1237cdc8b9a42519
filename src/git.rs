//! Git probes used for container naming.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Source of the checked-out branch for a workspace.
#[async_trait]
pub(crate) trait BranchSource: Send + Sync {
    /// Current branch name, or `None` outside a repository or on a detached HEAD.
    async fn current_branch(&self, workspace: &Path) -> Option<String>;
}

/// Asks the `git` binary.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct GitCli;

#[async_trait]
impl BranchSource for GitCli {
    async fn current_branch(&self, workspace: &Path) -> Option<String> {
        let output = tokio::process::Command::new("git")
            .current_dir(workspace)
            .args(["branch", "--show-current"])
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            debug!("git branch failed in {}", workspace.display());
            return None;
        }

        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if branch.is_empty() {
            None
        } else {
            Some(branch)
        }
    }
}

/// Always reports the same branch.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct FixedBranch(pub Option<String>);

#[cfg(test)]
#[async_trait]
impl BranchSource for FixedBranch {
    async fn current_branch(&self, _workspace: &Path) -> Option<String> {
        self.0.clone()
    }
}
