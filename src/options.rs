//! Per-invocation request parsed from the command line.

use std::path::PathBuf;

/// Which remote-execution mode a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Run the agent (or a given command) in the workspace.
    #[default]
    Run,
    /// Open a login shell in the workspace.
    Shell,
    /// Run a one-shot command through a login shell.
    Exec,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Shell => write!(f, "shell"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

/// Immutable request for one `run`/`shell`/`exec` invocation.
///
/// Built once from parsed arguments. When a default has to change (for
/// example `reset` implying `fresh`) a modified copy is taken instead of
/// mutating the original.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionCommandOptions {
    pub mode: Mode,
    pub workspace: Option<PathBuf>,
    pub container: Option<String>,
    pub data_volume: Option<String>,
    pub config: Option<PathBuf>,
    pub template: Option<String>,
    pub image_tag: Option<String>,
    pub channel: Option<String>,
    pub memory: Option<String>,
    pub cpus: Option<String>,
    pub fresh: bool,
    pub reset: bool,
    pub force: bool,
    pub detached: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub debug: bool,
    pub dry_run: bool,
    pub command: Vec<String>,
    pub env: Vec<String>,
}

impl SessionCommandOptions {
    /// `tracing` filter directive for the verbosity flags.
    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "cai=debug"
        } else if self.verbose {
            "cai=info"
        } else if self.quiet {
            "cai=error"
        } else {
            "cai=warn"
        }
    }

    /// Copy with `fresh` forced on, used when `reset` is requested.
    pub fn with_fresh(&self) -> Self {
        Self {
            fresh: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Run.to_string(), "run");
        assert_eq!(Mode::Shell.to_string(), "shell");
        assert_eq!(Mode::Exec.to_string(), "exec");
    }

    #[test]
    fn test_with_fresh_leaves_original_untouched() {
        let opts = SessionCommandOptions {
            mode: Mode::Shell,
            reset: true,
            ..Default::default()
        };
        let copy = opts.with_fresh();
        assert!(copy.fresh);
        assert!(copy.reset);
        assert!(!opts.fresh);
    }
}
