//! Domain-specific error types for session commands.
//!
//! Typed errors let `main` pick the process exit code without parsing
//! message strings. Everything else travels as `anyhow::Error` and exits 1.

use crate::options::Mode;

/// Exit code for generic failures.
pub(crate) const EXIT_FAILURE: i32 = 1;

/// Exit code for SSH-stage failures (port not ready, key install, keyscan).
pub(crate) const EXIT_SSH: i32 = 12;

/// Exit code when `shell`/`exec` targets a container this tool does not own.
pub(crate) const EXIT_NOT_OWNED: i32 = 15;

/// Exit code after Ctrl-C during preparation.
pub(crate) const EXIT_INTERRUPTED: i32 = 130;

/// Errors that can occur while resolving, provisioning or bootstrapping a session.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SessionError {
    /// Flags or values rejected before any I/O happened.
    #[error("{message}")]
    InvalidInput { message: String },

    /// Engine or config state contradicts the request.
    #[error("{message}")]
    Conflict { message: String },

    /// A container with the requested name exists but was not created by cai.
    #[error("Container '{name}' exists but was not created by cai; {hint}")]
    NotOwned {
        name: String,
        mode: Mode,
        hint: &'static str,
    },

    /// The container engine or a host tool failed.
    #[error("{message}")]
    Infrastructure { message: String },

    /// SSH could not be made ready for the container.
    #[error("{message}")]
    Ssh { message: String },

    /// A bounded poll ran out of attempts.
    #[error("{message}")]
    Timeout { message: String },

    /// Ctrl-C arrived before the session started.
    #[error("Interrupted")]
    Interrupted,
}

impl SessionError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a `Conflict` error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a `NotOwned` error for the given mode.
    pub fn not_owned(name: impl Into<String>, mode: Mode) -> Self {
        let hint = match mode {
            Mode::Run => "use a different --container name or remove it",
            Mode::Shell | Mode::Exec => "refusing to attach",
        };
        Self::NotOwned {
            name: name.into(),
            mode,
            hint,
        }
    }

    /// Creates an `Infrastructure` error.
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure {
            message: message.into(),
        }
    }

    /// Creates an `Ssh` error.
    pub fn ssh(message: impl Into<String>) -> Self {
        Self::Ssh {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Ssh { .. } => EXIT_SSH,
            Self::Interrupted => EXIT_INTERRUPTED,
            Self::NotOwned {
                mode: Mode::Shell | Mode::Exec,
                ..
            } => EXIT_NOT_OWNED,
            Self::InvalidInput { .. }
            | Self::Conflict { .. }
            | Self::NotOwned { .. }
            | Self::Infrastructure { .. }
            | Self::Timeout { .. } => EXIT_FAILURE,
        }
    }
}

/// Picks the exit code for an arbitrary error chain.
pub(crate) fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SessionError>())
        .map_or(EXIT_FAILURE, SessionError::exit_code)
}

/// Folds a tool's stderr into a single trimmed line for error messages.
pub(crate) fn trimmed_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    if joined.is_empty() {
        "no error output".to_string()
    } else {
        joined
    }
}
