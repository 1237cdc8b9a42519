use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::debug;

use crate::engine::CommandOutput;

/// The OpenSSH tools cai shells out to.
#[async_trait]
pub(crate) trait SshClient: Send + Sync {
    /// Generates an ed25519 keypair at `private_key` (public key at `.pub`).
    async fn keygen(&self, private_key: &Path) -> Result<CommandOutput>;

    /// Collects host keys from `host:port`.
    async fn keyscan(&self, host: &str, port: u16) -> Result<CommandOutput>;

    /// Runs `ssh` attached to the terminal and returns its exit code.
    async fn interactive(&self, args: &[String]) -> Result<i32>;

    /// Runs `ssh` non-interactively, capturing output.
    async fn capture(&self, args: &[String]) -> Result<CommandOutput>;
}

/// Runs the system `ssh`, `ssh-keygen` and `ssh-keyscan`.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct OpenSsh;

async fn captured(program: &str, args: &[String]) -> Result<CommandOutput> {
    debug!("{program} {args:?}");
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to run {program}. Is OpenSSH installed?"))?;

    Ok(CommandOutput {
        status_code: output.status.code().unwrap_or(1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

#[async_trait]
impl SshClient for OpenSsh {
    async fn keygen(&self, private_key: &Path) -> Result<CommandOutput> {
        let args = vec![
            "-t".to_string(),
            "ed25519".to_string(),
            "-N".to_string(),
            String::new(),
            "-C".to_string(),
            "containai".to_string(),
            "-q".to_string(),
            "-f".to_string(),
            private_key.to_string_lossy().into_owned(),
        ];
        captured("ssh-keygen", &args).await
    }

    async fn keyscan(&self, host: &str, port: u16) -> Result<CommandOutput> {
        let args = vec![
            "-T".to_string(),
            "2".to_string(),
            "-p".to_string(),
            port.to_string(),
            host.to_string(),
        ];
        captured("ssh-keyscan", &args).await
    }

    async fn interactive(&self, args: &[String]) -> Result<i32> {
        debug!("ssh {args:?}");
        let status = tokio::process::Command::new("ssh")
            .args(args)
            .status()
            .await
            .context("Failed to run ssh. Is OpenSSH installed?")?;
        Ok(status.code().unwrap_or(1))
    }

    async fn capture(&self, args: &[String]) -> Result<CommandOutput> {
        captured("ssh", args).await
    }
}
