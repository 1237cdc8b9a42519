//! SSH trust between the host and a container.
//!
//! Every step here is idempotent and runs on every invocation: the keypair
//! is generated once, the public key is appended to `authorized_keys` only
//! if missing, known_hosts only gains lines it does not already have, and
//! the main SSH config gets its `Include` line once.

mod client;
#[cfg(test)]
pub(crate) mod fake;

pub(crate) use client::{OpenSsh, SshClient};

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::ContainerEngine;
use crate::env::Env;
use crate::error::{trimmed_stderr, SessionError};
use crate::poll::Poll;
use crate::shell::shell_quote;

/// Address container sshd ports are published on.
pub(crate) const SSH_HOST: &str = "127.0.0.1";

/// Login user inside the container.
pub(crate) const CONTAINER_USER: &str = "agent";

/// Files cai owns on the host side of an SSH connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SshPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub known_hosts: PathBuf,
    /// One `<container>.conf` per container.
    pub fragment_dir: PathBuf,
    /// The user's main `~/.ssh/config`.
    pub user_config: PathBuf,
}

impl SshPaths {
    /// Paths under `$XDG_CONFIG_HOME/containai/ssh` and `~/.ssh`.
    pub fn from_env(env: &dyn Env) -> Result<Self> {
        let config_home = env.config_home().ok_or_else(|| {
            SessionError::ssh("Cannot locate SSH files: neither XDG_CONFIG_HOME nor HOME is set")
        })?;
        let home = env
            .home_dir()
            .ok_or_else(|| SessionError::ssh("Cannot locate ~/.ssh: HOME is not set"))?;
        Ok(Self::under(&config_home.join("containai").join("ssh"), &home))
    }

    pub fn under(dir: &Path, home: &Path) -> Self {
        Self {
            private_key: dir.join("id_containai"),
            public_key: dir.join("id_containai.pub"),
            known_hosts: dir.join("known_hosts"),
            fragment_dir: dir.join("config.d"),
            user_config: home.join(".ssh").join("config"),
        }
    }

    pub fn fragment(&self, container: &str) -> PathBuf {
        self.fragment_dir.join(format!("{container}.conf"))
    }
}

/// Shell script that installs `public_key` for the current user.
///
/// Safe to run any number of times: the key line is appended only when
/// `grep -qxF` does not already find it.
pub(crate) fn authorized_keys_script(public_key: &str) -> String {
    let key = shell_quote(public_key.trim());
    format!(
        r#"set -e
mkdir -p "$HOME/.ssh"
touch "$HOME/.ssh/authorized_keys"
if [ -s "$HOME/.ssh/authorized_keys" ] && [ -n "$(tail -c 1 "$HOME/.ssh/authorized_keys")" ]; then
  echo >> "$HOME/.ssh/authorized_keys"
fi
grep -qxF {key} "$HOME/.ssh/authorized_keys" || printf '%s\n' {key} >> "$HOME/.ssh/authorized_keys"
chown "$(id -u):$(id -g)" "$HOME/.ssh" "$HOME/.ssh/authorized_keys"
chmod 700 "$HOME/.ssh"
chmod 600 "$HOME/.ssh/authorized_keys"
"#
    )
}

/// Host key lines from `ssh-keyscan` output, comments dropped.
pub(crate) fn host_key_lines(scanned: &str) -> Vec<&str> {
    scanned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}

/// Returns `existing` plus any missing scanned lines and their `[name]:port` aliases.
///
/// `None` means nothing needs to be written.
pub(crate) fn merge_known_hosts(
    existing: &str,
    scanned: &str,
    container: &str,
    port: u16,
) -> Option<String> {
    let alias = format!("[{container}]:{port}");
    let mut wanted = Vec::new();
    for line in host_key_lines(scanned) {
        wanted.push(line.to_string());
        if let Some((_, rest)) = line.split_once(char::is_whitespace) {
            wanted.push(format!("{alias} {}", rest.trim_start()));
        }
    }

    let mut present: BTreeSet<&str> = existing.lines().collect();
    let mut merged = existing.to_string();
    let mut added = 0;
    for line in &wanted {
        if present.insert(line.as_str()) {
            if !merged.is_empty() && !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(line);
            merged.push('\n');
            added += 1;
        }
    }

    (added > 0).then_some(merged)
}

/// `Host` block for one container.
pub(crate) fn client_fragment(container: &str, port: u16, paths: &SshPaths) -> String {
    format!(
        "Host {container}\n\
         \x20   HostName {SSH_HOST}\n\
         \x20   Port {port}\n\
         \x20   User {CONTAINER_USER}\n\
         \x20   IdentityFile \"{}\"\n\
         \x20   IdentitiesOnly yes\n\
         \x20   UserKnownHostsFile \"{}\"\n\
         \x20   StrictHostKeyChecking accept-new\n",
        paths.private_key.display(),
        paths.known_hosts.display(),
    )
}

/// `config` with an `Include` for `fragment_dir` appended, or `None` if present.
pub(crate) fn with_include(config: &str, fragment_dir: &Path) -> Option<String> {
    let dir = fragment_dir.to_string_lossy();
    if config.contains(dir.as_ref()) {
        return None;
    }
    let mut out = config.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("\n# Added by cai\nMatch all\nInclude \"{dir}/*.conf\"\n"));
    Some(out)
}

fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", dir.display()))?;
    }
    Ok(())
}

fn read_or_empty(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Makes a container reachable as `ssh <name>` with a pinned host key.
pub(crate) struct SshBootstrap<'a> {
    pub client: &'a dyn SshClient,
    pub engine: &'a dyn ContainerEngine,
    pub paths: SshPaths,
    pub ready_poll: Poll,
}

impl SshBootstrap<'_> {
    /// Runs every bootstrap step for `container` listening on `port`.
    pub async fn ensure_trust(&self, container: &str, context: &str, port: u16) -> Result<()> {
        self.ensure_keypair().await?;
        let scanned = self.wait_for_sshd(container, port).await?;
        let public_key = self.public_key()?;
        self.install_key(container, context, &public_key).await?;
        self.update_known_hosts(&scanned, container, port)?;
        self.write_client_config(container, port)?;
        info!("SSH ready for '{container}' on port {port}");
        Ok(())
    }

    async fn ensure_keypair(&self) -> Result<()> {
        if self.paths.private_key.exists() {
            return Ok(());
        }
        if let Some(dir) = self.paths.private_key.parent() {
            create_private_dir(dir)?;
        }
        debug!("Generating {}", self.paths.private_key.display());
        let output = self
            .client
            .keygen(&self.paths.private_key)
            .await
            .map_err(|e| SessionError::ssh(format!("ssh-keygen failed: {e:#}")))?;
        if !output.success() {
            return Err(SessionError::ssh(format!(
                "ssh-keygen failed: {}",
                trimmed_stderr(&output.stderr)
            ))
            .into());
        }
        Ok(())
    }

    /// Polls `ssh-keyscan` until sshd answers; returns the scanned keys.
    async fn wait_for_sshd(&self, container: &str, port: u16) -> Result<String> {
        for attempt in 1..=self.ready_poll.attempts {
            let output = self
                .client
                .keyscan(SSH_HOST, port)
                .await
                .map_err(|e| SessionError::ssh(format!("ssh-keyscan failed: {e:#}")))?;
            let text = output.stdout_text();
            if output.success() && !host_key_lines(&text).is_empty() {
                debug!("sshd on port {port} answered after {attempt} attempt(s)");
                return Ok(text);
            }
            if attempt < self.ready_poll.attempts {
                tokio::time::sleep(self.ready_poll.interval).await;
            }
        }
        Err(SessionError::ssh(format!(
            "SSH in container '{container}' not ready on port {port} after {}s",
            self.ready_poll.budget().as_secs()
        ))
        .into())
    }

    fn public_key(&self) -> Result<String> {
        let key = std::fs::read_to_string(&self.paths.public_key).map_err(|e| {
            SessionError::ssh(format!(
                "Cannot read {}: {e}",
                self.paths.public_key.display()
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SessionError::ssh(format!(
                "Public key {} is empty",
                self.paths.public_key.display()
            ))
            .into());
        }
        Ok(key.to_string())
    }

    async fn install_key(&self, container: &str, context: &str, public_key: &str) -> Result<()> {
        let output = self
            .engine
            .exec(
                context,
                container,
                CONTAINER_USER,
                &authorized_keys_script(public_key),
            )
            .await?;
        if !output.success() {
            return Err(SessionError::ssh(format!(
                "Failed to install SSH key in '{container}': {}",
                trimmed_stderr(&output.stderr)
            ))
            .into());
        }
        Ok(())
    }

    fn update_known_hosts(&self, scanned: &str, container: &str, port: u16) -> Result<()> {
        let existing = read_or_empty(&self.paths.known_hosts)?;
        if let Some(merged) = merge_known_hosts(&existing, scanned, container, port) {
            if let Some(dir) = self.paths.known_hosts.parent() {
                create_private_dir(dir)?;
            }
            std::fs::write(&self.paths.known_hosts, merged).with_context(|| {
                format!("Failed to write {}", self.paths.known_hosts.display())
            })?;
            debug!("Updated {}", self.paths.known_hosts.display());
        }
        Ok(())
    }

    fn write_client_config(&self, container: &str, port: u16) -> Result<()> {
        create_private_dir(&self.paths.fragment_dir)?;
        let fragment = self.paths.fragment(container);
        std::fs::write(&fragment, client_fragment(container, port, &self.paths))
            .with_context(|| format!("Failed to write {}", fragment.display()))?;

        let existing = read_or_empty(&self.paths.user_config)?;
        if let Some(updated) = with_include(&existing, &self.paths.fragment_dir) {
            if let Some(dir) = self.paths.user_config.parent() {
                create_private_dir(dir)?;
            }
            std::fs::write(&self.paths.user_config, updated).with_context(|| {
                format!("Failed to write {}", self.paths.user_config.display())
            })?;
            debug!("Added Include to {}", self.paths.user_config.display());
        }
        Ok(())
    }
}
