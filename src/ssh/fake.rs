//! Scripted SSH tools for tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::SshClient;
use crate::engine::CommandOutput;

pub(crate) const FAKE_HOST_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFakeHostKey";

/// Records calls and answers keyscan once the "daemon" is up.
#[derive(Debug, Clone)]
pub(crate) struct FakeSsh {
    /// Keyscan calls that fail before one succeeds.
    not_ready_scans: usize,
    scans: Arc<AtomicUsize>,
    keygens: Arc<AtomicUsize>,
    sessions: Arc<Mutex<Vec<Vec<String>>>>,
    exit_code: i32,
    capture_stdout: String,
    /// Every tool fails to spawn, as when OpenSSH is not installed.
    missing: bool,
}

impl FakeSsh {
    pub fn new() -> Self {
        Self {
            not_ready_scans: 0,
            scans: Arc::new(AtomicUsize::new(0)),
            keygens: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(Mutex::new(Vec::new())),
            exit_code: 0,
            capture_stdout: String::new(),
            missing: false,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.missing = true;
        self
    }

    pub fn ready_after(mut self, failures: usize) -> Self {
        self.not_ready_scans = failures;
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_capture_stdout(mut self, stdout: &str) -> Self {
        self.capture_stdout = stdout.to_string();
        self
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn keygen_count(&self) -> usize {
        self.keygens.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Vec<String>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SshClient for FakeSsh {
    async fn keygen(&self, private_key: &Path) -> Result<CommandOutput> {
        self.keygens.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            bail!("Failed to run ssh-keygen: No such file or directory (os error 2)");
        }
        std::fs::write(private_key, "PRIVATE")?;
        std::fs::write(
            format!("{}.pub", private_key.display()),
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIClientKey containai\n",
        )?;
        Ok(CommandOutput::default())
    }

    async fn keyscan(&self, host: &str, port: u16) -> Result<CommandOutput> {
        let n = self.scans.fetch_add(1, Ordering::SeqCst);
        if self.missing {
            bail!("Failed to run ssh-keyscan: No such file or directory (os error 2)");
        }
        if n < self.not_ready_scans {
            return Ok(CommandOutput {
                status_code: 1,
                ..Default::default()
            });
        }
        Ok(CommandOutput {
            status_code: 0,
            stdout: format!("# {host}:{port} SSH-2.0-OpenSSH_9.6\n[{host}]:{port} {FAKE_HOST_KEY}\n")
                .into_bytes(),
            stderr: Vec::new(),
        })
    }

    async fn interactive(&self, args: &[String]) -> Result<i32> {
        self.sessions.lock().unwrap().push(args.to_vec());
        Ok(self.exit_code)
    }

    async fn capture(&self, args: &[String]) -> Result<CommandOutput> {
        self.sessions.lock().unwrap().push(args.to_vec());
        Ok(CommandOutput {
            status_code: self.exit_code,
            stdout: self.capture_stdout.clone().into_bytes(),
            stderr: Vec::new(),
        })
    }
}
