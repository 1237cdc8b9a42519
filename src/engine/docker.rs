use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tracing::debug;

use super::{
    CommandOutput, ContainerEngine, ContainerLabelState, RunSpec, DEFAULT_CONTEXT,
    LABEL_DATA_VOLUME, LABEL_MANAGED, LABEL_SSH_PORT, LABEL_WORKSPACE,
};
use crate::error::{trimmed_stderr, SessionError};

/// Talks to the engine through the `docker` binary.
#[derive(Debug, Clone)]
pub(crate) struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCli {
    async fn output(&self, context: Option<&str>, args: &[String]) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new(&self.program);
        if let Some(context) = context {
            cmd.args(["--context", context]);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("{} {:?} {:?}", self.program, context, args);
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run {}. Is Docker installed?", self.program))?;

        let status_code = output
            .status
            .code()
            .unwrap_or(if output.status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn checked(&self, context: &str, args: &[String], what: &str) -> Result<CommandOutput> {
        let output = self.output(Some(context), args).await?;
        if !output.success() {
            return Err(SessionError::infrastructure(format!(
                "docker {what} failed: {}",
                trimmed_stderr(&output.stderr)
            ))
            .into());
        }
        Ok(output)
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

fn inspect_format() -> String {
    let label = |key: &str| format!("{{{{index .Config.Labels \"{key}\"}}}}");
    format!(
        "{}|{}|{}|{}|{{{{.State.Status}}}}|{{{{.Config.Image}}}}",
        label(LABEL_MANAGED),
        label(LABEL_WORKSPACE),
        label(LABEL_DATA_VOLUME),
        label(LABEL_SSH_PORT),
    )
}

/// Arguments for `docker run` built from a spec.
pub(crate) fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = strings(&["run", "-d", "--name"]);
    args.push(spec.name.clone());
    args.push("--hostname".to_string());
    args.push(spec.name.clone());

    if let Some(runtime) = &spec.runtime {
        args.push(format!("--runtime={runtime}"));
    }

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push("-p".to_string());
    args.push(format!("127.0.0.1:{}:22", spec.ssh_port));

    for (source, target) in &spec.mounts {
        args.push("-v".to_string());
        args.push(format!("{source}:{target}"));
    }

    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    if let Some(memory) = &spec.memory {
        args.push(format!("--memory={memory}"));
    }
    if let Some(cpus) = &spec.cpus {
        args.push(format!("--cpus={cpus}"));
    }

    args.push(spec.image.clone());
    args
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn inspect(&self, context: &str, name: &str) -> Result<ContainerLabelState> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "--format".to_string(),
            inspect_format(),
            name.to_string(),
        ];
        let output = self.output(Some(context), &args).await?;
        if output.success() {
            return Ok(ContainerLabelState::from_inspect_line(&output.stdout_text()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such") {
            return Ok(ContainerLabelState::absent());
        }
        Err(SessionError::infrastructure(format!(
            "docker inspect {name} failed in context '{context}': {}",
            trimmed_stderr(&output.stderr)
        ))
        .into())
    }

    async fn list_by_label(
        &self,
        context: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={label}={value}"),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ];
        let output = self.checked(context, &args, "ps").await?;
        Ok(non_empty_lines(&output.stdout_text()))
    }

    async fn label_values(&self, context: &str, label: &str) -> Result<Vec<String>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={label}"),
            "--format".to_string(),
            format!("{{{{.Label \"{label}\"}}}}"),
        ];
        let output = self.checked(context, &args, "ps").await?;
        Ok(non_empty_lines(&output.stdout_text()))
    }

    async fn context_exists(&self, context: &str) -> Result<bool> {
        if context == DEFAULT_CONTEXT {
            return Ok(true);
        }
        let args = strings(&["context", "inspect", context]);
        let output = self.output(None, &args).await?;
        Ok(output.success())
    }

    async fn create_volume(&self, context: &str, name: &str) -> Result<()> {
        let args = strings(&["volume", "create", name]);
        self.checked(context, &args, "volume create").await?;
        Ok(())
    }

    async fn run(&self, context: &str, spec: &RunSpec) -> Result<()> {
        self.checked(context, &run_args(spec), "run").await?;
        Ok(())
    }

    async fn start(&self, context: &str, name: &str) -> Result<()> {
        self.checked(context, &strings(&["start", name]), "start")
            .await?;
        Ok(())
    }

    async fn stop(&self, context: &str, name: &str) -> Result<()> {
        self.checked(context, &strings(&["stop", name]), "stop")
            .await?;
        Ok(())
    }

    async fn remove(&self, context: &str, name: &str) -> Result<()> {
        self.checked(context, &strings(&["rm", "-f", name]), "rm")
            .await?;
        Ok(())
    }

    async fn exec(
        &self,
        context: &str,
        name: &str,
        user: &str,
        script: &str,
    ) -> Result<CommandOutput> {
        let args = strings(&["exec", "-u", user, name, "sh", "-c", script]);
        self.output(Some(context), &args).await
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
