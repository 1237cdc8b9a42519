//! In-memory engine for tests.
//!
//! Holds containers per context and records every call so tests can assert
//! on what the resolver and provisioner asked the engine to do.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::{
    CommandOutput, ContainerEngine, ContainerLabelState, RunSpec, DEFAULT_CONTEXT,
    LABEL_DATA_VOLUME, LABEL_MANAGED, LABEL_SSH_PORT, LABEL_WORKSPACE,
};
use crate::error::SessionError;

/// A container held by the fake.
#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub state: String,
}

impl FakeContainer {
    /// A running container created by cai.
    pub fn managed(workspace: &str, volume: &str, port: u16) -> Self {
        Self {
            labels: BTreeMap::from([
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_WORKSPACE.to_string(), workspace.to_string()),
                (LABEL_DATA_VOLUME.to_string(), volume.to_string()),
                (LABEL_SSH_PORT.to_string(), port.to_string()),
            ]),
            image: "ghcr.io/containai/agents:latest".to_string(),
            state: "running".to_string(),
        }
    }

    /// A running container someone else created.
    pub fn foreign(image: &str) -> Self {
        Self {
            labels: BTreeMap::new(),
            image: image.to_string(),
            state: "running".to_string(),
        }
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn without_label(mut self, label: &str) -> Self {
        self.labels.remove(label);
        self
    }

    fn inspect_line(&self) -> String {
        let label = |key: &str| self.labels.get(key).cloned().unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}",
            label(LABEL_MANAGED),
            label(LABEL_WORKSPACE),
            label(LABEL_DATA_VOLUME),
            label(LABEL_SSH_PORT),
            self.state,
            self.image
        )
    }
}

/// Engine double backed by maps.
#[derive(Debug)]
pub(crate) struct FakeEngine {
    contexts: BTreeSet<String>,
    containers: Mutex<BTreeMap<(String, String), FakeContainer>>,
    calls: Mutex<Vec<String>>,
    runs: Mutex<Vec<RunSpec>>,
    scripts: Mutex<Vec<String>>,
    state_after_run: String,
    start_fails: bool,
    exec_status: i32,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            contexts: BTreeSet::new(),
            containers: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            state_after_run: "running".to_string(),
            start_fails: false,
            exec_status: 0,
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.contexts.insert(context.to_string());
        self
    }

    pub fn with_container(self, context: &str, name: &str, container: FakeContainer) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert((context.to_string(), name.to_string()), container);
        self
    }

    /// Containers created by `run` stay in this state.
    pub fn with_state_after_run(mut self, state: &str) -> Self {
        self.state_after_run = state.to_string();
        self
    }

    pub fn with_failing_start(mut self) -> Self {
        self.start_fails = true;
        self
    }

    pub fn with_exec_status(mut self, status: i32) -> Self {
        self.exec_status = status;
        self
    }

    /// Every call made so far, as `"verb context name"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose verb is `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .count()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.runs.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn container(&self, context: &str, name: &str) -> Option<FakeContainer> {
        self.containers
            .lock()
            .unwrap()
            .get(&(context.to_string(), name.to_string()))
            .cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn key(context: &str, name: &str) -> (String, String) {
        (context.to_string(), name.to_string())
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn inspect(&self, context: &str, name: &str) -> Result<ContainerLabelState> {
        self.record(format!("inspect {context} {name}"));
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .get(&Self::key(context, name))
            .map_or_else(ContainerLabelState::absent, |c| {
                ContainerLabelState::from_inspect_line(&c.inspect_line())
            }))
    }

    async fn list_by_label(
        &self,
        context: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<String>> {
        self.record(format!("ps {context} {label}={value}"));
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|((ctx, _), c)| ctx == context && c.labels.get(label).map(String::as_str) == Some(value))
            .map(|((_, name), _)| name.clone())
            .collect())
    }

    async fn label_values(&self, context: &str, label: &str) -> Result<Vec<String>> {
        self.record(format!("ps {context} {label}"));
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|((ctx, _), _)| ctx == context)
            .filter_map(|(_, c)| c.labels.get(label).cloned())
            .collect())
    }

    async fn context_exists(&self, context: &str) -> Result<bool> {
        if context == DEFAULT_CONTEXT {
            return Ok(true);
        }
        self.record(format!("context {context}"));
        Ok(self.contexts.contains(context))
    }

    async fn create_volume(&self, context: &str, name: &str) -> Result<()> {
        self.record(format!("volume {context} {name}"));
        Ok(())
    }

    async fn run(&self, context: &str, spec: &RunSpec) -> Result<()> {
        self.record(format!("run {context} {}", spec.name));
        let mut containers = self.containers.lock().unwrap();
        let key = Self::key(context, &spec.name);
        if containers.contains_key(&key) {
            return Err(SessionError::infrastructure(format!(
                "docker run failed: Conflict. The container name \"/{}\" is already in use",
                spec.name
            ))
            .into());
        }
        let mut labels = spec.labels.clone();
        labels.insert(LABEL_SSH_PORT.to_string(), spec.ssh_port.to_string());
        containers.insert(
            key,
            FakeContainer {
                labels,
                image: spec.image.clone(),
                state: self.state_after_run.clone(),
            },
        );
        self.runs.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn start(&self, context: &str, name: &str) -> Result<()> {
        self.record(format!("start {context} {name}"));
        if self.start_fails {
            return Err(SessionError::infrastructure("docker start failed: boom").into());
        }
        if let Some(c) = self.containers.lock().unwrap().get_mut(&Self::key(context, name)) {
            c.state = "running".to_string();
        }
        Ok(())
    }

    async fn stop(&self, context: &str, name: &str) -> Result<()> {
        self.record(format!("stop {context} {name}"));
        if let Some(c) = self.containers.lock().unwrap().get_mut(&Self::key(context, name)) {
            c.state = "exited".to_string();
        }
        Ok(())
    }

    async fn remove(&self, context: &str, name: &str) -> Result<()> {
        self.record(format!("rm {context} {name}"));
        self.containers
            .lock()
            .unwrap()
            .remove(&Self::key(context, name));
        Ok(())
    }

    async fn exec(
        &self,
        context: &str,
        name: &str,
        _user: &str,
        script: &str,
    ) -> Result<CommandOutput> {
        self.record(format!("exec {context} {name}"));
        self.scripts.lock().unwrap().push(script.to_string());
        Ok(CommandOutput {
            status_code: self.exec_status,
            stdout: Vec::new(),
            stderr: if self.exec_status == 0 {
                Vec::new()
            } else {
                b"permission denied".to_vec()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_inspect_round_trips_labels() {
        let engine = FakeEngine::new().with_container(
            "ctx",
            "proj-main",
            FakeContainer::managed("/ws", "vol", 2301),
        );
        let state = engine.inspect("ctx", "proj-main").await.unwrap();
        assert!(state.exists && state.owned);
        assert_eq!(state.ssh_port, Some(2301));
        assert!(!engine.inspect("other", "proj-main").await.unwrap().exists);
        assert_eq!(engine.count("inspect"), 2);
    }

    #[tokio::test]
    async fn test_fake_run_rejects_duplicate_name() {
        let engine = FakeEngine::new();
        let spec = RunSpec {
            name: "a".to_string(),
            ssh_port: 2300,
            ..Default::default()
        };
        engine.run("ctx", &spec).await.unwrap();
        assert!(engine.run("ctx", &spec).await.is_err());
    }
}
