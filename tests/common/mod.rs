#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use zerobuild_liveness::resolver::{ResolveError, SandboxResolver};
use zerobuild_liveness::sandbox::{CommandOutput, SandboxClient};

type Script = dyn Fn(&str) -> String + Send + Sync;

/// Sandbox whose command output is produced by a closure.
pub struct FakeSandbox {
    id: String,
    script: Box<Script>,
    pub commands: Mutex<Vec<String>>,
}

impl FakeSandbox {
    pub fn new(id: &str, script: impl Fn(&str) -> String + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Box::new(script),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands_matching(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }
}

#[async_trait]
impl SandboxClient for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(&self, command: &str, _: &str, _: u64) -> anyhow::Result<CommandOutput> {
        self.commands.lock().push(command.to_string());
        Ok(CommandOutput {
            stdout: (self.script)(command),
            ..Default::default()
        })
    }

    async fn get_preview_url(&self, port: u16) -> anyhow::Result<String> {
        Ok(format!("https://{port}-{}.sandbox.test", self.id))
    }
}

/// In-memory project -> sandbox mapping.
#[derive(Default)]
pub struct FakeResolver {
    projects: HashMap<String, Arc<dyn SandboxClient>>,
}

impl FakeResolver {
    pub fn with(mut self, project_id: &str, sandbox: Arc<dyn SandboxClient>) -> Self {
        self.projects.insert(project_id.to_string(), sandbox);
        self
    }
}

#[async_trait]
impl SandboxResolver for FakeResolver {
    async fn resolve_project(
        &self,
        project_id: &str,
    ) -> Result<Arc<dyn SandboxClient>, ResolveError> {
        self.projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| ResolveError::ProjectNotFound(project_id.to_string()))
    }

    async fn attach(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxClient>, ResolveError> {
        self.projects
            .values()
            .find(|s| s.id() == sandbox_id)
            .cloned()
            .ok_or_else(|| ResolveError::Provider(anyhow::anyhow!("sandbox {sandbox_id} not found")))
    }
}
