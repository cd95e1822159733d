//! Scripted in-memory sandbox for unit tests.

use super::{CommandOutput, RawFsEvent, SandboxClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub enum Reply {
    Stdout(String),
    Exit(i64),
    Fail(String),
    Hang,
}

type Script = dyn Fn(&str) -> Reply + Send + Sync;

pub struct FakeSandbox {
    id: String,
    script: Box<Script>,
    native: Mutex<Option<mpsc::Receiver<RawFsEvent>>>,
    native_supported: bool,
    pub commands: Mutex<Vec<String>>,
}

impl FakeSandbox {
    pub fn new(id: &str, script: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Box::new(script),
            native: Mutex::new(None),
            native_supported: false,
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn with_native(id: &str, feed: mpsc::Receiver<RawFsEvent>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Box::new(|_| Reply::Stdout(String::new())),
            native: Mutex::new(Some(feed)),
            native_supported: true,
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands_matching(&self, needle: &str) -> usize {
        self.commands.lock().iter().filter(|c| c.contains(needle)).count()
    }
}

#[async_trait]
impl SandboxClient for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(&self, command: &str, _: &str, _: u64) -> anyhow::Result<CommandOutput> {
        self.commands.lock().push(command.to_string());
        let reply = (self.script)(command);
        match reply {
            Reply::Stdout(stdout) => Ok(CommandOutput {
                stdout,
                ..Default::default()
            }),
            Reply::Exit(code) => Ok(CommandOutput {
                exit_code: code,
                ..Default::default()
            }),
            Reply::Fail(msg) => Err(anyhow::anyhow!(msg)),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn get_preview_url(&self, port: u16) -> anyhow::Result<String> {
        Ok(format!("https://{port}-{}.sandbox.test", self.id))
    }

    async fn supports_native_watch(&self) -> bool {
        self.native_supported
    }

    async fn watch_dir(&self, _root: &str) -> anyhow::Result<mpsc::Receiver<RawFsEvent>> {
        self.native
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("native watch unavailable"))
    }
}
