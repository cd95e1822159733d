//! Watch strategies and the factory that picks one per project.

use super::event::ChangeEvent;
use super::native::NativeWatch;
use super::polling::PollingWatch;
use crate::config::WatchConfig;
use crate::sandbox::SandboxClient;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long [`WatchHandle::stop`] waits for the strategy task to wind down.
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Native,
    Polling,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Native => "native",
            StrategyKind::Polling => "polling",
        }
    }
}

/// A way of detecting changes in one project.
#[async_trait]
pub trait WatchStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Allocate remote resources and start delivering events into `sink`.
    async fn start(self: Box<Self>, sink: mpsc::Sender<ChangeEvent>) -> anyhow::Result<WatchHandle>;
}

/// Running strategy. Dropping the handle without [`WatchHandle::stop`]
/// still cancels the task.
pub struct WatchHandle {
    kind: StrategyKind,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn new(kind: StrategyKind, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            kind,
            cancel,
            task: Some(task),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Cancel the subscription or timer and wait briefly for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                tracing::debug!("{} watch task did not exit in time, aborting", self.kind.as_str());
                task.abort();
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Pick the strategy for a project: native when the sandbox exposes a
/// directory watch, polling otherwise. Decided once, before any resources
/// are allocated.
pub async fn select_strategy(
    project_id: &str,
    sandbox: Arc<dyn SandboxClient>,
    project_root: &str,
    config: &WatchConfig,
) -> Box<dyn WatchStrategy> {
    if sandbox.supports_native_watch().await {
        tracing::debug!("Using native watch for project {project_id}");
        Box::new(NativeWatch::new(project_id, sandbox, project_root))
    } else {
        tracing::debug!("Native watch unavailable for project {project_id}, polling");
        Box::new(PollingWatch::new(project_id, sandbox, project_root, config))
    }
}
