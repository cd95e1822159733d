//! Project watcher registry: at most one running watch strategy per project.

use super::event::ChangeEvent;
use super::strategy::{select_strategy, StrategyKind, WatchHandle};
use crate::config::WatchConfig;
use crate::observability::Metrics;
use crate::sandbox::SandboxClient;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a watcher could not be started.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to start {strategy} watch for project {project_id}: {source}")]
    Start {
        project_id: String,
        strategy: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Identifies one `start_watching` call, so a connection only tears down the
/// watcher it started.
pub type WatchId = Uuid;

pub struct WatcherEntry {
    pub project_id: String,
    pub watch_id: WatchId,
    pub sandbox: Arc<dyn SandboxClient>,
    pub started_at: DateTime<Utc>,
    handle: WatchHandle,
}

impl WatcherEntry {
    pub fn kind(&self) -> StrategyKind {
        self.handle.kind()
    }
}

/// Result of a successful [`WatcherRegistry::start_watching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedWatch {
    pub watch_id: WatchId,
    pub kind: StrategyKind,
}

/// Snapshot of a registered watcher.
#[derive(Debug, Clone)]
pub struct WatcherInfo {
    pub watch_id: WatchId,
    pub sandbox_id: String,
    pub kind: StrategyKind,
    pub started_at: DateTime<Utc>,
}

pub struct WatcherRegistry {
    entries: DashMap<String, WatcherEntry>,
    config: WatchConfig,
    project_root: String,
    metrics: Arc<Metrics>,
}

impl WatcherRegistry {
    pub fn new(config: WatchConfig, project_root: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            project_root: project_root.into(),
            metrics,
        }
    }

    /// Start watching `project_id`, replacing any watcher already running
    /// for it. Events are delivered into `sink`.
    pub async fn start_watching(
        &self,
        project_id: &str,
        sandbox: Arc<dyn SandboxClient>,
        sink: mpsc::Sender<ChangeEvent>,
    ) -> Result<StartedWatch, WatchError> {
        self.stop_watching(project_id).await;

        let strategy =
            select_strategy(project_id, sandbox.clone(), &self.project_root, &self.config).await;
        let kind = strategy.kind();

        let handle = strategy.start(sink).await.map_err(|source| WatchError::Start {
            project_id: project_id.to_string(),
            strategy: kind.as_str(),
            source,
        })?;

        let watch_id = Uuid::new_v4();
        let entry = WatcherEntry {
            project_id: project_id.to_string(),
            watch_id,
            sandbox,
            started_at: Utc::now(),
            handle,
        };

        // A concurrent start may have registered in the meantime; the later
        // insert wins and the displaced watcher is stopped.
        if let Some(displaced) = self.entries.insert(project_id.to_string(), entry) {
            tracing::debug!("Replacing concurrently started watcher for project {project_id}");
            displaced.handle.stop().await;
        }
        self.metrics.set_active_watchers(self.entries.len());

        tracing::info!(
            "Watching project {project_id} with {} strategy ({watch_id})",
            kind.as_str()
        );
        Ok(StartedWatch { watch_id, kind })
    }

    /// Stop the watcher for `project_id`. No-op when none is registered.
    pub async fn stop_watching(&self, project_id: &str) -> bool {
        let Some((_, entry)) = self.entries.remove(project_id) else {
            return false;
        };
        self.metrics.set_active_watchers(self.entries.len());
        entry.handle.stop().await;
        tracing::info!("Stopped watching project {project_id}");
        true
    }

    /// Stop the watcher for `project_id` only if it is still the one
    /// identified by `watch_id`.
    pub async fn release(&self, project_id: &str, watch_id: WatchId) -> bool {
        let Some((_, entry)) = self
            .entries
            .remove_if(project_id, |_, entry| entry.watch_id == watch_id)
        else {
            return false;
        };
        self.metrics.set_active_watchers(self.entries.len());
        entry.handle.stop().await;
        tracing::info!("Released watcher {watch_id} for project {project_id}");
        true
    }

    /// Stop every watcher. Used at shutdown.
    pub async fn stop_all(&self) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<WatchHandle> = keys
            .iter()
            .filter_map(|k| self.entries.remove(k))
            .map(|(_, entry)| entry.handle)
            .collect();
        let count = handles.len();
        futures_util::future::join_all(handles.into_iter().map(WatchHandle::stop)).await;
        self.metrics.set_active_watchers(self.entries.len());
        tracing::info!("Stopped {count} watcher(s)");
    }

    /// Whether a watcher is currently active for `project_id`.
    pub fn is_watching(&self, project_id: &str) -> bool {
        self.entries
            .get(project_id)
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    pub fn info(&self, project_id: &str) -> Option<WatcherInfo> {
        self.entries.get(project_id).map(|entry| WatcherInfo {
            watch_id: entry.watch_id,
            sandbox_id: entry.sandbox.id().to_string(),
            kind: entry.kind(),
            started_at: entry.started_at,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
