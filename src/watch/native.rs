//! Native watch: one recursive subscription on the project root, every
//! accepted notification forwarded as a single-file event.

use super::event::ChangeEvent;
use super::filter::EventFilter;
use super::strategy::{StrategyKind, WatchHandle, WatchStrategy};
use crate::sandbox::SandboxClient;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct NativeWatch {
    project_id: String,
    sandbox: Arc<dyn SandboxClient>,
    filter: EventFilter,
}

impl NativeWatch {
    pub fn new(project_id: &str, sandbox: Arc<dyn SandboxClient>, project_root: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            sandbox,
            filter: EventFilter::new(project_root),
        }
    }
}

#[async_trait]
impl WatchStrategy for NativeWatch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Native
    }

    async fn start(self: Box<Self>, sink: mpsc::Sender<ChangeEvent>) -> anyhow::Result<WatchHandle> {
        let mut raw = self.sandbox.watch_dir(self.filter.root()).await?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let NativeWatch {
            project_id, filter, ..
        } = *self;

        tracing::info!("Native watch started for project {project_id} at {}", filter.root());

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = raw.recv() => event,
                };
                let Some(event) = event else {
                    tracing::warn!("Native watch stream closed for project {project_id}");
                    break;
                };
                let Some(change) = filter.classify(&event.path, &event.kind) else {
                    continue;
                };
                let delivered = tokio::select! {
                    _ = token.cancelled() => break,
                    sent = sink.send(ChangeEvent::single(project_id.clone(), change)) => sent.is_ok(),
                };
                if !delivered {
                    tracing::debug!("Change sink closed for project {project_id}");
                    break;
                }
            }
            tracing::debug!("Native watch stopped for project {project_id}");
        });

        Ok(WatchHandle::new(StrategyKind::Native, cancel, task))
    }
}
