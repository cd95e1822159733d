//! Change event transport: one long-lived frame stream per subscriber.
//!
//! Opening a stream resolves the project's sandbox, starts its watcher and
//! relays every change as a `file_change` frame, interleaved with periodic
//! `heartbeat` frames. The stream ends (and the watcher it started is
//! released) when the subscriber goes away or the watcher cannot continue.

use crate::config::TransportConfig;
use crate::observability::Metrics;
use crate::resolver::SandboxResolver;
use crate::watch::{ChangeEvent, FileChange, StrategyKind, WatchId, WatcherRegistry};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// One message on a change stream. Serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Frame {
    WatcherConnecting {
        project_id: String,
    },
    SandboxConnected {
        project_id: String,
        sandbox_id: String,
    },
    WatcherStarted {
        project_id: String,
        strategy: StrategyKind,
    },
    Heartbeat {
        timestamp: String,
    },
    Error {
        message: String,
    },
    FileChange {
        project_id: String,
        files: Vec<FileChange>,
    },
}

impl Frame {
    /// Event name used on the wire; identical to the `type` tag.
    pub fn event_name(&self) -> &'static str {
        match self {
            Frame::WatcherConnecting { .. } => "watcher_connecting",
            Frame::SandboxConnected { .. } => "sandbox_connected",
            Frame::WatcherStarted { .. } => "watcher_started",
            Frame::Heartbeat { .. } => "heartbeat",
            Frame::Error { .. } => "error",
            Frame::FileChange { .. } => "file_change",
        }
    }

    pub fn heartbeat() -> Self {
        Frame::Heartbeat {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }
}

impl From<ChangeEvent> for Frame {
    fn from(event: ChangeEvent) -> Self {
        Frame::FileChange {
            project_id: event.project_id,
            files: event.files,
        }
    }
}

/// Opens change streams against a shared watcher registry.
pub struct ChangeStreamService {
    resolver: Arc<dyn SandboxResolver>,
    registry: Arc<WatcherRegistry>,
    config: TransportConfig,
    change_capacity: usize,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl ChangeStreamService {
    pub fn new(
        resolver: Arc<dyn SandboxResolver>,
        registry: Arc<WatcherRegistry>,
        config: TransportConfig,
        change_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            resolver,
            registry,
            config,
            change_capacity,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// End every open stream and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn registry(&self) -> &Arc<WatcherRegistry> {
        &self.registry
    }

    /// Open a stream for `project_id`. Frames arrive in emission order; the
    /// stream ends when the receiver reports `None`. Dropping the receiver
    /// closes the connection.
    pub fn open(&self, project_id: impl Into<String>) -> mpsc::Receiver<Frame> {
        let (frames, rx) = mpsc::channel(self.config.frame_buffer.max(1));
        let connection = Connection {
            project_id: project_id.into(),
            frames,
            resolver: self.resolver.clone(),
            registry: self.registry.clone(),
            heartbeat: self.config.heartbeat_interval(),
            change_capacity: self.change_capacity.max(1),
            metrics: self.metrics.clone(),
            watch_id: None,
            closed: AtomicBool::new(false),
            shutdown: self.shutdown.clone(),
        };
        self.metrics.stream_opened();
        tokio::spawn(connection.run());
        rx
    }
}

struct Connection {
    project_id: String,
    frames: mpsc::Sender<Frame>,
    resolver: Arc<dyn SandboxResolver>,
    registry: Arc<WatcherRegistry>,
    heartbeat: std::time::Duration,
    change_capacity: usize,
    metrics: Arc<Metrics>,
    watch_id: Option<WatchId>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(mut self) {
        let shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            outcome = self.serve() => Some(outcome),
        };
        let outcome = outcome.unwrap_or_else(|| {
            let _ = self.frames.try_send(Frame::error("Server shutting down"));
            Err("server shutting down")
        });
        if let Err(reason) = outcome {
            tracing::debug!("Change stream for project {} ended: {reason}", self.project_id);
        }
        self.close().await;
    }

    async fn emit(&self, frame: Frame) -> Result<(), &'static str> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| "subscriber disconnected")
    }

    async fn serve(&mut self) -> Result<(), &'static str> {
        let project_id = self.project_id.clone();
        self.emit(Frame::WatcherConnecting {
            project_id: project_id.clone(),
        })
        .await?;

        let sandbox = match self.resolver.resolve_project(&project_id).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                tracing::warn!("Cannot stream changes for project {project_id}: {e}");
                self.emit(Frame::error(e.to_string())).await?;
                return Err("sandbox resolution failed");
            }
        };

        self.emit(Frame::SandboxConnected {
            project_id: project_id.clone(),
            sandbox_id: sandbox.id().to_string(),
        })
        .await?;

        let (changes_tx, mut changes) = mpsc::channel(self.change_capacity);
        let started = match self
            .registry
            .start_watching(&project_id, sandbox, changes_tx)
            .await
        {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!("{e}");
                self.emit(Frame::error(format!("File watcher unavailable: {e}")))
                    .await?;
                return Err("watcher failed to start");
            }
        };
        self.watch_id = Some(started.watch_id);

        self.emit(Frame::WatcherStarted {
            project_id: project_id.clone(),
            strategy: started.kind,
        })
        .await?;

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.frames.closed() => return Err("subscriber disconnected"),
                _ = heartbeat.tick() => self.emit(Frame::heartbeat()).await?,
                change = changes.recv() => match change {
                    Some(event) => {
                        self.metrics.record_change_event(started.kind);
                        self.emit(Frame::from(event)).await?;
                    }
                    None => {
                        self.emit(Frame::error("File watcher stopped")).await?;
                        return Err("watcher stopped");
                    }
                },
            }
        }
    }

    /// Release the watcher this connection started. Safe to call repeatedly;
    /// only the first call has an effect.
    async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(watch_id) = self.watch_id {
            self.registry.release(&self.project_id, watch_id).await;
        }
        self.metrics.stream_closed();
        true
    }
}
