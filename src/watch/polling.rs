//! Polling watch: diff "files newer than the watermark" on an adaptive
//! schedule.
//!
//! Each tick asks the sandbox for files modified after a marker file and
//! advances the marker in the same command. Polling cannot tell creates and
//! deletes from edits, so every reported file is [`ChangeAction::Modified`].
//!
//! [`ChangeAction::Modified`]: super::event::ChangeAction::Modified

use super::event::ChangeEvent;
use super::filter::{EventFilter, IGNORED_DIRS};
use super::strategy::{StrategyKind, WatchHandle, WatchStrategy};
use crate::config::{BackoffStep, WatchConfig};
use crate::sandbox::{shell_quote, SandboxClient};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Adaptive polling intervals: each step holds for its tick count, the last
/// step repeats forever.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    steps: Vec<BackoffStep>,
}

impl BackoffSchedule {
    pub fn new(steps: Vec<BackoffStep>) -> Self {
        Self { steps }
    }

    /// Delay before the tick that follows `completed` finished ticks.
    pub fn delay(&self, completed: u32) -> Duration {
        let mut remaining = completed;
        for (i, step) in self.steps.iter().enumerate() {
            let last = i + 1 == self.steps.len();
            if last || remaining < step.ticks {
                return Duration::from_secs(step.interval_secs);
            }
            remaining -= step.ticks;
        }
        Duration::from_secs(30)
    }
}

pub struct PollingWatch {
    project_id: String,
    sandbox: Arc<dyn SandboxClient>,
    filter: EventFilter,
    marker: String,
    schedule: BackoffSchedule,
    tick_timeout: Duration,
}

impl PollingWatch {
    pub fn new(
        project_id: &str,
        sandbox: Arc<dyn SandboxClient>,
        project_root: &str,
        config: &WatchConfig,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            sandbox,
            filter: EventFilter::new(project_root),
            marker: marker_path(&config.marker_dir, project_id),
            schedule: BackoffSchedule::new(config.backoff.clone()),
            tick_timeout: config.tick_timeout(),
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.tick_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    async fn init_watermark(&self) -> anyhow::Result<()> {
        let marker = shell_quote(&self.marker);
        let command = format!("mkdir -p \"$(dirname {marker})\" && touch {marker}");
        let out = tokio::time::timeout(
            self.tick_timeout,
            self.sandbox.run_command(&command, "/", self.timeout_ms()),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out creating watch marker {}", self.marker))??;

        anyhow::ensure!(
            out.success(),
            "Failed to create watch marker {} (exit {}): {}",
            self.marker,
            out.exit_code,
            out.stderr.trim()
        );
        Ok(())
    }

    /// Files changed since the watermark; advances the watermark.
    fn tick_command(&self) -> String {
        let marker = shell_quote(&self.marker);
        let next = shell_quote(&format!("{}.next", self.marker));
        let prune = IGNORED_DIRS
            .iter()
            .map(|d| format!("-not -path '*/{d}/*'"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "cd {root} && touch {next} && {{ find . -type f -newer {marker} {prune} 2>/dev/null || true; }} && mv -f {next} {marker}",
            root = shell_quote(self.filter.root()),
        )
    }

    async fn poll_once(&self) -> anyhow::Result<Option<ChangeEvent>> {
        let command = self.tick_command();
        let out = tokio::time::timeout(
            self.tick_timeout,
            self.sandbox.run_command(&command, "/", self.timeout_ms()),
        )
        .await
        .map_err(|_| anyhow::anyhow!("poll timed out after {:?}", self.tick_timeout))??;

        anyhow::ensure!(
            out.success(),
            "poll command exited with {}: {}",
            out.exit_code,
            out.stderr.trim()
        );

        let now = chrono::Utc::now();
        let mut seen = HashSet::new();
        let files = out
            .stdout
            .lines()
            .filter_map(|line| self.filter.classify_at(line, "modify", now))
            .filter(|change| seen.insert(change.path.clone()))
            .collect();

        Ok(ChangeEvent::new(self.project_id.clone(), files))
    }
}

#[async_trait]
impl WatchStrategy for PollingWatch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Polling
    }

    async fn start(self: Box<Self>, sink: mpsc::Sender<ChangeEvent>) -> anyhow::Result<WatchHandle> {
        self.init_watermark().await?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tracing::info!(
            "Polling watch started for project {} (marker {})",
            self.project_id,
            self.marker
        );

        let task = tokio::spawn(async move {
            let watch = *self;
            let mut completed: u32 = 0;
            loop {
                let delay = watch.schedule.delay(completed);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                completed = completed.saturating_add(1);

                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = watch.poll_once() => result,
                };

                match result {
                    Ok(Some(event)) => {
                        tracing::debug!(
                            "Poll tick {completed} for project {}: {} changed file(s)",
                            watch.project_id,
                            event.files.len()
                        );
                        let delivered = tokio::select! {
                            _ = token.cancelled() => break,
                            sent = sink.send(event) => sent.is_ok(),
                        };
                        if !delivered {
                            tracing::debug!("Change sink closed for project {}", watch.project_id);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Poll tick {completed} for project {} failed: {e}", watch.project_id);
                    }
                }
            }
            tracing::debug!("Polling watch stopped for project {}", watch.project_id);
        });

        Ok(WatchHandle::new(StrategyKind::Polling, cancel, task))
    }
}

fn marker_path(marker_dir: &str, project_id: &str) -> String {
    let safe: String = project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}/.zerobuild-watch-{safe}", marker_dir.trim_end_matches('/'))
}
