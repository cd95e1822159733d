//! Per-session health monitor loop.
//!
//! A session waits for the dev server's readiness signal, then probes the
//! active endpoint once per interval. The first failed probe triggers a
//! failover; a failed failover is retried on the next tick because the
//! failure count is left in place.

use super::failover::{BackupTrigger, FailoverController, FailoverError};
use super::launcher::BackupEndpoint;
use super::probe::{ProbeReport, TunnelProbe};
use super::state::{Endpoint, HealthState, MonitorPhase};
use crate::config::MonitorConfig;
use crate::sandbox::SandboxClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Consecutive failed probes that trigger a failover.
pub const FAILOVER_THRESHOLD: u32 = 1;

const EVENT_CAPACITY: usize = 32;
const STOP_GRACE: Duration = Duration::from_secs(2);

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, target: &Endpoint) -> ProbeReport;
}

/// Probes through the tunnel and cross-checks the port in the sandbox.
pub struct SandboxProbe {
    probe: Arc<TunnelProbe>,
    sandbox: Arc<dyn SandboxClient>,
}

impl SandboxProbe {
    pub fn new(probe: Arc<TunnelProbe>, sandbox: Arc<dyn SandboxClient>) -> Self {
        Self { probe, sandbox }
    }
}

#[async_trait]
impl HealthProbe for SandboxProbe {
    async fn check(&self, target: &Endpoint) -> ProbeReport {
        self.probe
            .probe(&target.url, Some(self.sandbox.as_ref()), target.port)
            .await
    }
}

/// Notifications for whoever surfaces the session to a user.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MonitorEvent {
    Activated {
        project_id: String,
    },
    Checked {
        project_id: String,
        port: u16,
        report: ProbeReport,
    },
    Reconnecting {
        project_id: String,
    },
    Recovered {
        project_id: String,
        sandbox_url: String,
        #[serde(rename = "ngrokUrl")]
        tunnel_url: String,
    },
    RecoveryFailed {
        project_id: String,
        message: String,
    },
}

#[derive(Debug)]
pub enum CheckOutcome {
    /// Another check was still running.
    Skipped,
    /// The session was stopped while the probe ran.
    Discarded,
    Healthy,
    Degraded { failures: u32 },
    FailedOver(BackupEndpoint),
    FailoverFailed { failures: u32, error: String },
}

struct Checking<'a>(&'a AtomicBool);

impl Drop for Checking<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct HealthSession {
    project_id: String,
    probe: Arc<dyn HealthProbe>,
    controller: FailoverController,
    state: Arc<Mutex<HealthState>>,
    interval: Duration,
    checking: AtomicBool,
    cancel: CancellationToken,
    events: broadcast::Sender<MonitorEvent>,
}

impl HealthSession {
    pub fn new(
        project_id: impl Into<String>,
        primary: Endpoint,
        probe: Arc<dyn HealthProbe>,
        backup: Arc<dyn BackupTrigger>,
        config: &MonitorConfig,
    ) -> Arc<Self> {
        let project_id = project_id.into();
        let state = Arc::new(Mutex::new(HealthState::new(primary)));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            controller: FailoverController::new(project_id.clone(), backup, state.clone()),
            project_id,
            probe,
            state,
            interval: config.interval(),
            checking: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            events,
        })
    }

    /// Snapshot of the session state.
    pub fn state(&self) -> HealthState {
        self.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }

    /// One health check against the active endpoint.
    pub async fn check_once(&self) -> CheckOutcome {
        if self.cancel.is_cancelled() {
            return CheckOutcome::Discarded;
        }
        if self
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Health check for {} still running, skipping tick", self.project_id);
            return CheckOutcome::Skipped;
        }
        let _checking = Checking(&self.checking);

        let target = self.state.lock().active.clone();
        let report = self.probe.check(&target).await;
        if self.cancel.is_cancelled() {
            return CheckOutcome::Discarded;
        }

        let (failures, starting) = {
            let mut state = self.state.lock();
            state.record_probe(target.port, &report);
            (state.consecutive_failures, state.is_starting_backup)
        };
        self.emit(MonitorEvent::Checked {
            project_id: self.project_id.clone(),
            port: target.port,
            report: report.clone(),
        });

        if report.is_alive {
            return CheckOutcome::Healthy;
        }
        tracing::warn!(
            "Project {} unhealthy on port {} ({failures} consecutive): {}",
            self.project_id,
            target.port,
            report.reason.as_deref().unwrap_or("no reason")
        );
        if failures < FAILOVER_THRESHOLD || starting {
            return CheckOutcome::Degraded { failures };
        }

        self.emit(MonitorEvent::Reconnecting {
            project_id: self.project_id.clone(),
        });
        match self.controller.trigger_backup().await {
            Ok(endpoint) => {
                self.emit(MonitorEvent::Recovered {
                    project_id: self.project_id.clone(),
                    sandbox_url: endpoint.sandbox_url.clone(),
                    tunnel_url: endpoint.tunnel_url.clone(),
                });
                CheckOutcome::FailedOver(endpoint)
            }
            Err(FailoverError::AlreadyInProgress) => CheckOutcome::Degraded { failures },
            Err(e) => {
                self.emit(MonitorEvent::RecoveryFailed {
                    project_id: self.project_id.clone(),
                    message: "Tunnel recovery failed, please refresh".into(),
                });
                CheckOutcome::FailoverFailed {
                    failures,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Run the loop in the background once `ready` resolves. The first check
    /// fires one full interval after activation.
    pub fn spawn<F>(self: &Arc<Self>, ready: F) -> MonitorHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let session = self.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = session.cancel.cancelled() => return,
                () = ready => {}
            }

            session.state.lock().phase = MonitorPhase::Polling;
            session.emit(MonitorEvent::Activated {
                project_id: session.project_id.clone(),
            });
            tracing::info!(
                "Health monitor for {} active, checking every {:?}",
                session.project_id,
                session.interval
            );

            let start = tokio::time::Instant::now() + session.interval;
            let mut ticker = tokio::time::interval_at(start, session.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = session.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        session.check_once().await;
                    }
                }
            }
            tracing::debug!("Health monitor for {} stopped", session.project_id);
        });

        MonitorHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Owner handle for a running monitor loop. Dropping it stops the loop.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
