//! Failover controller: claims the per-session slot, starts a backup and
//! switches the active endpoint.

use super::launcher::{BackupEndpoint, BackupLauncher};
use super::state::{Endpoint, FailoverAction, HealthState};
use crate::sandbox::SandboxClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    #[error("a backup launch is already in progress")]
    AlreadyInProgress,
    #[error("backup launch failed: {0}")]
    Launch(#[source] anyhow::Error),
    #[error("backup server on port {port} did not come up within {waited_secs}s")]
    NotReady { port: u16, waited_secs: u64 },
}

/// Something that can bring up a backup dev server.
#[async_trait]
pub trait BackupTrigger: Send + Sync {
    async fn trigger(&self, action: FailoverAction) -> Result<BackupEndpoint, FailoverError>;
}

/// Launches the backup inside the project's own sandbox.
pub struct SandboxBackup {
    launcher: Arc<BackupLauncher>,
    project_id: String,
    sandbox: Arc<dyn SandboxClient>,
}

impl SandboxBackup {
    pub fn new(
        launcher: Arc<BackupLauncher>,
        project_id: impl Into<String>,
        sandbox: Arc<dyn SandboxClient>,
    ) -> Self {
        Self {
            launcher,
            project_id: project_id.into(),
            sandbox,
        }
    }
}

#[async_trait]
impl BackupTrigger for SandboxBackup {
    async fn trigger(&self, action: FailoverAction) -> Result<BackupEndpoint, FailoverError> {
        self.launcher
            .launch(&self.project_id, self.sandbox.as_ref(), action)
            .await
    }
}

/// Wire shape of a failover attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_url: Option<String>,
    #[serde(rename = "ngrokUrl", skip_serializing_if = "Option::is_none")]
    pub tunnel_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FailoverOutcome {
    pub fn succeeded(endpoint: &BackupEndpoint) -> Self {
        Self {
            success: true,
            sandbox_url: Some(endpoint.sandbox_url.clone()),
            tunnel_url: Some(endpoint.tunnel_url.clone()),
            error: None,
        }
    }

    pub fn failed(error: &FailoverError) -> Self {
        Self {
            success: false,
            sandbox_url: None,
            tunnel_url: None,
            error: Some(error.to_string()),
        }
    }
}

impl From<&Result<BackupEndpoint, FailoverError>> for FailoverOutcome {
    fn from(result: &Result<BackupEndpoint, FailoverError>) -> Self {
        match result {
            Ok(endpoint) => Self::succeeded(endpoint),
            Err(e) => Self::failed(e),
        }
    }
}

pub struct FailoverController {
    project_id: String,
    backup: Arc<dyn BackupTrigger>,
    state: Arc<Mutex<HealthState>>,
}

impl FailoverController {
    pub fn new(
        project_id: impl Into<String>,
        backup: Arc<dyn BackupTrigger>,
        state: Arc<Mutex<HealthState>>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            backup,
            state,
        }
    }

    /// Run one failover attempt. A call made while another attempt is in
    /// flight is rejected without touching the backup.
    pub async fn trigger_backup(&self) -> Result<BackupEndpoint, FailoverError> {
        let action = self.state.lock().begin_failover()?;
        tracing::warn!(
            "Failover for project {}: {}",
            self.project_id,
            action.as_str()
        );

        match self.backup.trigger(action).await {
            Ok(endpoint) => {
                self.state
                    .lock()
                    .complete_failover(Endpoint::new(endpoint.tunnel_url.clone(), endpoint.port));
                tracing::info!(
                    "Project {} now served from backup port {}",
                    self.project_id,
                    endpoint.port
                );
                Ok(endpoint)
            }
            Err(e) => {
                self.state.lock().abort_failover();
                tracing::error!("Failover for project {} failed: {e}", self.project_id);
                Err(e)
            }
        }
    }
}
