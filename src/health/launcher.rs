//! Starts a backup dev server inside a sandbox and waits for it.

use super::failover::FailoverError;
use super::port::{is_port_listening, wait_until_listening};
use super::state::FailoverAction;
use crate::config::FailoverConfig;
use crate::observability::Metrics;
use crate::sandbox::{shell_quote, SandboxClient};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const SPAWN_TIMEOUT_MS: u64 = 15_000;

/// Where a freshly started backup server can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEndpoint {
    pub port: u16,
    /// Address inside the sandbox.
    pub sandbox_url: String,
    /// Public tunnel URL.
    pub tunnel_url: String,
}

pub struct BackupLauncher {
    config: FailoverConfig,
    project_root: String,
    port_check_budget: Duration,
    in_flight: DashMap<String, ()>,
    metrics: Arc<Metrics>,
}

struct InFlight<'a> {
    map: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

impl BackupLauncher {
    pub fn new(
        config: FailoverConfig,
        project_root: impl Into<String>,
        port_check_budget: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            port_check_budget,
            in_flight: DashMap::new(),
            metrics,
        }
    }

    pub fn is_launching(&self, project_id: &str) -> bool {
        self.in_flight.contains_key(project_id)
    }

    /// Start (or restart) the backup dev server for `project_id`. Only one
    /// launch per project runs at a time; a concurrent call is rejected.
    pub async fn launch(
        &self,
        project_id: &str,
        sandbox: &dyn SandboxClient,
        action: FailoverAction,
    ) -> Result<BackupEndpoint, FailoverError> {
        let _guard = match self.in_flight.entry(project_id.to_string()) {
            Entry::Occupied(_) => {
                self.metrics.record_failover("rejected");
                return Err(FailoverError::AlreadyInProgress);
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                InFlight {
                    map: &self.in_flight,
                    key: project_id.to_string(),
                }
            }
        };

        let result = self.run(project_id, sandbox, action).await;
        self.metrics.record_failover(if result.is_ok() { "success" } else { "failure" });
        result
    }

    async fn run(
        &self,
        project_id: &str,
        sandbox: &dyn SandboxClient,
        action: FailoverAction,
    ) -> Result<BackupEndpoint, FailoverError> {
        let port = self.config.backup_port;
        tracing::info!(
            "Backup launch for project {project_id} in {}: {} on port {port}",
            sandbox.id(),
            action.as_str()
        );

        let already_up = action == FailoverAction::StartBackup
            && matches!(
                is_port_listening(sandbox, port, self.port_check_budget).await,
                Ok(true)
            );

        if already_up {
            tracing::info!("Port {port} already serving in {}, reusing it", sandbox.id());
        } else {
            if action == FailoverAction::CleanupAndRestart {
                self.cleanup(sandbox, port).await;
            }
            self.spawn_dev_server(sandbox, port).await?;

            let ready = wait_until_listening(
                sandbox,
                port,
                self.port_check_budget,
                self.config.ready_poll(),
                self.config.ready_timeout(),
            )
            .await;
            if !ready {
                return Err(FailoverError::NotReady {
                    port,
                    waited_secs: self.config.ready_timeout_secs,
                });
            }
        }

        let tunnel_url = sandbox
            .get_preview_url(port)
            .await
            .map_err(FailoverError::Launch)?;

        tracing::info!("Backup for project {project_id} ready at {tunnel_url}");
        Ok(BackupEndpoint {
            port,
            sandbox_url: format!("http://localhost:{port}"),
            tunnel_url,
        })
    }

    async fn cleanup(&self, sandbox: &dyn SandboxClient, port: u16) {
        let command = self.config.cleanup_command.replace("{port}", &port.to_string());
        match sandbox.run_command(&command, "/", SPAWN_TIMEOUT_MS).await {
            Ok(out) if !out.success() => tracing::debug!(
                "Cleanup of port {port} exited with {}: {}",
                out.exit_code,
                out.stderr.trim()
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!("Cleanup of port {port} in {} failed: {e}", sandbox.id()),
        }
    }

    async fn spawn_dev_server(
        &self,
        sandbox: &dyn SandboxClient,
        port: u16,
    ) -> Result<(), FailoverError> {
        let dev_command = self.config.dev_command.replace("{port}", &port.to_string());
        let command = format!(
            "cd {root} && nohup sh -c {cmd} > /tmp/zerobuild-backup-{port}.log 2>&1 &",
            root = shell_quote(&self.project_root),
            cmd = shell_quote(&dev_command),
        );

        let out = sandbox
            .run_command(&command, &self.project_root, SPAWN_TIMEOUT_MS)
            .await
            .map_err(FailoverError::Launch)?;

        if !out.success() {
            return Err(FailoverError::Launch(anyhow::anyhow!(
                "backup dev server failed to spawn (exit {}): {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(())
    }
}
