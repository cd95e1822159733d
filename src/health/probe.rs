//! Tunnel probe: one health check of a project's public endpoint.
//!
//! A dead tunnel and a dead dev server need different remediation, so a
//! failing fetch is cross-checked by asking the sandbox whether the port is
//! still listening.

use super::port::is_port_listening;
use super::signatures::FailureSignatures;
use super::state::{ServerStatus, TunnelStatus};
use crate::config::ProbeConfig;
use crate::observability::Metrics;
use crate::sandbox::SandboxClient;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub is_alive: bool,
    pub tunnel_status: TunnelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_status: Option<ServerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ProbeReport {
    pub fn connected() -> Self {
        Self {
            is_alive: true,
            tunnel_status: TunnelStatus::Connected,
            server_status: None,
            reason: None,
        }
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self {
            is_alive: false,
            tunnel_status: TunnelStatus::Disconnected,
            server_status: None,
            reason: Some(reason.into()),
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            is_alive: false,
            tunnel_status: TunnelStatus::Unknown,
            server_status: None,
            reason: Some(reason.into()),
        }
    }
}

/// Classify a fetched response. Signature matches win over the status code.
pub fn classify_response(
    status: StatusCode,
    body: &str,
    signatures: &FailureSignatures,
) -> (TunnelStatus, Option<String>) {
    if let Some(signature) = signatures.find(body) {
        return (
            TunnelStatus::Disconnected,
            Some(format!("tunnel error page ({signature}), HTTP {}", status.as_u16())),
        );
    }
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return (TunnelStatus::Connected, None);
    }
    if status.is_server_error() {
        return (
            TunnelStatus::Disconnected,
            Some(format!("HTTP {}", status.as_u16())),
        );
    }
    (TunnelStatus::Connected, None)
}

pub struct TunnelProbe {
    http: reqwest::Client,
    signatures: FailureSignatures,
    port_check_budget: Duration,
    metrics: Arc<Metrics>,
}

impl TunnelProbe {
    pub fn new(config: &ProbeConfig, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent("ZeroBuild-Liveness/0.1")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build probe HTTP client: {e}"))?;

        Ok(Self {
            http,
            signatures: FailureSignatures::new(config.failure_signatures.iter().cloned())?,
            port_check_budget: Duration::from_millis(config.port_check_timeout_ms),
            metrics,
        })
    }

    /// Check `endpoint_url`; when it looks dead and a sandbox is available,
    /// also check whether `check_port` is listening inside the sandbox.
    pub async fn probe(
        &self,
        endpoint_url: &str,
        sandbox: Option<&dyn SandboxClient>,
        check_port: u16,
    ) -> ProbeReport {
        let mut report = match self.fetch(endpoint_url).await {
            Ok((status, body)) => match classify_response(status, &body, &self.signatures) {
                (TunnelStatus::Connected, _) => ProbeReport::connected(),
                (status, reason) => ProbeReport {
                    is_alive: false,
                    tunnel_status: status,
                    server_status: None,
                    reason,
                },
            },
            Err(e) => ProbeReport::disconnected(format!("fetch failed: {e}")),
        };

        if !report.is_alive {
            if let Some(sandbox) = sandbox {
                match is_port_listening(sandbox, check_port, self.port_check_budget).await {
                    Ok(listening) => {
                        report.server_status = Some(if listening {
                            ServerStatus::Running
                        } else {
                            ServerStatus::Stopped
                        });
                    }
                    Err(e) => {
                        tracing::debug!("Port {check_port} check in {} failed: {e}", sandbox.id());
                    }
                }
            }
            tracing::debug!(
                "Probe of {endpoint_url} failed: {} (server: {:?})",
                report.reason.as_deref().unwrap_or("unknown"),
                report.server_status
            );
        }

        self.metrics.record_probe(report.tunnel_status.as_str());
        report
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<(StatusCode, String)> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Ok((status, body))
    }
}
