//! Tunnel health and backup routes, plus liveness and metrics endpoints.

use super::AppState;
use crate::health::{FailoverAction, FailoverError, FailoverOutcome, ProbeReport};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelHealthRequest {
    pub endpoint_url: Option<String>,
    pub sandbox_id: Option<String>,
    pub check_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelBackupRequest {
    pub sandbox_id: Option<String>,
    pub project_id: Option<String>,
    pub action: Option<FailoverAction>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// POST /api/tunnel/health
pub async fn handle_tunnel_health(
    State(state): State<AppState>,
    body: Result<Json<TunnelHealthRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ProbeReport::unknown(format!("Invalid request body: {e}"))),
            )
                .into_response();
        }
    };

    let (Some(endpoint_url), Some(sandbox_id)) =
        (present(req.endpoint_url), present(req.sandbox_id))
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ProbeReport::unknown("endpointUrl and sandboxId are required")),
        )
            .into_response();
    };
    let check_port = req
        .check_port
        .unwrap_or(state.config.failover.primary_port);

    // Without a sandbox handle the probe still runs, just without the port
    // cross-check.
    let sandbox = match state.resolver.attach(&sandbox_id).await {
        Ok(sandbox) => Some(sandbox),
        Err(e) => {
            tracing::warn!("Tunnel health for {sandbox_id}: cannot attach sandbox: {e}");
            None
        }
    };

    let report = state
        .probe
        .probe(&endpoint_url, sandbox.as_deref(), check_port)
        .await;
    Json(report).into_response()
}

/// POST /api/tunnel/backup
pub async fn handle_tunnel_backup(
    State(state): State<AppState>,
    body: Result<Json<TunnelBackupRequest>, JsonRejection>,
) -> Response {
    let bad_request = |message: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(FailoverOutcome {
                success: false,
                sandbox_url: None,
                tunnel_url: None,
                error: Some(message),
            }),
        )
            .into_response()
    };

    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => return bad_request(format!("Invalid request body: {e}")),
    };
    let (Some(sandbox_id), Some(project_id)) = (present(req.sandbox_id), present(req.project_id))
    else {
        return bad_request("sandboxId and projectId are required".into());
    };
    let action = req.action.unwrap_or(FailoverAction::StartBackup);

    let sandbox = match state.resolver.attach(&sandbox_id).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(FailoverOutcome::failed(&FailoverError::Launch(e.into()))),
            )
                .into_response();
        }
    };

    let result = state
        .launcher
        .launch(&project_id, sandbox.as_ref(), action)
        .await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(FailoverError::AlreadyInProgress) => StatusCode::CONFLICT,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(FailoverOutcome::from(&result))).into_response()
}

/// GET /health
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "watchers": state.registry.len(),
    }))
}

/// GET /metrics
pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics error: {e}")).into_response(),
    }
}
