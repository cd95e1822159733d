//! HTTP gateway: change-event stream, tunnel health and backup routes.

pub mod tunnel;
pub mod watch;

use crate::config::LivenessConfig;
use crate::health::{BackupLauncher, TunnelProbe};
use crate::observability::Metrics;
use crate::resolver::SandboxResolver;
use crate::transport::ChangeStreamService;
use crate::watch::WatcherRegistry;
use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LivenessConfig>,
    pub resolver: Arc<dyn SandboxResolver>,
    pub streams: Arc<ChangeStreamService>,
    pub registry: Arc<WatcherRegistry>,
    pub probe: Arc<TunnelProbe>,
    pub launcher: Arc<BackupLauncher>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: LivenessConfig, resolver: Arc<dyn SandboxResolver>) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(WatcherRegistry::new(
            config.watch.clone(),
            config.sandbox.project_root.clone(),
            metrics.clone(),
        ));
        let streams = Arc::new(ChangeStreamService::new(
            resolver.clone(),
            registry.clone(),
            config.transport.clone(),
            config.watch.channel_capacity,
            metrics.clone(),
        ));
        let probe = Arc::new(TunnelProbe::new(&config.probe, metrics.clone())?);
        let launcher = Arc::new(BackupLauncher::new(
            config.failover.clone(),
            config.sandbox.project_root.clone(),
            Duration::from_millis(config.probe.port_check_timeout_ms),
            metrics.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            resolver,
            streams,
            registry,
            probe,
            launcher,
            metrics,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.gateway.request_timeout_secs);
    let body_limit = state.config.gateway.max_body_bytes;

    Router::new()
        .route("/api/projects/watch", get(watch::handle_watch))
        .route("/api/tunnel/health", post(tunnel::handle_tunnel_health))
        .route("/api/tunnel/backup", post(tunnel::handle_tunnel_backup))
        .route("/health", get(tunnel::handle_health))
        .route("/metrics", get(tunnel::handle_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(body_limit))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    timeout,
                )),
        )
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
///
/// Open change streams and watchers are drained as soon as the signal fires,
/// so graceful shutdown does not wait on subscribers that never disconnect.
pub async fn serve<F>(state: AppState, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let streams = state.streams.clone();
    let addr = listener.local_addr().ok();
    tracing::info!("Liveness gateway listening on {addr:?}");

    let drain = {
        let registry = registry.clone();
        async move {
            shutdown.await;
            tracing::info!(
                "Gateway shutting down, stopping {} watcher(s)",
                registry.len()
            );
            streams.shutdown();
            registry.stop_all().await;
        }
    };

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(drain)
        .await
        .context("gateway server exited with error");

    // Streams that raced the signal may have registered a watcher late.
    registry.stop_all().await;
    result
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn run(state: AppState) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.gateway.host, state.config.gateway.port
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    serve(state, listener, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
