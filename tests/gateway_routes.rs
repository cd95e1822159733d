mod common;

use common::{FakeResolver, FakeSandbox};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};
use zerobuild_liveness::config::LivenessConfig;
use zerobuild_liveness::gateway::{self, AppState};
use zerobuild_liveness::watch::WatcherRegistry;

struct TestGateway {
    addr: SocketAddr,
    registry: Arc<WatcherRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
    http: reqwest::Client,
}

impl TestGateway {
    async fn start(resolver: FakeResolver) -> Self {
        let state = AppState::new(LivenessConfig::default(), Arc::new(resolver)).unwrap();
        let registry = state.registry.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(gateway::serve(state, listener, async {
            let _ = rx.await;
        }));
        Self {
            addr,
            registry,
            shutdown: Some(tx),
            task,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.task)
            .await
            .expect("serve returns after shutdown")
            .unwrap()
            .unwrap();
    }
}

fn idle_sandbox() -> Arc<FakeSandbox> {
    FakeSandbox::new("sb-1", |cmd| {
        if cmd.contains("ss -tln") {
            "listening".into()
        } else {
            String::new()
        }
    })
}

#[tokio::test]
async fn watch_without_project_id_is_rejected() {
    let mut gw = TestGateway::start(FakeResolver::default()).await;

    let resp = gw.http.get(gw.url("/api/projects/watch")).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("projectId"));

    gw.stop().await;
}

#[tokio::test]
async fn watch_stream_sends_named_events() {
    let mut gw = TestGateway::start(FakeResolver::default().with("p1", idle_sandbox())).await;

    let mut resp = gw
        .http
        .get(gw.url("/api/projects/watch?projectId=p1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut seen = String::new();
    let read = tokio::time::timeout(Duration::from_secs(10), async {
        while !seen.contains("event: watcher_started") {
            match resp.chunk().await.unwrap() {
                Some(chunk) => seen.push_str(&String::from_utf8_lossy(&chunk)),
                None => break,
            }
        }
    })
    .await;
    assert!(read.is_ok(), "stream stalled, got: {seen}");
    assert!(seen.contains("event: watcher_connecting"));
    assert!(seen.contains("event: sandbox_connected"));
    assert!(seen.contains("\"sandboxId\":\"sb-1\""));

    drop(resp);
    gw.stop().await;
}

#[tokio::test]
async fn watch_stream_for_unknown_project_ends_with_error() {
    let mut gw = TestGateway::start(FakeResolver::default()).await;

    let resp = gw
        .http
        .get(gw.url("/api/projects/watch?projectId=ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = tokio::time::timeout(Duration::from_secs(10), resp.text())
        .await
        .unwrap()
        .unwrap();
    assert!(body.contains("event: error"));
    assert!(body.contains("ghost"));

    gw.stop().await;
}

#[tokio::test]
async fn tunnel_health_requires_fields() {
    let mut gw = TestGateway::start(FakeResolver::default()).await;

    let resp = gw
        .http
        .post(gw.url("/api/tunnel/health"))
        .json(&json!({ "endpointUrl": "https://x.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["tunnelStatus"], "unknown");
    assert_eq!(body["isAlive"], false);

    gw.stop().await;
}

#[tokio::test]
async fn tunnel_health_reports_probe_result() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("ERR_NGROK_3200 tunnel not found"))
        .mount(&upstream)
        .await;
    let mut gw = TestGateway::start(FakeResolver::default().with("p1", idle_sandbox())).await;

    let resp = gw
        .http
        .post(gw.url("/api/tunnel/health"))
        .json(&json!({ "endpointUrl": upstream.uri(), "sandboxId": "sb-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["isAlive"], false);
    assert_eq!(body["tunnelStatus"], "disconnected");
    assert_eq!(body["serverStatus"], "running");

    gw.stop().await;
}

#[tokio::test]
async fn backup_starts_and_returns_new_endpoint() {
    let mut gw = TestGateway::start(FakeResolver::default().with("p1", idle_sandbox())).await;

    let resp = gw
        .http
        .post(gw.url("/api/tunnel/backup"))
        .json(&json!({ "sandboxId": "sb-1", "projectId": "p1", "action": "start_backup" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["sandboxUrl"], "http://localhost:3001");
    assert_eq!(body["ngrokUrl"], "https://3001-sb-1.sandbox.test");

    let bad = gw
        .http
        .post(gw.url("/api/tunnel/backup"))
        .json(&json!({ "projectId": "p1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
    let body: Value = bad.json().await.unwrap();
    assert_eq!(body["success"], false);

    gw.stop().await;
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let mut gw = TestGateway::start(FakeResolver::default()).await;

    let health: Value = gw
        .http
        .get(gw.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let metrics = gw
        .http
        .get(gw.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("liveness_active_watchers"));
    assert!(metrics.contains("liveness_stream_connections"));

    gw.stop().await;
}

#[tokio::test]
async fn shutdown_with_open_stream_stops_watchers() {
    let mut gw = TestGateway::start(FakeResolver::default().with("p1", idle_sandbox())).await;

    let mut resp = gw
        .http
        .get(gw.url("/api/projects/watch?projectId=p1"))
        .send()
        .await
        .unwrap();
    let mut seen = String::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !seen.contains("event: watcher_started") {
            match resp.chunk().await.unwrap() {
                Some(chunk) => seen.push_str(&String::from_utf8_lossy(&chunk)),
                None => break,
            }
        }
    })
    .await
    .unwrap();
    assert!(gw.registry.is_watching("p1"));

    // The subscriber stays connected while the gateway shuts down.
    gw.stop().await;
    assert!(gw.registry.is_empty());

    let rest = tokio::time::timeout(Duration::from_secs(10), async {
        let mut rest = String::new();
        while let Ok(Some(chunk)) = resp.chunk().await {
            rest.push_str(&String::from_utf8_lossy(&chunk));
        }
        rest
    })
    .await
    .unwrap();
    assert!(rest.contains("event: error"));
}
