mod common;

use common::{FakeResolver, FakeSandbox};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zerobuild_liveness::config::{TransportConfig, WatchConfig};
use zerobuild_liveness::observability::Metrics;
use zerobuild_liveness::transport::{ChangeStreamService, Frame};
use zerobuild_liveness::watch::{ChangeAction, StrategyKind, WatcherRegistry};

fn service(resolver: FakeResolver) -> ChangeStreamService {
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(WatcherRegistry::new(
        WatchConfig::default(),
        "/home/user/project",
        metrics.clone(),
    ));
    ChangeStreamService::new(
        Arc::new(resolver),
        registry,
        TransportConfig::default(),
        64,
        metrics,
    )
}

/// Sandbox without native watch where `src/App.tsx` changes once.
fn edited_once() -> Arc<FakeSandbox> {
    let polls = AtomicUsize::new(0);
    FakeSandbox::new("sb-p1", move |cmd| {
        if cmd.contains("find .") && polls.fetch_add(1, Ordering::SeqCst) == 0 {
            "./src/App.tsx\n".to_string()
        } else {
            String::new()
        }
    })
}

#[tokio::test(start_paused = true)]
async fn polled_edit_arrives_as_single_file_change() {
    let svc = service(FakeResolver::default().with("P1", edited_once()));
    let mut rx = svc.open("P1");

    assert!(matches!(rx.recv().await, Some(Frame::WatcherConnecting { .. })));
    assert!(matches!(
        rx.recv().await,
        Some(Frame::SandboxConnected { ref sandbox_id, .. }) if sandbox_id == "sb-p1"
    ));
    assert!(matches!(
        rx.recv().await,
        Some(Frame::WatcherStarted {
            strategy: StrategyKind::Polling,
            ..
        })
    ));

    let started = tokio::time::Instant::now();
    let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("file change within the first polling tick")
        .unwrap();
    assert!(started.elapsed() <= Duration::from_secs(5));
    match frame {
        Frame::FileChange { project_id, files } => {
            assert_eq!(project_id, "P1");
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].path, "src/App.tsx");
            assert_eq!(files[0].action, ChangeAction::Modified);
        }
        other => panic!("expected file_change, got {other:?}"),
    }

    // Nothing else changes, so the next frame is a heartbeat.
    let next = rx.recv().await.unwrap();
    assert_eq!(next.event_name(), "heartbeat");
}

#[tokio::test(start_paused = true)]
async fn reconnect_starts_a_fresh_watcher() {
    let svc = service(FakeResolver::default().with("P1", edited_once()));

    let mut first = svc.open("P1");
    for _ in 0..3 {
        first.recv().await.unwrap();
    }
    assert!(svc.registry().is_watching("P1"));
    let first_id = svc.registry().info("P1").unwrap().watch_id;
    drop(first);

    for _ in 0..50 {
        if !svc.registry().is_watching("P1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!svc.registry().is_watching("P1"));

    let mut second = svc.open("P1");
    for _ in 0..3 {
        second.recv().await.unwrap();
    }
    let second_id = svc.registry().info("P1").unwrap().watch_id;
    assert_ne!(first_id, second_id);
    assert_eq!(svc.registry().len(), 1);
}

#[tokio::test]
async fn unknown_project_is_isolated_from_others() {
    let svc = service(FakeResolver::default().with("P1", edited_once()));

    let mut good = svc.open("P1");
    for _ in 0..3 {
        good.recv().await.unwrap();
    }

    let mut bad = svc.open("nope");
    assert_eq!(bad.recv().await.unwrap().event_name(), "watcher_connecting");
    assert_eq!(bad.recv().await.unwrap().event_name(), "error");
    assert!(bad.recv().await.is_none());

    assert!(svc.registry().is_watching("P1"));
    assert_eq!(svc.registry().len(), 1);
}
