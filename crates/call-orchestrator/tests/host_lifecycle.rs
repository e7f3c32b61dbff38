//! On-demand worker start through the host

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rvoip_call_orchestrator::{
    CommandOutcome, IgnoreReason, MemoryCredentialStore, MockEngine, MockPresentation,
    NotificationAction, OrchestratorConfig, OrchestratorContext, OrchestratorHost,
};

struct HostFixture {
    engine: Arc<MockEngine>,
    starts: Arc<AtomicUsize>,
    host: OrchestratorHost,
}

fn host() -> HostFixture {
    let engine = Arc::new(MockEngine::new().with_account("example.com"));
    let ui = MockPresentation::new();
    let store = Arc::new(MemoryCredentialStore::new());
    let starts = Arc::new(AtomicUsize::new(0));

    let host = OrchestratorHost::new({
        let engine = engine.clone();
        let starts = starts.clone();
        move || {
            starts.fetch_add(1, Ordering::SeqCst);
            OrchestratorContext::new(
                OrchestratorConfig::default(),
                engine.clone(),
                ui.presentation(),
                store.clone(),
            )
        }
    });

    HostFixture {
        engine,
        starts,
        host,
    }
}

#[tokio::test]
async fn test_notification_action_starts_a_worker() {
    let fx = host();
    assert!(fx.host.current().await.is_none());

    let outcome = fx
        .host
        .dispatch_notification_action(NotificationAction::HangUp)
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Ignored(IgnoreReason::NoSession));
    assert_eq!(fx.starts.load(Ordering::SeqCst), 1);
    assert!(fx.engine.is_running());

    fx.host
        .dispatch_notification_action(NotificationAction::ToggleMute)
        .await
        .unwrap();
    assert_eq!(fx.starts.load(Ordering::SeqCst), 1);

    fx.host.shutdown().await.unwrap();
    assert!(!fx.engine.is_running());
}

#[tokio::test]
async fn test_stopped_worker_is_resurrected() {
    let fx = host();
    let first = fx.host.ensure_running().await.unwrap();
    first.shutdown().await.unwrap();
    assert!(fx.host.current().await.is_none());

    fx.host
        .dispatch_notification_action(NotificationAction::OpenCallScreen)
        .await
        .unwrap();

    assert_eq!(fx.starts.load(Ordering::SeqCst), 2);
    let second = fx.host.current().await.unwrap();
    assert!(second.is_running());
    assert!(!first.is_running());

    fx.host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_share_one_worker() {
    let fx = host();

    let (a, b) = tokio::join!(fx.host.ensure_running(), fx.host.ensure_running());
    a.unwrap();
    b.unwrap();

    assert_eq!(fx.starts.load(Ordering::SeqCst), 1);
    fx.host.shutdown().await.unwrap();
    fx.host.shutdown().await.unwrap();
}
