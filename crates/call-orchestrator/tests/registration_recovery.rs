//! Registration, persisted credentials and reconnect backoff

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, stored_account, Fixture};
use rvoip_call_orchestrator::mock::EngineCommand;
use rvoip_call_orchestrator::{
    CredentialStore, EngineEvent, EngineRegistrationState, JsonFileCredentialStore,
    MemoryCredentialStore, MockEngine, OrchestratorConfig, OrchestratorError, RegistrationStatus,
};
use tokio::time::Instant;

const IDENTITY: &str = "sip:alice@example.com";

async fn registered_fixture() -> Fixture {
    let store = Arc::new(MemoryCredentialStore::with_account("default", stored_account(true)));
    let fx = Fixture::start_with(OrchestratorConfig::default(), MockEngine::new(), store).await;
    let engine = fx.engine.clone();
    eventually(move || engine.count(&EngineCommand::ConfigureAccount(IDENTITY.into())) == 1).await;
    fx
}

fn registration(fx: &Fixture, state: EngineRegistrationState) {
    fx.engine.emit(EngineEvent::registration(IDENTITY, state, "503 Service Unavailable"));
}

fn refreshes(fx: &Fixture) -> usize {
    fx.engine.count(&EngineCommand::RefreshRegistration)
}

#[tokio::test(start_paused = true)]
async fn test_failed_registration_retries_at_5_and_15_seconds() {
    let fx = registered_fixture().await;
    let started = Instant::now();

    registration(&fx, EngineRegistrationState::Failed);
    let engine = fx.engine.clone();
    eventually(move || engine.count(&EngineCommand::RefreshRegistration) == 1).await;
    let first = started.elapsed();
    assert!(first >= Duration::from_secs(5) && first < Duration::from_millis(5100), "{:?}", first);
    assert_eq!(fx.handle.registration_state().await.unwrap().attempt_count, 1);

    registration(&fx, EngineRegistrationState::Failed);
    let engine = fx.engine.clone();
    eventually(move || engine.count(&EngineCommand::RefreshRegistration) == 2).await;
    let second = started.elapsed();
    assert!(second >= Duration::from_secs(15) && second < Duration::from_millis(15100), "{:?}", second);

    registration(&fx, EngineRegistrationState::Ok);
    let handle = fx.handle.clone();
    common::eventually_async(move || {
        let handle = handle.clone();
        async move {
            handle.registration_state().await.unwrap().status == RegistrationStatus::Registered
        }
    })
    .await;

    let state = fx.handle.registration_state().await.unwrap();
    assert_eq!(state.attempt_count, 0);
    assert_eq!(state.next_retry_at, None);
    assert_eq!(state.status_text(), "Ready for calls");
    assert_eq!(fx.ui.notifications.current().unwrap().text, "Ready for calls");

    fx.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_network_loss_pauses_retries_and_restore_refreshes() {
    let fx = registered_fixture().await;

    registration(&fx, EngineRegistrationState::Failed);
    fx.engine.emit(EngineEvent::NetworkReachable { reachable: false });
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(refreshes(&fx), 0);
    let offline = fx.handle.registration_state().await.unwrap();
    assert!(!offline.network_available);
    assert_eq!(offline.status_text(), "No network - Waiting...");
    assert_eq!(fx.ui.notifications.current().unwrap().text, "No network - Waiting...");

    fx.engine.emit(EngineEvent::NetworkReachable { reachable: true });
    let engine = fx.engine.clone();
    let restored_at = Instant::now();
    eventually(move || engine.count(&EngineCommand::RefreshRegistration) == 1).await;
    assert!(restored_at.elapsed() < Duration::from_secs(1));

    let online = fx.handle.registration_state().await.unwrap();
    assert_eq!(online.attempt_count, 0);
    assert_eq!(online.status_text(), "Reconnecting...");

    fx.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unregister_stops_reconnects() {
    let fx = registered_fixture().await;

    assert!(fx.handle.unregister().await.unwrap().is_applied());
    assert!(fx.engine.commands().contains(&EngineCommand::DisableRegistration));
    registration(&fx, EngineRegistrationState::Cleared);
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(refreshes(&fx), 0);
    let state = fx.handle.registration_state().await.unwrap();
    assert_eq!(state.status, RegistrationStatus::Unregistered);
    assert_eq!(fx.store.load("default").await.unwrap().map(|r| r.registered), Some(false));

    fx.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_account_is_not_auto_registered() {
    let store = Arc::new(MemoryCredentialStore::with_account("default", stored_account(false)));
    let fx = Fixture::start_with(OrchestratorConfig::default(), MockEngine::new(), store).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(fx.engine.commands().is_empty());
    assert_eq!(
        fx.handle.registration_state().await.unwrap().status,
        RegistrationStatus::Unregistered
    );
    fx.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_credentials_are_rejected() {
    let fx = Fixture::start().await;

    let err = fx
        .handle
        .register_account("alice@example.com", "secret", "example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidCredentials { .. }));
    assert!(!err.is_recoverable());
    assert!(fx.store.load("default").await.unwrap().is_none());

    fx.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_json_store_survives_restart() {
    let path = std::env::temp_dir().join(format!("orchestrator-{}.json", uuid::Uuid::new_v4()));

    let first = Fixture::start_with(
        OrchestratorConfig::default(),
        MockEngine::new(),
        Arc::new(JsonFileCredentialStore::new(&path)),
    )
    .await;
    first
        .handle
        .register_account("alice", "secret", "example.com")
        .await
        .unwrap();
    first.handle.shutdown().await.unwrap();

    let second = Fixture::start_with(
        OrchestratorConfig::default(),
        MockEngine::new(),
        Arc::new(JsonFileCredentialStore::new(&path)),
    )
    .await;
    let engine = second.engine.clone();
    eventually(move || engine.count(&EngineCommand::ConfigureAccount(IDENTITY.into())) == 1).await;
    second.handle.shutdown().await.unwrap();

    let _ = std::fs::remove_file(&path);
}
