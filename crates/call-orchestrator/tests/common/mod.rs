//! Shared fixture for the integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rvoip_call_orchestrator::{
    AccountCredentials, CallHandle, CallPhase, CredentialStore, EngineCallState,
    MemoryCredentialStore, MockEngine, MockPresentation, OrchestratorConfig, OrchestratorContext,
    OrchestratorHandle, OrchestratorService, RemoteParty, StoredAccount,
};

pub struct Fixture {
    pub engine: Arc<MockEngine>,
    pub ui: MockPresentation,
    pub store: Arc<dyn CredentialStore>,
    pub handle: OrchestratorHandle,
}

impl Fixture {
    pub async fn start() -> Self {
        Self::start_with(
            OrchestratorConfig::default(),
            MockEngine::new().with_account("example.com"),
            Arc::new(MemoryCredentialStore::new()),
        )
        .await
    }

    pub async fn start_with(
        config: OrchestratorConfig,
        engine: MockEngine,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let engine = Arc::new(engine);
        let ui = MockPresentation::new();
        let context = OrchestratorContext::new(config, engine.clone(), ui.presentation(), store.clone());
        let handle = OrchestratorService::start(context)
            .await
            .expect("orchestrator should start");
        Self {
            engine,
            ui,
            store,
            handle,
        }
    }

    pub fn ring(&self, call: &CallHandle, remote: &RemoteParty) {
        self.engine
            .emit_call(call, EngineCallState::IncomingReceived, remote);
    }

    pub fn state(&self, call: &CallHandle, state: EngineCallState, remote: &RemoteParty) {
        self.engine.emit_call(call, state, remote);
    }

    /// Wait until the worker reports `phase` for the current session.
    pub async fn wait_for_phase(&self, phase: Option<CallPhase>) {
        let handle = self.handle.clone();
        eventually_async(move || {
            let handle = handle.clone();
            async move {
                let snapshot = handle.session_snapshot().await.expect("worker running");
                snapshot.map(|s| s.phase) == phase
            }
        })
        .await;
    }
}

pub fn alice() -> RemoteParty {
    RemoteParty::new("sip:1001@example.com")
        .with_display_name("Alice")
        .with_username("1001")
}

pub fn stored_account(registered: bool) -> StoredAccount {
    StoredAccount {
        credentials: AccountCredentials::new("alice", "secret", "example.com")
            .expect("valid credentials"),
        registered,
    }
}

/// Poll `condition` until it holds, failing after thirty (virtual) seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}

pub async fn eventually_async<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}
