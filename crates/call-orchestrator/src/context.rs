//! Lifecycle-scoped context shared by the worker and its handles

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::credentials::CredentialStore;
use crate::engine::SipEngine;
use crate::events::EventEmitter;
use crate::platform::Presentation;
use crate::screens::ScreenRegistry;

/// Everything one orchestrator instance needs, built once and dropped at shutdown
#[derive(Clone)]
pub struct OrchestratorContext {
    pub config: OrchestratorConfig,
    pub engine: Arc<dyn SipEngine>,
    pub presentation: Presentation,
    pub credentials: Arc<dyn CredentialStore>,
    pub events: EventEmitter,
    pub screens: ScreenRegistry,
}

impl OrchestratorContext {
    pub fn new(
        config: OrchestratorConfig,
        engine: Arc<dyn SipEngine>,
        presentation: Presentation,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let events = EventEmitter::new(config.engine.event_buffer);
        Self {
            config,
            engine,
            presentation,
            credentials,
            events,
            screens: ScreenRegistry::new(),
        }
    }
}

impl std::fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("config", &self.config)
            .field("screens", &self.screens)
            .finish_non_exhaustive()
    }
}
