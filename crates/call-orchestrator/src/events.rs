//! Presentation events
//!
//! The worker publishes an [`OrchestratorEvent`] for every change the presentation
//! layer may want to react to. Events go out on a broadcast channel; consumers either
//! hold a receiver/stream directly or implement [`OrchestratorEventHandler`] and let
//! [`spawn_event_handler`] drive it.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use rvoip_call_orchestrator::events::{OrchestratorEventHandler, SessionStartedInfo};
//!
//! struct Banner;
//!
//! #[async_trait]
//! impl OrchestratorEventHandler for Banner {
//!     async fn on_session_started(&self, info: SessionStartedInfo) {
//!         println!("Call from {}", info.caller_name);
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

use crate::audio::AudioRoute;
use crate::error::OrchestratorError;
use crate::registration::RegistrationState;
use crate::session::{CallDirection, CallPhase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartedInfo {
    pub caller_name: String,
    pub caller_number: String,
    pub direction: CallDirection,
}

/// Events published by the orchestrator
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    SessionStarted(SessionStartedInfo),
    SessionPhaseChanged {
        phase: CallPhase,
        previous: CallPhase,
    },
    /// A re-INVITE is in flight for the session
    SessionUpdating,
    SessionEnded {
        /// Connected time, if the call ever connected
        duration: Option<Duration>,
    },
    MuteChanged {
        muted: bool,
    },
    RegistrationStateChanged {
        state: RegistrationState,
    },
    AudioRouteChanged {
        route: AudioRoute,
    },
    CommandFailed {
        command: &'static str,
        error: OrchestratorError,
    },
}

impl OrchestratorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::SessionStarted(_) => "session_started",
            OrchestratorEvent::SessionPhaseChanged { .. } => "session_phase_changed",
            OrchestratorEvent::SessionUpdating => "session_updating",
            OrchestratorEvent::SessionEnded { .. } => "session_ended",
            OrchestratorEvent::MuteChanged { .. } => "mute_changed",
            OrchestratorEvent::RegistrationStateChanged { .. } => "registration_state_changed",
            OrchestratorEvent::AudioRouteChanged { .. } => "audio_route_changed",
            OrchestratorEvent::CommandFailed { .. } => "command_failed",
        }
    }
}

/// Broadcast publisher for [`OrchestratorEvent`]s
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: OrchestratorEvent) {
        trace!(event = event.name(), "Emitting event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream. Lagged gaps are logged and skipped.
    pub fn stream(&self) -> impl Stream<Item = OrchestratorEvent> + Send + use<> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Event subscriber lagged");
                    None
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Callback-style consumer of orchestrator events. Every method defaults to a no-op.
#[async_trait]
pub trait OrchestratorEventHandler: Send + Sync {
    async fn on_session_started(&self, _info: SessionStartedInfo) {}

    async fn on_phase_changed(&self, _phase: CallPhase, _previous: CallPhase) {}

    async fn on_session_updating(&self) {}

    async fn on_session_ended(&self, _duration: Option<Duration>) {}

    async fn on_mute_changed(&self, _muted: bool) {}

    async fn on_registration_changed(&self, _state: RegistrationState) {}

    async fn on_audio_route_changed(&self, _route: AudioRoute) {}

    async fn on_command_failed(&self, _command: &'static str, _error: OrchestratorError) {}

    /// Route an event to the specific method
    async fn handle_event(&self, event: OrchestratorEvent) {
        match event {
            OrchestratorEvent::SessionStarted(info) => self.on_session_started(info).await,
            OrchestratorEvent::SessionPhaseChanged { phase, previous } => {
                self.on_phase_changed(phase, previous).await
            }
            OrchestratorEvent::SessionUpdating => self.on_session_updating().await,
            OrchestratorEvent::SessionEnded { duration } => self.on_session_ended(duration).await,
            OrchestratorEvent::MuteChanged { muted } => self.on_mute_changed(muted).await,
            OrchestratorEvent::RegistrationStateChanged { state } => {
                self.on_registration_changed(state).await
            }
            OrchestratorEvent::AudioRouteChanged { route } => {
                self.on_audio_route_changed(route).await
            }
            OrchestratorEvent::CommandFailed { command, error } => {
                self.on_command_failed(command, error).await
            }
        }
    }
}

/// Forward every event from `emitter` to `handler` until the emitter is dropped
pub fn spawn_event_handler(
    emitter: &EventEmitter,
    handler: Arc<dyn OrchestratorEventHandler>,
) -> JoinHandle<()> {
    let mut events = Box::pin(emitter.stream());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            handler.handle_event(event).await;
        }
    })
}
