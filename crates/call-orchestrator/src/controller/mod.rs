//! The call state machine
//!
//! [`CallSessionController`] owns the one current [`CallSession`] and every
//! component that reacts to it. It is driven from a single worker task: engine
//! events, timer expiries and user commands all arrive as method calls on
//! `&mut self`, so no state here is ever shared.
//!
//! # Engine State Reduction
//!
//! | Engine state                           | Effect                                  |
//! |----------------------------------------|-----------------------------------------|
//! | IncomingReceived, IncomingEarlyMedia   | Ringing; creates the incoming session   |
//! | Outgoing*                              | Dialing                                 |
//! | Connected, StreamsRunning              | Connected; first time sets `started_at` |
//! | Paused, PausedByRemote                 | Held                                    |
//! | Updating, UpdatedByRemote              | phase kept, `SessionUpdating` emitted   |
//! | Pausing, Resuming, Referred, Idle      | ignored                                 |
//! | End, Released, Error                   | Ending then Ended; session destroyed    |
//!
//! After every event for the session the cached mute and hold flags are
//! overwritten with what the engine reports, and the notification slot is
//! re-derived.

mod commands;

pub use commands::{CommandOutcome, IgnoreReason};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::{AudioRoute, AudioRouteManager};
use crate::context::OrchestratorContext;
use crate::engine::{CallHandle, EngineCallState, EngineEvent, RemoteParty, SipEngine};
use crate::error::OrchestratorError;
use crate::events::{EventEmitter, OrchestratorEvent, SessionStartedInfo};
use crate::notification::{desired_notification, NotificationPresenter};
use crate::platform::{Presentation, ScreenKind, ScreenLaunch};
use crate::registration::{BackoffPolicy, RegistrationState, RegistrationSupervisor};
use crate::screens::{ScreenMessage, ScreenRegistry};
use crate::session::{
    implied_hold, reduce_engine_state, CallDirection, CallPhase, CallSession, CallSessionSnapshot,
    PhaseUpdate,
};
use crate::timer::{TimerEvent, TimerSender};
use crate::visibility::VisibilityCoordinator;

/// Owner of the current call session
pub struct CallSessionController {
    engine: Arc<dyn SipEngine>,
    engine_available: bool,
    presentation: Presentation,
    events: EventEmitter,
    screens: ScreenRegistry,
    auto_register: bool,
    session: Option<CallSession>,
    in_call_screen_launched: bool,
    routes: AudioRouteManager,
    registration: RegistrationSupervisor,
    notifications: NotificationPresenter,
    visibility: VisibilityCoordinator,
}

impl CallSessionController {
    pub fn new(context: &OrchestratorContext, timers: TimerSender) -> Self {
        let config = &context.config;
        Self {
            engine: context.engine.clone(),
            engine_available: true,
            presentation: context.presentation.clone(),
            events: context.events.clone(),
            screens: context.screens.clone(),
            auto_register: config.registration.auto_register,
            session: None,
            in_call_screen_launched: false,
            routes: AudioRouteManager::new(
                context.engine.clone(),
                context.presentation.audio.clone(),
                timers.clone(),
                config.verify_delay(),
            ),
            registration: RegistrationSupervisor::new(
                context.engine.clone(),
                context.credentials.clone(),
                config.credentials.namespace.clone(),
                BackoffPolicy::from_settings(&config.registration),
                timers.clone(),
            ),
            notifications: NotificationPresenter::new(
                context.presentation.notifications.clone(),
                config.notification.service_title.clone(),
                timers,
                config.tick_interval(),
            ),
            visibility: VisibilityCoordinator::new(),
        }
    }

    /// Mark whether the engine started. Without it every command is ignored.
    pub fn set_engine_available(&mut self, available: bool) {
        self.engine_available = available;
    }

    pub fn engine_available(&self) -> bool {
        self.engine_available
    }

    /// Show the idle notification and auto-register stored credentials.
    pub async fn startup(&mut self) {
        self.refresh_notification();
        if self.engine_available && self.auto_register {
            let before = self.registration.state().clone();
            self.registration.auto_register().await;
            self.after_registration_change(before);
        }
    }

    /// Drive the engine's event loop once.
    pub fn pump(&self) {
        if self.engine_available {
            self.engine.iterate();
        }
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn session_snapshot(&self) -> Option<CallSessionSnapshot> {
        self.session
            .as_ref()
            .map(|session| session.snapshot(self.routes.current_route()))
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration.state().clone()
    }

    pub fn current_route(&self) -> AudioRoute {
        self.routes.current_route()
    }

    pub fn is_visible(&self) -> bool {
        self.visibility.is_visible()
    }

    pub async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::CallStateChanged {
                call,
                state,
                remote,
                message,
            } => self.on_call_state(call, state, remote, message).await,
            EngineEvent::RegistrationStateChanged {
                identity,
                state,
                message,
            } => {
                let before = self.registration.state().clone();
                self.registration.on_engine_state(&identity, state, &message);
                self.after_registration_change(before);
            }
            EngineEvent::NetworkReachable { reachable } => {
                let before = self.registration.state().clone();
                self.registration.on_network_change(reachable).await;
                self.after_registration_change(before);
            }
        }
    }

    pub async fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::RegistrationRetryDue { generation } => {
                let before = self.registration.state().clone();
                self.registration.on_retry_due(generation).await;
                self.after_registration_change(before);
            }
            TimerEvent::NotificationTick { generation } => {
                if self.notifications.accept_tick(generation) {
                    self.refresh_notification();
                }
            }
            TimerEvent::RouteVerificationDue { generation } => self.routes.verify(generation),
        }
    }

    /// End any session locally, stop every timer and the engine.
    pub async fn shutdown(&mut self) {
        if self.session.is_some() {
            if let Some(call) = self.resolve_call() {
                if let Err(e) = self.engine.terminate(&call).await {
                    warn!(call = %call, error = %e, "Terminate during shutdown failed");
                }
            }
            self.end_session("shutdown");
        }
        self.registration.shutdown();
        self.notifications.clear();
        if self.engine_available {
            self.engine.stop();
        }
        info!("Call orchestrator stopped");
    }

    async fn on_call_state(
        &mut self,
        call: CallHandle,
        state: EngineCallState,
        remote: RemoteParty,
        message: String,
    ) {
        let update = reduce_engine_state(state);
        debug!(call = %call, ?state, ?update, "Call state changed");

        if let Some(session) = &self.session {
            if session.handle != call {
                if matches!(update, PhaseUpdate::Phase(CallPhase::Ringing | CallPhase::Dialing)) {
                    warn!(call = %call, current = %session.handle, "Second call while one is active, ignoring");
                } else {
                    debug!(call = %call, "Event for a call that is not current");
                }
                return;
            }
        }

        match update {
            PhaseUpdate::Terminate => {
                if !message.is_empty() {
                    info!(call = %call, reason = %message, "Call ended");
                }
                self.end_session(&format!("{:?}", state));
                return;
            }
            PhaseUpdate::Phase(CallPhase::Ringing) if self.session.is_none() => {
                self.begin_incoming(call, &remote);
            }
            PhaseUpdate::Phase(CallPhase::Dialing) if self.session.is_none() => {
                self.begin_outgoing(call, &remote);
            }
            _ if self.session.is_none() => {
                debug!(call = %call, ?state, "No session for call event");
                return;
            }
            PhaseUpdate::Phase(CallPhase::Connected) => self.enter_connected().await,
            PhaseUpdate::Phase(phase) => {
                if let Some(session) = self.session.as_mut() {
                    session.updating = false;
                }
                self.transition(phase);
            }
            PhaseUpdate::Transient => {
                if let Some(session) = self.session.as_mut() {
                    session.updating = true;
                }
                self.events.emit(OrchestratorEvent::SessionUpdating);
            }
            PhaseUpdate::Ignore => {}
        }

        self.reconcile(state);
        self.refresh_notification();
    }

    fn begin_incoming(&mut self, call: CallHandle, remote: &RemoteParty) {
        let session = CallSession::new(call, remote, CallDirection::Incoming, CallPhase::Ringing);
        info!(call = %session.handle, caller = %session.remote_display_name, "Incoming call");

        self.presentation.power.acquire_wake_lock();
        self.presentation.ringer.start();
        self.presentation.launcher.launch(ScreenLaunch {
            screen: ScreenKind::IncomingCall,
            caller_name: session.remote_display_name.clone(),
            caller_number: session.remote_number.clone(),
            auto_accepted: false,
        });
        self.start_session(session);
    }

    fn begin_outgoing(&mut self, call: CallHandle, remote: &RemoteParty) {
        let session = CallSession::new(call, remote, CallDirection::Outgoing, CallPhase::Dialing);
        info!(call = %session.handle, callee = %session.remote_display_name, "Outgoing call");

        self.presentation.power.acquire_wake_lock();
        self.launch_in_call_screen(&session, false);
        self.in_call_screen_launched = true;
        self.start_session(session);
    }

    fn start_session(&mut self, session: CallSession) {
        self.events.emit(OrchestratorEvent::SessionStarted(SessionStartedInfo {
            caller_name: session.remote_display_name.clone(),
            caller_number: session.remote_number.clone(),
            direction: session.direction,
        }));
        self.session = Some(session);
    }

    async fn enter_connected(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.answer_pending = false;
        session.updating = false;
        if session.phase == CallPhase::Connected {
            return;
        }
        let first_connect = session.mark_connected();
        if first_connect {
            info!(call = %session.handle, "Call connected");
        }
        self.transition(CallPhase::Connected);

        if !first_connect {
            return;
        }

        self.presentation.ringer.stop();
        self.screens.send_to(ScreenKind::IncomingCall, ScreenMessage::Close);

        let call = self.resolve_call();
        match self.routes.switch_to(AudioRoute::Earpiece, call.as_ref()).await {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.is_on_speaker = false;
                }
                self.events.emit(OrchestratorEvent::AudioRouteChanged {
                    route: AudioRoute::Earpiece,
                });
            }
            Err(e) => warn!(error = %e, "Could not route connected call to the earpiece"),
        }

        if !self.in_call_screen_launched {
            if let Some(session) = self.session.as_ref() {
                let auto_accepted = session.direction == CallDirection::Incoming;
                self.launch_in_call_screen(session, auto_accepted);
            }
            self.in_call_screen_launched = true;
        }
    }

    fn transition(&mut self, phase: CallPhase) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let previous = session.phase;
        if previous == phase {
            return;
        }
        session.phase = phase;
        if phase == CallPhase::Held {
            session.is_held = true;
        }
        debug!(call = %session.handle, %previous, %phase, "Phase changed");
        self.events
            .emit(OrchestratorEvent::SessionPhaseChanged { phase, previous });
        self.screens.broadcast(ScreenMessage::PhaseChanged(phase));
    }

    /// Overwrite cached flags with the engine's view.
    fn reconcile(&mut self, state: EngineCallState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(muted) = self.engine.microphone_muted(&session.handle) {
            if session.is_muted != muted {
                debug!(call = %session.handle, muted, "Mute state reconciled from engine");
                session.is_muted = muted;
                self.events.emit(OrchestratorEvent::MuteChanged { muted });
            }
        }
        if let Some(held) = implied_hold(state) {
            session.is_held = held;
        }
    }

    /// Tear the session down. A no-op when there is none.
    fn end_session(&mut self, reason: &str) {
        let Some(mut session) = self.session.take() else {
            debug!(reason, "No session to end");
            return;
        };

        let previous = session.phase;
        session.phase = CallPhase::Ending;
        self.events.emit(OrchestratorEvent::SessionPhaseChanged {
            phase: CallPhase::Ending,
            previous,
        });

        self.presentation.ringer.stop();
        self.presentation.power.release_wake_lock();
        self.routes.release();
        self.in_call_screen_launched = false;

        session.phase = CallPhase::Ended;
        self.events.emit(OrchestratorEvent::SessionPhaseChanged {
            phase: CallPhase::Ended,
            previous: CallPhase::Ending,
        });
        self.screens.broadcast(ScreenMessage::SessionEnded);

        let duration = session.connected_since.map(|since| since.elapsed());
        info!(
            call = %session.handle,
            reason,
            duration_secs = duration.map(|d| d.as_secs()),
            "Session ended"
        );
        self.events.emit(OrchestratorEvent::SessionEnded { duration });
        self.refresh_notification();
    }

    fn launch_in_call_screen(&self, session: &CallSession, auto_accepted: bool) {
        self.presentation.launcher.launch(ScreenLaunch {
            screen: ScreenKind::InCall,
            caller_name: session.remote_display_name.clone(),
            caller_number: session.remote_number.clone(),
            auto_accepted,
        });
    }

    /// Live handle from the engine, else the cached one.
    fn resolve_call(&self) -> Option<CallHandle> {
        self.engine
            .current_call()
            .or_else(|| self.session.as_ref().map(|session| session.handle.clone()))
    }

    fn refresh_notification(&mut self) {
        let spec = desired_notification(
            self.session.as_ref(),
            self.visibility.is_visible(),
            self.registration.state().status_text(),
        );
        self.notifications.sync(&spec);
    }

    fn after_registration_change(&mut self, before: RegistrationState) {
        let state = self.registration.state();
        if *state != before {
            self.events.emit(OrchestratorEvent::RegistrationStateChanged {
                state: state.clone(),
            });
        }
        self.refresh_notification();
    }

    fn report_failure(&self, command: &'static str, error: &OrchestratorError) {
        warn!(command, error = %error, category = error.category(), "Command failed");
        self.events.emit(OrchestratorEvent::CommandFailed {
            command,
            error: error.clone(),
        });
    }
}

#[cfg(test)]
mod tests;
