use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use super::*;
use crate::audio::{AudioDeviceInfo, AudioDeviceType, AudioMode};
use crate::config::OrchestratorConfig;
use crate::credentials::MemoryCredentialStore;
use crate::engine::DeclineReason;
use crate::mock::{EngineCommand, MockEngine, MockPresentation};
use crate::notification::{NotificationAction, NotificationKind};
use crate::platform::PlatformAudio;
use crate::timer::{timer_channel, TimerReceiver};

struct Harness {
    controller: CallSessionController,
    engine: Arc<MockEngine>,
    ui: MockPresentation,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    timers: TimerReceiver,
    events: broadcast::Receiver<OrchestratorEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_engine(MockEngine::new().with_account("example.com"))
    }

    fn with_engine(engine: MockEngine) -> Self {
        let engine = Arc::new(engine);
        let ui = MockPresentation::new();
        let context = OrchestratorContext::new(
            OrchestratorConfig::default(),
            engine.clone(),
            ui.presentation(),
            Arc::new(MemoryCredentialStore::new()),
        );
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        engine.start(engine_tx).unwrap();
        let (timer_tx, timers) = timer_channel();
        let events = context.events.subscribe();
        let controller = CallSessionController::new(&context, timer_tx);
        Self {
            controller,
            engine,
            ui,
            engine_rx,
            timers,
            events,
        }
    }

    async fn deliver(&mut self) {
        while let Ok(event) = self.engine_rx.try_recv() {
            self.controller.handle_engine_event(event).await;
        }
    }

    async fn call_state(&mut self, call: &CallHandle, state: EngineCallState, remote: &RemoteParty) {
        self.engine.emit_call(call, state, remote);
        self.deliver().await;
    }

    async fn incoming_from_alice(&mut self) -> CallHandle {
        let call = CallHandle::new("call-1");
        let remote = alice();
        self.call_state(&call, EngineCallState::IncomingReceived, &remote).await;
        call
    }

    async fn connected_call(&mut self) -> CallHandle {
        let call = self.incoming_from_alice().await;
        self.controller.answer().await.unwrap();
        self.call_state(&call, EngineCallState::StreamsRunning, &alice()).await;
        call
    }

    fn drain_events(&mut self) -> Vec<OrchestratorEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn notification_kind(&self) -> Option<NotificationKind> {
        self.ui.notifications.current().map(|n| n.kind)
    }

    fn phase(&self) -> Option<CallPhase> {
        self.controller.session().map(|s| s.phase)
    }
}

fn alice() -> RemoteParty {
    RemoteParty::new("sip:1001@example.com")
        .with_display_name("Alice")
        .with_username("1001")
}

#[tokio::test(start_paused = true)]
async fn alice_call_lifecycle() {
    let mut h = Harness::new();
    let call = h.incoming_from_alice().await;

    let session = h.controller.session().unwrap();
    assert_eq!(session.phase, CallPhase::Ringing);
    assert_eq!(session.remote_display_name, "Alice");
    assert_eq!(session.remote_number, "1001");
    assert!(h.ui.ringer.is_ringing());
    assert!(h.ui.power.is_held());
    assert_eq!(h.notification_kind(), Some(NotificationKind::Incoming));
    assert_eq!(h.ui.launcher.launches()[0].screen, ScreenKind::IncomingCall);

    assert_eq!(h.controller.answer().await.unwrap(), CommandOutcome::Applied);
    assert!(h.engine.commands().contains(&EngineCommand::Accept(call.clone())));
    assert_eq!(h.phase(), Some(CallPhase::Ringing));
    assert_eq!(h.notification_kind(), Some(NotificationKind::Idle));

    h.call_state(&call, EngineCallState::Connected, &alice()).await;
    let started_at = h.controller.session().unwrap().started_at;
    assert!(started_at.is_some());
    assert!(!h.ui.ringer.is_ringing());
    assert_eq!(h.controller.current_route(), AudioRoute::Earpiece);
    assert_eq!(h.notification_kind(), Some(NotificationKind::Ongoing));

    h.call_state(&call, EngineCallState::StreamsRunning, &alice()).await;
    assert_eq!(h.controller.session().unwrap().started_at, started_at);

    h.controller.toggle_hold().await.unwrap();
    assert!(h.engine.commands().contains(&EngineCommand::Pause(call.clone())));
    h.call_state(&call, EngineCallState::Paused, &alice()).await;
    assert_eq!(h.phase(), Some(CallPhase::Held));
    assert_eq!(h.notification_kind(), Some(NotificationKind::Idle));

    h.controller.toggle_hold().await.unwrap();
    assert!(h.engine.commands().contains(&EngineCommand::Resume(call.clone())));
    h.call_state(&call, EngineCallState::StreamsRunning, &alice()).await;
    assert_eq!(h.phase(), Some(CallPhase::Connected));
    assert_eq!(h.controller.session().unwrap().started_at, started_at);

    h.controller.hang_up().await.unwrap();
    assert!(h.engine.commands().contains(&EngineCommand::Terminate(call.clone())));
    h.call_state(&call, EngineCallState::End, &alice()).await;

    assert!(h.controller.session().is_none());
    assert!(!h.ui.power.is_held());
    assert_eq!(h.ui.audio.mode(), AudioMode::Normal);
    assert_eq!(h.notification_kind(), Some(NotificationKind::Idle));

    let phases: Vec<CallPhase> = h
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            OrchestratorEvent::SessionPhaseChanged { phase, .. } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            CallPhase::Connected,
            CallPhase::Held,
            CallPhase::Connected,
            CallPhase::Ending,
            CallPhase::Ended
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn terminal_event_twice_ends_the_session_once() {
    let mut h = Harness::new();
    let call = h.connected_call().await;
    h.drain_events();

    h.call_state(&call, EngineCallState::End, &alice()).await;
    h.call_state(&call, EngineCallState::Released, &alice()).await;

    let ended = h
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, OrchestratorEvent::SessionEnded { .. }))
        .count();
    assert_eq!(ended, 1);
    assert!(h.controller.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn commands_without_a_session_are_no_ops() {
    let mut h = Harness::new();
    let notifications_before = h.ui.notifications.history().len();
    let ignored = CommandOutcome::Ignored(IgnoreReason::NoSession);

    assert_eq!(h.controller.answer().await.unwrap(), ignored);
    assert_eq!(h.controller.decline(DeclineReason::Busy).await.unwrap(), ignored);
    assert_eq!(h.controller.hang_up().await.unwrap(), ignored);
    assert_eq!(h.controller.toggle_mute().await.unwrap(), ignored);
    assert_eq!(h.controller.toggle_hold().await.unwrap(), ignored);
    assert_eq!(h.controller.toggle_speaker().await.unwrap(), ignored);
    assert_eq!(h.controller.select_route(AudioRoute::Bluetooth).await.unwrap(), ignored);
    assert_eq!(h.controller.send_digit('x').await.unwrap(), ignored);
    assert_eq!(h.controller.transfer("").await.unwrap(), ignored);
    assert_eq!(h.controller.force_hang_up().await.unwrap(), ignored);
    assert_eq!(h.controller.open_call_screen().unwrap(), ignored);
    assert_eq!(h.controller.mute_from_notification().await.unwrap(), ignored);
    assert_eq!(h.controller.hang_up_from_notification().await.unwrap(), ignored);

    assert!(h.engine.commands().is_empty());
    assert!(h.ui.launcher.launches().is_empty());
    assert_eq!(h.ui.notifications.history().len(), notifications_before);
    assert!(h.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn commands_are_ignored_without_an_engine() {
    let mut h = Harness::new();
    h.controller.set_engine_available(false);

    assert_eq!(
        h.controller.dial("1002").await.unwrap(),
        CommandOutcome::Ignored(IgnoreReason::EngineUnavailable)
    );
    assert_eq!(
        h.controller.register_account("alice", "pw", "example.com").await.unwrap(),
        CommandOutcome::Ignored(IgnoreReason::EngineUnavailable)
    );
    assert!(h.engine.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn engine_mute_state_overrides_the_cache() {
    let mut h = Harness::new();
    let call = h.connected_call().await;

    h.controller.toggle_mute().await.unwrap();
    assert!(h.controller.session().unwrap().is_muted);
    assert_eq!(
        h.ui.notifications.current().unwrap().actions[0].label,
        "Unmute"
    );

    h.engine.set_engine_muted(&call, false);
    h.call_state(&call, EngineCallState::StreamsRunning, &alice()).await;

    assert!(!h.controller.session().unwrap().is_muted);
    assert!(h
        .drain_events()
        .iter()
        .any(|event| matches!(event, OrchestratorEvent::MuteChanged { muted: false })));
}

#[tokio::test(start_paused = true)]
async fn remote_hold_is_reconciled() {
    let mut h = Harness::new();
    let call = h.connected_call().await;

    h.call_state(&call, EngineCallState::PausedByRemote, &alice()).await;
    assert!(h.controller.session().unwrap().is_held);

    h.call_state(&call, EngineCallState::StreamsRunning, &alice()).await;
    assert!(!h.controller.session().unwrap().is_held);
}

#[tokio::test(start_paused = true)]
async fn visibility_gates_the_ongoing_notification() {
    let mut h = Harness::new();
    h.connected_call().await;
    assert_eq!(h.notification_kind(), Some(NotificationKind::Ongoing));

    h.controller.set_visible(true).unwrap();
    assert_eq!(h.notification_kind(), Some(NotificationKind::Idle));

    h.controller.set_visible(false).unwrap();
    assert!(!h.controller.is_visible());
    assert_eq!(h.notification_kind(), Some(NotificationKind::Ongoing));
}

#[tokio::test(start_paused = true)]
async fn ongoing_ticker_updates_and_stops_when_held() {
    let mut h = Harness::new();
    let call = h.connected_call().await;

    for expected in ["Alice - 00:01", "Alice - 00:02"] {
        let tick = loop {
            match h.timers.recv().await.unwrap() {
                tick @ TimerEvent::NotificationTick { .. } => break tick,
                other => h.controller.handle_timer(other).await,
            }
        };
        h.controller.handle_timer(tick).await;
        assert_eq!(h.ui.notifications.current().unwrap().text, expected);
    }

    h.call_state(&call, EngineCallState::Paused, &alice()).await;
    assert!(!h.controller.notifications.ticker_running());
}

#[tokio::test(start_paused = true)]
async fn updating_keeps_the_phase() {
    let mut h = Harness::new();
    let call = h.connected_call().await;
    h.drain_events();

    h.call_state(&call, EngineCallState::UpdatedByRemote, &alice()).await;

    assert_eq!(h.phase(), Some(CallPhase::Connected));
    assert!(h.controller.session_snapshot().unwrap().updating);
    assert_eq!(h.controller.session_snapshot().unwrap().status_label(), "Updating...");
    assert!(matches!(h.drain_events().as_slice(), [OrchestratorEvent::SessionUpdating]));

    h.call_state(&call, EngineCallState::StreamsRunning, &alice()).await;
    assert!(!h.controller.session_snapshot().unwrap().updating);
}

#[tokio::test(start_paused = true)]
async fn second_incoming_call_is_ignored() {
    let mut h = Harness::new();
    let first = h.incoming_from_alice().await;

    let bob = RemoteParty::new("sip:bob@example.com").with_display_name("Bob");
    h.call_state(&CallHandle::new("call-2"), EngineCallState::IncomingReceived, &bob).await;

    let session = h.controller.session().unwrap();
    assert_eq!(session.handle, first);
    assert_eq!(session.remote_display_name, "Alice");
    assert_eq!(h.ui.ringer.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn decline_closes_the_incoming_presentation() {
    let mut h = Harness::new();
    let (_, mut incoming_screen) = h.controller.screens.subscribe(ScreenKind::IncomingCall);
    let call = h.incoming_from_alice().await;

    h.controller.decline(DeclineReason::Busy).await.unwrap();

    assert!(h
        .engine
        .commands()
        .contains(&EngineCommand::Decline(call.clone(), DeclineReason::Busy)));
    assert!(!h.ui.ringer.is_ringing());
    assert_eq!(h.notification_kind(), Some(NotificationKind::Idle));
    assert_eq!(incoming_screen.try_recv().unwrap(), ScreenMessage::Close);

    h.call_state(&call, EngineCallState::Released, &alice()).await;
    assert_eq!(incoming_screen.try_recv().unwrap(), ScreenMessage::SessionEnded);
}

#[tokio::test(start_paused = true)]
async fn failed_accept_restores_the_incoming_notification() {
    let mut h = Harness::new();
    h.incoming_from_alice().await;
    h.engine.fail("accept");

    let err = h.controller.answer().await.unwrap_err();

    assert!(matches!(err, OrchestratorError::CommandFailed { command: "accept", .. }));
    assert!(!h.controller.session().unwrap().answer_pending);
    assert_eq!(h.notification_kind(), Some(NotificationKind::Incoming));
    assert!(h
        .drain_events()
        .iter()
        .any(|event| matches!(event, OrchestratorEvent::CommandFailed { command: "answer", .. })));
}

#[tokio::test(start_paused = true)]
async fn transfer_validates_and_reports_engine_failures() {
    let mut h = Harness::new();
    let call = h.connected_call().await;

    let err = h.controller.transfer("   ").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransferTarget { .. }));

    h.controller.transfer("1003").await.unwrap();
    assert!(h
        .engine
        .commands()
        .contains(&EngineCommand::Transfer(call.clone(), "sip:1003@example.com".into())));

    h.engine.fail("transfer");
    let err = h.controller.transfer("sip:carol@example.com").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::TransferFailed { ref target, .. } if target == "sip:carol@example.com"));
    assert!(err.is_recoverable());
    assert_eq!(h.phase(), Some(CallPhase::Connected));
}

#[tokio::test(start_paused = true)]
async fn speaker_toggle_without_a_speaker_keeps_the_route() {
    let mut h = Harness::with_engine(
        MockEngine::new()
            .with_account("example.com")
            .with_devices(vec![AudioDeviceInfo::output("ear", "Earpiece", AudioDeviceType::Earpiece)]),
    );
    h.connected_call().await;

    let err = h.controller.toggle_speaker().await.unwrap_err();

    assert!(matches!(err, OrchestratorError::DeviceNotFound { route: AudioRoute::Speaker }));
    assert_eq!(h.controller.current_route(), AudioRoute::Earpiece);
    assert!(!h.ui.audio.is_speakerphone_on());
    assert!(!h.controller.session().unwrap().is_on_speaker);
}

#[tokio::test(start_paused = true)]
async fn speaker_toggle_round_trip() {
    let mut h = Harness::new();
    h.connected_call().await;

    h.controller.toggle_speaker().await.unwrap();
    assert_eq!(h.controller.current_route(), AudioRoute::Speaker);
    assert!(h.controller.session().unwrap().is_on_speaker);
    assert!(h.ui.audio.is_speakerphone_on());

    h.controller.toggle_speaker().await.unwrap();
    assert_eq!(h.controller.current_route(), AudioRoute::Earpiece);
    assert!(!h.ui.audio.is_speakerphone_on());
}

#[tokio::test(start_paused = true)]
async fn dial_completes_bare_numbers() {
    let mut h = Harness::new();

    assert_eq!(h.controller.dial("1002").await.unwrap(), CommandOutcome::Applied);

    assert!(h
        .engine
        .commands()
        .contains(&EngineCommand::Invite("sip:1002@example.com".into())));
    let session = h.controller.session().unwrap();
    assert_eq!(session.phase, CallPhase::Dialing);
    assert_eq!(session.direction, CallDirection::Outgoing);
    assert_eq!(session.remote_number, "1002");
    assert_eq!(h.ui.launcher.launches()[0].screen, ScreenKind::InCall);

    let call = session.handle.clone();
    h.call_state(&call, EngineCallState::OutgoingRinging, &RemoteParty::new("sip:1002@example.com")).await;
    assert_eq!(h.phase(), Some(CallPhase::Dialing));

    assert_eq!(
        h.controller.dial("1003").await.unwrap(),
        CommandOutcome::Ignored(IgnoreReason::SessionActive)
    );
}

#[tokio::test(start_paused = true)]
async fn force_hang_up_cleans_up_without_the_engine() {
    let mut h = Harness::new();
    h.connected_call().await;
    h.controller.toggle_speaker().await.unwrap();
    h.engine.fail("terminate");

    h.controller.force_hang_up().await.unwrap();

    assert!(h.controller.session().is_none());
    assert!(!h.controller.notifications.ticker_running());
    assert!(!h.controller.routes.verification_pending());
    assert!(!h.ui.audio.is_speakerphone_on());
    assert_eq!(h.ui.audio.mode(), AudioMode::Normal);
    assert!(!h.ui.power.is_held());
    assert_eq!(h.notification_kind(), Some(NotificationKind::Idle));
}

#[tokio::test(start_paused = true)]
async fn notification_actions_map_to_commands() {
    let mut h = Harness::new();
    let call = h.incoming_from_alice().await;

    h.controller
        .dispatch_notification_action(NotificationAction::Answer)
        .await
        .unwrap();
    assert!(h.engine.commands().contains(&EngineCommand::Accept(call.clone())));
    h.call_state(&call, EngineCallState::StreamsRunning, &alice()).await;

    h.controller
        .dispatch_notification_action(NotificationAction::ToggleMute)
        .await
        .unwrap();
    assert!(h
        .engine
        .commands()
        .contains(&EngineCommand::SetMicrophoneMuted(call.clone(), true)));

    h.controller
        .dispatch_notification_action(NotificationAction::OpenCallScreen)
        .await
        .unwrap();
    assert_eq!(h.ui.launcher.launches().last().unwrap().screen, ScreenKind::InCall);

    h.controller
        .dispatch_notification_action(NotificationAction::HangUp)
        .await
        .unwrap();
    assert!(h.engine.commands().contains(&EngineCommand::Terminate(call)));
}

#[tokio::test(start_paused = true)]
async fn invalid_dtmf_digit_is_rejected() {
    let mut h = Harness::new();
    let call = h.connected_call().await;

    h.controller.send_digit('5').await.unwrap();
    assert!(h.engine.commands().contains(&EngineCommand::SendDtmf(call, '5')));
    assert!(matches!(
        h.controller.send_digit('z').await,
        Err(OrchestratorError::InvalidDtmfDigit { digit: 'z' })
    ));
}

#[tokio::test(start_paused = true)]
async fn registration_status_drives_the_idle_text() {
    let mut h = Harness::new();
    h.controller.startup().await;
    assert_eq!(h.ui.notifications.current().unwrap().text, "Unregistered");

    h.controller
        .register_account("alice", "pw", "example.com")
        .await
        .unwrap();
    assert_eq!(h.ui.notifications.current().unwrap().text, "Registering...");

    h.engine.emit(EngineEvent::registration(
        "sip:alice@example.com",
        crate::engine::EngineRegistrationState::Ok,
        "",
    ));
    h.deliver().await;
    assert_eq!(h.ui.notifications.current().unwrap().text, "Ready for calls");
    assert!(h
        .drain_events()
        .iter()
        .any(|event| matches!(event, OrchestratorEvent::RegistrationStateChanged { .. })));
}
