//! The single shared notification slot
//!
//! The presenter renders one of three notifications into the slot, always replacing
//! what was there:
//!
//! - **Idle**: the service notification, carrying the registration status text
//! - **Incoming**: caller label with Answer / Decline actions
//! - **Ongoing**: caller label and elapsed time with Mute / Hang Up actions
//!
//! Which one is shown is recomputed from the session and the visibility flag on
//! every change (see [`desired_notification`]); the presenter itself keeps no call
//! state. While the Ongoing notification is up, a one-second ticker refreshes the
//! elapsed label. Each tick re-derives the desired notification, so the ticker stops
//! on its own the first time the answer is no longer Ongoing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::platform::NotificationSink;
use crate::session::{CallPhase, CallSession};
use crate::timer::{TimerEvent, TimerSender, TimerSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    Idle,
    Incoming,
    Ongoing,
}

/// User controls exposed on the notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationAction {
    Answer,
    Decline,
    ToggleMute,
    HangUp,
    OpenCallScreen,
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationAction::Answer => write!(f, "answer"),
            NotificationAction::Decline => write!(f, "decline"),
            NotificationAction::ToggleMute => write!(f, "toggle-mute"),
            NotificationAction::HangUp => write!(f, "hang-up"),
            NotificationAction::OpenCallScreen => write!(f, "open-call-screen"),
        }
    }
}

/// What the slot should show, derived fresh on every change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntentSpec {
    pub kind: NotificationKind,
    pub caller_label: Option<String>,
    pub elapsed_seconds: u64,
    pub muted: bool,
    pub status_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub action: NotificationAction,
    pub label: String,
}

impl ActionButton {
    fn new(action: NotificationAction, label: &str) -> Self {
        Self {
            action,
            label: label.to_string(),
        }
    }
}

/// A notification ready for the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub text: String,
    pub actions: Vec<ActionButton>,
    /// Action fired by tapping the notification body
    pub content_action: Option<NotificationAction>,
}

impl RenderedNotification {
    pub fn has_action(&self, action: NotificationAction) -> bool {
        self.actions.iter().any(|button| button.action == action)
    }
}

/// Format elapsed call time as `MM:SS`, or `HH:MM:SS` from one hour on
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Decide what the slot should show.
///
/// Incoming while the session rings and no answer or decline is in flight; Ongoing while it is
/// Connected and no in-call screen is visible; Idle otherwise, including Held.
pub fn desired_notification(
    session: Option<&CallSession>,
    visible: bool,
    status_text: &str,
) -> NotificationIntentSpec {
    let idle = NotificationIntentSpec {
        kind: NotificationKind::Idle,
        caller_label: None,
        elapsed_seconds: 0,
        muted: false,
        status_text: status_text.to_string(),
    };

    let Some(session) = session else {
        return idle;
    };

    match session.phase {
        CallPhase::Ringing if !session.answer_pending && !session.decline_pending => NotificationIntentSpec {
            kind: NotificationKind::Incoming,
            caller_label: Some(session.remote_display_name.clone()),
            ..idle
        },
        CallPhase::Connected if !visible => NotificationIntentSpec {
            kind: NotificationKind::Ongoing,
            caller_label: Some(session.remote_display_name.clone()),
            elapsed_seconds: session.elapsed_seconds(),
            muted: session.is_muted,
            ..idle
        },
        _ => idle,
    }
}

/// Renders intents into the shared slot and runs the elapsed-time ticker
pub struct NotificationPresenter {
    sink: Arc<dyn NotificationSink>,
    service_title: String,
    timers: TimerSender,
    tick_interval: Duration,
    ticker: TimerSlot,
    shown: Option<RenderedNotification>,
}

impl NotificationPresenter {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        service_title: impl Into<String>,
        timers: TimerSender,
        tick_interval: Duration,
    ) -> Self {
        Self {
            sink,
            service_title: service_title.into(),
            timers,
            tick_interval,
            ticker: TimerSlot::new("notification-tick"),
            shown: None,
        }
    }

    pub fn shown(&self) -> Option<&RenderedNotification> {
        self.shown.as_ref()
    }

    pub fn ticker_running(&self) -> bool {
        self.ticker.is_armed()
    }

    pub fn render(&self, spec: &NotificationIntentSpec) -> RenderedNotification {
        let caller = spec.caller_label.clone().unwrap_or_else(|| "Unknown".to_string());
        match spec.kind {
            NotificationKind::Idle => RenderedNotification {
                kind: NotificationKind::Idle,
                title: self.service_title.clone(),
                text: spec.status_text.clone(),
                actions: Vec::new(),
                content_action: None,
            },
            NotificationKind::Incoming => RenderedNotification {
                kind: NotificationKind::Incoming,
                title: "Incoming call".to_string(),
                text: caller,
                actions: vec![
                    ActionButton::new(NotificationAction::Answer, "Answer"),
                    ActionButton::new(NotificationAction::Decline, "Decline"),
                ],
                content_action: Some(NotificationAction::OpenCallScreen),
            },
            NotificationKind::Ongoing => RenderedNotification {
                kind: NotificationKind::Ongoing,
                title: "Ongoing call".to_string(),
                text: format!("{} - {}", caller, format_elapsed(spec.elapsed_seconds)),
                actions: vec![
                    ActionButton::new(
                        NotificationAction::ToggleMute,
                        if spec.muted { "Unmute" } else { "Mute" },
                    ),
                    ActionButton::new(NotificationAction::HangUp, "Hang Up"),
                ],
                content_action: Some(NotificationAction::OpenCallScreen),
            },
        }
    }

    /// Bring the slot in line with `spec`, starting or stopping the ticker.
    pub fn sync(&mut self, spec: &NotificationIntentSpec) {
        if spec.kind == NotificationKind::Ongoing {
            if !self.ticker.is_armed() {
                self.ticker.arm(self.tick_interval, &self.timers, |generation| {
                    TimerEvent::NotificationTick { generation }
                });
            }
        } else {
            self.ticker.cancel();
        }

        let rendered = self.render(spec);
        if self.shown.as_ref() == Some(&rendered) {
            trace!(kind = ?rendered.kind, "Notification unchanged");
            return;
        }
        debug!(kind = ?rendered.kind, text = %rendered.text, "Presenting notification");
        self.sink.present(&rendered);
        self.shown = Some(rendered);
    }

    /// Accept a ticker expiry. The caller re-syncs when this returns true.
    pub fn accept_tick(&mut self, generation: u64) -> bool {
        self.ticker.accept(generation)
    }

    /// Stop the ticker and empty the slot.
    pub fn clear(&mut self) {
        self.ticker.cancel();
        self.sink.cancel();
        self.shown = None;
    }
}
