//! The current call session and the reduction of raw engine states to phases

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::audio::AudioRoute;
use crate::engine::{CallHandle, EngineCallState, RemoteParty};

/// Call phase as the presentation layer sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPhase {
    Ringing,
    Dialing,
    Connected,
    Held,
    Ending,
    Ended,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Ending | CallPhase::Ended)
    }

    /// Status line for the in-call screen
    pub fn status_label(&self) -> &'static str {
        match self {
            CallPhase::Ringing => "Incoming call",
            CallPhase::Dialing => "Calling...",
            CallPhase::Connected => "Connected",
            CallPhase::Held => "On Hold",
            CallPhase::Ending => "Ending...",
            CallPhase::Ended => "Call ended",
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallPhase::Ringing => write!(f, "Ringing"),
            CallPhase::Dialing => write!(f, "Dialing"),
            CallPhase::Connected => write!(f, "Connected"),
            CallPhase::Held => write!(f, "Held"),
            CallPhase::Ending => write!(f, "Ending"),
            CallPhase::Ended => write!(f, "Ended"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// What a raw engine state means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseUpdate {
    /// Move the session to this phase
    Phase(CallPhase),
    /// A re-INVITE is in flight; the phase is unchanged
    Transient,
    /// Nothing to do
    Ignore,
    /// The call is over
    Terminate,
}

/// Reduce an engine call state to a phase update
pub fn reduce_engine_state(state: EngineCallState) -> PhaseUpdate {
    use EngineCallState::*;
    match state {
        IncomingReceived | IncomingEarlyMedia => PhaseUpdate::Phase(CallPhase::Ringing),
        OutgoingInit | OutgoingProgress | OutgoingRinging | OutgoingEarlyMedia => {
            PhaseUpdate::Phase(CallPhase::Dialing)
        }
        Connected | StreamsRunning => PhaseUpdate::Phase(CallPhase::Connected),
        Paused | PausedByRemote => PhaseUpdate::Phase(CallPhase::Held),
        Updating | UpdatedByRemote => PhaseUpdate::Transient,
        Pausing | Resuming | Referred | Idle => PhaseUpdate::Ignore,
        End | Released | Error => PhaseUpdate::Terminate,
    }
}

/// Hold state implied by an engine call state, if any
pub fn implied_hold(state: EngineCallState) -> Option<bool> {
    match state {
        EngineCallState::Paused | EngineCallState::PausedByRemote => Some(true),
        EngineCallState::Connected | EngineCallState::StreamsRunning => Some(false),
        _ => None,
    }
}

/// The call the user is dealing with
#[derive(Debug, Clone)]
pub struct CallSession {
    pub handle: CallHandle,
    pub remote_display_name: String,
    pub remote_number: String,
    pub direction: CallDirection,
    pub phase: CallPhase,
    /// Wall-clock time of the first transition into Connected
    pub started_at: Option<DateTime<Utc>>,
    /// Monotonic counterpart of `started_at`, used for the elapsed timer
    pub connected_since: Option<Instant>,
    pub is_muted: bool,
    pub is_on_speaker: bool,
    pub is_held: bool,
    pub answer_pending: bool,
    /// Decline sent, waiting for the engine to end the call
    pub decline_pending: bool,
    pub updating: bool,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(handle: CallHandle, remote: &RemoteParty, direction: CallDirection, phase: CallPhase) -> Self {
        Self {
            handle,
            remote_display_name: remote.label(),
            remote_number: remote.number(),
            direction,
            phase,
            started_at: None,
            connected_since: None,
            is_muted: false,
            is_on_speaker: false,
            is_held: false,
            answer_pending: false,
            decline_pending: false,
            updating: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase == CallPhase::Connected
    }

    /// Record the first connect. Returns true only the first time.
    pub fn mark_connected(&mut self) -> bool {
        if self.started_at.is_some() {
            return false;
        }
        self.started_at = Some(Utc::now());
        self.connected_since = Some(Instant::now());
        true
    }

    /// Whole seconds since the first connect
    pub fn elapsed_seconds(&self) -> u64 {
        self.connected_since
            .map(|since| since.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn snapshot(&self, route: AudioRoute) -> CallSessionSnapshot {
        CallSessionSnapshot {
            handle: self.handle.clone(),
            remote_display_name: self.remote_display_name.clone(),
            remote_number: self.remote_number.clone(),
            direction: self.direction,
            phase: self.phase,
            started_at: self.started_at,
            elapsed_seconds: self.elapsed_seconds(),
            is_muted: self.is_muted,
            is_on_speaker: self.is_on_speaker,
            is_held: self.is_held,
            answer_pending: self.answer_pending,
            updating: self.updating,
            route,
        }
    }
}

/// Read-only copy of the current session handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSessionSnapshot {
    pub handle: CallHandle,
    pub remote_display_name: String,
    pub remote_number: String,
    pub direction: CallDirection,
    pub phase: CallPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub is_muted: bool,
    pub is_on_speaker: bool,
    pub is_held: bool,
    pub answer_pending: bool,
    pub updating: bool,
    pub route: AudioRoute,
}

impl CallSessionSnapshot {
    /// Status line, with the transient re-INVITE state taking precedence
    pub fn status_label(&self) -> &'static str {
        if self.updating {
            "Updating..."
        } else {
            self.phase.status_label()
        }
    }
}
