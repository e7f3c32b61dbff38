//! The SIP engine seam
//!
//! The orchestrator never speaks SIP. Everything protocol-level (INVITE/ACK/BYE,
//! REGISTER, media negotiation, device enumeration) is done by an external engine
//! that is adapted to the [`SipEngine`] trait. The engine reports what happened
//! through a single inbound channel of [`EngineEvent`]s; the orchestrator is the only
//! consumer of that channel.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐  EngineEvent (mpsc)   ┌──────────────────────┐
//! │  SipEngine   │ ────────────────────► │ CallSessionController │
//! │  (adapter)   │ ◄──────────────────── │   (worker task)       │
//! └──────────────┘  accept / terminate / └──────────────────────┘
//!                   pause / dtmf / ...
//! ```
//!
//! The worker calls [`SipEngine::iterate`] on a fixed short interval, so engines that
//! need an explicit pump get one, and all engine callbacks arrive on the worker in
//! the order the engine produced them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::AudioDeviceInfo;
use crate::credentials::AccountCredentials;
use crate::error::EngineResult;

/// Opaque handle to a call object owned by the engine.
///
/// The handle is borrowed, not owned: the engine may release the call at any time,
/// after which the handle is stale. The controller re-resolves the live handle
/// through [`SipEngine::current_call`] before issuing commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallHandle(pub String);

impl CallHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw call states as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineCallState {
    Idle,
    IncomingReceived,
    IncomingEarlyMedia,
    OutgoingInit,
    OutgoingProgress,
    OutgoingRinging,
    OutgoingEarlyMedia,
    Connected,
    StreamsRunning,
    Pausing,
    Paused,
    Resuming,
    PausedByRemote,
    Updating,
    UpdatedByRemote,
    Referred,
    Error,
    End,
    Released,
}

impl EngineCallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineCallState::End | EngineCallState::Released | EngineCallState::Error
        )
    }
}

/// Raw account registration states as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineRegistrationState {
    None,
    Progress,
    Ok,
    Cleared,
    Failed,
}

/// Remote party of a call, as the engine parsed it from the remote address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParty {
    pub uri: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
}

impl RemoteParty {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            display_name: None,
            username: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Label shown for the caller: display name, else username, else "Unknown".
    pub fn label(&self) -> String {
        non_empty(self.display_name.as_deref())
            .or_else(|| non_empty(self.username.as_deref()))
            .unwrap_or("Unknown")
            .to_string()
    }

    /// Number shown for the caller: username, else "Unknown Number".
    pub fn number(&self) -> String {
        non_empty(self.username.as_deref())
            .unwrap_or("Unknown Number")
            .to_string()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Reason passed to the engine when declining an incoming call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclineReason {
    #[default]
    Declined,
    Busy,
    NotAnswered,
}

/// Everything the engine can tell the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CallStateChanged {
        call: CallHandle,
        state: EngineCallState,
        remote: RemoteParty,
        message: String,
    },
    RegistrationStateChanged {
        identity: String,
        state: EngineRegistrationState,
        message: String,
    },
    NetworkReachable {
        reachable: bool,
    },
}

impl EngineEvent {
    pub fn call_state(call: CallHandle, state: EngineCallState, remote: RemoteParty) -> Self {
        EngineEvent::CallStateChanged {
            call,
            state,
            remote,
            message: String::new(),
        }
    }

    pub fn registration(
        identity: impl Into<String>,
        state: EngineRegistrationState,
        message: impl Into<String>,
    ) -> Self {
        EngineEvent::RegistrationStateChanged {
            identity: identity.into(),
            state,
            message: message.into(),
        }
    }
}

/// Sending half of the inbound engine channel, handed to the engine on start
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Adapter over the external SIP/media engine.
///
/// Accessors are synchronous snapshots of engine state. Commands are async and
/// return [`EngineResult`]; the orchestrator catches every error at the command
/// boundary, so adapters should report failures rather than panic.
#[async_trait]
pub trait SipEngine: Send + Sync {
    /// Start the engine and give it the channel it must report events on.
    fn start(&self, events: EngineEventSender) -> EngineResult<()>;

    /// Drive the engine's internal event loop once.
    fn iterate(&self);

    fn stop(&self);

    /// The engine's live notion of the current call.
    fn current_call(&self) -> Option<CallHandle>;

    /// Every call the engine currently tracks.
    fn calls(&self) -> Vec<CallHandle>;

    /// Authoritative microphone state for a call, when the engine knows it.
    fn microphone_muted(&self, call: &CallHandle) -> Option<bool>;

    /// Output-capable and input devices as the engine enumerates them.
    fn audio_devices(&self) -> Vec<AudioDeviceInfo>;

    async fn accept(&self, call: &CallHandle) -> EngineResult<()>;

    async fn decline(&self, call: &CallHandle, reason: DeclineReason) -> EngineResult<()>;

    async fn terminate(&self, call: &CallHandle) -> EngineResult<()>;

    async fn pause(&self, call: &CallHandle) -> EngineResult<()>;

    async fn resume(&self, call: &CallHandle) -> EngineResult<()>;

    async fn set_microphone_muted(&self, call: &CallHandle, muted: bool) -> EngineResult<()>;

    async fn send_dtmf(&self, call: &CallHandle, digit: char) -> EngineResult<()>;

    async fn transfer(&self, call: &CallHandle, target: &str) -> EngineResult<()>;

    /// Place an outgoing call. The call's states arrive as events.
    async fn invite(&self, address: &str) -> EngineResult<CallHandle>;

    async fn set_call_output_device(&self, call: &CallHandle, device_id: &str) -> EngineResult<()>;

    async fn set_default_output_device(&self, device_id: &str) -> EngineResult<()>;

    /// Whether an account is configured at the engine.
    fn has_account(&self) -> bool;

    fn account_state(&self) -> Option<EngineRegistrationState>;

    /// Domain of the configured account, used to complete bare numbers.
    fn account_domain(&self) -> Option<String>;

    /// Remove any existing account and create one from the credentials.
    async fn configure_account(&self, credentials: &AccountCredentials) -> EngineResult<()>;

    /// Re-apply the current account parameters, which triggers a new REGISTER.
    async fn refresh_registration(&self) -> EngineResult<()>;

    async fn disable_registration(&self) -> EngineResult<()>;
}
