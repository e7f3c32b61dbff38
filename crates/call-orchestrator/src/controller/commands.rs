//! User commands
//!
//! Every command first checks that there is something to act on. Without an engine
//! or a current session the command is a pure no-op that reports
//! [`CommandOutcome::Ignored`]. Engine failures are logged, published as
//! `CommandFailed` and returned; the session is left exactly as it was.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::CallSessionController;
use crate::audio::AudioRoute;
use crate::credentials::AccountCredentials;
use crate::engine::{CallHandle, DeclineReason, RemoteParty};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::OrchestratorEvent;
use crate::notification::NotificationAction;
use crate::platform::{ScreenKind, ScreenLaunch};
use crate::screens::ScreenMessage;
use crate::session::CallPhase;

/// Result of a command that reached the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Applied,
    Ignored(IgnoreReason),
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoreReason {
    EngineUnavailable,
    NoSession,
    WrongPhase(CallPhase),
    AnswerPending,
    SessionActive,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::EngineUnavailable => write!(f, "engine unavailable"),
            IgnoreReason::NoSession => write!(f, "no current session"),
            IgnoreReason::WrongPhase(phase) => write!(f, "not valid while {}", phase),
            IgnoreReason::AnswerPending => write!(f, "answer already in progress"),
            IgnoreReason::SessionActive => write!(f, "a session is already active"),
        }
    }
}

/// Turn a dial string into a SIP address.
///
/// `sip:`/`sips:` addresses are used as they are; anything else is taken as a user
/// part on the account's domain.
pub fn normalize_address(input: &str, domain: Option<&str>) -> OrchestratorResult<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::InvalidAddress {
            reason: "address is empty".to_string(),
        });
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("sip:") || lower.starts_with("sips:") {
        return Ok(trimmed.to_string());
    }
    if trimmed.contains(char::is_whitespace) {
        return Err(OrchestratorError::InvalidAddress {
            reason: format!("'{}' contains whitespace", trimmed),
        });
    }
    if trimmed.contains('@') {
        return Ok(format!("sip:{}", trimmed));
    }
    match domain.map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => Ok(format!("sip:{}@{}", trimmed, domain)),
        None => Err(OrchestratorError::InvalidAddress {
            reason: format!("no account domain to complete '{}'", trimmed),
        }),
    }
}

fn is_dtmf_digit(digit: char) -> bool {
    matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D' | 'a'..='d')
}

fn ignored(command: &'static str, reason: IgnoreReason) -> OrchestratorResult<CommandOutcome> {
    debug!(command, %reason, "Command ignored");
    Ok(CommandOutcome::Ignored(reason))
}

impl CallSessionController {
    /// The call a command should act on, or why there is none
    fn target_call(&self) -> Result<(CallHandle, CallPhase), IgnoreReason> {
        if !self.engine_available {
            return Err(IgnoreReason::EngineUnavailable);
        }
        let session = self.session.as_ref().ok_or(IgnoreReason::NoSession)?;
        if session.phase.is_terminal() {
            return Err(IgnoreReason::WrongPhase(session.phase));
        }
        let call = self.resolve_call().unwrap_or_else(|| session.handle.clone());
        Ok((call, session.phase))
    }

    fn fail(&self, command: &'static str, error: OrchestratorError) -> OrchestratorResult<CommandOutcome> {
        self.report_failure(command, &error);
        Err(error)
    }

    pub async fn answer(&mut self) -> OrchestratorResult<CommandOutcome> {
        let (call, phase) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("answer", reason),
        };
        if phase != CallPhase::Ringing {
            return ignored("answer", IgnoreReason::WrongPhase(phase));
        }
        if self.session.as_ref().is_some_and(|s| s.answer_pending) {
            return ignored("answer", IgnoreReason::AnswerPending);
        }

        if let Some(session) = self.session.as_mut() {
            session.answer_pending = true;
        }
        self.refresh_notification();
        self.screens.send_to(ScreenKind::IncomingCall, ScreenMessage::Close);

        if let Err(e) = self.engine.accept(&call).await {
            if let Some(session) = self.session.as_mut() {
                session.answer_pending = false;
            }
            self.refresh_notification();
            return self.fail("answer", OrchestratorError::command_failed("accept", e));
        }

        info!(call = %call, "Call answered");
        if let Some(session) = self.session.as_ref() {
            self.launch_in_call_screen(session, true);
        }
        self.in_call_screen_launched = true;
        Ok(CommandOutcome::Applied)
    }

    pub async fn decline(&mut self, reason: DeclineReason) -> OrchestratorResult<CommandOutcome> {
        let (call, phase) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("decline", reason),
        };
        if phase != CallPhase::Ringing {
            return ignored("decline", IgnoreReason::WrongPhase(phase));
        }

        if let Err(e) = self.engine.decline(&call, reason).await {
            return self.fail("decline", OrchestratorError::command_failed("decline", e));
        }

        info!(call = %call, ?reason, "Call declined");
        if let Some(session) = self.session.as_mut() {
            session.decline_pending = true;
        }
        self.presentation.ringer.stop();
        self.screens.send_to(ScreenKind::IncomingCall, ScreenMessage::Close);
        self.refresh_notification();
        Ok(CommandOutcome::Applied)
    }

    pub async fn hang_up(&mut self) -> OrchestratorResult<CommandOutcome> {
        let (call, _) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("hang_up", reason),
        };
        if let Err(e) = self.engine.terminate(&call).await {
            return self.fail("hang_up", OrchestratorError::command_failed("terminate", e));
        }
        info!(call = %call, "Hang up requested");
        Ok(CommandOutcome::Applied)
    }

    /// Terminate at the engine and clean up locally without waiting for it.
    pub async fn force_hang_up(&mut self) -> OrchestratorResult<CommandOutcome> {
        if self.session.is_none() {
            return ignored("force_hang_up", IgnoreReason::NoSession);
        }
        if self.engine_available {
            if let Some(call) = self.resolve_call() {
                if let Err(e) = self.engine.terminate(&call).await {
                    warn!(call = %call, error = %e, "Terminate failed, cleaning up anyway");
                }
            }
        }
        self.end_session("forced");
        Ok(CommandOutcome::Applied)
    }

    pub async fn toggle_mute(&mut self) -> OrchestratorResult<CommandOutcome> {
        let (call, _) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("toggle_mute", reason),
        };
        let muted = !self.session.as_ref().is_some_and(|s| s.is_muted);

        if let Err(e) = self.engine.set_microphone_muted(&call, muted).await {
            return self.fail("toggle_mute", OrchestratorError::command_failed("set_microphone_muted", e));
        }

        if let Some(session) = self.session.as_mut() {
            session.is_muted = muted;
        }
        debug!(call = %call, muted, "Microphone toggled");
        self.events.emit(OrchestratorEvent::MuteChanged { muted });
        self.refresh_notification();
        Ok(CommandOutcome::Applied)
    }

    pub async fn toggle_hold(&mut self) -> OrchestratorResult<CommandOutcome> {
        let (call, phase) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("toggle_hold", reason),
        };
        if !matches!(phase, CallPhase::Connected | CallPhase::Held) {
            return ignored("toggle_hold", IgnoreReason::WrongPhase(phase));
        }
        let held = self.session.as_ref().is_some_and(|s| s.is_held);

        let result = if held {
            self.engine.resume(&call).await.map_err(|e| OrchestratorError::command_failed("resume", e))
        } else {
            self.engine.pause(&call).await.map_err(|e| OrchestratorError::command_failed("pause", e))
        };
        if let Err(e) = result {
            return self.fail("toggle_hold", e);
        }

        if let Some(session) = self.session.as_mut() {
            session.is_held = !held;
        }
        debug!(call = %call, held = !held, "Hold toggled");
        Ok(CommandOutcome::Applied)
    }

    pub async fn toggle_speaker(&mut self) -> OrchestratorResult<CommandOutcome> {
        let (call, _) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("toggle_speaker", reason),
        };
        match self.routes.toggle_speaker(Some(&call)).await {
            Ok(route) => Ok(self.route_applied(route)),
            Err(e) => self.fail("toggle_speaker", e),
        }
    }

    pub async fn select_route(&mut self, route: AudioRoute) -> OrchestratorResult<CommandOutcome> {
        let (call, _) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("select_route", reason),
        };
        match self.routes.switch_to(route, Some(&call)).await {
            Ok(()) => Ok(self.route_applied(route)),
            Err(e) => self.fail("select_route", e),
        }
    }

    fn route_applied(&mut self, route: AudioRoute) -> CommandOutcome {
        if let Some(session) = self.session.as_mut() {
            session.is_on_speaker = route == AudioRoute::Speaker;
        }
        self.events.emit(OrchestratorEvent::AudioRouteChanged { route });
        CommandOutcome::Applied
    }

    pub async fn send_digit(&mut self, digit: char) -> OrchestratorResult<CommandOutcome> {
        let (call, _) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("send_digit", reason),
        };
        if !is_dtmf_digit(digit) {
            return Err(OrchestratorError::InvalidDtmfDigit { digit });
        }
        if let Err(e) = self.engine.send_dtmf(&call, digit).await {
            return self.fail("send_digit", OrchestratorError::command_failed("send_dtmf", e));
        }
        debug!(call = %call, %digit, "DTMF sent");
        Ok(CommandOutcome::Applied)
    }

    pub async fn transfer(&mut self, address: &str) -> OrchestratorResult<CommandOutcome> {
        let (call, _) = match self.target_call() {
            Ok(target) => target,
            Err(reason) => return ignored("transfer", reason),
        };
        let target = normalize_address(address, self.engine.account_domain().as_deref()).map_err(
            |e| OrchestratorError::InvalidTransferTarget {
                reason: match e {
                    OrchestratorError::InvalidAddress { reason } => reason,
                    other => other.to_string(),
                },
            },
        )?;

        if let Err(e) = self.engine.transfer(&call, &target).await {
            return self.fail("transfer", OrchestratorError::transfer_failed(target, e.to_string()));
        }
        info!(call = %call, %target, "Call transferred");
        Ok(CommandOutcome::Applied)
    }

    /// Place an outgoing call.
    pub async fn dial(&mut self, number: &str) -> OrchestratorResult<CommandOutcome> {
        if !self.engine_available {
            return ignored("dial", IgnoreReason::EngineUnavailable);
        }
        if self.session.is_some() {
            return ignored("dial", IgnoreReason::SessionActive);
        }
        let address = normalize_address(number, self.engine.account_domain().as_deref())?;

        let call = match self.engine.invite(&address).await {
            Ok(call) => call,
            Err(e) => return self.fail("dial", OrchestratorError::command_failed("invite", e)),
        };

        let user = address
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(&address)
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string();
        let remote = RemoteParty::new(address.clone()).with_username(user);
        self.begin_outgoing(call, &remote);
        self.refresh_notification();
        Ok(CommandOutcome::Applied)
    }

    /// Bring the screen matching the session's phase back up.
    pub fn open_call_screen(&mut self) -> OrchestratorResult<CommandOutcome> {
        let Some(session) = self.session.as_ref() else {
            return ignored("open_call_screen", IgnoreReason::NoSession);
        };
        let screen = if session.phase == CallPhase::Ringing && !session.answer_pending {
            ScreenKind::IncomingCall
        } else {
            ScreenKind::InCall
        };
        self.presentation.launcher.launch(ScreenLaunch {
            screen,
            caller_name: session.remote_display_name.clone(),
            caller_number: session.remote_number.clone(),
            auto_accepted: session.answer_pending,
        });
        Ok(CommandOutcome::Applied)
    }

    /// Record in-call screen visibility and re-derive the notification at once.
    pub fn set_visible(&mut self, visible: bool) -> OrchestratorResult<CommandOutcome> {
        self.visibility.set_visible(visible);
        self.refresh_notification();
        Ok(CommandOutcome::Applied)
    }

    pub async fn mute_from_notification(&mut self) -> OrchestratorResult<CommandOutcome> {
        self.toggle_mute().await
    }

    pub async fn hang_up_from_notification(&mut self) -> OrchestratorResult<CommandOutcome> {
        self.hang_up().await
    }

    pub async fn dispatch_notification_action(
        &mut self,
        action: NotificationAction,
    ) -> OrchestratorResult<CommandOutcome> {
        debug!(%action, "Notification action");
        match action {
            NotificationAction::Answer => self.answer().await,
            NotificationAction::Decline => self.decline(DeclineReason::Declined).await,
            NotificationAction::ToggleMute => self.mute_from_notification().await,
            NotificationAction::HangUp => self.hang_up_from_notification().await,
            NotificationAction::OpenCallScreen => self.open_call_screen(),
        }
    }

    pub async fn register_account(
        &mut self,
        username: &str,
        password: &str,
        domain: &str,
    ) -> OrchestratorResult<CommandOutcome> {
        if !self.engine_available {
            return ignored("register_account", IgnoreReason::EngineUnavailable);
        }
        let credentials = AccountCredentials::new(username, password, domain)?;

        let before = self.registration.state().clone();
        let result = self.registration.register_account(credentials).await;
        self.after_registration_change(before);

        match result {
            Ok(()) => Ok(CommandOutcome::Applied),
            Err(e) => self.fail("register_account", e),
        }
    }

    pub async fn unregister(&mut self) -> OrchestratorResult<CommandOutcome> {
        if !self.engine_available {
            return ignored("unregister", IgnoreReason::EngineUnavailable);
        }
        let before = self.registration.state().clone();
        self.registration.unregister().await;
        self.after_registration_change(before);
        Ok(CommandOutcome::Applied)
    }
}

#[cfg(test)]
mod normalize_tests {
    use super::*;

    #[test]
    fn sip_addresses_pass_through() {
        assert_eq!(
            normalize_address(" sip:carol@example.com ", None).unwrap(),
            "sip:carol@example.com"
        );
        assert_eq!(normalize_address("SIPS:x@y", None).unwrap(), "SIPS:x@y");
    }

    #[test]
    fn bare_numbers_use_the_account_domain() {
        assert_eq!(
            normalize_address("1002", Some("pbx.example.com")).unwrap(),
            "sip:1002@pbx.example.com"
        );
        assert_eq!(normalize_address("bob@other.org", None).unwrap(), "sip:bob@other.org");
        assert!(normalize_address("1002", None).is_err());
        assert!(normalize_address("   ", Some("pbx.example.com")).is_err());
        assert!(normalize_address("10 02", Some("pbx.example.com")).is_err());
    }

    #[test]
    fn dtmf_alphabet() {
        for digit in ['0', '9', '*', '#', 'A', 'd'] {
            assert!(is_dtmf_digit(digit));
        }
        assert!(!is_dtmf_digit('x'));
        assert!(!is_dtmf_digit(' '));
    }
}
