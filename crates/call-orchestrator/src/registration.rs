//! Registration supervision
//!
//! The engine does the REGISTER transactions; this module decides *when* to ask for
//! one. It mirrors the engine's account state into a [`RegistrationState`], keeps
//! the account registered across failures with capped exponential backoff, and
//! reacts to network reachability changes.
//!
//! # Retry Schedule
//!
//! ```text
//! attempts:   0    1     2     3     4     5 ...
//! delay:      5s   10s   20s   40s   60s   60s ...
//! ```
//!
//! The counter is incremented each time a retry is scheduled and reset when the
//! engine reports the account registered. Losing the network cancels the pending
//! retry without touching the counter; getting it back with a configured account
//! refreshes immediately.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use rvoip_call_orchestrator::registration::BackoffPolicy;
//!
//! let policy = BackoffPolicy::default();
//! assert_eq!(policy.delay_for(0), Duration::from_secs(5));
//! assert_eq!(policy.delay_for(3), Duration::from_secs(40));
//! assert_eq!(policy.delay_for(9), Duration::from_secs(60));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RegistrationSettings;
use crate::credentials::{AccountCredentials, CredentialStore, StoredAccount};
use crate::engine::{EngineRegistrationState, SipEngine};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::timer::{TimerEvent, TimerSender, TimerSlot};

/// Registration status as shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    #[default]
    Unregistered,
    InProgress,
    Registered,
    Failed,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Unregistered => write!(f, "Unregistered"),
            RegistrationStatus::InProgress => write!(f, "InProgress"),
            RegistrationStatus::Registered => write!(f, "Registered"),
            RegistrationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Account registration state, mutated only by [`RegistrationSupervisor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationState {
    pub status: RegistrationStatus,
    pub account_identity: Option<String>,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub network_available: bool,
    pub last_retry_delay: Option<Duration>,
    /// The current attempt was started by the supervisor rather than the user
    pub reconnecting: bool,
    /// The last retry found neither an engine account nor stored credentials
    pub credentials_missing: bool,
}

impl Default for RegistrationState {
    fn default() -> Self {
        Self {
            status: RegistrationStatus::Unregistered,
            account_identity: None,
            last_error: None,
            attempt_count: 0,
            next_retry_at: None,
            network_available: true,
            last_retry_delay: None,
            reconnecting: false,
            credentials_missing: false,
        }
    }
}

impl RegistrationState {
    /// Text for the idle service notification
    pub fn status_text(&self) -> &'static str {
        match self.status {
            RegistrationStatus::Registered => "Ready for calls",
            _ if !self.network_available => "No network - Waiting...",
            RegistrationStatus::InProgress if self.reconnecting => "Reconnecting...",
            RegistrationStatus::InProgress => "Registering...",
            RegistrationStatus::Failed if self.credentials_missing => {
                "Registration failed - No credentials"
            }
            RegistrationStatus::Failed => "Registration failed - Retrying...",
            RegistrationStatus::Unregistered => "Unregistered",
        }
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread each delay by up to ±10%
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    pub fn from_settings(settings: &RegistrationSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }

    /// `min(base * 2^attempts, max)`, without jitter
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The delay actually used for a retry
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let delay = self.delay_for(attempts);
        if !self.jitter {
            return delay;
        }
        let jitter = (rand::random::<f64>() - 0.5) * 0.2;
        let millis = delay.as_millis() as f64;
        Duration::from_millis((millis * (1.0 + jitter)) as u64)
    }
}

/// Keeps the SIP account registered
pub struct RegistrationSupervisor {
    engine: Arc<dyn SipEngine>,
    store: Arc<dyn CredentialStore>,
    namespace: String,
    policy: BackoffPolicy,
    timers: TimerSender,
    retry: TimerSlot,
    state: RegistrationState,
    /// Cleared by an explicit unregister; suppresses automatic retries
    registration_enabled: bool,
}

impl RegistrationSupervisor {
    pub fn new(
        engine: Arc<dyn SipEngine>,
        store: Arc<dyn CredentialStore>,
        namespace: impl Into<String>,
        policy: BackoffPolicy,
        timers: TimerSender,
    ) -> Self {
        Self {
            engine,
            store,
            namespace: namespace.into(),
            policy,
            timers,
            retry: TimerSlot::new("registration-retry"),
            state: RegistrationState::default(),
            registration_enabled: true,
        }
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_armed()
    }

    /// Register from stored credentials if the user left the account registered.
    pub async fn auto_register(&mut self) {
        let record = match self.store.load(&self.namespace).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Could not read stored credentials");
                return;
            }
        };

        match record {
            Some(StoredAccount { credentials, registered: true }) => {
                info!(identity = %credentials.identity(), "Auto-registering stored account");
                self.configure(&credentials, false).await;
            }
            Some(_) => {
                debug!("Stored account is not marked registered");
                self.registration_enabled = false;
            }
            None => debug!("No stored account"),
        }
    }

    /// Persist credentials and (re)create the engine account.
    pub async fn register_account(&mut self, credentials: AccountCredentials) -> OrchestratorResult<()> {
        self.store
            .save(
                &self.namespace,
                &StoredAccount {
                    credentials: credentials.clone(),
                    registered: true,
                },
            )
            .await?;

        self.registration_enabled = true;
        self.retry.cancel();
        self.state.attempt_count = 0;
        self.state.next_retry_at = None;
        self.state.credentials_missing = false;

        if self.configure(&credentials, false).await {
            Ok(())
        } else {
            Err(OrchestratorError::registration_failed(
                self.state.last_error.clone().unwrap_or_default(),
            ))
        }
    }

    /// Stop registering: disable at the engine, clear the flag, stop retrying.
    pub async fn unregister(&mut self) {
        self.registration_enabled = false;
        self.retry.cancel();
        self.state.attempt_count = 0;
        self.state.next_retry_at = None;
        self.state.reconnecting = false;

        if let Err(e) = self.store.set_registered(&self.namespace, false).await {
            warn!(error = %e, "Could not clear registered flag");
        }
        if let Err(e) = self.engine.disable_registration().await {
            warn!(error = %e, "Engine failed to disable registration");
        }
        self.state.status = RegistrationStatus::Unregistered;
        info!("Account unregistered");
    }

    /// Mirror an engine registration state change.
    pub fn on_engine_state(&mut self, identity: &str, state: EngineRegistrationState, message: &str) {
        if !identity.is_empty() {
            self.state.account_identity = Some(identity.to_string());
        }

        match state {
            EngineRegistrationState::Ok => {
                info!(identity, attempts = self.state.attempt_count, "Registered");
                self.retry.cancel();
                self.state.status = RegistrationStatus::Registered;
                self.state.attempt_count = 0;
                self.state.next_retry_at = None;
                self.state.last_error = None;
                self.state.reconnecting = false;
                self.state.credentials_missing = false;
            }
            EngineRegistrationState::Progress => {
                debug!(identity, "Registration in progress");
                self.state.status = RegistrationStatus::InProgress;
            }
            EngineRegistrationState::Failed if !self.registration_enabled => {
                debug!(identity, reason = message, "Registration failed after unregister");
                self.retry.cancel();
                self.state.status = RegistrationStatus::Unregistered;
                self.state.next_retry_at = None;
                self.state.last_error = Some(message.to_string());
                self.state.reconnecting = false;
            }
            EngineRegistrationState::Failed => {
                warn!(identity, reason = message, "Registration failed");
                self.state.status = RegistrationStatus::Failed;
                self.state.last_error = Some(message.to_string());
                self.schedule_retry();
            }
            EngineRegistrationState::Cleared => {
                self.state.status = RegistrationStatus::Unregistered;
                self.state.reconnecting = false;
                if self.registration_enabled {
                    info!(identity, "Registration cleared, scheduling reconnect");
                    self.schedule_retry();
                } else {
                    debug!(identity, "Registration cleared by request");
                }
            }
            EngineRegistrationState::None => {}
        }
    }

    /// Handle the retry timer.
    pub async fn on_retry_due(&mut self, generation: u64) {
        if !self.retry.accept(generation) {
            return;
        }
        self.state.next_retry_at = None;
        if !self.state.network_available || !self.registration_enabled {
            return;
        }
        self.attempt().await;
    }

    pub async fn on_network_change(&mut self, available: bool) {
        if self.state.network_available == available {
            return;
        }
        self.state.network_available = available;

        if !available {
            info!(attempts = self.state.attempt_count, "Network lost, pausing registration retries");
            self.retry.cancel();
            self.state.next_retry_at = None;
            return;
        }

        info!("Network available");
        if self.state.status == RegistrationStatus::Registered || !self.registration_enabled {
            return;
        }
        if self.engine.has_account() {
            self.retry.cancel();
            self.state.attempt_count = 0;
            self.refresh().await;
        } else {
            self.schedule_retry();
        }
    }

    pub fn shutdown(&mut self) {
        self.retry.cancel();
    }

    fn schedule_retry(&mut self) {
        if !self.state.network_available {
            debug!("No network, retry deferred until it returns");
            return;
        }
        let delay = self.policy.next_delay(self.state.attempt_count);
        self.state.attempt_count = self.state.attempt_count.saturating_add(1);
        self.retry.arm(delay, &self.timers, |generation| {
            TimerEvent::RegistrationRetryDue { generation }
        });
        self.state.last_retry_delay = Some(delay);
        self.state.next_retry_at = chrono::Duration::from_std(delay)
            .ok()
            .map(|delay| Utc::now() + delay);
        info!(
            attempt = self.state.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "Registration retry scheduled"
        );
    }

    /// One retry: refresh the engine account, else rebuild it from the store.
    async fn attempt(&mut self) {
        if self.engine.has_account() {
            self.refresh().await;
            return;
        }

        match self.store.load(&self.namespace).await {
            Ok(Some(record)) => {
                self.configure(&record.credentials, true).await;
            }
            Ok(None) => self.report_missing_credentials("No credentials".to_string()),
            Err(e) => self.report_missing_credentials(e.to_string()),
        }
    }

    async fn refresh(&mut self) {
        debug!(attempt = self.state.attempt_count, "Refreshing registration");
        match self.engine.refresh_registration().await {
            Ok(()) => {
                self.state.status = RegistrationStatus::InProgress;
                self.state.reconnecting = true;
            }
            Err(e) => {
                warn!(error = %e, "Registration refresh failed");
                self.state.status = RegistrationStatus::Failed;
                self.state.last_error = Some(e.to_string());
                self.schedule_retry();
            }
        }
    }

    /// Create the engine account. Returns false if the engine refused it.
    async fn configure(&mut self, credentials: &AccountCredentials, reconnecting: bool) -> bool {
        self.state.account_identity = Some(credentials.identity());
        match self.engine.configure_account(credentials).await {
            Ok(()) => {
                self.state.status = RegistrationStatus::InProgress;
                self.state.reconnecting = reconnecting;
                self.state.last_error = None;
                true
            }
            Err(e) => {
                warn!(identity = %credentials.identity(), error = %e, "Account setup failed");
                self.state.status = RegistrationStatus::Failed;
                self.state.last_error = Some(e.to_string());
                self.schedule_retry();
                false
            }
        }
    }

    fn report_missing_credentials(&mut self, reason: String) {
        warn!(%reason, "Cannot reconnect without credentials");
        self.state.status = RegistrationStatus::Failed;
        self.state.last_error = Some(reason);
        self.state.credentials_missing = true;
        self.state.attempt_count = 0;
        self.state.reconnecting = false;
    }
}
