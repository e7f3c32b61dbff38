//! Error types and handling for the call orchestrator
//!
//! Almost every failure inside the orchestrator is handled where it happens: the
//! worker logs it, leaves session state alone and keeps running. The error types in
//! this module exist so that those failures can still be *reported*: returned from
//! the few commands that have a meaningful failure (transfer, registration), attached
//! to [`OrchestratorEvent::CommandFailed`](crate::events::OrchestratorEvent), and
//! grouped by [`OrchestratorError::category`] for logging.
//!
//! # Error Categories
//!
//! - **engine** - the SIP engine is missing or rejected a command
//! - **session** - a command referenced a call that does not exist
//! - **audio** - no output device of the requested type was enumerated
//! - **registration** - registration failed; always recoverable, drives the backoff
//! - **configuration** - invalid settings or credentials
//! - **storage** - the credential store could not be read or written
//! - **system** - the worker stopped or an internal invariant broke
//!
//! # Example
//!
//! ```rust
//! use rvoip_call_orchestrator::OrchestratorError;
//!
//! let err = OrchestratorError::transfer_failed("sip:carol@example.com", "488 Not Acceptable");
//! assert_eq!(err.category(), "engine");
//! assert!(err.is_recoverable());
//!
//! let err = OrchestratorError::invalid_configuration("registration.base_delay_ms", "must be > 0");
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

use crate::audio::AudioRoute;

/// Result type used across the orchestrator
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Result type returned by [`SipEngine`](crate::engine::SipEngine) adapters
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by the SIP engine adapter for a single command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,

    #[error("call {call} is not known to the engine")]
    UnknownCall { call: String },

    #[error("engine rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("no account is configured")]
    NoAccount,
}

impl EngineError {
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Errors produced by the orchestrator
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("SIP engine is not available")]
    EngineUnavailable,

    #[error("Engine command {command} failed: {source}")]
    CommandFailed {
        command: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("No current call session")]
    NoCurrentSession,

    #[error("No {route} output device enumerated")]
    DeviceNotFound { route: AudioRoute },

    #[error("Transfer to {target} failed: {reason}")]
    TransferFailed { target: String, reason: String },

    #[error("Invalid transfer target: {reason}")]
    InvalidTransferTarget { reason: String },

    #[error("Invalid call address: {reason}")]
    InvalidAddress { reason: String },

    #[error("Invalid DTMF digit: {digit:?}")]
    InvalidDtmfDigit { digit: char },

    #[error("Registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("No stored credentials")]
    MissingCredentials,

    #[error("Invalid credentials: {field} - {reason}")]
    InvalidCredentials { field: String, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Credential storage error: {reason}")]
    Storage { reason: String },

    #[error("Logging setup failed: {reason}")]
    Logging { reason: String },

    #[error("Orchestrator worker is not running")]
    WorkerStopped,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<EngineError> for OrchestratorError {
    fn from(source: EngineError) -> Self {
        Self::CommandFailed {
            command: "engine",
            source,
        }
    }
}

impl OrchestratorError {
    pub fn command_failed(command: &'static str, source: EngineError) -> Self {
        Self::CommandFailed { command, source }
    }

    pub fn transfer_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn registration_failed(reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            reason: reason.into(),
        }
    }

    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_credentials(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the worker can keep going after this error.
    ///
    /// Everything that originates in the engine, the network or the device list is
    /// recoverable. Bad configuration and a stopped worker are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            OrchestratorError::EngineUnavailable
            | OrchestratorError::CommandFailed { .. }
            | OrchestratorError::NoCurrentSession
            | OrchestratorError::DeviceNotFound { .. }
            | OrchestratorError::TransferFailed { .. }
            | OrchestratorError::RegistrationFailed { .. }
            | OrchestratorError::MissingCredentials
            | OrchestratorError::Storage { .. } => true,

            OrchestratorError::InvalidTransferTarget { .. }
            | OrchestratorError::InvalidAddress { .. }
            | OrchestratorError::InvalidDtmfDigit { .. }
            | OrchestratorError::InvalidCredentials { .. }
            | OrchestratorError::InvalidConfiguration { .. }
            | OrchestratorError::Logging { .. }
            | OrchestratorError::WorkerStopped
            | OrchestratorError::Internal { .. } => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            OrchestratorError::EngineUnavailable
            | OrchestratorError::CommandFailed { .. }
            | OrchestratorError::TransferFailed { .. } => "engine",

            OrchestratorError::NoCurrentSession
            | OrchestratorError::InvalidTransferTarget { .. }
            | OrchestratorError::InvalidAddress { .. }
            | OrchestratorError::InvalidDtmfDigit { .. } => "session",

            OrchestratorError::DeviceNotFound { .. } => "audio",

            OrchestratorError::RegistrationFailed { .. }
            | OrchestratorError::MissingCredentials
            | OrchestratorError::InvalidCredentials { .. } => "registration",

            OrchestratorError::InvalidConfiguration { .. }
            | OrchestratorError::Logging { .. } => "configuration",

            OrchestratorError::Storage { .. } => "storage",

            OrchestratorError::WorkerStopped | OrchestratorError::Internal { .. } => "system",
        }
    }
}
