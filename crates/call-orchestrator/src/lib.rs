//! Call-session orchestration for a SIP softphone
//!
//! This crate sits between a SIP/media engine and a device presentation layer.
//! It owns at most one call session, turns raw engine call states into a small
//! phase model, and keeps everything around the call consistent with it:
//!
//! - the single foreground notification (idle status, incoming call, ongoing call
//!   with a live duration counter)
//! - audio routing between earpiece, speaker and Bluetooth, applied atomically to
//!   the platform and the engine
//! - account registration with persisted credentials and exponential backoff
//!   retries that react to network changes
//! - screen launches, the ringer and the wake lock
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  EngineEvent   ┌─────────────────────────────┐  present/cancel  ┌────────────────┐
//! │  SipEngine   │ ─────────────► │           worker            │ ───────────────► │ Presentation   │
//! │ (trait impl) │ ◄───────────── │   CallSessionController     │                  │ (platform      │
//! └──────────────┘   commands     │  ├─ AudioRouteManager       │                  │  trait impls)  │
//!                                 │  ├─ RegistrationSupervisor  │                  └────────────────┘
//! ┌──────────────┐   Command      │  ├─ NotificationPresenter   │  OrchestratorEvent
//! │ Orchestrator │ ─────────────► │  └─ VisibilityCoordinator   │ ───────────────► subscribers
//! │   Handle     │ ◄───────────── │                             │  ScreenMessage
//! └──────────────┘   oneshot      └─────────────────────────────┘ ───────────────► ScreenRegistry
//! ```
//!
//! All state lives in the worker task started by [`OrchestratorService::start`].
//! Engine events, timer expiries and user commands are messages into that task, so
//! nothing is shared and nothing blocks.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rvoip_call_orchestrator::{
//!     CallHandle, EngineCallState, MemoryCredentialStore, MockEngine, MockPresentation,
//!     OrchestratorConfig, OrchestratorContext, OrchestratorEvent, OrchestratorService,
//!     RemoteParty,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(MockEngine::new().with_account("example.com"));
//! let ui = MockPresentation::new();
//! let context = OrchestratorContext::new(
//!     OrchestratorConfig::default(),
//!     engine.clone(),
//!     ui.presentation(),
//!     Arc::new(MemoryCredentialStore::new()),
//! );
//!
//! let handle = OrchestratorService::start(context).await?;
//! let mut events = handle.subscribe();
//!
//! let alice = RemoteParty::new("sip:1001@example.com").with_display_name("Alice");
//! engine.emit_call(&CallHandle::new("c1"), EngineCallState::IncomingReceived, &alice);
//!
//! if let OrchestratorEvent::SessionStarted(info) = events.recv().await? {
//!     assert_eq!(info.caller_name, "Alice");
//! }
//! handle.answer().await?;
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```rust
//! use rvoip_call_orchestrator::OrchestratorConfig;
//!
//! let config = OrchestratorConfig::from_toml_str(
//!     r#"
//!     [registration]
//!     base_delay_ms = 2000
//!     max_delay_ms = 30000
//!     "#,
//! )?;
//! assert_eq!(config.engine.pump_interval_ms, 20);
//! # Ok::<(), rvoip_call_orchestrator::OrchestratorError>(())
//! ```

pub mod audio;
pub mod config;
pub mod context;
pub mod controller;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod mock;
pub mod notification;
pub mod platform;
pub mod registration;
pub mod screens;
pub mod service;
pub mod session;
pub mod timer;
pub mod visibility;

// Re-export main types
pub use audio::{AudioDeviceInfo, AudioDeviceType, AudioMode, AudioRoute, AudioRouteManager};
pub use config::{LoggingSettings, OrchestratorConfig};
pub use context::OrchestratorContext;
pub use controller::{CallSessionController, CommandOutcome, IgnoreReason};
pub use credentials::{
    AccountCredentials, CredentialStore, JsonFileCredentialStore, MemoryCredentialStore,
    StoredAccount,
};
pub use engine::{
    CallHandle, DeclineReason, EngineCallState, EngineEvent, EngineRegistrationState,
    RemoteParty, SipEngine,
};
pub use error::{EngineError, EngineResult, OrchestratorError, OrchestratorResult};
pub use events::{EventEmitter, OrchestratorEvent, OrchestratorEventHandler, SessionStartedInfo};
pub use logging::{setup_logging, LoggingConfig};
pub use mock::{MockEngine, MockPresentation};
pub use notification::{NotificationAction, NotificationKind, RenderedNotification};
pub use platform::{
    NotificationSink, PlatformAudio, PowerManager, Presentation, Ringer, ScreenKind,
    ScreenLaunch, ScreenLauncher,
};
pub use registration::{BackoffPolicy, RegistrationState, RegistrationStatus};
pub use screens::{ScreenMessage, ScreenRegistry};
pub use service::{OrchestratorHandle, OrchestratorHost, OrchestratorService};
pub use session::{CallDirection, CallPhase, CallSession, CallSessionSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
