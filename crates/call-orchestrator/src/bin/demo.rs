//! Scripted call against the in-memory engine
//!
//! Registers an account, rings with an incoming call, answers it, flips the audio
//! route and hangs up, printing every orchestrator event on the way.
//!
//! ```text
//! cargo run -p rvoip-call-orchestrator --bin call-orchestrator-demo -- --caller Alice --duration 3
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use rvoip_call_orchestrator::events::spawn_event_handler;
use rvoip_call_orchestrator::logging::{log_welcome, parse_log_level};
use rvoip_call_orchestrator::{
    setup_logging, AudioRoute, CallHandle, CallPhase, EngineCallState, EngineEvent,
    EngineRegistrationState, LoggingConfig, MemoryCredentialStore, MockEngine, MockPresentation,
    OrchestratorConfig, OrchestratorContext, OrchestratorError, OrchestratorEventHandler,
    OrchestratorService, RegistrationState, RemoteParty, SessionStartedInfo, VERSION,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "call-orchestrator-demo")]
#[command(about = "Drive the call orchestrator through one scripted incoming call")]
struct Args {
    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Display name of the caller
    #[arg(long, default_value = "Alice")]
    caller: String,

    /// Caller's user part
    #[arg(long, default_value = "1001")]
    number: String,

    /// SIP domain of the demo account
    #[arg(long, default_value = "example.com")]
    domain: String,

    /// Seconds to stay connected before hanging up
    #[arg(short, long, default_value = "3")]
    duration: u64,

    /// Log level (trace, debug, info, warn, error); overrides `[logging] level`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

struct PrintingHandler;

#[async_trait]
impl OrchestratorEventHandler for PrintingHandler {
    async fn on_session_started(&self, info: SessionStartedInfo) {
        println!("📞 Session started: {} <{}> ({:?})", info.caller_name, info.caller_number, info.direction);
    }

    async fn on_phase_changed(&self, phase: CallPhase, previous: CallPhase) {
        println!("🔄 {} → {} ({})", previous, phase, phase.status_label());
    }

    async fn on_session_ended(&self, duration: Option<Duration>) {
        match duration {
            Some(duration) => println!("📴 Session ended after {}s", duration.as_secs()),
            None => println!("📴 Session ended before connecting"),
        }
    }

    async fn on_mute_changed(&self, muted: bool) {
        println!("🎙️  Microphone {}", if muted { "muted" } else { "live" });
    }

    async fn on_registration_changed(&self, state: RegistrationState) {
        println!("🔐 Registration: {}", state.status_text());
    }

    async fn on_audio_route_changed(&self, route: AudioRoute) {
        println!("🔊 Audio route: {}", route);
    }

    async fn on_command_failed(&self, command: &'static str, error: OrchestratorError) {
        println!("⚠️  {} failed: {}", command, error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => OrchestratorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    let mut logging = LoggingConfig::from_settings(&config.logging, "call-orchestrator-demo")?;
    if let Some(level) = &args.log_level {
        logging = logging.with_level(parse_log_level(level)?);
    }
    if args.json {
        logging = logging.with_json();
    }
    setup_logging(&logging)?;
    log_welcome(&logging.app_name, VERSION);

    let engine = Arc::new(MockEngine::new());
    let ui = MockPresentation::new();
    let context = OrchestratorContext::new(
        config,
        engine.clone(),
        ui.presentation(),
        Arc::new(MemoryCredentialStore::new()),
    );
    let printer = spawn_event_handler(&context.events, Arc::new(PrintingHandler));
    let handle = OrchestratorService::start(context).await?;

    handle.register_account("demo", "secret", &args.domain).await?;
    let identity = format!("sip:demo@{}", args.domain);
    engine.emit(EngineEvent::registration(identity, EngineRegistrationState::Ok, "Registration successful"));

    let call = CallHandle::new("demo-call-1");
    let caller = RemoteParty::new(format!("sip:{}@{}", args.number, args.domain))
        .with_display_name(args.caller.clone())
        .with_username(args.number.clone());
    engine.emit_call(&call, EngineCallState::IncomingReceived, &caller);
    tokio::time::sleep(Duration::from_millis(500)).await;

    if let Some(notification) = ui.notifications.current() {
        info!(title = %notification.title, text = %notification.text, "Notification");
    }

    handle.answer().await?;
    engine.emit_call(&call, EngineCallState::Connected, &caller);
    engine.emit_call(&call, EngineCallState::StreamsRunning, &caller);
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Err(e) = handle.toggle_speaker().await {
        warn!(error = %e, "Speaker toggle failed");
    }
    handle.toggle_mute().await?;

    for _ in 0..args.duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Some(notification) = ui.notifications.current() {
            info!(text = %notification.text, "Notification");
        }
    }

    handle.hang_up().await?;
    engine.emit_call(&call, EngineCallState::End, &caller);
    engine.emit_call(&call, EngineCallState::Released, &caller);
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(snapshot) = handle.session_snapshot().await? {
        warn!(phase = %snapshot.phase, "Session still present after hang up");
    }
    handle.shutdown().await?;
    printer.abort();

    println!("✅ Demo finished");
    Ok(())
}
