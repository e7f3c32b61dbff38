//! The worker task and its handles
//!
//! [`OrchestratorService::start`] spawns one task that owns the
//! [`CallSessionController`]. Everything reaches it as a message: engine events,
//! timer expiries and user commands sent through an [`OrchestratorHandle`]. The
//! handle is cheap to clone and can be used from any task.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use rvoip_call_orchestrator::{
//!     MemoryCredentialStore, MockEngine, MockPresentation, OrchestratorConfig,
//!     OrchestratorContext, OrchestratorService,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ui = MockPresentation::new();
//! let context = OrchestratorContext::new(
//!     OrchestratorConfig::default(),
//!     Arc::new(MockEngine::new()),
//!     ui.presentation(),
//!     Arc::new(MemoryCredentialStore::new()),
//! );
//!
//! let handle = OrchestratorService::start(context).await?;
//! assert!(handle.session_snapshot().await?.is_none());
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::audio::AudioRoute;
use crate::context::OrchestratorContext;
use crate::controller::{CallSessionController, CommandOutcome};
use crate::engine::{DeclineReason, EngineEvent};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{EventEmitter, OrchestratorEvent};
use crate::notification::NotificationAction;
use crate::registration::RegistrationState;
use crate::screens::ScreenRegistry;
use crate::session::CallSessionSnapshot;
use crate::timer::{timer_channel, TimerReceiver};

type Reply = oneshot::Sender<OrchestratorResult<CommandOutcome>>;

/// Messages accepted by the worker
#[derive(Debug)]
pub enum Command {
    Answer(Reply),
    Decline { reason: DeclineReason, reply: Reply },
    HangUp(Reply),
    ForceHangUp(Reply),
    ToggleMute(Reply),
    ToggleHold(Reply),
    ToggleSpeaker(Reply),
    SelectRoute { route: AudioRoute, reply: Reply },
    SendDigit { digit: char, reply: Reply },
    Transfer { address: String, reply: Reply },
    Dial { number: String, reply: Reply },
    OpenCallScreen(Reply),
    SetVisible { visible: bool, reply: Reply },
    NotificationAction { action: NotificationAction, reply: Reply },
    MuteFromNotification(Reply),
    HangUpFromNotification(Reply),
    RegisterAccount {
        username: String,
        password: String,
        domain: String,
        reply: Reply,
    },
    Unregister(Reply),
    Snapshot(oneshot::Sender<Option<CallSessionSnapshot>>),
    Registration(oneshot::Sender<RegistrationState>),
    Shutdown(oneshot::Sender<()>),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Answer(_) => "answer",
            Command::Decline { .. } => "decline",
            Command::HangUp(_) => "hang_up",
            Command::ForceHangUp(_) => "force_hang_up",
            Command::ToggleMute(_) => "toggle_mute",
            Command::ToggleHold(_) => "toggle_hold",
            Command::ToggleSpeaker(_) => "toggle_speaker",
            Command::SelectRoute { .. } => "select_route",
            Command::SendDigit { .. } => "send_digit",
            Command::Transfer { .. } => "transfer",
            Command::Dial { .. } => "dial",
            Command::OpenCallScreen(_) => "open_call_screen",
            Command::SetVisible { .. } => "set_visible",
            Command::NotificationAction { .. } => "notification_action",
            Command::MuteFromNotification(_) => "mute_from_notification",
            Command::HangUpFromNotification(_) => "hang_up_from_notification",
            Command::RegisterAccount { .. } => "register_account",
            Command::Unregister(_) => "unregister",
            Command::Snapshot(_) => "snapshot",
            Command::Registration(_) => "registration",
            Command::Shutdown(_) => "shutdown",
        }
    }
}

pub struct OrchestratorService;

impl OrchestratorService {
    /// Validate the configuration, start the engine and spawn the worker.
    ///
    /// An engine that fails to start does not fail this call: the worker runs
    /// anyway and ignores every command with `EngineUnavailable`.
    pub async fn start(context: OrchestratorContext) -> OrchestratorResult<OrchestratorHandle> {
        context.config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(context.config.commands.capacity);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = timer_channel();

        let mut controller = CallSessionController::new(&context, timer_tx);
        if let Err(e) = context.engine.start(engine_tx) {
            error!(error = %e, "SIP engine failed to start, commands will be ignored");
            controller.set_engine_available(false);
        }

        let worker = Worker {
            controller,
            commands: command_rx,
            engine_events: engine_rx,
            timers: timer_rx,
            pump_interval: context.config.pump_interval(),
        };
        let task = tokio::spawn(worker.run());
        info!(
            pump_ms = context.config.engine.pump_interval_ms,
            namespace = %context.config.credentials.namespace,
            "Call orchestrator started"
        );

        Ok(OrchestratorHandle {
            commands: command_tx,
            events: context.events.clone(),
            screens: context.screens.clone(),
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

struct Worker {
    controller: CallSessionController,
    commands: mpsc::Receiver<Command>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    timers: TimerReceiver,
    pump_interval: Duration,
}

impl Worker {
    async fn run(mut self) {
        self.controller.startup().await;

        let mut pump = tokio::time::interval(self.pump_interval);
        pump.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.dispatch(command).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All handles dropped");
                        self.controller.shutdown().await;
                        break;
                    }
                },
                Some(event) = self.engine_events.recv() => {
                    self.controller.handle_engine_event(event).await;
                }
                Some(event) = self.timers.recv() => {
                    self.controller.handle_timer(event).await;
                }
                _ = pump.tick() => self.controller.pump(),
            }
        }
        debug!("Worker exited");
    }

    /// Apply one command. Returns false once the worker should stop.
    async fn dispatch(&mut self, command: Command) -> bool {
        debug!(command = command.name(), "Command received");
        let controller = &mut self.controller;
        // A dropped reply only means the caller stopped waiting.
        match command {
            Command::Answer(reply) => {
                let _ = reply.send(controller.answer().await);
            }
            Command::Decline { reason, reply } => {
                let _ = reply.send(controller.decline(reason).await);
            }
            Command::HangUp(reply) => {
                let _ = reply.send(controller.hang_up().await);
            }
            Command::ForceHangUp(reply) => {
                let _ = reply.send(controller.force_hang_up().await);
            }
            Command::ToggleMute(reply) => {
                let _ = reply.send(controller.toggle_mute().await);
            }
            Command::ToggleHold(reply) => {
                let _ = reply.send(controller.toggle_hold().await);
            }
            Command::ToggleSpeaker(reply) => {
                let _ = reply.send(controller.toggle_speaker().await);
            }
            Command::SelectRoute { route, reply } => {
                let _ = reply.send(controller.select_route(route).await);
            }
            Command::SendDigit { digit, reply } => {
                let _ = reply.send(controller.send_digit(digit).await);
            }
            Command::Transfer { address, reply } => {
                let _ = reply.send(controller.transfer(&address).await);
            }
            Command::Dial { number, reply } => {
                let _ = reply.send(controller.dial(&number).await);
            }
            Command::OpenCallScreen(reply) => {
                let _ = reply.send(controller.open_call_screen());
            }
            Command::SetVisible { visible, reply } => {
                let _ = reply.send(controller.set_visible(visible));
            }
            Command::NotificationAction { action, reply } => {
                let _ = reply.send(controller.dispatch_notification_action(action).await);
            }
            Command::MuteFromNotification(reply) => {
                let _ = reply.send(controller.mute_from_notification().await);
            }
            Command::HangUpFromNotification(reply) => {
                let _ = reply.send(controller.hang_up_from_notification().await);
            }
            Command::RegisterAccount {
                username,
                password,
                domain,
                reply,
            } => {
                let result = controller
                    .register_account(&username, &password, &domain)
                    .await;
                let _ = reply.send(result);
            }
            Command::Unregister(reply) => {
                let _ = reply.send(controller.unregister().await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(controller.session_snapshot());
            }
            Command::Registration(reply) => {
                let _ = reply.send(controller.registration_state());
            }
            Command::Shutdown(reply) => {
                controller.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

/// Client side of a running worker
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    events: EventEmitter,
    screens: ScreenRegistry,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for OrchestratorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl OrchestratorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> OrchestratorResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| OrchestratorError::WorkerStopped)?;
        rx.await.map_err(|_| OrchestratorError::WorkerStopped)
    }

    async fn command(&self, build: impl FnOnce(Reply) -> Command) -> OrchestratorResult<CommandOutcome> {
        self.request(build).await?
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub async fn answer(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::Answer).await
    }

    pub async fn decline(&self, reason: DeclineReason) -> OrchestratorResult<CommandOutcome> {
        self.command(|reply| Command::Decline { reason, reply }).await
    }

    pub async fn hang_up(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::HangUp).await
    }

    /// Hang up and clean up locally even if the engine never confirms.
    pub async fn force_hang_up(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::ForceHangUp).await
    }

    pub async fn toggle_mute(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::ToggleMute).await
    }

    pub async fn toggle_hold(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::ToggleHold).await
    }

    pub async fn toggle_speaker(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::ToggleSpeaker).await
    }

    pub async fn select_route(&self, route: AudioRoute) -> OrchestratorResult<CommandOutcome> {
        self.command(|reply| Command::SelectRoute { route, reply }).await
    }

    pub async fn send_digit(&self, digit: char) -> OrchestratorResult<CommandOutcome> {
        self.command(|reply| Command::SendDigit { digit, reply }).await
    }

    pub async fn transfer(&self, address: impl Into<String>) -> OrchestratorResult<CommandOutcome> {
        let address = address.into();
        self.command(|reply| Command::Transfer { address, reply }).await
    }

    pub async fn dial(&self, number: impl Into<String>) -> OrchestratorResult<CommandOutcome> {
        let number = number.into();
        self.command(|reply| Command::Dial { number, reply }).await
    }

    pub async fn open_call_screen(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::OpenCallScreen).await
    }

    /// Report in-call screen visibility. Returns once the notification was updated.
    pub async fn set_visible(&self, visible: bool) -> OrchestratorResult<CommandOutcome> {
        self.command(|reply| Command::SetVisible { visible, reply }).await
    }

    pub async fn notification_action(
        &self,
        action: NotificationAction,
    ) -> OrchestratorResult<CommandOutcome> {
        self.command(|reply| Command::NotificationAction { action, reply })
            .await
    }

    pub async fn mute_from_notification(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::MuteFromNotification).await
    }

    pub async fn hang_up_from_notification(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::HangUpFromNotification).await
    }

    pub async fn register_account(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        domain: impl Into<String>,
    ) -> OrchestratorResult<CommandOutcome> {
        let (username, password, domain) = (username.into(), password.into(), domain.into());
        self.command(|reply| Command::RegisterAccount {
            username,
            password,
            domain,
            reply,
        })
        .await
    }

    pub async fn unregister(&self) -> OrchestratorResult<CommandOutcome> {
        self.command(Command::Unregister).await
    }

    pub async fn session_snapshot(&self) -> OrchestratorResult<Option<CallSessionSnapshot>> {
        self.request(Command::Snapshot).await
    }

    pub async fn registration_state(&self) -> OrchestratorResult<RegistrationState> {
        self.request(Command::Registration).await
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> impl Stream<Item = OrchestratorEvent> + Send + use<> {
        self.events.stream()
    }

    pub fn screens(&self) -> &ScreenRegistry {
        &self.screens
    }

    /// End any session, stop the engine and wait for the worker to exit.
    ///
    /// Shutting down an already stopped worker succeeds.
    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        match self.request(Command::Shutdown).await {
            Ok(()) | Err(OrchestratorError::WorkerStopped) => {}
            Err(e) => return Err(e),
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker task did not exit cleanly");
                return Err(OrchestratorError::internal(format!("worker task failed: {}", e)));
            }
        }
        Ok(())
    }
}

type ContextFactory = dyn Fn() -> OrchestratorContext + Send + Sync;

/// Starts a worker on demand
///
/// Notification actions can arrive after the worker stopped. The host builds a
/// fresh context and starts a new worker before delivering them.
pub struct OrchestratorHost {
    factory: Box<ContextFactory>,
    current: tokio::sync::Mutex<Option<OrchestratorHandle>>,
}

impl OrchestratorHost {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> OrchestratorContext + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// The running worker, starting one if there is none.
    pub async fn ensure_running(&self) -> OrchestratorResult<OrchestratorHandle> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref().filter(|handle| handle.is_running()) {
            return Ok(handle.clone());
        }
        if current.is_some() {
            info!("Worker is gone, starting a new one");
        }
        let handle = OrchestratorService::start((self.factory)()).await?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    pub async fn dispatch_notification_action(
        &self,
        action: NotificationAction,
    ) -> OrchestratorResult<CommandOutcome> {
        self.ensure_running().await?.notification_action(action).await
    }

    pub async fn current(&self) -> Option<OrchestratorHandle> {
        self.current
            .lock()
            .await
            .as_ref()
            .filter(|handle| handle.is_running())
            .cloned()
    }

    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        let handle = self.current.lock().await.take();
        match handle {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }
}
