//! In-memory collaborators
//!
//! Recording implementations of every trait the orchestrator consumes. They are
//! used by the test suites and by the demo binary, and are handy for embedding the
//! orchestrator somewhere without a real engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::audio::{AudioDeviceInfo, AudioDeviceType, AudioMode};
use crate::credentials::AccountCredentials;
use crate::engine::{
    CallHandle, DeclineReason, EngineCallState, EngineEvent, EngineEventSender,
    EngineRegistrationState, RemoteParty, SipEngine,
};
use crate::error::{EngineError, EngineResult};
use crate::notification::RenderedNotification;
use crate::platform::{
    NotificationSink, PlatformAudio, PowerManager, Presentation, Ringer, ScreenLaunch,
    ScreenLauncher,
};

/// Commands received by [`MockEngine`], in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Accept(CallHandle),
    Decline(CallHandle, DeclineReason),
    Terminate(CallHandle),
    Pause(CallHandle),
    Resume(CallHandle),
    SetMicrophoneMuted(CallHandle, bool),
    SendDtmf(CallHandle, char),
    Transfer(CallHandle, String),
    Invite(String),
    SetCallOutputDevice(CallHandle, String),
    SetDefaultOutputDevice(String),
    /// Carries the account identity
    ConfigureAccount(String),
    RefreshRegistration,
    DisableRegistration,
}

#[derive(Default)]
struct EngineInner {
    events: Option<EngineEventSender>,
    running: bool,
    commands: Vec<EngineCommand>,
    failures: HashSet<&'static str>,
    devices: Vec<AudioDeviceInfo>,
    current_call: Option<CallHandle>,
    calls: Vec<CallHandle>,
    muted: HashMap<CallHandle, bool>,
    account_domain: Option<String>,
    account_state: Option<EngineRegistrationState>,
}

/// Scriptable [`SipEngine`]
///
/// Commands are recorded and succeed unless a failure was injected with
/// [`MockEngine::fail`]. Call events are injected with [`MockEngine::emit`], which
/// also keeps the engine's notion of the current call in step with the event.
pub struct MockEngine {
    inner: Mutex<EngineInner>,
    iterations: AtomicU64,
    invites: AtomicU64,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Engine with an earpiece, a speaker and a Bluetooth output
    pub fn new() -> Self {
        let inner = EngineInner {
            devices: vec![
                AudioDeviceInfo::input("mic", "Microphone", AudioDeviceType::Unknown),
                AudioDeviceInfo::output("earpiece", "Earpiece", AudioDeviceType::Earpiece),
                AudioDeviceInfo::output("speaker", "Speaker", AudioDeviceType::Speaker),
                AudioDeviceInfo::output("bluetooth", "Headset", AudioDeviceType::Bluetooth),
            ],
            ..Default::default()
        };
        Self {
            inner: Mutex::new(inner),
            iterations: AtomicU64::new(0),
            invites: AtomicU64::new(0),
        }
    }

    pub fn with_devices(self, devices: Vec<AudioDeviceInfo>) -> Self {
        self.inner.lock().devices = devices;
        self
    }

    /// Pretend an account for `domain` is already configured
    pub fn with_account(self, domain: impl Into<String>) -> Self {
        self.inner.lock().account_domain = Some(domain.into());
        self
    }

    pub fn set_devices(&self, devices: Vec<AudioDeviceInfo>) {
        self.inner.lock().devices = devices;
    }

    pub fn set_current_call(&self, call: Option<CallHandle>) {
        self.inner.lock().current_call = call;
    }

    /// Change the engine-side microphone state without a command
    pub fn set_engine_muted(&self, call: &CallHandle, muted: bool) {
        self.inner.lock().muted.insert(call.clone(), muted);
    }

    /// Make every later call of `operation` fail
    pub fn fail(&self, operation: &'static str) {
        self.inner.lock().failures.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    pub fn commands(&self) -> Vec<EngineCommand> {
        self.inner.lock().commands.clone()
    }

    pub fn count(&self, command: &EngineCommand) -> usize {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|recorded| *recorded == command)
            .count()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().commands.clear();
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Deliver an event to the orchestrator. Returns false before `start`.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let mut inner = self.inner.lock();
        match &event {
            EngineEvent::CallStateChanged { call, state, .. } if state.is_terminal() => {
                inner.calls.retain(|known| known != call);
                inner.muted.remove(call);
                if inner.current_call.as_ref() == Some(call) {
                    inner.current_call = None;
                }
            }
            EngineEvent::CallStateChanged { call, .. } => {
                if !inner.calls.contains(call) {
                    inner.calls.push(call.clone());
                    inner.muted.entry(call.clone()).or_insert(false);
                }
                if inner.current_call.is_none() {
                    inner.current_call = Some(call.clone());
                }
            }
            EngineEvent::RegistrationStateChanged { state, .. } => {
                inner.account_state = Some(*state);
            }
            EngineEvent::NetworkReachable { .. } => {}
        }
        match &inner.events {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Shorthand for a call state event
    pub fn emit_call(&self, call: &CallHandle, state: EngineCallState, remote: &RemoteParty) -> bool {
        self.emit(EngineEvent::call_state(call.clone(), state, remote.clone()))
    }

    fn record(&self, command: EngineCommand, operation: &'static str) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        inner.commands.push(command);
        if inner.failures.contains(operation) {
            return Err(EngineError::rejected(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl SipEngine for MockEngine {
    fn start(&self, events: EngineEventSender) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if inner.failures.contains("start") {
            return Err(EngineError::NotRunning);
        }
        inner.events = Some(events);
        inner.running = true;
        Ok(())
    }

    fn iterate(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        inner.events = None;
    }

    fn current_call(&self) -> Option<CallHandle> {
        self.inner.lock().current_call.clone()
    }

    fn calls(&self) -> Vec<CallHandle> {
        self.inner.lock().calls.clone()
    }

    fn microphone_muted(&self, call: &CallHandle) -> Option<bool> {
        self.inner.lock().muted.get(call).copied()
    }

    fn audio_devices(&self) -> Vec<AudioDeviceInfo> {
        self.inner.lock().devices.clone()
    }

    async fn accept(&self, call: &CallHandle) -> EngineResult<()> {
        self.record(EngineCommand::Accept(call.clone()), "accept")
    }

    async fn decline(&self, call: &CallHandle, reason: DeclineReason) -> EngineResult<()> {
        self.record(EngineCommand::Decline(call.clone(), reason), "decline")
    }

    async fn terminate(&self, call: &CallHandle) -> EngineResult<()> {
        self.record(EngineCommand::Terminate(call.clone()), "terminate")
    }

    async fn pause(&self, call: &CallHandle) -> EngineResult<()> {
        self.record(EngineCommand::Pause(call.clone()), "pause")
    }

    async fn resume(&self, call: &CallHandle) -> EngineResult<()> {
        self.record(EngineCommand::Resume(call.clone()), "resume")
    }

    async fn set_microphone_muted(&self, call: &CallHandle, muted: bool) -> EngineResult<()> {
        self.record(EngineCommand::SetMicrophoneMuted(call.clone(), muted), "set_microphone_muted")?;
        self.inner.lock().muted.insert(call.clone(), muted);
        Ok(())
    }

    async fn send_dtmf(&self, call: &CallHandle, digit: char) -> EngineResult<()> {
        self.record(EngineCommand::SendDtmf(call.clone(), digit), "send_dtmf")
    }

    async fn transfer(&self, call: &CallHandle, target: &str) -> EngineResult<()> {
        self.record(EngineCommand::Transfer(call.clone(), target.to_string()), "transfer")
    }

    async fn invite(&self, address: &str) -> EngineResult<CallHandle> {
        self.record(EngineCommand::Invite(address.to_string()), "invite")?;
        let n = self.invites.fetch_add(1, Ordering::Relaxed) + 1;
        let call = CallHandle::new(format!("out-{}", n));
        let mut inner = self.inner.lock();
        inner.calls.push(call.clone());
        inner.muted.insert(call.clone(), false);
        inner.current_call = Some(call.clone());
        Ok(call)
    }

    async fn set_call_output_device(&self, call: &CallHandle, device_id: &str) -> EngineResult<()> {
        self.record(
            EngineCommand::SetCallOutputDevice(call.clone(), device_id.to_string()),
            "set_call_output_device",
        )
    }

    async fn set_default_output_device(&self, device_id: &str) -> EngineResult<()> {
        self.record(
            EngineCommand::SetDefaultOutputDevice(device_id.to_string()),
            "set_default_output_device",
        )
    }

    fn has_account(&self) -> bool {
        self.inner.lock().account_domain.is_some()
    }

    fn account_state(&self) -> Option<EngineRegistrationState> {
        self.inner.lock().account_state
    }

    fn account_domain(&self) -> Option<String> {
        self.inner.lock().account_domain.clone()
    }

    async fn configure_account(&self, credentials: &AccountCredentials) -> EngineResult<()> {
        self.record(
            EngineCommand::ConfigureAccount(credentials.identity()),
            "configure_account",
        )?;
        let mut inner = self.inner.lock();
        inner.account_domain = Some(credentials.domain.clone());
        inner.account_state = Some(EngineRegistrationState::Progress);
        Ok(())
    }

    async fn refresh_registration(&self) -> EngineResult<()> {
        if !self.has_account() {
            return Err(EngineError::NoAccount);
        }
        self.record(EngineCommand::RefreshRegistration, "refresh_registration")
    }

    async fn disable_registration(&self) -> EngineResult<()> {
        self.record(EngineCommand::DisableRegistration, "disable_registration")
    }
}

/// Keeps the last notification and the full history of the slot
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    current: Mutex<Option<RenderedNotification>>,
    history: Mutex<Vec<RenderedNotification>>,
    cancels: AtomicU64,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<RenderedNotification> {
        self.current.lock().clone()
    }

    pub fn history(&self) -> Vec<RenderedNotification> {
        self.history.lock().clone()
    }

    pub fn cancel_count(&self) -> u64 {
        self.cancels.load(Ordering::Relaxed)
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn present(&self, notification: &RenderedNotification) {
        *self.current.lock() = Some(notification.clone());
        self.history.lock().push(notification.clone());
    }

    fn cancel(&self) {
        *self.current.lock() = None;
        self.cancels.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct AudioFlags {
    mode: AudioMode,
    speakerphone: bool,
    bluetooth_sco: bool,
    speaker_writes: u64,
    lagging_writes: u64,
}

/// Platform audio flags held in memory
///
/// [`MockPlatformAudio::with_speaker_lag`] makes the first `n` speakerphone writes
/// have no effect, the way a slow platform audio service behaves.
#[derive(Debug, Default)]
pub struct MockPlatformAudio {
    flags: Mutex<AudioFlags>,
}

impl MockPlatformAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speaker_lag(self, writes: u64) -> Self {
        self.flags.lock().lagging_writes = writes;
        self
    }

    /// Number of speakerphone writes, including those lost to lag
    pub fn speaker_writes(&self) -> u64 {
        self.flags.lock().speaker_writes
    }
}

impl PlatformAudio for MockPlatformAudio {
    fn set_mode(&self, mode: AudioMode) {
        self.flags.lock().mode = mode;
    }

    fn mode(&self) -> AudioMode {
        self.flags.lock().mode
    }

    fn set_speakerphone_on(&self, on: bool) {
        let mut flags = self.flags.lock();
        flags.speaker_writes += 1;
        if flags.lagging_writes > 0 {
            flags.lagging_writes -= 1;
            return;
        }
        flags.speakerphone = on;
    }

    fn is_speakerphone_on(&self) -> bool {
        self.flags.lock().speakerphone
    }

    fn start_bluetooth_sco(&self) {
        self.flags.lock().bluetooth_sco = true;
    }

    fn stop_bluetooth_sco(&self) {
        self.flags.lock().bluetooth_sco = false;
    }

    fn is_bluetooth_sco_on(&self) -> bool {
        self.flags.lock().bluetooth_sco
    }
}

#[derive(Debug, Default)]
pub struct RecordingRinger {
    ringing: Mutex<bool>,
    starts: AtomicU64,
}

impl RecordingRinger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ringing(&self) -> bool {
        *self.ringing.lock()
    }

    pub fn start_count(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }
}

impl Ringer for RecordingRinger {
    fn start(&self) {
        *self.ringing.lock() = true;
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    fn stop(&self) {
        *self.ringing.lock() = false;
    }
}

#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<ScreenLaunch>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launches(&self) -> Vec<ScreenLaunch> {
        self.launches.lock().clone()
    }
}

impl ScreenLauncher for RecordingLauncher {
    fn launch(&self, request: ScreenLaunch) {
        self.launches.lock().push(request);
    }
}

#[derive(Debug, Default)]
pub struct MockPower {
    held: Mutex<bool>,
    acquisitions: AtomicU64,
}

impl MockPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl PowerManager for MockPower {
    fn acquire_wake_lock(&self) {
        let mut held = self.held.lock();
        if !*held {
            *held = true;
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn release_wake_lock(&self) {
        *self.held.lock() = false;
    }
}

/// Typed handles to a full set of mock presentation collaborators
#[derive(Debug, Clone, Default)]
pub struct MockPresentation {
    pub notifications: Arc<RecordingNotificationSink>,
    pub audio: Arc<MockPlatformAudio>,
    pub ringer: Arc<RecordingRinger>,
    pub launcher: Arc<RecordingLauncher>,
    pub power: Arc<MockPower>,
}

impl MockPresentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same collaborators as trait objects
    pub fn presentation(&self) -> Presentation {
        Presentation {
            notifications: self.notifications.clone(),
            audio: self.audio.clone(),
            ringer: self.ringer.clone(),
            launcher: self.launcher.clone(),
            power: self.power.clone(),
        }
    }
}
