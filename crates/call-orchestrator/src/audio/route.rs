//! Audio route switching
//!
//! A route switch touches three independent things: the engine's output device for
//! the call, the engine's default output device, and the platform's
//! mode/speakerphone/SCO flags. [`AudioRouteManager::switch_to`] applies them in a
//! fixed order and puts the platform flags back if the engine refuses the device, so
//! the flags and the engine device always describe the same route.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::audio::device::find_output_device;
use crate::audio::{AudioMode, AudioRoute};
use crate::engine::{CallHandle, SipEngine};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::platform::PlatformAudio;
use crate::timer::{TimerEvent, TimerSender, TimerSlot};

/// Platform state captured before a switch, restored if the engine rejects the device
#[derive(Debug, Clone, Copy)]
struct PlatformSnapshot {
    mode: AudioMode,
    speakerphone: bool,
    bluetooth_sco: bool,
}

/// Owns the current logical route and the pending verification callback
pub struct AudioRouteManager {
    engine: Arc<dyn SipEngine>,
    platform: Arc<dyn PlatformAudio>,
    timers: TimerSender,
    verify_delay: Duration,
    verification: TimerSlot,
    expected_speakerphone: bool,
    current: AudioRoute,
    /// Engine output device of the current route, once one was applied
    device: Option<String>,
}

impl AudioRouteManager {
    pub fn new(
        engine: Arc<dyn SipEngine>,
        platform: Arc<dyn PlatformAudio>,
        timers: TimerSender,
        verify_delay: Duration,
    ) -> Self {
        Self {
            engine,
            platform,
            timers,
            verify_delay,
            verification: TimerSlot::new("route-verification"),
            expected_speakerphone: false,
            current: AudioRoute::Earpiece,
            device: None,
        }
    }

    pub fn current_route(&self) -> AudioRoute {
        self.current
    }

    pub fn verification_pending(&self) -> bool {
        self.verification.is_armed()
    }

    /// Move the call's audio to `route`.
    ///
    /// On `Err` nothing has changed: either no matching output device was
    /// enumerated, or the engine rejected the device and the platform flags were
    /// rolled back and the previous device re-applied.
    pub async fn switch_to(
        &mut self,
        route: AudioRoute,
        call: Option<&CallHandle>,
    ) -> OrchestratorResult<()> {
        let devices = self.engine.audio_devices();
        let Some(device) = find_output_device(&devices, route.device_type()).cloned() else {
            warn!(%route, "No output device for route, keeping {}", self.current);
            return Err(OrchestratorError::DeviceNotFound { route });
        };
        let previous = self.device.clone().or_else(|| {
            find_output_device(&devices, self.current.device_type()).map(|d| d.id.clone())
        });

        let before = PlatformSnapshot {
            mode: self.platform.mode(),
            speakerphone: self.platform.is_speakerphone_on(),
            bluetooth_sco: self.platform.is_bluetooth_sco_on(),
        };
        let speakerphone = route == AudioRoute::Speaker;

        match route {
            AudioRoute::Bluetooth => {
                if !before.bluetooth_sco {
                    self.platform.start_bluetooth_sco();
                }
            }
            AudioRoute::Speaker | AudioRoute::Earpiece => {
                if before.bluetooth_sco {
                    self.platform.stop_bluetooth_sco();
                }
            }
        }
        self.platform.set_mode(AudioMode::InCommunication);
        self.platform.set_speakerphone_on(speakerphone);

        if let Err(error) = self.apply_device(call, &device.id).await {
            warn!(%route, device = %device.id, %error, "Engine rejected output device, rolling back");
            self.restore(before);
            self.revert_device(call, previous.as_deref()).await;
            return Err(OrchestratorError::command_failed("set_output_device", error));
        }

        info!(%route, device = %device.name, "Audio route switched");
        self.current = route;
        self.device = Some(device.id);
        self.expected_speakerphone = speakerphone;
        self.verification
            .arm(self.verify_delay, &self.timers, |generation| {
                TimerEvent::RouteVerificationDue { generation }
            });
        Ok(())
    }

    /// Flip between speaker and earpiece.
    pub async fn toggle_speaker(&mut self, call: Option<&CallHandle>) -> OrchestratorResult<AudioRoute> {
        let target = self.current.toggled();
        self.switch_to(target, call).await?;
        Ok(target)
    }

    /// Handle the verification expiry. Re-applies the speakerphone flag at most once.
    pub fn verify(&mut self, generation: u64) {
        if !self.verification.accept(generation) {
            return;
        }
        let actual = self.platform.is_speakerphone_on();
        if actual != self.expected_speakerphone {
            warn!(
                expected = self.expected_speakerphone,
                actual, "Speakerphone flag lagged, re-applying"
            );
            self.platform.set_speakerphone_on(self.expected_speakerphone);
        } else {
            debug!(route = %self.current, "Route verified");
        }
    }

    /// End-of-call cleanup: cancel verification and hand the audio back to the platform.
    pub fn release(&mut self) {
        self.verification.cancel();
        self.platform.set_speakerphone_on(false);
        if self.platform.is_bluetooth_sco_on() {
            self.platform.stop_bluetooth_sco();
        }
        self.platform.set_mode(AudioMode::Normal);
        self.expected_speakerphone = false;
        self.current = AudioRoute::Earpiece;
        self.device = None;
        debug!("Audio released");
    }

    async fn apply_device(
        &self,
        call: Option<&CallHandle>,
        device_id: &str,
    ) -> crate::error::EngineResult<()> {
        if let Some(call) = call {
            self.engine.set_call_output_device(call, device_id).await?;
        }
        self.engine.set_default_output_device(device_id).await
    }

    /// Put the engine back on the previous route's device after a partial switch.
    ///
    /// Before the first switch of a call the previous device is the enumerated
    /// device of the starting route.
    async fn revert_device(&self, call: Option<&CallHandle>, previous: Option<&str>) {
        let Some(previous) = previous else {
            return;
        };
        if let Err(error) = self.apply_device(call, previous).await {
            warn!(device = previous, %error, "Could not restore previous output device");
        }
    }

    fn restore(&self, before: PlatformSnapshot) {
        self.platform.set_speakerphone_on(before.speakerphone);
        match (before.bluetooth_sco, self.platform.is_bluetooth_sco_on()) {
            (true, false) => self.platform.start_bluetooth_sco(),
            (false, true) => self.platform.stop_bluetooth_sco(),
            _ => {}
        }
        self.platform.set_mode(before.mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioDeviceInfo, AudioDeviceType};
    use crate::mock::{EngineCommand, MockEngine, MockPlatformAudio};
    use crate::timer::timer_channel;

    fn manager(engine: &Arc<MockEngine>, platform: &Arc<MockPlatformAudio>) -> (AudioRouteManager, crate::timer::TimerReceiver) {
        let (tx, rx) = timer_channel();
        let manager = AudioRouteManager::new(
            engine.clone(),
            platform.clone(),
            tx,
            Duration::from_millis(150),
        );
        (manager, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn switching_to_speaker_applies_every_layer() {
        let engine = Arc::new(MockEngine::new());
        let platform = Arc::new(MockPlatformAudio::new());
        let (mut routes, _rx) = manager(&engine, &platform);
        let call = CallHandle::new("call-1");

        routes.switch_to(AudioRoute::Speaker, Some(&call)).await.unwrap();

        assert_eq!(routes.current_route(), AudioRoute::Speaker);
        assert!(platform.is_speakerphone_on());
        assert_eq!(platform.mode(), AudioMode::InCommunication);
        let commands = engine.commands();
        assert!(commands.contains(&EngineCommand::SetCallOutputDevice(call.clone(), "speaker".into())));
        assert!(commands.contains(&EngineCommand::SetDefaultOutputDevice("speaker".into())));
        assert!(routes.verification_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_device_leaves_previous_route_intact() {
        let engine = Arc::new(MockEngine::new().with_devices(vec![AudioDeviceInfo::output(
            "earpiece",
            "Earpiece",
            AudioDeviceType::Earpiece,
        )]));
        let platform = Arc::new(MockPlatformAudio::new());
        let (mut routes, _rx) = manager(&engine, &platform);

        let err = routes.switch_to(AudioRoute::Speaker, None).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::DeviceNotFound { route: AudioRoute::Speaker }));
        assert_eq!(routes.current_route(), AudioRoute::Earpiece);
        assert!(!platform.is_speakerphone_on());
        assert_eq!(platform.mode(), AudioMode::Normal);
        assert!(engine.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_rejection_rolls_back_platform_flags() {
        let engine = Arc::new(MockEngine::new());
        let platform = Arc::new(MockPlatformAudio::new());
        platform.start_bluetooth_sco();
        let (mut routes, _rx) = manager(&engine, &platform);
        engine.fail("set_call_output_device");

        let result = routes.switch_to(AudioRoute::Speaker, Some(&CallHandle::new("c"))).await;

        assert!(matches!(result, Err(OrchestratorError::CommandFailed { .. })));
        assert_eq!(routes.current_route(), AudioRoute::Earpiece);
        assert!(!platform.is_speakerphone_on());
        assert!(platform.is_bluetooth_sco_on());
        assert_eq!(platform.mode(), AudioMode::Normal);
        assert!(!routes.verification_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_switch_restores_the_previous_call_device() {
        let engine = Arc::new(MockEngine::new());
        let platform = Arc::new(MockPlatformAudio::new());
        let (mut routes, _rx) = manager(&engine, &platform);
        let call = CallHandle::new("c");
        routes.switch_to(AudioRoute::Earpiece, Some(&call)).await.unwrap();
        engine.fail("set_default_output_device");

        let result = routes.switch_to(AudioRoute::Speaker, Some(&call)).await;

        assert!(result.is_err());
        assert_eq!(routes.current_route(), AudioRoute::Earpiece);
        assert!(!platform.is_speakerphone_on());
        let earpiece = EngineCommand::SetCallOutputDevice(call.clone(), "earpiece".into());
        assert_eq!(engine.count(&earpiece), 2);
        assert_eq!(
            engine.commands().iter().rev().nth(1),
            Some(&earpiece),
            "the call device is put back after the speaker attempt"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_partial_switch_puts_the_call_back_on_the_earpiece() {
        let engine = Arc::new(MockEngine::new());
        let platform = Arc::new(MockPlatformAudio::new());
        let (mut routes, _rx) = manager(&engine, &platform);
        let call = CallHandle::new("c");
        engine.fail("set_default_output_device");

        let result = routes.switch_to(AudioRoute::Speaker, Some(&call)).await;

        assert!(matches!(
            result,
            Err(OrchestratorError::CommandFailed { command: "set_output_device", .. })
        ));
        assert_eq!(routes.current_route(), AudioRoute::Earpiece);
        assert!(!platform.is_speakerphone_on());
        let last_call_device = engine.commands().into_iter().rev().find_map(|c| match c {
            EngineCommand::SetCallOutputDevice(_, device) => Some(device),
            _ => None,
        });
        assert_eq!(last_call_device.as_deref(), Some("earpiece"));
    }

    #[tokio::test(start_paused = true)]
    async fn verification_reapplies_a_lagging_flag_once() {
        let engine = Arc::new(MockEngine::new());
        let platform = Arc::new(MockPlatformAudio::new().with_speaker_lag(1));
        let (mut routes, mut rx) = manager(&engine, &platform);

        routes.switch_to(AudioRoute::Speaker, None).await.unwrap();
        assert!(!platform.is_speakerphone_on());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let TimerEvent::RouteVerificationDue { generation } = rx.recv().await.unwrap() else {
            panic!("expected route verification");
        };
        routes.verify(generation);

        assert!(platform.is_speakerphone_on());
        assert!(!routes.verification_pending());
        // A duplicate expiry is stale and does nothing.
        routes.verify(generation);
        assert_eq!(platform.speaker_writes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_returns_audio_to_normal() {
        let engine = Arc::new(MockEngine::new());
        let platform = Arc::new(MockPlatformAudio::new());
        let (mut routes, _rx) = manager(&engine, &platform);

        routes.switch_to(AudioRoute::Bluetooth, None).await.unwrap();
        assert!(platform.is_bluetooth_sco_on());

        routes.release();

        assert_eq!(routes.current_route(), AudioRoute::Earpiece);
        assert!(!platform.is_bluetooth_sco_on());
        assert!(!platform.is_speakerphone_on());
        assert_eq!(platform.mode(), AudioMode::Normal);
        assert!(!routes.verification_pending());
    }
}
