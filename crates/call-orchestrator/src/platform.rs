//! Presentation-side collaborators
//!
//! These traits are the orchestrator's only view of the device: the notification
//! shade, screen launching, platform audio flags, the ringtone and the wake lock.
//! All methods are synchronous; implementations are expected to hand the work to
//! the platform and return immediately.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::AudioMode;
use crate::notification::RenderedNotification;

/// The single shared notification slot
pub trait NotificationSink: Send + Sync {
    /// Show or replace the notification in the slot.
    fn present(&self, notification: &RenderedNotification);

    /// Remove whatever is in the slot.
    fn cancel(&self);
}

/// Platform audio mode and routing flags
pub trait PlatformAudio: Send + Sync {
    fn set_mode(&self, mode: AudioMode);

    fn mode(&self) -> AudioMode;

    fn set_speakerphone_on(&self, on: bool);

    fn is_speakerphone_on(&self) -> bool;

    fn start_bluetooth_sco(&self);

    fn stop_bluetooth_sco(&self);

    fn is_bluetooth_sco_on(&self) -> bool;
}

/// Ringtone playback for incoming calls
pub trait Ringer: Send + Sync {
    fn start(&self);

    fn stop(&self);
}

/// Keeps the device awake while a call is ringing or active
pub trait PowerManager: Send + Sync {
    fn acquire_wake_lock(&self);

    fn release_wake_lock(&self);
}

/// Screens the orchestrator can bring to the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreenKind {
    IncomingCall,
    InCall,
}

impl fmt::Display for ScreenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenKind::IncomingCall => write!(f, "incoming-call"),
            ScreenKind::InCall => write!(f, "in-call"),
        }
    }
}

/// Request to bring a screen up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenLaunch {
    pub screen: ScreenKind,
    pub caller_name: String,
    pub caller_number: String,
    pub auto_accepted: bool,
}

pub trait ScreenLauncher: Send + Sync {
    fn launch(&self, request: ScreenLaunch);
}

/// Bundle of every presentation collaborator
#[derive(Clone)]
pub struct Presentation {
    pub notifications: Arc<dyn NotificationSink>,
    pub audio: Arc<dyn PlatformAudio>,
    pub ringer: Arc<dyn Ringer>,
    pub launcher: Arc<dyn ScreenLauncher>,
    pub power: Arc<dyn PowerManager>,
}

impl fmt::Debug for Presentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Presentation").finish_non_exhaustive()
    }
}
