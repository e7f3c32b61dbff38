//! Audio routing
//!
//! This module decides which output device carries the call's audio. It does not
//! move samples; media is entirely the engine's business. What it owns is the
//! mapping from a logical [`AudioRoute`] to an engine device plus the platform
//! audio mode and speakerphone/Bluetooth flags, applied as one unit by
//! [`AudioRouteManager`].

pub mod device;
pub mod route;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use device::{AudioDeviceInfo, AudioDeviceType};
pub use route::AudioRouteManager;

/// Logical output route for the current call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioRoute {
    #[default]
    Earpiece,
    Speaker,
    Bluetooth,
}

impl AudioRoute {
    /// The device type an output device must have to serve this route
    pub fn device_type(&self) -> AudioDeviceType {
        match self {
            AudioRoute::Earpiece => AudioDeviceType::Earpiece,
            AudioRoute::Speaker => AudioDeviceType::Speaker,
            AudioRoute::Bluetooth => AudioDeviceType::Bluetooth,
        }
    }

    /// Speaker toggle target: speaker goes back to the earpiece, anything else to speaker
    pub fn toggled(&self) -> AudioRoute {
        match self {
            AudioRoute::Speaker => AudioRoute::Earpiece,
            AudioRoute::Earpiece | AudioRoute::Bluetooth => AudioRoute::Speaker,
        }
    }
}

impl fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioRoute::Earpiece => write!(f, "earpiece"),
            AudioRoute::Speaker => write!(f, "speaker"),
            AudioRoute::Bluetooth => write!(f, "bluetooth"),
        }
    }
}

/// Platform audio mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioMode {
    #[default]
    Normal,
    InCommunication,
}
