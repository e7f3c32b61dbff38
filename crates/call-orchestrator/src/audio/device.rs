//! Audio device descriptions as enumerated by the engine

use serde::{Deserialize, Serialize};

/// Kind of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioDeviceType {
    Earpiece,
    Speaker,
    Bluetooth,
    Headset,
    Unknown,
}

/// Audio device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    /// Engine device identifier
    pub id: String,
    /// Human-readable device name
    pub name: String,
    pub device_type: AudioDeviceType,
    /// Whether the device can play audio
    pub can_output: bool,
}

impl AudioDeviceInfo {
    /// Create an output-capable device
    pub fn output(id: impl Into<String>, name: impl Into<String>, device_type: AudioDeviceType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            device_type,
            can_output: true,
        }
    }

    /// Create an input-only device
    pub fn input(id: impl Into<String>, name: impl Into<String>, device_type: AudioDeviceType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            device_type,
            can_output: false,
        }
    }
}

/// First output-capable device of the given type, in enumeration order
pub fn find_output_device(
    devices: &[AudioDeviceInfo],
    device_type: AudioDeviceType,
) -> Option<&AudioDeviceInfo> {
    devices
        .iter()
        .find(|device| device.can_output && device.device_type == device_type)
}
