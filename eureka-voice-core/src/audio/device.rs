//! Audio input device enumeration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

/// List available input devices, default first.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    use cpal::traits::{DeviceTrait, HostTrait};

    use crate::error::VoiceError;

    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut out = Vec::new();
    let devices = host
        .input_devices()
        .map_err(|e| VoiceError::AudioDevice(e.to_string()))?;
    for device in devices {
        let Ok(name) = device.name() else { continue };
        let is_default = name == default_name;
        out.push(DeviceInfo { name, is_default });
    }
    out.sort_by(|a, b| b.is_default.cmp(&a.is_default).then(a.name.cmp(&b.name)));
    Ok(out)
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    Ok(Vec::new())
}
