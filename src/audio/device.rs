//! Input device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use tracing::warn;

/// An audio input device; `id` is the device name as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub default: bool,
}

/// List input devices of the default audio host
pub fn list_input_devices() -> Vec<AudioDevice> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Failed to enumerate audio input devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDevice {
            id: name.clone(),
            default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect()
}

/// Whether an input device with this id exists and reports a usable config
pub fn input_device_available(id: &str) -> bool {
    find_input_device(id)
        .map(|device| device.default_input_config().is_ok())
        .unwrap_or(false)
}

pub(super) fn find_input_device(id: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    if id == "default" {
        return host.default_input_device();
    }
    host.input_devices()
        .ok()?
        .find(|device| device.name().map(|name| name == id).unwrap_or(false))
}
