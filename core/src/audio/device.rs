//! Input device enumeration and selection.
//!
//! The control API can pin a specific input device; the choice is cached
//! process-wide so a listener restart picks it up.

use std::sync::Mutex;

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;
use tracing::{info, warn};

use crate::{JarvinError, Result};

#[derive(Clone, Debug, Serialize)]
pub struct AudioDevice {
    pub index: usize,
    pub name: String,
}

// Cached selection (system default or explicit user choice).
static SELECTED: Mutex<Option<AudioDevice>> = Mutex::new(None);

/// Enumerate input-capable devices as `(index, name)` pairs.
/// Index is the position in the host's input-device iterator.
pub fn list_input_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| JarvinError::DeviceOpenFailed(e.to_string()))?;
    let mut out = Vec::new();
    for (index, dev) in devices.enumerate() {
        let name = dev.name().unwrap_or_else(|_| format!("input {}", index));
        out.push(AudioDevice { index, name });
    }
    Ok(out)
}

/// The currently cached device selection, if any.
pub fn selected_input_device() -> Option<AudioDevice> {
    SELECTED.lock().expect("device cache poisoned").clone()
}

/// Pin an input device by index; a listener restart will use it.
pub fn set_selected_input_device(index: usize, name: Option<String>) {
    let name = name.unwrap_or_else(|| format!("index {}", index));
    info!(target: "audio", index, name = %name, "Input device selected");
    *SELECTED.lock().expect("device cache poisoned") = Some(AudioDevice { index, name });
}

/// Resolve (and cache) the default input device index: the cached user
/// choice if present, otherwise the system default, otherwise the first
/// input-capable device.
pub fn default_input_device_index() -> Result<usize> {
    if let Some(dev) = selected_input_device() {
        return Ok(dev.index);
    }

    let devices = list_input_devices()?;
    if devices.is_empty() {
        return Err(JarvinError::NoInputDevice);
    }

    let host = cpal::default_host();
    let chosen = match host.default_input_device().and_then(|d| d.name().ok()) {
        Some(default_name) => devices
            .iter()
            .find(|d| d.name == default_name)
            .cloned()
            .unwrap_or_else(|| devices[0].clone()),
        None => {
            warn!(target: "audio", "No system default input; using first input-capable device");
            devices[0].clone()
        }
    };

    set_selected_input_device(chosen.index, Some(chosen.name.clone()));
    Ok(chosen.index)
}

/// Fetch the cpal device at an enumeration index.
pub(crate) fn device_by_index(index: usize) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| JarvinError::DeviceOpenFailed(e.to_string()))?;
    let mut devices = devices;
    devices.nth(index).ok_or(JarvinError::NoInputDevice)
}
