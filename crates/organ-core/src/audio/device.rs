//! Output device lookup across all cpal hosts

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::HostId;

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Display name of a cpal host
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// Names of every output device, qualified by host
pub fn list_output_devices() -> AudioResult<Vec<DeviceId>> {
    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("[AUDIO] Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let Ok(outputs) = host.output_devices() else {
            continue;
        };
        let host_label = host_name(host_id);
        devices.extend(outputs.filter_map(|d| d.name().ok()).map(|name| DeviceId {
            name,
            host: Some(host_label.clone()),
        }));
    }
    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }
    Ok(devices)
}

/// Find a device by id, searching only its host when one is given
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    for host_id in cpal::available_hosts() {
        if let Some(wanted) = &id.host {
            if &host_name(host_id) != wanted {
                continue;
            }
        }
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(mut outputs) = host.output_devices() else {
            continue;
        };
        if let Some(device) = outputs.find(|d| d.name().ok().as_deref() == Some(id.name.as_str())) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(id.display_label()))
}

/// Default output device of the default host
pub fn default_output_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))
}
