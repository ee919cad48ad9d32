/// Device template persistence
///
/// Loads and saves device definitions as JSON. Only configuration travels
/// through templates; runtime state (lifecycle, last error, live values) is
/// never serialized, so every load yields stopped devices with zeroed
/// stores.

use std::fs;
use std::path::Path;

use log::info;

use crate::device::DeviceConfig;
use crate::error::{SimulatorError, SimulatorResult};
use crate::point::validate_points;

/// Parse a device template from a JSON string
pub fn devices_from_json(json: &str) -> SimulatorResult<Vec<DeviceConfig>> {
    let devices: Vec<DeviceConfig> = serde_json::from_str(json)?;
    for device in &devices {
        validate_points(&device.points).map_err(|e| {
            SimulatorError::configuration(format!("device '{}': {}", device.name, e))
        })?;
    }
    Ok(devices)
}

/// Load a device template file
pub fn load_devices<P: AsRef<Path>>(path: P) -> SimulatorResult<Vec<DeviceConfig>> {
    let json = fs::read_to_string(&path)?;
    let devices = devices_from_json(&json)?;
    info!("loaded {} device(s) from {}", devices.len(), path.as_ref().display());
    Ok(devices)
}

/// Save a device template file (pretty-printed)
pub fn save_devices<P: AsRef<Path>>(path: P, devices: &[DeviceConfig]) -> SimulatorResult<()> {
    let json = serde_json::to_string_pretty(devices)?;
    fs::write(&path, json)?;
    info!("saved {} device(s) to {}", devices.len(), path.as_ref().display());
    Ok(())
}
