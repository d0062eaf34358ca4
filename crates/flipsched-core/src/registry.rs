use crate::actuator::PositionActuator;
use crate::error::{ActuationError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Table of connected flipper devices, keyed by serial number. Built once
/// at startup and passed to whoever needs a device; nothing in the engine
/// reaches for a global cache.
#[derive(Default)]
pub struct ActuatorRegistry {
    devices: Mutex<HashMap<String, Arc<dyn PositionActuator>>>,
}

impl ActuatorRegistry {
    pub fn new() -> ActuatorRegistry {
        ActuatorRegistry::default()
    }

    /// Register a device under its serial. Replacing an existing entry is
    /// allowed (a device that dropped and reconnected) and logged.
    pub fn register(&self, serial: impl Into<String>, device: Arc<dyn PositionActuator>) {
        let serial = serial.into();
        if let Ok(mut devices) = self.devices.lock() {
            if devices.insert(serial.clone(), device).is_some() {
                warn!(serial = %serial, "replacing already-registered device");
            } else {
                info!(serial = %serial, "device registered");
            }
        }
    }

    pub fn acquire(&self, serial: &str) -> Result<Arc<dyn PositionActuator>> {
        self.devices
            .lock()
            .ok()
            .and_then(|devices| devices.get(serial).cloned())
            .ok_or_else(|| ActuationError::DeviceNotRegistered(serial.to_string()))
    }

    pub fn serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self
            .devices
            .lock()
            .map(|devices| devices.keys().cloned().collect())
            .unwrap_or_default();
        serials.sort();
        serials
    }

    pub fn is_empty(&self) -> bool {
        self.devices
            .lock()
            .map(|devices| devices.is_empty())
            .unwrap_or(true)
    }

    /// Shut down and drop every registered device. Failures are logged per
    /// device; one bad driver does not keep the rest connected.
    pub fn shutdown_all(&self) {
        let drained: Vec<(String, Arc<dyn PositionActuator>)> = self
            .devices
            .lock()
            .map(|mut devices| devices.drain().collect())
            .unwrap_or_default();
        for (serial, device) in drained {
            if let Err(e) = device.shutdown() {
                warn!(serial = %serial, error = %e, "device shutdown failed");
            } else {
                info!(serial = %serial, "device shut down");
            }
        }
    }
}
