// src/device/registry.rs
//
// Device registry: device index -> open device.
//
// Entries are created by `open` and destroyed by `close`. Lookups hand out a
// clone of the `Arc`, so a caller blocked in `receive` never holds the map
// lock and a concurrent `close` can still reach the device to wake it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::channel::CanDevice;
use crate::io::at::{LineConnector, SerialConnector};
use crate::io::error::{CanError, Result};
use crate::settings::Settings;

pub struct DeviceRegistry {
    connector: Arc<dyn LineConnector>,
    settings: Arc<Settings>,
    devices: Mutex<HashMap<u32, Arc<CanDevice>>>,
}

impl DeviceRegistry {
    pub fn new(connector: Arc<dyn LineConnector>, settings: Arc<Settings>) -> Self {
        Self {
            connector,
            settings,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Registry backed by real serial ports
    pub fn serial(settings: Settings) -> Self {
        Self::new(Arc::new(SerialConnector), Arc::new(settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<CanDevice>>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open device `index`. At most one live device per index.
    ///
    /// The port is probed without holding the map lock; if a concurrent open
    /// of the same index registers first, the loser is closed again.
    pub fn open(&self, index: u32) -> Result<Arc<CanDevice>> {
        if self.is_open(index) {
            return Err(CanError::DeviceAlreadyOpen(index));
        }

        let device = Arc::new(CanDevice::open(
            index,
            self.connector.clone(),
            self.settings.clone(),
        )?);

        let registered = match self.lock().entry(index) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(device.clone());
                true
            }
        };
        if !registered {
            device.close();
            return Err(CanError::DeviceAlreadyOpen(index));
        }

        tlog!("[registry] Opened device {} on {}", index, device.port_name());
        Ok(device)
    }

    /// Close and forget device `index`. Returns false if it was not open.
    pub fn close(&self, index: u32) -> bool {
        let device = self.lock().remove(&index);
        match device {
            Some(device) => {
                device.close();
                tlog!("[registry] Closed device {}", index);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: u32) -> Result<Arc<CanDevice>> {
        self.lock()
            .get(&index)
            .cloned()
            .ok_or(CanError::DeviceNotOpen(index))
    }

    pub fn is_open(&self, index: u32) -> bool {
        self.lock().contains_key(&index)
    }
}
