//! Device registry.
//!
//! Owns every declared [`Device`], matches scan results against them and
//! drives lifecycle steps in batch.  Devices are kept in registration
//! order, which is also the discovery-match priority.

use heapless::Vec;
use log::{debug, info};

use crate::app::device::Device;
use crate::app::ports::{Advertisement, ClientPool};
use crate::error::{RegistryError, Result};

/// Maximum number of declared devices.
pub const MAX_DEVICES: usize = 8;

struct Entry {
    device: Device,
    must_find: bool,
}

#[derive(Default)]
pub struct DeviceRegistry {
    entries: Vec<Entry, MAX_DEVICES>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a device.  `must_find` devices gate [`all_found`](Self::all_found).
    pub fn register(&mut self, device: Device, must_find: bool) -> Result<()> {
        if self.get(device.name()).is_some() {
            return Err(RegistryError::DuplicateName.into());
        }
        if self.entries.is_full() {
            return Err(RegistryError::Full.into());
        }
        info!("registry: added '{}' (must_find={})", device.name(), must_find);
        self.entries
            .push(Entry { device, must_find })
            .map_err(|_| RegistryError::Full)?;
        Ok(())
    }

    /// Match one scan result.  The first not-yet-found device whose
    /// declared name and address agree wins and is marked found.
    pub fn match_advertisement(&mut self, adv: &Advertisement<'_>) -> Option<&Device> {
        let Some(idx) = self.entries.iter().position(|e| e.device.matches(adv)) else {
            debug!("registry: no match for '{}' at {}", adv.name, adv.address);
            return None;
        };
        let device = &mut self.entries[idx].device;
        device.mark_found(adv.address).then_some(&*device)
    }

    /// True once every must-find device is initialized.
    pub fn all_found(&self) -> bool {
        self.entries
            .iter()
            .filter(|e| e.must_find)
            .all(|e| e.device.is_initialized())
    }

    /// Number of must-find devices not matched yet.
    pub fn pending_discovery(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.must_find && !e.device.is_found())
            .count()
    }

    /// Connect every found device, then initialize each.  The first
    /// failure aborts the batch.
    pub fn bring_up_all(&mut self, pool: &mut dyn ClientPool) -> Result<()> {
        for entry in self.entries.iter_mut().filter(|e| e.device.is_found()) {
            entry.device.connect(pool)?;
        }
        for entry in self.entries.iter_mut().filter(|e| e.device.is_found()) {
            entry.device.init_device(pool)?;
        }
        Ok(())
    }

    /// Service every initialized device that has not opted out.
    pub fn service_all(&mut self, now_ms: u64) {
        for entry in self.entries.iter_mut().filter(|e| e.device.auto_service()) {
            entry.device.service(now_ms);
        }
    }

    /// Service one device by name, ignoring its auto-service flag.
    pub fn service(&mut self, name: &str, now_ms: u64) -> Result<()> {
        let device = self.get_mut(name).ok_or(RegistryError::UnknownDevice)?;
        device.service(now_ms);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.devices().find(|d| d.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.entries
            .iter_mut()
            .map(|e| &mut e.device)
            .find(|d| d.name() == name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.entries.iter().map(|e| &e.device)
    }

    pub fn found_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices().filter(|d| d.is_found())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Disconnect every device and empty the registry.
    pub fn teardown(&mut self) {
        for entry in &mut self.entries {
            entry.device.disconnect();
        }
        self.entries.clear();
        info!("registry: torn down");
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.teardown();
        }
    }
}
