//! Device registry
//!
//! Identity is assigned explicitly: a slot is reserved with [`DeviceRegistry::assign`]
//! before the backend is built, the backend is constructed with that id and
//! then attached. Nothing is ever looked up by the unassigned sentinel.

use crate::device::Device;
use protocol::DeviceId;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Device {0} is already registered")]
    AlreadyRegistered(DeviceId),

    #[error("Device has no assigned identity")]
    Unassigned,

    #[error("Device {0} was never assigned")]
    NotAssigned(DeviceId),

    #[error("Device {0} not found")]
    NotFound(DeviceId),
}

/// Registered devices keyed by identity
#[derive(Default)]
pub struct DeviceRegistry {
    /// Reserved ids; `None` until the device is attached
    slots: HashMap<DeviceId, Option<Box<dyn Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the identity for a device at `bus`/`port`
    pub fn assign(&mut self, vid: u16, pid: u16, bus: u8, port: u8) -> Result<DeviceId, RegistryError> {
        let id = DeviceId::encode(vid, pid, bus, port);
        if self.slots.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        self.slots.insert(id, None);
        debug!("Assigned device id {}", id);
        Ok(id)
    }

    /// Register a device built with a previously assigned id
    pub fn attach(&mut self, device: Box<dyn Device>) -> Result<DeviceId, RegistryError> {
        let id = device.id();
        if !id.is_assigned() {
            return Err(RegistryError::Unassigned);
        }

        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(RegistryError::NotAssigned(id))?;
        if slot.is_some() {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        info!("Attached {:?} device {}", device.kind(), id);
        *slot = Some(device);
        Ok(id)
    }

    /// Remove a device and release its identity
    ///
    /// Returns the device if one was attached under `id`.
    pub fn detach(&mut self, id: DeviceId) -> Result<Option<Box<dyn Device>>, RegistryError> {
        Self::check_assigned(id)?;
        let device = self.slots.remove(&id).ok_or(RegistryError::NotFound(id))?;
        info!("Detached device {}", id);
        Ok(device)
    }

    pub fn get(&self, id: DeviceId) -> Result<&dyn Device, RegistryError> {
        Self::check_assigned(id)?;
        match self.slots.get(&id) {
            Some(Some(device)) => Ok(device.as_ref()),
            _ => Err(RegistryError::NotFound(id)),
        }
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Result<&mut (dyn Device + 'static), RegistryError> {
        Self::check_assigned(id)?;
        match self.slots.get_mut(&id) {
            Some(Some(device)) => Ok(device.as_mut()),
            _ => Err(RegistryError::NotFound(id)),
        }
    }

    /// Ids of attached devices, in ascending order
    pub fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .slots
            .iter()
            .filter(|(_, device)| device.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.slots.values().filter(|device| device.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_assigned(id: DeviceId) -> Result<(), RegistryError> {
        if id.is_assigned() {
            Ok(())
        } else {
            Err(RegistryError::Unassigned)
        }
    }
}
