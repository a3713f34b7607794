//! Interface claim and alternate setting bookkeeping
//!
//! Backends keep one [`InterfaceState`] per device and validate every request
//! against the interface descriptors of the active configuration, so the
//! negotiated state can never disagree with what enumeration reports.

use crate::status::UsbError;
use protocol::InterfaceDescriptor;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct InterfaceState {
    /// Interfaces claimed through this device
    claimed: BTreeSet<u8>,
    /// Interfaces held by some other consumer (host driver, another guest)
    held_elsewhere: BTreeSet<u8>,
    active_interface: u8,
    /// Selected alternate setting per interface; absent means 0
    alt_settings: BTreeMap<u8, u8>,
}

impl InterfaceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `interface` as owned by another consumer
    pub fn hold_elsewhere(&mut self, interface: u8) {
        self.held_elsewhere.insert(interface);
    }

    pub fn release_elsewhere(&mut self, interface: u8) {
        self.held_elsewhere.remove(&interface);
    }

    /// Claim `interface`
    ///
    /// Claiming an interface this device already holds succeeds. On error
    /// nothing changes.
    pub fn attach(
        &mut self,
        interfaces: &[InterfaceDescriptor],
        interface: u8,
    ) -> Result<(), UsbError> {
        if !interfaces.iter().any(|d| d.interface_number == interface) {
            debug!("Attach to unknown interface {}", interface);
            return Err(UsbError::NotFound);
        }
        if self.held_elsewhere.contains(&interface) {
            debug!("Interface {} is held by another consumer", interface);
            return Err(UsbError::Busy);
        }

        if self.claimed.insert(interface) {
            debug!("Claimed interface {}", interface);
        }
        Ok(())
    }

    /// Release a claimed interface; returns whether it was claimed
    pub fn release(&mut self, interface: u8) -> bool {
        self.claimed.remove(&interface)
    }

    pub fn is_claimed(&self, interface: u8) -> bool {
        self.claimed.contains(&interface)
    }

    pub fn claimed(&self) -> impl Iterator<Item = u8> + '_ {
        self.claimed.iter().copied()
    }

    /// Make `interface` the active interface, claiming it
    ///
    /// The previously active interface is released.
    pub fn change_interface(
        &mut self,
        interfaces: &[InterfaceDescriptor],
        interface: u8,
    ) -> Result<(), UsbError> {
        self.attach(interfaces, interface)?;

        let previous = self.active_interface;
        if previous != interface && self.release(previous) {
            debug!("Released interface {}", previous);
        }
        self.active_interface = interface;
        Ok(())
    }

    pub fn active_interface(&self) -> u8 {
        self.active_interface
    }

    /// Selected alternate setting of `interface`
    pub fn alt_setting(&self, interface: u8) -> u8 {
        self.alt_settings.get(&interface).copied().unwrap_or(0)
    }

    pub fn active_alt_setting(&self) -> u8 {
        self.alt_setting(self.active_interface)
    }

    /// Count the alternate settings enumeration reports for `interface`
    pub fn number_of_alt_settings(
        interfaces: &[InterfaceDescriptor],
        interface: u8,
    ) -> Result<u8, UsbError> {
        let count = interfaces
            .iter()
            .filter(|d| d.interface_number == interface)
            .count();
        if count == 0 {
            return Err(UsbError::NotFound);
        }
        u8::try_from(count).map_err(|_| UsbError::Overflow)
    }

    /// Select `alt_setting` on the active interface
    pub fn set_alt_setting(
        &mut self,
        interfaces: &[InterfaceDescriptor],
        alt_setting: u8,
    ) -> Result<(), UsbError> {
        self.select_alt_setting(interfaces, self.active_interface, alt_setting)
    }

    /// Select `alt_setting` on `interface`
    pub fn select_alt_setting(
        &mut self,
        interfaces: &[InterfaceDescriptor],
        interface: u8,
        alt_setting: u8,
    ) -> Result<(), UsbError> {
        let exists = interfaces
            .iter()
            .any(|d| d.interface_number == interface && d.alternate_setting == alt_setting);
        if !exists {
            return Err(UsbError::NotFound);
        }

        self.alt_settings.insert(interface, alt_setting);
        debug!("Interface {} now uses alternate setting {}", interface, alt_setting);
        Ok(())
    }

    /// Forget alternate setting choices, as a configuration change does
    pub fn reset_alt_settings(&mut self) {
        self.alt_settings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_mock_interface;

    fn interfaces() -> Vec<InterfaceDescriptor> {
        vec![
            create_mock_interface(0, 0, 1),
            create_mock_interface(1, 0, 0),
            create_mock_interface(1, 1, 2),
            create_mock_interface(1, 2, 2),
        ]
    }

    #[test]
    fn test_attach_known_interface() {
        let mut state = InterfaceState::new();
        state.attach(&interfaces(), 1).unwrap();
        assert!(state.is_claimed(1));
        // Idempotent
        state.attach(&interfaces(), 1).unwrap();
        assert_eq!(state.claimed().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_attach_unknown_interface() {
        let mut state = InterfaceState::new();
        assert_eq!(state.attach(&interfaces(), 7), Err(UsbError::NotFound));
        assert_eq!(state.claimed().count(), 0);
    }

    #[test]
    fn test_attach_held_elsewhere_leaves_state() {
        let mut state = InterfaceState::new();
        state.attach(&interfaces(), 0).unwrap();
        state.hold_elsewhere(1);

        assert_eq!(state.attach(&interfaces(), 1), Err(UsbError::Busy));
        assert_eq!(state.claimed().collect::<Vec<_>>(), vec![0]);
        assert_eq!(state.active_interface(), 0);

        state.release_elsewhere(1);
        state.attach(&interfaces(), 1).unwrap();
        assert!(state.is_claimed(1));
    }

    #[test]
    fn test_change_interface_releases_previous() {
        let mut state = InterfaceState::new();
        state.change_interface(&interfaces(), 0).unwrap();
        state.change_interface(&interfaces(), 1).unwrap();

        assert_eq!(state.active_interface(), 1);
        assert!(!state.is_claimed(0));
        assert!(state.is_claimed(1));
    }

    #[test]
    fn test_failed_change_keeps_active() {
        let mut state = InterfaceState::new();
        state.change_interface(&interfaces(), 1).unwrap();
        state.hold_elsewhere(0);

        assert_eq!(state.change_interface(&interfaces(), 0), Err(UsbError::Busy));
        assert_eq!(state.active_interface(), 1);
        assert!(state.is_claimed(1));
    }

    #[test]
    fn test_alt_settings() {
        let mut state = InterfaceState::new();
        assert_eq!(InterfaceState::number_of_alt_settings(&interfaces(), 1), Ok(3));
        assert_eq!(InterfaceState::number_of_alt_settings(&interfaces(), 0), Ok(1));
        assert_eq!(
            InterfaceState::number_of_alt_settings(&interfaces(), 5),
            Err(UsbError::NotFound)
        );

        state.change_interface(&interfaces(), 1).unwrap();
        state.set_alt_setting(&interfaces(), 2).unwrap();
        assert_eq!(state.active_alt_setting(), 2);
        assert_eq!(state.alt_setting(0), 0);

        assert_eq!(state.set_alt_setting(&interfaces(), 3), Err(UsbError::NotFound));
        assert_eq!(state.active_alt_setting(), 2);

        state.reset_alt_settings();
        assert_eq!(state.active_alt_setting(), 0);
    }
}
