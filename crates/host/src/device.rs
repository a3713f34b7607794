//! USB device abstraction
//!
//! [`Device`] is the contract every backend satisfies, whether it emulates a
//! peripheral, passes a real one through, or adapts another transport.
//! Enumeration is read-only and must return the same data for as long as the
//! device is attached. Shared behaviour (identity helpers, descriptor
//! encodings, transfer dispatch) is provided in terms of those accessors.

use crate::serialize;
use crate::status::UsbError;
use crate::transfer::{BulkMessage, CtrlMessage, IntrMessage, IsoMessage, TransferMessage};
use protocol::{
    ConfigDescriptor, DeviceDescriptor, DeviceId, EndpointDescriptor, InterfaceDescriptor,
    TransferKind,
};
use serde::{Deserialize, Serialize};

/// Closed set of backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Device model implemented in software
    Emulated,
    /// Real host device passed through to the guest
    Passthrough,
    /// Device reached through some other transport
    Adapter,
}

/// An attached USB peripheral
pub trait Device: Send {
    /// Identity assigned when the device was registered
    fn id(&self) -> DeviceId;

    fn kind(&self) -> BackendKind;

    fn device_descriptor(&self) -> Result<DeviceDescriptor, UsbError>;

    fn configurations(&self) -> Result<Vec<ConfigDescriptor>, UsbError>;

    /// All interface descriptors (every alternate setting) of the
    /// configuration at index `config`
    fn interfaces(&self, config: u8) -> Result<Vec<InterfaceDescriptor>, UsbError>;

    fn endpoints(
        &self,
        config: u8,
        interface: u8,
        alt: u8,
    ) -> Result<Vec<EndpointDescriptor>, UsbError>;

    /// Human-readable name for a negative status code from this backend
    fn error_name(&self, error_code: i32) -> String {
        format!("unknown error {}", error_code)
    }

    /// Claim `interface` for transfers
    ///
    /// Fails with `Busy` when another consumer holds it and `NotFound` when
    /// the device has no such interface. A failed attach changes nothing.
    fn attach(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Cancel outstanding transfers on `endpoint`
    ///
    /// Cancelled transfers still complete, with [`UsbError::Cancelled`], but
    /// possibly after this returns.
    fn cancel_transfer(&mut self, endpoint: u8) -> Result<(), UsbError>;

    fn change_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn number_of_alt_settings(&self, interface: u8) -> Result<u8, UsbError>;

    /// Select an alternate setting of the active interface
    fn set_alt_setting(&mut self, alt_setting: u8) -> Result<(), UsbError>;

    /// Accept or reject a control transfer
    ///
    /// `Ok` only means the transfer was accepted; its outcome arrives through
    /// the command's completion.
    fn submit_control(&mut self, message: Box<CtrlMessage>) -> Result<(), UsbError>;

    fn submit_bulk(&mut self, message: Box<BulkMessage>) -> Result<(), UsbError>;

    fn submit_interrupt(&mut self, message: Box<IntrMessage>) -> Result<(), UsbError>;

    fn submit_isochronous(&mut self, message: Box<IsoMessage>) -> Result<(), UsbError>;

    fn vid(&self) -> Result<u16, UsbError> {
        Ok(self.device_descriptor()?.vendor_id)
    }

    fn pid(&self) -> Result<u16, UsbError> {
        Ok(self.device_descriptor()?.product_id)
    }

    /// True if the device or any interface of its first configuration has
    /// class `device_class`
    fn has_class(&self, device_class: u8) -> Result<bool, UsbError> {
        if self.device_descriptor()?.device_class == device_class {
            return Ok(true);
        }
        if self.configurations()?.is_empty() {
            return Ok(false);
        }
        Ok(self
            .interfaces(0)?
            .iter()
            .any(|interface| interface.interface_class == device_class))
    }

    /// Legacy encoding: the whole descriptor hierarchy
    fn descriptors_v4(&self) -> Result<Vec<u8>, UsbError> {
        serialize::descriptors_v4(self)
    }

    /// Targeted encoding: one interface and alternate setting
    fn descriptors_v5(&self, interface: u8, alt_setting: u8) -> Result<Vec<u8>, UsbError> {
        serialize::descriptors_v5(self, interface, alt_setting)
    }

    /// Route a tagged transfer to its typed submit method
    fn submit_transfer(&mut self, message: TransferMessage) -> Result<(), UsbError> {
        match message {
            TransferMessage::Control(msg) => self.submit_control(msg),
            TransferMessage::Bulk(msg) => self.submit_bulk(msg),
            TransferMessage::Interrupt(msg) => self.submit_interrupt(msg),
            TransferMessage::Isochronous(msg) => self.submit_isochronous(msg),
        }
    }
}

/// Look up `address` among `endpoints` and check its transfer type
pub fn validate_endpoint(
    endpoints: &[EndpointDescriptor],
    address: u8,
    kind: TransferKind,
) -> Result<EndpointDescriptor, UsbError> {
    let endpoint = endpoints
        .iter()
        .find(|endpoint| endpoint.endpoint_address == address)
        .ok_or(UsbError::NotFound)?;

    if endpoint.transfer_kind() != kind {
        return Err(UsbError::InvalidParam);
    }
    Ok(*endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_mock_bulk_endpoint, create_mock_interrupt_endpoint};

    #[test]
    fn test_validate_endpoint() {
        let endpoints = [
            create_mock_bulk_endpoint(0x82),
            create_mock_bulk_endpoint(0x02),
            create_mock_interrupt_endpoint(0x81, 10),
        ];

        let found = validate_endpoint(&endpoints, 0x82, TransferKind::Bulk).unwrap();
        assert_eq!(found.endpoint_address, 0x82);
        assert_eq!(
            validate_endpoint(&endpoints, 0x81, TransferKind::Interrupt)
                .unwrap()
                .interval,
            10
        );
    }

    #[test]
    fn test_validate_endpoint_direction_matters() {
        let endpoints = [create_mock_bulk_endpoint(0x82)];
        assert_eq!(
            validate_endpoint(&endpoints, 0x02, TransferKind::Bulk),
            Err(UsbError::NotFound)
        );
    }

    #[test]
    fn test_validate_endpoint_type_mismatch() {
        let endpoints = [create_mock_interrupt_endpoint(0x81, 1)];
        assert_eq!(
            validate_endpoint(&endpoints, 0x81, TransferKind::Bulk),
            Err(UsbError::InvalidParam)
        );
    }

    #[test]
    fn test_backend_kind_serde_names() {
        #[derive(Deserialize)]
        struct Entry {
            kind: BackendKind,
        }

        let entry: Entry = toml::from_str("kind = \"passthrough\"").unwrap();
        assert_eq!(entry.kind, BackendKind::Passthrough);
    }
}
