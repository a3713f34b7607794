//! Descriptor Encoding Integration Tests
//!
//! Exercises the legacy and targeted encodings through a hand-written
//! backend, the way a passthrough device would report its descriptors.
//!
//! Run with: `cargo test -p host --test descriptor_encoding_tests`

use common::test_utils::{
    create_mock_config_descriptor, create_mock_device_descriptor, create_mock_interface,
    create_mock_interrupt_endpoint, create_mock_iso_endpoint,
};
use host::serialize::configuration_bundle;
use host::{
    BackendKind, BulkMessage, CtrlMessage, Device, IntrMessage, IsoMessage, Transfer, UsbError,
};
use protocol::{
    ConfigDescriptor, Descriptor, DeviceDescriptor, DeviceId, EndpointDescriptor,
    InterfaceDescriptor, parse_descriptors,
};

/// Read-only backend over fixed descriptors
///
/// Interface 0 has one setting with an interrupt endpoint; interface 1 has
/// an idle setting and an isochronous one.
struct FixtureDevice {
    disconnected: bool,
}

impl FixtureDevice {
    fn new() -> Self {
        Self {
            disconnected: false,
        }
    }

    fn check(&self) -> Result<(), UsbError> {
        if self.disconnected {
            Err(UsbError::NoDevice)
        } else {
            Ok(())
        }
    }
}

impl Device for FixtureDevice {
    fn id(&self) -> DeviceId {
        DeviceId::encode(0x057e, 0x0305, 1, 1)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Passthrough
    }

    fn device_descriptor(&self) -> Result<DeviceDescriptor, UsbError> {
        Ok(create_mock_device_descriptor(0x057e, 0x0305))
    }

    fn configurations(&self) -> Result<Vec<ConfigDescriptor>, UsbError> {
        Ok(vec![create_mock_config_descriptor(1, 2)])
    }

    fn interfaces(&self, config: u8) -> Result<Vec<InterfaceDescriptor>, UsbError> {
        if config != 0 {
            return Err(UsbError::NotFound);
        }
        Ok(vec![
            create_mock_interface(0, 0, 1),
            create_mock_interface(1, 0, 0),
            create_mock_interface(1, 1, 2),
        ])
    }

    fn endpoints(
        &self,
        _config: u8,
        interface: u8,
        alt: u8,
    ) -> Result<Vec<EndpointDescriptor>, UsbError> {
        // Endpoint queries go to the device and fail once it is gone
        self.check()?;
        match (interface, alt) {
            (0, 0) => Ok(vec![create_mock_interrupt_endpoint(0x81, 1)]),
            (1, 0) => Ok(Vec::new()),
            (1, 1) => Ok(vec![
                create_mock_iso_endpoint(0x83, 64),
                create_mock_iso_endpoint(0x03, 64),
            ]),
            _ => Err(UsbError::NotFound),
        }
    }

    fn attach(&mut self, _interface: u8) -> Result<(), UsbError> {
        self.check()
    }

    fn cancel_transfer(&mut self, _endpoint: u8) -> Result<(), UsbError> {
        Ok(())
    }

    fn change_interface(&mut self, _interface: u8) -> Result<(), UsbError> {
        Err(UsbError::NotSupported)
    }

    fn number_of_alt_settings(&self, interface: u8) -> Result<u8, UsbError> {
        Ok(if interface == 1 { 2 } else { 1 })
    }

    fn set_alt_setting(&mut self, _alt_setting: u8) -> Result<(), UsbError> {
        Err(UsbError::NotSupported)
    }

    fn submit_control(&mut self, message: Box<CtrlMessage>) -> Result<(), UsbError> {
        message.reject(UsbError::NotSupported)
    }

    fn submit_bulk(&mut self, message: Box<BulkMessage>) -> Result<(), UsbError> {
        message.reject(UsbError::NotSupported)
    }

    fn submit_interrupt(&mut self, message: Box<IntrMessage>) -> Result<(), UsbError> {
        message.reject(UsbError::NotSupported)
    }

    fn submit_isochronous(&mut self, message: Box<IsoMessage>) -> Result<(), UsbError> {
        message.reject(UsbError::NotSupported)
    }
}

fn interface_keys(records: &[Descriptor]) -> Vec<(u8, u8)> {
    records
        .iter()
        .filter_map(|record| match record {
            Descriptor::Interface(i) => Some((i.interface_number, i.alternate_setting)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Legacy Encoding Tests
// ============================================================================

#[test]
fn test_v4_parses_back_to_enumeration() {
    let device = FixtureDevice::new();
    let bytes = device.descriptors_v4().unwrap();
    assert_eq!(bytes.len(), 18 + 9 + 3 * 9 + 3 * 7);

    let records = parse_descriptors(&bytes).unwrap();
    assert_eq!(
        records[0],
        Descriptor::Device(device.device_descriptor().unwrap())
    );
    assert_eq!(
        records[1],
        Descriptor::Config(device.configurations().unwrap()[0])
    );

    // Every reported setting is present, last to first
    assert_eq!(interface_keys(&records), vec![(1, 1), (1, 0), (0, 0)]);
}

#[test]
fn test_v4_endpoints_follow_their_interface() {
    let device = FixtureDevice::new();
    let records = parse_descriptors(&device.descriptors_v4().unwrap()).unwrap();

    let expected = vec![
        Descriptor::Device(create_mock_device_descriptor(0x057e, 0x0305)),
        Descriptor::Config(create_mock_config_descriptor(1, 2)),
        Descriptor::Interface(create_mock_interface(1, 1, 2)),
        Descriptor::Endpoint(create_mock_iso_endpoint(0x83, 64)),
        Descriptor::Endpoint(create_mock_iso_endpoint(0x03, 64)),
        Descriptor::Interface(create_mock_interface(1, 0, 0)),
        Descriptor::Interface(create_mock_interface(0, 0, 1)),
        Descriptor::Endpoint(create_mock_interrupt_endpoint(0x81, 1)),
    ];
    assert_eq!(records, expected);
}

// ============================================================================
// Targeted Encoding Tests
// ============================================================================

#[test]
fn test_v5_selects_one_setting() {
    let device = FixtureDevice::new();
    let records = parse_descriptors(&device.descriptors_v5(1, 1).unwrap()).unwrap();

    assert_eq!(records.len(), 5);
    assert_eq!(interface_keys(&records), vec![(1, 1)]);
    assert!(matches!(records[3], Descriptor::Endpoint(e) if e.endpoint_address == 0x83));
}

#[test]
fn test_v5_unknown_setting_keeps_header() {
    let device = FixtureDevice::new();
    let records = parse_descriptors(&device.descriptors_v5(4, 0).unwrap()).unwrap();

    assert_eq!(records.len(), 2);
    assert!(interface_keys(&records).is_empty());
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_enumeration_failure_aborts_encoding() {
    let mut device = FixtureDevice::new();
    device.disconnected = true;

    assert_eq!(device.descriptors_v4(), Err(UsbError::NoDevice));
    assert_eq!(device.descriptors_v5(0, 0), Err(UsbError::NoDevice));
    assert_eq!(configuration_bundle(&device, 0), Err(UsbError::NoDevice));
}

#[test]
fn test_default_error_name() {
    let device = FixtureDevice::new();
    assert_eq!(device.error_name(-7), "unknown error -7");
}

// ============================================================================
// Configuration Bundle Tests
// ============================================================================

#[test]
fn test_configuration_bundle_in_reported_order() {
    let device = FixtureDevice::new();
    let bundle = configuration_bundle(&device, 0).unwrap();

    let records = parse_descriptors(&bundle).unwrap();
    let Descriptor::Config(config) = records[0] else {
        panic!("bundle must start with the configuration descriptor");
    };
    assert_eq!(usize::from(config.total_length), bundle.len());
    assert_eq!(interface_keys(&records), vec![(0, 0), (1, 0), (1, 1)]);

    assert_eq!(configuration_bundle(&device, 1), Err(UsbError::NotFound));
}

#[test]
fn test_identity_helpers() {
    let device = FixtureDevice::new();
    assert_eq!(device.vid(), Ok(0x057e));
    assert_eq!(device.pid(), Ok(0x0305));
    assert_eq!(device.id().vendor_id(), 0x057e);
    assert_eq!(device.has_class(0xff), Ok(true));
    assert_eq!(device.has_class(0x03), Ok(false));
}
