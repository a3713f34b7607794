//! Test utilities for guest-usb
//!
//! Provides an in-memory guest address space and descriptor factories for
//! testing across crates.
//!
//! # Example
//!
//! ```
//! use common::GuestMemory;
//! use common::test_utils::TestMemory;
//!
//! let memory = TestMemory::new(0x100);
//! memory.write(0x10, &[1, 2, 3]).unwrap();
//! assert_eq!(memory.bytes(0x10, 3), vec![1, 2, 3]);
//! ```

use crate::memory::{GuestMemory, MemoryError};
use byteorder::{BigEndian, ByteOrder};
use protocol::{ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Flat guest address space backed by a `Vec<u8>`
///
/// 16-bit stores are big-endian, like the PowerPC guests this layer serves.
#[derive(Debug)]
pub struct TestMemory {
    data: Mutex<Vec<u8>>,
}

impl TestMemory {
    /// Create a zero-filled address space of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }

    /// Snapshot `len` bytes at `address`
    ///
    /// Panics on out-of-range access; intended for assertions.
    pub fn bytes(&self, address: u32, len: usize) -> Vec<u8> {
        let data = self.data.lock().unwrap();
        let start = address as usize;
        data[start..start + len].to_vec()
    }

    /// Read back a big-endian 16-bit value
    pub fn u16_at(&self, address: u32) -> u16 {
        BigEndian::read_u16(&self.bytes(address, 2))
    }

    fn range(&self, len_total: usize, address: u32, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= len_total => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds { address, len }),
        }
    }
}

impl GuestMemory for TestMemory {
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let data = self.data.lock().unwrap();
        let range = self.range(data.len(), address, buf.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write(&self, address: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        let mut data = self.data.lock().unwrap();
        let range = self.range(data.len(), address, bytes.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn write_u16(&self, address: u32, value: u16) -> Result<(), MemoryError> {
        let mut raw = [0u8; 2];
        BigEndian::write_u16(&mut raw, value);
        self.write(address, &raw)
    }
}

/// Create a mock device descriptor with the given identity
pub fn create_mock_device_descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id,
        product_id,
        manufacturer_index: 1,
        product_index: 2,
        serial_number_index: 3,
        ..DeviceDescriptor::default()
    }
}

/// Raw bytes of `create_mock_device_descriptor(0x1234, 0x5678)`
pub fn create_mock_device_descriptor_bytes() -> Vec<u8> {
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x00, 0x02, // bcdUSB (2.00)
        0x00, // bDeviceClass
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        0x40, // bMaxPacketSize0 (64 bytes)
        0x34, 0x12, // idVendor (0x1234)
        0x78, 0x56, // idProduct (0x5678)
        0x00, 0x01, // bcdDevice (1.00)
        0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Create a bus-powered configuration descriptor
pub fn create_mock_config_descriptor(configuration_value: u8, num_interfaces: u8) -> ConfigDescriptor {
    ConfigDescriptor::new(configuration_value, num_interfaces, 0x80, 0x32)
}

/// Create a vendor-specific interface descriptor
pub fn create_mock_interface(number: u8, alternate_setting: u8, num_endpoints: u8) -> InterfaceDescriptor {
    InterfaceDescriptor::new(number, alternate_setting, num_endpoints, 0xff, 0x00, 0x00)
}

/// Create a bulk endpoint descriptor
pub fn create_mock_bulk_endpoint(address: u8) -> EndpointDescriptor {
    EndpointDescriptor::new(address, 0x02, 512, 0)
}

/// Create an interrupt endpoint descriptor
pub fn create_mock_interrupt_endpoint(address: u8, interval: u8) -> EndpointDescriptor {
    EndpointDescriptor::new(address, 0x03, 64, interval)
}

/// Create an isochronous endpoint descriptor
pub fn create_mock_iso_endpoint(address: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor::new(address, 0x01, max_packet_size, 1)
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
