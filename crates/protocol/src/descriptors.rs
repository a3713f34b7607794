//! USB 2.0 standard descriptors
//!
//! Each record mirrors its chapter 9 layout field for field. The wire form is
//! the record's natural size with multi-byte fields in little-endian order,
//! so the order and width of the fields below must never change.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// bDescriptorType values for the standard descriptors
pub mod descriptor_type {
    pub const DEVICE: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const INTERFACE: u8 = 0x04;
    pub const ENDPOINT: u8 = 0x05;
}

/// A descriptor record with a fixed wire layout
pub trait UsbDescriptor: Sized {
    /// Natural wire size in bytes
    const SIZE: usize;
    /// bDescriptorType of this record
    const DESCRIPTOR_TYPE: u8;

    /// Write the record in wire order
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Read a record in wire order
    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self>;

    /// Encode the record into a fresh buffer of exactly `SIZE` bytes
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        self.append_to(&mut bytes);
        bytes
    }

    /// Append the record to `buffer`
    fn append_to(&self, buffer: &mut Vec<u8>) {
        // Writes into a Vec cannot fail.
        let _ = self.write_to(buffer);
    }
}

/// Endpoint transfer type (bmAttributes bits 1..0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferKind {
    /// Decode from an endpoint bmAttributes byte
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => Self::Control,
            1 => Self::Isochronous,
            2 => Self::Bulk,
            _ => Self::Interrupt,
        }
    }

    /// The bmAttributes transfer type bits
    pub fn attribute_bits(self) -> u8 {
        match self {
            Self::Control => 0,
            Self::Isochronous => 1,
            Self::Bulk => 2,
            Self::Interrupt => 3,
        }
    }
}

/// Standard device descriptor (18 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub bcd_usb: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            length: Self::SIZE as u8,
            descriptor_type: descriptor_type::DEVICE,
            bcd_usb: 0x0200,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            max_packet_size0: 64,
            vendor_id: 0,
            product_id: 0,
            bcd_device: 0x0100,
            manufacturer_index: 0,
            product_index: 0,
            serial_number_index: 0,
            num_configurations: 1,
        }
    }
}

impl UsbDescriptor for DeviceDescriptor {
    const SIZE: usize = 18;
    const DESCRIPTOR_TYPE: u8 = descriptor_type::DEVICE;

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(self.descriptor_type)?;
        writer.write_u16::<LittleEndian>(self.bcd_usb)?;
        writer.write_u8(self.device_class)?;
        writer.write_u8(self.device_subclass)?;
        writer.write_u8(self.device_protocol)?;
        writer.write_u8(self.max_packet_size0)?;
        writer.write_u16::<LittleEndian>(self.vendor_id)?;
        writer.write_u16::<LittleEndian>(self.product_id)?;
        writer.write_u16::<LittleEndian>(self.bcd_device)?;
        writer.write_u8(self.manufacturer_index)?;
        writer.write_u8(self.product_index)?;
        writer.write_u8(self.serial_number_index)?;
        writer.write_u8(self.num_configurations)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            length: reader.read_u8()?,
            descriptor_type: reader.read_u8()?,
            bcd_usb: reader.read_u16::<LittleEndian>()?,
            device_class: reader.read_u8()?,
            device_subclass: reader.read_u8()?,
            device_protocol: reader.read_u8()?,
            max_packet_size0: reader.read_u8()?,
            vendor_id: reader.read_u16::<LittleEndian>()?,
            product_id: reader.read_u16::<LittleEndian>()?,
            bcd_device: reader.read_u16::<LittleEndian>()?,
            manufacturer_index: reader.read_u8()?,
            product_index: reader.read_u8()?,
            serial_number_index: reader.read_u8()?,
            num_configurations: reader.read_u8()?,
        })
    }
}

/// Standard configuration descriptor (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigDescriptor {
    /// Create a configuration descriptor; `total_length` is left at zero
    pub fn new(configuration_value: u8, num_interfaces: u8, attributes: u8, max_power: u8) -> Self {
        Self {
            num_interfaces,
            configuration_value,
            attributes,
            max_power,
            ..Self::default()
        }
    }
}

impl Default for ConfigDescriptor {
    fn default() -> Self {
        Self {
            length: Self::SIZE as u8,
            descriptor_type: descriptor_type::CONFIGURATION,
            total_length: 0,
            num_interfaces: 0,
            configuration_value: 1,
            configuration_index: 0,
            attributes: 0x80,
            max_power: 50,
        }
    }
}

impl UsbDescriptor for ConfigDescriptor {
    const SIZE: usize = 9;
    const DESCRIPTOR_TYPE: u8 = descriptor_type::CONFIGURATION;

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(self.descriptor_type)?;
        writer.write_u16::<LittleEndian>(self.total_length)?;
        writer.write_u8(self.num_interfaces)?;
        writer.write_u8(self.configuration_value)?;
        writer.write_u8(self.configuration_index)?;
        writer.write_u8(self.attributes)?;
        writer.write_u8(self.max_power)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            length: reader.read_u8()?,
            descriptor_type: reader.read_u8()?,
            total_length: reader.read_u16::<LittleEndian>()?,
            num_interfaces: reader.read_u8()?,
            configuration_value: reader.read_u8()?,
            configuration_index: reader.read_u8()?,
            attributes: reader.read_u8()?,
            max_power: reader.read_u8()?,
        })
    }
}

/// Standard interface descriptor (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_index: u8,
}

impl InterfaceDescriptor {
    pub fn new(
        interface_number: u8,
        alternate_setting: u8,
        num_endpoints: u8,
        interface_class: u8,
        interface_subclass: u8,
        interface_protocol: u8,
    ) -> Self {
        Self {
            interface_number,
            alternate_setting,
            num_endpoints,
            interface_class,
            interface_subclass,
            interface_protocol,
            ..Self::default()
        }
    }
}

impl Default for InterfaceDescriptor {
    fn default() -> Self {
        Self {
            length: Self::SIZE as u8,
            descriptor_type: descriptor_type::INTERFACE,
            interface_number: 0,
            alternate_setting: 0,
            num_endpoints: 0,
            interface_class: 0,
            interface_subclass: 0,
            interface_protocol: 0,
            interface_index: 0,
        }
    }
}

impl UsbDescriptor for InterfaceDescriptor {
    const SIZE: usize = 9;
    const DESCRIPTOR_TYPE: u8 = descriptor_type::INTERFACE;

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&[
            self.length,
            self.descriptor_type,
            self.interface_number,
            self.alternate_setting,
            self.num_endpoints,
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
            self.interface_index,
        ])
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut raw = [0u8; Self::SIZE];
        reader.read_exact(&mut raw)?;

        Ok(Self {
            length: raw[0],
            descriptor_type: raw[1],
            interface_number: raw[2],
            alternate_setting: raw[3],
            num_endpoints: raw[4],
            interface_class: raw[5],
            interface_subclass: raw[6],
            interface_protocol: raw[7],
            interface_index: raw[8],
        })
    }
}

/// Standard endpoint descriptor (7 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn new(endpoint_address: u8, attributes: u8, max_packet_size: u16, interval: u8) -> Self {
        Self {
            endpoint_address,
            attributes,
            max_packet_size,
            interval,
            ..Self::default()
        }
    }

    /// Endpoint number without the direction bit
    pub fn number(&self) -> u8 {
        self.endpoint_address & 0x0f
    }

    /// True for device-to-host endpoints
    pub fn is_in(&self) -> bool {
        self.endpoint_address & 0x80 != 0
    }

    pub fn transfer_kind(&self) -> TransferKind {
        TransferKind::from_attributes(self.attributes)
    }
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        Self {
            length: Self::SIZE as u8,
            descriptor_type: descriptor_type::ENDPOINT,
            endpoint_address: 0,
            attributes: 0,
            max_packet_size: 0,
            interval: 0,
        }
    }
}

impl UsbDescriptor for EndpointDescriptor {
    const SIZE: usize = 7;
    const DESCRIPTOR_TYPE: u8 = descriptor_type::ENDPOINT;

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.length)?;
        writer.write_u8(self.descriptor_type)?;
        writer.write_u8(self.endpoint_address)?;
        writer.write_u8(self.attributes)?;
        writer.write_u16::<LittleEndian>(self.max_packet_size)?;
        writer.write_u8(self.interval)
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            length: reader.read_u8()?,
            descriptor_type: reader.read_u8()?,
            endpoint_address: reader.read_u8()?,
            attributes: reader.read_u8()?,
            max_packet_size: reader.read_u16::<LittleEndian>()?,
            interval: reader.read_u8()?,
        })
    }
}
