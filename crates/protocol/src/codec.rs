//! Descriptor stream parsing
//!
//! Splits a byte stream of concatenated standard descriptors back into typed
//! records. Each record is consumed at its natural size, which is how the
//! guest-facing encodings lay them out.

use crate::descriptors::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, UsbDescriptor,
    descriptor_type,
};
use crate::error::{ProtocolError, Result};

/// One decoded descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Device(DeviceDescriptor),
    Config(ConfigDescriptor),
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
}

impl Descriptor {
    pub fn descriptor_type(&self) -> u8 {
        match self {
            Self::Device(_) => descriptor_type::DEVICE,
            Self::Config(_) => descriptor_type::CONFIGURATION,
            Self::Interface(_) => descriptor_type::INTERFACE,
            Self::Endpoint(_) => descriptor_type::ENDPOINT,
        }
    }
}

/// Parse a concatenated descriptor stream
pub fn parse_descriptors(bytes: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < 2 {
            return Err(ProtocolError::Truncated {
                offset,
                needed: 2,
                available: remaining.len(),
            });
        }

        let (descriptor, size) = match remaining[1] {
            descriptor_type::DEVICE => (
                Descriptor::Device(read_at::<DeviceDescriptor>(bytes, offset)?),
                DeviceDescriptor::SIZE,
            ),
            descriptor_type::CONFIGURATION => (
                Descriptor::Config(read_at::<ConfigDescriptor>(bytes, offset)?),
                ConfigDescriptor::SIZE,
            ),
            descriptor_type::INTERFACE => (
                Descriptor::Interface(read_at::<InterfaceDescriptor>(bytes, offset)?),
                InterfaceDescriptor::SIZE,
            ),
            descriptor_type::ENDPOINT => (
                Descriptor::Endpoint(read_at::<EndpointDescriptor>(bytes, offset)?),
                EndpointDescriptor::SIZE,
            ),
            other => {
                return Err(ProtocolError::UnknownDescriptorType {
                    descriptor_type: other,
                    offset,
                });
            }
        };

        descriptors.push(descriptor);
        offset += size;
    }

    Ok(descriptors)
}

fn read_at<D: UsbDescriptor>(bytes: &[u8], offset: usize) -> Result<D> {
    let available = bytes.len() - offset;
    if available < D::SIZE {
        return Err(ProtocolError::Truncated {
            offset,
            needed: D::SIZE,
            available,
        });
    }

    let mut reader = &bytes[offset..offset + D::SIZE];
    Ok(D::read_from(&mut reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_stream() {
        assert!(parse_descriptors(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_mixed_stream() {
        let interface = InterfaceDescriptor::new(0, 0, 1, 0x03, 0x01, 0x02);
        let endpoint = EndpointDescriptor::new(0x81, 0x03, 8, 10);

        let mut bytes = interface.to_bytes();
        endpoint.append_to(&mut bytes);

        let parsed = parse_descriptors(&bytes).unwrap();
        assert_eq!(
            parsed,
            vec![Descriptor::Interface(interface), Descriptor::Endpoint(endpoint)]
        );
        assert_eq!(parsed[1].descriptor_type(), descriptor_type::ENDPOINT);
    }

    #[test]
    fn test_parse_truncated_descriptor() {
        let mut bytes = EndpointDescriptor::new(0x02, 0x02, 64, 0).to_bytes();
        bytes.truncate(5);

        match parse_descriptors(&bytes) {
            Err(ProtocolError::Truncated {
                offset,
                needed,
                available,
            }) => {
                assert_eq!(offset, 0);
                assert_eq!(needed, EndpointDescriptor::SIZE);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_dangling_byte() {
        let mut bytes = EndpointDescriptor::new(0x02, 0x02, 64, 0).to_bytes();
        bytes.push(0x09);
        assert!(matches!(
            parse_descriptors(&bytes),
            Err(ProtocolError::Truncated { offset: 7, .. })
        ));
    }

    #[test]
    fn test_parse_unknown_type() {
        let bytes = [0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3f, 0x00];
        assert!(matches!(
            parse_descriptors(&bytes),
            Err(ProtocolError::UnknownDescriptorType {
                descriptor_type: 0x21,
                offset: 0
            })
        ));
    }
}
