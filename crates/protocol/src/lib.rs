//! USB wire definitions shared by the guest-facing USB layer
//!
//! This crate defines the byte-exact USB descriptor records, the control
//! request header packing, and a parser for descriptor streams.
//!
//! # Example
//!
//! ```
//! use protocol::{Direction, Recipient, RequestKind, usb_hdr, standard_request};
//!
//! let hdr = usb_hdr(
//!     Direction::DeviceToHost as u8,
//!     RequestKind::Standard as u8,
//!     Recipient::Device as u8,
//!     standard_request::GET_DESCRIPTOR,
//! );
//! assert_eq!(hdr, 0x8006);
//! ```
//!
//! # Descriptor Streams
//!
//! Descriptors serialize at their natural USB size with little-endian
//! multi-byte fields:
//!
//! ```
//! use protocol::{Descriptor, EndpointDescriptor, parse_descriptors, UsbDescriptor};
//!
//! let endpoint = EndpointDescriptor::new(0x81, 0x02, 512, 0);
//! let bytes = endpoint.to_bytes();
//! assert_eq!(bytes, [0x07, 0x05, 0x81, 0x02, 0x00, 0x02, 0x00]);
//!
//! let parsed = parse_descriptors(&bytes).unwrap();
//! assert_eq!(parsed, vec![Descriptor::Endpoint(endpoint)]);
//! ```

pub mod codec;
pub mod descriptors;
pub mod error;
pub mod request;
pub mod types;

pub use codec::{Descriptor, parse_descriptors};
pub use descriptors::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, TransferKind,
    UsbDescriptor, descriptor_type,
};
pub use error::{ProtocolError, Result};
pub use request::{
    Direction, Recipient, RequestHeader, RequestKind, standard_request, usb_hdr,
};
pub use types::{DeviceId, RequestHandle};
