//! Control request header packing
//!
//! Guests name control requests by a single 16-bit value whose high byte is
//! the USB bmRequestType and whose low byte is bRequest.

use serde::{Deserialize, Serialize};

/// Standard device request codes (USB 2.0 table 9-4)
pub mod standard_request {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_DESCRIPTOR: u8 = 7;
    pub const GET_CONFIGURATION: u8 = 8;
    pub const SET_CONFIGURATION: u8 = 9;
    pub const GET_INTERFACE: u8 = 10;
    pub const SET_INTERFACE: u8 = 11;
    pub const SYNCH_FRAME: u8 = 12;
}

/// Data phase direction (bmRequestType bit 7)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    HostToDevice = 0,
    DeviceToHost = 1,
}

/// Request type (bmRequestType bits 6..5)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// Request recipient (bmRequestType bits 4..0)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Pack a control request into its 16-bit header
///
/// `dir` is 0 or 1, `kind` is 0..=3 and `recipient` is 0..=31. The result
/// is `(dir << 7 | kind << 5 | recipient) << 8 | request`.
pub const fn usb_hdr(dir: u8, kind: u8, recipient: u8, request: u8) -> u16 {
    let request_type = (dir & 0x01) << 7 | (kind & 0x03) << 5 | (recipient & 0x1f);
    (request_type as u16) << 8 | request as u16
}

/// Build just the bmRequestType byte
pub const fn request_type(dir: Direction, kind: RequestKind, recipient: Recipient) -> u8 {
    (usb_hdr(dir as u8, kind as u8, recipient as u8, 0) >> 8) as u8
}

/// Typed control request header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHeader {
    pub direction: Direction,
    pub kind: RequestKind,
    /// Raw recipient bits; values above 3 are reserved but preserved
    pub recipient: u8,
    pub request: u8,
}

impl RequestHeader {
    pub fn new(direction: Direction, kind: RequestKind, recipient: Recipient, request: u8) -> Self {
        Self {
            direction,
            kind,
            recipient: recipient as u8,
            request,
        }
    }

    /// Split a bmRequestType/bRequest pair
    pub fn from_parts(request_type: u8, request: u8) -> Self {
        let direction = if request_type & 0x80 != 0 {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        };
        let kind = match (request_type >> 5) & 0x03 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        };

        Self {
            direction,
            kind,
            recipient: request_type & 0x1f,
            request,
        }
    }

    /// Decode a packed 16-bit header
    pub fn decode(value: u16) -> Self {
        Self::from_parts((value >> 8) as u8, value as u8)
    }

    /// Pack into the 16-bit header
    pub fn encode(&self) -> u16 {
        usb_hdr(
            self.direction as u8,
            self.kind as u8,
            self.recipient,
            self.request,
        )
    }

    /// The bmRequestType byte
    pub fn request_type(&self) -> u8 {
        (self.encode() >> 8) as u8
    }

    /// Typed recipient, if it is one of the defined values
    pub fn recipient(&self) -> Option<Recipient> {
        match self.recipient {
            0 => Some(Recipient::Device),
            1 => Some(Recipient::Interface),
            2 => Some(Recipient::Endpoint),
            3 => Some(Recipient::Other),
            _ => None,
        }
    }

    pub fn is_standard(&self) -> bool {
        self.kind == RequestKind::Standard
    }
}
