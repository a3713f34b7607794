//! Standard control requests answered from descriptors
//!
//! Emulated backends answer chapter 9 enumeration requests themselves rather
//! than passing them to a device model.

use crate::transfer::CtrlMessage;
use protocol::request::usb_hdr;
use protocol::{Direction, Recipient, RequestKind, descriptor_type, standard_request};

const GET_DESCRIPTOR_DEVICE: u16 = hdr(
    Direction::DeviceToHost,
    Recipient::Device,
    standard_request::GET_DESCRIPTOR,
);
const GET_CONFIGURATION: u16 = hdr(
    Direction::DeviceToHost,
    Recipient::Device,
    standard_request::GET_CONFIGURATION,
);
const SET_CONFIGURATION: u16 = hdr(
    Direction::HostToDevice,
    Recipient::Device,
    standard_request::SET_CONFIGURATION,
);
const GET_INTERFACE: u16 = hdr(
    Direction::DeviceToHost,
    Recipient::Interface,
    standard_request::GET_INTERFACE,
);
const SET_INTERFACE: u16 = hdr(
    Direction::HostToDevice,
    Recipient::Interface,
    standard_request::SET_INTERFACE,
);

const fn hdr(direction: Direction, recipient: Recipient, request: u8) -> u16 {
    usb_hdr(
        direction as u8,
        RequestKind::Standard as u8,
        recipient as u8,
        request,
    )
}

/// A standard request this layer knows how to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRequest {
    GetDeviceDescriptor,
    /// Configuration descriptor bundle at `index`
    GetConfigDescriptor { index: u8 },
    GetConfiguration,
    SetConfiguration { value: u8 },
    GetInterface { interface: u8 },
    SetInterface { interface: u8, alt_setting: u8 },
}

impl StandardRequest {
    /// Recognise a control message; `None` means it needs a device model
    pub fn parse(message: &CtrlMessage) -> Option<Self> {
        let [descriptor, index] = message.value.to_be_bytes();

        match message.header().encode() {
            GET_DESCRIPTOR_DEVICE => match descriptor {
                descriptor_type::DEVICE => Some(Self::GetDeviceDescriptor),
                descriptor_type::CONFIGURATION => Some(Self::GetConfigDescriptor { index }),
                _ => None,
            },
            GET_CONFIGURATION => Some(Self::GetConfiguration),
            SET_CONFIGURATION => Some(Self::SetConfiguration { value: index }),
            GET_INTERFACE => Some(Self::GetInterface {
                interface: message.index as u8,
            }),
            SET_INTERFACE => Some(Self::SetInterface {
                interface: message.index as u8,
                alt_setting: message.value as u8,
            }),
            _ => None,
        }
    }
}
