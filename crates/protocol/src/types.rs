//! Identity types shared across the USB layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-unique device identifier
///
/// Encodes `vid << 32 | pid << 16 | bus << 8 | port`. Guest software caches
/// it, so it must stay stable for as long as the device is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Marker for a device that has not been given an identity yet
    pub const UNASSIGNED: DeviceId = DeviceId(u64::MAX);

    pub fn encode(vendor_id: u16, product_id: u16, bus: u8, port: u8) -> Self {
        Self(
            u64::from(vendor_id) << 32
                | u64::from(product_id) << 16
                | u64::from(bus) << 8
                | u64::from(port),
        )
    }

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }

    pub fn vendor_id(self) -> u16 {
        (self.0 >> 32) as u16
    }

    pub fn product_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn bus(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn port(self) -> u8 {
        self.0 as u8
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Handle of the guest request a transfer originated from
///
/// Opaque to this layer; the request decoder uses it to address its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHandle(pub u32);
