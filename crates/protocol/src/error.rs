//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding descriptor streams
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Stream ended inside a descriptor
    #[error("Truncated descriptor at offset {offset}: needed {needed} bytes, got {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// bDescriptorType not one of the standard descriptors
    #[error("Unknown descriptor type {descriptor_type:#04x} at offset {offset}")]
    UnknownDescriptorType { descriptor_type: u8, offset: usize },

    /// I/O error while reading a descriptor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
