//! Status codes
//!
//! Every guest-visible operation resolves to a signed status: zero or a
//! positive count on success, a negative code on failure. The typed
//! [`UsbError`] carries libusb-compatible codes so passthrough and emulated
//! backends report the same numbers for the same conditions.

use thiserror::Error;

/// Status of a successful operation
pub const SUCCESS: i32 = 0;

/// USB operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Input/output error
    #[error("input/output error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied
    #[error("access denied")]
    Access,
    /// Device was disconnected
    #[error("no such device")]
    NoDevice,
    /// Interface, endpoint or setting not found
    #[error("entity not found")]
    NotFound,
    /// Claimed by another consumer
    #[error("resource busy")]
    Busy,
    /// Transfer timed out
    #[error("operation timed out")]
    Timeout,
    /// Device sent more data than requested
    #[error("overflow")]
    Overflow,
    /// Endpoint stalled
    #[error("pipe error")]
    Pipe,
    /// Transfer was cancelled before completing
    #[error("transfer cancelled")]
    Cancelled,
    /// Allocation failure
    #[error("insufficient memory")]
    NoMemory,
    /// Operation not supported by this backend
    #[error("operation not supported")]
    NotSupported,
    /// Backend-specific negative code
    #[error("backend error {0}")]
    Backend(i32),
    /// Unclassified failure
    #[error("other error")]
    Other,
}

impl UsbError {
    /// The negative status code for this error
    pub fn code(&self) -> i32 {
        match self {
            Self::Io => -1,
            Self::InvalidParam => -2,
            Self::Access => -3,
            Self::NoDevice => -4,
            Self::NotFound => -5,
            Self::Busy => -6,
            Self::Timeout => -7,
            Self::Overflow => -8,
            Self::Pipe => -9,
            Self::Cancelled => -10,
            Self::NoMemory => -11,
            Self::NotSupported => -12,
            Self::Backend(code) => *code,
            Self::Other => -99,
        }
    }

    /// Classify a negative status code
    ///
    /// Returns `None` for success values.
    pub fn from_code(code: i32) -> Option<Self> {
        let error = match code {
            c if c >= 0 => return None,
            -1 => Self::Io,
            -2 => Self::InvalidParam,
            -3 => Self::Access,
            -4 => Self::NoDevice,
            -5 => Self::NotFound,
            -6 => Self::Busy,
            -7 => Self::Timeout,
            -8 => Self::Overflow,
            -9 => Self::Pipe,
            -10 => Self::Cancelled,
            -11 => Self::NoMemory,
            -12 => Self::NotSupported,
            -99 => Self::Other,
            other => Self::Backend(other),
        };
        Some(error)
    }
}

/// Conversion of an operation result into a guest status
pub trait IntoStatus {
    fn into_status(self) -> i32;
}

impl IntoStatus for Result<(), UsbError> {
    fn into_status(self) -> i32 {
        match self {
            Ok(()) => SUCCESS,
            Err(e) => e.code(),
        }
    }
}

impl IntoStatus for Result<u8, UsbError> {
    fn into_status(self) -> i32 {
        match self {
            Ok(count) => i32::from(count),
            Err(e) => e.code(),
        }
    }
}

impl IntoStatus for Result<usize, UsbError> {
    fn into_status(self) -> i32 {
        match self {
            Ok(len) => i32::try_from(len).unwrap_or(i32::MAX),
            Err(e) => e.code(),
        }
    }
}
