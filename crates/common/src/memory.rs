//! Guest memory contract
//!
//! The USB layer never touches guest RAM directly. Every transfer command
//! reads outgoing data from, and writes results to, the guest address it was
//! created with through this trait, which the hosting emulator implements.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Access would leave the guest address space
    #[error("Guest access out of bounds: {len} bytes at {address:#010x}")]
    OutOfBounds { address: u32, len: usize },

    /// A non-empty access targeted guest address zero
    #[error("Null guest address for a {len} byte access")]
    NullAddress { len: usize },
}

/// Guest address space accessor
///
/// Implementations must be safe to call from backend worker threads.
pub trait GuestMemory: Send + Sync {
    /// Copy `buf.len()` bytes starting at `address` into `buf`
    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `data` into guest memory starting at `address`
    fn write(&self, address: u32, data: &[u8]) -> Result<(), MemoryError>;

    /// Store a 16-bit value in the guest's native byte order
    fn write_u16(&self, address: u32, value: u16) -> Result<(), MemoryError>;
}
