//! Common utilities for guest-usb
//!
//! This crate provides functionality shared by the host layer and its
//! collaborators: error handling, logging setup, the guest memory contract,
//! and the reply channel that carries transfer completions back to the
//! request decoder.

pub mod channel;
pub mod error;
pub mod logging;
pub mod memory;
pub mod test_utils;

pub use channel::{ReplyReceiver, ReplySender, TransferReply, create_reply_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use memory::{GuestMemory, MemoryError};
