//! Transfer commands
//!
//! A transfer command is the host-side record of one guest-initiated USB
//! transfer. The request decoder builds one per guest request and hands it to
//! a device backend by value. The backend stages data through the command's
//! buffer helpers and finally calls [`Transfer::complete`], which runs the
//! type-specific completion hook and posts exactly one reply.
//!
//! Completion consumes the command, so a second completion cannot be
//! expressed. Commands a backend refuses are consumed with
//! [`Transfer::reject`] instead; the decoder reports those itself.

use crate::status::UsbError;
use common::{GuestMemory, MemoryError, ReplySender, TransferReply};
use protocol::{RequestHandle, RequestHeader, TransferKind};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Maximum number of packets in one isochronous transfer
pub const MAX_ISO_PACKETS: usize = u8::MAX as usize;

/// Errors raised while staging transfer data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("No guest buffer for a {len} byte access")]
    NullAddress { len: usize },

    #[error("{len} bytes exceed the {limit} byte transfer length")]
    Overflow { len: usize, limit: usize },

    #[error("Packet {packet} out of range for a {count} packet transfer")]
    PacketOutOfRange { packet: usize, count: usize },

    #[error("Packet {packet} reported {value} bytes but only {size} were requested")]
    PacketOverflow { packet: usize, value: u16, size: u16 },

    #[error("{0} packets exceed the isochronous packet limit")]
    TooManyPackets(usize),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl From<TransferError> for UsbError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::NullAddress { .. }
            | TransferError::PacketOutOfRange { .. }
            | TransferError::TooManyPackets(_) => UsbError::InvalidParam,
            TransferError::Overflow { .. } | TransferError::PacketOverflow { .. } => {
                UsbError::Overflow
            }
            TransferError::Memory(_) => UsbError::Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Pending,
    Completed,
    Rejected,
}

/// State shared by every transfer type
pub struct TransferCommand {
    /// Guest request this transfer answers
    pub request: RequestHandle,
    /// Guest address of the transfer data
    pub data_address: u32,
    length: usize,
    buffer: Option<Vec<u8>>,
    memory: Arc<dyn GuestMemory>,
    reply: ReplySender,
    state: CommandState,
}

impl TransferCommand {
    pub fn new(
        request: RequestHandle,
        data_address: u32,
        memory: Arc<dyn GuestMemory>,
        reply: ReplySender,
    ) -> Self {
        Self {
            request,
            data_address,
            length: 0,
            buffer: None,
            memory,
            reply,
            state: CommandState::Pending,
        }
    }

    /// Transfer length in bytes, as requested by the guest
    pub fn length(&self) -> usize {
        self.length
    }

    /// Allocate a staging buffer of exactly `size` bytes
    ///
    /// The buffer starts out with the guest's data at `data_address`, which
    /// is what host-to-device transfers send. A zero-sized buffer never
    /// touches guest memory.
    pub fn make_buffer(&mut self, size: usize) -> Result<&mut [u8], TransferError> {
        let mut buffer = vec![0u8; size];
        if size > 0 {
            if self.data_address == 0 {
                return Err(TransferError::NullAddress { len: size });
            }
            self.memory.read(self.data_address, &mut buffer)?;
        }

        trace!(
            "Staged {} bytes from {:#010x} for request {:?}",
            size, self.data_address, self.request
        );
        Ok(self.buffer.insert(buffer).as_mut_slice())
    }

    /// Current staging buffer contents (empty if none was made)
    pub fn buffer(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.buffer.as_deref_mut()
    }

    /// Write device-produced data back to the guest
    ///
    /// The data lands at `data_address` and replaces the staging buffer
    /// contents, so both always hold what the guest observes. An empty
    /// `src` is a no-op.
    pub fn fill_buffer(&mut self, src: &[u8]) -> Result<(), TransferError> {
        if src.is_empty() {
            return Ok(());
        }
        if src.len() > self.length {
            return Err(TransferError::Overflow {
                len: src.len(),
                limit: self.length,
            });
        }
        if self.data_address == 0 {
            return Err(TransferError::NullAddress { len: src.len() });
        }

        self.memory.write(self.data_address, src)?;

        let staged = self.buffer.get_or_insert_with(Vec::new);
        staged.clear();
        staged.extend_from_slice(src);
        Ok(())
    }

    /// True until the command is completed or rejected
    pub fn is_pending(&self) -> bool {
        self.state == CommandState::Pending
    }

    fn memory(&self) -> &dyn GuestMemory {
        self.memory.as_ref()
    }

    fn finish(&mut self, status: i32) {
        self.state = CommandState::Completed;

        let reply = TransferReply {
            request: self.request,
            status,
        };
        if let Err(e) = self.reply.send(reply) {
            warn!(
                "Dropping reply for request {:?} (status {}): {}",
                self.request, status, e
            );
        }
    }

    fn discard(&mut self) {
        self.state = CommandState::Rejected;
    }
}

impl fmt::Debug for TransferCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferCommand")
            .field("request", &self.request)
            .field("data_address", &format_args!("{:#010x}", self.data_address))
            .field("length", &self.length)
            .field("staged", &self.buffer.as_ref().map(Vec::len))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for TransferCommand {
    fn drop(&mut self) {
        if self.state == CommandState::Pending {
            error!(
                "Transfer command for request {:?} dropped without completion",
                self.request
            );
        }
    }
}

/// Behaviour shared by the four transfer message types
pub trait Transfer: Send + 'static {
    /// Endpoint transfer type this message drives
    const KIND: TransferKind;

    fn command(&self) -> &TransferCommand;

    fn command_mut(&mut self) -> &mut TransferCommand;

    /// Endpoint address, including the direction bit
    fn endpoint(&self) -> u8;

    /// Hook run once the backend is done, before the guest is replied to
    ///
    /// Only needed for results that live outside the data buffer.
    fn on_transfer_complete(&self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Finish the transfer with `status` and reply to the guest
    ///
    /// `status` is the number of bytes transferred or a negative error code.
    fn complete(mut self: Box<Self>, status: i32) {
        let status = match self.on_transfer_complete() {
            Ok(()) => status,
            Err(e) => {
                warn!(
                    "Completion hook failed for request {:?}: {}",
                    self.command().request, e
                );
                if status >= 0 {
                    UsbError::from(e).code()
                } else {
                    status
                }
            }
        };

        debug!(
            "{:?} transfer on endpoint {:#04x} completed: request={:?} status={}",
            Self::KIND,
            self.endpoint(),
            self.command().request,
            status
        );
        self.command_mut().finish(status);
    }

    /// Refuse the transfer without replying
    ///
    /// Returns `Err(error)` so backends can `return msg.reject(..)` from a
    /// submit method.
    fn reject(mut self: Box<Self>, error: UsbError) -> Result<(), UsbError> {
        debug!(
            "{:?} transfer on endpoint {:#04x} rejected: request={:?} error={}",
            Self::KIND,
            self.endpoint(),
            self.command().request,
            error
        );
        self.command_mut().discard();
        Err(error)
    }
}

/// Control transfer
#[derive(Debug)]
pub struct CtrlMessage {
    pub command: TransferCommand,
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl CtrlMessage {
    pub fn new(
        mut command: TransferCommand,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Self {
        command.length = usize::from(length);
        Self {
            command,
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    pub fn header(&self) -> RequestHeader {
        RequestHeader::from_parts(self.request_type, self.request)
    }

    /// True for device-to-host requests
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

impl Transfer for CtrlMessage {
    const KIND: TransferKind = TransferKind::Control;

    fn command(&self) -> &TransferCommand {
        &self.command
    }

    fn command_mut(&mut self) -> &mut TransferCommand {
        &mut self.command
    }

    fn endpoint(&self) -> u8 {
        self.request_type & 0x80
    }
}

/// Bulk transfer
#[derive(Debug)]
pub struct BulkMessage {
    pub command: TransferCommand,
    pub length: u16,
    pub endpoint: u8,
}

impl BulkMessage {
    pub fn new(mut command: TransferCommand, endpoint: u8, length: u16) -> Self {
        command.length = usize::from(length);
        Self {
            command,
            length,
            endpoint,
        }
    }
}

impl Transfer for BulkMessage {
    const KIND: TransferKind = TransferKind::Bulk;

    fn command(&self) -> &TransferCommand {
        &self.command
    }

    fn command_mut(&mut self) -> &mut TransferCommand {
        &mut self.command
    }

    fn endpoint(&self) -> u8 {
        self.endpoint
    }
}

/// Interrupt transfer
#[derive(Debug)]
pub struct IntrMessage {
    pub command: TransferCommand,
    pub length: u16,
    pub endpoint: u8,
}

impl IntrMessage {
    pub fn new(mut command: TransferCommand, endpoint: u8, length: u16) -> Self {
        command.length = usize::from(length);
        Self {
            command,
            length,
            endpoint,
        }
    }
}

impl Transfer for IntrMessage {
    const KIND: TransferKind = TransferKind::Interrupt;

    fn command(&self) -> &TransferCommand {
        &self.command
    }

    fn command_mut(&mut self) -> &mut TransferCommand {
        &mut self.command
    }

    fn endpoint(&self) -> u8 {
        self.endpoint
    }
}

/// Isochronous transfer
///
/// The data buffer holds all packets back to back. Each packet's actual
/// length is reported separately, as a 16-bit value per packet at
/// `packet_sizes_addr`.
#[derive(Debug)]
pub struct IsoMessage {
    pub command: TransferCommand,
    pub packet_sizes_addr: u32,
    pub packet_sizes: Vec<u16>,
    pub length: u16,
    pub num_packets: u8,
    pub endpoint: u8,
    packet_results: Vec<u16>,
}

impl IsoMessage {
    pub fn new(
        mut command: TransferCommand,
        endpoint: u8,
        packet_sizes_addr: u32,
        packet_sizes: Vec<u16>,
    ) -> Result<Self, TransferError> {
        // Treated as rejected until validated, so early returns drop it quietly.
        command.discard();

        let num_packets = u8::try_from(packet_sizes.len())
            .map_err(|_| TransferError::TooManyPackets(packet_sizes.len()))?;
        let total: usize = packet_sizes.iter().map(|&size| usize::from(size)).sum();
        let length = u16::try_from(total).map_err(|_| TransferError::Overflow {
            len: total,
            limit: usize::from(u16::MAX),
        })?;

        command.state = CommandState::Pending;
        command.length = total;
        Ok(Self {
            command,
            packet_sizes_addr,
            packet_results: vec![0; packet_sizes.len()],
            packet_sizes,
            length,
            num_packets,
            endpoint,
        })
    }

    /// Record how many bytes packet `packet_num` actually moved
    pub fn set_packet_return_value(
        &mut self,
        packet_num: usize,
        return_value: u16,
    ) -> Result<(), TransferError> {
        let count = self.packet_sizes.len();
        let size = *self
            .packet_sizes
            .get(packet_num)
            .ok_or(TransferError::PacketOutOfRange {
                packet: packet_num,
                count,
            })?;
        if return_value > size {
            return Err(TransferError::PacketOverflow {
                packet: packet_num,
                value: return_value,
                size,
            });
        }

        self.packet_results[packet_num] = return_value;
        Ok(())
    }

    /// Per-packet results in original packet order
    pub fn packet_results(&self) -> &[u16] {
        &self.packet_results
    }

    /// Byte offset of packet `packet_num` within the data buffer
    pub fn packet_offset(&self, packet_num: usize) -> usize {
        self.packet_sizes
            .iter()
            .take(packet_num)
            .map(|&size| usize::from(size))
            .sum()
    }
}

impl Transfer for IsoMessage {
    const KIND: TransferKind = TransferKind::Isochronous;

    fn command(&self) -> &TransferCommand {
        &self.command
    }

    fn command_mut(&mut self) -> &mut TransferCommand {
        &mut self.command
    }

    fn endpoint(&self) -> u8 {
        self.endpoint
    }

    fn on_transfer_complete(&self) -> Result<(), TransferError> {
        let memory = self.command.memory();
        for (packet, &value) in self.packet_results.iter().enumerate() {
            // At most 255 packets, so the offset cannot overflow.
            let address = self.packet_sizes_addr.wrapping_add(packet as u32 * 2);
            memory.write_u16(address, value)?;
        }
        Ok(())
    }
}

/// Any transfer message, as handed between decoder, backend and worker
#[derive(Debug)]
pub enum TransferMessage {
    Control(Box<CtrlMessage>),
    Bulk(Box<BulkMessage>),
    Interrupt(Box<IntrMessage>),
    Isochronous(Box<IsoMessage>),
}

impl TransferMessage {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Control(_) => CtrlMessage::KIND,
            Self::Bulk(_) => BulkMessage::KIND,
            Self::Interrupt(_) => IntrMessage::KIND,
            Self::Isochronous(_) => IsoMessage::KIND,
        }
    }

    pub fn endpoint(&self) -> u8 {
        match self {
            Self::Control(msg) => msg.endpoint(),
            Self::Bulk(msg) => msg.endpoint(),
            Self::Interrupt(msg) => msg.endpoint(),
            Self::Isochronous(msg) => msg.endpoint(),
        }
    }

    pub fn command(&self) -> &TransferCommand {
        match self {
            Self::Control(msg) => &msg.command,
            Self::Bulk(msg) => &msg.command,
            Self::Interrupt(msg) => &msg.command,
            Self::Isochronous(msg) => &msg.command,
        }
    }

    pub fn command_mut(&mut self) -> &mut TransferCommand {
        match self {
            Self::Control(msg) => &mut msg.command,
            Self::Bulk(msg) => &mut msg.command,
            Self::Interrupt(msg) => &mut msg.command,
            Self::Isochronous(msg) => &mut msg.command,
        }
    }

    pub fn request(&self) -> RequestHandle {
        self.command().request
    }

    /// Whether data flows from device to host
    pub fn is_in(&self) -> bool {
        self.endpoint() & 0x80 != 0
    }

    pub fn complete(self, status: i32) {
        match self {
            Self::Control(msg) => msg.complete(status),
            Self::Bulk(msg) => msg.complete(status),
            Self::Interrupt(msg) => msg.complete(status),
            Self::Isochronous(msg) => msg.complete(status),
        }
    }

    pub fn reject(self, error: UsbError) -> Result<(), UsbError> {
        match self {
            Self::Control(msg) => msg.reject(error),
            Self::Bulk(msg) => msg.reject(error),
            Self::Interrupt(msg) => msg.reject(error),
            Self::Isochronous(msg) => msg.reject(error),
        }
    }
}

impl From<Box<CtrlMessage>> for TransferMessage {
    fn from(msg: Box<CtrlMessage>) -> Self {
        Self::Control(msg)
    }
}

impl From<Box<BulkMessage>> for TransferMessage {
    fn from(msg: Box<BulkMessage>) -> Self {
        Self::Bulk(msg)
    }
}

impl From<Box<IntrMessage>> for TransferMessage {
    fn from(msg: Box<IntrMessage>) -> Self {
        Self::Interrupt(msg)
    }
}

impl From<Box<IsoMessage>> for TransferMessage {
    fn from(msg: Box<IsoMessage>) -> Self {
        Self::Isochronous(msg)
    }
}
