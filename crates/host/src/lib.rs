//! Guest-facing USB device layer
//!
//! Backends implement [`Device`] and receive guest transfers as
//! [`TransferMessage`]s built by the request decoder. Completion replies flow
//! back over the channel in [`common::channel`].

pub mod config;
pub mod device;
pub mod interfaces;
pub mod registry;
pub mod serialize;
pub mod standard;
pub mod status;
pub mod table;
pub mod transfer;
pub mod worker;

pub use config::HostConfig;
pub use device::{BackendKind, Device, validate_endpoint};
pub use interfaces::InterfaceState;
pub use registry::{DeviceRegistry, RegistryError};
pub use standard::StandardRequest;
pub use status::{IntoStatus, SUCCESS, UsbError};
pub use table::{ConfigurationTable, DeviceTable, EndpointTable, InterfaceTable, TableDevice};
pub use transfer::{
    BulkMessage, CtrlMessage, IntrMessage, IsoMessage, MAX_ISO_PACKETS, Transfer, TransferCommand,
    TransferError, TransferMessage,
};
pub use worker::{StallHandler, TransferHandler, TransferWorker};
