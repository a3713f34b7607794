//! Emulated device described by a descriptor table
//!
//! A [`DeviceTable`] is a declarative descriptor tree, usually loaded from
//! the `[[devices]]` section of the host configuration. [`TableDevice`]
//! reports it through the [`Device`] contract, answers standard enumeration
//! requests itself and hands every other transfer to an optional
//! [`TransferWorker`].

use crate::device::{BackendKind, Device, validate_endpoint};
use crate::interfaces::InterfaceState;
use crate::serialize;
use crate::standard::StandardRequest;
use crate::status::UsbError;
use crate::transfer::{BulkMessage, CtrlMessage, IntrMessage, IsoMessage, Transfer};
use crate::worker::TransferWorker;
use protocol::{
    ConfigDescriptor, DeviceDescriptor, DeviceId, EndpointDescriptor, InterfaceDescriptor,
    TransferKind, UsbDescriptor,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Top-level descriptor table of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceTable {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Bus and port the device appears on
    pub bus: u8,
    pub port: u8,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub bcd_usb: u16,
    pub bcd_device: u16,
    pub max_packet_size0: u8,
    pub configurations: Vec<ConfigurationTable>,
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self {
            vendor_id: 0,
            product_id: 0,
            bus: 0,
            port: 0,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            bcd_usb: 0x0200,
            bcd_device: 0x0100,
            max_packet_size0: 64,
            configurations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationTable {
    /// bConfigurationValue
    pub value: u8,
    pub attributes: u8,
    /// In 2 mA units
    pub max_power: u8,
    /// Every alternate setting of every interface
    pub interfaces: Vec<InterfaceTable>,
}

impl Default for ConfigurationTable {
    fn default() -> Self {
        Self {
            value: 1,
            attributes: 0x80,
            max_power: 50,
            interfaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceTable {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointTable>,
}

impl Default for InterfaceTable {
    fn default() -> Self {
        Self {
            number: 0,
            alternate_setting: 0,
            class: 0xff,
            subclass: 0,
            protocol: 0,
            endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointTable {
    /// Endpoint address including the direction bit
    pub address: u8,
    pub transfer: TransferKind,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self {
            address: 0x81,
            transfer: TransferKind::Bulk,
            max_packet_size: 64,
            interval: 0,
        }
    }
}

impl DeviceTable {
    pub fn device_descriptor(&self) -> Result<DeviceDescriptor, UsbError> {
        Ok(DeviceDescriptor {
            bcd_usb: self.bcd_usb,
            device_class: self.device_class,
            device_subclass: self.device_subclass,
            device_protocol: self.device_protocol,
            max_packet_size0: self.max_packet_size0,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            bcd_device: self.bcd_device,
            num_configurations: count(self.configurations.len())?,
            ..DeviceDescriptor::default()
        })
    }
}

impl ConfigurationTable {
    /// Configuration descriptor with counts and total length derived from
    /// the table
    pub fn descriptor(&self) -> Result<ConfigDescriptor, UsbError> {
        let mut numbers: Vec<u8> = self.interfaces.iter().map(|i| i.number).collect();
        numbers.sort_unstable();
        numbers.dedup();

        let body: usize = self
            .interfaces
            .iter()
            .map(|i| InterfaceDescriptor::SIZE + i.endpoints.len() * EndpointDescriptor::SIZE)
            .sum();
        let total_length =
            u16::try_from(ConfigDescriptor::SIZE + body).map_err(|_| UsbError::Overflow)?;

        Ok(ConfigDescriptor {
            total_length,
            ..ConfigDescriptor::new(self.value, count(numbers.len())?, self.attributes, self.max_power)
        })
    }

    fn find_interface(&self, number: u8, alt: u8) -> Option<&InterfaceTable> {
        self.interfaces
            .iter()
            .find(|i| i.number == number && i.alternate_setting == alt)
    }
}

impl InterfaceTable {
    pub fn descriptor(&self) -> Result<InterfaceDescriptor, UsbError> {
        Ok(InterfaceDescriptor::new(
            self.number,
            self.alternate_setting,
            count(self.endpoints.len())?,
            self.class,
            self.subclass,
            self.protocol,
        ))
    }
}

impl EndpointTable {
    pub fn descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor::new(
            self.address,
            self.transfer.attribute_bits(),
            self.max_packet_size,
            self.interval,
        )
    }
}

fn count(len: usize) -> Result<u8, UsbError> {
    u8::try_from(len).map_err(|_| UsbError::Overflow)
}

/// Emulated backend serving a [`DeviceTable`]
pub struct TableDevice {
    id: DeviceId,
    table: DeviceTable,
    interfaces: InterfaceState,
    /// Selected bConfigurationValue; 0 while unconfigured
    configuration: u8,
    worker: Option<TransferWorker>,
}

impl TableDevice {
    pub fn new(id: DeviceId, table: DeviceTable) -> Self {
        Self {
            id,
            table,
            interfaces: InterfaceState::new(),
            configuration: 0,
            worker: None,
        }
    }

    /// Route non-standard transfers to `worker`
    pub fn with_worker(mut self, worker: TransferWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn table(&self) -> &DeviceTable {
        &self.table
    }

    /// Interface claim state, for marking interfaces held elsewhere
    pub fn interface_state_mut(&mut self) -> &mut InterfaceState {
        &mut self.interfaces
    }

    /// Selected bConfigurationValue
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Index of the active configuration; the first while unconfigured
    fn active_index(&self) -> u8 {
        self.table
            .configurations
            .iter()
            .position(|c| c.value == self.configuration)
            .and_then(|index| u8::try_from(index).ok())
            .unwrap_or(0)
    }

    fn active_interfaces(&self) -> Result<Vec<InterfaceDescriptor>, UsbError> {
        self.interfaces(self.active_index())
    }

    /// Endpoints of the active interface and of every claimed interface, each
    /// at its selected alternate setting
    fn usable_endpoints(&self) -> Result<Vec<EndpointDescriptor>, UsbError> {
        let config = self.active_index();
        let numbers: BTreeSet<u8> = std::iter::once(self.interfaces.active_interface())
            .chain(self.interfaces.claimed())
            .collect();

        let mut endpoints = Vec::new();
        for number in numbers {
            match self.endpoints(config, number, self.interfaces.alt_setting(number)) {
                Ok(found) => endpoints.extend(found),
                // The configuration has no such interface
                Err(UsbError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(endpoints)
    }

    fn answer(&mut self, request: StandardRequest) -> Result<Vec<u8>, UsbError> {
        match request {
            StandardRequest::GetDeviceDescriptor => Ok(self.device_descriptor()?.to_bytes()),
            StandardRequest::GetConfigDescriptor { index } => {
                serialize::configuration_bundle(&*self, index).map_err(|e| match e {
                    UsbError::NotFound => UsbError::Pipe,
                    e => e,
                })
            }
            StandardRequest::GetConfiguration => Ok(vec![self.configuration]),
            StandardRequest::SetConfiguration { value } => {
                if value != 0 && !self.table.configurations.iter().any(|c| c.value == value) {
                    return Err(UsbError::Pipe);
                }
                debug!("Device {} set to configuration {}", self.id, value);
                self.configuration = value;
                self.interfaces.reset_alt_settings();
                Ok(Vec::new())
            }
            StandardRequest::GetInterface { interface } => {
                let interfaces = self.active_interfaces()?;
                if !interfaces.iter().any(|i| i.interface_number == interface) {
                    return Err(UsbError::Pipe);
                }
                Ok(vec![self.interfaces.alt_setting(interface)])
            }
            StandardRequest::SetInterface {
                interface,
                alt_setting,
            } => {
                let interfaces = self.active_interfaces()?;
                self.interfaces
                    .select_alt_setting(&interfaces, interface, alt_setting)
                    .map_err(|_| UsbError::Pipe)?;
                Ok(Vec::new())
            }
        }
    }

    /// Hand a data transfer to the worker after checking its endpoint
    fn forward<T>(&mut self, message: Box<T>, endpoint: u8) -> Result<(), UsbError>
    where
        T: Transfer,
        Box<T>: Into<crate::transfer::TransferMessage>,
    {
        let endpoints = match self.usable_endpoints() {
            Ok(endpoints) => endpoints,
            Err(e) => return message.reject(e),
        };
        if let Err(e) = validate_endpoint(&endpoints, endpoint, T::KIND) {
            return message.reject(e);
        }

        match &self.worker {
            Some(worker) => worker.submit(message.into()),
            None => message.reject(UsbError::NotSupported),
        }
    }
}

impl Device for TableDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Emulated
    }

    fn device_descriptor(&self) -> Result<DeviceDescriptor, UsbError> {
        self.table.device_descriptor()
    }

    fn configurations(&self) -> Result<Vec<ConfigDescriptor>, UsbError> {
        self.table
            .configurations
            .iter()
            .map(ConfigurationTable::descriptor)
            .collect()
    }

    fn interfaces(&self, config: u8) -> Result<Vec<InterfaceDescriptor>, UsbError> {
        self.table
            .configurations
            .get(usize::from(config))
            .ok_or(UsbError::NotFound)?
            .interfaces
            .iter()
            .map(InterfaceTable::descriptor)
            .collect()
    }

    fn endpoints(
        &self,
        config: u8,
        interface: u8,
        alt: u8,
    ) -> Result<Vec<EndpointDescriptor>, UsbError> {
        let interface = self
            .table
            .configurations
            .get(usize::from(config))
            .and_then(|c| c.find_interface(interface, alt))
            .ok_or(UsbError::NotFound)?;
        Ok(interface.endpoints.iter().map(EndpointTable::descriptor).collect())
    }

    fn attach(&mut self, interface: u8) -> Result<(), UsbError> {
        let interfaces = self.active_interfaces()?;
        self.interfaces.attach(&interfaces, interface)
    }

    fn cancel_transfer(&mut self, endpoint: u8) -> Result<(), UsbError> {
        match &self.worker {
            Some(worker) => worker.cancel(endpoint),
            // Everything else completes inside submit
            None => Ok(()),
        }
    }

    fn change_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        let interfaces = self.active_interfaces()?;
        self.interfaces.change_interface(&interfaces, interface)
    }

    fn number_of_alt_settings(&self, interface: u8) -> Result<u8, UsbError> {
        InterfaceState::number_of_alt_settings(&self.active_interfaces()?, interface)
    }

    fn set_alt_setting(&mut self, alt_setting: u8) -> Result<(), UsbError> {
        let interfaces = self.active_interfaces()?;
        self.interfaces.set_alt_setting(&interfaces, alt_setting)
    }

    fn submit_control(&mut self, mut message: Box<CtrlMessage>) -> Result<(), UsbError> {
        let Some(request) = StandardRequest::parse(&message) else {
            return match &self.worker {
                Some(worker) => worker.submit(message.into()),
                None => message.reject(UsbError::NotSupported),
            };
        };

        let status = match self.answer(request) {
            Ok(data) => {
                let len = data.len().min(usize::from(message.length));
                match message.command.fill_buffer(&data[..len]) {
                    Ok(()) => i32::try_from(len).unwrap_or(i32::MAX),
                    Err(e) => {
                        warn!("Failed to return {:?} data: {}", request, e);
                        UsbError::from(e).code()
                    }
                }
            }
            Err(e) => {
                debug!("Standard request {:?} failed: {}", request, e);
                e.code()
            }
        };

        message.complete(status);
        Ok(())
    }

    fn submit_bulk(&mut self, message: Box<BulkMessage>) -> Result<(), UsbError> {
        let endpoint = message.endpoint;
        self.forward(message, endpoint)
    }

    fn submit_interrupt(&mut self, message: Box<IntrMessage>) -> Result<(), UsbError> {
        let endpoint = message.endpoint;
        self.forward(message, endpoint)
    }

    fn submit_isochronous(&mut self, message: Box<IsoMessage>) -> Result<(), UsbError> {
        let endpoint = message.endpoint;
        self.forward(message, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferCommand;
    use crate::worker::StallHandler;
    use common::test_utils::TestMemory;
    use common::{ReplyReceiver, ReplySender, create_reply_channel};
    use protocol::RequestHandle;
    use std::sync::Arc;

    const DATA: u32 = 0x100;

    fn table() -> DeviceTable {
        DeviceTable {
            vendor_id: 0x057e,
            product_id: 0x0308,
            configurations: vec![ConfigurationTable {
                interfaces: vec![
                    InterfaceTable {
                        number: 0,
                        endpoints: vec![EndpointTable {
                            address: 0x81,
                            transfer: TransferKind::Interrupt,
                            max_packet_size: 16,
                            interval: 1,
                        }],
                        ..InterfaceTable::default()
                    },
                    InterfaceTable {
                        number: 1,
                        ..InterfaceTable::default()
                    },
                    InterfaceTable {
                        number: 1,
                        alternate_setting: 1,
                        endpoints: vec![
                            EndpointTable {
                                address: 0x82,
                                ..EndpointTable::default()
                            },
                            EndpointTable {
                                address: 0x02,
                                ..EndpointTable::default()
                            },
                        ],
                        ..InterfaceTable::default()
                    },
                ],
                ..ConfigurationTable::default()
            }],
            ..DeviceTable::default()
        }
    }

    fn setup() -> (TableDevice, Arc<TestMemory>, ReplySender, ReplyReceiver) {
        let (sender, receiver) = create_reply_channel();
        let device = TableDevice::new(DeviceId::encode(0x057e, 0x0308, 1, 1), table());
        (device, Arc::new(TestMemory::new(0x1000)), sender, receiver)
    }

    fn control(
        memory: &Arc<TestMemory>,
        sender: &ReplySender,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Box<CtrlMessage> {
        let command = TransferCommand::new(RequestHandle(9), DATA, memory.clone(), sender.clone());
        Box::new(CtrlMessage::new(command, request_type, request, value, index, length))
    }

    #[test]
    fn test_enumeration_from_table() {
        let (device, ..) = setup();

        let descriptor = device.device_descriptor().unwrap();
        assert_eq!(descriptor.vendor_id, 0x057e);
        assert_eq!(descriptor.num_configurations, 1);

        let configs = device.configurations().unwrap();
        assert_eq!(configs[0].num_interfaces, 2);
        assert_eq!(configs[0].total_length, 9 + 9 + 7 + 9 + 9 + 7 + 7);

        assert_eq!(device.interfaces(0).unwrap().len(), 3);
        assert_eq!(device.endpoints(0, 1, 1).unwrap().len(), 2);
        assert_eq!(device.endpoints(0, 1, 2), Err(UsbError::NotFound));
        assert_eq!(device.interfaces(1), Err(UsbError::NotFound));
        assert_eq!(device.vid(), Ok(0x057e));
        assert_eq!(device.has_class(0xff), Ok(true));
    }

    #[test]
    fn test_get_device_descriptor() {
        let (mut device, memory, sender, receiver) = setup();
        let message = control(&memory, &sender, 0x80, 6, 0x0100, 0, 18);

        device.submit_control(message).unwrap();

        let reply = receiver.try_recv().unwrap();
        assert_eq!(reply.status, 18);
        assert_eq!(
            memory.bytes(DATA, 18),
            device.device_descriptor().unwrap().to_bytes()
        );
    }

    #[test]
    fn test_get_descriptor_truncates_to_length() {
        let (mut device, memory, sender, receiver) = setup();
        device
            .submit_control(control(&memory, &sender, 0x80, 6, 0x0200, 0, 9))
            .unwrap();

        assert_eq!(receiver.try_recv().unwrap().status, 9);
        let header = memory.bytes(DATA, 9);
        assert_eq!(header[1], 2);
        // wTotalLength still describes the full bundle
        assert_eq!(u16::from_le_bytes([header[2], header[3]]), 57);
    }

    #[test]
    fn test_configuration_and_interface_requests() {
        let (mut device, memory, sender, receiver) = setup();

        device
            .submit_control(control(&memory, &sender, 0x00, 9, 1, 0, 0))
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap().status, 0);
        assert_eq!(device.configuration(), 1);

        device
            .submit_control(control(&memory, &sender, 0x01, 11, 1, 1, 0))
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap().status, 0);

        device
            .submit_control(control(&memory, &sender, 0x81, 10, 0, 1, 1))
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap().status, 1);
        assert_eq!(memory.bytes(DATA, 1), vec![1]);

        // Unknown configuration stalls
        device
            .submit_control(control(&memory, &sender, 0x00, 9, 7, 0, 0))
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap().status, UsbError::Pipe.code());
        assert_eq!(device.configuration(), 1);
    }

    #[test]
    fn test_unhandled_transfers_rejected_without_worker() {
        let (mut device, memory, sender, receiver) = setup();

        // Vendor request
        let vendor = control(&memory, &sender, 0xc0, 1, 0, 0, 4);
        assert_eq!(device.submit_control(vendor), Err(UsbError::NotSupported));

        device.change_interface(1).unwrap();
        device.set_alt_setting(1).unwrap();
        let command = TransferCommand::new(RequestHandle(2), DATA, memory.clone(), sender.clone());
        let bulk = Box::new(BulkMessage::new(command, 0x82, 64));
        assert_eq!(device.submit_bulk(bulk), Err(UsbError::NotSupported));

        // Endpoint not part of the active setting
        let command = TransferCommand::new(RequestHandle(3), DATA, memory.clone(), sender.clone());
        let bulk = Box::new(BulkMessage::new(command, 0x85, 64));
        assert_eq!(device.submit_bulk(bulk), Err(UsbError::NotFound));

        assert!(receiver.is_empty());
    }

    #[test]
    fn test_claimed_interface_endpoints_accepted() {
        let (device, memory, sender, receiver) = setup();
        let mut device = device.with_worker(TransferWorker::spawn(Arc::new(StallHandler)));

        device.attach(0).unwrap();
        device.attach(1).unwrap();
        device
            .submit_control(control(&memory, &sender, 0x01, 11, 1, 1, 0))
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap().status, 0);

        // 0x82 belongs to interface 1 while interface 0 stays active
        assert_eq!(device.interface_state_mut().active_interface(), 0);
        let command = TransferCommand::new(RequestHandle(4), DATA, memory.clone(), sender.clone());
        let bulk = Box::new(BulkMessage::new(command, 0x82, 64));
        assert_eq!(device.submit_bulk(bulk), Ok(()));

        let reply = receiver.recv_blocking().unwrap();
        assert_eq!(reply.request, RequestHandle(4));
        assert_eq!(reply.status, UsbError::Pipe.code());
    }

    #[test]
    fn test_has_class_without_configurations() {
        let device = TableDevice::new(DeviceId::encode(1, 2, 0, 0), DeviceTable::default());
        assert_eq!(device.has_class(3), Ok(false));
        assert_eq!(device.has_class(0), Ok(true));
    }

    #[test]
    fn test_unknown_configuration_descriptor_stalls() {
        let (mut device, memory, sender, receiver) = setup();
        device
            .submit_control(control(&memory, &sender, 0x80, 6, 0x0203, 0, 9))
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap().status, UsbError::Pipe.code());
    }

    #[test]
    fn test_interface_operations() {
        let (mut device, ..) = setup();
        assert_eq!(device.number_of_alt_settings(1), Ok(2));
        assert_eq!(device.attach(4), Err(UsbError::NotFound));

        device.interface_state_mut().hold_elsewhere(0);
        assert_eq!(device.attach(0), Err(UsbError::Busy));
        assert_eq!(device.change_interface(1), Ok(()));
        assert_eq!(device.set_alt_setting(2), Err(UsbError::NotFound));
        assert_eq!(device.cancel_transfer(0x81), Ok(()));
    }

    #[test]
    fn test_table_from_toml() {
        let table: DeviceTable = toml::from_str(
            r#"
            vendor_id = 0x1234
            product_id = 0x5678

            [[configurations]]
            [[configurations.interfaces]]
            number = 0
            [[configurations.interfaces.endpoints]]
            address = 0x81
            transfer = "interrupt"
            interval = 4
            "#,
        )
        .unwrap();

        assert_eq!(table.vendor_id, 0x1234);
        assert_eq!(table.bcd_usb, 0x0200);
        let interface = &table.configurations[0].interfaces[0];
        assert_eq!(interface.class, 0xff);
        assert_eq!(interface.endpoints[0].transfer, TransferKind::Interrupt);
        assert_eq!(interface.endpoints[0].max_packet_size, 64);
    }
}
