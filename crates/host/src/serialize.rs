//! Guest-observable descriptor encodings
//!
//! Built purely from the [`Device`] enumeration accessors. Descriptors are
//! concatenated at their natural size; an enumeration error aborts the
//! encoding rather than producing partial or made-up data.

use crate::device::Device;
use crate::status::UsbError;
use protocol::{ConfigDescriptor, InterfaceDescriptor, UsbDescriptor};
use tracing::trace;

/// Device, configurations, and the interfaces selected by `predicate`
///
/// Within a configuration, interfaces are emitted last to first, each
/// followed by the endpoints of its alternate setting. Guests written
/// against the legacy layout expect this order.
pub fn collect_descriptors<D, P>(device: &D, predicate: P) -> Result<Vec<u8>, UsbError>
where
    D: Device + ?Sized,
    P: Fn(&InterfaceDescriptor) -> bool,
{
    let mut buffer = Vec::new();
    device.device_descriptor()?.append_to(&mut buffer);

    for (index, config) in device.configurations()?.iter().enumerate() {
        let index = config_index(index)?;
        config.append_to(&mut buffer);

        for interface in device.interfaces(index)?.iter().rev() {
            if !predicate(interface) {
                continue;
            }

            interface.append_to(&mut buffer);
            let endpoints = device.endpoints(
                index,
                interface.interface_number,
                interface.alternate_setting,
            )?;
            for endpoint in &endpoints {
                endpoint.append_to(&mut buffer);
            }
        }
    }

    trace!("Encoded {} descriptor bytes for {}", buffer.len(), device.id());
    Ok(buffer)
}

/// Legacy encoding covering every interface and alternate setting
pub fn descriptors_v4<D: Device + ?Sized>(device: &D) -> Result<Vec<u8>, UsbError> {
    collect_descriptors(device, |_| true)
}

/// Targeted encoding for one interface and alternate setting
pub fn descriptors_v5<D: Device + ?Sized>(
    device: &D,
    interface: u8,
    alt_setting: u8,
) -> Result<Vec<u8>, UsbError> {
    collect_descriptors(device, |descriptor| {
        descriptor.interface_number == interface && descriptor.alternate_setting == alt_setting
    })
}

/// GET_DESCRIPTOR(CONFIGURATION) payload for the configuration at `index`
///
/// The configuration descriptor is followed by its interfaces in reported
/// order, each followed by its endpoints, with `wTotalLength` covering the
/// whole bundle.
pub fn configuration_bundle<D: Device + ?Sized>(device: &D, index: u8) -> Result<Vec<u8>, UsbError> {
    let configurations = device.configurations()?;
    let config = configurations
        .get(usize::from(index))
        .ok_or(UsbError::NotFound)?;

    let mut body = Vec::new();
    for interface in device.interfaces(index)? {
        interface.append_to(&mut body);
        for endpoint in device.endpoints(
            index,
            interface.interface_number,
            interface.alternate_setting,
        )? {
            endpoint.append_to(&mut body);
        }
    }

    let total_length = u16::try_from(ConfigDescriptor::SIZE + body.len())
        .map_err(|_| UsbError::Overflow)?;
    let header = ConfigDescriptor {
        total_length,
        ..*config
    };

    let mut bundle = header.to_bytes();
    bundle.extend_from_slice(&body);
    Ok(bundle)
}

fn config_index(index: usize) -> Result<u8, UsbError> {
    u8::try_from(index).map_err(|_| UsbError::Overflow)
}
