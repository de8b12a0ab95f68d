//! nusb-backed USB transport: discovery, interface claiming, transfers.

use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use nusb::transfer::{ControlIn, ControlOut, ControlType, Direction, EndpointType, Recipient, RequestBuffer};

use crate::error::{Error, Result, UsbError};

/// USB class triple for PTP/MTP: still image capture, subclass 1, protocol 1.
const MTP_CLASS: (u8, u8, u8) = (0x06, 0x01, 0x01);

/// Vendor-specific interfaces that are MTP in all but class code. Android
/// devices in "file transfer" mode usually present the proper class triple,
/// but several vendors ship 0xFF interfaces named "MTP".
const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Devices known to speak MTP behind a non-compliant descriptor. Checked in
/// addition to the class filter and any allow-list entries supplied through
/// the builder.
const KNOWN_DEVICES: &[(u16, u16)] = &[
    (0x04e8, 0x6860), // Samsung Galaxy (MTP)
    (0x04e8, 0x685c), // Samsung Galaxy (MTP + ADB)
    (0x18d1, 0x4ee1), // Google Pixel (MTP)
    (0x18d1, 0x4ee2), // Google Pixel (MTP + ADB)
    (0x2717, 0xff40), // Xiaomi (MTP)
];

/// An MTP-capable device seen on the bus, before any session is opened.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DiscoveredDevice {
    /// USB bus number; stable for a given port.
    pub bus: u8,
    /// Device address on the bus; changes across replugs.
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

fn interface_is_mtp(class: u8, subclass: u8, protocol: u8, name: Option<&str>) -> bool {
    if (class, subclass, protocol) == MTP_CLASS {
        return true;
    }
    class == VENDOR_SPECIFIC_CLASS && name.is_some_and(|n| n.eq_ignore_ascii_case("mtp"))
}

/// Enumerates MTP-capable devices without opening them.
///
/// Filters on the PTP interface class, the interface-name probe for
/// vendor-specific descriptors, and the vendor/product allow-list. Never
/// opens a device, so it is cheap to call from UI code.
pub fn discover_devices(extra_allowed: &[(u16, u16)]) -> Result<Vec<DiscoveredDevice>> {
    let mut found = Vec::new();
    let devices = nusb::list_devices().map_err(|e| Error::Usb(UsbError::Setup(e)))?;
    for info in devices {
        let ids = (info.vendor_id(), info.product_id());
        let by_class = info
            .interfaces()
            .any(|i| interface_is_mtp(i.class(), i.subclass(), i.protocol(), i.interface_string()));
        let by_list = KNOWN_DEVICES.contains(&ids) || extra_allowed.contains(&ids);
        if !by_class && !by_list {
            continue;
        }
        debug!(
            "MTP candidate {:04x}:{:04x} at bus {} addr {} (class match: {by_class}, allow-list: {by_list})",
            ids.0,
            ids.1,
            info.bus_number(),
            info.device_address(),
        );
        found.push(DiscoveredDevice {
            bus: info.bus_number(),
            address: info.device_address(),
            vendor_id: ids.0,
            product_id: ids.1,
            manufacturer: info.manufacturer_string().map(str::to_owned),
            product: info.product_string().map(str::to_owned),
            serial_number: info.serial_number().map(str::to_owned),
        });
    }
    Ok(found)
}

/// The claimed MTP interface of one device: bulk-IN, bulk-OUT, and
/// interrupt-IN endpoints plus class control requests.
pub struct UsbTransport {
    interface: nusb::Interface,
    bulk_in_ep: u8,
    bulk_out_ep: u8,
    interrupt_ep: u8,
    max_packet_in: usize,
    max_packet_out: usize,
    max_packet_interrupt: usize,
}

struct MtpEndpoints {
    interface_number: u8,
    bulk_in: (u8, usize),
    bulk_out: (u8, usize),
    interrupt: (u8, usize),
}

fn find_mtp_endpoints(device: &nusb::Device) -> Result<MtpEndpoints> {
    let config = device
        .active_configuration()
        .map_err(|e| Error::Usb(UsbError::Setup(std::io::Error::other(e))))?;

    for group in config.interfaces() {
        for alt in group.alt_settings() {
            let looks_mtp = interface_is_mtp(alt.class(), alt.subclass(), alt.protocol(), None)
                || alt.class() == VENDOR_SPECIFIC_CLASS;
            if !looks_mtp {
                continue;
            }
            let mut bulk_in = None;
            let mut bulk_out = None;
            let mut interrupt = None;
            for ep in alt.endpoints() {
                match (ep.transfer_type(), ep.direction()) {
                    (EndpointType::Bulk, Direction::In) => bulk_in = Some((ep.address(), ep.max_packet_size())),
                    (EndpointType::Bulk, Direction::Out) => bulk_out = Some((ep.address(), ep.max_packet_size())),
                    (EndpointType::Interrupt, Direction::In) => {
                        interrupt = Some((ep.address(), ep.max_packet_size()))
                    }
                    _ => {}
                }
            }
            if let (Some(bulk_in), Some(bulk_out), Some(interrupt)) = (bulk_in, bulk_out, interrupt) {
                return Ok(MtpEndpoints {
                    interface_number: group.interface_number(),
                    bulk_in,
                    bulk_out,
                    interrupt,
                });
            }
        }
    }
    Err(Error::NoDevice)
}

impl UsbTransport {
    /// Opens `device` and claims its MTP interface.
    pub fn open(device: &DiscoveredDevice) -> Result<UsbTransport> {
        let info = nusb::list_devices()
            .map_err(|e| Error::Usb(UsbError::Setup(e)))?
            .find(|i| i.bus_number() == device.bus && i.device_address() == device.address)
            .ok_or(Error::NoDevice)?;

        let handle = info.open().map_err(|e| Error::Usb(UsbError::Setup(e)))?;
        let endpoints = find_mtp_endpoints(&handle)?;

        #[cfg(target_os = "linux")]
        let interface = handle
            .detach_and_claim_interface(endpoints.interface_number)
            .map_err(|e| Error::Usb(UsbError::Setup(e)))?;
        #[cfg(not(target_os = "linux"))]
        let interface = handle
            .claim_interface(endpoints.interface_number)
            .map_err(|e| Error::Usb(UsbError::Setup(e)))?;

        debug!(
            "claimed MTP interface {} (bulk-in {:#04x}/{}, bulk-out {:#04x}/{}, interrupt {:#04x}/{})",
            endpoints.interface_number,
            endpoints.bulk_in.0,
            endpoints.bulk_in.1,
            endpoints.bulk_out.0,
            endpoints.bulk_out.1,
            endpoints.interrupt.0,
            endpoints.interrupt.1,
        );

        Ok(UsbTransport {
            interface,
            bulk_in_ep: endpoints.bulk_in.0,
            bulk_out_ep: endpoints.bulk_out.0,
            interrupt_ep: endpoints.interrupt.0,
            max_packet_in: endpoints.bulk_in.1,
            max_packet_out: endpoints.bulk_out.1,
            max_packet_interrupt: endpoints.interrupt.1,
        })
    }
}

fn map_transfer_error(e: nusb::transfer::TransferError) -> Error {
    match e {
        nusb::transfer::TransferError::Disconnected => Error::Disconnected,
        other => Error::Usb(UsbError::Transfer(other)),
    }
}

impl super::MtpTransport for UsbTransport {
    fn max_packet_in(&self) -> usize {
        self.max_packet_in
    }

    fn max_packet_out(&self) -> usize {
        self.max_packet_out
    }

    async fn bulk_out(&self, data: &[u8], timeout: Duration) -> Result<()> {
        let transfer = self.interface.bulk_out(self.bulk_out_ep, data.to_vec());
        match tokio::time::timeout(timeout, transfer).await {
            Ok(completion) => completion.into_result().map(drop).map_err(map_transfer_error),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn bulk_in(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        let transfer = self.interface.bulk_in(self.bulk_in_ep, RequestBuffer::new(max_len));
        match tokio::time::timeout(timeout, transfer).await {
            Ok(completion) => completion.into_result().map(Bytes::from).map_err(map_transfer_error),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn interrupt_in(&self, timeout: Duration) -> Result<Bytes> {
        let len = self.max_packet_interrupt.max(64);
        let transfer = self.interface.interrupt_in(self.interrupt_ep, RequestBuffer::new(len));
        match tokio::time::timeout(timeout, transfer).await {
            Ok(completion) => completion.into_result().map(Bytes::from).map_err(map_transfer_error),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn control_out(&self, request: u8, value: u16, data: &[u8], timeout: Duration) -> Result<()> {
        let transfer = self.interface.control_out(ControlOut {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index: 0,
            data,
        });
        match tokio::time::timeout(timeout, transfer).await {
            Ok(completion) => completion.into_result().map(drop).map_err(map_transfer_error),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn control_in(&self, request: u8, value: u16, len: usize, timeout: Duration) -> Result<Bytes> {
        let transfer = self.interface.control_in(ControlIn {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index: 0,
            length: len as u16,
        });
        match tokio::time::timeout(timeout, transfer).await {
            Ok(completion) => completion.into_result().map(Bytes::from).map_err(map_transfer_error),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn clear_halt_in(&self) -> Result<()> {
        self.interface
            .clear_halt(self.bulk_in_ep)
            .map_err(|e| Error::Usb(UsbError::Setup(e)))
    }

    async fn clear_halt_out(&self) -> Result<()> {
        self.interface
            .clear_halt(self.bulk_out_ep)
            .map_err(|e| {
                warn!("clearing bulk-out halt failed: {e}");
                Error::Usb(UsbError::Setup(e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_class_filter() {
        assert!(interface_is_mtp(0x06, 0x01, 0x01, None));
        assert!(interface_is_mtp(0xFF, 0xFF, 0x00, Some("MTP")));
        assert!(interface_is_mtp(0xFF, 0x42, 0x01, Some("mtp")));
        assert!(!interface_is_mtp(0xFF, 0xFF, 0x00, Some("ADB Interface")));
        assert!(!interface_is_mtp(0xFF, 0xFF, 0x00, None));
        assert!(!interface_is_mtp(0x08, 0x06, 0x50, None)); // mass storage
    }

    #[test]
    fn test_known_device_allow_list() {
        assert!(KNOWN_DEVICES.contains(&(0x18d1, 0x4ee1)));
        assert!(!KNOWN_DEVICES.contains(&(0xFFFF, 0xFFFF)));
    }
}
