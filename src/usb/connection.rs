//! The open dongle connection: a claimed interface, the bulk endpoint pair
//! and the blocking transport implementation the engine reads through.

use std::time::Duration;

use log::{debug, info, warn};
use rusb::{ConfigDescriptor, Device, DeviceHandle, Direction, GlobalContext, TransferType};

use crate::data::device_ids::lookup_dongle;
use crate::error::{CarlinkError, Result};
use crate::usb::device::DongleInfo;
use crate::usb::transfer::UsbTransport;

pub struct CarlinkHandle {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    info: DongleInfo,
}

impl CarlinkHandle {
    /// Open `device`, claim the interface carrying its bulk pair and record
    /// both endpoint addresses.
    pub(crate) fn open(
        device: &Device<GlobalContext>,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<CarlinkHandle> {
        let handle = device.open()?;

        // Not supported on every platform; the claim below is what decides.
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("kernel driver auto-detach unavailable: {}", e);
        }

        let config = device.active_config_descriptor()?;
        let (interface, bulk_in, bulk_out) =
            find_bulk_pair(&config).ok_or(CarlinkError::Precondition(
                "device exposes no bulk in/out endpoint pair",
            ))?;

        handle.claim_interface(interface)?;
        info!(
            "claimed interface {} (bulk in 0x{:02x}, bulk out 0x{:02x})",
            interface, bulk_in, bulk_out
        );

        Ok(CarlinkHandle {
            handle,
            interface,
            info: DongleInfo {
                vendor_id,
                product_id,
                model: lookup_dongle(vendor_id, product_id),
                bulk_in,
                bulk_out,
            },
        })
    }

    pub fn info(&self) -> DongleInfo {
        self.info.clone()
    }
}

/// First interface advertising both a bulk-in and a bulk-out endpoint.
fn find_bulk_pair(config: &ConfigDescriptor) -> Option<(u8, u8, u8)> {
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            let mut bulk_in = None;
            let mut bulk_out = None;
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In if bulk_in.is_none() => bulk_in = Some(endpoint.address()),
                    Direction::Out if bulk_out.is_none() => bulk_out = Some(endpoint.address()),
                    _ => {}
                }
            }
            if let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) {
                return Some((interface.number(), bulk_in, bulk_out));
            }
        }
    }
    None
}

impl UsbTransport for CarlinkHandle {
    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, rusb::Error> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, rusb::Error> {
        self.handle.write_bulk(endpoint, data, timeout)
    }
}

impl Drop for CarlinkHandle {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            warn!("failed to release interface {}: {}", self.interface, e);
        }
    }
}
