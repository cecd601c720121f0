//! Dongle discovery over the global USB context.

use log::{debug, info};
use rusb::{Device, GlobalContext};
use serde::Serialize;

use crate::data::device_ids::{is_supported_dongle, lookup_dongle};
use crate::error::Result;
use crate::usb::connection::CarlinkHandle;

/// A supported adapter found during enumeration, not yet opened.
pub struct CarlinkDevice {
    device: Device<GlobalContext>,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl CarlinkDevice {
    /// Scan the bus for adapters whose VID/PID pair is in the supported
    /// table. Devices with unreadable descriptors are skipped, not fatal.
    pub fn find_all() -> Result<Vec<CarlinkDevice>> {
        let mut found = Vec::new();
        for device in rusb::devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!("skipping device with unreadable descriptor: {}", e);
                    continue;
                }
            };
            let vid = descriptor.vendor_id();
            let pid = descriptor.product_id();
            debug!("checking USB device VID:{:04x} PID:{:04x}", vid, pid);

            if is_supported_dongle(vid, pid) {
                info!(
                    "found {} (VID:{:04x} PID:{:04x})",
                    lookup_dongle(vid, pid).unwrap_or("supported dongle"),
                    vid,
                    pid
                );
                found.push(CarlinkDevice {
                    device,
                    vendor_id: vid,
                    product_id: pid,
                });
            }
        }
        Ok(found)
    }

    pub fn model(&self) -> Option<&'static str> {
        lookup_dongle(self.vendor_id, self.product_id)
    }

    pub fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    pub fn address(&self) -> u8 {
        self.device.address()
    }

    /// Open the device, claim its bulk interface and locate the endpoint
    /// pair. The returned handle holds the claim until dropped.
    pub fn open(&self) -> Result<CarlinkHandle> {
        CarlinkHandle::open(&self.device, self.vendor_id, self.product_id)
    }
}

/// Summary of an opened dongle, including the endpoint addresses the
/// reading loop and outbound commands should use.
#[derive(Debug, Clone, Serialize)]
pub struct DongleInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub model: Option<&'static str>,
    pub bulk_in: u8,
    pub bulk_out: u8,
}

impl DongleInfo {
    pub fn describe(&self) -> String {
        format!(
            "{} (VID:{:04x} PID:{:04x}, bulk in 0x{:02x}, bulk out 0x{:02x})",
            self.model.unwrap_or("unknown dongle"),
            self.vendor_id,
            self.product_id,
            self.bulk_in,
            self.bulk_out
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_names_ids_and_endpoints() {
        let info = DongleInfo {
            vendor_id: 0x1314,
            product_id: 0x1520,
            model: Some("Carlinkit CCPA (wireless CarPlay / Android Auto)"),
            bulk_in: 0x81,
            bulk_out: 0x01,
        };
        let text = info.describe();
        assert!(text.contains("VID:1314"));
        assert!(text.contains("PID:1520"));
        assert!(text.contains("0x81"));
        assert!(text.contains("Carlinkit"));
    }
}
