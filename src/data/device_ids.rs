use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref DONGLE_MAP: HashMap<(u16, u16), &'static str> = {
        let mut m = HashMap::new();

        // Carlinkit adapters enumerate under the Magic Communication VID
        // with one of two PIDs depending on hardware generation.
        m.insert((0x1314, 0x1520), "Carlinkit CCPA (wireless CarPlay / Android Auto)");
        m.insert((0x1314, 0x1521), "Carlinkit U2W (wired CarPlay / Android Auto)");

        // Older autokit hardware re-badges a Pioneer ID.
        m.insert((0x08E4, 0x01C0), "Carlinkit legacy autokit");

        m
    };

    static ref VENDOR_MAP: HashMap<u16, &'static str> = {
        let mut m = HashMap::new();

        m.insert(0x1314, "Magic Communication Technology");
        m.insert(0x08E4, "Pioneer Corp.");

        m
    };
}

/// Model name for a supported adapter, `None` for anything else.
pub fn lookup_dongle(vendor_id: u16, product_id: u16) -> Option<&'static str> {
    DONGLE_MAP.get(&(vendor_id, product_id)).copied()
}

/// VID and PID must match as a pair; a known vendor with an unknown product
/// is not enough.
pub fn is_supported_dongle(vendor_id: u16, product_id: u16) -> bool {
    DONGLE_MAP.contains_key(&(vendor_id, product_id))
}

pub fn lookup_vendor(vendor_id: u16) -> Option<&'static str> {
    VENDOR_MAP.get(&vendor_id).copied()
}

/// Every ID pair this crate will open, sorted for stable display.
pub fn supported_dongles() -> Vec<(u16, u16, &'static str)> {
    let mut list: Vec<_> = DONGLE_MAP
        .iter()
        .map(|(&(vid, pid), &name)| (vid, pid, name))
        .collect();
    list.sort();
    list
}
