pub mod device_ids;

pub use self::device_ids::{is_supported_dongle, lookup_dongle, lookup_vendor, supported_dongles};
