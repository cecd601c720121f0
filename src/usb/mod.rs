pub mod connection;
pub mod device;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the types most callers want without the submodule path.
pub use self::connection::CarlinkHandle;
pub use self::device::{CarlinkDevice, DongleInfo};
pub use self::transfer::{read_exact, UsbTransport, MAX_CHUNK_LEN, MAX_ZERO_READS};
