//! Engine for Carlinkit-style CarPlay / Android Auto USB dongles: the
//! framed message protocol spoken over bulk endpoints, a blocking reading
//! loop with a zero-copy video staging pathway, and reset-storm recovery.
//!
//! [`CarlinkBridge`] is the entry point. Commands go in from any thread;
//! every notification comes back on the event receiver it hands out.

pub mod bridge;
pub mod data;
pub mod error;
pub mod events;
pub mod protocol;
mod read_loop;
pub mod recovery;
pub mod usb;
pub mod video;

pub use bridge::{CarlinkBridge, SharedTransport};
pub use error::{CarlinkError, ErrorKind, Result};
pub use events::CarlinkEvent;
pub use read_loop::MAX_BODY_LEN;
pub use usb::device::{CarlinkDevice, DongleInfo};
pub use usb::transfer::UsbTransport;
pub use video::{RingVideoSink, VideoSink};
