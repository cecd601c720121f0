pub mod ring;
pub mod sink;

pub use ring::PacketRing;
pub use sink::{FillFn, RingVideoSink, VideoSink};
