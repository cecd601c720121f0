//! Video sink boundary: where decoded-bound H.264 payload bytes leave the
//! reading loop.

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use crate::error::{CarlinkError, Result};
use crate::video::ring::PacketRing;

/// Synchronous fill callback handed to a sink by the reading loop. Writes
/// the payload into `buf` starting at the given offset and returns how many
/// bytes actually landed.
pub type FillFn<'a> = &'a mut dyn FnMut(&mut [u8], usize) -> Result<usize>;

/// Consumer of video payloads taking the direct-write path.
///
/// `process_data_direct` must invoke the callback synchronously on the
/// calling thread and only publish the packet once the callback has filled
/// the full length. The loop relies on the fill outcome to decide whether
/// the stream is still intact.
pub trait VideoSink: Send {
    /// Prepare for a stream at the negotiated resolution.
    fn start(&mut self, width: u32, height: u32) -> Result<()>;

    /// Tear down; staged packets are dropped.
    fn stop(&mut self);

    /// Bounce the decoder side. Must be idempotent and safe to call even if
    /// the sink was never started.
    fn reset(&mut self) -> Result<()>;

    /// Accept one payload of `length` bytes whose first `skip` bytes are
    /// dongle metadata the decoder must not see.
    fn process_data_direct(&mut self, length: usize, skip: usize, fill: FillFn<'_>) -> Result<()>;
}

/// Ring-buffer staging sink: payloads land straight in the ring's backing
/// store, then complete packets (minus the metadata skip) are forwarded to a
/// channel feeding the application's decoder.
pub struct RingVideoSink {
    ring: Option<PacketRing>,
    feed: Sender<Vec<u8>>,
    started: bool,
    frames_staged: u64,
    bytes_staged: u64,
    reset_count: u32,
}

impl RingVideoSink {
    /// Create a sink that forwards elementary-stream packets to `feed`.
    pub fn new(feed: Sender<Vec<u8>>) -> RingVideoSink {
        RingVideoSink {
            ring: None,
            feed,
            started: false,
            frames_staged: 0,
            bytes_staged: 0,
            reset_count: 0,
        }
    }

    /// Resets performed since creation.
    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    fn drain(&mut self) -> Result<()> {
        let ring = match self.ring.as_mut() {
            Some(ring) => ring,
            None => return Ok(()),
        };
        while let Some(packet) = ring.read_packet() {
            let packet = packet.to_vec();
            if self.feed.send(packet).is_err() {
                // Decoder side hung up; the session has to bounce it.
                return Err(CarlinkError::CodecReset(
                    "video consumer disconnected".into(),
                ));
            }
        }
        Ok(())
    }
}

impl VideoSink for RingVideoSink {
    fn start(&mut self, width: u32, height: u32) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let capacity = PacketRing::optimal_capacity(width, height);
        let reallocate = self.ring.as_ref().map_or(true, |r| r.capacity() < capacity);
        if reallocate {
            self.ring = Some(PacketRing::new(capacity));
            info!(
                "ring buffer initialized: {}MB for {}x{}",
                capacity / (1024 * 1024),
                width,
                height
            );
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            ring.reset();
        }
        self.started = false;
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(ring) = self.ring.as_mut() {
            ring.reset();
        }
        self.reset_count += 1;
        warn!("video sink reset #{}", self.reset_count);
        Ok(())
    }

    fn process_data_direct(&mut self, length: usize, skip: usize, fill: FillFn<'_>) -> Result<()> {
        if !self.started {
            return Err(CarlinkError::Sink("video sink not started".into()));
        }
        let ring = match self.ring.as_mut() {
            Some(ring) => ring,
            None => return Err(CarlinkError::Sink("video sink not started".into())),
        };

        ring.direct_write(length, skip, |buf, offset| fill(buf, offset))?;

        self.frames_staged += 1;
        self.bytes_staged += length as u64;
        if self.frames_staged % 300 == 0 {
            debug!(
                "video staging: {} frames, {} bytes total",
                self.frames_staged, self.bytes_staged
            );
        }

        self.drain()
    }
}
