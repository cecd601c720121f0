//! Growable byte ring that stages variable-length video packets between the
//! USB reader and the decoder feed.
//!
//! Each packet occupies one slot:
//!
//! ```text
//! ┌───────────┬───────────┬──────────────────────┐
//! │ length    │ skip      │ payload              │
//! │ u32 BE    │ u32 BE    │ `length` raw bytes   │
//! └───────────┴───────────┴──────────────────────┘
//! ```
//!
//! The slot header always sits contiguously before the high-water mark; the
//! payload may wrap to the start of the buffer. Reading a packet yields the
//! payload minus its first `skip` bytes (the dongle's per-frame metadata the
//! decoder must not see).
//!
//! The ring is single-writer/single-reader by ownership: the sink that owns
//! it is already serialized behind the session lock.

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::error::{CarlinkError, Result};

/// Bytes of slot bookkeeping ahead of every payload.
const SLOT_HEADER_LEN: usize = 8;

/// Staging ring for decoder-bound packets.
pub struct PacketRing {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    // High-water mark: first byte past the last slot written before the
    // write position wrapped to the start. Meaningful only while wrapped.
    wrap_mark: usize,
    packet_count: usize,
}

impl PacketRing {
    /// Create a ring with `capacity` bytes of initial backing store.
    pub fn new(capacity: usize) -> PacketRing {
        PacketRing {
            buf: vec![0u8; capacity.max(SLOT_HEADER_LEN * 2)],
            read_pos: 0,
            write_pos: 0,
            wrap_mark: 0,
            packet_count: 0,
        }
    }

    /// Pick an initial capacity for a negotiated video resolution.
    pub fn optimal_capacity(width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;

        if pixels <= 1920 * 1080 {
            // 1080p and below: standard allowance
            8 * 1024 * 1024
        } else if pixels <= 2400 * 960 {
            // Wide head-unit panels
            16 * 1024 * 1024
        } else if pixels <= 3840 * 2160 {
            // 4K: high-bitrate content
            32 * 1024 * 1024
        } else {
            64 * 1024 * 1024
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packet_count == 0
    }

    /// Packets staged and not yet read.
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Current backing-store size in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Stage one packet by letting `fill` write `length` payload bytes
    /// straight into the backing store at the offset it is handed.
    ///
    /// The slot is published only after `fill` reports success for the full
    /// length; on a short or failed fill the reservation is rolled back and
    /// the error propagated, so a torn packet can never be read out.
    pub fn direct_write<F>(&mut self, length: usize, skip: usize, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8], usize) -> Result<usize>,
    {
        if skip > length {
            return Err(CarlinkError::Sink(format!(
                "invalid packet slot: skip {} exceeds length {}",
                skip, length
            )));
        }

        self.ensure_free(length);

        let slot_start = self.write_pos;
        let saved_mark = self.wrap_mark;

        BigEndian::write_u32(&mut self.buf[slot_start..slot_start + 4], length as u32);
        BigEndian::write_u32(&mut self.buf[slot_start + 4..slot_start + 8], skip as u32);

        // The payload wraps to the start when it cannot fit before the end.
        let after_header = slot_start + SLOT_HEADER_LEN;
        let payload_pos = if after_header + length > self.buf.len() {
            self.wrap_mark = after_header;
            0
        } else {
            after_header
        };

        match fill(&mut self.buf, payload_pos) {
            Ok(n) if n == length => {
                self.write_pos = payload_pos + length;
                self.packet_count += 1;
                Ok(length)
            }
            Ok(n) => {
                self.wrap_mark = saved_mark;
                Err(CarlinkError::ShortRead {
                    wanted: length,
                    got: n,
                })
            }
            Err(e) => {
                self.wrap_mark = saved_mark;
                Err(e)
            }
        }
    }

    /// Copy-in convenience over [`PacketRing::direct_write`].
    pub fn write_packet(&mut self, data: &[u8], skip: usize) -> Result<usize> {
        self.direct_write(data.len(), skip, |buf, offset| {
            buf[offset..offset + data.len()].copy_from_slice(data);
            Ok(data.len())
        })
    }

    /// Pop the oldest packet, yielding its payload minus the skip bytes.
    pub fn read_packet(&mut self) -> Option<&[u8]> {
        if self.packet_count == 0 {
            return None;
        }

        let length =
            BigEndian::read_u32(&self.buf[self.read_pos..self.read_pos + 4]) as usize;
        let skip =
            BigEndian::read_u32(&self.buf[self.read_pos + 4..self.read_pos + 8]) as usize;
        self.read_pos += SLOT_HEADER_LEN;

        // Mirror the writer's wrap decision for this slot.
        if self.read_pos + length > self.buf.len() {
            self.read_pos = 0;
        }

        let start = self.read_pos + skip;
        let end = self.read_pos + length;
        self.read_pos = end;
        self.packet_count -= 1;

        Some(&self.buf[start..end])
    }

    /// Drop all staged packets. Capacity is kept.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.wrap_mark = 0;
        self.packet_count = 0;
    }

    fn space_at_head(&self) -> usize {
        if self.write_pos < self.read_pos {
            self.read_pos - self.write_pos
        } else {
            self.buf.len() - self.write_pos
        }
    }

    fn space_at_start(&self) -> usize {
        if self.write_pos < self.read_pos {
            0
        } else {
            self.read_pos
        }
    }

    fn used(&self) -> usize {
        if self.write_pos < self.read_pos {
            (self.wrap_mark - self.read_pos) + self.write_pos
        } else {
            self.write_pos - self.read_pos
        }
    }

    /// Make room for one `length`-byte slot, compacting and growing the
    /// backing store as needed.
    fn ensure_free(&mut self, length: usize) {
        // Strict inequalities keep the write position from ever landing on
        // the read position, which is reserved for the empty state.
        let slot = length + SLOT_HEADER_LEN;
        loop {
            let header_fits = self.space_at_head() > SLOT_HEADER_LEN;
            let slot_fits = self.space_at_head() > slot || self.space_at_start() > slot;
            if header_fits && slot_fits {
                return;
            }
            self.reorganize(slot + 1);
        }
    }

    /// Compact live bytes to the front; double the capacity while the free
    /// space is under half the buffer or cannot take the pending slot.
    fn reorganize(&mut self, needed: usize) {
        let used = self.used();
        let mut new_cap = self.buf.len();
        while new_cap - used < needed.max(new_cap / 2) {
            new_cap *= 2;
        }

        if new_cap != self.buf.len() {
            debug!(
                "ring resize {} -> {} (used {}, packets {})",
                self.buf.len(),
                new_cap,
                used,
                self.packet_count
            );
        }

        let mut new_buf = vec![0u8; new_cap];
        if self.write_pos < self.read_pos {
            // Wrapped: live bytes are [read_pos, wrap_mark) then [0, write_pos).
            let end_len = self.wrap_mark - self.read_pos;
            new_buf[..end_len].copy_from_slice(&self.buf[self.read_pos..self.wrap_mark]);
            new_buf[end_len..end_len + self.write_pos].copy_from_slice(&self.buf[..self.write_pos]);
            self.write_pos += end_len;
        } else {
            let live = self.write_pos - self.read_pos;
            new_buf[..live].copy_from_slice(&self.buf[self.read_pos..self.write_pos]);
            self.write_pos = live;
        }
        self.read_pos = 0;
        self.wrap_mark = 0;
        self.buf = new_buf;
    }
}
