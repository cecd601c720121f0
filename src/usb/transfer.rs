//! Blocking bulk-transfer plumbing: the transport trait the engine consumes
//! and the chunked reader that assembles whole wire messages from bounded
//! USB transactions.

use std::time::Duration;

use crate::error::{CarlinkError, Result};

/// Largest single bulk transaction the chunked reader will issue.
pub const MAX_CHUNK_LEN: usize = 0x4000; // 16K ceiling per transfer

/// Consecutive zero-byte transactions tolerated before the read is
/// declared dead. Real transports time out instead of streaming empties;
/// this caps a transport that never does either.
pub const MAX_ZERO_READS: u32 = 8;

/// One blocking USB bulk pipe pair.
///
/// Implemented by the rusb-backed connection and by scripted doubles in
/// tests. A short count from `read_bulk` is a valid outcome; the chunked
/// reader keeps issuing transactions until the requested total is reached.
pub trait UsbTransport {
    /// One bounded bulk-in transaction into `buf`, returning the number of
    /// bytes the device actually delivered.
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration)
        -> std::result::Result<usize, rusb::Error>;

    /// One bounded bulk-out transaction from `data`, returning the number of
    /// bytes accepted by the device.
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration)
        -> std::result::Result<usize, rusb::Error>;
}

/// Read exactly `total_len` bytes from `endpoint` into
/// `dest[offset .. offset + total_len]`, splitting the work into
/// transactions of at most [`MAX_CHUNK_LEN`] bytes.
///
/// The destination region is validated before the first transaction; a
/// region that does not fit inside `dest` fails with
/// [`CarlinkError::BufferBounds`] without touching the transport. A failed
/// transaction aborts immediately; whatever partial progress was made is
/// not a usable message and callers must treat it as a broken stream. A
/// transport that keeps delivering zero-byte transactions is declared
/// broken after [`MAX_ZERO_READS`] consecutive empties rather than spun on
/// forever.
///
/// The return value equals `total_len` except on the last-resort clamp path,
/// where the accumulated progress is returned short rather than ever
/// indexing past `dest`.
pub fn read_exact<T: UsbTransport + ?Sized>(
    transport: &T,
    endpoint: u8,
    dest: &mut [u8],
    offset: usize,
    total_len: usize,
    timeout: Duration,
) -> Result<usize> {
    let capacity = dest.len();

    // Reject the whole request before any bytes move.
    let end = offset.checked_add(total_len);
    if end.map_or(true, |end| end > capacity) {
        return Err(CarlinkError::BufferBounds {
            offset,
            length: total_len,
            capacity,
        });
    }

    let mut progress = 0usize;
    let mut zero_reads = 0u32;
    while progress < total_len {
        let start = offset + progress;
        let mut chunk = MAX_CHUNK_LEN.min(total_len - progress);

        // Last-resort clamp: only reachable if the check above ever
        // regresses, and then it must not index past the buffer.
        if start + chunk > capacity {
            if start >= capacity {
                return Err(CarlinkError::BufferBounds {
                    offset,
                    length: total_len,
                    capacity,
                });
            }
            chunk = capacity - start;
            let n = transport.read_bulk(endpoint, &mut dest[start..start + chunk], timeout)?;
            return Ok(progress + n);
        }

        let n = transport.read_bulk(endpoint, &mut dest[start..start + chunk], timeout)?;
        if n == 0 {
            zero_reads += 1;
            if zero_reads >= MAX_ZERO_READS {
                return Err(CarlinkError::ShortRead {
                    wanted: total_len,
                    got: progress,
                });
            }
        } else {
            zero_reads = 0;
        }
        progress += n;
    }

    Ok(total_len)
}
