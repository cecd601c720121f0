//! Wire codec for the dongle's message header.
//!
//! Every message starts with a fixed 8-byte header:
//!
//! ```text
//! ┌───────────┬───────────┐
//! │ type      │ length    │
//! │ 4 bytes   │ 4 bytes   │
//! │ u32 LE    │ u32 LE    │
//! └───────────┴───────────┘
//! ```
//!
//! The byte order is dictated by the dongle firmware and is not negotiable.
//! `length` counts the body bytes that follow; zero means the header is the
//! whole message.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CarlinkError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message kind discriminator (see `message_types`).
    pub msg_type: u32,
    /// Body length in bytes following the header.
    pub length: u32,
}

impl MessageHeader {
    /// Create a new header.
    pub fn new(msg_type: u32, length: u32) -> Self {
        Self { msg_type, length }
    }

    /// Encode the header to its wire bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.msg_type);
        LittleEndian::write_u32(&mut buf[4..8], self.length);
    }

    /// Decode a header from wire bytes.
    ///
    /// Fails only when `buf` holds fewer than [`HEADER_SIZE`] bytes. Field
    /// values are not range-checked here; the reading loop rejects
    /// implausible lengths before acting on them.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CarlinkError::MalformedHeader {
                actual: buf.len(),
                expected: HEADER_SIZE,
            });
        }
        Ok(Self {
            msg_type: LittleEndian::read_u32(&buf[0..4]),
            length: LittleEndian::read_u32(&buf[4..8]),
        })
    }

    /// True when the message carries no body.
    pub fn is_header_only(&self) -> bool {
        self.length == 0
    }

    /// True when the body is an H.264 video payload taking the direct path.
    pub fn is_video(&self) -> bool {
        super::message_types::is_video_data(self.msg_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message_types::MessageType;

    #[test]
    fn test_round_trip() {
        for (msg_type, length) in [
            (0u32, 0u32),
            (MessageType::VideoData as u32, 921_600),
            (MessageType::HeartBeat as u32, 0),
            (u32::MAX, u32::MAX),
            (0x2a, 1),
        ] {
            let header = MessageHeader::new(msg_type, length);
            let decoded = MessageHeader::decode(&header.encode())
                .unwrap_or_else(|e| panic!("decode failed for {:?}: {}", header, e));
            assert_eq!(decoded, header);
        }
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let header = MessageHeader::new(0x0102_0304, 0x0a0b_0c0d);
        let bytes = header.encode();
        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01, 0x0d, 0x0c, 0x0b, 0x0a]);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        for len in 0..HEADER_SIZE {
            let err = MessageHeader::decode(&vec![0u8; len]);
            assert!(matches!(
                err,
                Err(CarlinkError::MalformedHeader { actual, expected })
                    if actual == len && expected == HEADER_SIZE
            ));
        }
    }

    #[test]
    fn test_decode_tolerates_trailing_bytes() {
        let mut buf = vec![0u8; HEADER_SIZE + 16];
        MessageHeader::new(0xaa, 3).encode_into(&mut buf);
        let header = MessageHeader::decode(&buf).unwrap();
        assert_eq!(header.msg_type, 0xaa);
        assert_eq!(header.length, 3);
    }

    #[test]
    fn test_classification_helpers() {
        assert!(MessageHeader::new(0xaa, 0).is_header_only());
        assert!(!MessageHeader::new(0xaa, 1).is_header_only());
        assert!(MessageHeader::new(MessageType::VideoData as u32, 64).is_video());
        assert!(!MessageHeader::new(MessageType::AudioData as u32, 64).is_video());
    }
}
