//! Error types for the carlink bridge.

use serde::Serialize;
use thiserror::Error;

/// Main error type for all bridge operations.
///
/// Every failure carries its classification in the variant itself, so callers
/// (the reset tracker in particular) dispatch on [`ErrorKind`] tags instead of
/// matching message text.
#[derive(Debug, Error)]
pub enum CarlinkError {
    /// A bulk transfer failed. Timeouts and hard transport errors both land
    /// here; the reading loop treats either as fatal for the session.
    #[error("usb transfer failed: {0}")]
    Transport(#[from] rusb::Error),

    /// Destination region would not fit in the buffer. Checked before any
    /// transfer is issued; never results in an out-of-bounds write.
    #[error("buffer bounds exceeded: offset {offset} + length {length} > capacity {capacity}")]
    BufferBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },

    /// Fewer bytes than a message header needs.
    #[error("malformed header: got {actual} bytes, need {expected}")]
    MalformedHeader { actual: usize, expected: usize },

    /// Header declared a body larger than the sanity ceiling. A length this
    /// far out means the byte stream is desynchronized, not a big message.
    #[error("payload length {length} exceeds limit {limit}")]
    PayloadTooLarge { length: u32, limit: usize },

    /// A read that had to complete in full came back short.
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    /// The video sink's decoder side is gone or wedged and needs a reset.
    /// The only kind the crash/reset tracker counts.
    #[error("codec reset required: {0}")]
    CodecReset(String),

    /// Any other video sink failure.
    #[error("video sink error: {0}")]
    Sink(String),

    /// A reading loop is already active for this session.
    #[error("reading loop already running")]
    AlreadyRunning,

    /// Command issued without the state it needs (open device, installed
    /// sink, ...). Nothing was mutated.
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// The loop exited because stop was requested. Carried by the terminal
    /// loop notification so a clean stop stays distinguishable.
    #[error("reading loop stopped")]
    Stopped,

    /// OS-level failure outside the USB stack (worker spawn and friends).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CarlinkError {
    /// Classification tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CarlinkError::Transport(_) => ErrorKind::Transport,
            CarlinkError::BufferBounds { .. } => ErrorKind::BufferBounds,
            CarlinkError::MalformedHeader { .. } => ErrorKind::Malformed,
            CarlinkError::PayloadTooLarge { .. } => ErrorKind::Malformed,
            CarlinkError::ShortRead { .. } => ErrorKind::ShortRead,
            CarlinkError::CodecReset(_) => ErrorKind::CodecReset,
            CarlinkError::Sink(_) => ErrorKind::Sink,
            CarlinkError::AlreadyRunning => ErrorKind::AlreadyRunning,
            CarlinkError::Precondition(_) => ErrorKind::Precondition,
            CarlinkError::Stopped => ErrorKind::Stopped,
            CarlinkError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Copyable classification of a [`CarlinkError`], suitable for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    BufferBounds,
    Malformed,
    ShortRead,
    CodecReset,
    Sink,
    AlreadyRunning,
    Precondition,
    Stopped,
    Io,
}

/// Result type alias using CarlinkError.
pub type Result<T> = std::result::Result<T, CarlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            CarlinkError::Transport(rusb::Error::Timeout).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            CarlinkError::CodecReset("decoder gone".into()).kind(),
            ErrorKind::CodecReset
        );
        assert_eq!(
            CarlinkError::PayloadTooLarge {
                length: u32::MAX,
                limit: 16 << 20,
            }
            .kind(),
            ErrorKind::Malformed
        );
        assert_eq!(CarlinkError::Stopped.kind(), ErrorKind::Stopped);
    }

    #[test]
    fn test_display_carries_detail() {
        let err = CarlinkError::BufferBounds {
            offset: 8,
            length: 100,
            capacity: 64,
        };
        let text = err.to_string();
        assert!(text.contains("offset 8"));
        assert!(text.contains("capacity 64"));
    }
}
