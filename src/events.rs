//! Events delivered to the consumer of a bridge session.
//!
//! A session pushes every notification through one unbounded channel, so the
//! consumer observes them in exactly the order the loop raised them.

use serde::Serialize;

use crate::error::ErrorKind;

/// One consumer-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CarlinkEvent {
    /// Session lifecycle logging forwarded to the consumer.
    Log { message: String },

    /// One decoded protocol message. `data` is absent for header-only
    /// messages; the one-time video "streaming started" marker carries an
    /// empty payload instead.
    Message {
        msg_type: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Vec<u8>>,
    },

    /// Terminal notification of a reading loop. Emitted exactly once per
    /// loop lifetime, whatever the exit cause; a clean stop carries
    /// `ErrorKind::Stopped`.
    LoopError { kind: ErrorKind, message: String },

    /// Emergency cleanup ran to completion.
    EmergencyCleanup,
}

impl CarlinkEvent {
    /// Header-only message notification.
    pub fn message(msg_type: u32) -> CarlinkEvent {
        CarlinkEvent::Message {
            msg_type,
            data: None,
        }
    }

    /// Message notification carrying a body.
    pub fn message_with_data(msg_type: u32, data: Vec<u8>) -> CarlinkEvent {
        CarlinkEvent::Message {
            msg_type,
            data: Some(data),
        }
    }
}
