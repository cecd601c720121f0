pub mod header;
pub mod message_types;

pub use header::{MessageHeader, HEADER_SIZE};
pub use message_types::{
    describe_message_type, is_video_data, recognize_message_type, MessageType, VIDEO_HEADER_SKIP,
};
