//! Known message types spoken by Carlinkit-style dongles.

/// Number of dongle-prepended metadata bytes at the front of every video
/// payload (resolution and flags), consumed by the sink, not part of the
/// H.264 elementary stream.
pub const VIDEO_HEADER_SKIP: usize = 20;

// Define all known message types used by the dongle protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Open = 0x01,
    Plugged = 0x02,
    Phase = 0x03,
    Unplugged = 0x04,
    Touch = 0x05,
    VideoData = 0x06,
    AudioData = 0x07,
    Command = 0x08,
    LogoType = 0x09,
    BluetoothAddress = 0x0a,
    BluetoothPin = 0x0c,
    BluetoothDeviceName = 0x0d,
    WifiDeviceName = 0x0e,
    BluetoothPairedList = 0x12,
    ManufacturerInfo = 0x14,
    MultiTouch = 0x17,
    HiCarLink = 0x18,
    BoxSettings = 0x19,
    MediaData = 0x2a,
    SendFile = 0x99,
    HeartBeat = 0xaa,
    SoftwareVersion = 0xcc,
    // Additional types can be added as discovered
}

/// Recognize a message type from its wire discriminator
pub fn recognize_message_type(msg_type: u32) -> Option<MessageType> {
    match msg_type {
        0x01 => Some(MessageType::Open),
        0x02 => Some(MessageType::Plugged),
        0x03 => Some(MessageType::Phase),
        0x04 => Some(MessageType::Unplugged),
        0x05 => Some(MessageType::Touch),
        0x06 => Some(MessageType::VideoData),
        0x07 => Some(MessageType::AudioData),
        0x08 => Some(MessageType::Command),
        0x09 => Some(MessageType::LogoType),
        0x0a => Some(MessageType::BluetoothAddress),
        0x0c => Some(MessageType::BluetoothPin),
        0x0d => Some(MessageType::BluetoothDeviceName),
        0x0e => Some(MessageType::WifiDeviceName),
        0x12 => Some(MessageType::BluetoothPairedList),
        0x14 => Some(MessageType::ManufacturerInfo),
        0x17 => Some(MessageType::MultiTouch),
        0x18 => Some(MessageType::HiCarLink),
        0x19 => Some(MessageType::BoxSettings),
        0x2a => Some(MessageType::MediaData),
        0x99 => Some(MessageType::SendFile),
        0xaa => Some(MessageType::HeartBeat),
        0xcc => Some(MessageType::SoftwareVersion),
        _ => None,
    }
}

/// True for message types whose body is routed through the video fast path.
pub fn is_video_data(msg_type: u32) -> bool {
    msg_type == MessageType::VideoData as u32
}

/// Human-readable name for logs and CLI output.
pub fn describe_message_type(msg_type: u32) -> String {
    match recognize_message_type(msg_type) {
        Some(t) => format!("{:?}", t),
        None => format!("Unknown(0x{:02x})", msg_type),
    }
}
