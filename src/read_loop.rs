//! The blocking reading loop: one worker draining the dongle's bulk-in
//! endpoint, decoding wire headers and dispatching message bodies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::debug;

use crate::bridge::Session;
use crate::error::{CarlinkError, Result};
use crate::events::CarlinkEvent;
use crate::protocol::{describe_message_type, MessageHeader, HEADER_SIZE, VIDEO_HEADER_SKIP};
use crate::usb::transfer::{read_exact, UsbTransport};

/// Sanity ceiling for one message body. The dongle never sends anything
/// close to this; a larger claimed length is a corrupt header.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Run the reading loop until its token is cleared or the stream breaks.
///
/// `token` is this loop's own cancellation flag, issued by
/// [`Session::arm`]; the loop consults nothing else, so a later loop's
/// start can never keep this one alive. Every exit path funnels through
/// [`Session::report_loop_exit`], so the consumer sees exactly one terminal
/// notification per loop lifetime, and the token is already cleared when
/// that notification arrives.
pub(crate) fn run(
    session: &Session,
    token: &AtomicBool,
    transport: &dyn UsbTransport,
    endpoint: u8,
    timeout: Duration,
) {
    session.log(format!(
        "reading loop started (endpoint 0x{:02x}, timeout {}ms)",
        endpoint,
        timeout.as_millis()
    ));

    let exit = drive(session, token, transport, endpoint, timeout);

    token.store(false, Ordering::SeqCst);
    session.report_loop_exit(&exit);
}

/// The loop proper. Never returns normally; a cooperative stop surfaces as
/// [`CarlinkError::Stopped`] like any other exit reason.
fn drive(
    session: &Session,
    token: &AtomicBool,
    transport: &dyn UsbTransport,
    endpoint: u8,
    timeout: Duration,
) -> CarlinkError {
    let mut streaming_started = false;

    loop {
        if !token.load(Ordering::SeqCst) {
            return CarlinkError::Stopped;
        }

        // A fresh header every iteration; a stale length from the previous
        // message must never leak into this one.
        let header = match read_header(transport, endpoint, timeout) {
            Ok(header) => header,
            Err(e) => return e,
        };

        let dispatched = if header.is_header_only() {
            debug!("{} (header only)", describe_message_type(header.msg_type));
            session.send(CarlinkEvent::message(header.msg_type));
            Ok(())
        } else if header.is_video() {
            read_video_body(
                session,
                transport,
                endpoint,
                &header,
                timeout,
                &mut streaming_started,
            )
        } else {
            read_message_body(session, transport, endpoint, &header, timeout)
        };

        if let Err(e) = dispatched {
            return e;
        }
    }
}

fn read_header(
    transport: &dyn UsbTransport,
    endpoint: u8,
    timeout: Duration,
) -> Result<MessageHeader> {
    let mut raw = [0u8; HEADER_SIZE];
    let got = read_exact(transport, endpoint, &mut raw, 0, HEADER_SIZE, timeout)?;
    if got < HEADER_SIZE {
        return Err(CarlinkError::ShortRead {
            wanted: HEADER_SIZE,
            got,
        });
    }
    let header = MessageHeader::decode(&raw)?;

    if header.length as usize > MAX_BODY_LEN {
        return Err(CarlinkError::PayloadTooLarge {
            length: header.length,
            limit: MAX_BODY_LEN,
        });
    }
    Ok(header)
}

/// Video bodies bypass intermediate buffers: the sink hands out its own
/// staging memory and the chunked reader fills it in place.
fn read_video_body(
    session: &Session,
    transport: &dyn UsbTransport,
    endpoint: u8,
    header: &MessageHeader,
    timeout: Duration,
    streaming_started: &mut bool,
) -> Result<()> {
    let length = header.length as usize;

    let mut slot = session.sink_slot();
    let sink = slot.as_mut().ok_or(CarlinkError::Precondition(
        "video message with no sink installed",
    ))?;

    let mut fill = |buf: &mut [u8], offset: usize| -> Result<usize> {
        read_exact(transport, endpoint, buf, offset, length, timeout)
    };
    sink.process_data_direct(length, VIDEO_HEADER_SKIP, &mut fill)?;

    if !*streaming_started {
        *streaming_started = true;
        // Empty-payload marker telling the consumer the media stream is
        // live, raised once the first frame has landed.
        session.send(CarlinkEvent::message_with_data(header.msg_type, Vec::new()));
    }
    Ok(())
}

/// Non-video bodies get an exact-size buffer and ride out with the
/// notification.
fn read_message_body(
    session: &Session,
    transport: &dyn UsbTransport,
    endpoint: u8,
    header: &MessageHeader,
    timeout: Duration,
) -> Result<()> {
    let length = header.length as usize;
    let mut body = vec![0u8; length];
    let got = read_exact(transport, endpoint, &mut body, 0, length, timeout)?;
    if got < length {
        return Err(CarlinkError::ShortRead {
            wanted: length,
            got,
        });
    }

    debug!(
        "{} message, {} byte body",
        describe_message_type(header.msg_type),
        length
    );
    session.send(CarlinkEvent::message_with_data(header.msg_type, body));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::MessageType;
    use crate::usb::test_support::ScriptedTransport;
    use crate::video::RingVideoSink;
    use crate::video::VideoSink as _;
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn scripted_session() -> (Session, Receiver<CarlinkEvent>) {
        let (tx, rx) = unbounded();
        (Session::new(tx), rx)
    }

    fn msg(msg_type: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = MessageHeader::new(msg_type, payload.len() as u32)
            .encode()
            .to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn video_payload(es: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x11u8; VIDEO_HEADER_SKIP];
        payload.extend_from_slice(es);
        payload
    }

    /// Has no scripted stream; only useful as a session transport slot.
    struct NullTransport;

    impl UsbTransport for NullTransport {
        fn read_bulk(
            &self,
            _endpoint: u8,
            _buf: &mut [u8],
            _timeout: Duration,
        ) -> std::result::Result<usize, rusb::Error> {
            Err(rusb::Error::NoDevice)
        }

        fn write_bulk(
            &self,
            _endpoint: u8,
            data: &[u8],
            _timeout: Duration,
        ) -> std::result::Result<usize, rusb::Error> {
            Ok(data.len())
        }
    }

    #[test]
    fn test_header_only_messages_notify_type() {
        let (session, events) = scripted_session();
        let stream = [
            msg(MessageType::HeartBeat as u32, &[]),
            msg(MessageType::Unplugged as u32, &[]),
        ]
        .concat();
        let transport = ScriptedTransport::full_service(stream, 2);

        let token = session.arm().unwrap();
        run(&session, &token, &transport, 0x81, TIMEOUT);

        let received: Vec<CarlinkEvent> = events.try_iter().collect();
        assert!(matches!(received[0], CarlinkEvent::Log { .. }));
        assert_eq!(received[1], CarlinkEvent::message(0xaa));
        assert_eq!(received[2], CarlinkEvent::message(0x04));
        assert!(matches!(
            received[3],
            CarlinkEvent::LoopError {
                kind: ErrorKind::Transport,
                ..
            }
        ));
        assert_eq!(received.len(), 4);
        assert!(!session.is_running());
    }

    #[test]
    fn test_payload_messages_forward_their_bytes() {
        let (session, events) = scripted_session();
        let stream = msg(MessageType::Command as u32, &[1, 2, 3, 4]);
        let transport = ScriptedTransport::full_service(stream, 2);

        let token = session.arm().unwrap();
        run(&session, &token, &transport, 0x81, TIMEOUT);

        let received: Vec<CarlinkEvent> = events.try_iter().collect();
        assert_eq!(
            received[1],
            CarlinkEvent::message_with_data(0x08, vec![1, 2, 3, 4])
        );
        // Header, body, then the header read that broke the stream.
        assert_eq!(transport.requests(), vec![HEADER_SIZE, 4, HEADER_SIZE]);
    }

    #[test]
    fn test_stop_flag_observed_before_first_read() {
        let (session, events) = scripted_session();
        let transport = ScriptedTransport::full_service(Vec::new(), 0);

        // Stop requested before the loop ever runs: the first boundary
        // check must exit.
        let token = session.arm().unwrap();
        token.store(false, Ordering::SeqCst);
        run(&session, &token, &transport, 0x81, TIMEOUT);

        assert!(transport.requests().is_empty());
        let received: Vec<CarlinkEvent> = events.try_iter().collect();
        assert!(matches!(received[0], CarlinkEvent::Log { .. }));
        assert_eq!(
            received[1],
            CarlinkEvent::LoopError {
                kind: ErrorKind::Stopped,
                message: "reading loop stopped".into(),
            }
        );
        assert_eq!(received.len(), 2);
    }

    #[test]
    fn test_oversized_body_rejected_before_allocation() {
        let (session, events) = scripted_session();
        let header = MessageHeader::new(MessageType::Command as u32, (MAX_BODY_LEN + 1) as u32);
        let transport = ScriptedTransport::full_service(header.encode().to_vec(), 1);

        let token = session.arm().unwrap();
        run(&session, &token, &transport, 0x81, TIMEOUT);

        // Only the header moved; the claimed body was never requested.
        assert_eq!(transport.requests(), vec![HEADER_SIZE]);
        let received: Vec<CarlinkEvent> = events.try_iter().collect();
        assert!(matches!(
            received.last(),
            Some(CarlinkEvent::LoopError {
                kind: ErrorKind::Malformed,
                ..
            })
        ));
    }

    #[test]
    fn test_video_without_sink_is_fatal() {
        let (session, events) = scripted_session();
        let stream = msg(
            MessageType::VideoData as u32,
            &video_payload(&[1, 2, 3, 4]),
        );
        let transport = ScriptedTransport::full_service(stream, 2);

        let token = session.arm().unwrap();
        run(&session, &token, &transport, 0x81, TIMEOUT);

        let received: Vec<CarlinkEvent> = events.try_iter().collect();
        // No streaming marker, no message: straight to the terminal report.
        assert!(matches!(received[0], CarlinkEvent::Log { .. }));
        assert!(matches!(
            received[1],
            CarlinkEvent::LoopError {
                kind: ErrorKind::Precondition,
                ..
            }
        ));
        assert_eq!(received.len(), 2);
        // The body was never read.
        assert_eq!(transport.requests(), vec![HEADER_SIZE]);
    }

    #[test]
    fn test_video_direct_fill_and_streaming_marker_dedup() {
        let (session, events) = scripted_session();
        let (feed_tx, feed_rx) = unbounded();
        let mut sink = RingVideoSink::new(feed_tx);
        sink.start(800, 480).unwrap();
        *session.sink_slot() = Some(Box::new(sink));

        let expected: Vec<Vec<u8>> = (0u8..5).map(|i| vec![0xd0 + i, 0xe0 + i]).collect();
        let stream: Vec<u8> = expected
            .iter()
            .map(|es| msg(MessageType::VideoData as u32, &video_payload(es)))
            .collect::<Vec<_>>()
            .concat();
        let transport = ScriptedTransport::full_service(stream, 10);

        let token = session.arm().unwrap();
        run(&session, &token, &transport, 0x81, TIMEOUT);

        // Every frame arrives with the transport metadata stripped.
        let frames: Vec<Vec<u8>> = feed_rx.try_iter().collect();
        assert_eq!(frames, expected);

        // The empty-payload streaming marker fires once, right after the
        // first frame lands, and never again for the four that follow.
        let marker = CarlinkEvent::message_with_data(0x06, Vec::new());
        let received: Vec<CarlinkEvent> = events.try_iter().collect();
        assert_eq!(received[1], marker);
        let markers = received.iter().filter(|e| **e == marker).count();
        assert_eq!(markers, 1);
        assert!(matches!(
            received.last(),
            Some(CarlinkEvent::LoopError {
                kind: ErrorKind::Transport,
                ..
            })
        ));
    }

    #[test]
    fn test_codec_reset_storm_escalates_to_emergency_cleanup() {
        let (session, events) = scripted_session();
        *session.transport_slot() = Some(Arc::new(NullTransport));

        let (feed_tx, feed_rx) = unbounded();
        let mut sink = RingVideoSink::new(feed_tx);
        sink.start(800, 480).unwrap();
        *session.sink_slot() = Some(Box::new(sink));
        // Consumer gone: every staged frame now fails over to a codec reset.
        drop(feed_rx);

        for _ in 0..3 {
            let stream = msg(
                MessageType::VideoData as u32,
                &video_payload(&[1, 2, 3, 4]),
            );
            let transport = ScriptedTransport::full_service(stream, 2);
            let token = session.arm().unwrap();
            run(&session, &token, &transport, 0x81, TIMEOUT);
        }

        let received: Vec<CarlinkEvent> = events.try_iter().collect();
        let terminals: Vec<usize> = received
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, CarlinkEvent::LoopError { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(terminals.len(), 3);
        for i in &terminals {
            assert!(matches!(
                received[*i],
                CarlinkEvent::LoopError {
                    kind: ErrorKind::CodecReset,
                    ..
                }
            ));
        }

        let cleanups: Vec<usize> = received
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, CarlinkEvent::EmergencyCleanup))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(cleanups.len(), 1);
        // Cleanup lands before the storm's final terminal notification.
        assert!(cleanups[0] < terminals[2]);

        // Transport released, sink kept, loop down.
        assert!(session.transport_slot().is_none());
        assert!(session.sink_slot().is_some());
        assert!(!session.is_running());
    }
}
