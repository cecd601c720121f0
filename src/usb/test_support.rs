//! Scripted transport double shared by the transfer and reading-loop tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use super::transfer::UsbTransport;

/// Serves bytes from a canned stream. Each entry in `plan` governs one
/// call: `Ok(cap)` delivers up to `cap` bytes of the stream (use
/// `usize::MAX` for "whatever was requested"), `Err` fails the call.
/// Runs off the end of the plan as `Err(NoDevice)`.
pub(crate) struct ScriptedTransport {
    stream: RefCell<VecDeque<u8>>,
    plan: RefCell<VecDeque<std::result::Result<usize, rusb::Error>>>,
    requests: RefCell<Vec<usize>>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        stream: Vec<u8>,
        plan: Vec<std::result::Result<usize, rusb::Error>>,
    ) -> ScriptedTransport {
        ScriptedTransport {
            stream: RefCell::new(stream.into()),
            plan: RefCell::new(plan.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// A transport that fully serves `calls` requests from `stream` and
    /// fails every call after that.
    pub(crate) fn full_service(stream: Vec<u8>, calls: usize) -> ScriptedTransport {
        Self::new(stream, vec![Ok(usize::MAX); calls])
    }

    /// Sizes of every `read_bulk` request seen so far.
    pub(crate) fn requests(&self) -> Vec<usize> {
        self.requests.borrow().clone()
    }
}

impl UsbTransport for ScriptedTransport {
    fn read_bulk(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> std::result::Result<usize, rusb::Error> {
        self.requests.borrow_mut().push(buf.len());
        let step = self
            .plan
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(rusb::Error::NoDevice))?;
        let mut stream = self.stream.borrow_mut();
        let take = step.min(buf.len()).min(stream.len());
        for slot in buf.iter_mut().take(take) {
            *slot = stream.pop_front().unwrap();
        }
        Ok(take)
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
