//! Session state shared with the reading-loop worker and the command
//! surface exposed to the embedding application.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::{CarlinkError, ErrorKind, Result};
use crate::events::CarlinkEvent;
use crate::read_loop;
use crate::recovery::{self, ResetTracker};
use crate::usb::device::{CarlinkDevice, DongleInfo};
use crate::usb::transfer::UsbTransport;
use crate::video::VideoSink;

/// Transport handle shared between the command surface and the worker. The
/// worker keeps its own clone for the lifetime of one loop, so closing the
/// session slot drops the device only once the loop has let go too.
pub type SharedTransport = Arc<dyn UsbTransport + Send + Sync>;

/// Everything one bridge session owns: the active loop's cancellation
/// token, the cached transport, the installed video sink, the reset
/// tracker, and the event sender.
pub(crate) struct Session {
    // Token of the most recently armed loop. Every start issues a fresh
    // token, so a stopped loop that is still winding down inside a blocking
    // transfer holds a token nothing can flip back to true — a restart can
    // never revive it.
    run_token: Mutex<Arc<AtomicBool>>,
    cleanup_active: AtomicBool,
    transport: Mutex<Option<SharedTransport>>,
    sink: Mutex<Option<Box<dyn VideoSink>>>,
    tracker: Mutex<ResetTracker>,
    events: Sender<CarlinkEvent>,
}

impl Session {
    pub(crate) fn new(events: Sender<CarlinkEvent>) -> Session {
        Session {
            run_token: Mutex::new(Arc::new(AtomicBool::new(false))),
            cleanup_active: AtomicBool::new(false),
            transport: Mutex::new(None),
            sink: Mutex::new(None),
            tracker: Mutex::new(ResetTracker::new()),
            events,
        }
    }

    fn current_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.run_token.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.current_token().load(Ordering::SeqCst)
    }

    /// Cancel the active loop, if any. Idempotent; a token already cleared
    /// by its own loop stays cleared.
    pub(crate) fn request_stop(&self) {
        self.current_token().store(false, Ordering::SeqCst);
    }

    /// Issue an armed token for a new loop, or `None` while the current
    /// loop is still live.
    pub(crate) fn arm(&self) -> Option<Arc<AtomicBool>> {
        let mut slot = self.run_token.lock().unwrap_or_else(|e| e.into_inner());
        if slot.load(Ordering::SeqCst) {
            return None;
        }
        let token = Arc::new(AtomicBool::new(true));
        *slot = Arc::clone(&token);
        Some(token)
    }

    pub(crate) fn begin_exclusive_cleanup(&self) -> bool {
        self.cleanup_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_cleanup(&self) {
        self.cleanup_active.store(false, Ordering::SeqCst);
    }

    // The slot helpers recover from poisoning: a panicked lock holder must
    // not take emergency cleanup down with it.

    pub(crate) fn transport_slot(&self) -> MutexGuard<'_, Option<SharedTransport>> {
        self.transport.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn sink_slot(&self) -> MutexGuard<'_, Option<Box<dyn VideoSink>>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tracker_slot(&self) -> MutexGuard<'_, ResetTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push one event to the consumer. A dropped receiver only means nobody
    /// is listening anymore; the session keeps going.
    pub(crate) fn send(&self, event: CarlinkEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped, notification discarded");
        }
    }

    /// Log locally and forward the line to the consumer.
    pub(crate) fn log<S: Into<String>>(&self, message: S) {
        let message = message.into();
        info!("{}", message);
        self.send(CarlinkEvent::Log { message });
    }

    /// Terminal reporting boundary for a finished loop: feeds the reset
    /// tracker on codec-reset exits (escalating to emergency cleanup when
    /// the storm threshold is hit), then emits the single terminal event.
    pub(crate) fn report_loop_exit(&self, exit: &CarlinkError) {
        match exit {
            CarlinkError::Stopped => info!("reading loop exited: {}", exit),
            _ => error!("reading loop exited: {}", exit),
        }

        if exit.kind() == ErrorKind::CodecReset {
            let escalate = self.tracker_slot().observe(Instant::now());
            if escalate {
                recovery::emergency_cleanup(self);
            }
        }

        self.send(CarlinkEvent::LoopError {
            kind: exit.kind(),
            message: exit.to_string(),
        });
    }
}

/// Bridge between one dongle and the embedding application.
///
/// Commands come in on whatever thread the application uses; a dedicated
/// worker thread runs the blocking reading loop; all notifications flow out
/// through the receiver handed back by [`CarlinkBridge::new`].
pub struct CarlinkBridge {
    session: Arc<Session>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CarlinkBridge {
    /// Create a bridge and the event stream its session will feed.
    pub fn new() -> (CarlinkBridge, Receiver<CarlinkEvent>) {
        let (tx, rx) = unbounded();
        let bridge = CarlinkBridge {
            session: Arc::new(Session::new(tx)),
            worker: Mutex::new(None),
        };
        (bridge, rx)
    }

    /// Scan for a supported dongle, open the first match and attach it as
    /// this session's transport.
    pub fn open_device(&self) -> Result<DongleInfo> {
        let device = CarlinkDevice::find_all()?
            .into_iter()
            .next()
            .ok_or(CarlinkError::Precondition("no supported dongle found"))?;
        let handle = device.open()?;
        let info = handle.info();
        self.session
            .log(format!("device opened: {}", info.describe()));
        self.attach_transport(Arc::new(handle));
        Ok(info)
    }

    /// Attach an already-open transport. Replaces a previous one; a loop
    /// still running on the old transport keeps its own handle until it
    /// exits.
    pub fn attach_transport(&self, transport: SharedTransport) {
        let replaced = self.session.transport_slot().replace(transport).is_some();
        if replaced {
            debug!("transport replaced");
        }
    }

    /// Drop the cached transport handle. The device closes once the last
    /// holder (a still-draining loop, at the latest) releases it.
    pub fn close_device(&self) {
        if self.session.transport_slot().take().is_some() {
            self.session.log("device closed");
        }
    }

    /// Install the video sink that will take the direct payload path.
    pub fn set_video_sink(&self, sink: Box<dyn VideoSink>) {
        *self.session.sink_slot() = Some(sink);
    }

    /// Remove the installed sink. A running loop fails its next video
    /// message with a precondition error rather than desynchronizing.
    pub fn clear_video_sink(&self) {
        *self.session.sink_slot() = None;
    }

    /// Bounce the installed sink's decoder side.
    pub fn reset_video_sink(&self) -> Result<()> {
        match self.session.sink_slot().as_mut() {
            Some(sink) => sink.reset(),
            None => Err(CarlinkError::Precondition("no video sink installed")),
        }
    }

    /// Start the reading loop on `endpoint`. Rejected while a loop is
    /// already running or without an attached transport.
    ///
    /// A worker whose stop was already requested is retired here first,
    /// blocking for at most its one in-flight transfer: its terminal
    /// notification lands before the new loop's events, and the two loops
    /// can never read the endpoint at the same time.
    pub fn start_reading_loop(&self, endpoint: u8, timeout: Duration) -> Result<()> {
        let transport = self.current_transport()?;

        let mut worker = self.worker_slot();
        if !self.session.is_running() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }

        let token = self.session.arm().ok_or(CarlinkError::AlreadyRunning)?;

        let session = Arc::clone(&self.session);
        let worker_token = Arc::clone(&token);
        let spawn = thread::Builder::new().name("carlink-read".into()).spawn(move || {
            read_loop::run(&session, &worker_token, transport.as_ref(), endpoint, timeout)
        });

        match spawn {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                token.store(false, Ordering::SeqCst);
                Err(CarlinkError::Io(e))
            }
        }
    }

    /// Request a cooperative stop. The loop observes its token at the next
    /// iteration boundary; at most one in-flight transfer completes first.
    pub fn stop_reading_loop(&self) {
        debug!("stop requested");
        self.session.request_stop();
    }

    /// Block until the current worker has fully exited and its terminal
    /// notification is delivered. No-op when no worker was started.
    pub fn join_reading_loop(&self) {
        let handle = self.worker_slot().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// One outbound bulk transfer to the dongle (touch input, commands).
    pub fn bulk_transfer_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        let transport = self.current_transport()?;
        let n = transport.write_bulk(endpoint, data, timeout)?;
        debug!("bulk out: {} of {} bytes to 0x{:02x}", n, data.len(), endpoint);
        Ok(n)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    fn current_transport(&self) -> Result<SharedTransport> {
        self.session
            .transport_slot()
            .clone()
            .ok_or(CarlinkError::Precondition("no open device connection"))
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for CarlinkBridge {
    fn drop(&mut self) {
        // Cooperative only: the worker owns its own Arc of the session and
        // winds down after its in-flight transfer.
        self.session.request_stop();
    }
}
