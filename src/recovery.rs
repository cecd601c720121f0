//! Crash/reset-storm detection and the emergency teardown it escalates to.

use std::time::{Duration, Instant};

use log::{error, warn};

use crate::bridge::Session;
use crate::events::CarlinkEvent;

/// Codec resets inside one window before the session is torn down.
pub const RESET_THRESHOLD: u32 = 3;

/// Width of the sliding reset window.
pub const RESET_WINDOW: Duration = Duration::from_secs(30);

/// Sliding-window counter over codec-reset events.
///
/// The tracker never classifies anything itself; the error-reporting
/// boundary feeds it only failures already tagged `CodecReset`.
pub struct ResetTracker {
    last_reset: Option<Instant>,
    consecutive_resets: u32,
    threshold: u32,
    window: Duration,
}

impl ResetTracker {
    pub fn new() -> ResetTracker {
        ResetTracker::with_policy(RESET_THRESHOLD, RESET_WINDOW)
    }

    /// Tracker with a custom threshold and window.
    pub fn with_policy(threshold: u32, window: Duration) -> ResetTracker {
        ResetTracker {
            last_reset: None,
            consecutive_resets: 0,
            threshold,
            window,
        }
    }

    /// Record one reset observed at `now`. Returns true when the streak hit
    /// the threshold, at which point the caller must run emergency cleanup. The
    /// streak restarts at 1 when the previous reset fell outside the window,
    /// and restarts at 0 after an escalation (the timestamp is kept).
    #[must_use]
    pub fn observe(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_reset {
            if now.duration_since(last) > self.window {
                self.consecutive_resets = 0;
            }
        }
        self.consecutive_resets += 1;
        self.last_reset = Some(now);

        warn!(
            "codec reset observed ({} of {} within window)",
            self.consecutive_resets, self.threshold
        );

        if self.consecutive_resets >= self.threshold {
            self.consecutive_resets = 0;
            return true;
        }
        false
    }

    /// Resets counted in the current window.
    pub fn consecutive_resets(&self) -> u32 {
        self.consecutive_resets
    }
}

impl Default for ResetTracker {
    fn default() -> Self {
        ResetTracker::new()
    }
}

/// Best-effort session teardown after a reset storm.
///
/// Every step is guarded on its own so a failing step never stops the rest:
/// the active loop is cancelled, the sink is bounced but kept for later
/// natural recovery, the transport handle is closed and cleared, and the
/// consumer is told cleanup ran. Re-entry is refused while a cleanup is in
/// flight.
pub(crate) fn emergency_cleanup(session: &Session) {
    if !session.begin_exclusive_cleanup() {
        warn!("emergency cleanup already in progress, skipping");
        return;
    }

    session.log("starting emergency cleanup");
    session.request_stop();

    {
        let mut slot = session.sink_slot();
        if let Some(sink) = slot.as_mut() {
            match sink.reset() {
                Ok(()) => session.log("emergency cleanup: video sink reset"),
                Err(e) => error!("emergency cleanup: video sink reset failed: {}", e),
            }
        }
    }

    {
        let mut slot = session.transport_slot();
        if slot.take().is_some() {
            session.log("emergency cleanup: transport connection closed");
        }
    }

    session.send(CarlinkEvent::EmergencyCleanup);
    session.log("emergency cleanup finished");

    session.end_cleanup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_window_restarts_streak() {
        let mut tracker = ResetTracker::new();
        let t0 = Instant::now();

        assert!(!tracker.observe(t0));
        assert!(!tracker.observe(t0 + Duration::from_secs(1)));
        // 34 s after the second event: outside the 30 s window.
        assert!(!tracker.observe(t0 + Duration::from_secs(35)));
        assert_eq!(tracker.consecutive_resets(), 1);
    }

    #[test]
    fn test_threshold_inside_window_escalates_once() {
        let mut tracker = ResetTracker::new();
        let t0 = Instant::now();

        assert!(!tracker.observe(t0));
        assert!(!tracker.observe(t0 + Duration::from_secs(5)));
        assert!(tracker.observe(t0 + Duration::from_secs(10)));
        assert_eq!(tracker.consecutive_resets(), 0);

        // The streak starts over after an escalation.
        assert!(!tracker.observe(t0 + Duration::from_secs(11)));
        assert_eq!(tracker.consecutive_resets(), 1);
    }

    #[test]
    fn test_custom_policy() {
        let mut tracker = ResetTracker::with_policy(2, Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(!tracker.observe(t0));
        assert!(tracker.observe(t0 + Duration::from_secs(1)));

        // Window expiry applies to the restarted streak too.
        assert!(!tracker.observe(t0 + Duration::from_secs(2)));
        assert!(!tracker.observe(t0 + Duration::from_secs(10)));
        assert_eq!(tracker.consecutive_resets(), 1);
    }
}
