//! Delivery confirmation tracking
//!
//! Unicast data frames are acknowledged at the link layer. The receive
//! pipeline runs on the capture layer's background thread while `send` runs
//! on the caller's thread; this tracker is the wait/notify bridge between
//! them. It is reset immediately before each unicast transmission attempt
//! and signaled when a confirmation frame arrives.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Default confirmation wait, short relative to a typical radio round trip
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct TrackerState {
    confirmed: bool,
}

/// Binary wait/signal primitive with timeout, one per peer
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    state: Mutex<TrackerState>,
    signal: Condvar,
}

impl DeliveryTracker {
    /// Create a tracker in the unconfirmed state
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear the confirmed flag ahead of a transmission attempt
    pub fn reset(&self) {
        self.lock().confirmed = false;
    }

    /// Record a received confirmation and release any waiter
    pub fn confirm(&self) {
        self.lock().confirmed = true;
        self.signal.notify_all();
    }

    /// Whether a confirmation arrived since the last reset
    pub fn is_confirmed(&self) -> bool {
        self.lock().confirmed
    }

    /// Block until a confirmation arrives or `timeout` elapses
    ///
    /// Returns whether the confirmation arrived in time.
    pub fn await_confirmation(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |state| !state.confirmed)
            .unwrap_or_else(|e| e.into_inner());
        guard.confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_timeout_without_confirmation() {
        let tracker = DeliveryTracker::new();
        tracker.reset();
        let start = Instant::now();
        assert!(!tracker.await_confirmation(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_confirmation_releases_waiter() {
        let tracker = Arc::new(DeliveryTracker::new());
        tracker.reset();

        let signaler = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            signaler.confirm();
        });

        assert!(tracker.await_confirmation(Duration::from_millis(500)));
        handle.join().unwrap();
    }

    #[test]
    fn test_confirmation_before_wait() {
        let tracker = DeliveryTracker::new();
        tracker.reset();
        tracker.confirm();
        assert!(tracker.is_confirmed());
        assert!(tracker.await_confirmation(Duration::from_millis(1)));
    }

    #[test]
    fn test_reset_clears_flag() {
        let tracker = DeliveryTracker::new();
        tracker.confirm();
        tracker.reset();
        assert!(!tracker.is_confirmed());
    }
}
