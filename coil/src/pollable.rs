use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::config::DEFAULT_WATCHDOG;
use crate::poller::Poller;

/// Capability contract for anything the reactor can watch.
///
/// Implementors own a file descriptor and react to readiness events
/// dispatched by the [`Poller`]. Every pollable carries an inactivity
/// watchdog checked once per reactor iteration; an expired pollable is
/// closed by the periodic sweep.
pub trait Pollable {
    /// The watched file descriptor.
    fn fileno(&self) -> RawFd;

    /// The descriptor became readable.
    fn handle_read(&mut self, _poller: &mut Poller) {}

    /// The descriptor became writable.
    fn handle_write(&mut self, _poller: &mut Poller) {}

    /// The reactor is closing this pollable. Runs exactly once.
    fn handle_close(&mut self, _poller: &mut Poller) {}

    /// Periodic sweep hook. Returns true when the inactivity watchdog
    /// has expired and the pollable should be closed.
    fn handle_periodic(&mut self, now: Instant) -> bool;

    /// Reset the watchdog deadline. `None` disables it.
    fn set_timeout(&mut self, timeout: Option<Duration>);
}

/// Watchdog state shared by pollable implementations: a creation
/// timestamp and a deadline relative to it. The timestamp is reset by
/// [`Watchdog::set`].
pub struct Watchdog {
    created: Instant,
    timeout: Option<Duration>,
}

impl Watchdog {
    /// Watchdog with the default 300 second deadline.
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            timeout: Some(DEFAULT_WATCHDOG),
        }
    }

    /// Watchdog that never expires (used by listeners).
    pub fn disabled() -> Self {
        Self {
            created: Instant::now(),
            timeout: None,
        }
    }

    /// Reset the deadline, restarting the clock from now.
    pub fn set(&mut self, timeout: Option<Duration>) {
        self.created = Instant::now();
        self.timeout = timeout;
    }

    /// Restart the clock, keeping the configured deadline. Called on
    /// I/O progress.
    pub fn touch(&mut self) {
        self.created = Instant::now();
    }

    /// True when a deadline is configured and has elapsed.
    pub fn expired(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now.saturating_duration_since(self.created) > timeout,
            None => false,
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_expires_after_deadline() {
        let mut watchdog = Watchdog::new();
        watchdog.set(Some(Duration::from_millis(10)));
        let now = Instant::now();
        assert!(!watchdog.expired(now));
        assert!(watchdog.expired(now + Duration::from_millis(11)));
    }

    #[test]
    fn disabled_watchdog_never_expires() {
        let watchdog = Watchdog::disabled();
        assert!(!watchdog.expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn set_restarts_the_clock() {
        let mut watchdog = Watchdog::new();
        watchdog.set(Some(Duration::from_secs(5)));
        let now = Instant::now();
        assert!(!watchdog.expired(now + Duration::from_secs(4)));
        assert!(watchdog.expired(now + Duration::from_secs(6)));
    }
}
