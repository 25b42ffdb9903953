//! Debounced availability
//!
//! Brief outages are common and reconnect quickly, so a lost connection is
//! only reported once it has lasted for the grace window. The flag starts out
//! unavailable and becomes available on the first successful connect.

use std::time::Duration;
use tokio::time::Instant;

/// Availability flag with a pending-unavailable deadline
#[derive(Debug, Clone)]
pub struct AvailabilityDebouncer {
    window: Duration,
    available: bool,
    unavailable_at: Option<Instant>,
}

impl AvailabilityDebouncer {
    /// Debouncer with the given grace window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            available: false,
            unavailable_at: None,
        }
    }

    /// Currently published value
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// When a pending unavailability will be published
    pub fn deadline(&self) -> Option<Instant> {
        self.unavailable_at
    }

    /// Session reached connected; returns `Some(true)` when that is a change
    pub fn connected(&mut self) -> Option<bool> {
        self.unavailable_at = None;
        if self.available {
            return None;
        }
        self.available = true;
        Some(true)
    }

    /// Session lost; starts the grace window if none is running
    pub fn connection_lost(&mut self, now: Instant) {
        if self.available && self.unavailable_at.is_none() {
            self.unavailable_at = Some(now + self.window);
        }
    }

    /// Publish unavailability once the grace window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        match self.unavailable_at {
            Some(at) if at <= now => {
                self.unavailable_at = None;
                self.available = false;
                Some(false)
            }
            _ => None,
        }
    }

    /// Drop to unavailable without waiting, as on shutdown
    pub fn force_unavailable(&mut self) -> Option<bool> {
        self.unavailable_at = None;
        if !self.available {
            return None;
        }
        self.available = false;
        Some(false)
    }
}
