//! Keepalive and idle detection
//!
//! Two independent liveness checks run while a session is connected:
//!
//! - **Keepalive**: when nothing has been sent or received for a full
//!   interval, a probe is issued. An interval that elapses with the previous
//!   probe still unanswered counts as a missed reply. Any response resets the
//!   count.
//! - **Idle**: when nothing at all has been received for the idle timeout the
//!   session is considered dead, whatever the missed-reply count says.
//!
//! Organic traffic and push notifications both defer the next probe.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Why a session failed the liveness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessFailure {
    /// Nothing received for this long
    Idle(Duration),
    /// This many consecutive probes went unanswered
    MissedReplies(u32),
}

impl fmt::Display for LivenessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessFailure::Idle(idle) => write!(f, "no data received for {}s", idle.as_secs()),
            LivenessFailure::MissedReplies(n) => write!(f, "{} keepalive replies missed", n),
        }
    }
}

/// Result of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Issue a probe now
    SendProbe,
    /// Drop the session
    Disconnect(LivenessFailure),
}

/// Liveness bookkeeping for one session
#[derive(Debug, Clone)]
pub struct KeepaliveMonitor {
    interval: Duration,
    idle_timeout: Duration,
    max_missed: u32,
    last_activity: Instant,
    last_received: Instant,
    missed: u32,
    probe_outstanding: bool,
}

impl KeepaliveMonitor {
    /// Monitor starting its clocks at `now`
    pub fn new(interval: Duration, idle_timeout: Duration, max_missed: u32, now: Instant) -> Self {
        Self {
            interval,
            idle_timeout,
            max_missed,
            last_activity: now,
            last_received: now,
            missed: 0,
            probe_outstanding: false,
        }
    }

    /// Restart all clocks for a fresh session
    pub fn reset(&mut self, now: Instant) {
        self.last_activity = now;
        self.last_received = now;
        self.missed = 0;
        self.probe_outstanding = false;
    }

    /// Something was written to the controller
    pub fn record_sent(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Something was received from the controller
    pub fn record_received(&mut self, now: Instant) {
        self.last_activity = now;
        self.last_received = now;
    }

    /// A response arrived, matching or not
    pub fn record_reply(&mut self) {
        self.missed = 0;
        self.probe_outstanding = false;
    }

    /// Next instant at which `poll` may act
    pub fn deadline(&self) -> Instant {
        (self.last_activity + self.interval).min(self.last_received + self.idle_timeout)
    }

    /// Consecutive unanswered probes
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Evaluate both checks at `now`
    pub fn poll(&mut self, now: Instant) -> Option<KeepaliveAction> {
        let idle = now.saturating_duration_since(self.last_received);
        if idle >= self.idle_timeout {
            return Some(KeepaliveAction::Disconnect(LivenessFailure::Idle(idle)));
        }

        if now.saturating_duration_since(self.last_activity) < self.interval {
            return None;
        }

        if self.probe_outstanding {
            self.missed += 1;
            if self.missed >= self.max_missed {
                return Some(KeepaliveAction::Disconnect(LivenessFailure::MissedReplies(
                    self.missed,
                )));
            }
        }
        self.probe_outstanding = true;
        self.last_activity = now;
        Some(KeepaliveAction::SendProbe)
    }
}
