//! Connection state tracking
//!
//! The coordinator is the only writer of the connection state. Readers get a
//! `watch` receiver, so `Coordinator::state()` never waits on the coordinator
//! task and `wait_for_state()` wakes on each transition.
//!
//! # State Transitions
//!
//! ```text
//! Disconnected ──start / backoff due──▶ Connecting ──handshake ok──▶ Connected
//!      ▲                                  │    ▲                         │
//!      ├─────────connect failed───────────┘    │ cooldown elapsed        │
//!      │                                       │                         │
//!      │             threshold reached ──▶ CircuitOpen                   │
//!      │                                                                 │
//!      └───────────connection lost / idle / missed keepalives────────────┘
//! ```

use crate::metrics::ClientMetrics;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session; a reconnect may be scheduled
    Disconnected,
    /// Transport opening or handshake outstanding
    Connecting,
    /// Handshake complete, requests flow
    Connected,
    /// Reconnection suspended until the cooldown elapses
    CircuitOpen,
}

impl ConnectionState {
    /// Gauge value recorded for this state
    pub fn as_metric(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::CircuitOpen => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::CircuitOpen => "circuit_open",
        };
        f.write_str(name)
    }
}

/// Writer side of the published connection state
pub(crate) struct StateTracker {
    tx: watch::Sender<ConnectionState>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl StateTracker {
    pub(crate) fn new(metrics: Option<Arc<ClientMetrics>>) -> (Self, watch::Receiver<ConnectionState>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        (Self { tx, metrics }, rx)
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn is(&self, state: ConnectionState) -> bool {
        self.get() == state
    }

    /// Move to `next`; returns false when already there
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let previous = self.get();
        if previous == next {
            return false;
        }
        self.tx.send_replace(next);
        tracing::info!(from = %previous, to = %next, "Connection state changed");
        if let Some(ref m) = self.metrics {
            m.update_connection_state(next.as_metric());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_values_distinct() {
        let values: Vec<i64> = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::CircuitOpen,
        ]
        .iter()
        .map(|s| s.as_metric())
        .collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::CircuitOpen.to_string(), "circuit_open");
    }

    #[tokio::test]
    async fn test_transitions_publish() {
        let (tracker, mut rx) = StateTracker::new(None);
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        assert!(tracker.transition(ConnectionState::Connecting));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        assert!(!tracker.transition(ConnectionState::Connecting));
        assert!(!rx.has_changed().unwrap());
        assert!(tracker.is(ConnectionState::Connecting));
    }
}
