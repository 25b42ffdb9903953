//! Client metrics
//!
//! Two layers:
//!
//! - [`ConnectionStats`]: always-on atomic counters, readable at any time as a
//!   serializable [`StatsSnapshot`] for diagnostics dumps.
//! - [`ClientMetrics`]: OpenTelemetry instruments, created when observability
//!   is enabled on the builder and exported through the global meter
//!   provider.
//!
//! # Instruments
//!
//! - **connection_state**: current state (gauge)
//! - **requests_total** / **request_duration**: per command and status
//! - **errors_total**: per error kind
//! - **reconnection_attempts** / **reconnection_success**
//! - **circuit_opens**: circuit breaker openings
//! - **keepalive_probes**: probes sent
//! - **registration_chunk_size**: pairs per registration request
//! - **notifications_received**

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// OpenTelemetry instruments for one coordinator
pub struct ClientMetrics {
    /// Connection state (0=disconnected, 1=connecting, 2=connected, 3=circuit open)
    pub connection_state: Gauge<i64>,
    /// Requests resolved, by command and status
    pub requests_total: Counter<u64>,
    /// Round-trip time in seconds
    pub request_duration: Histogram<f64>,
    /// Errors by kind
    pub errors_total: Counter<u64>,
    /// Reconnect attempts
    pub reconnection_attempts: Counter<u64>,
    /// Completed handshakes
    pub reconnection_success: Counter<u64>,
    /// Circuit breaker openings
    pub circuit_opens: Counter<u64>,
    /// Keepalive probes sent
    pub keepalive_probes: Counter<u64>,
    /// Pairs per registration request
    pub registration_chunk_size: Histogram<u64>,
    /// Push notifications received
    pub notifications_received: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter named after the service
    pub fn new(service_name: impl Into<String>) -> Self {
        let meter = global::meter_with_scope(
            opentelemetry::InstrumentationScope::builder(service_name.into()).build(),
        );
        Self::new_with_meter(&meter)
    }

    /// Instruments on a caller-supplied meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("iclink.client.connection.state")
                .with_description("Connection state (0=disconnected, 1=connecting, 2=connected, 3=circuit open)")
                .build(),
            requests_total: meter
                .u64_counter("iclink.client.requests.total")
                .with_description("Total number of requests resolved")
                .build(),
            request_duration: meter
                .f64_histogram("iclink.client.request.duration")
                .with_description("Request round-trip time in seconds")
                .build(),
            errors_total: meter
                .u64_counter("iclink.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            reconnection_attempts: meter
                .u64_counter("iclink.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("iclink.client.reconnection.success")
                .with_description("Total number of completed connection handshakes")
                .build(),
            circuit_opens: meter
                .u64_counter("iclink.client.circuit.opens")
                .with_description("Total number of circuit breaker openings")
                .build(),
            keepalive_probes: meter
                .u64_counter("iclink.client.keepalive.probes")
                .with_description("Total number of keepalive probes sent")
                .build(),
            registration_chunk_size: meter
                .u64_histogram("iclink.client.registration.chunk_size")
                .with_description("Attribute pairs per registration request")
                .build(),
            notifications_received: meter
                .u64_counter("iclink.client.notifications.received")
                .with_description("Total number of push notifications received")
                .build(),
        }
    }

    /// Update connection state
    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
    }

    /// Record a resolved request
    pub fn record_request(&self, command: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("command", command.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }

    /// Record a reconnection attempt
    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    /// Record a completed handshake
    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    /// Record a circuit breaker opening
    pub fn record_circuit_open(&self) {
        self.circuit_opens.add(1, &[]);
    }

    /// Record a keepalive probe
    pub fn record_keepalive(&self) {
        self.keepalive_probes.add(1, &[]);
    }

    /// Record a registration request
    pub fn record_registration_chunk(&self, pairs: u64) {
        self.registration_chunk_size.record(pairs, &[]);
    }

    /// Record a notification received
    pub fn record_notification(&self, command: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("command", command.to_string())]);
    }
}

/// Always-on connection counters
#[derive(Debug, Default)]
pub struct ConnectionStats {
    requests_sent: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    response_time_micros: AtomicU64,
    reconnect_attempts: AtomicU64,
    successful_connects: AtomicU64,
    circuit_opens: AtomicU64,
    keepalives_sent: AtomicU64,
    notifications_received: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Requests written to the transport
    pub requests_sent: u64,
    /// Requests answered with a success code
    pub requests_completed: u64,
    /// Requests that were rejected, timed out, cancelled or lost
    pub requests_failed: u64,
    /// Mean round-trip time of completed requests, in seconds
    pub average_response_time: f64,
    /// Connect attempts made after the initial one
    pub reconnect_attempts: u64,
    /// Handshakes completed
    pub successful_connects: u64,
    /// Circuit breaker openings
    pub circuit_opens: u64,
    /// Keepalive probes sent
    pub keepalives_sent: u64,
    /// Push notifications received
    pub notifications_received: u64,
}

impl ConnectionStats {
    pub(crate) fn request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request_completed(&self, elapsed: Duration) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.response_time_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connected(&self) {
        self.successful_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn circuit_opened(&self) {
        self.circuit_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn keepalive_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn notification_received(&self) {
        self.notifications_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let completed = self.requests_completed.load(Ordering::Relaxed);
        let total_micros = self.response_time_micros.load(Ordering::Relaxed);
        let average_response_time = if completed == 0 {
            0.0
        } else {
            total_micros as f64 / completed as f64 / 1_000_000.0
        };
        StatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_completed: completed,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            average_response_time,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            successful_connects: self.successful_connects.load(Ordering::Relaxed),
            circuit_opens: self.circuit_opens.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
        }
    }
}
