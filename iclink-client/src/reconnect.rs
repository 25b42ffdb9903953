//! Reconnection scheduling and circuit breaker
//!
//! A [`ReconnectionStrategy`] turns an attempt index into a delay. The
//! [`ReconnectionController`] sits on top of it, counts consecutive failed
//! attempts and opens the circuit once the failure threshold is reached.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `base * multiplier^attempt`, capped (default)
//! - **FixedDelay**: Constant delay between attempts
//!
//! A strategy returning `None` is treated like reaching the failure
//! threshold: the circuit opens for the cooldown period.
//!
//! # Examples
//!
//! ```rust
//! use iclink_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(30), Duration::from_secs(300))
//!     .with_multiplier(1.5);
//! assert_eq!(backoff.next_delay(0), Some(Duration::from_secs(30)));
//! assert_eq!(backoff.next_delay(1), Some(Duration::from_secs(45)));
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// Trait for reconnection strategies
///
/// The strategy may keep state across attempts. `reset()` is called after
/// every successful connect.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed since the last
    /// successful connect), or `None` to stop scheduling attempts
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Reset after a successful connect
    fn reset(&mut self);
}

/// Exponential backoff with a cap and optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Backoff doubling from `base_delay` up to `max_delay`
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Set the growth factor between successive delays
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Give up after this many attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add up to 25% random delay to each attempt
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300)).with_multiplier(1.5)
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let exponent = attempt.min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let mut delay = Duration::from_secs_f64(capped);

        if self.jitter {
            use rand::Rng;
            let spread = delay.as_millis() as u64 / 4;
            let extra = rand::thread_rng().gen_range(0..=spread);
            delay += Duration::from_millis(extra);
        }

        Some(delay)
    }

    fn reset(&mut self) {}
}

/// Fixed delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Wait `delay` before every attempt
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after this many attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn reset(&mut self) {}
}

/// Consecutive connect failures, saturating at a cap
#[derive(Debug, Clone)]
pub struct FailureCounter {
    consecutive: u32,
    last_failure: Option<Instant>,
    cap: u32,
}

impl FailureCounter {
    /// Counter that never exceeds `cap`
    pub fn new(cap: u32) -> Self {
        Self {
            consecutive: 0,
            last_failure: None,
            cap,
        }
    }

    /// Count a failure and return the new total
    pub fn record(&mut self, now: Instant) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1).min(self.cap);
        self.last_failure = Some(now);
        self.consecutive
    }

    /// Clear after a successful connect
    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.last_failure = None;
    }

    /// Current count
    pub fn count(&self) -> u32 {
        self.consecutive
    }

    /// When the last failure was recorded
    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay
    Retry(Duration),
    /// Open the circuit; probe again after the cooldown
    OpenCircuit(Duration),
}

/// Backoff schedule plus circuit breaker
pub struct ReconnectionController {
    strategy: Box<dyn ReconnectionStrategy>,
    failures: FailureCounter,
    threshold: u32,
    cooldown: Duration,
    attempt: u32,
    circuit_open_until: Option<Instant>,
}

impl ReconnectionController {
    /// Open the circuit after `threshold` consecutive failures for `cooldown`
    pub fn new(strategy: Box<dyn ReconnectionStrategy>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            strategy,
            failures: FailureCounter::new(threshold),
            threshold,
            cooldown,
            attempt: 0,
            circuit_open_until: None,
        }
    }

    /// An established session dropped; returns the delay before the first
    /// reconnect attempt
    pub fn on_connection_lost(&mut self) -> Duration {
        self.attempt = 0;
        self.next_scheduled_delay().unwrap_or(self.cooldown)
    }

    /// A connect or handshake attempt failed
    pub fn on_attempt_failed(&mut self, now: Instant) -> RetryDecision {
        let failures = self.failures.record(now);
        if failures >= self.threshold {
            return self.open_circuit(now);
        }
        match self.next_scheduled_delay() {
            Some(delay) => RetryDecision::Retry(delay),
            None => self.open_circuit(now),
        }
    }

    /// A connect and handshake completed
    pub fn on_connected(&mut self) {
        self.reset();
    }

    /// Forget all failure history
    pub fn reset(&mut self) {
        self.failures.reset();
        self.strategy.reset();
        self.attempt = 0;
        self.circuit_open_until = None;
    }

    /// Time left until the probe attempt, while the circuit is open
    pub fn circuit_remaining(&self, now: Instant) -> Option<Duration> {
        self.circuit_open_until
            .map(|until| until.saturating_duration_since(now))
    }

    /// Consecutive failures so far
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.count()
    }

    fn next_scheduled_delay(&mut self) -> Option<Duration> {
        let delay = self.strategy.next_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn open_circuit(&mut self, now: Instant) -> RetryDecision {
        self.circuit_open_until = Some(now + self.cooldown);
        RetryDecision::OpenCircuit(self.cooldown)
    }
}
