//! Connection configuration
//!
//! Every delay, timeout and limit the coordinator uses lives in
//! [`ConnectionConfig`]. Defaults match what the controller tolerates in
//! practice; [`ConnectionConfig::validate`] rejects values outside the ranges
//! the controller firmware copes with.

use iclink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default controller port
pub const DEFAULT_PORT: u16 = 6681;

/// Largest number of (object, attribute) pairs the controller accepts in one
/// registration request
pub const DEFAULT_BATCH_SIZE: usize = 50;

const KEEPALIVE_RANGE: (u64, u64) = (30, 300);
const RECONNECT_BASE_RANGE: (u64, u64) = (10, 120);

/// Timing and limit inputs of the connection coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Controller host name or address
    pub host: String,
    /// Controller TCP port
    pub port: u16,
    /// Quiet period after which a keepalive probe is sent (30-300s)
    pub keepalive_interval: Duration,
    /// Consecutive unanswered probes before the session is dropped
    pub max_missed_keepalives: u32,
    /// Maximum time without inbound data before the session is dropped
    pub idle_timeout: Duration,
    /// First reconnect delay (10-120s)
    pub reconnect_base_delay: Duration,
    /// Growth factor applied to each successive reconnect delay
    pub reconnect_multiplier: f64,
    /// Upper bound of the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts that open the circuit breaker
    pub failure_threshold: u32,
    /// How long the circuit stays open before the probe attempt
    pub circuit_cooldown: Duration,
    /// Pairs per registration request
    pub batch_size: usize,
    /// Time a request may occupy the in-flight slot before it is failed
    pub deadlock_timeout: Duration,
    /// Time a caller waits for its response
    pub response_timeout: Duration,
    /// Interval of the orphaned-request sweep
    pub cleanup_interval: Duration,
    /// Age after which a queued request is considered orphaned
    pub max_request_age: Duration,
    /// Grace window before a lost connection is reported as unavailable
    pub availability_debounce: Duration,
    /// Bound on a single transport open or frame write
    pub connect_timeout: Duration,
    /// Consecutive undecodable frames that tear the session down
    pub max_protocol_errors: u32,
    /// Accept requests while no session is open and hold them until one is
    pub queue_while_disconnected: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            keepalive_interval: Duration::from_secs(90),
            max_missed_keepalives: 3,
            idle_timeout: Duration::from_secs(120),
            reconnect_base_delay: Duration::from_secs(30),
            reconnect_multiplier: 1.5,
            reconnect_max_delay: Duration::from_secs(300),
            failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(300),
            batch_size: DEFAULT_BATCH_SIZE,
            deadlock_timeout: Duration::from_secs(45),
            response_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            max_request_age: Duration::from_secs(120),
            availability_debounce: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            max_protocol_errors: 5,
            queue_while_disconnected: false,
        }
    }
}

impl ConnectionConfig {
    /// Defaults for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Check every value against its permitted range
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        check_range(
            "keepalive_interval",
            self.keepalive_interval,
            KEEPALIVE_RANGE,
        )?;
        check_range(
            "reconnect_base_delay",
            self.reconnect_base_delay,
            RECONNECT_BASE_RANGE,
        )?;
        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "reconnect_multiplier must be >= 1, got {}",
                self.reconnect_multiplier
            )));
        }
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(Error::Config(
                "reconnect_max_delay must not be below reconnect_base_delay".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be non-zero".into()));
        }
        if self.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be non-zero".into()));
        }
        if self.max_missed_keepalives == 0 {
            return Err(Error::Config("max_missed_keepalives must be non-zero".into()));
        }
        if self.max_protocol_errors == 0 {
            return Err(Error::Config("max_protocol_errors must be non-zero".into()));
        }
        for (name, value) in [
            ("idle_timeout", self.idle_timeout),
            ("circuit_cooldown", self.circuit_cooldown),
            ("deadlock_timeout", self.deadlock_timeout),
            ("response_timeout", self.response_timeout),
            ("cleanup_interval", self.cleanup_interval),
            ("max_request_age", self.max_request_age),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

fn check_range(name: &str, value: Duration, (min, max): (u64, u64)) -> Result<()> {
    if value < Duration::from_secs(min) || value > Duration::from_secs(max) {
        return Err(Error::Config(format!(
            "{} must be within {}-{}s, got {:?}",
            name, min, max, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("10.0.0.5");
        assert_eq!(config.port, 6681);
        assert_eq!(config.keepalive_interval, Duration::from_secs(90));
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(30));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.circuit_cooldown, Duration::from_secs(300));
        assert_eq!(config.deadlock_timeout, Duration::from_secs(45));
        assert_eq!(config.response_timeout, Duration::from_secs(60));
        assert_eq!(config.availability_debounce, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(matches!(
            ConnectionConfig::default().validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_keepalive_range() {
        let mut config = ConnectionConfig::new("pool");
        config.keepalive_interval = Duration::from_secs(29);
        assert!(config.validate().is_err());
        config.keepalive_interval = Duration::from_secs(301);
        assert!(config.validate().is_err());
        config.keepalive_interval = Duration::from_secs(300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconnect_range_and_cap() {
        let mut config = ConnectionConfig::new("pool");
        config.reconnect_base_delay = Duration::from_secs(5);
        assert!(config.validate().is_err());

        config.reconnect_base_delay = Duration::from_secs(120);
        config.reconnect_max_delay = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multiplier_and_counts() {
        let mut config = ConnectionConfig::new("pool");
        config.reconnect_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = ConnectionConfig::new("pool");
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ConnectionConfig::new("pool");
        config.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = ConnectionConfig::new("pool");
        config.deadlock_timeout = Duration::ZERO;
        match config.validate() {
            Err(Error::Config(msg)) => assert!(msg.contains("deadlock_timeout")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"host":"pool.local","batch_size":25}"#).unwrap();
        assert_eq!(config.host, "pool.local");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
