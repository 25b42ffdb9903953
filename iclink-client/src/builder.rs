//! Coordinator builder
//!
//! The `CoordinatorBuilder` collects connection settings, an optional custom
//! transport or reconnection strategy, and observability options, then spawns
//! the coordinator task.
//!
//! # Examples
//!
//! ```rust,no_run
//! use iclink_client::{CoordinatorBuilder, FixedDelay};
//! use std::time::Duration;
//!
//! # async fn example() -> iclink_core::Result<()> {
//! let coordinator = CoordinatorBuilder::new("192.168.1.40")
//!     .keepalive_interval(Duration::from_secs(60))
//!     .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(20))))
//!     .with_default_observability()
//!     .service_name("pool-bridge")
//!     .build()?;
//! coordinator.start().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ConnectionConfig;
use crate::coordinator::Coordinator;
use crate::metrics::ClientMetrics;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::transport::{TcpTransport, Transport};
use iclink_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and spawning a [`Coordinator`]
pub struct CoordinatorBuilder {
    config: ConnectionConfig,
    transport: Option<Box<dyn Transport>>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl CoordinatorBuilder {
    /// Builder with default settings for `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: ConnectionConfig::new(host),
            transport: None,
            reconnect_strategy: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Replace every setting, host included
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Controller port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Keepalive probe interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Silence after which the session is considered dead
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Backoff base delay, growth factor and cap
    pub fn backoff(mut self, base: Duration, multiplier: f64, max: Duration) -> Self {
        self.config.reconnect_base_delay = base;
        self.config.reconnect_multiplier = multiplier;
        self.config.reconnect_max_delay = max;
        self
    }

    /// Consecutive failures before the circuit opens, and how long it stays open
    pub fn circuit_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.config.failure_threshold = threshold;
        self.config.circuit_cooldown = cooldown;
        self
    }

    /// Maximum attribute pairs per registration request
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// How long one request may hold the flow-control slot
    pub fn deadlock_timeout(mut self, timeout: Duration) -> Self {
        self.config.deadlock_timeout = timeout;
        self
    }

    /// How long a caller waits for a response
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Grace period before a lost connection is reported unavailable
    pub fn availability_debounce(mut self, window: Duration) -> Self {
        self.config.availability_debounce = window;
        self
    }

    /// Hold requests made while disconnected until a session is open
    pub fn queue_while_disconnected(mut self, enable: bool) -> Self {
        self.config.queue_while_disconnected = enable;
        self
    }

    /// Use a custom transport instead of TCP
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom reconnection strategy instead of the configured backoff
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Validate the settings and spawn the coordinator
    ///
    /// Must be called from within a Tokio runtime. Nothing connects until
    /// [`Coordinator::start`] is called.
    pub fn build(self) -> Result<Coordinator> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Config(
                "a coordinator must be built inside a Tokio runtime".into(),
            ));
        }

        let (telemetry, metrics) = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                let guard = iclink_core::init_observability(config.clone()).map_err(|e| {
                    Error::Config(format!("Failed to initialize observability: {}", e))
                })?;
                let metrics = Arc::new(ClientMetrics::new(config.service_name));
                (Some(guard), Some(metrics))
            }
            None => (None, None),
        };

        let strategy = self.reconnect_strategy.unwrap_or_else(|| {
            Box::new(
                ExponentialBackoff::new(
                    self.config.reconnect_base_delay,
                    self.config.reconnect_max_delay,
                )
                .with_multiplier(self.config.reconnect_multiplier),
            )
        });
        let transport = self
            .transport
            .unwrap_or_else(|| {
                Box::new(TcpTransport::new().with_write_timeout(self.config.connect_timeout))
            });

        tracing::debug!(host = %self.config.host, port = self.config.port, "Building coordinator");
        Ok(Coordinator::spawn(
            self.config,
            transport,
            strategy,
            metrics,
            telemetry,
        ))
    }
}
