//! Connection lifecycle coordinator for IntelliCenter controllers
//!
//! The controller accepts one TCP session, answers requests strictly in
//! order and pushes attribute changes for whatever the client registered.
//! This crate keeps that session healthy and hides its moods from callers:
//!
//! - **Flow control**: at most one request on the wire; the rest queue in order
//! - **Keepalive**: probes fill silences, a dead session is detected and dropped
//! - **Reconnection**: exponential backoff with a circuit breaker
//! - **Registration**: consumer interest is registered in bounded batches
//!   after every handshake
//! - **Dispatch**: changed objects reach only the consumers watching them
//! - **Availability**: a debounced up/down signal that ignores brief outages
//! - **Observability**: OpenTelemetry metrics and `tracing` spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use iclink_client::{ConnectionState, Coordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = Coordinator::builder("192.168.1.40").build()?;
//!
//!     coordinator
//!         .subscribe("B1101", ["STATUS", "LSTTMP"], |update: &iclink_core::ObjectUpdate| {
//!             println!("{}: {:?}", update.objnam, update.params);
//!         })
//!         .await?;
//!
//!     coordinator.start().await?;
//!     coordinator.wait_for_state(ConnectionState::Connected).await?;
//!     println!("stats: {:?}", coordinator.stats());
//!     Ok(())
//! }
//! ```

mod availability;
mod batch;
mod builder;
mod config;
mod connection_state;
mod coordinator;
mod keepalive;
mod metrics;
mod notification;
mod reconnect;
mod request;
mod subscription;
mod transport;

pub use availability::AvailabilityDebouncer;
pub use batch::{Interest, RegistrationChunk, SubscriptionBatcher};
pub use builder::CoordinatorBuilder;
pub use config::{ConnectionConfig, DEFAULT_BATCH_SIZE, DEFAULT_PORT};
pub use connection_state::ConnectionState;
pub use coordinator::Coordinator;
pub use keepalive::{KeepaliveAction, KeepaliveMonitor, LivenessFailure};
pub use metrics::{ClientMetrics, ConnectionStats, StatsSnapshot};
pub use notification::AvailabilityListener;
pub use reconnect::{
    ExponentialBackoff, FailureCounter, FixedDelay, ReconnectionController, ReconnectionStrategy,
    RetryDecision,
};
pub use subscription::{SubscriptionHandle, UpdateConsumer};
pub use transport::{SessionSink, TcpTransport, Transport, TransportEvent, DEFAULT_WRITE_TIMEOUT};
