//! iclink - resilient link to an IntelliCenter pool controller
//!
//! This is the convenience crate that re-exports the iclink sub-crates.
//!
//! # Architecture
//!
//! - **iclink-core**: wire types, line codec, error type, observability setup
//! - **iclink-client**: the connection lifecycle coordinator
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use iclink::{ConnectionState, Coordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let _telemetry = iclink::core::init_observability(Default::default())?;
//!
//!     let coordinator = Coordinator::builder("192.168.1.40").build()?;
//!     coordinator.on_availability_changed(|available| {
//!         println!("controller available: {}", available);
//!     });
//!     coordinator.start().await?;
//!     coordinator.wait_for_state(ConnectionState::Connected).await?;
//!
//!     if let Some(info) = coordinator.system_info() {
//!         println!("{} running {}", info.prop_name, info.sw_version);
//!     }
//!     Ok(())
//! }
//! ```

pub use iclink_client as client;
pub use iclink_core as core;

pub use iclink_client::{ConnectionConfig, ConnectionState, Coordinator, CoordinatorBuilder};
pub use iclink_core::{Error, Result};
