//! Core wire types and codec for iclink
//!
//! This crate holds the pieces of the controller protocol that do not depend
//! on a live session:
//!
//! - **Types**: requests, responses, push notifications and the parameter
//!   shapes of the commands the client issues
//! - **Codec**: `\r\n` line framing and message classification
//! - **Error handling**: the error taxonomy shared by every iclink crate
//! - **Observability**: `tracing` subscriber and OpenTelemetry export setup
//!
//! The crate is transport-agnostic. `iclink-client` builds the connection
//! coordinator and the TCP transport on top of it.
//!
//! # Example
//!
//! ```rust
//! use iclink_core::{codec, commands, Params, Request};
//!
//! let request = Request::new(1, commands::GET_PARAM_LIST, Params::new());
//! let frame = codec::encode_request(&request).unwrap();
//! assert!(frame.ends_with("\r\n"));
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, ObservabilityConfig, TelemetryGuard};
pub use types::{
    commands, AttributeQuery, AttributeValues, Message, Notification, ObjectUpdate, Params,
    Request, Response, SystemInfo, RESPONSE_OK, SYSTEM_OBJECT,
};
