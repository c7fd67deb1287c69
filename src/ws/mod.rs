//! WebSocket connection handling.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns the transport, runs the connection state
//!   machine and the bounded, fixed-interval reconnect policy
//! - [`TransportHandle`]: read-only view of the live transport
//! - [`MessageParser`]: turns incoming frames into snapshot payloads
//! - [`config`]: connection and close options
//!
//! Every transition is published to a [`Store`](crate::Store); nothing here
//! returns connection failures to the caller.

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;
mod transport;

pub use config::{CloseOptions, Config, Hook};
pub use connection::ConnectionManager;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
pub use transport::TransportHandle;
