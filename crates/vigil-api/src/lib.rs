//! Async client for an NVR event bus: one WebSocket, many state topics.
//!
//! - [`BusConnection`] owns the socket, reconnects with backoff, and fans
//!   inbound [`BusMessage`]s out to any number of receivers.
//! - [`protocol`] defines the JSON frames on the wire.
//!
//! Reference counting, caching, and optimistic commands live one layer up
//! in `vigil-core`.

pub mod connection;
pub mod error;
pub mod protocol;

pub use connection::{BusConnection, LinkState, ReconnectConfig};
pub use error::Error;
pub use protocol::{BusMessage, ClientFrame};
