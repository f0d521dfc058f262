//! Live camera state channels on top of `vigil-api`.
//!
//! This crate turns one shared event-bus connection into many typed,
//! per-camera state channels:
//!
//! - **[`Hub`]**: Process-wide facade. Lazily starts the connection, the
//!   topic registry, and two background tasks (inbound dispatcher and link
//!   listener) on first use. Vends channels such as
//!   [`detect_state()`](Hub::detect_state) and
//!   [`audio_state()`](Hub::audio_state).
//!
//! - **[`TopicRegistry`]**: Reference-counted subscriptions (`DashMap` +
//!   `tokio::sync::watch` per topic). N bindings of a topic cost one wire
//!   subscription; reconnects replay one subscribe per bound topic.
//!
//! - **[`StateChannel<T>`]**: RAII binding exposing `current_value()`,
//!   `send()`, `changed()`, and a `Stream` adapter.
//!
//! - **Reconciliation** ([`reconcile`]): Optimistic command display with
//!   confirmation, override, timeout, and link-loss handling.

pub mod channel;
pub mod config;
pub mod error;
pub mod hub;
pub mod reconcile;
pub mod registry;
pub mod topic;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{ChannelState, ChannelStream, StateChannel};
pub use config::{DEFAULT_CONFIRM_TIMEOUT, HubConfig};
pub use error::CoreError;
pub use hub::Hub;
pub use reconcile::{BinderId, CommandId, PendingCommand, Reconciliation, TopicState};
pub use registry::{Binding, TopicRegistry};
pub use topic::{Feature, StateValue, Toggle, Topic, TopicKey};
pub use transport::{MemoryTransport, Transport};

// Link lifecycle and reconnect policy come straight from the API crate.
pub use vigil_api::{LinkState, ReconnectConfig};
