use thiserror::Error;

/// Top-level error type for the `vigil-api` crate.
///
/// Covers every failure mode of the bus connection: transport,
/// wire protocol, and local misuse (publishing while offline).
/// `vigil-core` maps these into consumer-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection failed (handshake, DNS, refused, TLS).
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly mid-session.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The server refused the upgrade with 401 or 403. Retrying with the
    /// same credentials cannot succeed.
    #[error("Event bus rejected the handshake (HTTP {status})")]
    Rejected { status: u16 },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The bus endpoint must be a `ws://` or `wss://` URL.
    #[error("Unsupported URL scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// A publish was attempted while the link is not open.
    #[error("Not connected to the event bus")]
    NotConnected,

    /// The background connection task has exited.
    #[error("Event bus connection is shut down")]
    Closed,

    // ── Data ────────────────────────────────────────────────────────
    /// An inbound frame could not be decoded, with the raw text for debugging.
    #[error("Decode error: {message}")]
    Decode { message: String, body: String },

    /// An outbound frame could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::NotConnected
        )
    }

    /// Returns `true` if the server refused our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
