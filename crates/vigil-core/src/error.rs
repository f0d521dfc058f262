// ── Core error types ──
//
// Consumer-facing errors from vigil-core. Callers never see raw
// WebSocket or JSON failures; the `From<vigil_api::Error>` impl
// translates transport-layer errors into these variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to event bus at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The bus refused the handshake credentials (HTTP 401/403).
    #[error("Event bus at {url} rejected the credentials (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    /// A command was sent while the shared link is not open.
    #[error("Not connected to the event bus (cannot publish to {topic})")]
    NotConnected { topic: String },

    #[error("Event bus connection is shut down")]
    Disconnected,

    #[error("Event bus did not become ready within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Topic errors ─────────────────────────────────────────────────
    #[error("Invalid topic component '{value}': {reason}")]
    InvalidTopic { value: String, reason: String },

    /// The binder no longer holds the topic (already unbound).
    #[error("Not bound to {topic}")]
    NotBound { topic: String },

    #[error("Cannot encode value for {topic}: {message}")]
    Encode { topic: String, message: String },

    // ── Runtime errors ───────────────────────────────────────────────
    #[error("No Tokio runtime available to start the event bus")]
    NoRuntime,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` when retrying after a reconnect may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. } | Self::ConnectionFailed { .. } | Self::Timeout { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl CoreError {
    /// Describe why the link to `url` is not open, from the error that
    /// ended the last connection attempt.
    pub fn from_link_failure(url: &str, err: &vigil_api::Error) -> Self {
        match err {
            vigil_api::Error::Rejected { status } => CoreError::Unauthorized {
                url: url.to_owned(),
                status: *status,
            },
            other => CoreError::ConnectionFailed {
                url: url.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<vigil_api::Error> for CoreError {
    fn from(err: vigil_api::Error) -> Self {
        match err {
            vigil_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            vigil_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            vigil_api::Error::Rejected { status } => CoreError::Unauthorized {
                url: String::new(),
                status,
            },
            vigil_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            vigil_api::Error::UnsupportedScheme(scheme) => CoreError::Config {
                message: format!("Unsupported URL scheme '{scheme}' (expected ws or wss)"),
            },
            vigil_api::Error::NotConnected => CoreError::NotConnected {
                topic: String::new(),
            },
            vigil_api::Error::Closed => CoreError::Disconnected,
            vigil_api::Error::Decode { message, body: _ } => {
                CoreError::Internal(format!("Decode error: {message}"))
            }
            vigil_api::Error::Encode(e) => CoreError::Encode {
                topic: String::new(),
                message: e.to_string(),
            },
        }
    }
}
