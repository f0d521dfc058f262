// ── Runtime hub configuration ──
//
// Describes *how* to reach the event bus and how long to wait for a
// command to be confirmed. Carries the bearer token but never touches
// disk; `vigil-config` builds one from a profile and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;
use vigil_api::ReconnectConfig;

/// Default window for the backend to echo a sent value before the
/// optimistic display is reverted.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`Hub`](crate::Hub).
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Event bus endpoint (e.g., `ws://nvr.local:5000/ws`).
    pub url: Url,
    /// Bearer token sent on the WebSocket upgrade, if the bus requires one.
    pub token: Option<SecretString>,
    /// Backoff policy for the shared connection.
    pub reconnect: ReconnectConfig,
    /// How long a sent value stays pending before it is reverted.
    pub confirm_timeout: Duration,
}

impl HubConfig {
    /// Config with default reconnect policy and confirmation window.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            token: None,
            reconnect: ReconnectConfig::default(),
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_defaults() {
        let config = HubConfig::new(Url::parse("ws://nvr.local:5000/ws").unwrap());
        assert!(config.token.is_none());
        assert_eq!(config.confirm_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn builders_override_fields() {
        let config = HubConfig::new(Url::parse("wss://nvr.local/ws").unwrap())
            .with_token("abc".to_string().into())
            .with_confirm_timeout(Duration::from_millis(250));
        assert!(config.token.is_some());
        assert_eq!(config.confirm_timeout, Duration::from_millis(250));
    }
}
