//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use vigil_config::ConfigError;
use vigil_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to event bus at {url}")]
    #[diagnostic(
        code(vigil::connection_failed),
        help(
            "Check that the NVR is running and its event bus is reachable.\n\
             URL: {url}\n\
             Try: vigil --url ws://<host>:5000/ws status <camera>"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Not connected to the event bus; {topic} was not sent")]
    #[diagnostic(
        code(vigil::not_connected),
        help("The link dropped before the command could be published. Retry once it reconnects.")
    )]
    NotConnected { topic: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Event bus rejected the connection for profile '{profile}'")]
    #[diagnostic(
        code(vigil::auth_failed),
        help(
            "Verify the bearer token.\n\
             Run: vigil config set-token --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    // ── Reconciliation ───────────────────────────────────────────────
    #[error("{target} was not confirmed within {seconds}s; display reverted")]
    #[diagnostic(
        code(vigil::not_confirmed),
        help("The backend never echoed the value. Check that the camera exists and is online.")
    )]
    NotConfirmed { target: String, seconds: u64 },

    #[error("{target} was overridden by the backend: requested {requested}, now {actual}")]
    #[diagnostic(code(vigil::overridden))]
    Overridden {
        target: String,
        requested: String,
        actual: String,
    },

    #[error("{target} command was discarded when the connection dropped")]
    #[diagnostic(code(vigil::discarded), help("Retry once the link is back."))]
    Discarded { target: String },

    // ── Values ───────────────────────────────────────────────────────
    #[error("No value received for {target} within {seconds}s")]
    #[diagnostic(
        code(vigil::no_value),
        help("The backend publishes retained state per camera. Check the camera and feature names.")
    )]
    NoValue { target: String, seconds: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(vigil::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(vigil::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: vigil config init --url <ws-url> --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No event bus configured")]
    #[diagnostic(
        code(vigil::no_config),
        help(
            "Create a profile with: vigil config init --url <ws-url>\n\
             Or pass --url / set VIGIL_URL.\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("No cameras given")]
    #[diagnostic(
        code(vigil::no_cameras),
        help("Name cameras on the command line or set them on the profile:\n  vigil config set cameras front_door,garage")
    )]
    NoCameras,

    #[error(transparent)]
    #[diagnostic(code(vigil::config))]
    Config(ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s waiting for the event bus")]
    #[diagnostic(
        code(vigil::timeout),
        help("Increase the wait with --timeout or check the bus URL.")
    )]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    #[diagnostic(code(vigil::internal))]
    Internal(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(vigil::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected { .. } | Self::Discarded { .. } => {
                exit_code::CONNECTION
            }
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::ProfileNotFound { .. } | Self::NoValue { .. } => exit_code::NOT_FOUND,
            Self::Overridden { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } | Self::NotConfirmed { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::NoCameras => exit_code::USAGE,
            Self::Config(err) => match err {
                ConfigError::Validation { .. } | ConfigError::NoProfile => exit_code::USAGE,
                ConfigError::UnknownProfile { .. } => exit_code::NOT_FOUND,
                _ => exit_code::GENERAL,
            },
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoProfile => CliError::NoConfig {
                path: vigil_config::config_path().display().to_string(),
            },
            other => CliError::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::Unauthorized { .. } => CliError::AuthFailed {
                profile: "current".into(),
            },

            CoreError::NotConnected { topic } => CliError::NotConnected { topic },

            CoreError::Disconnected => CliError::ConnectionFailed {
                url: "(closed)".into(),
                reason: "event bus connection is shut down".into(),
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::InvalidTopic { value, reason } => CliError::Validation {
                field: "target".into(),
                reason: format!("'{value}' {reason}"),
            },

            CoreError::Config { message } => CliError::Validation {
                field: "url".into(),
                reason: message,
            },

            CoreError::Encode { topic, message } => CliError::Validation {
                field: topic,
                reason: message,
            },

            CoreError::NotBound { topic } => CliError::Internal(format!("not bound to {topic}")),
            CoreError::NoRuntime => CliError::Internal("no async runtime".into()),
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
