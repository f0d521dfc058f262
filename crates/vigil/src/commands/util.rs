//! Shared helpers for command handlers.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use vigil_core::{
    ChannelState, CoreError, Feature, Hub, LinkState, Reconciliation, StateChannel, StateValue,
    Toggle, TopicKey,
};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

/// How long `set` waits for the retained value before sending anyway.
pub const SETTLE: Duration = Duration::from_millis(1500);

/// Slack on top of the confirmation window before `set` gives up waiting.
const OUTCOME_GRACE: Duration = Duration::from_secs(1);

/// Parse `camera/feature`.
pub fn parse_target(target: &str) -> Result<TopicKey, CliError> {
    target.parse::<TopicKey>().map_err(CliError::from)
}

/// Cameras from the command line, falling back to the profile's list.
pub fn cameras_or_profile(given: Vec<String>, profile: &[String]) -> Result<Vec<String>, CliError> {
    let cameras = if given.is_empty() {
        profile.to_vec()
    } else {
        given
    };
    if cameras.is_empty() {
        return Err(CliError::NoCameras);
    }
    Ok(cameras)
}

/// Parse a feature list, defaulting to the dashboard toggles.
pub fn features_or_dashboard(given: &[String]) -> Result<Vec<Feature>, CliError> {
    if given.is_empty() {
        return Ok(Feature::DASHBOARD.to_vec());
    }
    given
        .iter()
        .map(|name| {
            name.parse::<Feature>().map_err(|_| CliError::Validation {
                field: "features".into(),
                reason: format!("'{name}' is not a valid feature name"),
            })
        })
        .collect()
}

/// Parse a command value for `feature`: ON/OFF for toggles, an integer
/// for thresholds, JSON (or a bare string) for anything else.
pub fn parse_command_value(feature: &Feature, raw: &str) -> Result<Value, CliError> {
    match feature {
        Feature::MotionThreshold | Feature::MotionContourArea => {
            let n: u32 = raw.trim().parse().map_err(|_| CliError::Validation {
                field: feature.to_string(),
                reason: format!("expected a non-negative integer, got '{raw}'"),
            })?;
            Ok(Value::from(n))
        }
        Feature::Other(_) => {
            Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned())))
        }
        toggle => {
            let value: Toggle = raw.trim().parse().map_err(|_| CliError::Validation {
                field: toggle.to_string(),
                reason: format!("expected ON or OFF, got '{raw}'"),
            })?;
            Ok(serde_json::to_value(value)?)
        }
    }
}

/// Start the hub and wait for the link within `--timeout`.
pub async fn connect(hub: &Hub, global: &GlobalOpts) -> Result<(), CliError> {
    hub.wait_until_open(Duration::from_secs(global.timeout))
        .await
        .map_err(|err| link_error(err, global))
}

/// Name the profile whose credentials were refused.
pub fn link_error(err: CoreError, global: &GlobalOpts) -> CliError {
    match err {
        CoreError::Unauthorized { .. } => CliError::AuthFailed {
            profile: config::active_profile_name(global, &config::load_config_or_default()),
        },
        other => other.into(),
    }
}

/// Human-readable link state.
pub fn describe_link(state: &LinkState) -> String {
    match state {
        LinkState::Connecting => "connecting".into(),
        LinkState::Open => "open".into(),
        LinkState::Retrying { attempt } => format!("retrying (attempt {attempt})"),
        LinkState::Closed => "closed".into(),
    }
}

/// Wait up to `within` for the channel's first value.
pub async fn await_value<T: StateValue>(
    channel: &mut StateChannel<T>,
    within: Duration,
) -> Option<T> {
    tokio::time::timeout(within, channel.wait_for_value())
        .await
        .ok()
        .flatten()
}

/// Result of a sent command, for rendering.
#[derive(Debug, Serialize)]
pub struct CommandReport {
    pub target: String,
    pub requested: Value,
    pub value: Option<Value>,
    pub outcome: Option<Reconciliation>,
}

/// Send `value` and, unless `no_wait`, wait for the reconciliation.
///
/// Confirmed resolves to `Ok`; override, timeout, and link loss map to
/// their CLI errors.
pub async fn send_and_reconcile(
    hub: &Hub,
    channel: &mut StateChannel<Value>,
    value: Value,
    no_wait: bool,
) -> Result<CommandReport, CliError> {
    let target = channel.key().to_string();
    channel.send(value.clone())?;
    debug!(%target, %value, "command published");

    if no_wait {
        let snapshot = channel.snapshot();
        return Ok(CommandReport {
            target,
            requested: value,
            value: snapshot.value,
            outcome: None,
        });
    }

    let window = hub.registry()?.confirm_timeout();
    let settled = tokio::time::timeout(window + OUTCOME_GRACE, settle(channel))
        .await
        .ok()
        .flatten();

    let Some(state) = settled else {
        return Err(CliError::NotConfirmed {
            target,
            seconds: window.as_secs(),
        });
    };

    match state.outcome {
        Some(Reconciliation::Confirmed) => Ok(CommandReport {
            target,
            requested: value,
            value: state.value,
            outcome: state.outcome,
        }),
        Some(Reconciliation::Overridden | Reconciliation::External) => Err(CliError::Overridden {
            target,
            requested: output::format_value(Some(&value)),
            actual: output::format_value(state.value.as_ref()),
        }),
        Some(Reconciliation::TimedOut) | None => Err(CliError::NotConfirmed {
            target,
            seconds: window.as_secs(),
        }),
        Some(Reconciliation::Discarded) => Err(CliError::Discarded { target }),
    }
}

/// Wait until nothing is pending on the channel.
async fn settle(channel: &mut StateChannel<Value>) -> Option<ChannelState<Value>> {
    loop {
        let state = channel.snapshot();
        if !state.pending {
            return Some(state);
        }
        channel.changed().await?;
    }
}
