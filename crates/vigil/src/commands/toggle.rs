//! `vigil toggle camera/feature`
//!
//! Reads the channel's own current value and sends its opposite.

use std::time::Duration;

use serde_json::Value;

use vigil_core::{Hub, StateChannel, Toggle};

use crate::cli::{GlobalOpts, ToggleArgs};
use crate::error::CliError;

use super::{set, util};

pub async fn handle(hub: &Hub, args: ToggleArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let key = util::parse_target(&args.target)?;
    if !key.feature().is_toggle() {
        return Err(CliError::Validation {
            field: "target".into(),
            reason: format!("'{}' is not an ON/OFF feature; use `vigil set`", key.feature()),
        });
    }

    let target = key.to_string();
    let mut channel: StateChannel<Value> = hub.bind(key)?;

    util::connect(hub, global).await?;

    let current = util::await_value(&mut channel, Duration::from_secs(global.timeout))
        .await
        .ok_or_else(|| CliError::NoValue {
            target: target.clone(),
            seconds: global.timeout,
        })?;

    let current: Toggle = current
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CliError::Validation {
            field: target.clone(),
            reason: format!("current value {current} is not ON or OFF"),
        })?;

    let next = serde_json::to_value(current.toggled())?;
    let report = util::send_and_reconcile(hub, &mut channel, next, args.no_wait).await?;
    set::print_report(&report, global);
    Ok(())
}
