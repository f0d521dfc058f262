//! `vigil get camera/feature`

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use vigil_core::{Hub, StateChannel};

use crate::cli::{GetArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
struct FeatureValue {
    target: String,
    value: Value,
    updated_at: Option<DateTime<Utc>>,
}

pub async fn handle(hub: &Hub, args: GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let key = util::parse_target(&args.target)?;
    let target = key.to_string();
    let mut channel: StateChannel<Value> = hub.bind(key)?;

    util::connect(hub, global).await?;

    let within = Duration::from_secs(global.timeout);
    let value = util::await_value(&mut channel, within)
        .await
        .ok_or_else(|| CliError::NoValue {
            target: target.clone(),
            seconds: global.timeout,
        })?;

    let result = FeatureValue {
        target,
        value,
        updated_at: channel.snapshot().updated_at,
    };
    let color = output::should_color(&global.color);

    let out = output::render_single(
        &global.output,
        &result,
        |r| {
            let text = output::format_value(Some(&r.value));
            format!("{}  {}", r.target, output::paint_value(&text, color))
        },
        |r| output::format_value(Some(&r.value)),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
