//! `vigil set camera/feature value`

use serde_json::Value;
use tracing::debug;

use vigil_core::{Hub, StateChannel};

use crate::cli::{GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

use super::util::{self, CommandReport};

pub async fn handle(hub: &Hub, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let key = util::parse_target(&args.target)?;
    let value = util::parse_command_value(key.feature(), &args.value)?;
    let mut channel: StateChannel<Value> = hub.bind(key)?;

    util::connect(hub, global).await?;

    // Let the retained value land first so it can't override the command.
    if util::await_value(&mut channel, util::SETTLE).await.is_none() {
        debug!(target = %channel.key(), "no retained value; sending anyway");
    }

    let report = util::send_and_reconcile(hub, &mut channel, value, args.no_wait).await?;
    print_report(&report, global);
    Ok(())
}

pub(super) fn print_report(report: &CommandReport, global: &GlobalOpts) {
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        report,
        |r| {
            let text = output::format_value(r.value.as_ref());
            format!(
                "{}  {}  {}",
                r.target,
                output::paint_value(&text, color),
                output::paint_outcome(r.outcome, r.outcome.is_none(), color),
            )
        },
        |r| output::format_value(r.value.as_ref()),
    );
    output::print_output(&out, global.quiet);
}
