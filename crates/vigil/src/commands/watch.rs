//! `vigil watch`: stream reconciled feature changes until Ctrl-C.

use chrono::{DateTime, Local, Utc};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use vigil_core::{ChannelState, CoreError, Hub, LinkState, Reconciliation, StateChannel, TopicKey};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
struct ChangeEvent {
    target: String,
    value: Option<Value>,
    pending: bool,
    outcome: Option<Reconciliation>,
    updated_at: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    fn new(key: &TopicKey, state: ChannelState<Value>) -> Self {
        Self {
            target: key.to_string(),
            value: state.value,
            pending: state.pending,
            outcome: state.outcome,
            updated_at: state.updated_at,
        }
    }

    fn line(&self, color: bool) -> String {
        let at = self.updated_at.map_or_else(
            || "--:--:--".to_owned(),
            |t| t.with_timezone(&Local).format("%H:%M:%S").to_string(),
        );
        let text = output::format_value(self.value.as_ref());
        format!(
            "{at}  {:<32} {:<6} {}",
            self.target,
            output::paint_value(&text, color),
            output::paint_outcome(self.outcome, self.pending, color),
        )
    }
}

pub async fn handle(
    hub: &Hub,
    args: WatchArgs,
    profile_cameras: &[String],
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let cameras = util::cameras_or_profile(args.cameras, profile_cameras)?;
    let features = util::features_or_dashboard(&args.features)?;

    let mut streams: Vec<BoxStream<'static, ChangeEvent>> = Vec::new();
    for camera in &cameras {
        for feature in &features {
            let key = TopicKey::new(camera.as_str(), feature.clone())?;
            let channel: StateChannel<Value> = hub.bind(key.clone())?;
            streams.push(
                channel
                    .into_stream()
                    .map(move |state| ChangeEvent::new(&key, state))
                    .boxed(),
            );
        }
    }
    let mut changes = stream::select_all(streams);

    util::connect(hub, global).await?;
    let mut link = hub.connection_state()?;
    link.mark_unchanged();
    info!(topics = cameras.len() * features.len(), "watching");

    let color = output::should_color(&global.color);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = link.borrow_and_update().clone();
                if state == LinkState::Closed {
                    return Err(CoreError::Disconnected.into());
                }
                if !global.quiet {
                    eprintln!("link {}", util::describe_link(&state));
                }
            }
            event = changes.next() => {
                let Some(event) = event else { break };
                // The initial state of a never-seen topic carries nothing.
                if event.value.is_none() && event.outcome.is_none() {
                    continue;
                }
                let line = match global.output {
                    OutputFormat::Table => event.line(color),
                    OutputFormat::Plain => event.line(false),
                    OutputFormat::Json | OutputFormat::JsonCompact => {
                        output::render_json(&event, true)
                    }
                };
                output::print_output(&line, global.quiet);
            }
        }
    }

    Ok(())
}
