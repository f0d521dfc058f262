//! `vigil tail topic...`: raw bus messages, no reconciliation.
//!
//! Uses the connection's per-topic streams directly, which survive
//! reconnects and resubscribe on their own.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use vigil_api::BusConnection;
use vigil_core::{CoreError, HubConfig};

use crate::cli::{GlobalOpts, OutputFormat, TailArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

pub async fn handle(config: HubConfig, args: TailArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let url = config.url.to_string();
    let connection = BusConnection::connect(
        config.url,
        config.reconnect,
        CancellationToken::new(),
        config.token,
    )
    .map_err(CoreError::from)?;

    let result = tail(&connection, &url, &args, global).await;
    connection.shutdown();
    result
}

async fn tail(
    connection: &BusConnection,
    url: &str,
    args: &TailArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut state = connection.state();
    let waited = tokio::time::timeout(
        Duration::from_secs(global.timeout),
        state.wait_for(|s| s.is_open() || *s == vigil_api::LinkState::Closed),
    )
    .await
    .map(|r| r.map(|s| s.is_open()));
    if !matches!(waited, Ok(Ok(true))) {
        if let Some(err) = connection.last_error() {
            return Err(util::link_error(CoreError::from_link_failure(url, &err), global));
        }
        return Err(match waited {
            Err(_) => CliError::Timeout {
                seconds: global.timeout,
            },
            Ok(_) => CliError::ConnectionFailed {
                url: url.to_owned(),
                reason: "connection closed before it opened".into(),
            },
        });
    }

    // One stream per distinct topic: the streams are not reference counted.
    let mut topics: Vec<&str> = Vec::with_capacity(args.topics.len());
    for topic in &args.topics {
        if !topics.contains(&topic.as_str()) {
            topics.push(topic.as_str());
        }
    }
    let mut messages = stream::select_all(
        topics
            .into_iter()
            .map(|topic| Box::pin(connection.subscribe(topic))),
    );

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = messages.next() => {
                let Some(message) = message else { break };
                let line = match global.output {
                    OutputFormat::Json | OutputFormat::JsonCompact => {
                        output::render_json(message.as_ref(), true)
                    }
                    OutputFormat::Table | OutputFormat::Plain => format!(
                        "{} {}{}",
                        message.topic,
                        message.payload,
                        if message.retain { " (retained)" } else { "" },
                    ),
                };
                output::print_output(&line, global.quiet);

                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }

    Ok(())
}
