//! Command dispatch: bridges CLI args -> hub channels -> output formatting.

pub mod config_cmd;
pub mod get;
pub mod set;
pub mod status;
pub mod tail;
pub mod toggle;
pub mod util;
pub mod watch;

use vigil_core::Hub;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a hub-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    hub: &Hub,
    profile_cameras: &[String],
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Status(args) => status::handle(hub, args, profile_cameras, global).await,
        Command::Watch(args) => watch::handle(hub, args, profile_cameras, global).await,
        Command::Get(args) => get::handle(hub, args, global).await,
        Command::Set(args) => set::handle(hub, args, global).await,
        Command::Toggle(args) => toggle::handle(hub, args, global).await,
        // Handled before a hub is built
        Command::Tail(_) | Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not use the shared hub".into(),
        )),
    }
}
