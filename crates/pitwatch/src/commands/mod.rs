//! Command dispatch: bridges CLI args -> core Bridge operations -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod history;
pub mod send;
pub mod serve;
pub mod status;
pub mod util;
pub mod watch;

use pitwatch_core::BridgeConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch an account-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: BridgeConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices => devices::handle(config, global).await,
        Command::Status(args) => status::handle(config, args, false, global).await,
        Command::Refresh(args) => status::handle(config, args, true, global).await,
        Command::Command(args) => send::handle(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::History(args) => history::handle(config, args, global).await,
        // Handled before dispatch
        Command::Config(_) | Command::Completions(_) | Command::Serve(_) => Err(
            CliError::Internal("command does not go through account dispatch".into()),
        ),
    }
}
