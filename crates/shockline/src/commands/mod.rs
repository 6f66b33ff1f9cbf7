//! Command dispatch: bridges CLI args -> engine -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod run;
pub mod status;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(args, global).await,
        Command::Status(args) => status::handle(args, global).await,
        Command::Devices(args) => devices::handle(args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
