//! Command dispatcher: routes parsed CLI commands to the engine's
//! components and owns the human/JSON output split. Grounded on this
//! codebase's `dispatch_command` top-level router, narrowed to the two
//! command groups this engine exposes.

mod data;
mod trade;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use anyhow::Result;

/// Route a parsed [`Commands`] to its handler, returning the process exit
/// code (0 success, 1 failure, 2 partial success for batch operations).
pub async fn dispatch_command(cli: Cli, config: Config) -> Result<i32> {
    match cli.command {
        Commands::Data { action } => data::dispatch(action, config, cli.json).await,
        Commands::Trade { action } => trade::dispatch(action, config, cli.json).await,
    }
}
