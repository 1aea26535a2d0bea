mod cli;
mod config;
mod data_service;
mod db;
mod dispatcher;
mod error;
mod ledger;
mod matchers;
mod pnl;
mod policy;
mod providers;
mod utils;

use clap::Parser;
use cli::Cli;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let stdout_is_tty = std::io::stdout().is_terminal();
    let disable_color = cli.no_color || !stdout_is_tty || cli.json;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_ansi(!disable_color)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();

    if disable_color {
        colored::control::set_override(false);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }

    dispatcher::dispatch_command(cli, config).await
}
