//! Command-line surface: `data` acquisition commands and `trade`
//! ledger/PnL commands. Grounded on this codebase's clap-derive
//! `Cli`/`Commands` shape, narrowed from six top-level subcommand groups
//! to the two this engine exposes.

pub mod formatters;
pub mod specific_lots;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "equity-ledger")]
#[command(version, about = "Equity ledger: price acquisition, cost-basis ledger and daily PnL")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit machine-readable JSON instead of human-readable tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Override the configured database path
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Path to an `equity-ledger.toml` configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Acquire and inspect stored price/fundamentals data
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },

    /// Record trades and compute cost-basis/PnL against the ledger
    Trade {
        #[command(subcommand)]
        action: TradeCommands,
    },
}

#[derive(Subcommand)]
pub enum DataCommands {
    /// Bring one or more symbols' stored price history up to date
    Download {
        /// Symbols to acquire
        symbols: Vec<String>,

        /// Also refresh financial statements when stale
        #[arg(long)]
        comprehensive: bool,

        /// Refresh financial statements only, skip price acquisition
        #[arg(long)]
        financial_only: bool,

        /// Override the bulk-fetch start date (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,
    },

    /// Query stored price rows for a symbol
    Query {
        /// Symbol to query
        symbol: String,

        #[arg(long)]
        start_date: Option<String>,

        #[arg(long)]
        end_date: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum TradeCommands {
    /// Record a BUY, opening a new cost-basis lot
    Buy {
        #[arg(long)]
        owner: String,

        #[arg(short = 's', long)]
        symbol: String,

        #[arg(short = 'q', long)]
        quantity: String,

        #[arg(short = 'p', long)]
        price: String,

        #[arg(short = 'd', long)]
        date: String,

        #[arg(long, default_value = "0")]
        commission: String,

        #[arg(long)]
        external_id: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Record a SELL, consuming open lots per the chosen cost-basis method
    Sell {
        #[arg(long)]
        owner: String,

        #[arg(short = 's', long)]
        symbol: String,

        #[arg(short = 'q', long)]
        quantity: String,

        #[arg(short = 'p', long)]
        price: String,

        #[arg(short = 'd', long)]
        date: String,

        #[arg(long, default_value = "0")]
        commission: String,

        /// Cost-basis matching method
        #[arg(long, default_value = "fifo", value_parser = ["fifo", "lifo", "specific", "average"])]
        basis: String,

        /// Required when --basis=specific: comma-separated `lot=<id>:<qty>` pairs
        #[arg(long)]
        specific_lots: Option<String>,

        #[arg(long)]
        external_id: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// List every symbol an owner currently holds, with aggregate cost basis
    Positions {
        #[arg(long)]
        owner: String,
    },

    /// List open lots for an owner+symbol
    Lots {
        #[arg(long)]
        owner: String,

        #[arg(short = 's', long)]
        symbol: String,
    },

    /// List the sale allocations recorded for an owner+symbol
    Sales {
        #[arg(long)]
        owner: String,

        #[arg(short = 's', long)]
        symbol: String,
    },

    /// Compute and persist one day's mark-to-market valuation
    CalculatePnl {
        #[arg(long)]
        owner: String,

        #[arg(short = 's', long)]
        symbol: String,

        #[arg(long)]
        date: String,

        /// Which stored price column to value against
        #[arg(long, default_value = "adj_close", value_parser = ["close", "adj_close"])]
        basis: String,
    },

    /// Compute and persist valuations across a date range
    BatchCalculate {
        #[arg(long)]
        owner: String,

        #[arg(short = 's', long)]
        symbol: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Skip Saturdays and Sundays
        #[arg(long)]
        only_trading_days: bool,

        #[arg(long, default_value = "adj_close", value_parser = ["close", "adj_close"])]
        basis: String,
    },
}
