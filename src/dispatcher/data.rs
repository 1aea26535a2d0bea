//! `data` command handlers. Grounded on this codebase's transaction
//! dispatcher's dual JSON/human output split, narrowed to the two
//! operations this command group exposes.

use crate::cli::DataCommands;
use crate::config::Config;
use crate::data_service::DataService;
use crate::db;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use colored::Colorize;
use std::sync::Arc;

pub async fn dispatch(action: DataCommands, config: Config, json_output: bool) -> Result<i32> {
    match action {
        DataCommands::Download {
            symbols,
            comprehensive,
            financial_only,
            start_date,
        } => {
            download(config, symbols, comprehensive, financial_only, start_date, json_output).await
        }
        DataCommands::Query {
            symbol,
            start_date,
            end_date,
            limit,
        } => query(config, symbol, start_date, end_date, limit, json_output).await,
    }
}

async fn download(
    mut config: Config,
    symbols: Vec<String>,
    comprehensive: bool,
    financial_only: bool,
    start_date: Option<String>,
    json_output: bool,
) -> Result<i32> {
    if symbols.is_empty() {
        return Err(anyhow::anyhow!("at least one symbol is required"));
    }
    if let Some(s) = &start_date {
        config.history_start_default =
            NaiveDate::parse_from_str(s, "%Y-%m-%d").context("invalid --start-date, expected YYYY-MM-DD")?;
    }

    let conn = db::open_db(Some(config.db_path.clone()))?;

    let service = Arc::new(DataService::new(config)?);
    let results = service
        .batch(
            conn,
            symbols,
            !financial_only,
            comprehensive || financial_only,
        )
        .await;

    let all_succeeded = results.iter().all(|r| r.success);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for r in &results {
            if r.success {
                println!(
                    "{} {} strategy={} rows_added={} financial_refreshed={}",
                    "✓".green().bold(),
                    r.symbol.cyan().bold(),
                    r.strategy_used.as_deref().unwrap_or("-"),
                    r.rows_added,
                    r.financial_refreshed,
                );
            } else {
                println!(
                    "{} {} {}: {}",
                    "✗".red().bold(),
                    r.symbol.cyan().bold(),
                    r.error_category.as_deref().unwrap_or("error"),
                    r.error_message.as_deref().unwrap_or("unknown failure"),
                );
            }
        }
    }

    Ok(if all_succeeded { 0 } else { 2 })
}

async fn query(
    config: Config,
    symbol: String,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<usize>,
    json_output: bool,
) -> Result<i32> {
    let start = start_date
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()
        .context("invalid --start-date, expected YYYY-MM-DD")?;
    let end = end_date
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()
        .context("invalid --end-date, expected YYYY-MM-DD")?;

    let conn = db::open_db(Some(config.db_path))?;

    let mut rows = db::get_prices(&conn, &symbol, start, end)?;
    if let Some(limit) = limit {
        if rows.len() > limit {
            rows = rows.split_off(rows.len() - limit);
        }
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No price rows found for {}", symbol);
    } else {
        for row in &rows {
            println!(
                "{} open={} high={} low={} close={} adj_close={} volume={}",
                row.date, row.open, row.high, row.low, row.close, row.adj_close, row.volume,
            );
        }
    }

    Ok(0)
}
