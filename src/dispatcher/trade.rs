//! `trade` command handlers. Grounded on this codebase's transaction
//! dispatcher's dual JSON/human output split, extended with the
//! cost-basis method and specific-lot parsing this engine's ledger needs.

use crate::cli::specific_lots::parse_specific_lots;
use crate::cli::{formatters, TradeCommands};
use crate::config::Config;
use crate::db::{self, models::CostBasisMethod};
use crate::ledger;
use crate::pnl;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use colored::Colorize;
use rust_decimal::Decimal;
use std::str::FromStr;

pub async fn dispatch(action: TradeCommands, config: Config, json_output: bool) -> Result<i32> {
    match action {
        TradeCommands::Buy {
            owner,
            symbol,
            quantity,
            price,
            date,
            commission,
            external_id,
            notes,
        } => buy(config, owner, symbol, quantity, price, date, commission, external_id, notes, json_output),
        TradeCommands::Sell {
            owner,
            symbol,
            quantity,
            price,
            date,
            commission,
            basis,
            specific_lots,
            external_id,
            notes,
        } => sell(
            config, owner, symbol, quantity, price, date, commission, basis, specific_lots,
            external_id, notes, json_output,
        ),
        TradeCommands::Positions { owner } => positions(config, owner, json_output),
        TradeCommands::Lots { owner, symbol } => lots(config, owner, symbol, json_output),
        TradeCommands::Sales { owner, symbol } => sales(config, owner, symbol, json_output),
        TradeCommands::CalculatePnl {
            owner,
            symbol,
            date,
            basis,
        } => calculate_pnl(config, owner, symbol, date, basis, json_output),
        TradeCommands::BatchCalculate {
            owner,
            symbol,
            start,
            end,
            only_trading_days,
            basis,
        } => batch_calculate(config, owner, symbol, start, end, only_trading_days, basis, json_output),
    }
}

fn parse_decimal(label: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid {}, must be a decimal number", label))
}

fn parse_date(label: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid {}, expected YYYY-MM-DD", label))
}

#[allow(clippy::too_many_arguments)]
fn buy(
    config: Config,
    owner: String,
    symbol: String,
    quantity: String,
    price: String,
    date: String,
    commission: String,
    external_id: Option<String>,
    notes: Option<String>,
    json_output: bool,
) -> Result<i32> {
    let quantity = parse_decimal("quantity", &quantity)?;
    let price = parse_decimal("price", &price)?;
    let commission = parse_decimal("commission", &commission)?;
    let transaction_date = parse_date("date", &date)?;

    let mut conn = db::open_db(Some(config.db_path))?;
    db::ensure_stock(&conn, &symbol)?;

    let outcome = ledger::record_buy(
        &mut conn, &owner, &symbol, quantity, price, commission, transaction_date, external_id, notes,
    )?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome.lot)?);
    } else {
        println!("{} BUY recorded", "✓".green().bold());
        println!("  Lot ID:         {}", outcome.lot.id.unwrap_or_default());
        println!("  Symbol:         {}", symbol.cyan().bold());
        println!("  Quantity:       {}", outcome.lot.original_quantity);
        println!("  Cost basis/sh:  {}", crate::utils::format_currency(outcome.lot.cost_basis_per_share));
    }
    Ok(0)
}

#[allow(clippy::too_many_arguments)]
fn sell(
    config: Config,
    owner: String,
    symbol: String,
    quantity: String,
    price: String,
    date: String,
    commission: String,
    basis: String,
    specific_lots: Option<String>,
    external_id: Option<String>,
    notes: Option<String>,
    json_output: bool,
) -> Result<i32> {
    let quantity = parse_decimal("quantity", &quantity)?;
    let price = parse_decimal("price", &price)?;
    let commission = parse_decimal("commission", &commission)?;
    let transaction_date = parse_date("date", &date)?;
    let method = CostBasisMethod::from_str(&basis)
        .map_err(|_| anyhow::anyhow!("invalid --basis {:?}", basis))?;

    let lots = match (&method, &specific_lots) {
        (CostBasisMethod::Specific, Some(raw)) => Some(parse_specific_lots(raw)?),
        (CostBasisMethod::Specific, None) => {
            return Err(anyhow::anyhow!("--specific-lots is required when --basis=specific"))
        }
        _ => None,
    };

    let mut conn = db::open_db(Some(config.db_path))?;

    let outcome = ledger::record_sell(
        &mut conn, &owner, &symbol, quantity, price, commission, transaction_date, method,
        lots.as_deref(), external_id, notes,
    )?;

    let realized_total: Decimal = outcome.allocations.iter().map(|a| a.realized_pnl).sum();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome.allocations)?);
    } else {
        println!("{} SELL recorded, {} allocation(s)", "✓".green().bold(), outcome.allocations.len());
        for a in &outcome.allocations {
            println!(
                "  lot {} qty={} realized_pnl={}",
                a.lot_id, a.quantity_sold, crate::utils::format_currency(a.realized_pnl),
            );
        }
        println!("  Total realized: {}", crate::utils::format_currency(realized_total).bold());
    }
    Ok(0)
}

fn positions(config: Config, owner: String, json_output: bool) -> Result<i32> {
    let conn = db::open_db(Some(config.db_path))?;

    let symbols = db::list_held_symbols(&conn, &owner)?;
    let summaries = symbols
        .iter()
        .map(|s| db::get_position_summary(&conn, &owner, s))
        .collect::<crate::error::Result<Vec<_>>>()?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("No open positions for {}", owner);
    } else {
        println!("{}", formatters::positions_table(&summaries));
    }
    Ok(0)
}

fn lots(config: Config, owner: String, symbol: String, json_output: bool) -> Result<i32> {
    let conn = db::open_db(Some(config.db_path))?;

    let lots = db::get_open_lots(&conn, &owner, &symbol, db::LotOrder::PurchaseDateAsc)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&lots)?);
    } else if lots.is_empty() {
        println!("No open lots for {} {}", owner, symbol);
    } else {
        println!("{}", formatters::lots_table(&lots));
    }
    Ok(0)
}

fn sales(config: Config, owner: String, symbol: String, json_output: bool) -> Result<i32> {
    let conn = db::open_db(Some(config.db_path))?;

    let allocations = db::get_allocations_for_symbol(&conn, &owner, &symbol)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&allocations)?);
    } else if allocations.is_empty() {
        println!("No sale allocations for {} {}", owner, symbol);
    } else {
        println!("{}", formatters::sales_table(&allocations));
    }
    Ok(0)
}

fn calculate_pnl(
    config: Config,
    owner: String,
    symbol: String,
    date: String,
    basis: String,
    json_output: bool,
) -> Result<i32> {
    let valuation_date = parse_date("date", &date)?;
    let price_source = db::models::PriceSource::from_str(&basis)
        .map_err(|_| anyhow::anyhow!("invalid --basis {:?}", basis))?;

    let mut conn = db::open_db(Some(config.db_path))?;

    let result = pnl::compute_daily(
        &mut conn, &owner, &symbol, valuation_date, price_source, config.missing_price_strategy,
    )?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result.row)?);
    } else {
        if result.price_is_stale {
            println!("{} valuation uses a backfilled stale price", "!".yellow().bold());
        }
        println!(
            "{} {} on {}: qty={} market_value={} unrealized_pnl={} realized_pnl_day={}",
            owner, symbol, valuation_date, result.row.quantity,
            crate::utils::format_currency(result.row.market_value),
            crate::utils::format_currency(result.row.unrealized_pnl),
            crate::utils::format_currency(result.row.realized_pnl_day),
        );
    }
    Ok(0)
}

#[allow(clippy::too_many_arguments)]
fn batch_calculate(
    config: Config,
    owner: String,
    symbol: String,
    start: String,
    end: String,
    only_trading_days: bool,
    basis: String,
    json_output: bool,
) -> Result<i32> {
    let start_date = parse_date("start", &start)?;
    let end_date = parse_date("end", &end)?;
    let price_source = db::models::PriceSource::from_str(&basis)
        .map_err(|_| anyhow::anyhow!("invalid --basis {:?}", basis))?;

    let mut conn = db::open_db(Some(config.db_path))?;

    let results = pnl::batch(
        &mut conn, &owner, &symbol, start_date, end_date, only_trading_days, price_source,
        config.missing_price_strategy,
    );

    let any_failed = results.iter().any(|(_, r)| r.is_err());

    if json_output {
        let rows: Vec<serde_json::Value> = results
            .iter()
            .map(|(date, r)| match r {
                Ok(result) => serde_json::json!({"date": date, "ok": true, "row": result.row}),
                Err(e) => serde_json::json!({"date": date, "ok": false, "error": e.to_string()}),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for (date, r) in &results {
            match r {
                Ok(result) => println!(
                    "{} {} unrealized_pnl={} realized_pnl_day={}",
                    date, "✓".green(),
                    crate::utils::format_currency(result.row.unrealized_pnl),
                    crate::utils::format_currency(result.row.realized_pnl_day),
                ),
                Err(e) => println!("{} {} {}", date, "✗".red(), e),
            }
        }
    }

    Ok(if any_failed { 2 } else { 0 })
}
