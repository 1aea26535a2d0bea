//! PnL calculator: daily mark-to-market valuation of open positions plus
//! realized gains booked that day. Grounded on this codebase's price
//! resolver's price-availability-first orchestration and the cost-basis
//! module's running-position arithmetic.

use crate::db::models::{DailyPnL, MissingPriceStrategy, PriceSource};
use crate::db::{self, LotOrder};
use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::warn;

/// A computed [`DailyPnL`] row plus whether the market price used was an
/// exact match for `valuation_date` or a backfilled stale price.
#[derive(Debug, Clone)]
pub struct DailyPnLResult {
    pub row: DailyPnL,
    pub price_is_stale: bool,
}

/// Compute and persist one day's valuation for an owner+symbol.
pub fn compute_daily(
    conn: &mut Connection,
    owner_id: &str,
    symbol: &str,
    valuation_date: NaiveDate,
    price_source: PriceSource,
    missing_price_strategy: MissingPriceStrategy,
) -> Result<DailyPnLResult> {
    let (market_price, price_is_stale) =
        resolve_market_price(conn, symbol, valuation_date, price_source, missing_price_strategy)?;

    let lots = db::get_open_lots(conn, owner_id, symbol, LotOrder::PurchaseDateAsc)?;
    let quantity: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
    let total_cost: Decimal = lots
        .iter()
        .map(|l| l.remaining_quantity * l.cost_basis_per_share)
        .sum();
    let weighted_avg_cost = if quantity > Decimal::ZERO {
        total_cost / quantity
    } else {
        Decimal::ZERO
    };

    let market_value = quantity * market_price;
    let unrealized_pnl = market_value - total_cost;

    let allocations = db::get_allocations_on_date(conn, owner_id, symbol, valuation_date)?;
    let realized_pnl_day: Decimal = allocations.iter().map(|a| a.realized_pnl).sum();

    let row = DailyPnL {
        owner_id: owner_id.to_string(),
        symbol: symbol.to_string(),
        valuation_date,
        quantity,
        weighted_avg_cost,
        market_price,
        market_value,
        unrealized_pnl,
        realized_pnl_day,
        total_cost,
    };

    db::upsert_daily_pnl(conn, &row)?;

    Ok(DailyPnLResult { row, price_is_stale })
}

fn resolve_market_price(
    conn: &Connection,
    symbol: &str,
    valuation_date: NaiveDate,
    price_source: PriceSource,
    missing_price_strategy: MissingPriceStrategy,
) -> Result<(Decimal, bool)> {
    let rows = db::get_prices(conn, symbol, Some(valuation_date), Some(valuation_date))?;
    if let Some(row) = rows.into_iter().next() {
        let price = match price_source {
            PriceSource::Close => row.close,
            PriceSource::AdjClose => row.adj_close,
        };
        return Ok((price, false));
    }

    match missing_price_strategy {
        MissingPriceStrategy::Strict => Err(EngineError::NoPrice {
            symbol: symbol.to_string(),
            date: valuation_date.format("%Y-%m-%d").to_string(),
        }
        .into()),
        MissingPriceStrategy::Backfill => {
            let fallback = db::get_price_at_or_before(conn, symbol, valuation_date)?.ok_or_else(|| {
                EngineError::NoPrice {
                    symbol: symbol.to_string(),
                    date: valuation_date.format("%Y-%m-%d").to_string(),
                }
            })?;
            warn!(
                "no price for {} on {}, backfilling from {}",
                symbol, valuation_date, fallback.date
            );
            let price = match price_source {
                PriceSource::Close => fallback.close,
                PriceSource::AdjClose => fallback.adj_close,
            };
            Ok((price, true))
        }
    }
}

/// Compute and persist daily valuations across `[start, end]` inclusive.
/// Never aborts the whole range on one day's failure: each day's error is
/// collected rather than propagated, mirroring the data service's
/// per-item isolation.
///
/// When `only_trading_days` is set, the dates valued are restricted to
/// those that actually have a stored price row for `symbol` in
/// `[start, end]`, rather than every calendar day, so weekends and
/// market holidays are neither valued nor persisted.
pub fn batch(
    conn: &mut Connection,
    owner_id: &str,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    only_trading_days: bool,
    price_source: PriceSource,
    missing_price_strategy: MissingPriceStrategy,
) -> Vec<(NaiveDate, Result<DailyPnLResult>)> {
    let dates = if only_trading_days {
        db::get_prices(conn, symbol, Some(start), Some(end))
            .map(|rows| rows.into_iter().map(|r| r.date).collect())
            .unwrap_or_default()
    } else {
        let mut dates = Vec::new();
        let mut date = start;
        while date <= end {
            dates.push(date);
            date += chrono::Duration::days(1);
        }
        dates
    };

    dates
        .into_iter()
        .map(|date| {
            let outcome = compute_daily(conn, owner_id, symbol, date, price_source, missing_price_strategy);
            (date, outcome)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::StockPrice;
    use crate::ledger;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        db::ensure_stock(&conn, "AAPL").unwrap();
        conn
    }

    fn insert_price(conn: &mut Connection, d: &str, close: Decimal) {
        db::upsert_prices(
            conn,
            &[StockPrice {
                symbol: "AAPL".to_string(),
                date: date(d),
                open: close,
                high: close,
                low: close,
                close,
                adj_close: close,
                volume: 1000,
            }],
        )
        .unwrap();
    }

    #[test]
    fn test_compute_daily_unrealized_pnl() {
        let mut conn = setup();
        ledger::record_buy(&mut conn, "u1", "AAPL", dec!(100), dec!(10), dec!(0), date("2024-01-01"), None, None).unwrap();
        insert_price(&mut conn, "2024-01-02", dec!(12));

        let result = compute_daily(
            &mut conn, "u1", "AAPL", date("2024-01-02"), PriceSource::Close, MissingPriceStrategy::Strict,
        )
        .unwrap();

        assert_eq!(result.row.quantity, dec!(100));
        assert_eq!(result.row.unrealized_pnl, dec!(200));
        assert!(!result.price_is_stale);
    }

    #[test]
    fn test_compute_daily_strict_missing_price_errors() {
        let mut conn = setup();
        ledger::record_buy(&mut conn, "u1", "AAPL", dec!(100), dec!(10), dec!(0), date("2024-01-01"), None, None).unwrap();

        let err = compute_daily(
            &mut conn, "u1", "AAPL", date("2024-01-05"), PriceSource::Close, MissingPriceStrategy::Strict,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no price available"));
    }

    #[test]
    fn test_compute_daily_backfill_uses_stale_price() {
        let mut conn = setup();
        ledger::record_buy(&mut conn, "u1", "AAPL", dec!(100), dec!(10), dec!(0), date("2024-01-01"), None, None).unwrap();
        insert_price(&mut conn, "2024-01-02", dec!(12));

        let result = compute_daily(
            &mut conn, "u1", "AAPL", date("2024-01-05"), PriceSource::Close, MissingPriceStrategy::Backfill,
        )
        .unwrap();

        assert!(result.price_is_stale);
        assert_eq!(result.row.market_price, dec!(12));
    }

    #[test]
    fn test_compute_daily_includes_realized_pnl_for_sells_that_day() {
        let mut conn = setup();
        ledger::record_buy(&mut conn, "u1", "AAPL", dec!(100), dec!(10), dec!(0), date("2024-01-01"), None, None).unwrap();
        insert_price(&mut conn, "2024-01-10", dec!(15));
        ledger::record_sell(
            &mut conn, "u1", "AAPL", dec!(40), dec!(15), dec!(0), date("2024-01-10"),
            crate::db::models::CostBasisMethod::Fifo, None, None, None,
        )
        .unwrap();

        let result = compute_daily(
            &mut conn, "u1", "AAPL", date("2024-01-10"), PriceSource::Close, MissingPriceStrategy::Strict,
        )
        .unwrap();

        assert_eq!(result.row.realized_pnl_day, dec!(200));
        assert_eq!(result.row.quantity, dec!(60));
    }

    #[test]
    fn test_batch_computes_each_day_independently() {
        let mut conn = setup();
        ledger::record_buy(&mut conn, "u1", "AAPL", dec!(100), dec!(10), dec!(0), date("2024-01-01"), None, None).unwrap();
        insert_price(&mut conn, "2024-01-02", dec!(11));
        insert_price(&mut conn, "2024-01-03", dec!(12));

        let results = batch(
            &mut conn, "u1", "AAPL", date("2024-01-02"), date("2024-01-03"), false,
            PriceSource::Close, MissingPriceStrategy::Strict,
        );
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn test_batch_only_trading_days_skips_dates_with_no_price_row() {
        let mut conn = setup();
        ledger::record_buy(&mut conn, "u1", "AAPL", dec!(100), dec!(10), dec!(0), date("2024-01-01"), None, None).unwrap();
        // 2024-01-05 and 2024-01-06 are a Friday and Saturday; only the
        // Friday gets a price row, mirroring a market holiday/weekend gap.
        insert_price(&mut conn, "2024-01-05", dec!(11));

        let results = batch(
            &mut conn, "u1", "AAPL", date("2024-01-05"), date("2024-01-07"), true,
            PriceSource::Close, MissingPriceStrategy::Strict,
        );

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, date("2024-01-05"));

        let persisted = db::get_daily_pnl(&conn, "u1", "AAPL", date("2024-01-06")).unwrap();
        assert!(persisted.is_none());
    }
}
