//! Storage: schema creation and a narrow transactional API. Every write
//! that must be atomic goes through [`with_transaction`]; nothing here
//! talks to the network.

pub mod models;

use crate::error::{EngineError, Result, StorageErrorCategory};
use anyhow::Context;
use models::{
    DailyPnL, FinancialLineItem, FinancialStatement, PositionLot, SaleAllocation, StockPrice,
    Transaction, TransactionKind,
};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

const SCHEMA_VERSION: i64 = 1;

/// Ordering requested by the caller for [`get_open_lots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotOrder {
    PurchaseDateAsc,
    PurchaseDateDesc,
}

/// Get the default database path (`~/.equity-ledger/data.db`).
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let dir = PathBuf::from(home).join(".equity-ledger");
    std::fs::create_dir_all(&dir).context("failed to create data directory")?;
    Ok(dir.join("data.db"))
}

/// Open (creating if necessary) the database at `path`, or the default path
/// if `None`, and ensure the schema is current.
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(p) => p,
        None => get_default_db_path()?,
    };

    info!("opening database at {:?}", path);
    let conn = Connection::open(&path)
        .with_context(|| format!("failed to open database at {:?}", path))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Create all tables/indexes if they don't already exist and record the
/// schema version (forward-only migrations).
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stocks (
            symbol TEXT PRIMARY KEY,
            company_name TEXT,
            sector TEXT,
            industry TEXT,
            description TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stock_prices (
            symbol TEXT NOT NULL REFERENCES stocks(symbol),
            date TEXT NOT NULL,
            open TEXT NOT NULL,
            high TEXT NOT NULL,
            low TEXT NOT NULL,
            close TEXT NOT NULL,
            adj_close TEXT NOT NULL,
            volume INTEGER NOT NULL,
            PRIMARY KEY (symbol, date)
        );
        CREATE INDEX IF NOT EXISTS idx_stock_prices_symbol_date
            ON stock_prices(symbol, date);

        CREATE TABLE IF NOT EXISTS income_statement (
            symbol TEXT NOT NULL REFERENCES stocks(symbol),
            period_end TEXT NOT NULL,
            line_item TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (symbol, period_end, line_item)
        );

        CREATE TABLE IF NOT EXISTS balance_sheet (
            symbol TEXT NOT NULL REFERENCES stocks(symbol),
            period_end TEXT NOT NULL,
            line_item TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (symbol, period_end, line_item)
        );

        CREATE TABLE IF NOT EXISTS cash_flow (
            symbol TEXT NOT NULL REFERENCES stocks(symbol),
            period_end TEXT NOT NULL,
            line_item TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (symbol, period_end, line_item)
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            kind TEXT NOT NULL,
            quantity TEXT NOT NULL,
            price TEXT NOT NULL,
            commission TEXT NOT NULL,
            transaction_date TEXT NOT NULL,
            external_id TEXT,
            notes TEXT,
            created_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_owner_external
            ON transactions(owner_id, external_id)
            WHERE external_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_transactions_owner_symbol
            ON transactions(owner_id, symbol);

        CREATE TABLE IF NOT EXISTS position_lots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            buy_transaction_id INTEGER NOT NULL REFERENCES transactions(id),
            original_quantity TEXT NOT NULL,
            remaining_quantity TEXT NOT NULL,
            cost_basis_per_share TEXT NOT NULL,
            purchase_date TEXT NOT NULL,
            is_closed INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lots_owner_symbol_open
            ON position_lots(owner_id, symbol, is_closed);

        CREATE TABLE IF NOT EXISTS sale_allocations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sell_transaction_id INTEGER NOT NULL REFERENCES transactions(id),
            lot_id INTEGER NOT NULL REFERENCES position_lots(id),
            quantity_sold TEXT NOT NULL,
            cost_basis_per_share TEXT NOT NULL,
            sale_price_per_share TEXT NOT NULL,
            realized_pnl TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_allocations_sell_tx
            ON sale_allocations(sell_transaction_id);
        CREATE INDEX IF NOT EXISTS idx_allocations_lot
            ON sale_allocations(lot_id);

        CREATE TABLE IF NOT EXISTS daily_pnl (
            owner_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            valuation_date TEXT NOT NULL,
            quantity TEXT NOT NULL,
            weighted_avg_cost TEXT NOT NULL,
            market_price TEXT NOT NULL,
            market_value TEXT NOT NULL,
            unrealized_pnl TEXT NOT NULL,
            realized_pnl_day TEXT NOT NULL,
            total_cost TEXT NOT NULL,
            PRIMARY KEY (owner_id, symbol, valuation_date)
        );
        "#,
    )
    .context("failed to apply schema")?;

    let has_version: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
        .optional()?;
    match has_version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v < SCHEMA_VERSION => {
            conn.execute("UPDATE schema_version SET version = ?1", params![SCHEMA_VERSION])?;
        }
        _ => {}
    }

    Ok(())
}

/// Run `f` inside a single SQLite transaction, committing on `Ok` and
/// rolling back on `Err`: a SELL must never leave a half-updated lot
/// without its allocation.
pub fn with_transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&rusqlite::Transaction) -> Result<T>,
) -> Result<T> {
    let tx = conn.transaction().map_err(storage_io)?;
    let result = f(&tx);
    match result {
        Ok(value) => {
            tx.commit().map_err(storage_io)?;
            Ok(value)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

fn storage_io(e: rusqlite::Error) -> anyhow::Error {
    EngineError::Storage {
        category: StorageErrorCategory::Io,
        message: e.to_string(),
    }
    .into()
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |r| r.get(0),
    )
    .optional()
    .map_err(storage_io)
}

pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(storage_io)?;
    Ok(())
}

/// Insert the stock row for `symbol` if it doesn't already exist.
pub fn ensure_stock(conn: &Connection, symbol: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO stocks (symbol, created_at) VALUES (?1, ?2)",
        params![symbol, chrono::Utc::now().to_rfc3339()],
    )
    .map_err(storage_io)?;
    Ok(())
}

/// Upsert a batch of OHLCV rows, returning the count of genuinely new rows
/// (as opposed to rows that already existed and were overwritten), mirroring
/// the chunked pre-fetch/dedupe batch-write pattern this storage layer is
/// grounded on.
pub fn upsert_prices(conn: &mut Connection, rows: &[StockPrice]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let symbol = &rows[0].symbol;
    let existing: std::collections::HashSet<chrono::NaiveDate> = {
        let mut stmt = conn
            .prepare("SELECT date FROM stock_prices WHERE symbol = ?1")
            .map_err(storage_io)?;
        let dates = stmt
            .query_map(params![symbol], |r| r.get::<_, String>(0))
            .map_err(storage_io)?;
        let mut set = std::collections::HashSet::new();
        for d in dates {
            let d = d.map_err(storage_io)?;
            if let Ok(parsed) = chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d") {
                set.insert(parsed);
            }
        }
        set
    };

    let mut new_rows = 0usize;
    with_transaction(conn, |tx| {
        let mut stmt = tx
            .prepare(
                "INSERT INTO stock_prices
                    (symbol, date, open, high, low, close, adj_close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(symbol, date) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, adj_close = excluded.adj_close,
                    volume = excluded.volume",
            )
            .map_err(storage_io)?;
        for row in rows {
            if !existing.contains(&row.date) {
                new_rows += 1;
            }
            stmt.execute(params![
                row.symbol,
                row.date.format("%Y-%m-%d").to_string(),
                row.open.to_string(),
                row.high.to_string(),
                row.low.to_string(),
                row.close.to_string(),
                row.adj_close.to_string(),
                row.volume,
            ])
            .map_err(storage_io)?;
        }
        Ok(())
    })?;

    debug!("upserted {} price rows ({} new) for {}", rows.len(), new_rows, symbol);
    Ok(new_rows)
}

/// Upsert a batch of normalized financial-statement line items into the
/// table named by `statement`.
pub fn upsert_financials(
    conn: &mut Connection,
    statement: FinancialStatement,
    rows: &[FinancialLineItem],
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let table = statement.table_name();
    let count = rows.len();
    with_transaction(conn, |tx| {
        let sql = format!(
            "INSERT INTO {table} (symbol, period_end, line_item, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(symbol, period_end, line_item) DO UPDATE SET value = excluded.value"
        );
        let mut stmt = tx.prepare(&sql).map_err(storage_io)?;
        for row in rows {
            stmt.execute(params![
                row.symbol,
                row.period_end.format("%Y-%m-%d").to_string(),
                row.line_item,
                row.value.to_string(),
            ])
            .map_err(storage_io)?;
        }
        Ok(())
    })?;
    Ok(count)
}

pub fn get_prices(
    conn: &Connection,
    symbol: &str,
    start: Option<chrono::NaiveDate>,
    end: Option<chrono::NaiveDate>,
) -> Result<Vec<StockPrice>> {
    let mut stmt = conn
        .prepare(
            "SELECT symbol, date, open, high, low, close, adj_close, volume
             FROM stock_prices
             WHERE symbol = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date ASC",
        )
        .map_err(storage_io)?;
    let rows = stmt
        .query_map(
            params![
                symbol,
                start.map(|d| d.format("%Y-%m-%d").to_string()),
                end.map(|d| d.format("%Y-%m-%d").to_string())
            ],
            row_to_stock_price,
        )
        .map_err(storage_io)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_io)
}

pub fn get_last_price_date(conn: &Connection, symbol: &str) -> Result<Option<chrono::NaiveDate>> {
    let date: Option<String> = conn
        .query_row(
            "SELECT MAX(date) FROM stock_prices WHERE symbol = ?1",
            params![symbol],
            |r| r.get(0),
        )
        .optional()
        .map_err(storage_io)?
        .flatten();
    Ok(date.and_then(|d| chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()))
}

/// Most recent stored price at or before `date`, for [`MissingPriceStrategy::Backfill`].
pub fn get_price_at_or_before(
    conn: &Connection,
    symbol: &str,
    date: chrono::NaiveDate,
) -> Result<Option<StockPrice>> {
    conn.query_row(
        "SELECT symbol, date, open, high, low, close, adj_close, volume
         FROM stock_prices
         WHERE symbol = ?1 AND date <= ?2
         ORDER BY date DESC LIMIT 1",
        params![symbol, date.format("%Y-%m-%d").to_string()],
        row_to_stock_price,
    )
    .optional()
    .map_err(storage_io)
}

fn row_to_stock_price(row: &rusqlite::Row) -> rusqlite::Result<StockPrice> {
    let date: String = row.get(1)?;
    let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
    Ok(StockPrice {
        symbol: row.get(0)?,
        date: chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap_or_default(),
        open: parse(row.get(2)?),
        high: parse(row.get(3)?),
        low: parse(row.get(4)?),
        close: parse(row.get(5)?),
        adj_close: parse(row.get(6)?),
        volume: row.get(7)?,
    })
}

/// Insert a transaction. Rejects duplicate `(owner_id, external_id)` with
/// [`EngineError::DuplicateExternalId`] so the ledger can return the
/// existing record idempotently.
pub fn insert_transaction(tx: &rusqlite::Transaction, txn: &Transaction) -> Result<i64> {
    let result = tx.execute(
        "INSERT INTO transactions
            (owner_id, symbol, kind, quantity, price, commission, transaction_date,
             external_id, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            txn.owner_id,
            txn.symbol,
            txn.kind.as_str(),
            txn.quantity.to_string(),
            txn.price.to_string(),
            txn.commission.to_string(),
            txn.transaction_date.format("%Y-%m-%d").to_string(),
            txn.external_id,
            txn.notes,
            txn.created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(tx.last_insert_rowid()),
        Err(e) if is_constraint_violation(&e) => Err(EngineError::DuplicateExternalId {
            owner_id: txn.owner_id.clone(),
            external_id: txn.external_id.clone().unwrap_or_default(),
        }
        .into()),
        Err(e) => Err(storage_io(e)),
    }
}

/// Find an existing transaction by `(owner_id, external_id)`, used to
/// satisfy duplicate-submission idempotence.
pub fn find_transaction_by_external_id(
    conn: &Connection,
    owner_id: &str,
    external_id: &str,
) -> Result<Option<Transaction>> {
    conn.query_row(
        "SELECT id, owner_id, symbol, kind, quantity, price, commission,
                transaction_date, external_id, notes, created_at
         FROM transactions WHERE owner_id = ?1 AND external_id = ?2",
        params![owner_id, external_id],
        row_to_transaction,
    )
    .optional()
    .map_err(storage_io)
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(3)?;
    let date: String = row.get(7)?;
    let created_at: String = row.get(10)?;
    let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
    Ok(Transaction {
        id: Some(row.get(0)?),
        owner_id: row.get(1)?,
        symbol: row.get(2)?,
        kind: TransactionKind::from_str(&kind).unwrap_or(TransactionKind::Buy),
        quantity: parse(row.get(4)?),
        price: parse(row.get(5)?),
        commission: parse(row.get(6)?),
        transaction_date: chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap_or_default(),
        external_id: row.get(8)?,
        notes: row.get(9)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

pub fn insert_lot(tx: &rusqlite::Transaction, lot: &PositionLot) -> Result<i64> {
    tx.execute(
        "INSERT INTO position_lots
            (owner_id, symbol, buy_transaction_id, original_quantity, remaining_quantity,
             cost_basis_per_share, purchase_date, is_closed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            lot.owner_id,
            lot.symbol,
            lot.buy_transaction_id,
            lot.original_quantity.to_string(),
            lot.remaining_quantity.to_string(),
            lot.cost_basis_per_share.to_string(),
            lot.purchase_date.format("%Y-%m-%d").to_string(),
            lot.is_closed,
            lot.created_at.to_rfc3339(),
        ],
    )
    .map_err(storage_io)?;
    Ok(tx.last_insert_rowid())
}

pub fn update_lot_remaining(
    tx: &rusqlite::Transaction,
    lot_id: i64,
    remaining_quantity: Decimal,
    is_closed: bool,
) -> Result<()> {
    tx.execute(
        "UPDATE position_lots SET remaining_quantity = ?1, is_closed = ?2 WHERE id = ?3",
        params![remaining_quantity.to_string(), is_closed, lot_id],
    )
    .map_err(storage_io)?;
    Ok(())
}

pub fn insert_allocation(tx: &rusqlite::Transaction, allocation: &SaleAllocation) -> Result<i64> {
    tx.execute(
        "INSERT INTO sale_allocations
            (sell_transaction_id, lot_id, quantity_sold, cost_basis_per_share,
             sale_price_per_share, realized_pnl)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            allocation.sell_transaction_id,
            allocation.lot_id,
            allocation.quantity_sold.to_string(),
            allocation.cost_basis_per_share.to_string(),
            allocation.sale_price_per_share.to_string(),
            allocation.realized_pnl.to_string(),
        ],
    )
    .map_err(storage_io)?;
    Ok(tx.last_insert_rowid())
}

/// Open lots (`remaining_quantity > 0`) for an owner+symbol, ordered per
/// the caller's requested [`LotOrder`].
pub fn get_open_lots(
    conn: &Connection,
    owner_id: &str,
    symbol: &str,
    order: LotOrder,
) -> Result<Vec<PositionLot>> {
    let order_sql = match order {
        LotOrder::PurchaseDateAsc => "purchase_date ASC, id ASC",
        LotOrder::PurchaseDateDesc => "purchase_date DESC, id DESC",
    };
    let sql = format!(
        "SELECT id, owner_id, symbol, buy_transaction_id, original_quantity,
                remaining_quantity, cost_basis_per_share, purchase_date, is_closed, created_at
         FROM position_lots
         WHERE owner_id = ?1 AND symbol = ?2 AND is_closed = 0
         ORDER BY {order_sql}"
    );
    let mut stmt = conn.prepare(&sql).map_err(storage_io)?;
    let rows = stmt
        .query_map(params![owner_id, symbol], row_to_lot)
        .map_err(storage_io)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_io)
}

fn row_to_lot(row: &rusqlite::Row) -> rusqlite::Result<PositionLot> {
    let purchase_date: String = row.get(7)?;
    let created_at: String = row.get(9)?;
    let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
    Ok(PositionLot {
        id: Some(row.get(0)?),
        owner_id: row.get(1)?,
        symbol: row.get(2)?,
        buy_transaction_id: row.get(3)?,
        original_quantity: parse(row.get(4)?),
        remaining_quantity: parse(row.get(5)?),
        cost_basis_per_share: parse(row.get(6)?),
        purchase_date: chrono::NaiveDate::parse_from_str(&purchase_date, "%Y-%m-%d")
            .unwrap_or_default(),
        is_closed: row.get::<_, i64>(8)? != 0,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

pub fn get_allocations_for_symbol(
    conn: &Connection,
    owner_id: &str,
    symbol: &str,
) -> Result<Vec<SaleAllocation>> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.sell_transaction_id, a.lot_id, a.quantity_sold,
                    a.cost_basis_per_share, a.sale_price_per_share, a.realized_pnl
             FROM sale_allocations a
             JOIN transactions t ON t.id = a.sell_transaction_id
             WHERE t.owner_id = ?1 AND t.symbol = ?2
             ORDER BY a.id ASC",
        )
        .map_err(storage_io)?;
    let rows = stmt
        .query_map(params![owner_id, symbol], |row| {
            let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
            Ok(SaleAllocation {
                id: Some(row.get(0)?),
                sell_transaction_id: row.get(1)?,
                lot_id: row.get(2)?,
                quantity_sold: parse(row.get(3)?),
                cost_basis_per_share: parse(row.get(4)?),
                sale_price_per_share: parse(row.get(5)?),
                realized_pnl: parse(row.get(6)?),
            })
        })
        .map_err(storage_io)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_io)
}

/// Allocations recorded for a given sell transaction (used by the ledger to
/// assemble the returned allocation ledger after commit).
pub fn get_allocations_for_transaction(
    conn: &Connection,
    sell_transaction_id: i64,
) -> Result<Vec<SaleAllocation>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, sell_transaction_id, lot_id, quantity_sold,
                    cost_basis_per_share, sale_price_per_share, realized_pnl
             FROM sale_allocations WHERE sell_transaction_id = ?1 ORDER BY id ASC",
        )
        .map_err(storage_io)?;
    let rows = stmt
        .query_map(params![sell_transaction_id], |row| {
            let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
            Ok(SaleAllocation {
                id: Some(row.get(0)?),
                sell_transaction_id: row.get(1)?,
                lot_id: row.get(2)?,
                quantity_sold: parse(row.get(3)?),
                cost_basis_per_share: parse(row.get(4)?),
                sale_price_per_share: parse(row.get(5)?),
                realized_pnl: parse(row.get(6)?),
            })
        })
        .map_err(storage_io)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_io)
}

/// Allocations whose sell transaction happened on exactly `date`, used by
/// the PnL calculator's `realized_pnl_day` aggregation.
pub fn get_allocations_on_date(
    conn: &Connection,
    owner_id: &str,
    symbol: &str,
    date: chrono::NaiveDate,
) -> Result<Vec<SaleAllocation>> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.sell_transaction_id, a.lot_id, a.quantity_sold,
                    a.cost_basis_per_share, a.sale_price_per_share, a.realized_pnl
             FROM sale_allocations a
             JOIN transactions t ON t.id = a.sell_transaction_id
             WHERE t.owner_id = ?1 AND t.symbol = ?2 AND t.transaction_date = ?3",
        )
        .map_err(storage_io)?;
    let rows = stmt
        .query_map(
            params![owner_id, symbol, date.format("%Y-%m-%d").to_string()],
            |row| {
                let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
                Ok(SaleAllocation {
                    id: Some(row.get(0)?),
                    sell_transaction_id: row.get(1)?,
                    lot_id: row.get(2)?,
                    quantity_sold: parse(row.get(3)?),
                    cost_basis_per_share: parse(row.get(4)?),
                    sale_price_per_share: parse(row.get(5)?),
                    realized_pnl: parse(row.get(6)?),
                })
            },
        )
        .map_err(storage_io)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_io)
}

/// Aggregate position summary for an owner+symbol.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub quantity: Decimal,
    pub weighted_avg_cost: Decimal,
    pub total_cost: Decimal,
    pub lot_count: usize,
    pub first_buy_date: Option<chrono::NaiveDate>,
}

pub fn get_position_summary(
    conn: &Connection,
    owner_id: &str,
    symbol: &str,
) -> Result<PositionSummary> {
    let lots = get_open_lots(conn, owner_id, symbol, LotOrder::PurchaseDateAsc)?;
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
    Ok(PositionSummary {
        symbol: symbol.to_string(),
        quantity,
        weighted_avg_cost,
        total_cost,
        lot_count: lots.len(),
        first_buy_date: lots.iter().map(|l| l.purchase_date).min(),
    })
}

pub fn upsert_daily_pnl(conn: &mut Connection, row: &DailyPnL) -> Result<()> {
    conn.execute(
        "INSERT INTO daily_pnl
            (owner_id, symbol, valuation_date, quantity, weighted_avg_cost, market_price,
             market_value, unrealized_pnl, realized_pnl_day, total_cost)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(owner_id, symbol, valuation_date) DO UPDATE SET
            quantity = excluded.quantity,
            weighted_avg_cost = excluded.weighted_avg_cost,
            market_price = excluded.market_price,
            market_value = excluded.market_value,
            unrealized_pnl = excluded.unrealized_pnl,
            realized_pnl_day = excluded.realized_pnl_day,
            total_cost = excluded.total_cost",
        params![
            row.owner_id,
            row.symbol,
            row.valuation_date.format("%Y-%m-%d").to_string(),
            row.quantity.to_string(),
            row.weighted_avg_cost.to_string(),
            row.market_price.to_string(),
            row.market_value.to_string(),
            row.unrealized_pnl.to_string(),
            row.realized_pnl_day.to_string(),
            row.total_cost.to_string(),
        ],
    )
    .map_err(storage_io)?;
    Ok(())
}

pub fn get_daily_pnl(
    conn: &Connection,
    owner_id: &str,
    symbol: &str,
    date: chrono::NaiveDate,
) -> Result<Option<DailyPnL>> {
    conn.query_row(
        "SELECT owner_id, symbol, valuation_date, quantity, weighted_avg_cost, market_price,
                market_value, unrealized_pnl, realized_pnl_day, total_cost
         FROM daily_pnl WHERE owner_id = ?1 AND symbol = ?2 AND valuation_date = ?3",
        params![owner_id, symbol, date.format("%Y-%m-%d").to_string()],
        |row| {
            let parse = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
            let vdate: String = row.get(2)?;
            Ok(DailyPnL {
                owner_id: row.get(0)?,
                symbol: row.get(1)?,
                valuation_date: chrono::NaiveDate::parse_from_str(&vdate, "%Y-%m-%d")
                    .unwrap_or_default(),
                quantity: parse(row.get(3)?),
                weighted_avg_cost: parse(row.get(4)?),
                market_price: parse(row.get(5)?),
                market_value: parse(row.get(6)?),
                unrealized_pnl: parse(row.get(7)?),
                realized_pnl_day: parse(row.get(8)?),
                total_cost: parse(row.get(9)?),
            })
        },
    )
    .optional()
    .map_err(storage_io)
}

/// The lot created by a given BUY transaction, used to replay an
/// idempotent duplicate buy submission.
pub fn get_lot_by_buy_transaction(
    conn: &Connection,
    buy_transaction_id: i64,
) -> Result<Option<PositionLot>> {
    conn.query_row(
        "SELECT id, owner_id, symbol, buy_transaction_id, original_quantity,
                remaining_quantity, cost_basis_per_share, purchase_date, is_closed, created_at
         FROM position_lots WHERE buy_transaction_id = ?1",
        params![buy_transaction_id],
        row_to_lot,
    )
    .optional()
    .map_err(storage_io)
}

/// Every symbol an owner currently holds an open lot in, for `trade
/// positions` which lists across all symbols at once.
pub fn list_held_symbols(conn: &Connection, owner_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT symbol FROM position_lots
             WHERE owner_id = ?1 AND is_closed = 0
             ORDER BY symbol ASC",
        )
        .map_err(storage_io)?;
    let rows = stmt
        .query_map(params![owner_id], |row| row.get::<_, String>(0))
        .map_err(storage_io)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn open_memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = open_memory_db();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
    }

    #[test]
    fn test_ensure_stock_and_metadata_roundtrip() {
        let conn = open_memory_db();
        ensure_stock(&conn, "AAPL").unwrap();
        ensure_stock(&conn, "AAPL").unwrap();
        set_metadata(&conn, "last_checked", "2024-01-01").unwrap();
        assert_eq!(
            get_metadata(&conn, "last_checked").unwrap(),
            Some("2024-01-01".to_string())
        );
        assert_eq!(get_metadata(&conn, "missing").unwrap(), None);
    }

    #[test]
    fn test_upsert_prices_dedupes_new_rows() {
        let mut conn = open_memory_db();
        ensure_stock(&conn, "AAPL").unwrap();
        let row = |d: &str, c: i64| StockPrice {
            symbol: "AAPL".to_string(),
            date: NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap(),
            open: Decimal::from(c),
            high: Decimal::from(c),
            low: Decimal::from(c),
            close: Decimal::from(c),
            adj_close: Decimal::from(c),
            volume: 1000,
        };
        let rows = vec![row("2024-01-01", 100), row("2024-01-02", 101)];
        let new_count = upsert_prices(&mut conn, &rows).unwrap();
        assert_eq!(new_count, 2);

        // Re-upserting the same rows plus one new row: only the new row counts.
        let rows2 = vec![row("2024-01-01", 100), row("2024-01-03", 102)];
        let new_count2 = upsert_prices(&mut conn, &rows2).unwrap();
        assert_eq!(new_count2, 1);

        let all = get_prices(&conn, "AAPL", None, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(
            get_last_price_date(&conn, "AAPL").unwrap(),
            Some(NaiveDate::parse_from_str("2024-01-03", "%Y-%m-%d").unwrap())
        );
    }

    #[test]
    fn test_insert_transaction_rejects_duplicate_external_id() {
        let mut conn = open_memory_db();
        ensure_stock(&conn, "AAPL").unwrap();
        let txn = Transaction {
            id: None,
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            kind: TransactionKind::Buy,
            quantity: Decimal::from(10),
            price: Decimal::from(100),
            commission: Decimal::ZERO,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            external_id: Some("ext-1".to_string()),
            notes: None,
            created_at: chrono::Utc::now(),
        };

        with_transaction(&mut conn, |tx| insert_transaction(tx, &txn)).unwrap();
        let result = with_transaction(&mut conn, |tx| insert_transaction(tx, &txn));
        assert!(result.is_err());

        let existing = find_transaction_by_external_id(&conn, "u1", "ext-1")
            .unwrap()
            .unwrap();
        assert_eq!(existing.quantity, Decimal::from(10));
    }

    #[test]
    fn test_lot_lifecycle() {
        let mut conn = open_memory_db();
        ensure_stock(&conn, "AAPL").unwrap();
        let lot_id = with_transaction(&mut conn, |tx| {
            let txn = Transaction {
                id: None,
                owner_id: "u1".to_string(),
                symbol: "AAPL".to_string(),
                kind: TransactionKind::Buy,
                quantity: Decimal::from(100),
                price: Decimal::from(10),
                commission: Decimal::ZERO,
                transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                external_id: None,
                notes: None,
                created_at: chrono::Utc::now(),
            };
            let txn_id = insert_transaction(tx, &txn)?;
            let lot = PositionLot {
                id: None,
                owner_id: "u1".to_string(),
                symbol: "AAPL".to_string(),
                buy_transaction_id: txn_id,
                original_quantity: Decimal::from(100),
                remaining_quantity: Decimal::from(100),
                cost_basis_per_share: Decimal::from(10),
                purchase_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                is_closed: false,
                created_at: chrono::Utc::now(),
            };
            insert_lot(tx, &lot)
        })
        .unwrap();

        let open = get_open_lots(&conn, "u1", "AAPL", LotOrder::PurchaseDateAsc).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, Some(lot_id));

        with_transaction(&mut conn, |tx| {
            update_lot_remaining(tx, lot_id, Decimal::ZERO, true)
        })
        .unwrap();

        let open_after = get_open_lots(&conn, "u1", "AAPL", LotOrder::PurchaseDateAsc).unwrap();
        assert!(open_after.is_empty());
    }
}
