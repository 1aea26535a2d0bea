use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Buy or sell side of a [`Transaction`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Buy,
    Sell,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "BUY",
            TransactionKind::Sell => "SELL",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Ok(TransactionKind::Buy),
            "SELL" | "S" => Ok(TransactionKind::Sell),
            _ => Err(()),
        }
    }
}

/// Cost-basis matching policy used by a sell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CostBasisMethod {
    Fifo,
    Lifo,
    Specific,
    Average,
}

impl CostBasisMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostBasisMethod::Fifo => "fifo",
            CostBasisMethod::Lifo => "lifo",
            CostBasisMethod::Specific => "specific",
            CostBasisMethod::Average => "average",
        }
    }
}

impl FromStr for CostBasisMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(CostBasisMethod::Fifo),
            "lifo" => Ok(CostBasisMethod::Lifo),
            "specific" | "specific-lot" | "specific_lot" => Ok(CostBasisMethod::Specific),
            "average" | "average-cost" | "average_cost" => Ok(CostBasisMethod::Average),
            _ => Err(()),
        }
    }
}

/// Which price column the PnL calculator should value open lots against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PriceSource {
    Close,
    AdjClose,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Close => "close",
            PriceSource::AdjClose => "adj_close",
        }
    }
}

impl FromStr for PriceSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "close" => Ok(PriceSource::Close),
            "adj_close" | "adjclose" | "adjusted_close" => Ok(PriceSource::AdjClose),
            _ => Err(()),
        }
    }
}

/// What to do when the requested valuation date has no stored price row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MissingPriceStrategy {
    /// Fall back to the most recent price at or before the date, flagging it stale.
    Backfill,
    /// Fail with `no_price` rather than substitute a stale value.
    Strict,
}

impl FromStr for MissingPriceStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backfill" => Ok(MissingPriceStrategy::Backfill),
            "strict" => Ok(MissingPriceStrategy::Strict),
            _ => Err(()),
        }
    }
}

/// A tracked equity symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One day of OHLCV data for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockPrice {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: i64,
}

/// Normalized long-form financial statement line: income statement,
/// balance sheet and cash flow share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialLineItem {
    pub symbol: String,
    pub period_end: NaiveDate,
    pub line_item: String,
    pub value: Decimal,
}

/// Which of the three financial statements a [`FinancialLineItem`] belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FinancialStatement {
    Income,
    BalanceSheet,
    CashFlow,
}

impl FinancialStatement {
    pub fn table_name(&self) -> &'static str {
        match self {
            FinancialStatement::Income => "income_statement",
            FinancialStatement::BalanceSheet => "balance_sheet",
            FinancialStatement::CashFlow => "cash_flow",
        }
    }
}

/// An owner's buy or sell of a symbol. Immutable once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub owner_id: String,
    pub symbol: String,
    pub kind: TransactionKind,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub transaction_date: NaiveDate,
    pub external_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An independently tracked cost-basis lot created by a BUY and mutated
/// only by subsequent SELLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLot {
    pub id: Option<i64>,
    pub owner_id: String,
    pub symbol: String,
    pub buy_transaction_id: i64,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub cost_basis_per_share: Decimal,
    pub purchase_date: NaiveDate,
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
}

/// One lot's contribution to a SELL's allocation ledger, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleAllocation {
    pub id: Option<i64>,
    pub sell_transaction_id: i64,
    pub lot_id: i64,
    pub quantity_sold: Decimal,
    pub cost_basis_per_share: Decimal,
    pub sale_price_per_share: Decimal,
    pub realized_pnl: Decimal,
}

/// A day's valuation snapshot for an owner+symbol, upserted by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPnL {
    pub owner_id: String,
    pub symbol: String,
    pub valuation_date: NaiveDate,
    pub quantity: Decimal,
    pub weighted_avg_cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl_day: Decimal,
    pub total_cost: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_kind_conversions() {
        assert_eq!(TransactionKind::Buy.as_str(), "BUY");
        assert_eq!(TransactionKind::Sell.as_str(), "SELL");
        assert_eq!("buy".parse::<TransactionKind>(), Ok(TransactionKind::Buy));
        assert_eq!("B".parse::<TransactionKind>(), Ok(TransactionKind::Buy));
        assert_eq!("sell".parse::<TransactionKind>(), Ok(TransactionKind::Sell));
        assert!("HOLD".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn test_cost_basis_method_conversions() {
        assert_eq!(CostBasisMethod::Fifo.as_str(), "fifo");
        assert_eq!("FIFO".parse::<CostBasisMethod>(), Ok(CostBasisMethod::Fifo));
        assert_eq!("lifo".parse::<CostBasisMethod>(), Ok(CostBasisMethod::Lifo));
        assert_eq!(
            "specific-lot".parse::<CostBasisMethod>(),
            Ok(CostBasisMethod::Specific)
        );
        assert_eq!(
            "average-cost".parse::<CostBasisMethod>(),
            Ok(CostBasisMethod::Average)
        );
        assert!("whatever".parse::<CostBasisMethod>().is_err());
    }

    #[test]
    fn test_price_source_conversions() {
        assert_eq!("close".parse::<PriceSource>(), Ok(PriceSource::Close));
        assert_eq!(
            "adj_close".parse::<PriceSource>(),
            Ok(PriceSource::AdjClose)
        );
        assert!("mid".parse::<PriceSource>().is_err());
    }

    #[test]
    fn test_missing_price_strategy_conversions() {
        assert_eq!(
            "backfill".parse::<MissingPriceStrategy>(),
            Ok(MissingPriceStrategy::Backfill)
        );
        assert_eq!(
            "STRICT".parse::<MissingPriceStrategy>(),
            Ok(MissingPriceStrategy::Strict)
        );
        assert!("nope".parse::<MissingPriceStrategy>().is_err());
    }
}
