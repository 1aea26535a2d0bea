//! Lot ledger: records buys and sells as atomic, validated transactions
//! over independently tracked cost-basis lots. Grounded on this
//! codebase's cost-basis module's detailed, operator-facing validation
//! messages, generalized from "compute profit/loss for a sale" to "own
//! the full buy/sell transactional boundary, including
//! duplicate-submission idempotence".

use crate::db::models::{CostBasisMethod, PositionLot, SaleAllocation, Transaction, TransactionKind};
use crate::db::{self, LotOrder};
use crate::error::{EngineError, Result};
use crate::matchers;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug)]
pub struct BuyOutcome {
    pub transaction: Transaction,
    pub lot: PositionLot,
}

#[derive(Debug)]
pub struct SellOutcome {
    pub transaction: Transaction,
    pub allocations: Vec<SaleAllocation>,
}

/// Record a BUY: validates inputs, opens a new cost-basis lot whose
/// per-share basis folds in commission, and commits both rows atomically.
/// A resubmission with the same `(owner_id, external_id)` returns the
/// original transaction and lot rather than erroring.
#[allow(clippy::too_many_arguments)]
pub fn record_buy(
    conn: &mut Connection,
    owner_id: &str,
    symbol: &str,
    quantity: Decimal,
    price: Decimal,
    commission: Decimal,
    transaction_date: NaiveDate,
    external_id: Option<String>,
    notes: Option<String>,
) -> Result<BuyOutcome> {
    validate_trade_inputs(quantity, price, commission)?;

    if let Some(ext_id) = &external_id {
        if let Some(existing) = db::find_transaction_by_external_id(conn, owner_id, ext_id)? {
            let lot = existing
                .id
                .and_then(|id| db::get_lot_by_buy_transaction(conn, id).ok().flatten())
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "transaction {:?} has no matching lot; data is inconsistent",
                        existing.id
                    ))
                })?;
            info!(
                "duplicate buy submission for {} external_id {:?}, returning existing record",
                symbol, ext_id
            );
            return Ok(BuyOutcome { transaction: existing, lot });
        }
    }

    let cost_basis_per_share = price + commission / quantity;

    db::with_transaction(conn, |tx| {
        let transaction = Transaction {
            id: None,
            owner_id: owner_id.to_string(),
            symbol: symbol.to_string(),
            kind: TransactionKind::Buy,
            quantity,
            price,
            commission,
            transaction_date,
            external_id: external_id.clone(),
            notes: notes.clone(),
            created_at: chrono::Utc::now(),
        };
        let transaction_id = db::insert_transaction(tx, &transaction)?;

        let lot = PositionLot {
            id: None,
            owner_id: owner_id.to_string(),
            symbol: symbol.to_string(),
            buy_transaction_id: transaction_id,
            original_quantity: quantity,
            remaining_quantity: quantity,
            cost_basis_per_share,
            purchase_date: transaction_date,
            is_closed: false,
            created_at: chrono::Utc::now(),
        };
        let lot_id = db::insert_lot(tx, &lot)?;

        Ok(BuyOutcome {
            transaction: Transaction { id: Some(transaction_id), ..transaction },
            lot: PositionLot { id: Some(lot_id), ..lot },
        })
    })
}

/// Record a SELL: validates inputs, verifies sufficient open shares,
/// asks the cost-basis matcher for an allocation plan, and commits the
/// transaction plus every allocation (and the lots it touches) atomically.
/// A resubmission with the same `(owner_id, external_id)` returns the
/// original transaction and its allocations rather than erroring.
#[allow(clippy::too_many_arguments)]
pub fn record_sell(
    conn: &mut Connection,
    owner_id: &str,
    symbol: &str,
    quantity: Decimal,
    price: Decimal,
    commission: Decimal,
    transaction_date: NaiveDate,
    method: CostBasisMethod,
    specific_lots: Option<&[(i64, Decimal)]>,
    external_id: Option<String>,
    notes: Option<String>,
) -> Result<SellOutcome> {
    validate_trade_inputs(quantity, price, commission)?;

    if let Some(ext_id) = &external_id {
        if let Some(existing) = db::find_transaction_by_external_id(conn, owner_id, ext_id)? {
            let allocations = existing
                .id
                .map(|id| db::get_allocations_for_transaction(conn, id))
                .transpose()?
                .unwrap_or_default();
            info!(
                "duplicate sell submission for {} external_id {:?}, returning existing record",
                symbol, ext_id
            );
            return Ok(SellOutcome { transaction: existing, allocations });
        }
    }

    let open_lots = db::get_open_lots(conn, owner_id, symbol, LotOrder::PurchaseDateAsc)?;
    let plan = matchers::plan_allocations(method, &open_lots, quantity, specific_lots)?;

    db::with_transaction(conn, |tx| {
        let transaction = Transaction {
            id: None,
            owner_id: owner_id.to_string(),
            symbol: symbol.to_string(),
            kind: TransactionKind::Sell,
            quantity,
            price,
            commission,
            transaction_date,
            external_id: external_id.clone(),
            notes: notes.clone(),
            created_at: chrono::Utc::now(),
        };
        let transaction_id = db::insert_transaction(tx, &transaction)?;

        let mut allocations = Vec::with_capacity(plan.len());
        for entry in &plan {
            let lot = open_lots
                .iter()
                .find(|l| l.id == Some(entry.lot_id))
                .expect("matcher only references lots it was given");

            // Commission is allocated to realized P&L proportionally by
            // quantity, not charged in full to each lot.
            let commission_share = if quantity > Decimal::ZERO {
                commission * entry.quantity / quantity
            } else {
                Decimal::ZERO
            };
            let realized_pnl =
                (price - lot.cost_basis_per_share) * entry.quantity - commission_share;

            let allocation = SaleAllocation {
                id: None,
                sell_transaction_id: transaction_id,
                lot_id: entry.lot_id,
                quantity_sold: entry.quantity,
                cost_basis_per_share: lot.cost_basis_per_share,
                sale_price_per_share: price,
                realized_pnl,
            };
            let allocation_id = db::insert_allocation(tx, &allocation)?;

            let new_remaining = lot.remaining_quantity - entry.quantity;
            db::update_lot_remaining(tx, entry.lot_id, new_remaining, new_remaining <= Decimal::ZERO)?;

            allocations.push(SaleAllocation { id: Some(allocation_id), ..allocation });
        }

        Ok(SellOutcome {
            transaction: Transaction { id: Some(transaction_id), ..transaction },
            allocations,
        })
    })
}

fn validate_trade_inputs(quantity: Decimal, price: Decimal, commission: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(EngineError::Validation("quantity must be positive".to_string()).into());
    }
    if price < Decimal::ZERO {
        return Err(EngineError::Validation("price cannot be negative".to_string()).into());
    }
    if commission < Decimal::ZERO {
        return Err(EngineError::Validation("commission cannot be negative".to_string()).into());
    }
    Ok(())
}
