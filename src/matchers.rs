//! Cost-basis matchers: given a sell quantity and a set of open lots,
//! decide which lots absorb how much. Pure functions, no storage, no
//! validation beyond what the plan itself needs. Extends this
//! codebase's average-cost matcher's pooled running-total idiom to
//! FIFO, LIFO and specific-lot matching.

use crate::db::models::{CostBasisMethod, PositionLot};
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;

/// One lot's contribution to a sell, before it becomes a [`SaleAllocation`](crate::db::models::SaleAllocation) row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlanEntry {
    pub lot_id: i64,
    pub quantity: Decimal,
}

/// Produce an allocation plan covering `quantity` shares from `lots`
/// (already filtered to open lots for the owner+symbol).
///
/// `specific_lots` is only consulted for [`CostBasisMethod::Specific`]; it
/// is a caller-supplied `(lot_id, quantity)` list whose order is preserved
/// in the result.
pub fn plan_allocations(
    method: CostBasisMethod,
    lots: &[PositionLot],
    quantity: Decimal,
    specific_lots: Option<&[(i64, Decimal)]>,
) -> Result<Vec<AllocationPlanEntry>> {
    let available: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
    if quantity > available {
        return Err(EngineError::InsufficientShares {
            requested: quantity,
            available,
        }
        .into());
    }

    match method {
        CostBasisMethod::Fifo => Ok(consume_ordered(lots, quantity, true)),
        CostBasisMethod::Lifo => Ok(consume_ordered(lots, quantity, false)),
        CostBasisMethod::Specific => plan_specific(lots, quantity, specific_lots),
        CostBasisMethod::Average => Ok(plan_average(lots, quantity)),
    }
}

fn consume_ordered(lots: &[PositionLot], quantity: Decimal, ascending: bool) -> Vec<AllocationPlanEntry> {
    let mut ordered: Vec<&PositionLot> = lots.iter().collect();
    ordered.sort_by(|a, b| {
        let by_date = a.purchase_date.cmp(&b.purchase_date);
        let by_date = if ascending { by_date } else { by_date.reverse() };
        by_date.then_with(|| {
            let by_id = a.id.cmp(&b.id);
            if ascending { by_id } else { by_id.reverse() }
        })
    });

    let mut remaining = quantity;
    let mut plan = Vec::new();
    for lot in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(lot.remaining_quantity);
        if take > Decimal::ZERO {
            plan.push(AllocationPlanEntry {
                lot_id: lot.id.expect("open lot must have an id"),
                quantity: take,
            });
            remaining -= take;
        }
    }
    plan
}

fn plan_specific(
    lots: &[PositionLot],
    quantity: Decimal,
    specific_lots: Option<&[(i64, Decimal)]>,
) -> Result<Vec<AllocationPlanEntry>> {
    let requested = specific_lots.ok_or_else(|| {
        EngineError::Validation("specific-lot sells require an explicit lot plan".to_string())
    })?;

    let mut plan = Vec::with_capacity(requested.len());
    let mut total = Decimal::ZERO;

    for &(lot_id, qty) in requested {
        if qty <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "specific-lot quantity for lot {} must be positive",
                lot_id
            ))
            .into());
        }
        let lot = lots.iter().find(|l| l.id == Some(lot_id)).ok_or_else(|| {
            EngineError::Validation(format!("lot {} is not an open lot for this symbol", lot_id))
        })?;
        if qty > lot.remaining_quantity {
            return Err(EngineError::InsufficientShares {
                requested: qty,
                available: lot.remaining_quantity,
            }
            .into());
        }
        total += qty;
        plan.push(AllocationPlanEntry { lot_id, quantity: qty });
    }

    if total != quantity {
        return Err(EngineError::Validation(format!(
            "specific-lot plan totals {} but the sell is for {} shares",
            total, quantity
        ))
        .into());
    }

    Ok(plan)
}

fn plan_average(lots: &[PositionLot], quantity: Decimal) -> Vec<AllocationPlanEntry> {
    let mut ordered: Vec<&PositionLot> = lots.iter().collect();
    ordered.sort_by(|a, b| a.purchase_date.cmp(&b.purchase_date).then_with(|| a.id.cmp(&b.id)));

    let total_remaining: Decimal = ordered.iter().map(|l| l.remaining_quantity).sum();
    if total_remaining <= Decimal::ZERO || ordered.is_empty() {
        return Vec::new();
    }

    let mut plan = Vec::with_capacity(ordered.len());
    let mut allocated = Decimal::ZERO;

    for (i, lot) in ordered.iter().enumerate() {
        let share = if i == ordered.len() - 1 {
            quantity - allocated
        } else {
            (quantity * lot.remaining_quantity / total_remaining).round_dp(8)
        };
        if share > Decimal::ZERO {
            plan.push(AllocationPlanEntry {
                lot_id: lot.id.expect("open lot must have an id"),
                quantity: share,
            });
            allocated += share;
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn lot(id: i64, date: &str, remaining: i64) -> PositionLot {
        PositionLot {
            id: Some(id),
            owner_id: "u1".to_string(),
            symbol: "AAPL".to_string(),
            buy_transaction_id: id,
            original_quantity: Decimal::from(remaining),
            remaining_quantity: Decimal::from(remaining),
            cost_basis_per_share: dec!(10),
            purchase_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            is_closed: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let lots = vec![lot(1, "2024-01-01", 50), lot(2, "2024-02-01", 50)];
        let plan = plan_allocations(CostBasisMethod::Fifo, &lots, dec!(60), None).unwrap();
        assert_eq!(plan, vec![
            AllocationPlanEntry { lot_id: 1, quantity: dec!(50) },
            AllocationPlanEntry { lot_id: 2, quantity: dec!(10) },
        ]);
    }

    #[test]
    fn test_lifo_consumes_newest_first() {
        let lots = vec![lot(1, "2024-01-01", 50), lot(2, "2024-02-01", 50)];
        let plan = plan_allocations(CostBasisMethod::Lifo, &lots, dec!(60), None).unwrap();
        assert_eq!(plan, vec![
            AllocationPlanEntry { lot_id: 2, quantity: dec!(50) },
            AllocationPlanEntry { lot_id: 1, quantity: dec!(10) },
        ]);
    }

    #[test]
    fn test_insufficient_shares() {
        let lots = vec![lot(1, "2024-01-01", 10)];
        let err = plan_allocations(CostBasisMethod::Fifo, &lots, dec!(20), None).unwrap_err();
        assert!(err.to_string().contains("insufficient shares"));
    }

    #[test]
    fn test_specific_lot_preserves_caller_order() {
        let lots = vec![lot(1, "2024-01-01", 50), lot(2, "2024-02-01", 50)];
        let requested = vec![(2, dec!(30)), (1, dec!(20))];
        let plan = plan_allocations(CostBasisMethod::Specific, &lots, dec!(50), Some(&requested)).unwrap();
        assert_eq!(plan, vec![
            AllocationPlanEntry { lot_id: 2, quantity: dec!(30) },
            AllocationPlanEntry { lot_id: 1, quantity: dec!(20) },
        ]);
    }

    #[test]
    fn test_specific_lot_requires_matching_total() {
        let lots = vec![lot(1, "2024-01-01", 50)];
        let requested = vec![(1, dec!(10))];
        let err = plan_allocations(CostBasisMethod::Specific, &lots, dec!(20), Some(&requested)).unwrap_err();
        assert!(err.to_string().contains("totals"));
    }

    #[test]
    fn test_specific_lot_rejects_unknown_lot() {
        let lots = vec![lot(1, "2024-01-01", 50)];
        let requested = vec![(99, dec!(10))];
        let err = plan_allocations(CostBasisMethod::Specific, &lots, dec!(10), Some(&requested)).unwrap_err();
        assert!(err.to_string().contains("not an open lot"));
    }

    #[test]
    fn test_average_pro_rates_across_lots() {
        let lots = vec![lot(1, "2024-01-01", 30), lot(2, "2024-02-01", 70)];
        let plan = plan_allocations(CostBasisMethod::Average, &lots, dec!(50), None).unwrap();
        let total: Decimal = plan.iter().map(|e| e.quantity).sum();
        assert_eq!(total, dec!(50));
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_average_single_lot_takes_exact_quantity() {
        let lots = vec![lot(1, "2024-01-01", 100)];
        let plan = plan_allocations(CostBasisMethod::Average, &lots, dec!(40), None).unwrap();
        assert_eq!(plan, vec![AllocationPlanEntry { lot_id: 1, quantity: dec!(40) }]);
    }
}
