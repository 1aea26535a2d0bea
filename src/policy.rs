//! Acquisition policy: decides bulk vs. incremental-API strategy for a
//! single symbol, and whether fundamentals need a refresh. Pure
//! functions only, no I/O, no storage access. Generalized from this
//! codebase's price resolver, which picked bulk vs. API per-asset from
//! gaps in stored history.

use chrono::NaiveDate;

/// Which adapter should be used to bring a symbol's price history
/// up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStrategy {
    /// No stored history, or the gap exceeds the incremental threshold:
    /// fetch the full series via the bulk provider.
    Bulk,
    /// Recent, contiguous-enough history: patch the gap via the
    /// range-bounded API provider.
    Incremental,
}

#[derive(Debug, Clone, Copy)]
pub struct PricePlan {
    pub strategy: AcquisitionStrategy,
    /// Start of the range to fetch. For `Bulk`, `None` means "from the
    /// beginning" (bounded later by the configured history-start default).
    pub from: Option<NaiveDate>,
    pub to: NaiveDate,
}

/// Decide how to bring a symbol's price history up to `today`, given the
/// date of its last stored price row (if any) and the configured
/// incremental-vs-bulk threshold.
pub fn plan_price_acquisition(
    last_stored_date: Option<NaiveDate>,
    today: NaiveDate,
    incremental_threshold_days: i64,
) -> PricePlan {
    match last_stored_date {
        None => PricePlan {
            strategy: AcquisitionStrategy::Bulk,
            from: None,
            to: today,
        },
        Some(last) => {
            let gap_days = (today - last).num_days();
            if gap_days <= 0 {
                // Already current; a zero-length incremental patch is a no-op.
                PricePlan {
                    strategy: AcquisitionStrategy::Incremental,
                    from: Some(last),
                    to: today,
                }
            } else if gap_days > incremental_threshold_days {
                PricePlan {
                    strategy: AcquisitionStrategy::Bulk,
                    from: None,
                    to: today,
                }
            } else {
                PricePlan {
                    strategy: AcquisitionStrategy::Incremental,
                    from: Some(last + chrono::Duration::days(1)),
                    to: today,
                }
            }
        }
    }
}

/// A retryable incremental failure escalates to a bulk retry rather than
/// giving up.
pub fn escalate_to_bulk_on_retryable_failure(plan: PricePlan) -> PricePlan {
    PricePlan {
        strategy: AcquisitionStrategy::Bulk,
        from: None,
        to: plan.to,
    }
}

/// Whether a symbol's fundamentals need refreshing: no data yet, or the
/// last refresh is older than `refresh_days`.
pub fn needs_fundamentals_refresh(
    last_refreshed: Option<NaiveDate>,
    today: NaiveDate,
    refresh_days: i64,
) -> bool {
    match last_refreshed {
        None => true,
        Some(last) => (today - last).num_days() > refresh_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_plan_no_history_uses_bulk() {
        let plan = plan_price_acquisition(None, date("2024-06-01"), 100);
        assert_eq!(plan.strategy, AcquisitionStrategy::Bulk);
        assert_eq!(plan.from, None);
    }

    #[test]
    fn test_plan_small_gap_uses_incremental() {
        let plan = plan_price_acquisition(Some(date("2024-05-25")), date("2024-06-01"), 100);
        assert_eq!(plan.strategy, AcquisitionStrategy::Incremental);
        assert_eq!(plan.from, Some(date("2024-05-26")));
        assert_eq!(plan.to, date("2024-06-01"));
    }

    #[test]
    fn test_plan_large_gap_uses_bulk() {
        let plan = plan_price_acquisition(Some(date("2023-01-01")), date("2024-06-01"), 100);
        assert_eq!(plan.strategy, AcquisitionStrategy::Bulk);
    }

    #[test]
    fn test_plan_gap_exactly_at_threshold_uses_incremental() {
        let last = date("2024-06-01") - chrono::Duration::days(100);
        let plan = plan_price_acquisition(Some(last), date("2024-06-01"), 100);
        assert_eq!(plan.strategy, AcquisitionStrategy::Incremental);
    }

    #[test]
    fn test_plan_already_current_is_noop_incremental() {
        let today = date("2024-06-01");
        let plan = plan_price_acquisition(Some(today), today, 100);
        assert_eq!(plan.strategy, AcquisitionStrategy::Incremental);
        assert_eq!(plan.from, Some(today));
    }

    #[test]
    fn test_escalate_to_bulk() {
        let plan = PricePlan {
            strategy: AcquisitionStrategy::Incremental,
            from: Some(date("2024-05-01")),
            to: date("2024-06-01"),
        };
        let escalated = escalate_to_bulk_on_retryable_failure(plan);
        assert_eq!(escalated.strategy, AcquisitionStrategy::Bulk);
        assert_eq!(escalated.from, None);
        assert_eq!(escalated.to, date("2024-06-01"));
    }

    #[test]
    fn test_needs_fundamentals_refresh_no_data() {
        assert!(needs_fundamentals_refresh(None, date("2024-06-01"), 90));
    }

    #[test]
    fn test_needs_fundamentals_refresh_stale() {
        let last = date("2024-06-01") - chrono::Duration::days(91);
        assert!(needs_fundamentals_refresh(Some(last), date("2024-06-01"), 90));
    }

    #[test]
    fn test_needs_fundamentals_refresh_fresh() {
        let last = date("2024-06-01") - chrono::Duration::days(10);
        assert!(!needs_fundamentals_refresh(Some(last), date("2024-06-01"), 90));
    }
}
