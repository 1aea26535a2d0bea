//! Data service: per-symbol acquisition orchestration plus a
//! bounded-concurrency batch runner. Grounded on this codebase's price
//! resolver's `ensure_prices_available_*` + semaphore fan-out pattern,
//! generalized from "resolve gaps across many assets in one connection"
//! to "each symbol gets its own independently-committed transaction, no
//! symbol's failure blocks another's".

use crate::config::Config;
use crate::db;
use crate::error::{EngineError, UpstreamErrorCategory};
use crate::policy::{self, AcquisitionStrategy};
use crate::providers::api::{classify_error, ApiPriceProvider};
use crate::providers::bulk::BulkPriceProvider;
use crate::providers::fundamentals::FundamentalsProvider;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// Number of most-recent annual periods fetched per financial statement.
const FUNDAMENTALS_PERIODS: u32 = 4;

/// Outcome of bringing one symbol's data up to date.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub success: bool,
    pub strategy_used: Option<String>,
    pub rows_added: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub financial_refreshed: bool,
    pub error_category: Option<String>,
    pub error_message: Option<String>,
}

impl SymbolResult {
    fn failure(symbol: &str, err: &anyhow::Error) -> Self {
        let category = err
            .downcast_ref::<EngineError>()
            .map(|e| e.category().to_string());
        SymbolResult {
            symbol: symbol.to_string(),
            success: false,
            strategy_used: None,
            rows_added: 0,
            first_date: None,
            last_date: None,
            financial_refreshed: false,
            error_category: category,
            error_message: Some(err.to_string()),
        }
    }
}

pub struct DataService {
    config: Config,
    api: ApiPriceProvider,
    bulk: BulkPriceProvider,
    fundamentals: FundamentalsProvider,
}

impl DataService {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let timeout = std::time::Duration::from_secs(config.per_attempt_timeout_secs);
        let api = ApiPriceProvider::new(config.max_retries, config.base_delay_seconds, timeout)?;
        let bulk = BulkPriceProvider::new(config.max_retries, config.base_delay_seconds, timeout)?;
        let fundamentals = FundamentalsProvider::new(config.api_key.clone(), timeout)?;
        Ok(Self {
            config,
            api,
            bulk,
            fundamentals,
        })
    }

    /// Bring a single symbol's stored price history (and, if requested,
    /// fundamentals) up to date in one independent transaction. Setting
    /// `include_price` false skips acquisition entirely and only considers
    /// a fundamentals refresh (the `--financial-only` flag).
    pub async fn ensure_symbol(
        &self,
        conn: &Mutex<Connection>,
        symbol: &str,
        include_price: bool,
        include_financial: bool,
    ) -> SymbolResult {
        let today = chrono::Local::now().date_naive();

        if let Err(e) = db::ensure_stock(&*conn.lock().await, symbol) {
            return SymbolResult::failure(symbol, &e);
        }

        let (rows_added, strategy_used, first_date, last_date) = if include_price {
            let last_stored = {
                let guard = conn.lock().await;
                match db::get_last_price_date(&guard, symbol) {
                    Ok(v) => v,
                    Err(e) => return SymbolResult::failure(symbol, &e),
                }
            };

            let plan = policy::plan_price_acquisition(
                last_stored,
                today,
                self.config.incremental_threshold_days,
            );

            let (series, strategy_used) = match self.fetch_with_fallback(symbol, plan).await {
                Ok(v) => v,
                Err(e) => return SymbolResult::failure(symbol, &e),
            };

            let rows_added = {
                let mut guard = conn.lock().await;
                match db::upsert_prices(&mut guard, &series.rows) {
                    Ok(n) => n,
                    Err(e) => return SymbolResult::failure(symbol, &e),
                }
            };

            if series.dropped > 0 {
                warn!(
                    "{} price row(s) dropped by validation for {}",
                    series.dropped, symbol
                );
            }

            (
                rows_added,
                Some(strategy_used),
                series.rows.first().map(|r| r.date),
                series.rows.last().map(|r| r.date),
            )
        } else {
            (0, None, None, None)
        };

        let mut financial_refreshed = false;
        if include_financial {
            let refresh_key = format!("fundamentals_last_refresh:{}", symbol);
            let last_refreshed = {
                let guard = conn.lock().await;
                db::get_metadata(&guard, &refresh_key)
                    .ok()
                    .flatten()
                    .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            };

            if policy::needs_fundamentals_refresh(
                last_refreshed,
                today,
                self.config.financial_refresh_days,
            ) {
                match self.refresh_fundamentals(conn, symbol).await {
                    Ok(()) => {
                        financial_refreshed = true;
                        let guard = conn.lock().await;
                        let _ = db::set_metadata(&guard, &refresh_key, &today.format("%Y-%m-%d").to_string());
                    }
                    Err(e) => warn!("fundamentals refresh failed for {}: {}", symbol, e),
                }
            }
        }

        SymbolResult {
            symbol: symbol.to_string(),
            success: true,
            strategy_used,
            rows_added,
            first_date,
            last_date,
            financial_refreshed,
            error_category: None,
            error_message: None,
        }
    }

    async fn fetch_with_fallback(
        &self,
        symbol: &str,
        plan: policy::PricePlan,
    ) -> anyhow::Result<(crate::providers::PriceSeries, String)> {
        match plan.strategy {
            AcquisitionStrategy::Bulk => {
                let series = self
                    .bulk
                    .fetch_full(symbol, plan.from.or(Some(self.config.history_start_default)))
                    .await?;
                Ok((series, "bulk".to_string()))
            }
            AcquisitionStrategy::Incremental => {
                let from = plan.from.unwrap_or(self.config.history_start_default);
                match self.api.fetch_range(symbol, from, plan.to).await {
                    Ok(series) => Ok((series, "incremental".to_string())),
                    Err(e) => {
                        let retryable = e
                            .downcast_ref::<EngineError>()
                            .map(|err| match err {
                                EngineError::UpstreamUnavailable(msg) => {
                                    classify_error(msg) == UpstreamErrorCategory::Retryable
                                }
                                _ => false,
                            })
                            .unwrap_or(false);

                        if !retryable {
                            return Err(e);
                        }

                        info!(
                            "incremental fetch for {} exhausted retries, escalating to bulk",
                            symbol
                        );
                        let escalated = policy::escalate_to_bulk_on_retryable_failure(plan);
                        let series = self
                            .bulk
                            .fetch_full(
                                symbol,
                                escalated.from.or(Some(self.config.history_start_default)),
                            )
                            .await?;
                        Ok((series, "bulk_after_escalation".to_string()))
                    }
                }
            }
        }
    }

    async fn refresh_fundamentals(&self, conn: &Mutex<Connection>, symbol: &str) -> anyhow::Result<()> {
        use crate::db::models::FinancialStatement::{BalanceSheet, CashFlow, Income};

        for statement in [Income, BalanceSheet, CashFlow] {
            let rows = self
                .fundamentals
                .fetch_statement(symbol, statement, FUNDAMENTALS_PERIODS)
                .await?;
            if rows.is_empty() {
                continue;
            }
            let mut guard = conn.lock().await;
            db::upsert_financials(&mut guard, statement, &rows)?;
        }
        Ok(())
    }

    /// Bring many symbols up to date concurrently, bounded by
    /// `config.worker_pool_size`. Never fail-fast: every symbol gets an
    /// independent result, in completion order.
    pub async fn batch(
        self: Arc<Self>,
        conn: Connection,
        symbols: Vec<String>,
        include_price: bool,
        include_financial: bool,
    ) -> Vec<SymbolResult> {
        let conn = Arc::new(Mutex::new(conn));
        let semaphore = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let mut join_set = tokio::task::JoinSet::new();

        for symbol in symbols {
            let service = Arc::clone(&self);
            let conn = Arc::clone(&conn);
            let sem = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore not closed");
                service
                    .ensure_symbol(&conn, &symbol, include_price, include_financial)
                    .await
            });
        }

        let mut results = Vec::new();
        while let Some(outcome) = join_set.join_next().await {
            match outcome {
                Ok(result) => results.push(result),
                Err(join_err) => warn!("data service task panicked: {}", join_err),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_result_failure_extracts_category() {
        let err: anyhow::Error = EngineError::NoPrice {
            symbol: "AAPL".to_string(),
            date: "2024-01-01".to_string(),
        }
        .into();
        let result = SymbolResult::failure("AAPL", &err);
        assert!(!result.success);
        assert_eq!(result.error_category.as_deref(), Some("no_price"));
    }

    #[test]
    fn test_symbol_result_failure_without_engine_error() {
        let err = anyhow::anyhow!("plain failure");
        let result = SymbolResult::failure("AAPL", &err);
        assert_eq!(result.error_category, None);
        assert_eq!(result.error_message.as_deref(), Some("plain failure"));
    }
}
