//! Fundamentals provider: income statement, balance sheet, and cash flow
//! line items for the most recent N reporting periods. Grounded on this
//! codebase's Brapi quote client's tolerant multi-field JSON parsing
//! (optional fields, warn-and-skip on unrecognized shapes rather than
//! failing the whole batch).

use crate::db::models::{FinancialLineItem, FinancialStatement};
use crate::error::{EngineError, Result, UpstreamErrorCategory};
use crate::providers::classify_status;
use anyhow::Context;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    periods: Vec<StatementPeriod>,
}

#[derive(Debug, Deserialize)]
struct StatementPeriod {
    #[serde(rename = "endDate")]
    end_date: String,
    #[serde(default)]
    items: HashMap<String, serde_json::Value>,
}

/// Fetches financial statement line items for a symbol's most recent
/// reporting periods, one statement (income/balance/cash-flow) at a time.
pub struct FundamentalsProvider {
    client: Client,
    api_key: Option<String>,
}

impl FundamentalsProvider {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("equity-ledger/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, api_key })
    }

    /// Fetch line items for the most recent `periods` reporting periods
    /// of `statement` for `symbol`.
    pub async fn fetch_statement(
        &self,
        symbol: &str,
        statement: FinancialStatement,
        periods: u32,
    ) -> Result<Vec<FinancialLineItem>> {
        let endpoint = match statement {
            FinancialStatement::Income => "income-statement",
            FinancialStatement::BalanceSheet => "balance-sheet",
            FinancialStatement::CashFlow => "cash-flow",
        };

        info!(
            "fetching {} ({} periods) for {}",
            endpoint, periods, symbol
        );

        let mut url = format!(
            "https://finnhub.io/api/v1/stock/financials-reported?symbol={}&statement={}&freq=annual",
            symbol, endpoint
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&token={}", key));
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let category = classify_status(response.status());
            if category == UpstreamErrorCategory::NoData {
                return Ok(Vec::new());
            }
            return Err(EngineError::UpstreamUnavailable(format!(
                "HTTP {} fetching {} for {}",
                response.status(),
                endpoint,
                symbol
            ))
            .into());
        }

        let data: StatementResponse = response
            .json()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("schema mismatch: {}", e)))?;

        let mut rows = parse_periods(symbol, &data.periods);
        rows.sort_by(|a, b| b.period_end.cmp(&a.period_end));

        let recent_period_ends: std::collections::BTreeSet<NaiveDate> = rows
            .iter()
            .map(|r| r.period_end)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .rev()
            .take(periods as usize)
            .collect();

        rows.retain(|r| recent_period_ends.contains(&r.period_end));
        Ok(rows)
    }
}

fn parse_periods(symbol: &str, periods: &[StatementPeriod]) -> Vec<FinancialLineItem> {
    let mut rows = Vec::new();
    for period in periods {
        let period_end = match NaiveDate::parse_from_str(&period.end_date, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                warn!(
                    "skipping financial period for {} with unparsable end date {:?}",
                    symbol, period.end_date
                );
                continue;
            }
        };

        for (line_item, value) in &period.items {
            match value_to_decimal(value) {
                Some(v) => rows.push(FinancialLineItem {
                    symbol: symbol.to_string(),
                    period_end,
                    line_item: line_item.clone(),
                    value: v,
                }),
                None => warn!(
                    "skipping non-numeric line item {:?} for {} period {}",
                    line_item, symbol, period_end
                ),
            }
        }
    }
    rows
}

fn value_to_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
