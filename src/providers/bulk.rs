//! Bulk historical price provider: full ascending OHLCV series for a
//! symbol, used for first loads and too-stale-to-patch refreshes.
//! Grounded on this codebase's COTAHIST importer's
//! conditional-GET/cache-freshness idiom, generalized from a
//! fixed-width national-exchange dump to a generic bulk CSV endpoint.

use crate::db::models::StockPrice;
use crate::error::{EngineError, Result, UpstreamErrorCategory};
use crate::providers::{backoff_delay, classify_status, validate_rows, PriceSeries};
use anyhow::Context;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Fetches a full ascending OHLCV history for a symbol from a bulk CSV
/// endpoint, optionally bounded below by `start_date`.
pub struct BulkPriceProvider {
    client: Client,
    max_retries: u32,
    base_delay_seconds: f64,
    base_url: String,
}

impl BulkPriceProvider {
    pub fn new(max_retries: u32, base_delay_seconds: f64, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("equity-ledger/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            max_retries,
            base_delay_seconds,
            base_url: "https://stooq.com/q/d/l".to_string(),
        })
    }

    /// Fetch the full history for `symbol`, optionally bounded below by
    /// `start_date`, returning a full ascending OHLCV series.
    pub async fn fetch_full(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
    ) -> Result<PriceSeries> {
        let mut attempt = 0u32;
        loop {
            match self.try_fetch(symbol).await {
                Ok(body) => {
                    let mut rows = parse_bulk_csv(symbol, &body)?;
                    if let Some(start) = start_date {
                        rows.retain(|r| r.date >= start);
                    }
                    return Ok(validate_rows(symbol, rows));
                }
                Err((UpstreamErrorCategory::Retryable, msg)) if attempt < self.max_retries => {
                    warn!(
                        "retryable failure fetching bulk history for {} (attempt {}/{}): {}",
                        symbol, attempt + 1, self.max_retries, msg
                    );
                    backoff_delay(self.base_delay_seconds, attempt).await;
                    attempt += 1;
                }
                Err((UpstreamErrorCategory::NoData, _)) => return Ok(PriceSeries::default()),
                Err((_, msg)) => return Err(EngineError::UpstreamUnavailable(msg).into()),
            }
        }
    }

    async fn try_fetch(&self, symbol: &str) -> std::result::Result<String, (UpstreamErrorCategory, String)> {
        let url = format!("{}?s={}&i=d", self.base_url, symbol.to_lowercase());
        info!("fetching bulk history for {}", symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| (UpstreamErrorCategory::Retryable, e.to_string()))?;

        if !response.status().is_success() {
            return Err((classify_status(response.status()), format!("HTTP {}", response.status())));
        }

        response
            .text()
            .await
            .map_err(|e| (UpstreamErrorCategory::Fatal, e.to_string()))
    }
}

/// Parse a bulk CSV body with header `Date,Open,High,Low,Close,Volume`
/// (optionally `AdjClose` as a seventh column). Malformed lines are
/// skipped; the caller's `validate_rows` pass handles semantic validation.
fn parse_bulk_csv(symbol: &str, body: &str) -> Result<Vec<StockPrice>> {
    let mut rows = Vec::new();
    for (i, line) in body.lines().enumerate() {
        if i == 0 || line.trim().is_empty() {
            continue; // header
        }
        if let Some(row) = parse_bulk_csv_line(symbol, line) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn parse_bulk_csv_line(symbol: &str, line: &str) -> Option<StockPrice> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 6 {
        return None;
    }
    let date = NaiveDate::parse_from_str(fields[0].trim(), "%Y-%m-%d").ok()?;
    let open = Decimal::from_str(fields[1].trim()).ok()?;
    let high = Decimal::from_str(fields[2].trim()).ok()?;
    let low = Decimal::from_str(fields[3].trim()).ok()?;
    let close = Decimal::from_str(fields[4].trim()).ok()?;
    let volume: i64 = fields[5].trim().parse().ok()?;
    let adj_close = fields
        .get(6)
        .and_then(|s| Decimal::from_str(s.trim()).ok())
        .unwrap_or(close);

    Some(StockPrice {
        symbol: symbol.to_string(),
        date,
        open,
        high,
        low,
        close,
        adj_close,
        volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bulk_csv_line() {
        let row = parse_bulk_csv_line("AAPL", "2024-01-02,184.22,185.88,183.43,185.64,82488700").unwrap();
        assert_eq!(row.symbol, "AAPL");
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(row.close, Decimal::from_str("185.64").unwrap());
        assert_eq!(row.volume, 82488700);
        assert_eq!(row.adj_close, row.close);
    }

    #[test]
    fn test_parse_bulk_csv_line_with_adj_close() {
        let row = parse_bulk_csv_line("AAPL", "2024-01-02,184.22,185.88,183.43,185.64,82488700,185.00").unwrap();
        assert_eq!(row.adj_close, Decimal::from_str("185.00").unwrap());
    }

    #[test]
    fn test_parse_bulk_csv_line_rejects_malformed() {
        assert!(parse_bulk_csv_line("AAPL", "not,enough,fields").is_none());
        assert!(parse_bulk_csv_line("AAPL", "bad-date,1,2,3,4,5").is_none());
    }

    #[test]
    fn test_parse_bulk_csv_skips_header() {
        let body = "Date,Open,High,Low,Close,Volume\n2024-01-02,184.22,185.88,183.43,185.64,82488700\n";
        let rows = parse_bulk_csv("AAPL", body).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_parse_bulk_csv_applies_no_filtering_itself() {
        let body = "Date,Open,High,Low,Close,Volume\n\
                     2024-01-02,184.22,185.88,183.43,185.64,82488700\n\
                     2024-01-03,185.00,186.00,184.00,185.50,70000000\n";
        let rows = parse_bulk_csv("AAPL", body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(rows[1].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[tokio::test]
    async fn test_provider_builds_with_timeout() {
        let provider = BulkPriceProvider::new(3, 0.01, Duration::from_secs(5));
        assert!(provider.is_ok());
    }
}
