//! Provider adapters.
//!
//! Adapters never touch storage: they fetch, validate and return rows.
//! Callers (the acquisition policy and data service) decide what to do
//! with retryable vs. fatal failures.

pub mod api;
pub mod bulk;
pub mod fundamentals;

use crate::db::models::StockPrice;
use crate::error::UpstreamErrorCategory;
use chrono::NaiveDate;
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// A bounded range of OHLCV rows returned by a provider call, plus a count
/// of rows dropped during validation.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub rows: Vec<StockPrice>,
    pub dropped: usize,
}

/// Classify an HTTP status / transport failure into one of three
/// buckets: retryable, fatal, or "upstream had nothing".
pub fn classify_status(status: reqwest::StatusCode) -> UpstreamErrorCategory {
    if status.as_u16() == 429 || status.is_server_error() {
        UpstreamErrorCategory::Retryable
    } else if status == reqwest::StatusCode::NOT_FOUND {
        UpstreamErrorCategory::NoData
    } else {
        UpstreamErrorCategory::Fatal
    }
}

/// Validate and filter a raw row sequence: dates must be strictly
/// increasing, volume non-negative, and `low <= open, close <= high`.
/// Bad rows are dropped (not the whole batch) with a counted warning.
pub fn validate_rows(symbol: &str, mut rows: Vec<StockPrice>) -> PriceSeries {
    rows.sort_by_key(|r| r.date);
    let mut out = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;
    let mut last_date: Option<NaiveDate> = None;

    for row in rows {
        let monotonic = last_date.map(|d| row.date > d).unwrap_or(true);
        let volume_ok = row.volume >= 0;
        let ohlc_ok = row.low <= row.open
            && row.low <= row.close
            && row.open <= row.high
            && row.close <= row.high
            && row.low <= row.high;

        if !monotonic || !volume_ok || !ohlc_ok {
            dropped += 1;
            continue;
        }

        last_date = Some(row.date);
        out.push(row);
    }

    if dropped > 0 {
        warn!("dropped {} invalid price row(s) for {}", dropped, symbol);
    }

    PriceSeries { rows: out, dropped }
}

/// Sleep for an exponential-backoff-with-jitter delay before attempt
/// number `attempt` (0-indexed), bounded by `max_retries`.
pub async fn backoff_delay(base_delay_seconds: f64, attempt: u32) {
    let exp = base_delay_seconds * 2f64.powi(attempt as i32);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..base_delay_seconds.max(0.1));
    tokio::time::sleep(Duration::from_secs_f64(exp + jitter)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn row(date: &str, open: i64, high: i64, low: i64, close: i64, volume: i64) -> StockPrice {
        StockPrice {
            symbol: "AAPL".to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: Decimal::from(open),
            high: Decimal::from(high),
            low: Decimal::from(low),
            close: Decimal::from(close),
            adj_close: Decimal::from(close),
            volume,
        }
    }

    #[test]
    fn test_validate_rows_keeps_good_rows() {
        let rows = vec![row("2024-01-01", 10, 12, 9, 11, 1000)];
        let series = validate_rows("AAPL", rows);
        assert_eq!(series.rows.len(), 1);
        assert_eq!(series.dropped, 0);
    }

    #[test]
    fn test_validate_rows_drops_bad_ohlc() {
        let rows = vec![row("2024-01-01", 10, 9, 12, 11, 1000)];
        let series = validate_rows("AAPL", rows);
        assert_eq!(series.rows.len(), 0);
        assert_eq!(series.dropped, 1);
    }

    #[test]
    fn test_validate_rows_drops_negative_volume() {
        let rows = vec![row("2024-01-01", 10, 12, 9, 11, -5)];
        let series = validate_rows("AAPL", rows);
        assert_eq!(series.dropped, 1);
    }

    #[test]
    fn test_validate_rows_drops_non_monotonic_duplicate_dates() {
        let rows = vec![
            row("2024-01-02", 10, 12, 9, 11, 1000),
            row("2024-01-02", 10, 12, 9, 11, 1000),
        ];
        let series = validate_rows("AAPL", rows);
        assert_eq!(series.rows.len(), 1);
        assert_eq!(series.dropped, 1);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            UpstreamErrorCategory::Retryable
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            UpstreamErrorCategory::Retryable
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::NOT_FOUND),
            UpstreamErrorCategory::NoData
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::BAD_REQUEST),
            UpstreamErrorCategory::Fatal
        );
    }
}
