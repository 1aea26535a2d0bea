//! Incremental API price provider: bounded-range OHLCV fetches, used for
//! patching a symbol that already has recent history. Grounded on this
//! codebase's existing Yahoo Finance chart-API client.

use crate::db::models::StockPrice;
use crate::error::{EngineError, Result, UpstreamErrorCategory};
use crate::providers::{backoff_delay, classify_status, validate_rows, PriceSeries};
use anyhow::Context;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
    adjclose: Option<Vec<ChartAdjClose>>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<i64>>>,
}

#[derive(Debug, Deserialize)]
struct ChartAdjClose {
    adjclose: Option<Vec<Option<f64>>>,
}

/// Fetches a bounded `[from, to]` OHLCV range for a single symbol via an
/// HTTP candle API, retrying transient failures with exponential backoff.
pub struct ApiPriceProvider {
    client: Client,
    max_retries: u32,
    base_delay_seconds: f64,
}

impl ApiPriceProvider {
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
        })
    }

    /// Fetch `[from, to]` inclusive, retrying retryable failures up to
    /// `max_retries` times before surfacing `UpstreamUnavailable`.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PriceSeries> {
        let mut attempt = 0u32;
        loop {
            match self.try_fetch_range(symbol, from, to).await {
                Ok(series) => return Ok(series),
                Err((UpstreamErrorCategory::Retryable, msg)) if attempt < self.max_retries => {
                    warn!(
                        "retryable failure fetching {} (attempt {}/{}): {}",
                        symbol, attempt + 1, self.max_retries, msg
                    );
                    backoff_delay(self.base_delay_seconds, attempt).await;
                    attempt += 1;
                }
                Err((UpstreamErrorCategory::NoData, _)) => {
                    return Ok(PriceSeries::default());
                }
                Err((_, msg)) => {
                    return Err(EngineError::UpstreamUnavailable(msg).into());
                }
            }
        }
    }

    async fn try_fetch_range(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> std::result::Result<PriceSeries, (UpstreamErrorCategory, String)> {
        let from_ts = from
            .and_hms_opt(0, 0, 0)
            .ok_or((UpstreamErrorCategory::Fatal, "invalid from date".to_string()))?
            .and_utc()
            .timestamp();
        let to_ts = to
            .and_hms_opt(23, 59, 59)
            .ok_or((UpstreamErrorCategory::Fatal, "invalid to date".to_string()))?
            .and_utc()
            .timestamp();

        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            symbol, from_ts, to_ts
        );

        info!("fetching incremental range for {} from {} to {}", symbol, from, to);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| (UpstreamErrorCategory::Retryable, e.to_string()))?;

        if !response.status().is_success() {
            let category = classify_status(response.status());
            return Err((category, format!("HTTP {}", response.status())));
        }

        let data: ChartResponse = response
            .json()
            .await
            .map_err(|e| (UpstreamErrorCategory::Fatal, format!("schema mismatch: {}", e)))?;

        if let Some(err) = data.chart.error {
            return Err((
                UpstreamErrorCategory::NoData,
                format!("{}: {}", err.code, err.description),
            ));
        }

        let result = match data.chart.result.and_then(|r| r.into_iter().next()) {
            Some(r) => r,
            None => return Ok(PriceSeries::default()),
        };

        let timestamps = result.timestamp.unwrap_or_default();
        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .unwrap_or(ChartQuote {
                open: None,
                high: None,
                low: None,
                close: None,
                volume: None,
            });
        let adjcloses = result
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .and_then(|a| a.adjclose)
            .unwrap_or_default();

        let opens = quote.open.unwrap_or_default();
        let highs = quote.high.unwrap_or_default();
        let lows = quote.low.unwrap_or_default();
        let closes = quote.close.unwrap_or_default();
        let volumes = quote.volume.unwrap_or_default();

        let mut rows = Vec::new();
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = match chrono::DateTime::from_timestamp(ts, 0) {
                Some(d) => d.date_naive(),
                None => continue,
            };
            let close = match closes.get(i).copied().flatten() {
                Some(c) => c,
                None => continue,
            };
            let to_decimal = |v: Option<f64>| v.and_then(Decimal::from_f64_retain).unwrap_or(Decimal::ZERO);
            let adj = adjcloses.get(i).copied().flatten().unwrap_or(close);

            rows.push(StockPrice {
                symbol: symbol.to_string(),
                date,
                open: to_decimal(opens.get(i).copied().flatten()),
                high: to_decimal(highs.get(i).copied().flatten()),
                low: to_decimal(lows.get(i).copied().flatten()),
                close: Decimal::from_f64_retain(close).unwrap_or(Decimal::ZERO),
                adj_close: Decimal::from_f64_retain(adj).unwrap_or(Decimal::ZERO),
                volume: volumes.get(i).copied().flatten().unwrap_or(0),
            });
        }

        debug!("fetched {} raw rows for {}", rows.len(), symbol);
        Ok(validate_rows(symbol, rows))
    }
}

/// Classify an arbitrary adapter error for the acquisition policy's
/// fallback decision.
pub fn classify_error(message: &str) -> UpstreamErrorCategory {
    if message.contains("HTTP 429") || message.contains("HTTP 5") {
        UpstreamErrorCategory::Retryable
    } else if message.to_lowercase().contains("no data") || message.to_lowercase().contains("not found") {
        UpstreamErrorCategory::NoData
    } else {
        UpstreamErrorCategory::Fatal
    }
}
