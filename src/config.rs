//! Typed configuration.
//!
//! Resolution order: environment variables, then an optional TOML file,
//! then hard defaults. No ad-hoc key-value bags: every setting is a
//! typed field on [`Config`].

use crate::db::models::{MissingPriceStrategy, PriceSource};
use crate::error::Result;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub api_key: Option<String>,
    pub incremental_threshold_days: i64,
    pub financial_refresh_days: i64,
    pub max_retries: u32,
    pub base_delay_seconds: f64,
    pub price_source: PriceSource,
    pub missing_price_strategy: MissingPriceStrategy,
    pub worker_pool_size: usize,
    pub history_start_default: NaiveDate,
    pub per_attempt_timeout_secs: u64,
    pub total_deadline_secs: u64,
}

/// Mirrors [`Config`], but every field optional: the shape of an
/// `equity-ledger.toml` file on disk.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    db_path: Option<PathBuf>,
    api_key: Option<String>,
    incremental_threshold_days: Option<i64>,
    financial_refresh_days: Option<i64>,
    max_retries: Option<u32>,
    base_delay_seconds: Option<f64>,
    price_source: Option<String>,
    missing_price_strategy: Option<String>,
    worker_pool_size: Option<usize>,
    history_start_default: Option<String>,
    per_attempt_timeout_secs: Option<u64>,
    total_deadline_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: crate::db::get_default_db_path().unwrap_or_else(|_| PathBuf::from("data.db")),
            api_key: None,
            incremental_threshold_days: 100,
            financial_refresh_days: 90,
            max_retries: 5,
            base_delay_seconds: 1.0,
            price_source: PriceSource::AdjClose,
            missing_price_strategy: MissingPriceStrategy::Backfill,
            worker_pool_size: 4,
            history_start_default: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            per_attempt_timeout_secs: 30,
            total_deadline_secs: 300,
        }
    }
}

impl Config {
    /// Resolve configuration: env vars override an optional TOML file,
    /// which overrides defaults.
    pub fn load(toml_path: Option<&Path>) -> Result<Config> {
        let mut config = Config::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {:?}", path))?;
                let file_config: FileConfig = toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                apply_file_config(&mut config, file_config);
            }
        }

        apply_env(&mut config);
        Ok(config)
    }
}

fn apply_file_config(config: &mut Config, file: FileConfig) {
    if let Some(v) = file.db_path {
        config.db_path = v;
    }
    if let Some(v) = file.api_key {
        config.api_key = Some(v);
    }
    if let Some(v) = file.incremental_threshold_days {
        config.incremental_threshold_days = v;
    }
    if let Some(v) = file.financial_refresh_days {
        config.financial_refresh_days = v;
    }
    if let Some(v) = file.max_retries {
        config.max_retries = v;
    }
    if let Some(v) = file.base_delay_seconds {
        config.base_delay_seconds = v;
    }
    if let Some(v) = file.price_source.and_then(|s| PriceSource::from_str(&s).ok()) {
        config.price_source = v;
    }
    if let Some(v) = file
        .missing_price_strategy
        .and_then(|s| MissingPriceStrategy::from_str(&s).ok())
    {
        config.missing_price_strategy = v;
    }
    if let Some(v) = file.worker_pool_size {
        config.worker_pool_size = v;
    }
    if let Some(v) = file
        .history_start_default
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
    {
        config.history_start_default = v;
    }
    if let Some(v) = file.per_attempt_timeout_secs {
        config.per_attempt_timeout_secs = v;
    }
    if let Some(v) = file.total_deadline_secs {
        config.total_deadline_secs = v;
    }
}

fn apply_env(config: &mut Config) {
    if let Ok(v) = std::env::var("DB_PATH") {
        config.db_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("FINNHUB_API_KEY") {
        config.api_key = Some(v);
    }
    if let Ok(v) = env_parsed::<i64>("STOCK_INCREMENTAL_THRESHOLD_DAYS") {
        config.incremental_threshold_days = v;
    }
    if let Ok(v) = env_parsed::<i64>("FINANCIAL_REFRESH_DAYS") {
        config.financial_refresh_days = v;
    }
    if let Ok(v) = env_parsed::<u32>("MAX_RETRIES") {
        config.max_retries = v;
    }
    if let Ok(v) = env_parsed::<f64>("BASE_DELAY_SECONDS") {
        config.base_delay_seconds = v;
    }
    if let Ok(s) = std::env::var("PRICE_SOURCE") {
        if let Ok(v) = PriceSource::from_str(&s) {
            config.price_source = v;
        }
    }
    if let Ok(s) = std::env::var("MISSING_PRICE_STRATEGY") {
        if let Ok(v) = MissingPriceStrategy::from_str(&s) {
            config.missing_price_strategy = v;
        }
    }
    if let Ok(v) = env_parsed::<usize>("WORKER_POOL_SIZE") {
        config.worker_pool_size = v;
    }
    if let Ok(s) = std::env::var("HISTORY_START_DEFAULT") {
        if let Ok(v) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
            config.history_start_default = v;
        }
    }
    if let Ok(v) = env_parsed::<u64>("HTTP_TIMEOUT_SECONDS") {
        config.per_attempt_timeout_secs = v;
    }
    if let Ok(v) = env_parsed::<u64>("TOTAL_DEADLINE_SECONDS") {
        config.total_deadline_secs = v;
    }
}

fn env_parsed<T: FromStr>(key: &str) -> std::result::Result<T, ()> {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.incremental_threshold_days, 100);
        assert_eq!(config.financial_refresh_days, 90);
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.price_source, PriceSource::AdjClose);
        assert_eq!(config.missing_price_strategy, MissingPriceStrategy::Backfill);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("equity-ledger.toml");
        std::fs::write(
            &path,
            r#"
            incremental_threshold_days = 50
            price_source = "close"
            worker_pool_size = 8
            "#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.incremental_threshold_days, 50);
        assert_eq!(config.price_source, PriceSource::Close);
        assert_eq!(config.worker_pool_size, 8);
        // Untouched fields keep their defaults.
        assert_eq!(config.financial_refresh_days, 90);
    }

    #[test]
    fn test_missing_toml_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/equity-ledger.toml"))).unwrap();
        assert_eq!(config.incremental_threshold_days, 100);
    }
}
