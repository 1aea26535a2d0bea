//! Error handling for the engine.
//!
//! Defines the typed failure taxonomy from the acquisition, ledger and PnL
//! components and establishes a unified `Result` type using anyhow for
//! context chaining. Call sites that need to branch on *kind* (rather than
//! just propagate and display) downcast to [`EngineError`] via
//! `anyhow::Error::downcast_ref`.

use rust_decimal::Decimal;
use thiserror::Error;

/// Categorical tag for a storage failure, surfaced to callers instead of a
/// raw driver error so batch callers can decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCategory {
    NotFound,
    ConstraintViolation,
    Io,
}

impl StorageErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorCategory::NotFound => "not_found",
            StorageErrorCategory::ConstraintViolation => "constraint_violation",
            StorageErrorCategory::Io => "io_error",
        }
    }
}

impl std::fmt::Display for StorageErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a provider-adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorCategory {
    /// 429/5xx/transient network failure; safe to retry.
    Retryable,
    /// 4xx (non-429) or schema mismatch; retrying won't help.
    Fatal,
    /// Upstream responded but had nothing for the requested range.
    NoData,
}

/// Core error types for engine operations, covering the failure taxonomy.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("duplicate transaction for owner {owner_id} external_id {external_id}")]
    DuplicateExternalId { owner_id: String, external_id: String },

    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: Decimal, available: Decimal },

    #[error("no price available for {symbol} on {date}")]
    NoPrice { symbol: String, date: String },

    #[error("upstream provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("storage error ({category}): {message}")]
    Storage {
        category: StorageErrorCategory,
        message: String,
    },

    #[error("operation canceled")]
    Canceled,
}

impl EngineError {
    /// The stable machine-readable category string used in CLI JSON output
    /// and per-symbol batch results (spec's `error_category` field).
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::DuplicateExternalId { .. } => "duplicate_external_id",
            EngineError::InsufficientShares { .. } => "insufficient_shares",
            EngineError::NoPrice { .. } => "no_price",
            EngineError::UpstreamUnavailable(_) => "provider_unavailable",
            EngineError::Storage { .. } => "storage_error",
            EngineError::Canceled => "canceled",
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting_is_readable() {
        let err = EngineError::InsufficientShares {
            requested: Decimal::from(100),
            available: Decimal::from(30),
        };
        assert_eq!(
            err.to_string(),
            "insufficient shares: requested 100, available 30"
        );
    }

    #[test]
    fn test_category_strings() {
        assert_eq!(EngineError::Validation("x".into()).category(), "validation");
        assert_eq!(
            EngineError::DuplicateExternalId {
                owner_id: "u1".into(),
                external_id: "e1".into()
            }
            .category(),
            "duplicate_external_id"
        );
        assert_eq!(
            EngineError::Storage {
                category: StorageErrorCategory::Io,
                message: "disk full".into()
            }
            .category(),
            "storage_error"
        );
    }

    #[test]
    fn test_anyhow_context_chains_errors() {
        use anyhow::Context;
        let result: Result<()> =
            Err(anyhow::anyhow!("original error")).context("failed to process transaction");
        match result {
            Err(e) => {
                let msg = e.to_string();
                assert!(msg.contains("failed to process transaction"));
                let debug_msg = format!("{:?}", e);
                assert!(debug_msg.contains("original error") || msg.contains("original error"));
            }
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_downcast_from_anyhow() {
        let err: anyhow::Error = EngineError::Canceled.into();
        let downcast = err.downcast_ref::<EngineError>();
        assert!(matches!(downcast, Some(EngineError::Canceled)));
    }
}
