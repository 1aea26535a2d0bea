//! Parser for the `--specific-lots` CLI syntax: comma-separated
//! `lot=<id>:<qty>` pairs. Grounded on this codebase's `key=value`
//! splitting used for `inconsistencies resolve --set`, extended to the
//! two-level `lot=<id>:<qty>` shape this command needs.

use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse `"lot=1:40,lot=2:20"` into `[(1, 40), (2, 20)]`, preserving order.
pub fn parse_specific_lots(input: &str) -> Result<Vec<(i64, Decimal)>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_one)
        .collect()
}

fn parse_one(entry: &str) -> Result<(i64, Decimal)> {
    let malformed = || {
        EngineError::Validation(format!(
            "malformed specific-lot entry {:?}, expected lot=<id>:<qty>",
            entry
        ))
    };

    let rest = entry.strip_prefix("lot=").ok_or_else(malformed)?;
    let (id_str, qty_str) = rest.split_once(':').ok_or_else(malformed)?;
    let lot_id = id_str.parse::<i64>().map_err(|_| malformed())?;
    let quantity = Decimal::from_str(qty_str).map_err(|_| malformed())?;
    Ok((lot_id, quantity))
}
