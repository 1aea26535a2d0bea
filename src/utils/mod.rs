//! Formatting helpers shared by the CLI's human-readable output paths.

use rust_decimal::Decimal;

/// Render a decimal using US locale conventions: comma thousands
/// separators, two decimal places, optional leading symbol.
fn format_with_symbol(value: Decimal, prefix: &str) -> String {
    let is_negative = value < Decimal::ZERO;
    let abs_value = value.abs();

    let formatted = format!("{:.2}", abs_value);
    let parts: Vec<&str> = formatted.split('.').collect();
    let integer_part = parts[0];
    let decimal_part = parts.get(1).unwrap_or(&"00");

    let with_separators: String = integer_part
        .chars()
        .rev()
        .enumerate()
        .flat_map(|(i, c)| {
            if i > 0 && i % 3 == 0 {
                vec![',', c]
            } else {
                vec![c]
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let sign = if is_negative { "-" } else { "" };
    format!("{}{}{}.{}", prefix, sign, with_separators, decimal_part)
}

/// Format as currency with symbol: "$ 1,234.56".
pub fn format_currency(value: Decimal) -> String {
    format_with_symbol(value, "$ ")
}

/// Format a bare number, no symbol: "1,234.56". Used for quantity columns
/// in table cells, where a currency prefix would be misleading.
pub fn format_decimal(value: Decimal) -> String {
    format_with_symbol(value, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_currency_basic() {
        assert_eq!(format_currency(dec!(1234.56)), "$ 1,234.56");
        assert_eq!(format_currency(dec!(0.99)), "$ 0.99");
        assert_eq!(format_currency(dec!(1000000)), "$ 1,000,000.00");
    }

    #[test]
    fn test_format_currency_negative() {
        assert_eq!(format_currency(dec!(-1234.56)), "$ -1,234.56");
    }

    #[test]
    fn test_format_decimal_no_symbol() {
        assert_eq!(format_decimal(dec!(1234.56)), "1,234.56");
    }
}
