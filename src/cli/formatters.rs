//! Table rendering for the `trade` listing commands. Grounded on this
//! codebase's `format_portfolio_table`: a `#[derive(Tabled)]` row struct
//! per listing, modern-box style, right-aligned numeric columns.

use crate::db::models::{PositionLot, SaleAllocation};
use crate::db::PositionSummary;
use crate::utils::{format_currency, format_decimal};
use tabled::settings::{object::Columns, Alignment, Style};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct PositionRow {
    #[tabled(rename = "Symbol")]
    symbol: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Avg Cost")]
    avg_cost: String,
    #[tabled(rename = "Total Cost")]
    total_cost: String,
    #[tabled(rename = "Lots")]
    lot_count: String,
}

pub fn positions_table(summaries: &[PositionSummary]) -> String {
    let rows: Vec<PositionRow> = summaries
        .iter()
        .map(|s| PositionRow {
            symbol: s.symbol.clone(),
            quantity: format_decimal(s.quantity),
            avg_cost: format_currency(s.weighted_avg_cost),
            total_cost: format_currency(s.total_cost),
            lot_count: s.lot_count.to_string(),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(1..), Alignment::right());
    table.to_string()
}

#[derive(Tabled)]
struct LotRow {
    #[tabled(rename = "Lot ID")]
    lot_id: String,
    #[tabled(rename = "Purchased")]
    purchase_date: String,
    #[tabled(rename = "Remaining")]
    remaining_quantity: String,
    #[tabled(rename = "Original")]
    original_quantity: String,
    #[tabled(rename = "Cost Basis/Sh")]
    cost_basis_per_share: String,
}

pub fn lots_table(lots: &[PositionLot]) -> String {
    let rows: Vec<LotRow> = lots
        .iter()
        .map(|l| LotRow {
            lot_id: l.id.unwrap_or_default().to_string(),
            purchase_date: l.purchase_date.to_string(),
            remaining_quantity: format_decimal(l.remaining_quantity),
            original_quantity: format_decimal(l.original_quantity),
            cost_basis_per_share: format_currency(l.cost_basis_per_share),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(1..), Alignment::right());
    table.to_string()
}

#[derive(Tabled)]
struct SaleRow {
    #[tabled(rename = "Tx ID")]
    sell_transaction_id: String,
    #[tabled(rename = "Lot ID")]
    lot_id: String,
    #[tabled(rename = "Qty Sold")]
    quantity_sold: String,
    #[tabled(rename = "Cost Basis/Sh")]
    cost_basis_per_share: String,
    #[tabled(rename = "Sale Price/Sh")]
    sale_price_per_share: String,
    #[tabled(rename = "Realized PnL")]
    realized_pnl: String,
}

pub fn sales_table(allocations: &[SaleAllocation]) -> String {
    let rows: Vec<SaleRow> = allocations
        .iter()
        .map(|a| SaleRow {
            sell_transaction_id: a.sell_transaction_id.to_string(),
            lot_id: a.lot_id.to_string(),
            quantity_sold: format_decimal(a.quantity_sold),
            cost_basis_per_share: format_currency(a.cost_basis_per_share),
            sale_price_per_share: format_currency(a.sale_price_per_share),
            realized_pnl: format_currency(a.realized_pnl),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(1..), Alignment::right());
    table.to_string()
}
