//! Database row types used by sqlx runtime queries.

use serde::Serialize;

/// One row of an option-chain summary series (`nifty_summary` /
/// `banknifty_summary`). Append-only; prev-diff fields are computed against
/// the max-id row at insert time.
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct SummaryRow {
    pub id: i64,
    pub tot_oi_ce: f64,
    pub tot_vol_ce: f64,
    pub tot_oi_pe: f64,
    pub tot_vol_pe: f64,
    pub ce_pe_oi_diff: f64,
    pub ce_pe_vol_diff: f64,
    pub ce_pe_oi_prev_diff: f64,
    pub ce_pe_vol_prev_diff: f64,
    pub entry_date: String,
    pub time: String,
}
