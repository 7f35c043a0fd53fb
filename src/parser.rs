//! Snapshot validation: turns a decoded JSON payload into a typed [`Snapshot`]
//! or a validation error. Validation failures are folded into the fetch retry
//! loop by the caller — a payload missing its required sections is treated the
//! same as a transport failure.
//!
//! NSE payloads are matched case-insensitively on field names.

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::types::{
    AdvanceDecline, BroadMarketSnapshot, EquitySnapshot, IndexQuote, MarketClass,
    OptionChainSnapshot, OptionLeg, OptionStrike, SideTotals, Snapshot, StockMeta, StockQuote,
};

pub fn validate(class: MarketClass, raw: &Value) -> Result<Snapshot> {
    match class {
        MarketClass::Nifty | MarketClass::BankNifty => {
            Ok(Snapshot::OptionChain(validate_option_chain(raw)?))
        }
        MarketClass::BroadMarket => Ok(Snapshot::BroadMarket(validate_broad_market(raw)?)),
        MarketClass::Equities => Ok(Snapshot::Equities(validate_equities(raw)?)),
    }
}

fn validate_option_chain(raw: &Value) -> Result<OptionChainSnapshot> {
    let records = ci_get(raw, "records")
        .ok_or_else(|| AppError::Validation("missing 'records' section".to_string()))?;
    let records_data = ci_get(records, "data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation("missing 'records.data' list".to_string()))?;

    let filtered = ci_get(raw, "filtered")
        .ok_or_else(|| AppError::Validation("missing 'filtered' section".to_string()))?;
    let filtered_data = ci_get(filtered, "data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation("missing 'filtered.data' list".to_string()))?;

    let ce = ci_get(filtered, "CE")
        .map(parse_side_totals)
        .ok_or_else(|| AppError::Validation("missing 'filtered.CE' totals".to_string()))?;
    let pe = ci_get(filtered, "PE")
        .map(parse_side_totals)
        .ok_or_else(|| AppError::Validation("missing 'filtered.PE' totals".to_string()))?;

    Ok(OptionChainSnapshot {
        records: records_data.iter().filter_map(parse_strike).collect(),
        filtered: filtered_data.iter().filter_map(parse_strike).collect(),
        ce,
        pe,
    })
}

fn parse_side_totals(v: &Value) -> SideTotals {
    SideTotals {
        tot_oi: num(v, "totOI"),
        tot_vol: num(v, "totVol"),
    }
}

fn parse_strike(v: &Value) -> Option<OptionStrike> {
    // A strike entry with neither leg is structurally unusable.
    let ce = ci_get(v, "CE").filter(|x| x.is_object()).map(parse_leg);
    let pe = ci_get(v, "PE").filter(|x| x.is_object()).map(parse_leg);
    if ce.is_none() && pe.is_none() {
        return None;
    }
    Some(OptionStrike {
        strike_price: num(v, "strikePrice"),
        expiry_date: text(v, "expiryDate").unwrap_or_default(),
        ce,
        pe,
    })
}

fn parse_leg(v: &Value) -> OptionLeg {
    OptionLeg {
        open_interest: num(v, "openInterest"),
        change_in_oi: num(v, "changeinOpenInterest"),
        total_traded_volume: num(v, "totalTradedVolume"),
        implied_volatility: num(v, "impliedVolatility"),
        last_price: num(v, "lastPrice"),
        change: num(v, "change"),
    }
}

fn validate_broad_market(raw: &Value) -> Result<BroadMarketSnapshot> {
    let data = ci_get(raw, "data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation("missing 'data' list".to_string()))?;

    Ok(BroadMarketSnapshot {
        data: data.iter().filter_map(parse_index_quote).collect(),
    })
}

fn parse_index_quote(v: &Value) -> Option<IndexQuote> {
    let index = text(v, "index")?;
    Some(IndexQuote {
        index,
        last: num(v, "last"),
        open: num(v, "open"),
        high: num(v, "high"),
        low: num(v, "low"),
        previous_close: num(v, "previousClose"),
        change: num(v, "variation"),
        percent_change: num(v, "percentChange"),
        year_high: num(v, "yearHigh"),
        year_low: num(v, "yearLow"),
    })
}

fn validate_equities(raw: &Value) -> Result<EquitySnapshot> {
    let data = ci_get(raw, "data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation("missing 'data' list".to_string()))?;
    let advance = ci_get(raw, "advance")
        .ok_or_else(|| AppError::Validation("missing 'advance' aggregate".to_string()))?;

    Ok(EquitySnapshot {
        data: data.iter().filter_map(parse_stock_quote).collect(),
        advance: AdvanceDecline {
            advances: int(advance, "advances"),
            declines: int(advance, "declines"),
            unchanged: int(advance, "unchanged"),
        },
    })
}

fn parse_stock_quote(v: &Value) -> Option<StockQuote> {
    let symbol = text(v, "symbol")?;
    Some(StockQuote {
        symbol,
        series: text(v, "series"),
        identifier: text(v, "identifier"),
        open: num(v, "open"),
        day_high: num(v, "dayHigh"),
        day_low: num(v, "dayLow"),
        last_price: num(v, "lastPrice"),
        previous_close: num(v, "previousClose"),
        change: num(v, "change"),
        p_change: num(v, "pChange"),
        total_traded_volume: num(v, "totalTradedVolume"),
        total_traded_value: num(v, "totalTradedValue"),
        year_high: num(v, "yearHigh"),
        year_low: num(v, "yearLow"),
        last_update_time: text(v, "lastUpdateTime"),
        meta: ci_get(v, "meta").filter(|m| m.is_object()).and_then(parse_stock_meta),
    })
}

fn parse_stock_meta(v: &Value) -> Option<StockMeta> {
    let symbol = text(v, "symbol")?;
    Some(StockMeta {
        symbol,
        company_name: text(v, "companyName").unwrap_or_default(),
        industry: text(v, "industry"),
        isin: text(v, "isin"),
        listing_date: text(v, "listingDate"),
        is_fno_sec: boolean(v, "isFNOSec"),
        is_etf_sec: boolean(v, "isETFSec"),
        is_suspended: boolean(v, "isSuspended"),
        is_delisted: boolean(v, "isDelisted"),
    })
}

// ---------------------------------------------------------------------------
// Case-insensitive field access
// ---------------------------------------------------------------------------

fn ci_get<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    let obj = v.as_object()?;
    if let Some(exact) = obj.get(key) {
        return Some(exact);
    }
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

/// Numeric field: accepts a JSON number or a numeric string ("-" and absent
/// fields read as 0).
fn num(v: &Value, key: &str) -> f64 {
    ci_get(v, key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0.0)
}

fn int(v: &Value, key: &str) -> i64 {
    ci_get(v, key)
        .and_then(|x| x.as_i64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0)
}

fn boolean(v: &Value, key: &str) -> bool {
    ci_get(v, key).and_then(Value::as_bool).unwrap_or(false)
}

fn text(v: &Value, key: &str) -> Option<String> {
    ci_get(v, key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
