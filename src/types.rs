use serde::Serialize;

use crate::config;

// ---------------------------------------------------------------------------
// Market classes
// ---------------------------------------------------------------------------

/// Request class for cookie-header construction. Option chains for different
/// underlyings share the same anti-bot treatment; the broad-market indices
/// endpoint needs a stripped-down header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    IndexOptions,
    BroadMarket,
    Equities,
}

/// One scheduled ingestion family: endpoint, payload shape and storage
/// targets. The whole pipeline is parameterized by this — the four cron jobs
/// are the same code running over different variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketClass {
    Nifty,
    BankNifty,
    BroadMarket,
    Equities,
}

/// Storage targets for an option-chain family.
#[derive(Debug, Clone, Copy)]
pub struct OptionTables {
    pub raw: &'static str,
    pub expiry: &'static str,
    pub summary: &'static str,
}

pub const ALL_CLASSES: &[MarketClass] = &[
    MarketClass::Nifty,
    MarketClass::BankNifty,
    MarketClass::BroadMarket,
    MarketClass::Equities,
];

impl MarketClass {
    pub fn name(&self) -> &'static str {
        match self {
            MarketClass::Nifty => "nifty",
            MarketClass::BankNifty => "banknifty",
            MarketClass::BroadMarket => "indices",
            MarketClass::Equities => "stocks",
        }
    }

    pub fn request_class(&self) -> RequestClass {
        match self {
            MarketClass::Nifty | MarketClass::BankNifty => RequestClass::IndexOptions,
            MarketClass::BroadMarket => RequestClass::BroadMarket,
            MarketClass::Equities => RequestClass::Equities,
        }
    }

    pub fn endpoint_path(&self) -> &'static str {
        match self {
            MarketClass::Nifty => config::NIFTY_OPTION_CHAIN_PATH,
            MarketClass::BankNifty => config::BANKNIFTY_OPTION_CHAIN_PATH,
            MarketClass::BroadMarket => config::ALL_INDICES_PATH,
            MarketClass::Equities => config::EQUITY_INDICES_PATH,
        }
    }

    /// Table family for option-chain classes; None for the others.
    pub fn option_tables(&self) -> Option<OptionTables> {
        match self {
            MarketClass::Nifty => Some(OptionTables {
                raw: "nifty_option_records",
                expiry: "nifty_expiry_records",
                summary: "nifty_summary",
            }),
            MarketClass::BankNifty => Some(OptionTables {
                raw: "banknifty_option_records",
                expiry: "banknifty_expiry_records",
                summary: "banknifty_summary",
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Option chain snapshot
// ---------------------------------------------------------------------------

/// One side (CE or PE) of a strike entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptionLeg {
    pub open_interest: f64,
    pub change_in_oi: f64,
    pub total_traded_volume: f64,
    pub implied_volatility: f64,
    pub last_price: f64,
    pub change: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionStrike {
    pub strike_price: f64,
    pub expiry_date: String,
    pub ce: Option<OptionLeg>,
    pub pe: Option<OptionLeg>,
}

/// Aggregate OI/volume totals for one side of the near-expiry subset.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SideTotals {
    pub tot_oi: f64,
    pub tot_vol: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionChainSnapshot {
    /// All strikes across expiries ("records.data").
    pub records: Vec<OptionStrike>,
    /// Near-expiry subset ("filtered.data").
    pub filtered: Vec<OptionStrike>,
    pub ce: SideTotals,
    pub pe: SideTotals,
}

// ---------------------------------------------------------------------------
// Broad-market snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct IndexQuote {
    pub index: String,
    pub last: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub previous_close: f64,
    pub change: f64,
    pub percent_change: f64,
    pub year_high: f64,
    pub year_low: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadMarketSnapshot {
    pub data: Vec<IndexQuote>,
}

// ---------------------------------------------------------------------------
// Equities snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StockQuote {
    pub symbol: String,
    pub series: Option<String>,
    pub identifier: Option<String>,
    pub open: f64,
    pub day_high: f64,
    pub day_low: f64,
    pub last_price: f64,
    pub previous_close: f64,
    pub change: f64,
    pub p_change: f64,
    pub total_traded_volume: f64,
    pub total_traded_value: f64,
    pub year_high: f64,
    pub year_low: f64,
    pub last_update_time: Option<String>,
    pub meta: Option<StockMeta>,
}

/// Per-symbol reference metadata, present on most quote entries.
#[derive(Debug, Clone, Serialize)]
pub struct StockMeta {
    pub symbol: String,
    pub company_name: String,
    pub industry: Option<String>,
    pub isin: Option<String>,
    pub listing_date: Option<String>,
    pub is_fno_sec: bool,
    pub is_etf_sec: bool,
    pub is_suspended: bool,
    pub is_delisted: bool,
}

/// Session-wide advance/decline aggregate shipped with the equities payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdvanceDecline {
    pub advances: i64,
    pub declines: i64,
    pub unchanged: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EquitySnapshot {
    pub data: Vec<StockQuote>,
    pub advance: AdvanceDecline,
}

// ---------------------------------------------------------------------------
// Snapshot — one fetch cycle's decoded payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Snapshot {
    OptionChain(OptionChainSnapshot),
    BroadMarket(BroadMarketSnapshot),
    Equities(EquitySnapshot),
}
