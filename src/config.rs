use crate::error::{AppError, Result};

pub const NSE_BASE_URL: &str = "https://www.nseindia.com";

pub const NIFTY_OPTION_CHAIN_PATH: &str = "/api/option-chain-indices?symbol=NIFTY";
pub const BANKNIFTY_OPTION_CHAIN_PATH: &str = "/api/option-chain-indices?symbol=BANKNIFTY";
pub const ALL_INDICES_PATH: &str = "/api/allIndices";
pub const EQUITY_INDICES_PATH: &str = "/api/equity-stockIndices?index=NIFTY%20500";

/// Extra retries after the initial attempt — 4 attempts total per cycle.
pub const MAX_RETRIES: u32 = 3;

/// Fixed delay between attempts (milliseconds).
pub const RETRY_BACKOFF_MS: u64 = 2000;

/// Per-request timeout (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

pub const USER_AGENT: &str = "PostmanRuntime/7.43.0";

/// Cookie names forwarded from the harvested session token. Everything else
/// the browser collected is dropped before the header is built.
pub const COOKIE_WHITELIST: &[&str] = &[
    "_abck=", "ak_bmsc=", "bm_sv=", "bm_sz=", "nseappid=", "nsit=",
];

/// Constant Akamai sentinel appended to every built cookie header.
pub const SENTINEL_COOKIE: &str = "AKA_A2=A;";

/// Trading-day cron calendar (local exchange time, Mon-Fri).
/// 09:15-09:55, 10:00-14:55, 15:00-15:30 every 5 minutes, plus a 16:00 final call.
pub const FIRST_SESSION_CRON: &str = "0 15-59/5 9 * * Mon-Fri";
pub const MID_SESSION_CRON: &str = "0 0-59/5 10-14 * * Mon-Fri";
pub const LAST_SESSION_CRON: &str = "0 0-30/5 15 * * Mon-Fri";
pub const FINAL_CALL_CRON: &str = "0 0 16 * * Mon-Fri";

/// Fire times (HH:MM local) at which the equities job refreshes per-symbol
/// reference metadata, right after the session opens.
pub const META_REFRESH_FIRE_TIMES: &[&str] = &["09:15", "09:20", "09:25", "09:30"];

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for all NSE endpoints (NSE_BASE_URL). Overridable for tests.
    pub base_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: std::env::var("NSE_BASE_URL").unwrap_or_else(|_| NSE_BASE_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "nse-sync.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
        })
    }
}
