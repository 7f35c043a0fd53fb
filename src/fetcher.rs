//! Bounded-retry snapshot fetching.
//!
//! Each pipeline invocation owns a fresh [`RetryState`]; transport failures,
//! non-2xx statuses and payload validation failures are all handled the same
//! way — wait the fixed backoff and try again, up to four attempts total.

use std::time::Duration;

use reqwest::header;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::{Config, HTTP_TIMEOUT_SECS, MAX_RETRIES, RETRY_BACKOFF_MS, USER_AGENT};
use crate::error::Result;
use crate::parser;
use crate::session;
use crate::types::{MarketClass, Snapshot};

/// Attempt bookkeeping for one fetch cycle. Never persisted, never shared
/// across invocations.
#[derive(Debug)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Number of failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt. Returns the backoff to wait before the next
    /// attempt, or None once the attempt budget is exhausted.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt <= MAX_RETRIES {
            Some(Duration::from_millis(RETRY_BACKOFF_MS))
        } else {
            None
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminal state of one fetch cycle. `attempts` is the number of failures
/// before the successful attempt — the caller persists iff the cycle reached
/// `Success`.
#[derive(Debug)]
pub enum FetchOutcome {
    Success { snapshot: Snapshot, attempts: u32 },
    Exhausted,
}

pub struct Fetcher {
    client: reqwest::Client,
    pool: SqlitePool,
    base_url: String,
}

impl Fetcher {
    pub fn new(cfg: &Config, pool: SqlitePool) -> Result<Self> {
        // gzip/deflate/brotli decompression is transparent: reqwest sends the
        // Accept-Encoding header and decodes the body for us.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            pool,
            base_url: cfg.base_url.clone(),
        })
    }

    /// Run one full fetch cycle for a market class.
    pub async fn fetch(&self, class: MarketClass) -> FetchOutcome {
        let url = format!("{}{}", self.base_url, class.endpoint_path());
        let mut retry = RetryState::new();

        loop {
            debug!(class = %class, attempt = retry.attempts() + 1, "requesting {url}");
            match self.attempt_once(class, &url).await {
                Ok(snapshot) => {
                    return FetchOutcome::Success {
                        snapshot,
                        attempts: retry.attempts(),
                    };
                }
                Err(e) => match retry.record_failure() {
                    Some(backoff) => {
                        warn!(
                            class = %class,
                            attempt = retry.attempts(),
                            "fetch attempt failed, retrying in {}ms: {e}",
                            backoff.as_millis(),
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    None => {
                        warn!(
                            class = %class,
                            attempts = retry.attempts(),
                            "fetch attempts exhausted: {e}",
                        );
                        return FetchOutcome::Exhausted;
                    }
                },
            }
        }
    }

    /// One GET + decode + validate. Any error here counts as a failed attempt.
    async fn attempt_once(&self, class: MarketClass, url: &str) -> Result<Snapshot> {
        let token = session::current_token(&self.pool).await?;
        let cookie = session::filter_cookie_header(&token, class.request_class());

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "*/*")
            .header(header::CONNECTION, "keep-alive")
            .header(header::COOKIE, cookie)
            .send()
            .await?
            .error_for_status()?;

        let payload: serde_json::Value = response.json().await?;
        parser::validate(class, &payload)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
