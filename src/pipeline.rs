//! One ingestion cycle: fetch → persist, per market class.
//!
//! A cycle never reports failure to the scheduler — the calendar must keep
//! firing regardless. Every outcome is logged and counted in [`IngestStats`]
//! so persistent failure is still observable.

use std::sync::Arc;

use chrono::{DateTime, Local};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::persister::IngestionPersister;
use crate::error::Result;
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::stats::IngestStats;
use crate::types::MarketClass;

pub struct Pipeline {
    fetcher: Fetcher,
    persister: IngestionPersister,
    stats: Arc<IngestStats>,
}

impl Pipeline {
    pub fn new(cfg: &Config, pool: SqlitePool, stats: Arc<IngestStats>) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(cfg, pool.clone())?,
            persister: IngestionPersister::new(pool),
            stats,
        })
    }

    /// Run one scheduled invocation for a market class.
    ///
    /// `fire_time` is the scheduler's trigger instant; it stamps derived rows
    /// while raw rows get the ingest wall clock.
    pub async fn run_cycle(&self, class: MarketClass, fire_time: DateTime<Local>) {
        info!(
            class = %class,
            fire_time = %fire_time.format("%H:%M:%S"),
            "cycle started",
        );
        self.stats.record_cycle(class.name());

        match self.fetcher.fetch(class).await {
            FetchOutcome::Success { snapshot, attempts } => {
                self.stats.record_fetch_success(class.name(), attempts);
                match self.persister.persist(class, &snapshot, fire_time).await {
                    Ok(()) => {
                        self.stats.record_persist_ok(class.name());
                        info!(class = %class, attempts, "cycle complete, snapshot committed");
                    }
                    Err(e) => {
                        self.stats.record_persist_failure(class.name());
                        error!(class = %class, "persist failed, transaction rolled back: {e}");
                    }
                }
            }
            FetchOutcome::Exhausted => {
                self.stats.record_exhausted(class.name());
                warn!(class = %class, "cycle ended with no snapshot after exhausting retries");
            }
        }
    }
}
