//! Transactional persist-and-diff.
//!
//! One invocation = one transaction: raw rows, derived projections and the
//! summary delta row all commit together or not at all. The "previous diff"
//! baseline is always the max-id summary row read inside the same
//! transaction — SQLite's single-writer locking serializes concurrent
//! persists of the same class, so the read-then-insert cannot lose updates.

use chrono::{DateTime, Local};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::config::META_REFRESH_FIRE_TIMES;
use crate::error::{AppError, Result};
use crate::types::{
    BroadMarketSnapshot, EquitySnapshot, MarketClass, OptionChainSnapshot, OptionStrike,
    OptionTables, Snapshot,
};

/// Wall-clock and fire-time stamps for one persist call.
///
/// Raw records carry the ingest wall-clock time; derived rows carry the
/// scheduler's fire time. The asymmetry is intentional and load-bearing:
/// downstream consumers align summary series by fire slot while raw rows
/// record when the data actually arrived.
struct Stamps {
    entry_date: String,
    ingest_time: String,
    fire_time: String,
}

impl Stamps {
    fn new(fire_time: DateTime<Local>) -> Self {
        let now = Local::now();
        Self {
            entry_date: now.format("%Y-%m-%d").to_string(),
            ingest_time: now.format("%H:%M:%S").to_string(),
            fire_time: fire_time.format("%H:%M:%S").to_string(),
        }
    }
}

pub struct IngestionPersister {
    pool: SqlitePool,
}

impl IngestionPersister {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one snapshot inside a single transaction. Rolls back entirely
    /// on any failure; partial writes are never visible.
    pub async fn persist(
        &self,
        class: MarketClass,
        snapshot: &Snapshot,
        fire_time: DateTime<Local>,
    ) -> Result<()> {
        let stamps = Stamps::new(fire_time);
        let mut tx = self.pool.begin().await?;

        match snapshot {
            Snapshot::OptionChain(chain) => {
                let tables = class.option_tables().ok_or_else(|| {
                    AppError::Validation(format!("{class} is not an option-chain class"))
                })?;
                persist_option_chain(&mut tx, tables, chain, &stamps).await?;
            }
            Snapshot::BroadMarket(broad) => persist_broad_market(&mut tx, broad, &stamps).await?,
            Snapshot::Equities(equities) => persist_equities(&mut tx, equities, &stamps).await?,
        }

        tx.commit().await?;

        // Equities extras run after the snapshot is committed: a failure here
        // must not take the ingested rows down with it.
        if let Snapshot::Equities(equities) = snapshot {
            self.recompute_relative_factor().await?;
            let fire_hhmm = fire_time.format("%H:%M").to_string();
            if META_REFRESH_FIRE_TIMES.contains(&fire_hhmm.as_str()) {
                self.upsert_stock_meta(equities, &stamps).await?;
            }
        }

        Ok(())
    }

    /// Rebuild per-symbol relative factors from the latest quote per symbol.
    /// Stands in for the externally-defined recomputation procedure.
    pub async fn recompute_relative_factor(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM stock_relative_factor")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO stock_relative_factor (symbol, rfactor, updated_at)
            SELECT q.symbol,
                   q.p_change - (SELECT AVG(p.p_change) FROM stock_quotes p
                                 WHERE p.id IN (SELECT MAX(id) FROM stock_quotes GROUP BY symbol)),
                   datetime('now', 'localtime')
            FROM stock_quotes q
            WHERE q.id IN (SELECT MAX(id) FROM stock_quotes GROUP BY symbol)
            "#,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!("relative factors recomputed");
        Ok(())
    }

    /// Refresh per-symbol reference metadata: insert if absent by
    /// case-insensitive symbol match, else update in place.
    async fn upsert_stock_meta(&self, snapshot: &EquitySnapshot, stamps: &Stamps) -> Result<()> {
        let mut refreshed = 0usize;
        for meta in snapshot.data.iter().filter_map(|q| q.meta.as_ref()) {
            let existing: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM stock_meta WHERE LOWER(symbol) = LOWER(?)")
                    .bind(&meta.symbol)
                    .fetch_optional(&self.pool)
                    .await?;

            match existing {
                Some((id,)) => {
                    sqlx::query(
                        r#"
                        UPDATE stock_meta
                        SET symbol = ?, company_name = ?, industry = ?, isin = ?,
                            listing_date = ?, is_fno_sec = ?, is_etf_sec = ?,
                            is_suspended = ?, is_delisted = ?, entry_date = ?, time = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&meta.symbol)
                    .bind(&meta.company_name)
                    .bind(&meta.industry)
                    .bind(&meta.isin)
                    .bind(&meta.listing_date)
                    .bind(meta.is_fno_sec)
                    .bind(meta.is_etf_sec)
                    .bind(meta.is_suspended)
                    .bind(meta.is_delisted)
                    .bind(&stamps.entry_date)
                    .bind(&stamps.fire_time)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO stock_meta
                            (symbol, company_name, industry, isin, listing_date,
                             is_fno_sec, is_etf_sec, is_suspended, is_delisted,
                             entry_date, time)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&meta.symbol)
                    .bind(&meta.company_name)
                    .bind(&meta.industry)
                    .bind(&meta.isin)
                    .bind(&meta.listing_date)
                    .bind(meta.is_fno_sec)
                    .bind(meta.is_etf_sec)
                    .bind(meta.is_suspended)
                    .bind(meta.is_delisted)
                    .bind(&stamps.entry_date)
                    .bind(&stamps.fire_time)
                    .execute(&self.pool)
                    .await?;
                }
            }
            refreshed += 1;
        }
        info!(refreshed, "stock metadata refreshed");
        Ok(())
    }
}

async fn persist_option_chain(
    tx: &mut Transaction<'_, Sqlite>,
    tables: OptionTables,
    chain: &OptionChainSnapshot,
    stamps: &Stamps,
) -> Result<()> {
    insert_strikes(tx, tables.raw, &chain.records, stamps).await?;
    insert_strikes(tx, tables.expiry, &chain.filtered, stamps).await?;

    let oi_diff = chain.ce.tot_oi - chain.pe.tot_oi;
    let vol_diff = chain.ce.tot_vol - chain.pe.tot_vol;

    // Previous baseline = max-id summary row, read inside this transaction.
    // No prior row means no baseline: delta-of-delta is 0.
    let previous: Option<(f64, f64)> = sqlx::query_as(&format!(
        "SELECT ce_pe_oi_diff, ce_pe_vol_diff FROM {} ORDER BY id DESC LIMIT 1",
        tables.summary
    ))
    .fetch_optional(&mut **tx)
    .await?;

    let oi_prev_diff = previous.map_or(0.0, |(prev_oi, _)| oi_diff - prev_oi);
    let vol_prev_diff = previous.map_or(0.0, |(_, prev_vol)| vol_diff - prev_vol);

    sqlx::query(&format!(
        r#"
        INSERT INTO {}
            (tot_oi_ce, tot_vol_ce, tot_oi_pe, tot_vol_pe,
             ce_pe_oi_diff, ce_pe_vol_diff, ce_pe_oi_prev_diff, ce_pe_vol_prev_diff,
             entry_date, time)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        tables.summary
    ))
    .bind(chain.ce.tot_oi)
    .bind(chain.ce.tot_vol)
    .bind(chain.pe.tot_oi)
    .bind(chain.pe.tot_vol)
    .bind(oi_diff)
    .bind(vol_diff)
    .bind(oi_prev_diff)
    .bind(vol_prev_diff)
    .bind(&stamps.entry_date)
    .bind(&stamps.fire_time)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_strikes(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    strikes: &[OptionStrike],
    stamps: &Stamps,
) -> Result<()> {
    let sql = format!(
        r#"
        INSERT INTO {table}
            (strike_price, expiry_date,
             ce_open_interest, ce_change_in_oi, ce_total_traded_volume,
             ce_implied_volatility, ce_last_price, ce_change,
             pe_open_interest, pe_change_in_oi, pe_total_traded_volume,
             pe_implied_volatility, pe_last_price, pe_change,
             entry_date, time)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    );

    for strike in strikes {
        let ce = strike.ce.as_ref();
        let pe = strike.pe.as_ref();
        sqlx::query(&sql)
            .bind(strike.strike_price)
            .bind(&strike.expiry_date)
            .bind(ce.map(|l| l.open_interest))
            .bind(ce.map(|l| l.change_in_oi))
            .bind(ce.map(|l| l.total_traded_volume))
            .bind(ce.map(|l| l.implied_volatility))
            .bind(ce.map(|l| l.last_price))
            .bind(ce.map(|l| l.change))
            .bind(pe.map(|l| l.open_interest))
            .bind(pe.map(|l| l.change_in_oi))
            .bind(pe.map(|l| l.total_traded_volume))
            .bind(pe.map(|l| l.implied_volatility))
            .bind(pe.map(|l| l.last_price))
            .bind(pe.map(|l| l.change))
            .bind(&stamps.entry_date)
            .bind(&stamps.ingest_time)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn persist_broad_market(
    tx: &mut Transaction<'_, Sqlite>,
    snapshot: &BroadMarketSnapshot,
    stamps: &Stamps,
) -> Result<()> {
    for quote in &snapshot.data {
        sqlx::query(
            r#"
            INSERT INTO index_quotes
                (index_name, last, open, high, low, previous_close,
                 change, percent_change, year_high, year_low, entry_date, time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&quote.index)
        .bind(quote.last)
        .bind(quote.open)
        .bind(quote.high)
        .bind(quote.low)
        .bind(quote.previous_close)
        .bind(quote.change)
        .bind(quote.percent_change)
        .bind(quote.year_high)
        .bind(quote.year_low)
        .bind(&stamps.entry_date)
        .bind(&stamps.fire_time)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn persist_equities(
    tx: &mut Transaction<'_, Sqlite>,
    snapshot: &EquitySnapshot,
    stamps: &Stamps,
) -> Result<()> {
    for quote in &snapshot.data {
        sqlx::query(
            r#"
            INSERT INTO stock_quotes
                (symbol, series, identifier, open, day_high, day_low, last_price,
                 previous_close, change, p_change, total_traded_volume,
                 total_traded_value, year_high, year_low, last_update_time,
                 entry_date, time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&quote.symbol)
        .bind(&quote.series)
        .bind(&quote.identifier)
        .bind(quote.open)
        .bind(quote.day_high)
        .bind(quote.day_low)
        .bind(quote.last_price)
        .bind(quote.previous_close)
        .bind(quote.change)
        .bind(quote.p_change)
        .bind(quote.total_traded_volume)
        .bind(quote.total_traded_value)
        .bind(quote.year_high)
        .bind(quote.year_low)
        .bind(&quote.last_update_time)
        .bind(&stamps.entry_date)
        .bind(&stamps.ingest_time)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO advances (advances, declines, unchanged, entry_date, time)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(snapshot.advance.advances)
    .bind(snapshot.advance.declines)
    .bind(snapshot.advance.unchanged)
    .bind(&stamps.entry_date)
    .bind(&stamps.fire_time)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SummaryRow;
    use crate::types::{AdvanceDecline, SideTotals, StockMeta, StockQuote};

    async fn test_pool() -> SqlitePool {
        // Single connection: each new connection to :memory: would otherwise
        // see its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn chain(tot_oi_ce: f64, tot_oi_pe: f64) -> Snapshot {
        Snapshot::OptionChain(OptionChainSnapshot {
            records: vec![],
            filtered: vec![],
            ce: SideTotals { tot_oi: tot_oi_ce, tot_vol: 320.0 },
            pe: SideTotals { tot_oi: tot_oi_pe, tot_vol: 280.0 },
        })
    }

    async fn latest_summary(pool: &SqlitePool) -> SummaryRow {
        sqlx::query_as("SELECT * FROM nifty_summary ORDER BY id DESC LIMIT 1")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_summary_row_has_zero_prev_diffs() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());

        persister
            .persist(MarketClass::Nifty, &chain(4900.0, 4800.0), Local::now())
            .await
            .unwrap();

        let row = latest_summary(&pool).await;
        assert_eq!(row.ce_pe_oi_diff, 100.0);
        assert_eq!(row.ce_pe_vol_diff, 40.0);
        assert_eq!(row.ce_pe_oi_prev_diff, 0.0);
        assert_eq!(row.ce_pe_vol_prev_diff, 0.0);
    }

    #[tokio::test]
    async fn delta_of_delta_uses_max_id_baseline() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());

        // First row establishes a diff of 100.
        persister
            .persist(MarketClass::Nifty, &chain(4900.0, 4800.0), Local::now())
            .await
            .unwrap();
        // New snapshot: diff 200, so delta-of-delta is 100.
        persister
            .persist(MarketClass::Nifty, &chain(5000.0, 4800.0), Local::now())
            .await
            .unwrap();

        let row = latest_summary(&pool).await;
        assert_eq!(row.ce_pe_oi_diff, 200.0);
        assert_eq!(row.ce_pe_oi_prev_diff, 100.0);
    }

    #[tokio::test]
    async fn identical_snapshots_append_independent_rows() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());

        let snapshot = chain(5000.0, 4800.0);
        persister.persist(MarketClass::Nifty, &snapshot, Local::now()).await.unwrap();
        persister.persist(MarketClass::Nifty, &snapshot, Local::now()).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nifty_summary")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
        // Second row's baseline is the first row's diff.
        let row = latest_summary(&pool).await;
        assert_eq!(row.ce_pe_oi_prev_diff, 0.0);
    }

    #[tokio::test]
    async fn summary_families_are_independent() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());

        persister.persist(MarketClass::Nifty, &chain(5000.0, 4800.0), Local::now()).await.unwrap();
        persister.persist(MarketClass::BankNifty, &chain(9000.0, 8500.0), Local::now()).await.unwrap();

        let bank: SummaryRow =
            sqlx::query_as("SELECT * FROM banknifty_summary ORDER BY id DESC LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        // BankNifty's first row sees no Nifty baseline.
        assert_eq!(bank.ce_pe_oi_diff, 500.0);
        assert_eq!(bank.ce_pe_oi_prev_diff, 0.0);
    }

    fn stock(symbol: &str, p_change: f64, with_meta: bool) -> StockQuote {
        StockQuote {
            symbol: symbol.to_string(),
            series: Some("EQ".to_string()),
            identifier: None,
            open: 100.0,
            day_high: 105.0,
            day_low: 99.0,
            last_price: 104.0,
            previous_close: 100.0,
            change: 4.0,
            p_change,
            total_traded_volume: 1_000.0,
            total_traded_value: 104_000.0,
            year_high: 120.0,
            year_low: 80.0,
            last_update_time: None,
            meta: with_meta.then(|| StockMeta {
                symbol: symbol.to_string(),
                company_name: format!("{symbol} Ltd"),
                industry: None,
                isin: None,
                listing_date: None,
                is_fno_sec: false,
                is_etf_sec: false,
                is_suspended: false,
                is_delisted: false,
            }),
        }
    }

    fn equities(quotes: Vec<StockQuote>) -> Snapshot {
        Snapshot::Equities(EquitySnapshot {
            data: quotes,
            advance: AdvanceDecline { advances: 1, declines: 1, unchanged: 0 },
        })
    }

    fn session_open_fire_time() -> DateTime<Local> {
        Local::now()
            .date_naive()
            .and_hms_opt(9, 15, 0)
            .unwrap()
            .and_local_timezone(Local)
            .unwrap()
    }

    fn midday_fire_time() -> DateTime<Local> {
        Local::now()
            .date_naive()
            .and_hms_opt(12, 30, 0)
            .unwrap()
            .and_local_timezone(Local)
            .unwrap()
    }

    #[tokio::test]
    async fn meta_upsert_only_runs_at_session_open() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());

        let snapshot = equities(vec![stock("INFY", 2.0, true)]);

        persister.persist(MarketClass::Equities, &snapshot, midday_fire_time()).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_meta")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        persister.persist(MarketClass::Equities, &snapshot, session_open_fire_time()).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stock_meta")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn meta_upsert_matches_symbol_case_insensitively() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());
        let fire = session_open_fire_time();

        persister
            .persist(MarketClass::Equities, &equities(vec![stock("INFY", 2.0, true)]), fire)
            .await
            .unwrap();

        // Same symbol in different case updates in place instead of inserting.
        let lower = equities(vec![stock("infy", 2.5, true)]);
        persister.persist(MarketClass::Equities, &lower, fire).await.unwrap();

        let rows: Vec<(String,)> = sqlx::query_as("SELECT symbol FROM stock_meta")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "infy");
    }

    #[tokio::test]
    async fn relative_factor_recomputed_from_latest_quotes() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());

        let snapshot = equities(vec![stock("AAA", 3.0, false), stock("BBB", 1.0, false)]);
        persister.persist(MarketClass::Equities, &snapshot, midday_fire_time()).await.unwrap();

        let (rfactor,): (f64,) =
            sqlx::query_as("SELECT rfactor FROM stock_relative_factor WHERE symbol = 'AAA'")
                .fetch_one(&pool)
                .await
                .unwrap();
        // Universe mean is 2.0, so AAA's relative factor is +1.0.
        assert!((rfactor - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_persist_leaves_no_partial_writes() {
        let pool = test_pool().await;
        let persister = IngestionPersister::new(pool.clone());

        // Drop the summary table so the final step of the transaction fails.
        sqlx::query("DROP TABLE nifty_summary").execute(&pool).await.unwrap();

        let snapshot = Snapshot::OptionChain(OptionChainSnapshot {
            records: vec![OptionStrike {
                strike_price: 22000.0,
                expiry_date: "27-Mar-2025".to_string(),
                ce: Some(Default::default()),
                pe: None,
            }],
            filtered: vec![],
            ce: SideTotals { tot_oi: 1.0, tot_vol: 1.0 },
            pe: SideTotals { tot_oi: 1.0, tot_vol: 1.0 },
        });

        let result = persister.persist(MarketClass::Nifty, &snapshot, Local::now()).await;
        assert!(result.is_err());

        // The raw insert succeeded mid-transaction but must have rolled back.
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nifty_option_records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
